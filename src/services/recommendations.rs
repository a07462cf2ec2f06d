use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{db::Store, error::AppResult, models::Book};

/// Maximum number of recommended books
pub const RECOMMENDATION_LIMIT: usize = 8;

/// How many of the user's most recent categories seed the candidate pool
pub const SEED_CATEGORY_COUNT: usize = 3;

/// Weight of an interaction that carries no rate
const UNRATED_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendations {
    pub recommended_books: Vec<Book>,
    /// Books the user already interacted with, most recent first
    pub rated_book: Vec<Book>,
}

/// Builds per-user reading recommendations from past interactions
#[derive(Clone)]
pub struct RecommendationService {
    store: Arc<dyn Store>,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recommends unread books from the categories the user engaged with most recently
    pub async fn recommend(&self, user_uid: Uuid) -> AppResult<Recommendations> {
        let interactions = self.store.user_interactions(user_uid).await?;
        if interactions.is_empty() {
            tracing::debug!(user_uid = %user_uid, "No interactions, nothing to recommend");
            return Ok(Recommendations {
                recommended_books: Vec::new(),
                rated_book: Vec::new(),
            });
        }

        let rated_uids: Vec<Uuid> = interactions.iter().map(|i| i.book_uid).collect();
        let mut by_uid: HashMap<Uuid, Book> = self
            .store
            .find_books(&rated_uids)
            .await?
            .into_iter()
            .map(|b| (b.uid, b))
            .collect();
        let rated_books: Vec<Book> = rated_uids
            .iter()
            .filter_map(|uid| by_uid.remove(uid))
            .collect();

        let seeds = seed_categories(&rated_books, SEED_CATEGORY_COUNT);

        let rates: HashMap<Uuid, f64> = interactions
            .iter()
            .map(|i| (i.book_uid, i.rate.map_or(UNRATED_WEIGHT, f64::from)))
            .collect();
        let affinity = category_affinity(&rated_books, &rates);

        let rated: HashSet<Uuid> = rated_uids.into_iter().collect();
        let candidates: Vec<Book> = self
            .store
            .books_in_categories(&seeds)
            .await?
            .into_iter()
            .filter(|b| !rated.contains(&b.uid))
            .collect();

        let recommended_books = cf_filter(&affinity, candidates, RECOMMENDATION_LIMIT);

        tracing::info!(
            user_uid = %user_uid,
            seed_count = seeds.len(),
            recommended = recommended_books.len(),
            "Recommendations computed"
        );

        Ok(Recommendations {
            recommended_books,
            rated_book: rated_books,
        })
    }
}

/// First `count` distinct categories, walking `books` in order
pub fn seed_categories(books: &[Book], count: usize) -> Vec<Uuid> {
    let mut seeds = Vec::new();
    for category in books.iter().flat_map(|b| b.categories.iter()) {
        if seeds.len() == count {
            break;
        }
        if !seeds.contains(&category.uid) {
            seeds.push(category.uid);
        }
    }
    seeds
}

/// Mean rate the user gave to books of each category
pub fn category_affinity(books: &[Book], rates: &HashMap<Uuid, f64>) -> HashMap<Uuid, f64> {
    let mut totals: HashMap<Uuid, (f64, u32)> = HashMap::new();
    for book in books {
        let Some(rate) = rates.get(&book.uid) else {
            continue;
        };
        for category in &book.categories {
            let entry = totals.entry(category.uid).or_insert((0.0, 0));
            entry.0 += rate;
            entry.1 += 1;
        }
    }
    totals
        .into_iter()
        .map(|(uid, (sum, n))| (uid, sum / f64::from(n)))
        .collect()
}

/// Collaborative filter over category affinity.
///
/// A candidate scores the sum of the user's affinity for each of its
/// categories. Ties go to the better rated, then more rated, then
/// alphabetically first book. Returns at most `limit` books.
pub fn cf_filter(affinity: &HashMap<Uuid, f64>, candidates: Vec<Book>, limit: usize) -> Vec<Book> {
    let mut scored: Vec<(f64, Book)> = candidates
        .into_iter()
        .map(|book| {
            let score = book
                .categories
                .iter()
                .filter_map(|c| affinity.get(&c.uid))
                .sum::<f64>();
            (score, book)
        })
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .total_cmp(score_a)
            .then_with(|| b.rating.total_cmp(&a.rating))
            .then_with(|| b.rating_count.cmp(&a.rating_count))
            .then_with(|| a.name.cmp(&b.name))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(_, book)| book).collect()
}
