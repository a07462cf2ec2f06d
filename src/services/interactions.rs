use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{Cache, CacheKey, Store},
    error::{AppError, AppResult},
    models::{Interaction, InteractionQuery, RateRequest},
};

/// Ratings and reviews left by users on books
#[derive(Clone)]
pub struct InteractionService {
    store: Arc<dyn Store>,
    cache: Option<Cache>,
}

impl InteractionService {
    pub fn new(store: Arc<dyn Store>, cache: Option<Cache>) -> Self {
        Self { store, cache }
    }

    pub async fn list(&self, query: &InteractionQuery) -> AppResult<Vec<Interaction>> {
        self.store.list_interactions(query).await
    }

    /// The interaction `user_uid` left on `book_uid`
    pub async fn get(&self, user_uid: Uuid, book_uid: Uuid) -> AppResult<Interaction> {
        self.store
            .find_interaction(user_uid, book_uid)
            .await?
            .ok_or_else(|| AppError::NotFound("Interaction does not exist".to_string()))
    }

    /// Records the user's rate for a book and refreshes the book's rating
    pub async fn rate(&self, user_uid: Uuid, request: RateRequest) -> AppResult<Interaction> {
        request.validate()?;

        if self.store.find_book(request.uid).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Book {} does not exist",
                request.uid
            )));
        }

        let now = Utc::now();
        let interaction = self
            .store
            .upsert_interaction(&Interaction {
                uid: Uuid::new_v4(),
                user_uid,
                book_uid: request.uid,
                rate: Some(request.rate),
                header: request.header.unwrap_or_default(),
                content: request.content.unwrap_or_default(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let (rating, rating_count) = self.refresh_rating(request.uid).await?;
        tracing::info!(
            user_uid = %user_uid,
            book_uid = %request.uid,
            rate = request.rate,
            rating,
            rating_count,
            "Book rated"
        );

        Ok(interaction)
    }

    async fn refresh_rating(&self, book_uid: Uuid) -> AppResult<(f64, i64)> {
        let (rating, rating_count) = self.store.recompute_book_rating(book_uid).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(&CacheKey::Book(book_uid)).await {
                tracing::warn!(error = %e, book_uid = %book_uid, "Failed to invalidate book cache");
            }
        }
        Ok((rating, rating_count))
    }
}
