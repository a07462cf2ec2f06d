use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    cached,
    db::{Cache, CacheKey, Store},
    error::{AppError, AppResult},
    models::{Author, Book, BookFilter, CategoryTree, NewBook, RelatedQuery},
};

/// Book catalog: creation, lookups and the browse listings
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    cache: Option<Cache>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, cache: Option<Cache>) -> Self {
        Self { store, cache }
    }

    /// Adds a book, creating unknown authors by name
    pub async fn create_book(&self, new_book: NewBook) -> AppResult<Book> {
        new_book.validate()?;

        let mut category_uids = new_book.categories.clone();
        category_uids.sort();
        category_uids.dedup();
        let categories = self.store.find_categories(&category_uids).await?;
        if categories.len() != category_uids.len() {
            let found: HashSet<Uuid> = categories.iter().map(|c| c.uid).collect();
            let missing: Vec<String> = category_uids
                .iter()
                .filter(|uid| !found.contains(uid))
                .map(Uuid::to_string)
                .collect();
            return Err(AppError::InvalidArgument(format!(
                "Unknown categories: {}",
                missing.join(", ")
            )));
        }

        let mut authors: Vec<Author> = Vec::new();
        for name in new_book.authors.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if authors.iter().any(|a| a.name == name) {
                continue;
            }
            authors.push(self.store.find_or_create_author(name).await?);
        }

        let book = Book {
            uid: Uuid::new_v4(),
            sku: new_book.sku.trim().to_string(),
            name: new_book.name.trim().to_string(),
            price: new_book.price,
            publisher: new_book.publisher.trim().to_string(),
            description: new_book.description,
            image_url: new_book.image_url,
            authors,
            categories,
            rating: 0.0,
            rating_count: 0,
            created_at: Utc::now(),
        };
        self.store.insert_book(&book).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(&CacheKey::Publishers).await {
                tracing::warn!(error = %e, "Failed to invalidate publisher cache");
            }
        }

        tracing::info!(book_uid = %book.uid, sku = %book.sku, "Book created");
        Ok(book)
    }

    pub async fn book(&self, uid: Uuid) -> AppResult<Book> {
        match &self.cache {
            Some(cache) => Ok(cached!(cache, CacheKey::Book(uid), self.find_book(uid))),
            None => self.find_book(uid).await,
        }
    }

    async fn find_book(&self, uid: Uuid) -> AppResult<Book> {
        self.store
            .find_book(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} does not exist", uid)))
    }

    /// Books matching `filter`, most rated first
    pub async fn popular(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        self.store.list_books(filter).await
    }

    pub async fn authors(&self, search: Option<&str>) -> AppResult<Vec<Author>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        self.store.list_authors(search).await
    }

    pub async fn publishers(&self) -> AppResult<Vec<String>> {
        match &self.cache {
            Some(cache) => Ok(cached!(cache, CacheKey::Publishers, self.store.list_publishers())),
            None => self.store.list_publishers().await,
        }
    }

    /// Books sharing authors or categories with `query.uid`, closest first.
    /// Without a uid, every book whose name matches `query.search`.
    pub async fn related(&self, query: &RelatedQuery) -> AppResult<Vec<Book>> {
        let filter = BookFilter {
            search: query.search.clone(),
            ..BookFilter::default()
        };
        let Some(uid) = query.uid else {
            return self.store.list_books(&filter).await;
        };

        let book = self.book(uid).await?;
        let candidates = self.store.list_books(&filter).await?;
        Ok(rank_related(&book, candidates))
    }

    pub async fn category_tree(&self) -> AppResult<CategoryTree> {
        match &self.cache {
            Some(cache) => Ok(cached!(cache, CacheKey::CategoryTree, self.build_category_tree())),
            None => self.build_category_tree().await,
        }
    }

    async fn build_category_tree(&self) -> AppResult<CategoryTree> {
        let categories = self.store.list_categories().await?;
        CategoryTree::build(&categories)
    }
}

/// Orders `candidates` by how much they share with `book`.
///
/// A shared author weighs twice a shared category. Candidates sharing nothing
/// and `book` itself are dropped.
pub fn rank_related(book: &Book, candidates: Vec<Book>) -> Vec<Book> {
    let mut scored: Vec<(u32, Book)> = candidates
        .into_iter()
        .filter(|c| c.uid != book.uid)
        .filter_map(|candidate| {
            let shared_authors = candidate
                .authors
                .iter()
                .filter(|a| book.has_author(&a.uid))
                .count() as u32;
            let shared_categories = candidate
                .categories
                .iter()
                .filter(|c| book.has_category(&c.uid))
                .count() as u32;
            let score = shared_authors * 2 + shared_categories;
            (score > 0).then_some((score, candidate))
        })
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .cmp(score_a)
            .then_with(|| b.rating_count.cmp(&a.rating_count))
            .then_with(|| a.name.cmp(&b.name))
    });
    scored.into_iter().map(|(_, book)| book).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CatalogStore, MemoryStore};
    use crate::models::{Category, ROOT_CATEGORY};

    fn new_book(name: &str, sku: &str, authors: &[&str], categories: &[Uuid]) -> NewBook {
        NewBook {
            name: name.to_string(),
            sku: sku.to_string(),
            price: 9.99,
            publisher: "Vintage".to_string(),
            description: None,
            image_url: None,
            authors: authors.iter().map(|a| a.to_string()).collect(),
            categories: categories.to_vec(),
        }
    }

    async fn root_uid(store: &MemoryStore) -> Uuid {
        store
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.name == ROOT_CATEGORY)
            .unwrap()
            .uid
    }

    async fn add_category(store: &MemoryStore, name: &str, parent: Uuid) -> Uuid {
        let category = Category {
            uid: Uuid::new_v4(),
            name: name.to_string(),
            parent_uid: Some(parent),
            cf_index: 1,
        };
        store.insert_category(&category).await.unwrap();
        category.uid
    }

    #[tokio::test]
    async fn test_create_book_reuses_authors() {
        let store = Arc::new(MemoryStore::new());
        let catalog = CatalogService::new(store.clone(), None);

        let first = catalog
            .create_book(new_book("Dune", "D1", &["Frank Herbert", " Frank Herbert "], &[]))
            .await
            .unwrap();
        let second = catalog
            .create_book(new_book("Dune Messiah", "D2", &["Frank Herbert"], &[]))
            .await
            .unwrap();

        assert_eq!(first.authors.len(), 1);
        assert_eq!(first.authors[0].uid, second.authors[0].uid);
        assert_eq!(catalog.authors(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_book_rejects_unknown_category() {
        let catalog = CatalogService::new(Arc::new(MemoryStore::new()), None);
        let err = catalog
            .create_book(new_book("Dune", "D1", &[], &[Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_related_ranks_by_overlap() {
        let store = Arc::new(MemoryStore::new());
        let root = root_uid(&store).await;
        let scifi = add_category(&store, "Sci-Fi", root).await;
        let drama = add_category(&store, "Drama", root).await;
        let catalog = CatalogService::new(store.clone(), None);

        let dune = catalog
            .create_book(new_book("Dune", "D1", &["Frank Herbert"], &[scifi]))
            .await
            .unwrap();
        catalog
            .create_book(new_book("Foundation", "F1", &["Isaac Asimov"], &[scifi]))
            .await
            .unwrap();
        catalog
            .create_book(new_book("Dune Messiah", "D2", &["Frank Herbert"], &[scifi]))
            .await
            .unwrap();
        catalog
            .create_book(new_book("Emma", "E1", &["Jane Austen"], &[drama]))
            .await
            .unwrap();

        let related = catalog
            .related(&RelatedQuery {
                uid: Some(dune.uid),
                search: None,
            })
            .await
            .unwrap();
        let names: Vec<&str> = related.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Dune Messiah", "Foundation"]);
    }

    #[tokio::test]
    async fn test_related_unknown_book() {
        let catalog = CatalogService::new(Arc::new(MemoryStore::new()), None);
        let err = catalog
            .related(&RelatedQuery {
                uid: Some(Uuid::new_v4()),
                search: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publishers_are_distinct() {
        let catalog = CatalogService::new(Arc::new(MemoryStore::new()), None);
        catalog
            .create_book(new_book("Dune", "D1", &[], &[]))
            .await
            .unwrap();
        catalog
            .create_book(new_book("Emma", "E1", &[], &[]))
            .await
            .unwrap();
        assert_eq!(catalog.publishers().await.unwrap(), vec!["Vintage"]);
    }

    #[tokio::test]
    async fn test_category_tree_from_store() {
        let store = Arc::new(MemoryStore::new());
        let root = root_uid(&store).await;
        let fiction = add_category(&store, "Fiction", root).await;
        add_category(&store, "Fantasy", fiction).await;
        let catalog = CatalogService::new(store, None);

        let tree = catalog.category_tree().await.unwrap();
        assert_eq!(tree.root.uid, root);
        assert_eq!(tree.root.children[0]["Fiction"].children.len(), 1);
    }
}
