use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    db::store::{CatalogStore, InteractionStore, UserStore},
    error::{AppError, AppResult},
    models::{
        mean_rating, AccountToken, Author, Book, BookFilter, Category, Interaction,
        InteractionQuery, Session, TokenPurpose, User, ROOT_CATEGORY,
    },
};

/// In-process store used when no database is configured
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: HashMap<Uuid, User>,
    tokens: HashMap<String, AccountToken>,
    sessions: HashMap<String, Session>,
    categories: HashMap<Uuid, Category>,
    authors: HashMap<Uuid, Author>,
    books: HashMap<Uuid, Book>,
    interactions: HashMap<(Uuid, Uuid), Interaction>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store holding only the root category
    pub fn new() -> Self {
        let root = Category {
            uid: Uuid::new_v4(),
            name: ROOT_CATEGORY.to_string(),
            parent_uid: None,
            cf_index: 0,
        };
        let mut inner = MemoryStoreInner::default();
        inner.categories.insert(root.uid, root);
        Self {
            inner: RwLock::new(inner),
        }
    }
}

fn sort_books(books: &mut [Book]) {
    books.sort_by(|a, b| {
        b.rating_count
            .cmp(&a.rating_count)
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn sort_interactions(interactions: &mut [Interaction]) {
    interactions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }
        inner.users.insert(user.uid, user.clone());
        Ok(())
    }

    async fn find_user(&self, uid: Uuid) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&uid).cloned())
    }

    async fn delete_user(&self, uid: Uuid) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.users.remove(&uid);
        inner.tokens.retain(|_, t| t.user_uid != uid);
        inner.sessions.retain(|_, s| s.user_uid != uid);
        inner.interactions.retain(|(user_uid, _), _| *user_uid != uid);
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.email.cmp(&b.email))
        });
        Ok(users)
    }

    async fn set_user_active(&self, uid: Uuid, active: bool) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&uid)
            .ok_or_else(|| AppError::NotFound(format!("User {}", uid)))?;
        user.is_active = active;
        Ok(())
    }

    async fn set_password_hash(&self, uid: Uuid, password_hash: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&uid)
            .ok_or_else(|| AppError::NotFound(format!("User {}", uid)))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn insert_token(&self, token: &AccountToken) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        inner.tokens.retain(|_, t| t.expires_at > now);
        inner.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn take_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> AppResult<Option<AccountToken>> {
        let mut inner = self.inner.write().await;
        match inner.tokens.get(token) {
            Some(stored) if stored.purpose == purpose => Ok(inner.tokens.remove(token)),
            _ => Ok(None),
        }
    }

    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        inner.sessions.retain(|_, s| s.expires_at > now);
        inner.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> AppResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> AppResult<()> {
        self.inner.write().await.sessions.remove(token);
        Ok(())
    }

    async fn delete_user_sessions(&self, user_uid: Uuid) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.retain(|_, s| s.user_uid != user_uid);
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_category(&self, category: &Category) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.categories.insert(category.uid, category.clone());
        Ok(())
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut categories: Vec<Category> = inner.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn find_categories(&self, uids: &[Uuid]) -> AppResult<Vec<Category>> {
        let inner = self.inner.read().await;
        Ok(uids
            .iter()
            .filter_map(|uid| inner.categories.get(uid))
            .cloned()
            .collect())
    }

    async fn find_or_create_author(&self, name: &str) -> AppResult<Author> {
        let mut inner = self.inner.write().await;
        if let Some(author) = inner.authors.values().find(|a| a.name == name) {
            return Ok(author.clone());
        }
        let author = Author {
            uid: Uuid::new_v4(),
            name: name.to_string(),
        };
        inner.authors.insert(author.uid, author.clone());
        Ok(author)
    }

    async fn list_authors(&self, search: Option<&str>) -> AppResult<Vec<Author>> {
        let inner = self.inner.read().await;
        let term = search.map(str::to_lowercase);
        let mut authors: Vec<Author> = inner
            .authors
            .values()
            .filter(|a| {
                term.as_deref()
                    .map_or(true, |t| a.name.to_lowercase().contains(t))
            })
            .cloned()
            .collect();
        authors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(authors)
    }

    async fn list_publishers(&self) -> AppResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut publishers: Vec<String> =
            inner.books.values().map(|b| b.publisher.clone()).collect();
        publishers.sort();
        publishers.dedup();
        Ok(publishers)
    }

    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.books.values().any(|b| b.sku == book.sku) {
            return Err(AppError::Conflict(format!(
                "A book with SKU '{}' already exists",
                book.sku
            )));
        }
        inner.books.insert(book.uid, book.clone());
        Ok(())
    }

    async fn find_book(&self, uid: Uuid) -> AppResult<Option<Book>> {
        Ok(self.inner.read().await.books.get(&uid).cloned())
    }

    async fn find_books(&self, uids: &[Uuid]) -> AppResult<Vec<Book>> {
        let inner = self.inner.read().await;
        Ok(uids
            .iter()
            .filter_map(|uid| inner.books.get(uid))
            .cloned()
            .collect())
    }

    async fn list_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        let inner = self.inner.read().await;
        let mut books: Vec<Book> = inner
            .books
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        sort_books(&mut books);
        Ok(books)
    }

    async fn books_in_categories(&self, categories: &[Uuid]) -> AppResult<Vec<Book>> {
        let inner = self.inner.read().await;
        let mut books: Vec<Book> = inner
            .books
            .values()
            .filter(|b| categories.iter().any(|c| b.has_category(c)))
            .cloned()
            .collect();
        sort_books(&mut books);
        Ok(books)
    }

    async fn recompute_book_rating(&self, uid: Uuid) -> AppResult<(f64, i64)> {
        let mut inner = self.inner.write().await;
        let rates: Vec<i16> = inner
            .interactions
            .values()
            .filter(|i| i.book_uid == uid)
            .filter_map(|i| i.rate)
            .collect();
        let (rating, rating_count) = mean_rating(&rates);

        let book = inner
            .books
            .get_mut(&uid)
            .ok_or_else(|| AppError::NotFound(format!("Book {}", uid)))?;
        book.rating = rating;
        book.rating_count = rating_count;
        Ok((rating, rating_count))
    }
}

#[async_trait::async_trait]
impl InteractionStore for MemoryStore {
    async fn upsert_interaction(&self, interaction: &Interaction) -> AppResult<Interaction> {
        let mut inner = self.inner.write().await;
        let key = (interaction.user_uid, interaction.book_uid);
        let stored = match inner.interactions.get_mut(&key) {
            Some(existing) => {
                existing.rate = interaction.rate;
                existing.header = interaction.header.clone();
                existing.content = interaction.content.clone();
                existing.updated_at = interaction.updated_at;
                existing.clone()
            }
            None => {
                inner.interactions.insert(key, interaction.clone());
                interaction.clone()
            }
        };
        Ok(stored)
    }

    async fn find_interaction(
        &self,
        user_uid: Uuid,
        book_uid: Uuid,
    ) -> AppResult<Option<Interaction>> {
        let inner = self.inner.read().await;
        Ok(inner.interactions.get(&(user_uid, book_uid)).cloned())
    }

    async fn list_interactions(&self, query: &InteractionQuery) -> AppResult<Vec<Interaction>> {
        let inner = self.inner.read().await;
        let mut interactions: Vec<Interaction> = inner
            .interactions
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        sort_interactions(&mut interactions);
        Ok(interactions)
    }

    async fn user_interactions(&self, user_uid: Uuid) -> AppResult<Vec<Interaction>> {
        let inner = self.inner.read().await;
        let mut interactions: Vec<Interaction> = inner
            .interactions
            .values()
            .filter(|i| i.user_uid == user_uid)
            .cloned()
            .collect();
        sort_interactions(&mut interactions);
        Ok(interactions)
    }
}
