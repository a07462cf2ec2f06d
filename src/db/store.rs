//! Persistence seams used by the services.
//!
//! Each trait covers one aggregate family. [`MemoryStore`](super::MemoryStore)
//! implements all of them in process, [`PgStore`](super::PgStore) on Postgres.

use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        AccountToken, Author, Book, BookFilter, Category, Interaction, InteractionQuery, Session,
        TokenPurpose, User,
    },
};

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the email is already registered
    async fn insert_user(&self, user: &User) -> AppResult<()>;

    async fn find_user(&self, uid: Uuid) -> AppResult<Option<User>>;

    /// Removes the user with its tokens, sessions and interactions
    async fn delete_user(&self, uid: Uuid) -> AppResult<()>;

    /// `email` must already be lower-cased
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    /// All users, oldest first
    async fn list_users(&self) -> AppResult<Vec<User>>;

    async fn set_user_active(&self, uid: Uuid, active: bool) -> AppResult<()>;

    async fn set_password_hash(&self, uid: Uuid, password_hash: &str) -> AppResult<()>;

    /// Stores `token`, dropping any that have expired
    async fn insert_token(&self, token: &AccountToken) -> AppResult<()>;

    /// Removes and returns the token if it exists with the given purpose.
    /// Expiry is checked by the caller.
    async fn take_token(&self, token: &str, purpose: TokenPurpose)
        -> AppResult<Option<AccountToken>>;

    /// Stores `session`, dropping any that have expired
    async fn insert_session(&self, session: &Session) -> AppResult<()>;

    async fn find_session(&self, token: &str) -> AppResult<Option<Session>>;

    async fn delete_session(&self, token: &str) -> AppResult<()>;

    async fn delete_user_sessions(&self, user_uid: Uuid) -> AppResult<()>;
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_category(&self, category: &Category) -> AppResult<()>;

    async fn list_categories(&self) -> AppResult<Vec<Category>>;

    /// Categories among `uids` that exist, in no particular order
    async fn find_categories(&self, uids: &[Uuid]) -> AppResult<Vec<Category>>;

    /// Returns the author with exactly this name, creating it if needed
    async fn find_or_create_author(&self, name: &str) -> AppResult<Author>;

    /// Authors ordered by name, optionally restricted to names containing `search`
    async fn list_authors(&self, search: Option<&str>) -> AppResult<Vec<Author>>;

    /// Distinct publisher names, ordered
    async fn list_publishers(&self) -> AppResult<Vec<String>>;

    /// Fails with `Conflict` when the SKU is taken
    async fn insert_book(&self, book: &Book) -> AppResult<()>;

    async fn find_book(&self, uid: Uuid) -> AppResult<Option<Book>>;

    /// Books among `uids` that exist, in no particular order
    async fn find_books(&self, uids: &[Uuid]) -> AppResult<Vec<Book>>;

    /// Books matching `filter`, most rated first, then by name
    async fn list_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>>;

    /// Books filed under any of `categories`, most rated first, then by name
    async fn books_in_categories(&self, categories: &[Uuid]) -> AppResult<Vec<Book>>;

    /// Sets the book's rating to the mean of its rated interactions and
    /// returns `(rating, rating_count)`. Concurrent calls for the same book
    /// are serialized so the last one sees every committed rate.
    async fn recompute_book_rating(&self, uid: Uuid) -> AppResult<(f64, i64)>;
}

#[async_trait::async_trait]
pub trait InteractionStore: Send + Sync {
    /// Inserts the interaction or, when the user already interacted with the
    /// book, overwrites its rate, header, content and `updated_at`.
    /// Returns the stored row.
    async fn upsert_interaction(&self, interaction: &Interaction) -> AppResult<Interaction>;

    async fn find_interaction(
        &self,
        user_uid: Uuid,
        book_uid: Uuid,
    ) -> AppResult<Option<Interaction>>;

    /// Interactions matching `query`, most recently updated first
    async fn list_interactions(&self, query: &InteractionQuery) -> AppResult<Vec<Interaction>>;

    /// Interactions of one user, most recently updated first
    async fn user_interactions(&self, user_uid: Uuid) -> AppResult<Vec<Interaction>>;
}

/// Everything the application needs from storage
pub trait Store: UserStore + CatalogStore + InteractionStore {}

impl<T: UserStore + CatalogStore + InteractionStore> Store for T {}
