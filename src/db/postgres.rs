use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::store::{CatalogStore, InteractionStore, UserStore},
    error::{AppError, AppResult},
    models::{
        AccountToken, Author, Book, BookFilter, Category, Interaction, InteractionQuery, Session,
        TokenPurpose, User,
    },
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads full books, authors and categories included, keeping the order of `uids`
    async fn hydrate(&self, uids: &[Uuid]) -> AppResult<Vec<Book>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<BookRow> = sqlx::query_as(
            "SELECT uid, sku, name, price, publisher, description, image_url, rating, \
             rating_count, created_at FROM books WHERE uid = ANY($1)",
        )
        .bind(uids)
        .fetch_all(&self.pool)
        .await?;

        let author_rows: Vec<(Uuid, Uuid, String)> = sqlx::query_as(
            "SELECT ba.book_uid, a.uid, a.name FROM book_authors ba \
             JOIN authors a ON a.uid = ba.author_uid \
             WHERE ba.book_uid = ANY($1) ORDER BY ba.position",
        )
        .bind(uids)
        .fetch_all(&self.pool)
        .await?;

        let category_rows: Vec<(Uuid, Uuid, String, Option<Uuid>, i32)> = sqlx::query_as(
            "SELECT bc.book_uid, c.uid, c.name, c.parent_uid, c.cf_index FROM book_categories bc \
             JOIN categories c ON c.uid = bc.category_uid \
             WHERE bc.book_uid = ANY($1) ORDER BY c.name",
        )
        .bind(uids)
        .fetch_all(&self.pool)
        .await?;

        let mut authors: HashMap<Uuid, Vec<Author>> = HashMap::new();
        for (book_uid, uid, name) in author_rows {
            authors.entry(book_uid).or_default().push(Author { uid, name });
        }

        let mut categories: HashMap<Uuid, Vec<Category>> = HashMap::new();
        for (book_uid, uid, name, parent_uid, cf_index) in category_rows {
            categories.entry(book_uid).or_default().push(Category {
                uid,
                name,
                parent_uid,
                cf_index,
            });
        }

        let mut books: HashMap<Uuid, Book> = rows
            .into_iter()
            .map(|row| {
                let uid = row.uid;
                let book = row.into_book(
                    authors.remove(&uid).unwrap_or_default(),
                    categories.remove(&uid).unwrap_or_default(),
                );
                (uid, book)
            })
            .collect();

        Ok(uids.iter().filter_map(|uid| books.remove(uid)).collect())
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    uid: Uuid,
    sku: String,
    name: String,
    price: f64,
    publisher: String,
    description: Option<String>,
    image_url: Option<String>,
    rating: f64,
    rating_count: i64,
    created_at: DateTime<Utc>,
}

impl BookRow {
    fn into_book(self, authors: Vec<Author>, categories: Vec<Category>) -> Book {
        Book {
            uid: self.uid,
            sku: self.sku,
            name: self.name,
            price: self.price,
            publisher: self.publisher,
            description: self.description,
            image_url: self.image_url,
            authors,
            categories,
            rating: self.rating,
            rating_count: self.rating_count,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    token: String,
    user_uid: Uuid,
    purpose: String,
    expires_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for AccountToken {
    type Error = AppError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(AccountToken {
            token: row.token,
            user_uid: row.user_uid,
            purpose: row.purpose.parse().map_err(AppError::Internal)?,
            expires_at: row.expires_at,
        })
    }
}

/// Maps unique-constraint violations to `Conflict`
fn conflict_on_unique(err: sqlx::Error, message: String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message),
        _ => AppError::Database(err),
    }
}

/// Case-insensitive substring pattern for `ILIKE`
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

const USER_COLUMNS: &str = "uid, email, name, password_hash, is_active, is_admin, created_at";
const INTERACTION_COLUMNS: &str =
    "uid, user_uid, book_uid, rate, header, content, created_at, updated_at";

#[async_trait::async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (uid, email, name, password_hash, is_active, is_admin, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.uid)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.is_admin)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "A user with this email already exists".to_string()))?;
        Ok(())
    }

    async fn find_user(&self, uid: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as(&format!("SELECT {} FROM users WHERE uid = $1", USER_COLUMNS))
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn delete_user(&self, uid: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM users WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as(&format!(
            "SELECT {} FROM users ORDER BY created_at, email",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn set_user_active(&self, uid: Uuid, active: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET is_active = $2 WHERE uid = $1")
            .bind(uid)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {}", uid)));
        }
        Ok(())
    }

    async fn set_password_hash(&self, uid: Uuid, password_hash: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE uid = $1")
            .bind(uid)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {}", uid)));
        }
        Ok(())
    }

    async fn insert_token(&self, token: &AccountToken) -> AppResult<()> {
        sqlx::query(
            "WITH pruned AS (DELETE FROM account_tokens WHERE expires_at <= now()) \
             INSERT INTO account_tokens (token, user_uid, purpose, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&token.token)
        .bind(token.user_uid)
        .bind(token.purpose.as_str())
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> AppResult<Option<AccountToken>> {
        let row: Option<TokenRow> = sqlx::query_as(
            "DELETE FROM account_tokens WHERE token = $1 AND purpose = $2 \
             RETURNING token, user_uid, purpose, expires_at",
        )
        .bind(token)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccountToken::try_from).transpose()
    }

    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        sqlx::query(
            "WITH pruned AS (DELETE FROM sessions WHERE expires_at <= now()) \
             INSERT INTO sessions (token, user_uid, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&session.token)
        .bind(session.user_uid)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> AppResult<Option<Session>> {
        let session =
            sqlx::query_as("SELECT token, user_uid, expires_at FROM sessions WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_user_sessions(&self, user_uid: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE user_uid = $1")
            .bind(user_uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for PgStore {
    async fn insert_category(&self, category: &Category) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO categories (uid, name, parent_uid, cf_index) VALUES ($1, $2, $3, $4)",
        )
        .bind(category.uid)
        .bind(&category.name)
        .bind(category.parent_uid)
        .bind(category.cf_index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        let categories =
            sqlx::query_as("SELECT uid, name, parent_uid, cf_index FROM categories ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(categories)
    }

    async fn find_categories(&self, uids: &[Uuid]) -> AppResult<Vec<Category>> {
        let categories = sqlx::query_as(
            "SELECT uid, name, parent_uid, cf_index FROM categories WHERE uid = ANY($1)",
        )
        .bind(uids)
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn find_or_create_author(&self, name: &str) -> AppResult<Author> {
        sqlx::query("INSERT INTO authors (uid, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
            .bind(Uuid::new_v4())
            .bind(name)
            .execute(&self.pool)
            .await?;

        let author = sqlx::query_as("SELECT uid, name FROM authors WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(author)
    }

    async fn list_authors(&self, search: Option<&str>) -> AppResult<Vec<Author>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT uid, name FROM authors");
        if let Some(term) = search {
            query.push(" WHERE name ILIKE ").push_bind(like_pattern(term));
        }
        query.push(" ORDER BY name");

        let authors = query
            .build_query_as::<Author>()
            .fetch_all(&self.pool)
            .await?;
        Ok(authors)
    }

    async fn list_publishers(&self) -> AppResult<Vec<String>> {
        let publishers =
            sqlx::query_scalar("SELECT DISTINCT publisher FROM books ORDER BY publisher")
                .fetch_all(&self.pool)
                .await?;
        Ok(publishers)
    }

    async fn insert_book(&self, book: &Book) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO books (uid, sku, name, price, publisher, description, image_url, \
             rating, rating_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(book.uid)
        .bind(&book.sku)
        .bind(&book.name)
        .bind(book.price)
        .bind(&book.publisher)
        .bind(&book.description)
        .bind(&book.image_url)
        .bind(book.rating)
        .bind(book.rating_count)
        .bind(book.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_on_unique(e, format!("A book with SKU '{}' already exists", book.sku))
        })?;

        for (position, author) in book.authors.iter().enumerate() {
            sqlx::query(
                "INSERT INTO book_authors (book_uid, author_uid, position) VALUES ($1, $2, $3)",
            )
            .bind(book.uid)
            .bind(author.uid)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        for category in &book.categories {
            sqlx::query("INSERT INTO book_categories (book_uid, category_uid) VALUES ($1, $2)")
                .bind(book.uid)
                .bind(category.uid)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_book(&self, uid: Uuid) -> AppResult<Option<Book>> {
        Ok(self.hydrate(&[uid]).await?.pop())
    }

    async fn find_books(&self, uids: &[Uuid]) -> AppResult<Vec<Book>> {
        self.hydrate(uids).await
    }

    async fn list_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT b.uid FROM books b WHERE TRUE");

        if let Some(term) = filter.search_term() {
            query.push(" AND b.name ILIKE ").push_bind(like_pattern(&term));
        }
        if let Some(min) = filter.price_min {
            query.push(" AND b.price >= ").push_bind(min);
        }
        if let Some(max) = filter.price_max {
            query.push(" AND b.price <= ").push_bind(max);
        }
        if let Some(author) = filter.author {
            query
                .push(" AND EXISTS (SELECT 1 FROM book_authors ba WHERE ba.book_uid = b.uid AND ba.author_uid = ")
                .push_bind(author)
                .push(")");
        }
        if let Some(category) = filter.category {
            query
                .push(" AND EXISTS (SELECT 1 FROM book_categories bc WHERE bc.book_uid = b.uid AND bc.category_uid = ")
                .push_bind(category)
                .push(")");
        }
        if let Some(publisher) = filter.publisher.as_deref() {
            query
                .push(" AND LOWER(b.publisher) = LOWER(")
                .push_bind(publisher.trim().to_string())
                .push(")");
        }
        if let Some(rating) = filter.rating {
            query.push(" AND b.rating >= ").push_bind(rating);
        }
        query.push(" ORDER BY b.rating_count DESC, b.name ASC");

        let uids: Vec<Uuid> = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(&uids).await
    }

    async fn books_in_categories(&self, categories: &[Uuid]) -> AppResult<Vec<Book>> {
        let uids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT b.uid FROM books b WHERE EXISTS (SELECT 1 FROM book_categories bc \
             WHERE bc.book_uid = b.uid AND bc.category_uid = ANY($1)) \
             ORDER BY b.rating_count DESC, b.name ASC",
        )
        .bind(categories)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(&uids).await
    }

    async fn recompute_book_rating(&self, uid: Uuid) -> AppResult<(f64, i64)> {
        let mut tx = self.pool.begin().await?;

        // the row lock queues concurrent recomputes; the aggregate below then
        // reads with a snapshot taken after the lock is held
        let locked: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM books WHERE uid = $1 FOR UPDATE")
                .bind(uid)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!("Book {}", uid)));
        }

        let (rating, rating_count): (f64, i64) = sqlx::query_as(
            "UPDATE books SET (rating, rating_count) = \
             (SELECT COALESCE(AVG(rate), 0)::DOUBLE PRECISION, COUNT(rate) \
              FROM interactions WHERE book_uid = $1) \
             WHERE uid = $1 RETURNING rating, rating_count",
        )
        .bind(uid)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((rating, rating_count))
    }
}

#[async_trait::async_trait]
impl InteractionStore for PgStore {
    async fn upsert_interaction(&self, interaction: &Interaction) -> AppResult<Interaction> {
        let stored = sqlx::query_as(&format!(
            "INSERT INTO interactions ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_uid, book_uid) DO UPDATE SET \
             rate = EXCLUDED.rate, header = EXCLUDED.header, content = EXCLUDED.content, \
             updated_at = EXCLUDED.updated_at \
             RETURNING {cols}",
            cols = INTERACTION_COLUMNS
        ))
        .bind(interaction.uid)
        .bind(interaction.user_uid)
        .bind(interaction.book_uid)
        .bind(interaction.rate)
        .bind(&interaction.header)
        .bind(&interaction.content)
        .bind(interaction.created_at)
        .bind(interaction.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn find_interaction(
        &self,
        user_uid: Uuid,
        book_uid: Uuid,
    ) -> AppResult<Option<Interaction>> {
        let interaction = sqlx::query_as(&format!(
            "SELECT {} FROM interactions WHERE user_uid = $1 AND book_uid = $2",
            INTERACTION_COLUMNS
        ))
        .bind(user_uid)
        .bind(book_uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(interaction)
    }

    async fn list_interactions(&self, query: &InteractionQuery) -> AppResult<Vec<Interaction>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM interactions WHERE TRUE",
            INTERACTION_COLUMNS
        ));
        if let Some(book_uid) = query.uid {
            builder.push(" AND book_uid = ").push_bind(book_uid);
        }
        if let Some(rate) = query.rate {
            builder.push(" AND rate >= ").push_bind(rate);
        }
        builder.push(" ORDER BY updated_at DESC, created_at DESC");

        let interactions = builder
            .build_query_as::<Interaction>()
            .fetch_all(&self.pool)
            .await?;
        Ok(interactions)
    }

    async fn user_interactions(&self, user_uid: Uuid) -> AppResult<Vec<Interaction>> {
        let interactions = sqlx::query_as(&format!(
            "SELECT {} FROM interactions WHERE user_uid = $1 \
             ORDER BY updated_at DESC, created_at DESC",
            INTERACTION_COLUMNS
        ))
        .bind(user_uid)
        .fetch_all(&self.pool)
        .await?;
        Ok(interactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("dune"), "%dune%");
        assert_eq!(like_pattern("100%_off"), "%100\\%\\_off%");
    }
}
