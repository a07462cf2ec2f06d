use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::{
        extract::{Json, Query},
        AppState,
    },
    error::AppResult,
    middleware::AuthUser,
    models::{Author, Book, BookFilter, CategoryTree, Envelope, NewBook, RelatedQuery},
    services::{PageParams, PageResult, Recommendations},
};

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    pub id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorQuery {
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn item_create(
    State(state): State<AppState>,
    Json(new_book): Json<NewBook>,
) -> AppResult<(StatusCode, Envelope<Book>)> {
    let book = state.catalog.create_book(new_book).await?;
    Ok((StatusCode::CREATED, Envelope::ok(book)))
}

pub async fn item_info(
    State(state): State<AppState>,
    Query(query): Query<ItemQuery>,
) -> AppResult<Envelope<Book>> {
    let book = state.catalog.book(query.id).await?;
    Ok(Envelope::ok(book))
}

/// Filtered catalog listing, most rated first
pub async fn popular(
    State(state): State<AppState>,
    Query(filter): Query<BookFilter>,
    Query(page): Query<PageParams>,
) -> AppResult<Envelope<PageResult<Book>>> {
    let books = state.catalog.popular(&filter).await?;
    tracing::debug!(matched = books.len(), "Popular books listed");
    Ok(Envelope::ok(state.paginator.paginate_params(books, &page)?))
}

pub async fn authors(
    State(state): State<AppState>,
    Query(query): Query<AuthorQuery>,
    Query(page): Query<PageParams>,
) -> AppResult<Envelope<PageResult<Author>>> {
    let authors = state.catalog.authors(query.search.as_deref()).await?;
    Ok(Envelope::ok(state.paginator.paginate_params(authors, &page)?))
}

pub async fn publishers(
    State(state): State<AppState>,
    Query(page): Query<PageParams>,
) -> AppResult<Envelope<PageResult<String>>> {
    let publishers = state.catalog.publishers().await?;
    Ok(Envelope::ok(state.paginator.paginate_params(publishers, &page)?))
}

pub async fn related(
    State(state): State<AppState>,
    Query(query): Query<RelatedQuery>,
    Query(page): Query<PageParams>,
) -> AppResult<Envelope<PageResult<Book>>> {
    let books = state.catalog.related(&query).await?;
    Ok(Envelope::ok(state.paginator.paginate_params(books, &page)?))
}

pub async fn category_tree(State(state): State<AppState>) -> AppResult<Envelope<CategoryTree>> {
    let tree = state.catalog.category_tree().await?;
    Ok(Envelope::ok(tree))
}

pub async fn recommend(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Envelope<Recommendations>> {
    let recommendations = state.recommendations.recommend(auth.user.uid).await?;
    Ok(Envelope::ok(recommendations))
}
