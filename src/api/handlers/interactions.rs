use axum::extract::State;

use crate::{
    api::{
        extract::{Json, Query},
        AppState,
    },
    error::AppResult,
    middleware::AuthUser,
    models::{Envelope, Interaction, InteractionLookup, InteractionQuery, RateRequest},
    services::{PageParams, PageResult},
};

/// Interactions on a book, newest first
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<InteractionQuery>,
    Query(page): Query<PageParams>,
) -> AppResult<Envelope<PageResult<Interaction>>> {
    let interactions = state.interactions.list(&query).await?;
    Ok(Envelope::ok(state.paginator.paginate_params(interactions, &page)?))
}

/// The caller's own interaction with a book
pub async fn get(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(lookup): Query<InteractionLookup>,
) -> AppResult<Envelope<Interaction>> {
    let interaction = state.interactions.get(auth.user.uid, lookup.uid).await?;
    Ok(Envelope::ok(interaction))
}

pub async fn rate(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<RateRequest>,
) -> AppResult<Envelope<Interaction>> {
    let interaction = state.interactions.rate(auth.user.uid, request).await?;
    Ok(Envelope::ok(interaction))
}
