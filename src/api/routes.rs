use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers::{self, accounts, interactions, products};
use super::AppState;
use crate::middleware::{make_span_with_request_id, request_id_middleware};

/// Creates the application router with all routes and layers
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Business routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth_routes())
        .nest("/product", product_routes())
        .nest("/interaction", interaction_routes())
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(accounts::register))
        .route("/active", get(accounts::activate))
        .route("/login", post(accounts::login))
        .route("/logout", get(accounts::logout))
        .route("/infor", get(accounts::infor))
        .route("/list", get(accounts::list))
        .route("/change_password", post(accounts::change_password))
        .route("/forgot_password", post(accounts::forgot_password))
        .route("/reset_password", post(accounts::reset_password))
}

fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/item_create", post(products::item_create))
        .route("/item_info", get(products::item_info))
        .route("/popular", get(products::popular))
        .route("/authors", get(products::authors))
        .route("/publishers", get(products::publishers))
        .route("/related", get(products::related))
        .route("/categories/tree", get(products::category_tree))
        .route("/recommend", get(products::recommend))
}

fn interaction_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(interactions::list))
        .route("/get", get(interactions::get))
        .route("/rate", post(interactions::rate))
}
