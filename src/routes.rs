// routes.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

pub fn create_routes(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(handlers::home))
        .route("/polls/", get(handlers::index))
        .route("/polls/{question_id}/", get(handlers::detail))
        .route(
            "/polls/{question_id}/vote/",
            get(handlers::vote).post(handlers::vote),
        )
        .route("/polls/{question_id}/results/", get(handlers::results))
        .route(
            "/accounts/login/",
            get(handlers::login_page).post(handlers::login),
        )
        .route("/accounts/logout/", post(handlers::logout))
        .route("/accounts/signup/", post(handlers::signup))
        .route("/admin/questions/", post(handlers::create_question))
        .route(
            "/admin/questions/{question_id}/choices/",
            post(handlers::add_choice),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
