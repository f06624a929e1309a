//! HTTP relay that forwards send-email requests to one of two SMTP providers,
//! keeping a per-day count of primary-provider sends in a JSON file.

use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};

pub mod config;
pub mod counter;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod router;

pub use handler::AppState;

/// Builds the relay's routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/send", post(handler::send_handler))
        .route("/health", get(|| async { (StatusCode::OK, "OK") }))
        .with_state(state)
}
