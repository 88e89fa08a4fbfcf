pub mod health;
pub mod observers;
pub mod operations;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(operations::router())
        .merge(observers::router())
}
