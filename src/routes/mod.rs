use axum::Router;

pub mod live;
pub mod ondemand;
pub mod upload;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .nest("/api", live::router().merge(ondemand::router()).merge(upload::router()))
        .nest("/ws",  ws::router())
}
