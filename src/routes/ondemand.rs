use axum::{routing::{get, post}, Router, Extension, Json};
use serde::Deserialize;
use crate::{state::HostState, error::AppResult, ondemand::OnDemandState};

#[derive(Deserialize)] struct At { position: f64 }

pub fn router() -> Router {
    Router::new()
        .route("/ondemand",       get(current))
        .route("/ondemand/play",  post(play))
        .route("/ondemand/pause", post(pause))
        .route("/ondemand/seek",  post(seek))
}

async fn current(Extension(host): Extension<HostState>) -> Json<Option<OnDemandState>> {
    Json(host.writer.lock().await.current().cloned())
}

async fn play(Extension(host): Extension<HostState>, Json(at): Json<At>) -> AppResult<Json<Option<OnDemandState>>> {
    let mut w = host.writer.lock().await;
    w.play(at.position).await?;
    Ok(Json(w.current().cloned()))
}

async fn pause(Extension(host): Extension<HostState>, Json(at): Json<At>) -> AppResult<Json<Option<OnDemandState>>> {
    let mut w = host.writer.lock().await;
    w.pause(at.position).await?;
    Ok(Json(w.current().cloned()))
}

async fn seek(Extension(host): Extension<HostState>, Json(at): Json<At>) -> AppResult<Json<Option<OnDemandState>>> {
    let mut w = host.writer.lock().await;
    w.seek(at.position).await?;
    Ok(Json(w.current().cloned()))
}
