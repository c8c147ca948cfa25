use axum::{routing::{get, post}, Router, Extension, Json};
use serde_json::{json, Value};
use crate::{state::HostState, error::AppResult, live::LiveStatus};

pub fn router() -> Router {
    Router::new()
        .route("/live",        get(status))
        .route("/live/start",  post(start))
        .route("/live/pause",  post(pause))
        .route("/live/resume", post(resume))
        .route("/live/stop",   post(stop))
}

async fn status(Extension(host): Extension<HostState>) -> Json<LiveStatus> {
    Json(host.live.status().await)
}

/* 擷取失敗 ⇒ 400 + 可讀訊息；使用者取消 ⇒ started:false */
async fn start(Extension(host): Extension<HostState>) -> AppResult<Json<Value>> {
    let started = host.live.start(&host.room, host.capture.as_ref()).await?;
    Ok(Json(json!({"started": started, "status": host.live.status().await})))
}

async fn pause(Extension(host): Extension<HostState>) -> Json<LiveStatus> {
    host.live.pause().await;
    Json(host.live.status().await)
}

async fn resume(Extension(host): Extension<HostState>) -> Json<LiveStatus> {
    host.live.resume().await;
    Json(host.live.status().await)
}

async fn stop(Extension(host): Extension<HostState>) -> Json<LiveStatus> {
    host.live.stop().await;
    Json(host.live.status().await)
}
