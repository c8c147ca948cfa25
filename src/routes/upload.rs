use axum::{routing::post, Router, Extension, Json, extract::multipart::Multipart};
use bytes::BytesMut;
use serde_json::json;
use crate::{
    state::HostState,
    error::{AppResult, bad},
    ondemand::MediaPayload,
};

pub fn router() -> Router {
    Router::new().route("/upload", post(upload_file))
}

/* 收到檔案 ⇒ 切塊寫進 store，版本 +1，暫停在 0 */
pub async fn upload_file(
    Extension(host): Extension<HostState>,
    mut mp: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let Some(mut field) = mp.next_field().await.map_err(bad)? else {
        return Err(bad("no file"));
    };

    let name = field.file_name().unwrap_or("shared").to_string();
    let mime = match field.content_type() {
        Some(m) => m.to_string(),
        None    => mime_guess::from_path(&name).first_or_octet_stream().to_string(),
    };
    if !(mime.starts_with("audio/") || mime.starts_with("video/")) {
        return Err(bad(format!("not an audio/video file: {mime}")));
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(bad)? {
        buf.extend_from_slice(&chunk);
    }
    if buf.is_empty() {
        return Err(bad("empty file"));
    }

    let payload = MediaPayload::new(mime.clone(), buf.freeze());
    let mut w = host.writer.lock().await;
    let meta = w.share(&name, &payload).await?;

    Ok(Json(json!({
        "fileName": name, "mime": mime,
        "fileVersion": w.current().map(|s| s.file_version),
        "totalChunks": meta.total_chunks,
    })))
}
