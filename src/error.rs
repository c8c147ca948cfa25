use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;
pub type StoreResult<T> = Result<T, StoreErr>;

/* ------------ 與 KV 服務溝通的錯誤 ------------ */
// 注意：key 不存在不是錯誤，讀取回傳 Ok(None)
#[derive(thiserror::Error, Debug)]
pub enum StoreErr {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store replied {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store command failed: {0}")]
    Command(String),

    #[error("undecodable payload: {0}")]
    Decode(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 要給操作者看的擷取 / 權限訊息
    #[error("{0}")]
    Capture(String),

    #[error("Config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store: {0}")]
    Store(#[from] StoreErr),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, body) = match self {
            AppErr::Bad(msg) | AppErr::Capture(msg) => (StatusCode::BAD_REQUEST, msg),
            AppErr::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppErr::Store(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (code, body).into_response()
    }
}

/* ------------ 擷取來源開啟失敗 ------------ */
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureErr {
    /// 使用者在選擇器按了取消：不顯示任何錯誤
    #[error("capture cancelled")]
    Cancelled,

    #[error("{0}")]
    Denied(String),

    #[error("No audio was shared. Share a source that carries an audio track.")]
    NoAudio,
}

/* ------------ 單一 chunk / 檔案播放失敗 ------------ */
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackErr {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("play() rejected: {0}")]
    Rejected(String),
}

/* ── 小助手：把任何 error 轉成 Bad ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }
