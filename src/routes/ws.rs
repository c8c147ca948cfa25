use axum::{Router, routing::get, response::IntoResponse, extract::{ws::{WebSocketUpgrade, WebSocket, Message}, Extension}};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use crate::{bus::{BusMessage, ControlBus}, state::HostState, error::{AppResult, AppErr}};

pub fn router() -> Router {
    Router::new().route("/control", get(ws_handler))
}

/* 小控制窗：收 STATE_UPDATE、送 CMD_* */
async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(host): Extension<HostState>,
) -> AppResult<impl IntoResponse> {
    if !host.bus.is_available() {
        return Err(AppErr::NotFound("control bus unavailable".into()));
    }
    Ok(ws.on_upgrade(move |s| control_ws(s, host.bus)))
}

/* ---------------- per companion ---------------- */
async fn control_ws(sock: WebSocket, bus: ControlBus) {
    let Some(mut rx) = bus.receiver() else { return };
    let (mut tx_sock, mut rx_sock) = sock.split();
    info!("companion control attached");

    /* 開窗先要一次狀態 */
    bus.publish(BusMessage::CmdRequestState);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(m @ BusMessage::StateUpdate { .. }) => {
                    let Ok(raw) = serde_json::to_string(&m) else { continue };
                    if tx_sock.send(Message::Text(raw)).await.is_err() { break }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "companion lagged"),
                Err(RecvError::Closed) => break,
            },
            incoming = rx_sock.next() => match incoming {
                Some(Ok(Message::Text(raw))) => match serde_json::from_str::<BusMessage>(&raw) {
                    Ok(cmd) if cmd.is_command() => bus.publish(cmd),
                    Ok(_)  => debug!("companion sent a state update, ignored"),
                    Err(e) => debug!(error = %e, "unknown companion message"),
                },
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    info!("companion control detached");
}
