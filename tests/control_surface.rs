mod common;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Extension, Router};
use common::{Script, ScriptedProvider};
use echocast::{
    bus::ControlBus,
    keys,
    live::{LiveBroadcaster, LiveConfig},
    ondemand::{OnDemandConfig, OnDemandState, OnDemandWriter, PlayStatus},
    routes,
    state::HostState,
    store::{ChunkStoreExt, MemoryStore},
    utils::{clock::ManualClock, sched::ManualScheduler},
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

async fn serve(store: &MemoryStore) -> (SocketAddr, HostState) {
    let clock = Arc::new(ManualClock::at(1_000));
    let bus = ControlBus::new();
    let live = LiveBroadcaster::new(
        Arc::new(store.clone()),
        clock.clone(),
        Arc::new(ManualScheduler::new()),
        bus.clone(),
        LiveConfig::default(),
    );
    let host = HostState {
        room: "r1".into(),
        live,
        capture: Arc::new(ScriptedProvider(Script::Endless)),
        writer: Arc::new(Mutex::new(OnDemandWriter::new(
            Arc::new(store.clone()),
            clock,
            "r1",
            OnDemandConfig::default(),
        ))),
        bus,
    };

    let app = Router::new().merge(routes::router()).layer(Extension(host.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app.into_make_service()).await.ok() });
    (addr, host)
}

#[tokio::test]
async fn live_controls_over_http() {
    let store = MemoryStore::new();
    let (addr, host) = serve(&store).await;
    let http = reqwest::Client::new();
    let url = |p: &str| format!("http://{addr}/api{p}");

    let started: Value = http.post(url("/live/start")).send().await.unwrap().json().await.unwrap();
    assert_eq!(started["started"], json!(true));
    assert_eq!(started["status"]["streaming"], json!(true));

    let again = http.post(url("/live/start")).send().await.unwrap();
    assert_eq!(again.status(), 400);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let paused: Value = http.post(url("/live/pause")).send().await.unwrap().json().await.unwrap();
    assert_eq!(paused["paused"], json!(true));

    let stopped: Value = http.post(url("/live/stop")).send().await.unwrap().json().await.unwrap();
    assert_eq!(stopped["streaming"], json!(false));
    assert!(!host.live.status().await.streaming);
    assert!(store.contains(&keys::live_chunk("r1", 0)).await);
}

#[tokio::test]
async fn upload_then_transport_controls() {
    let store = MemoryStore::new();
    let (addr, _host) = serve(&store).await;
    let http = reqwest::Client::new();
    let url = |p: &str| format!("http://{addr}/api{p}");

    // 還沒分享檔案
    let early = http.post(url("/ondemand/play")).json(&json!({"position": 0.0})).send().await.unwrap();
    assert_eq!(early.status(), 400);

    let body = "--XBOUNDARY\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"song.mp3\"\r\n\
        Content-Type: audio/mpeg\r\n\r\n\
        ID3fakeaudio\r\n\
        --XBOUNDARY--\r\n";
    let up: Value = http
        .post(url("/upload"))
        .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(up["fileName"], json!("song.mp3"));
    assert_eq!(up["fileVersion"], json!(1));

    http.post(url("/ondemand/play")).json(&json!({"position": 3.5})).send().await.unwrap();
    let seeked: Value = http.post(url("/ondemand/seek")).json(&json!({"position": 9.0})).send().await.unwrap().json().await.unwrap();
    assert_eq!(seeked["status"], json!("playing"));
    assert_eq!(seeked["position"], json!(9.0));

    let shared: Option<OnDemandState> = store.get_json(&keys::audio_state("r1")).await.unwrap();
    let shared = shared.unwrap();
    assert_eq!(shared.status, PlayStatus::Playing);
    assert_eq!(shared.file_name, "song.mp3");
}
