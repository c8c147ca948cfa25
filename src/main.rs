use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use axum::{extract::DefaultBodyLimit, Extension, Router};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use echocast::{
    bus::ControlBus,
    config::Config,
    gate::AudioGate,
    live::{wav::PcmFormat, LiveBroadcaster, LivePlayer, PcmFileProvider},
    ondemand::{OnDemandReader, OnDemandWriter},
    output::{DirSink, VirtualMedia},
    room::{RoomDirectory, MEMBERSHIP_POLL},
    routes,
    state::HostState,
    store::{ChunkStore, RestStore},
    telemetry,
    utils::{
        clock::{Clock, SystemClock},
        sched::{Scheduler, TokioScheduler},
    },
};

#[derive(Parser)]
#[command(name = "echocast", version, about = "Listen together over a shared key-value store")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Broadcast into a room you created and serve the local control surface.
    Host {
        #[arg(long)]
        room: String,
        /// Creator id printed by `room create`.
        #[arg(long = "as")]
        client_id: String,
        /// Raw s16le PCM file, `-` for stdin.
        #[arg(long)]
        pcm: Option<String>,
        #[arg(long, default_value_t = 48_000)]
        rate: u32,
        #[arg(long, default_value_t = 2)]
        channels: u16,
        /// Go live right away instead of waiting for POST /api/live/start.
        #[arg(long)]
        live: bool,
    },
    /// Follow a room: live chunks and the shared file land in `--out`.
    Listen {
        #[arg(long)]
        room: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        muted: bool,
        /// Participant id printed by `room join`; leave once removed from the room.
        #[arg(long = "as")]
        client_id: Option<String>,
    },
    #[command(subcommand)]
    Room(RoomCmd),
}

#[derive(Subcommand)]
enum RoomCmd {
    Create {
        #[arg(long)]
        name: Option<String>,
    },
    Join {
        #[arg(long)]
        room: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "as")]
        client_id: Option<String>,
    },
    List {
        #[arg(long)]
        room: String,
    },
    Leave {
        #[arg(long)]
        room: String,
        #[arg(long = "as")]
        client_id: String,
    },
    Close {
        #[arg(long)]
        room: String,
        #[arg(long = "as")]
        client_id: String,
    },
}

struct Deps {
    cfg: Config,
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    sched: Arc<dyn Scheduler>,
}

impl Deps {
    fn load() -> anyhow::Result<Self> {
        let cfg = Config::from_env()?;
        let store: Arc<dyn ChunkStore> = Arc::new(RestStore::new(&cfg.store_url, &cfg.store_token));
        Ok(Self { cfg, store, clock: Arc::new(SystemClock), sched: Arc::new(TokioScheduler) })
    }

    fn directory(&self, client_id: Option<String>) -> RoomDirectory {
        let dir = RoomDirectory::new(self.store.clone(), self.clock.clone(), &self.cfg.public_url);
        match client_id {
            Some(id) => dir.with_client_id(id),
            None => dir,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let deps = Deps::load()?;

    match cli.cmd {
        Cmd::Host { room, client_id, pcm, rate, channels, live } => {
            telemetry::init("host");
            host(deps, room, client_id, pcm, PcmFormat { sample_rate: rate, channels }, live).await
        }
        Cmd::Listen { room, out, muted, client_id } => {
            telemetry::init("listen");
            listen(deps, room, out, muted, client_id).await
        }
        Cmd::Room(cmd) => {
            telemetry::init("room");
            room_cmd(deps, cmd).await
        }
    }
}

async fn host(deps: Deps, room: String, client_id: String, pcm: Option<String>, fmt: PcmFormat, go_live: bool) -> anyhow::Result<()> {
    let dir = deps.directory(Some(client_id));
    if !dir.is_creator(&room).await? {
        bail!("room {room} does not exist or was not created by {}", dir.client_id());
    }

    let bus = ControlBus::new();
    let live = LiveBroadcaster::new(deps.store.clone(), deps.clock.clone(), deps.sched.clone(), bus.clone(), deps.cfg.live.clone());
    let _commands = live.serve_commands();

    let source = pcm.filter(|p| p != "-").map(PathBuf::from);
    let host = HostState {
        room: room.clone(),
        live: live.clone(),
        capture: Arc::new(PcmFileProvider::new(source, fmt)),
        writer: Arc::new(Mutex::new(OnDemandWriter::new(deps.store.clone(), deps.clock.clone(), room.clone(), deps.cfg.ondemand.clone()))),
        bus,
    };
    if go_live {
        host.live.start(&room, host.capture.as_ref()).await?;
    }

    let body_limit = deps.cfg.body_limit;
    let app = Router::new()
        .merge(routes::router())
        .layer(Extension(host))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit));

    let listener = tokio::net::TcpListener::bind(deps.cfg.bind_addr)
        .await
        .with_context(|| format!("bind {}", deps.cfg.bind_addr))?;
    info!(addr = %deps.cfg.bind_addr, room, "control surface up");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    live.stop().await;
    Ok(())
}

async fn listen(deps: Deps, room: String, out: PathBuf, muted: bool, client_id: Option<String>) -> anyhow::Result<()> {
    let membership = match client_id {
        Some(id) => {
            let dir = Arc::new(deps.directory(Some(id)));
            if !dir.is_member(&room).await? {
                bail!("{} is not a participant of room {room}", dir.client_id());
            }
            let (watch, removed) = dir.watch_membership(&room, deps.sched.as_ref(), MEMBERSHIP_POLL);
            Some((dir, watch, removed))
        }
        None => None,
    };

    tokio::fs::create_dir_all(&out).await.with_context(|| format!("create {}", out.display()))?;
    let gate = AudioGate::new(!muted);

    let (sink, events) = DirSink::new(&out);
    let player = LivePlayer::new(deps.store.clone(), deps.sched.clone(), gate.clone(), deps.cfg.player.clone(), Box::new(sink));
    let pump = player.spawn_event_pump(events);

    let media = VirtualMedia::new(Some(&out));
    let reader = OnDemandReader::new(
        deps.store.clone(),
        deps.clock.clone(),
        deps.sched.clone(),
        gate,
        deps.cfg.ondemand.clone(),
        Box::new(media),
    );

    player.start(&room).await;
    reader.start(&room).await;
    info!(room, out = %out.display(), "listening, ctrl-c to leave");

    let removed = async {
        match membership {
            Some((_dir, _watch, removed)) => {
                if removed.await.is_ok() {
                    warn!(room, "You have been disconnected from the room.");
                }
            }
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = removed => {}
    }
    player.stop().await;
    reader.stop().await;
    pump.abort();
    Ok(())
}

async fn room_cmd(deps: Deps, cmd: RoomCmd) -> anyhow::Result<()> {
    match cmd {
        RoomCmd::Create { name } => {
            let ticket = deps.directory(None).create_room(name.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }
        RoomCmd::Join { room, code, name, client_id } => {
            let ticket = deps.directory(client_id).join_room(&room, &code, name.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }
        RoomCmd::List { room } => {
            for p in deps.directory(None).participants(&room).await? {
                println!("{}\t{}", p.id, p.name);
            }
        }
        RoomCmd::Leave { room, client_id } => {
            deps.directory(None).remove_participant(&room, &client_id).await?;
        }
        RoomCmd::Close { room, client_id } => {
            deps.directory(Some(client_id)).close_room(&room).await?;
        }
    }
    Ok(())
}
