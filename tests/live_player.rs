mod common;

use std::{sync::Arc, time::Duration};

use common::{chunk_reads, publish, set_live, RecordingSink};
use echocast::{
    gate::AudioGate,
    keys,
    live::{LivePlayer, LiveState, Phase, PlayerConfig, PollOutcome},
    store::MemoryStore,
    utils::sched::ManualScheduler,
};

struct Rig {
    store: MemoryStore,
    sched: ManualScheduler,
    sink: RecordingSink,
    gate: AudioGate,
    player: Arc<LivePlayer>,
}

fn rig_with(store: MemoryStore) -> Rig {
    let sched = ManualScheduler::new();
    let sink = RecordingSink::default();
    let gate = AudioGate::new(true);
    let player = LivePlayer::new(
        Arc::new(store.clone()),
        Arc::new(sched.clone()),
        gate.clone(),
        PlayerConfig::default(),
        Box::new(sink.clone()),
    );
    Rig { store, sched, sink, gate, player }
}

fn rig() -> Rig {
    rig_with(MemoryStore::new())
}

fn inactive(seq: i64) -> LiveState {
    LiveState { active: false, paused: false, seq, mime_type: "audio/webm".into(), ts: 0 }
}

#[tokio::test]
async fn waits_until_a_stream_shows_up() {
    let r = rig();
    assert_eq!(r.player.start("r1").await, PollOutcome::Waiting);
    assert_eq!(r.sched.intervals(), vec![Duration::from_millis(600)]);

    publish(&r.store, "r1", 0).await;
    r.sched.fire().await;
    let snap = r.player.snapshot().await;
    assert_eq!(snap.phase, Phase::Streaming);
    assert_eq!(snap.playing, Some(0));
    assert_eq!(snap.last_seq, 0);
}

/* 廣播端 500ms 一段、聽眾 600ms 一輪，每段播 500ms */
#[tokio::test]
async fn keeps_up_with_a_steady_broadcaster() {
    let r = rig();
    let mut started_at: Option<(u64, u64)> = None;
    let mut skipped = false;

    for t in (0..=3_000u64).step_by(100) {
        if t % 500 == 0 && t <= 2_000 {
            publish(&r.store, "r1", t / 500).await;
        }
        if let Some((seq, at)) = started_at {
            if t >= at + 500 {
                r.player.chunk_ended(seq).await;
                started_at = None;
            }
        }
        if t % 600 == 0 {
            let out = if t == 0 { r.player.start("r1").await } else { r.player.poll().await };
            if let PollOutcome::Fetched { skipped_to: Some(_), .. } = out {
                skipped = true;
            }
        }
        if started_at.is_none() {
            if let Some(seq) = r.player.snapshot().await.playing {
                started_at = Some((seq, t));
            }
        }
    }

    let snap = r.player.snapshot().await;
    assert_eq!(snap.last_seq, 4);
    assert!(snap.queued.len() <= 1);
    assert!(!skipped);
    assert_eq!(r.sink.played(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn far_behind_jumps_to_the_newest_chunk() {
    let r = rig();
    for seq in 8..=10 {
        publish(&r.store, "r1", seq).await;
    }
    r.player.start("r1").await;
    assert_eq!(r.player.snapshot().await.last_seq, 10);
    assert_eq!(r.sink.played(), vec![10]);

    for seq in 11..=20 {
        publish(&r.store, "r1", seq).await;
    }
    r.store.clear_reads().await;
    let stops_before = r.sink.log().stops;

    let out = r.player.poll().await;
    assert_eq!(out, PollOutcome::Fetched { fetched: 1, skipped_to: Some(20) });
    assert_eq!(chunk_reads(&r.store.reads().await, "r1"), vec![20]);

    let snap = r.player.snapshot().await;
    assert_eq!(snap.last_seq, 20);
    assert!(snap.queued.is_empty());
    assert_eq!(snap.playing, Some(20));
    // 正在播的 10 被丟掉
    assert!(r.sink.log().stops > stops_before);
    assert_eq!(r.sink.played(), vec![10, 20]);
}

#[tokio::test]
async fn small_backlog_is_played_in_full() {
    let r = rig();
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;
    for seq in 1..=3 {
        publish(&r.store, "r1", seq).await;
    }
    // latest 3 - next 1 = 2，沒超過門檻
    assert_eq!(r.player.poll().await, PollOutcome::Fetched { fetched: 3, skipped_to: None });
    assert_eq!(r.player.snapshot().await.queued, vec![1, 2, 3]);

    for seq in 0..=3 {
        r.player.chunk_ended(seq).await;
    }
    assert_eq!(r.sink.played(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn stream_end_clears_everything_until_a_fresh_origin() {
    let r = rig();
    for seq in 0..=2 {
        publish(&r.store, "r1", seq).await;
    }
    r.player.start("r1").await;
    assert_eq!(r.player.snapshot().await.phase, Phase::Streaming);

    set_live(&r.store, "r1", inactive(2)).await;
    let stops_before = r.sink.log().stops;
    assert_eq!(r.player.poll().await, PollOutcome::Ended);
    let snap = r.player.snapshot().await;
    assert_eq!(snap.phase, Phase::Waiting);
    assert!(snap.queued.is_empty());
    assert_eq!(snap.playing, None);
    assert_eq!(snap.last_seq, -1);
    assert!(r.sink.log().stops > stops_before);

    r.store.clear_reads().await;
    assert_eq!(r.player.poll().await, PollOutcome::Waiting);
    assert!(chunk_reads(&r.store.reads().await, "r1").is_empty());

    // 新的一場從 0 開始
    publish(&r.store, "r1", 0).await;
    assert_eq!(r.player.poll().await, PollOutcome::Fetched { fetched: 1, skipped_to: None });
    assert_eq!(r.sink.played().last(), Some(&0));
}

#[tokio::test]
async fn sequence_restart_without_seeing_the_end() {
    let r = rig();
    for seq in 5..=7 {
        publish(&r.store, "r1", seq).await;
    }
    r.player.start("r1").await;
    assert_eq!(r.player.snapshot().await.last_seq, 7);

    // 對方重開一場，我們沒看到 active=false
    publish(&r.store, "r1", 0).await;
    assert_eq!(r.player.poll().await, PollOutcome::Fetched { fetched: 1, skipped_to: None });
    assert_eq!(r.player.snapshot().await.last_seq, 0);
}

#[tokio::test]
async fn paused_stream_fetches_nothing() {
    let r = rig();
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;

    publish(&r.store, "r1", 1).await;
    set_live(&r.store, "r1", LiveState { active: true, paused: true, seq: 1, mime_type: "audio/webm".into(), ts: 0 }).await;
    r.store.clear_reads().await;

    assert_eq!(r.player.poll().await, PollOutcome::Paused);
    assert!(chunk_reads(&r.store.reads().await, "r1").is_empty());
    let snap = r.player.snapshot().await;
    assert_eq!(snap.phase, Phase::Streaming);
    assert_eq!(snap.last_seq, 0);
}

#[tokio::test]
async fn missing_chunk_stops_the_fill_early() {
    let r = rig();
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;
    for seq in 1..=2 {
        publish(&r.store, "r1", seq).await;
    }
    r.store.remove(&keys::live_chunk("r1", 1)).await;

    assert_eq!(r.player.poll().await, PollOutcome::Fetched { fetched: 0, skipped_to: None });
    assert_eq!(r.player.snapshot().await.last_seq, 0);
}

#[tokio::test]
async fn undecodable_chunk_is_skipped() {
    let r = rig();
    r.sink.log().undecodable.push(1);
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;
    for seq in 1..=2 {
        publish(&r.store, "r1", seq).await;
    }
    r.player.poll().await;
    r.player.chunk_ended(0).await;

    assert_eq!(r.sink.played(), vec![0, 2]);
    assert_eq!(r.player.snapshot().await.playing, Some(2));
}

#[tokio::test]
async fn transport_errors_are_just_a_missed_tick() {
    let r = rig();
    publish(&r.store, "r1", 0).await;
    r.store.set_offline(true);
    assert_eq!(r.player.start("r1").await, PollOutcome::Failed);
    assert_eq!(r.player.snapshot().await.phase, Phase::Waiting);

    r.store.set_offline(false);
    r.sched.fire().await;
    assert_eq!(r.player.snapshot().await.last_seq, 0);
}

#[tokio::test(start_paused = true)]
async fn overlapping_polls_run_once() {
    let r = rig_with(MemoryStore::new().with_latency(Duration::from_millis(200)));
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;
    publish(&r.store, "r1", 1).await;

    let before = r.store.round_trips();
    let (a, b) = tokio::join!(r.player.poll(), r.player.poll());
    assert!(matches!((&a, &b), (PollOutcome::Fetched { .. }, PollOutcome::Skipped)), "{a:?} {b:?}");
    // 一次狀態 + 一個 chunk
    assert_eq!(r.store.round_trips() - before, 2);
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_everything() {
    let r = rig();
    r.player.stop().await;
    assert_eq!(r.player.snapshot().await.phase, Phase::Idle);

    // WAITING
    r.player.start("r1").await;
    r.player.stop().await;
    assert_eq!(r.sched.active(), 0);

    // STREAMING
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;
    r.player.stop().await;
    r.player.stop().await;

    let snap = r.player.snapshot().await;
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(snap.room, None);
    assert!(snap.queued.is_empty() && snap.playing.is_none());
    assert!(!snap.polling);
    assert_eq!(r.sched.active(), 0);
    assert_eq!(r.player.poll().await, PollOutcome::Idle);
}

#[tokio::test]
async fn mute_follows_the_gate_without_restarting() {
    let r = rig();
    publish(&r.store, "r1", 0).await;
    r.player.start("r1").await;

    r.gate.set(false);
    r.player.refresh_mute().await;
    assert_eq!(r.sink.log().mutes, vec![true]);
    assert_eq!(r.sink.played(), vec![0]);

    publish(&r.store, "r1", 1).await;
    r.player.poll().await;
    r.player.chunk_ended(0).await;
    assert_eq!(r.sink.log().played.last(), Some(&(1, true)));

    r.gate.set(true);
    r.player.poll().await;
    assert_eq!(r.sink.log().mutes, vec![true, false]);
    assert_eq!(r.sink.played(), vec![0, 1]);
}
