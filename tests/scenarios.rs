use std::time::Duration;

use hashbrown::HashSet;
use tokio::sync::mpsc;
use torus::engine::{
    local, Cell, Event, KeyCommand, Params, RunOutcome, Snapshot, World,
};

/// Every glider on a 16x16 torus is back where it started after 64 turns.
const PERIOD: u64 = 64;

fn glider() -> World {
    World::with_alive(
        16,
        16,
        &[
            Cell::new(4, 5),
            Cell::new(5, 6),
            Cell::new(3, 7),
            Cell::new(4, 7),
            Cell::new(5, 7),
        ],
    )
    .unwrap()
}

fn cells(alive: &[(usize, usize)]) -> HashSet<Cell> {
    alive.iter().copied().map(Cell::from).collect()
}

fn params(turns: u64, threads: usize, tick: Duration) -> Params {
    Params::builder()
        .turns(turns)
        .threads(threads)
        .width(16)
        .height(16)
        .tick(tick)
        .build()
}

async fn run(
    params: &Params,
    world: World,
    keys: &[KeyCommand],
) -> (RunOutcome, Vec<Snapshot>, Vec<Event>) {
    let (key_tx, key_rx) = mpsc::channel(keys.len().max(1));
    for &key in keys {
        key_tx.send(key).await.unwrap();
    }
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut sink = Vec::new();
    let outcome = local::run(params, world, key_rx, &mut sink, Some(event_tx))
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        events.push(event);
    }
    (outcome, sink, events)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn glider_is_the_same_for_every_partition() {
    let expected = [
        (0, cells(&[(4, 5), (5, 6), (3, 7), (4, 7), (5, 7)])),
        (1, cells(&[(3, 6), (5, 6), (4, 7), (5, 7), (4, 8)])),
        (100, cells(&[(12, 0), (13, 0), (14, 0), (13, 14), (14, 15)])),
    ];
    for threads in [1, 2, 4, 6, 8, 10, 12, 16] {
        for (turns, alive) in &expected {
            let params = params(*turns, threads, Duration::from_secs(60));
            let (outcome, _, events) = run(&params, glider(), &[]).await;
            assert_eq!(outcome.turn, *turns);
            assert!(!outcome.saved);
            assert_eq!(
                outcome.alive.iter().copied().collect::<HashSet<_>>(),
                *alive,
                "{threads} workers, {turns} turns"
            );
            assert_eq!(events, vec![Event::Finished { turn: *turns }]);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_worlds_match_the_reference() {
    let world = World::random(40, 27, 0.3, 7).unwrap();
    let expected = world.advance(60);
    for threads in [1, 3, 7, 27] {
        let params = Params::builder()
            .turns(60)
            .threads(threads)
            .width(40)
            .height(27)
            .tick(Duration::from_secs(60))
            .build();
        let (outcome, _, _) = run(&params, world.clone(), &[]).await;
        assert_eq!(outcome.world, expected, "{threads} workers");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_and_resume_leave_the_result_alone() {
    let turns = 20_000;
    let params = params(turns, 4, Duration::from_secs(60));
    let (outcome, snapshots, events) = run(
        &params,
        glider(),
        &[KeyCommand::TogglePause, KeyCommand::TogglePause],
    )
    .await;
    assert!(snapshots.is_empty());
    assert_eq!(outcome.turn, turns);
    assert_eq!(outcome.world, glider().advance(turns % PERIOD));

    assert!(matches!(events[0], Event::Paused { .. }));
    assert_eq!(events[1], Event::Resumed);
    assert_eq!(events.last(), Some(&Event::Finished { turn: turns }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn save_then_quit_snapshots_a_single_turn() {
    let params = params(u64::MAX, 6, Duration::from_secs(60));
    let (outcome, snapshots, events) =
        run(&params, glider(), &[KeyCommand::Save, KeyCommand::Quit]).await;

    assert_eq!(snapshots.len(), 2);
    for snapshot in &snapshots {
        assert_eq!(snapshot.world, glider().advance(snapshot.turn % PERIOD));
    }
    assert!(snapshots[0].turn < snapshots[1].turn);
    assert_eq!(snapshots[1].turn, outcome.turn);
    assert_eq!(snapshots[1].world, outcome.world);
    // the final world is already in the sink
    assert!(outcome.saved);
    assert_eq!(
        snapshots[1].name(),
        format!("16x16_state_{}", outcome.turn)
    );
    assert_eq!(
        events,
        vec![
            Event::Saved {
                turn: snapshots[0].turn
            },
            Event::Saved { turn: outcome.turn },
            Event::Quit { turn: outcome.turn },
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saving_twice_while_paused_gives_the_same_snapshot() {
    let params = params(u64::MAX, 3, Duration::from_secs(60));
    let (outcome, snapshots, events) = run(
        &params,
        glider(),
        &[
            KeyCommand::TogglePause,
            KeyCommand::Save,
            KeyCommand::Save,
            KeyCommand::Quit,
        ],
    )
    .await;

    let Event::Paused { turn } = events[0] else {
        panic!("expected a pause first, got {:?}", events[0]);
    };
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.iter().all(|s| s.turn == turn));
    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(outcome.turn, turn);
    assert_eq!(outcome.world, glider().advance(turn % PERIOD));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ticks_report_alive_cells() {
    let (key_tx, key_rx) = mpsc::channel(1);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let params = params(u64::MAX, 4, Duration::from_millis(20));
    let handle = tokio::spawn(async move {
        let mut sink = Vec::new();
        local::run(&params, glider(), key_rx, &mut sink, Some(event_tx)).await
    });

    let mut last = 0;
    for _ in 0..3 {
        match event_rx.recv().await.unwrap() {
            Event::AliveCells { turn, count } => {
                assert_eq!(count, 5);
                assert!(turn > last);
                last = turn;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    key_tx.send(KeyCommand::Quit).await.unwrap();
    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.turn > last);
    assert_eq!(outcome.alive.len(), 5);
}
