//! Runs every worker of a world as a task in this process.

use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use super::{
    control,
    coordinator::{Coordinator, Event, KeyCommand, RunOutcome, SnapshotSink},
    error::Error,
    params::Params,
    partition::Partition,
    ring,
    worker::Worker,
    world::World,
};

pub(crate) fn check_world(params: &Params, world: &World) -> Result<(), Error> {
    if world.width() != params.width || world.height() != params.height {
        Err(Error::InvalidWorld(format!(
            "world is {}x{}, run expects {}x{}",
            world.width(),
            world.height(),
            params.width,
            params.height
        )))?
    }
    Ok(())
}

/// Cuts `world` into `params.threads` bands and spawns a worker for each.
/// Must be called from within a tokio runtime.
pub fn launch(
    params: &Params,
    world: &World,
) -> Result<(Coordinator, Vec<JoinHandle<()>>), Error> {
    check_world(params, world)?;
    let partition = Partition::new(params.height, params.threads)?;
    debug!(heights = ?partition.heights(), "partitioned world");

    let mut handles = Vec::with_capacity(partition.len());
    let mut tasks = Vec::with_capacity(partition.len());
    for ((index, rows), halo) in
        partition.iter().enumerate().zip(ring::ring(partition.len()))
    {
        let (handle, port) = control::channel(index);
        let worker = Worker::new(
            world.band(index, rows.clone()),
            params.turns,
            halo,
            port,
        )?;
        handles.push(handle);
        tasks.push(tokio::spawn(worker.run()));
    }

    let coordinator = Coordinator::new(params, &partition, handles)?;
    Ok((coordinator, tasks))
}

/// Runs a whole simulation in this process and waits for every worker task
/// to stop.
pub async fn run<S: SnapshotSink>(
    params: &Params,
    world: World,
    keys: mpsc::Receiver<KeyCommand>,
    sink: &mut S,
    events: Option<mpsc::UnboundedSender<Event>>,
) -> Result<RunOutcome, Error> {
    info!(
        turns = params.turns,
        threads = params.threads,
        width = params.width,
        height = params.height,
        "starting run"
    );
    let (mut coordinator, tasks) = launch(params, &world)?;
    if let Some(events) = events {
        coordinator = coordinator.with_events(events);
    }

    let outcome = coordinator.run(world, keys, sink).await;
    if outcome.is_err() {
        for task in &tasks {
            task.abort();
        }
    }
    // workers stop on their own after a quit or their last turn
    join_all(tasks).await;
    outcome
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::{coordinator::Barrier, world::Cell};

    fn glider() -> World {
        World::with_alive(
            16,
            16,
            &[
                Cell::new(1, 0),
                Cell::new(2, 1),
                Cell::new(0, 2),
                Cell::new(1, 2),
                Cell::new(2, 2),
            ],
        )
        .unwrap()
    }

    fn params(turns: u64, threads: usize) -> Params {
        Params::builder()
            .turns(turns)
            .threads(threads)
            .width(16)
            .height(16)
            .tick(Duration::from_secs(60))
            .build()
    }

    #[tokio::test]
    async fn rejects_mismatched_worlds() {
        let world = World::new(8, 16).unwrap();
        assert!(matches!(
            launch(&params(1, 2), &world),
            Err(Error::InvalidWorld(_))
        ));
    }

    #[tokio::test]
    async fn rejects_more_workers_than_rows() {
        assert!(matches!(
            launch(&params(1, 17), &glider()),
            Err(Error::InvalidPartition { total: 16, parts: 17 })
        ));
    }

    #[tokio::test]
    async fn barrier_pauses_every_worker_on_one_turn() {
        let world = glider();
        let (mut coordinator, tasks) =
            launch(&params(1_000_000, 4), &world).unwrap();

        let mut buffer = world.clone();
        let mut last = 0;
        for _ in 0..3 {
            let Barrier::Paused { turn } = coordinator.pause_all().await.unwrap()
            else {
                panic!("run ended early");
            };
            assert!(turn > last);
            last = turn;
            let snapshot = coordinator.save_all(&mut buffer, turn).await.unwrap();
            assert_eq!(snapshot.world, world.advance(turn % 64));
            assert_eq!(coordinator.ping_all().await.unwrap(), 5);
        }

        assert!(matches!(
            coordinator.pause_all().await.unwrap(),
            Barrier::Paused { .. }
        ));
        coordinator.quit_all().await;
        join_all(tasks).await;
    }

    #[tokio::test]
    async fn finish_assembles_the_final_world() {
        let world = glider();
        let (mut coordinator, tasks) = launch(&params(20, 3), &world).unwrap();
        let mut result = world.clone();
        coordinator.finish(&mut result).await.unwrap();
        assert_eq!(result, world.advance(20));
        join_all(tasks).await;
    }

    #[tokio::test]
    async fn pause_near_the_end_lets_the_run_finish() {
        let world = glider();
        let (mut coordinator, tasks) = launch(&params(2, 2), &world).unwrap();
        assert_eq!(coordinator.pause_all().await.unwrap(), Barrier::Finishing);
        let mut result = world.clone();
        coordinator.finish(&mut result).await.unwrap();
        assert_eq!(result, world.advance(2));
        join_all(tasks).await;
    }
}
