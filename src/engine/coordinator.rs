use std::{ops::Range, time::Duration};

use tokio::{
    select,
    sync::mpsc,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{
    control::{Command, ControlHandle, Report},
    error::Error,
    params::Params,
    partition::Partition,
    world::{Cell, Row, World},
};

/// Runtime commands from the keyboard collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Pause, or resume if already paused.
    TogglePause,
    /// Save the world at the barrier turn.
    Save,
    /// Save and terminate.
    Quit,
}

/// Progress notifications for whoever drives the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    AliveCells { turn: u64, count: u64 },
    Paused { turn: u64 },
    Resumed,
    Saved { turn: u64 },
    Finished { turn: u64 },
    Quit { turn: u64 },
}

/// The reassembled world after `turn` completed turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub turn: u64,
    pub world: World,
}

impl Snapshot {
    /// File stem the snapshot is stored under, e.g. `512x512_state_100`.
    pub fn name(&self) -> String {
        format!(
            "{}x{}_state_{}",
            self.world.width(),
            self.world.height(),
            self.turn
        )
    }
}

/// Where saved snapshots go.
pub trait SnapshotSink {
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), Error>;
}

impl SnapshotSink for Vec<Snapshot> {
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        self.push(snapshot.clone());
        Ok(())
    }
}

/// Result of a pause request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// Every worker halted after exactly `turn` completed turns.
    Paused { turn: u64 },
    /// The agreed turn lies beyond the last one, so every worker is running
    /// to completion instead.
    Finishing,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Completed turns the world reflects.
    pub turn: u64,
    pub world: World,
    pub alive: Vec<Cell>,
    /// The final world already went to the snapshot sink.
    pub saved: bool,
}

struct Remote {
    handle: ControlHandle,
    rows: Range<usize>,
    /// Owned rows reported at natural completion.
    final_band: Option<Vec<Row>>,
    done: bool,
}

impl Remote {
    fn index(&self) -> usize {
        self.handle.index()
    }

    /// Reads reports until `Done`, keeping the final band.
    async fn drain(&mut self) -> Result<(), Error> {
        while !self.done {
            match self.handle.recv().await? {
                Report::World(rows) => self.final_band = Some(rows),
                Report::Done => self.done = true,
                other => self.unexpected("done", &other),
            }
        }
        Ok(())
    }

    fn unexpected(&self, expected: &str, got: &Report) {
        warn!(
            "{}",
            Error::violation(
                self.index(),
                format!("expected {}, got {}", expected, got.kind())
            )
        );
    }
}

/// Drives the workers of one run through their control channels and owns the
/// global pause/resume/save/quit protocol.
pub struct Coordinator {
    turns: u64,
    tick: Duration,
    workers: Vec<Remote>,
    events: Option<mpsc::UnboundedSender<Event>>,
}

impl Coordinator {
    /// `handles[i]` must control the worker owning `partition`'s band `i`.
    pub fn new(
        params: &Params,
        partition: &Partition,
        handles: Vec<ControlHandle>,
    ) -> Result<Self, Error> {
        if handles.len() != partition.len() {
            Err(Error::InvalidPartition {
                total: partition.total(),
                parts: handles.len(),
            })?
        }
        let workers = handles
            .into_iter()
            .zip(partition.iter())
            .map(|(handle, rows)| Remote {
                handle,
                rows: rows.clone(),
                final_band: None,
                done: false,
            })
            .collect();
        Ok(Self {
            turns: params.turns,
            tick: params.tick,
            workers,
            events: None,
        })
    }

    /// Publishes run events on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn broadcast(&self, command: Command) -> Result<(), Error> {
        for worker in &self.workers {
            if !worker.handle.send(command).await {
                Err(Error::WorkerGone(worker.index()))?
            }
        }
        Ok(())
    }

    /// Stops every worker at one agreed turn.
    ///
    /// Each worker answers `Pause` with its completed turn count. The maximum
    /// is in every worker's future, so broadcasting it as the barrier makes
    /// them all halt after the same turn.
    pub async fn pause_all(&mut self) -> Result<Barrier, Error> {
        for worker in &self.workers {
            if !worker.handle.send(Command::Pause).await {
                // either finished, which its reports will tell, or gone
                debug!(worker = worker.index(), "worker not taking commands");
            }
        }

        let mut statuses = Vec::with_capacity(self.workers.len());
        for worker in &mut self.workers {
            let status = loop {
                match worker.handle.recv().await? {
                    Report::Status(turn) => break Some(turn),
                    // completed before it saw the pause
                    Report::World(rows) => worker.final_band = Some(rows),
                    Report::Done => {
                        worker.done = true;
                        break None;
                    }
                    other => worker.unexpected("status", &other),
                }
            };
            statuses.push(status);
        }

        if statuses.iter().any(Option::is_none) {
            debug!("workers finished before the barrier, letting all finish");
            for (worker, status) in self.workers.iter().zip(&statuses) {
                if status.is_some()
                    && !worker.handle.send(Command::StopAt(self.turns)).await
                {
                    Err(Error::WorkerGone(worker.index()))?
                }
            }
            return Ok(Barrier::Finishing);
        }

        let stop_at = statuses.into_iter().flatten().max().unwrap_or_default();
        self.broadcast(Command::StopAt(stop_at)).await?;
        if stop_at + 1 >= self.turns {
            debug!(stop_at, "barrier is past the last turn");
            return Ok(Barrier::Finishing);
        }

        for worker in &mut self.workers {
            loop {
                match worker.handle.recv().await? {
                    Report::Paused => break,
                    other => worker.unexpected("paused", &other),
                }
            }
        }
        debug!(turn = stop_at + 1, "all workers paused");
        Ok(Barrier::Paused { turn: stop_at + 1 })
    }

    /// Lets paused workers continue.
    pub async fn resume_all(&mut self) -> Result<(), Error> {
        self.broadcast(Command::Resume).await
    }

    /// Collects every paused worker's band into `world`.
    pub async fn save_all(
        &mut self,
        world: &mut World,
        turn: u64,
    ) -> Result<Snapshot, Error> {
        self.broadcast(Command::Save).await?;
        for worker in &mut self.workers {
            loop {
                match worker.handle.recv().await? {
                    Report::World(rows) => {
                        world.install(&worker.rows, &rows)?;
                        break;
                    }
                    other => worker.unexpected("world", &other),
                }
            }
        }
        Ok(Snapshot {
            turn,
            world: world.clone(),
        })
    }

    /// Counts alive cells of paused workers. Workers resume once they have
    /// answered.
    pub async fn ping_all(&mut self) -> Result<u64, Error> {
        self.broadcast(Command::Ping).await?;
        let mut alive = 0;
        for worker in &mut self.workers {
            loop {
                match worker.handle.recv().await? {
                    Report::AliveCount(count) => {
                        alive += count;
                        break;
                    }
                    other => worker.unexpected("alive count", &other),
                }
            }
        }
        Ok(alive)
    }

    /// Terminates every worker. Workers send nothing after a quit.
    pub async fn quit_all(&mut self) {
        for worker in &self.workers {
            if !worker.handle.send(Command::Quit).await {
                debug!(worker = worker.index(), "worker already gone");
            }
        }
    }

    /// Waits for every worker to complete its turns and assembles their final
    /// bands into `world`.
    pub async fn finish(&mut self, world: &mut World) -> Result<(), Error> {
        for worker in &mut self.workers {
            worker.drain().await?;
            let band = worker.final_band.take().ok_or_else(|| {
                Error::violation(worker.index(), "finished without its band")
            })?;
            world.install(&worker.rows, &band)?;
        }
        Ok(())
    }

    async fn complete(
        &mut self,
        mut world: World,
    ) -> Result<RunOutcome, Error> {
        self.finish(&mut world).await?;
        info!(turn = self.turns, "all turns completed");
        self.emit(Event::Finished { turn: self.turns });
        Ok(RunOutcome {
            turn: self.turns,
            alive: world.alive_cells(),
            world,
            saved: false,
        })
    }

    /// Runs until every worker completes or a quit is requested.
    ///
    /// `world` is the world the run started from; it is reused as the buffer
    /// bands are reassembled into. Every `tick` the number of alive cells is
    /// reported unless the run is paused.
    pub async fn run<S: SnapshotSink>(
        mut self,
        mut world: World,
        mut keys: mpsc::Receiver<KeyCommand>,
        sink: &mut S,
    ) -> Result<RunOutcome, Error> {
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keys_open = true;
        let mut paused: Option<u64> = None;

        loop {
            select! {
                _ = ticker.tick() => {
                    if paused.is_some() {
                        continue;
                    }
                    match self.pause_all().await? {
                        Barrier::Paused { turn } => {
                            let count = self.ping_all().await?;
                            info!(turn, count, "alive cells");
                            self.emit(Event::AliveCells { turn, count });
                        }
                        Barrier::Finishing => return self.complete(world).await,
                    }
                }
                key = keys.recv(), if keys_open => {
                    let Some(key) = key else {
                        keys_open = false;
                        continue;
                    };
                    match key {
                        KeyCommand::TogglePause => match paused {
                            Some(_) => {
                                self.resume_all().await?;
                                paused = None;
                                info!("continuing");
                                self.emit(Event::Resumed);
                            }
                            None => match self.pause_all().await? {
                                Barrier::Paused { turn } => {
                                    paused = Some(turn);
                                    info!(turn, "paused");
                                    self.emit(Event::Paused { turn });
                                }
                                Barrier::Finishing => return self.complete(world).await,
                            },
                        },
                        KeyCommand::Save | KeyCommand::Quit => {
                            let turn = match paused {
                                Some(turn) => turn,
                                None => match self.pause_all().await? {
                                    Barrier::Paused { turn } => turn,
                                    Barrier::Finishing => {
                                        let mut outcome = self.complete(world).await?;
                                        let snapshot = Snapshot {
                                            turn: outcome.turn,
                                            world: outcome.world.clone(),
                                        };
                                        sink.save(&snapshot)?;
                                        self.emit(Event::Saved { turn: outcome.turn });
                                        outcome.saved = true;
                                        return Ok(outcome);
                                    }
                                },
                            };
                            let snapshot = self.save_all(&mut world, turn).await?;
                            sink.save(&snapshot)?;
                            info!(turn, name = %snapshot.name(), "saved");
                            self.emit(Event::Saved { turn });

                            if key == KeyCommand::Quit {
                                self.quit_all().await;
                                info!(turn, "quit");
                                self.emit(Event::Quit { turn });
                                return Ok(RunOutcome {
                                    turn,
                                    alive: world.alive_cells(),
                                    world,
                                    saved: true,
                                });
                            }
                            if paused.is_none() {
                                self.resume_all().await?;
                            }
                        }
                    }
                }
                report = self.workers[0].handle.recv(), if paused.is_none() => {
                    // the first worker completing means they all are
                    match report? {
                        Report::World(rows) => {
                            self.workers[0].final_band = Some(rows);
                            return self.complete(world).await;
                        }
                        Report::Done => {
                            self.workers[0].done = true;
                            return self.complete(world).await;
                        }
                        other => self.workers[0].unexpected("world", &other),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        control::{channel, ControlPort},
        world::ALIVE,
    };

    fn coordinator(turns: u64, workers: usize) -> (Coordinator, Vec<ControlPort>) {
        let params = Params::builder()
            .turns(turns)
            .threads(workers)
            .width(4)
            .height(workers)
            .build();
        let partition = Partition::new(workers, workers).unwrap();
        let (handles, ports): (Vec<_>, Vec<_>) = (0..workers).map(channel).unzip();
        let coordinator = Coordinator::new(&params, &partition, handles).unwrap();
        (coordinator, ports)
    }

    /// Answers a pause with `turn` and returns the agreed barrier.
    async fn answer_pause(port: &mut ControlPort, turn: u64) -> u64 {
        assert_eq!(port.recv().await, Some(Command::Pause));
        assert!(port.report(Report::Status(turn)).await);
        match port.recv().await {
            Some(Command::StopAt(stop_at)) => stop_at,
            other => panic!("expected a barrier, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn barrier_is_the_latest_turn() {
        let (mut coordinator, ports) = coordinator(100, 3);
        let scripted = ports
            .into_iter()
            .zip([4, 9, 6])
            .map(|(mut port, turn)| {
                tokio::spawn(async move {
                    let stop_at = answer_pause(&mut port, turn).await;
                    assert!(port.report(Report::Paused).await);
                    stop_at
                })
            })
            .collect::<Vec<_>>();

        assert_eq!(
            coordinator.pause_all().await.unwrap(),
            Barrier::Paused { turn: 10 }
        );
        for worker in scripted {
            assert_eq!(worker.await.unwrap(), 9);
        }
    }

    #[tokio::test]
    async fn stray_reports_do_not_break_the_barrier() {
        let (mut coordinator, mut ports) = coordinator(100, 1);
        let mut port = ports.pop().unwrap();
        let scripted = tokio::spawn(async move {
            let stop_at = answer_pause(&mut port, 4).await;
            assert!(port.report(Report::AliveCount(7)).await);
            assert!(port.report(Report::Paused).await);
            stop_at
        });

        assert_eq!(
            coordinator.pause_all().await.unwrap(),
            Barrier::Paused { turn: 5 }
        );
        assert_eq!(scripted.await.unwrap(), 4);
    }

    #[tokio::test]
    async fn barrier_past_the_end_finishes() {
        let (mut coordinator, mut ports) = coordinator(10, 2);
        let last = ports.pop().unwrap();
        let first = ports.pop().unwrap();
        let scripted = [(first, 3), (last, 9)].map(|(mut port, turn)| {
            tokio::spawn(async move { answer_pause(&mut port, turn).await })
        });

        assert_eq!(coordinator.pause_all().await.unwrap(), Barrier::Finishing);
        for worker in scripted {
            assert_eq!(worker.await.unwrap(), 9);
        }
    }

    #[tokio::test]
    async fn completed_worker_makes_the_rest_finish() {
        let (mut coordinator, mut ports) = coordinator(10, 2);
        let mut running = ports.pop().unwrap();
        let done = ports.pop().unwrap();
        assert!(done.report(Report::World(vec![vec![ALIVE; 4]])).await);
        assert!(done.report(Report::Done).await);
        drop(done);
        let running_task =
            tokio::spawn(async move { answer_pause(&mut running, 8).await });

        assert_eq!(coordinator.pause_all().await.unwrap(), Barrier::Finishing);
        assert_eq!(running_task.await.unwrap(), 10);
    }

    #[tokio::test]
    async fn vanished_worker_is_reported() {
        let (mut coordinator, ports) = coordinator(10, 2);
        drop(ports);
        assert!(matches!(
            coordinator.pause_all().await,
            Err(Error::WorkerGone(0))
        ));
    }

    #[test]
    fn snapshots_are_named_after_size_and_turn() {
        let world = World::new(512, 256).unwrap();
        let snapshot = Snapshot { turn: 42, world };
        assert_eq!(snapshot.name(), "512x256_state_42");
        let mut sink = Vec::new();
        sink.save(&snapshot).unwrap();
        assert_eq!(sink, vec![snapshot]);
    }
}
