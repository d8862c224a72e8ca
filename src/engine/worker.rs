use tokio::select;
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::{
    control::{Command, ControlPort, Report},
    error::Error,
    render::CellDisplayExt,
    ring::{HaloLinks, Slot},
    world::{step_band, Band, Row, ALIVE},
};

/// Why a worker stopped before finishing its turns.
#[derive(Debug)]
enum Exit {
    Quit,
    CoordinatorGone,
    /// A neighbour's halo link closed while we were waiting on it.
    NeighbourGone(Slot),
    Fault(Error),
}

/// Simulates one band of the world.
///
/// A worker owns `world` (the current generation) and `next` (the one being
/// computed), both padded with one halo row above and below. Every blocking
/// operation on a halo link is raced against the control channel, so the
/// worker answers the coordinator no matter how far behind its neighbours
/// are.
pub struct Worker {
    index: usize,
    total_turns: u64,
    /// Completed turns.
    turn: u64,
    /// The barrier turn: the worker halts once `stop_at + 1` turns are done.
    stop_at: Option<u64>,
    world: Vec<Row>,
    next: Vec<Row>,
    halo: HaloLinks,
    control: ControlPort,
}

impl Worker {
    pub fn new(
        band: Band,
        total_turns: u64,
        halo: HaloLinks,
        control: ControlPort,
    ) -> Result<Self, Error> {
        let width = band.width();
        if band.cells.len() != band.height() + 2
            || band.height() == 0
            || width == 0
            || band.cells.iter().any(|row| row.len() != width)
        {
            Err(Error::InvalidWorld(format!(
                "band {} is not a padded rectangle",
                band.index
            )))?
        }
        Ok(Self {
            index: band.index,
            total_turns,
            turn: 0,
            stop_at: None,
            next: band.cells.clone(),
            world: band.cells,
            halo,
            control,
        })
    }

    /// Runs turns until done or told to quit. Never returns an error: faults
    /// are reported where they are found and the worker simply stops.
    pub async fn run(mut self) {
        let span = debug_span!("worker", index = self.index);
        async move {
            debug!(
                rows = self.rows(),
                turns = self.total_turns,
                "worker started"
            );
            match self.turns().await {
                Ok(()) => debug!(turn = self.turn, "worker finished"),
                Err(Exit::Quit) => debug!(turn = self.turn, "worker quit"),
                Err(Exit::CoordinatorGone) => {
                    debug!(turn = self.turn, "coordinator went away, stopping")
                }
                Err(Exit::NeighbourGone(slot)) => warn!(
                    turn = self.turn,
                    "halo link {:?} closed mid-run, stopping", slot
                ),
                Err(Exit::Fault(e)) => {
                    warn!(turn = self.turn, "stopping: {}", e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn rows(&self) -> usize {
        self.world.len() - 2
    }

    async fn turns(&mut self) -> Result<(), Exit> {
        // the initial band already carries both halos
        let mut have_above = true;
        let mut have_below = true;
        while self.turn < self.total_turns {
            if self.stop_at.map_or(false, |stop_at| self.turn == stop_at + 1) {
                self.paused().await?;
            }

            if self.turn != 0 {
                if !have_above {
                    have_above = self.receive_or_interrupt(Slot::Top).await?;
                }
                if !have_below {
                    have_below = self.receive_or_interrupt(Slot::Bottom).await?;
                }
            }

            if have_above && have_below {
                step_band(&self.world, &mut self.next);
                std::mem::swap(&mut self.world, &mut self.next);
                have_above = false;
                have_below = false;
                self.turn += 1;
                trace!(turn = self.turn, "turn computed");

                let mut sent_up = false;
                let mut sent_down = false;
                while !(sent_up && sent_down) {
                    if !sent_up {
                        sent_up = self.send_or_interrupt(Slot::Top).await?;
                    }
                    if !sent_down {
                        sent_down = self.send_or_interrupt(Slot::Bottom).await?;
                    }
                }
            }
        }

        self.report(Report::World(self.owned())).await?;
        self.report(Report::Done).await
    }

    /// Waits for a halo row for `slot`, or for a command, whichever comes
    /// first. Returns whether the halo was installed.
    async fn receive_or_interrupt(&mut self, slot: Slot) -> Result<bool, Exit> {
        let link = match slot {
            Slot::Top => &mut self.halo.from_above,
            Slot::Bottom => &mut self.halo.from_below,
        };
        let command = select! {
            row = link.recv() => {
                let row = row.ok_or(Exit::NeighbourGone(slot))?;
                self.install(slot, row)?;
                return Ok(true);
            }
            command = self.control.recv() => command,
        };
        self.interrupted(command).await?;
        Ok(false)
    }

    /// Sends our boundary row for `slot`, or handles a command, whichever
    /// comes first. Returns whether the row went out.
    async fn send_or_interrupt(&mut self, slot: Slot) -> Result<bool, Exit> {
        let (link, row) = match slot {
            Slot::Top => (&self.halo.to_above, &self.world[1]),
            Slot::Bottom => {
                (&self.halo.to_below, &self.world[self.world.len() - 2])
            }
        };
        let command = select! {
            permit = link.reserve() => {
                match permit {
                    Ok(permit) => {
                        trace!(turn = self.turn, ?slot, row = %row.cells(), "sending halo");
                        permit.send(row.clone());
                    }
                    // a neighbour that has already finished no longer needs
                    // our rows
                    Err(_) => trace!(?slot, "neighbour gone, dropping halo row"),
                }
                return Ok(true);
            }
            command = self.control.recv() => command,
        };
        self.interrupted(command).await?;
        Ok(false)
    }

    fn install(&mut self, slot: Slot, row: Row) -> Result<(), Exit> {
        let width = self.world[0].len();
        if row.len() != width {
            Err(Exit::Fault(Error::InvalidWorld(format!(
                "halo row for {:?} is {} cells wide, expected {}",
                slot,
                row.len(),
                width
            ))))?
        }
        let y = match slot {
            Slot::Top => 0,
            Slot::Bottom => self.world.len() - 1,
        };
        trace!(turn = self.turn, ?slot, row = %row.cells(), "received halo");
        self.world[y] = row;
        Ok(())
    }

    /// Handles a command that arrived while waiting on a halo link.
    async fn interrupted(&mut self, command: Option<Command>) -> Result<(), Exit> {
        match command.ok_or(Exit::CoordinatorGone)? {
            Command::Pause => {
                debug!(turn = self.turn, "pause requested, reporting turn");
                self.report(Report::Status(self.turn)).await?;
                loop {
                    match self.control.recv().await.ok_or(Exit::CoordinatorGone)? {
                        Command::StopAt(stop_at) => {
                            debug!(turn = self.turn, stop_at, "barrier agreed");
                            self.stop_at = Some(stop_at);
                            return Ok(());
                        }
                        Command::Quit => Err(Exit::Quit)?,
                        other => self.violation(other, "waiting for the barrier turn"),
                    }
                }
            }
            Command::Quit => Err(Exit::Quit),
            other => {
                self.violation(other, "running");
                Ok(())
            }
        }
    }

    /// The inner command loop at the barrier turn.
    async fn paused(&mut self) -> Result<(), Exit> {
        debug!(turn = self.turn, "paused");
        self.report(Report::Paused).await?;
        loop {
            match self.control.recv().await.ok_or(Exit::CoordinatorGone)? {
                Command::Resume => {
                    debug!(turn = self.turn, "resuming");
                    return Ok(());
                }
                Command::Save => {
                    self.report(Report::World(self.owned())).await?;
                }
                Command::Ping => {
                    let alive = self.alive();
                    self.report(Report::AliveCount(alive)).await?;
                    return Ok(());
                }
                Command::Quit => Err(Exit::Quit)?,
                other => self.violation(other, "paused"),
            }
        }
    }

    fn violation(&self, command: Command, state: &str) {
        warn!(
            "{}",
            Error::violation(
                self.index,
                format!("received {:?} while {}", command, state)
            )
        );
    }

    async fn report(&self, report: Report) -> Result<(), Exit> {
        if self.control.report(report).await {
            Ok(())
        } else {
            Err(Exit::CoordinatorGone)
        }
    }

    fn owned(&self) -> Vec<Row> {
        self.world[1..self.world.len() - 1].to_vec()
    }

    fn alive(&self) -> u64 {
        self.world[1..self.world.len() - 1]
            .iter()
            .flatten()
            .filter(|&&c| c == ALIVE)
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        control,
        ring::ring,
        world::{Cell, World},
    };

    fn glider() -> World {
        let alive = [(4, 5), (5, 6), (3, 7), (4, 7), (5, 7)].map(Cell::from);
        World::with_alive(16, 16, &alive).unwrap()
    }

    #[tokio::test]
    async fn lone_worker_matches_reference() {
        let world = glider();
        let band = world.band(0, 0..16);
        let (mut handle, port) = control::channel(0);
        let halo = ring(1).pop().unwrap();
        let worker = Worker::new(band, 10, halo, port).unwrap();
        let task = tokio::spawn(worker.run());

        let rows = match handle.recv().await.unwrap() {
            Report::World(rows) => rows,
            other => panic!("expected world, got {:?}", other),
        };
        assert_eq!(handle.recv().await.unwrap(), Report::Done);
        task.await.unwrap();

        let mut result = World::new(16, 16).unwrap();
        result.install(&(0..16), &rows).unwrap();
        assert_eq!(result, world.advance(10));
    }

    #[tokio::test]
    async fn zero_turns_returns_the_input() {
        let world = glider();
        let (mut handle, port) = control::channel(0);
        let worker =
            Worker::new(world.band(0, 0..16), 0, ring(1).pop().unwrap(), port)
                .unwrap();
        tokio::spawn(worker.run());
        assert_eq!(
            handle.recv().await.unwrap(),
            Report::World(world.band(0, 0..16).owned().to_vec())
        );
        assert_eq!(handle.recv().await.unwrap(), Report::Done);
    }

    /// Long enough that a test always gets to pause the worker first.
    const FOREVER: u64 = 10_000_000;

    /// The glider repeats every 64 turns on a 16x16 torus.
    fn glider_after(turns: u64) -> World {
        glider().advance(turns % 64)
    }

    fn spawn_lone(turns: u64) -> (control::ControlHandle, tokio::task::JoinHandle<()>) {
        let (handle, port) = control::channel(0);
        let worker = Worker::new(
            glider().band(0, 0..16),
            turns,
            ring(1).pop().unwrap(),
            port,
        )
        .unwrap();
        (handle, tokio::spawn(worker.run()))
    }

    async fn pause(handle: &mut control::ControlHandle) -> u64 {
        assert!(handle.send(Command::Pause).await);
        let turn = match handle.recv().await.unwrap() {
            Report::Status(turn) => turn,
            other => panic!("expected status, got {:?}", other),
        };
        assert!(handle.send(Command::StopAt(turn)).await);
        assert_eq!(handle.recv().await.unwrap(), Report::Paused);
        turn
    }

    async fn save(handle: &mut control::ControlHandle) -> World {
        assert!(handle.send(Command::Save).await);
        let rows = match handle.recv().await.unwrap() {
            Report::World(rows) => rows,
            other => panic!("expected world, got {:?}", other),
        };
        let mut saved = World::new(16, 16).unwrap();
        saved.install(&(0..16), &rows).unwrap();
        saved
    }

    #[tokio::test]
    async fn pause_save_ping() {
        let (mut handle, task) = spawn_lone(FOREVER);

        let turn = pause(&mut handle).await;
        assert!(turn >= 1);
        assert_eq!(save(&mut handle).await, glider_after(turn + 1));
        // saving twice at the same barrier gives the same rows
        assert_eq!(save(&mut handle).await, glider_after(turn + 1));

        assert!(handle.send(Command::Ping).await);
        assert_eq!(handle.recv().await.unwrap(), Report::AliveCount(5));

        // the ping resumed the worker, so the next barrier is later
        let later = pause(&mut handle).await;
        assert!(later > turn);
        assert_eq!(save(&mut handle).await, glider_after(later + 1));

        assert!(handle.send(Command::Quit).await);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn resume_continues_to_the_end() {
        let (mut handle, task) = spawn_lone(FOREVER);
        let turn = pause(&mut handle).await;
        assert!(handle.send(Command::Resume).await);
        let later = pause(&mut handle).await;
        assert!(later > turn);
        assert_eq!(save(&mut handle).await, glider_after(later + 1));
        assert!(handle.send(Command::Quit).await);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn quit_while_paused_stops_silently() {
        let (mut handle, task) = spawn_lone(FOREVER);
        pause(&mut handle).await;
        assert!(handle.send(Command::Quit).await);
        task.await.unwrap();
        assert!(handle.recv().await.is_err());
    }

    #[tokio::test]
    async fn unexpected_commands_are_ignored() {
        let (mut handle, task) = spawn_lone(FOREVER);
        // a ping before any pause is a protocol violation, not a crash
        assert!(handle.send(Command::Ping).await);
        let turn = pause(&mut handle).await;
        assert_eq!(save(&mut handle).await, glider_after(turn + 1));
        assert!(handle.send(Command::Quit).await);
        task.await.unwrap();
    }

    #[test]
    fn rejects_ragged_bands() {
        let (_, port) = control::channel(0);
        let band = Band {
            index: 0,
            rows: 0..1,
            cells: vec![vec![0; 4], vec![0; 3], vec![0; 4]],
        };
        assert!(Worker::new(band, 1, ring(1).pop().unwrap(), port).is_err());
    }
}
