//! The per-worker control channel between the coordinator and a worker.

use rkyv::{Archive, Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{error::Error, world::Row};

/// Commands a worker can be sent in one go before reading any of them.
pub const CONTROL_CAPACITY: usize = 1;
/// Reports a worker can have in flight before the coordinator reads any.
/// A finished worker sends its band then `Done` unprompted.
pub const REPORT_CAPACITY: usize = 2;

/// Coordinator to worker.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Command {
    Pause,
    Ping,
    Resume,
    Quit,
    Save,
    /// Halt once `turn + 1` turns have completed.
    StopAt(u64),
}

/// Worker to coordinator.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Report {
    /// Completed turns at the moment a `Pause` was read.
    Status(u64),
    /// The worker reached the agreed turn and is waiting for commands.
    Paused,
    /// The worker's owned rows.
    World(Vec<Row>),
    AliveCount(u64),
    /// Sent once after the final `World`; nothing follows it.
    Done,
}

impl Report {
    pub fn kind(&self) -> &'static str {
        match self {
            Report::Status(_) => "status",
            Report::Paused => "paused",
            Report::World(_) => "world",
            Report::AliveCount(_) => "alive count",
            Report::Done => "done",
        }
    }
}

/// The coordinator's end of one worker's control channel.
pub struct ControlHandle {
    index: usize,
    commands: mpsc::Sender<Command>,
    reports: mpsc::Receiver<Report>,
}

/// The worker's end of its control channel.
pub struct ControlPort {
    index: usize,
    commands: mpsc::Receiver<Command>,
    reports: mpsc::Sender<Report>,
}

/// Creates a control channel for worker `index`.
pub fn channel(index: usize) -> (ControlHandle, ControlPort) {
    let (command_tx, command_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (report_tx, report_rx) = mpsc::channel(REPORT_CAPACITY);
    (
        ControlHandle {
            index,
            commands: command_tx,
            reports: report_rx,
        },
        ControlPort {
            index,
            commands: command_rx,
            reports: report_tx,
        },
    )
}

impl ControlHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns false if the worker is no longer listening.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn recv(&mut self) -> Result<Report, Error> {
        self.reports.recv().await.ok_or(Error::WorkerGone(self.index))
    }

    /// Splits the handle into the raw channel ends, for relaying it over a
    /// transport.
    pub fn into_parts(self) -> (mpsc::Sender<Command>, mpsc::Receiver<Report>) {
        (self.commands, self.reports)
    }
}

impl ControlPort {
    pub fn index(&self) -> usize {
        self.index
    }

    /// `None` once the coordinator has gone away.
    pub async fn recv(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    /// Returns false if the coordinator has gone away.
    pub async fn report(&self, report: Report) -> bool {
        self.reports.send(report).await.is_ok()
    }

    /// Splits the port into the raw channel ends, for relaying it over a
    /// transport.
    pub fn into_parts(self) -> (mpsc::Receiver<Command>, mpsc::Sender<Report>) {
        (self.commands, self.reports)
    }
}
