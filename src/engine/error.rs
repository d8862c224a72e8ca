use std::{fmt, io};

#[derive(Debug)]
pub enum Error {
    /// `parts` bands cannot be cut from `total` rows.
    InvalidPartition { total: usize, parts: usize },
    InvalidWorld(String),
    /// A command or report arrived where the protocol does not allow it.
    ProtocolViolation { worker: usize, detail: String },
    /// A worker's control or report channel closed before it said it was done.
    WorkerGone(usize),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPartition { total, parts } => {
                write!(f, "cannot split {total} rows into {parts} bands")
            }
            Error::InvalidWorld(reason) => write!(f, "invalid world: {reason}"),
            Error::ProtocolViolation { worker, detail } => {
                write!(f, "protocol violation by worker {worker}: {detail}")
            }
            Error::WorkerGone(worker) => {
                write!(f, "worker {worker} went away mid-run")
            }
            Error::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl Error {
    pub(crate) fn violation(worker: usize, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            worker,
            detail: detail.into(),
        }
    }
}
