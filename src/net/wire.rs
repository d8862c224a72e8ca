//! Frames exchanged between the coordinator host and its clients, and
//! between neighbouring clients.
//!
//! On the wire every frame is `len: u32 | sent_at: i64 | payload`, little
//! endian, where `payload` is the rkyv archive of a [`Frame`] and `sent_at` is
//! the sender's clock in microseconds.

use std::ops::Range;

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

use super::error::Error;
use crate::engine::{Band, Command, Report, Row};

/// Length of the `len | sent_at` prefix.
pub const PREFIX_LEN: usize = 4 + 8;
/// Frames above this size are rejected before any allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// What a client needs to know to take part in a run.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct InitRun {
    /// This client's position in the ring of clients.
    pub client: u32,
    pub clients: u32,
    pub turns: u64,
    pub width: u32,
    pub height: u32,
    /// Number of `Band` frames that follow.
    pub workers: u32,
    /// Where the next client in the ring accepts halo links, unless this
    /// client is alone.
    pub next: Option<String>,
}

/// One worker's padded band.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct WorkerBand {
    pub index: u32,
    pub start: u32,
    pub end: u32,
    pub cells: Vec<Row>,
}

impl From<Band> for WorkerBand {
    fn from(band: Band) -> Self {
        Self {
            index: band.index as u32,
            start: band.rows.start as u32,
            end: band.rows.end as u32,
            cells: band.cells,
        }
    }
}

impl From<WorkerBand> for Band {
    fn from(band: WorkerBand) -> Self {
        let rows: Range<usize> = band.start as usize..band.end as usize;
        Band {
            index: band.index as usize,
            rows,
            cells: band.cells,
        }
    }
}

/// A boundary row relayed between clients. `slot` is the padding row of the
/// receiving band it is written into.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct HaloRow {
    pub slot: u8,
    pub row: Row,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Frame {
    /// First frame a client sends: the UDP port its endpoint listens on.
    Hello { halo_port: u16 },
    Init(InitRun),
    Band(WorkerBand),
    /// Both sides send one when they are set up; the host starts the run
    /// once every client has.
    Ready(u32),
    Control { worker: u32, command: Command },
    Report { worker: u32, report: Report },
    /// Opens a halo link; `client` is the opener's ring position.
    LinkOpen { client: u32 },
    Halo(HaloRow),
    /// The run is over; the client tears down once its workers stop.
    Shutdown,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Init(_) => "init",
            Frame::Band(_) => "band",
            Frame::Ready(_) => "ready",
            Frame::Control { .. } => "control",
            Frame::Report { .. } => "report",
            Frame::LinkOpen { .. } => "link open",
            Frame::Halo(_) => "halo",
            Frame::Shutdown => "shutdown",
        }
    }

    pub fn encode(&self) -> Result<AlignedVec, Error> {
        rkyv::to_bytes::<_, 1024>(self).map_err(|_| Error::CouldNotEncodeMessage)
    }

    /// `bytes` must be 16 byte aligned, as an [`AlignedVec`] is.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Frame>(bytes).map_err(|_| Error::CouldNotDecodeMessage)
    }
}

/// Prefixes an encoded frame with its length and send time.
pub fn seal(payload: &[u8], sent_at: i64) -> Result<Vec<u8>, Error> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or(Error::MessageLengthOverflowed)?;
    let mut buf = Vec::with_capacity(PREFIX_LEN + payload.len());
    buf.extend_from_slice(&len.to_le_bytes()); // 4 bytes
    buf.extend_from_slice(&sent_at.to_le_bytes()); // 8 bytes
    buf.extend_from_slice(payload); // len bytes
    Ok(buf)
}
