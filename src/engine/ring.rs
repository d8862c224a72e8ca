//! Halo links between neighbouring bands.
//!
//! Every boundary between two bands carries two single-row channels: one for
//! rows travelling down (into the lower band's top padding) and one for rows
//! travelling up (into the upper band's bottom padding). Links are wired by
//! index, `(i - 1) mod n` above and `(i + 1) mod n` below, so no two workers
//! ever hold the same end of a channel.

use tokio::sync::mpsc;

use super::world::Row;

/// Rows a boundary can hold before the sender waits. One row per direction
/// keeps neighbouring bands at most one turn apart.
pub const HALO_CAPACITY: usize = 1;

/// Which padding row of the receiving band a halo row is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Slot {
    Top = 0,
    Bottom = 1,
}

impl TryFrom<u8> for Slot {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Slot::Top),
            1 => Ok(Slot::Bottom),
            other => Err(other),
        }
    }
}

/// The four channel ends a worker holds.
pub struct HaloLinks {
    /// Our first row, on its way into the band above's bottom padding.
    pub to_above: mpsc::Sender<Row>,
    /// Our last row, on its way into the band below's top padding.
    pub to_below: mpsc::Sender<Row>,
    /// The band above's last row, for our top padding.
    pub from_above: mpsc::Receiver<Row>,
    /// The band below's first row, for our bottom padding.
    pub from_below: mpsc::Receiver<Row>,
}

/// The open end of a chain of bands whose neighbour lives elsewhere.
pub struct Boundary {
    /// Rows the edge band sends out of the chain.
    pub outgoing: mpsc::Receiver<Row>,
    /// Rows arriving from outside for the edge band's padding.
    pub incoming: mpsc::Sender<Row>,
}

/// One boundary's pair of channels.
struct Crossing {
    down_tx: Vec<mpsc::Sender<Row>>,
    down_rx: Vec<mpsc::Receiver<Row>>,
    up_tx: Vec<mpsc::Sender<Row>>,
    up_rx: Vec<mpsc::Receiver<Row>>,
}

impl Crossing {
    /// Boundary `b` sits above band `b`.
    fn new(boundaries: usize) -> Self {
        let (down_tx, down_rx) = (0..boundaries)
            .map(|_| mpsc::channel(HALO_CAPACITY))
            .unzip();
        let (up_tx, up_rx) = (0..boundaries)
            .map(|_| mpsc::channel(HALO_CAPACITY))
            .unzip();
        Self {
            down_tx,
            down_rx,
            up_tx,
            up_rx,
        }
    }

    fn into_links(self) -> Vec<HaloLinks> {
        self.up_tx
            .into_iter()
            .zip(self.down_tx)
            .zip(self.down_rx)
            .zip(self.up_rx)
            .map(|(((to_above, to_below), from_above), from_below)| HaloLinks {
                to_above,
                to_below,
                from_above,
                from_below,
            })
            .collect()
    }
}

/// Wires `bands` workers into a closed ring; the last band's lower neighbour
/// is the first band.
pub fn ring(bands: usize) -> Vec<HaloLinks> {
    let mut crossing = Crossing::new(bands);
    // band i sends down through boundary i + 1 and hears back from below
    // through the same boundary
    crossing.down_tx.rotate_left(1);
    crossing.up_rx.rotate_left(1);
    crossing.into_links()
}

/// Wires `bands` workers into an open chain and returns the chain's top and
/// bottom boundaries, to be relayed to whatever lives beyond them.
pub fn chain(bands: usize) -> (Vec<HaloLinks>, Boundary, Boundary) {
    let mut crossing = Crossing::new(bands + 1);
    let top = Boundary {
        outgoing: crossing.up_rx.remove(0),
        incoming: crossing.down_tx.remove(0),
    };
    let bottom = Boundary {
        outgoing: crossing.down_rx.pop().expect("chain has a bottom boundary"),
        incoming: crossing.up_tx.pop().expect("chain has a bottom boundary"),
    };
    (crossing.into_links(), top, bottom)
}
