// Each band of the world gets its own task. Bands never share memory: a
// worker exclusively owns its rows plus one padding row above and below, and
// the only way data leaves a worker is through a bounded channel. There are no
// locks anywhere in the engine.
//
// Workers exchange their boundary rows directly with the two bands next to
// them in the ring, so a normal turn never involves the coordinator. Halo
// channels hold a single row, which keeps neighbouring bands at most one turn
// apart without any lockstep barrier.
//
// The coordinator only talks to workers through their control channels. Every
// place a worker can block on a neighbour also listens for a control command,
// so a worker stays responsive to pause and quit no matter how far its
// neighbours have got. Pausing is a two step barrier: collect every worker's
// turn, then broadcast the maximum as the turn everyone stops after.
pub mod control;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod params;
pub mod partition;
pub mod render;
pub mod ring;
pub mod worker;
pub mod world;

pub use control::{Command, Report};
pub use coordinator::{
    Barrier, Coordinator, Event, KeyCommand, RunOutcome, Snapshot,
    SnapshotSink,
};
pub use error::Error;
pub use params::Params;
pub use partition::Partition;
pub use world::{Band, Cell, Row, World, ALIVE, DEAD};
