//! Spreads the workers of a run over several machines.
//!
//! The host runs the coordinator and accepts one QUIC connection per client.
//! All control channels of a client's workers share one framed stream. The
//! clients form a ring of their own: each one opens a halo link to the next
//! client and accepts one from the previous, and boundary rows of the bands
//! at either end of a client's chain are relayed over those links.

pub mod client;
mod endpoint;
pub mod error;
pub mod host;
mod link;
mod mux;
pub mod wire;

pub use client::ClientConfig;
pub use error::Error;
pub use host::{ServeConfig, Server};
