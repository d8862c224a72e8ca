pub mod engine;
pub mod net;
