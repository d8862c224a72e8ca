use std::time::Duration;

use typed_builder::TypedBuilder;

/// Parameters of a single run.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Params {
    /// Number of turns every worker executes before reporting its band.
    pub turns: u64,
    /// Number of workers, i.e. bands the world is cut into.
    #[builder(default = 8)]
    pub threads: usize,
    pub width: usize,
    pub height: usize,
    /// How often the coordinator reports the number of alive cells.
    #[builder(default = Duration::from_secs(2))]
    pub tick: Duration,
}
