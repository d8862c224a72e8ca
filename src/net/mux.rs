//! Carries many workers' control channels over one framed stream.
//!
//! A stream has a single writer task fed by an mpsc channel. Each control
//! channel end that produces frames gets a forwarder task wrapping its items
//! into frames for the writer; the reader on the other side routes frames
//! back into the matching channel by worker index.

use hashbrown::HashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use super::{error::Error, link::FrameSendStream, wire::Frame};

/// Frames queued for a stream's writer.
pub const OUTGOING_CAPACITY: usize = 64;

/// Writes every frame from `frames` until all senders are gone, then finishes
/// the stream.
pub fn spawn_writer(
    mut stream: FrameSendStream,
    mut frames: mpsc::Receiver<Frame>,
) -> JoinHandle<Result<(), Error>> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            stream.send(&frame).await?;
        }
        stream.finish().await
    })
}

/// Wraps everything `items` yields into frames for `frames`.
pub fn spawn_forwarder<T, F>(
    mut items: mpsc::Receiver<T>,
    frames: mpsc::Sender<Frame>,
    wrap: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> Frame + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = items.recv().await {
            if frames.send(wrap(item)).await.is_err() {
                debug!("stream writer gone, dropping the rest");
                break;
            }
        }
    })
}

/// Per-worker destinations for frames read off a stream.
///
/// Every route is fronted by its own unbounded queue and a pump task feeding
/// the bounded channel behind it, so a worker whose channel is full holds up
/// only its own frames and never the reader of the shared stream.
pub struct Routes<T> {
    routes: HashMap<u32, mpsc::UnboundedSender<T>>,
}

impl<T: Send + 'static> Routes<T> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, worker: u32, route: mpsc::Sender<T>) {
        let (queue, mut pending) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(item) = pending.recv().await {
                if route.send(item).await.is_err() {
                    debug!(worker, "receiver gone, dropping frames");
                    break;
                }
            }
        });
        self.routes.insert(worker, queue);
    }

    /// Queues `item` for `worker` without waiting for it to be read. Items
    /// for workers that have stopped listening are dropped.
    pub fn deliver(&self, worker: u32, item: T) {
        match self.routes.get(&worker) {
            Some(route) => {
                if route.send(item).is_err() {
                    debug!(worker, "receiver gone, dropping frame");
                }
            }
            None => warn!(worker, "frame for a worker not on this stream"),
        }
    }
}

impl<T: Send + 'static> Default for Routes<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaits a group of stream tasks, returning the first failure.
pub async fn join_streams(
    tasks: Vec<JoinHandle<Result<(), Error>>>,
) -> Result<(), Error> {
    let mut result = Ok(());
    for task in futures::future::join_all(tasks).await {
        if let Err(e) = task.map_err(Error::from).and_then(|r| r) {
            warn!("stream task failed: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}
