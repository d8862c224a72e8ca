use std::net::SocketAddr;

use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle, try_join};
use tracing::{debug, debug_span, info, warn, Instrument};
use typed_builder::TypedBuilder;

use super::{
    endpoint::{self, SERVER_NAME},
    error::Error::{self, *},
    link::{self, FrameRecvStream, FrameSendStream},
    mux::{self, Routes, OUTGOING_CAPACITY},
    wire::{Frame, HaloRow, InitRun},
};
use crate::engine::{
    control,
    ring::{self, HaloLinks, Slot},
    worker::Worker,
    Band, Command, Row,
};

#[derive(Debug, Clone, TypedBuilder)]
pub struct ClientConfig {
    /// The host running the coordinator.
    pub server: SocketAddr,
    /// Where to accept halo links from the previous client in the ring.
    #[builder(default = SocketAddr::from(([0, 0, 0, 0], 0)))]
    pub listen: SocketAddr,
}

/// A halo link to a neighbouring client: one stream carrying rows both ways.
struct Neighbour {
    conn: quinn::Connection,
    send: FrameSendStream,
    recv: FrameRecvStream,
}

/// Joins a run hosted at `config.server`, runs the workers it is given and
/// returns once they have stopped and the host has ended the run.
pub async fn run(config: ClientConfig) -> Result<(), Error> {
    let endpoint = endpoint::bind(config.listen)?;
    let halo_port = endpoint.local_addr()?.port();
    let span = debug_span!("client", server = %config.server);
    async move {
        let conn = endpoint.connect(config.server, SERVER_NAME)?.await?;
        let (mut send, mut recv) = link::open(&conn).await?;
        send.send(&Frame::Hello { halo_port }).await?;
        debug!(halo_port, "connected to host");

        let init = match recv.expect().await? {
            Frame::Init(init) => init,
            other => Err(ReceivedUnexpectedFrame(other.kind()))?,
        };
        let mut bands = Vec::with_capacity(init.workers as usize);
        for _ in 0..init.workers {
            match recv.expect().await? {
                Frame::Band(band) => bands.push(Band::from(band)),
                other => Err(ReceivedUnexpectedFrame(other.kind()))?,
            }
        }
        info!(
            client = init.client,
            clients = init.clients,
            workers = bands.len(),
            turns = init.turns,
            "received bands"
        );

        let (links, neighbours, relays) = if init.clients > 1 {
            link_neighbours(&endpoint, &init, bands.len()).await?
        } else {
            (ring::ring(bands.len()), Vec::new(), Vec::new())
        };

        let mut workers = Vec::with_capacity(bands.len());
        let mut routes = Routes::new();
        let mut reports = Vec::with_capacity(bands.len());
        for (band, halo) in bands.into_iter().zip(links) {
            let (handle, port) = control::channel(band.index);
            let index = band.index as u32;
            workers.push(Worker::new(band, init.turns, halo, port)?);
            let (commands, report_rx) = handle.into_parts();
            routes.insert(index, commands);
            reports.push((index, report_rx));
        }

        send.send(&Frame::Ready(1)).await?;
        match recv.expect().await? {
            Frame::Ready(_) => {}
            other => Err(ReceivedUnexpectedFrame(other.kind()))?,
        }
        debug!("host is ready, starting workers");

        let (frames, outgoing) = mpsc::channel(OUTGOING_CAPACITY);
        let writer = mux::spawn_writer(send, outgoing);
        let forwarders: Vec<_> = reports
            .into_iter()
            .map(|(worker, report_rx)| {
                mux::spawn_forwarder(report_rx, frames.clone(), move |report| {
                    Frame::Report { worker, report }
                })
            })
            .collect();
        drop(frames);
        let reader = tokio::spawn(read_commands(recv, routes).in_current_span());
        let tasks: Vec<_> = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run().in_current_span()))
            .collect();

        join_all(tasks).await;
        debug!("all workers stopped");
        join_all(forwarders).await;
        let result = mux::join_streams(vec![writer, reader]).await;
        if let Err(e) = mux::join_streams(relays).await {
            warn!("halo relay did not end cleanly: {}", e);
        }

        for halo_conn in neighbours {
            halo_conn.close(0u32.into(), b"done");
        }
        conn.close(0u32.into(), b"done");
        endpoint.wait_idle().await;
        info!("run over");
        result
    }
    .instrument(span)
    .await
}

/// Connects this client's chain of bands to the clients before and after it
/// in the ring and relays boundary rows over those links.
async fn link_neighbours(
    endpoint: &quinn::Endpoint,
    init: &InitRun,
    bands: usize,
) -> Result<
    (
        Vec<HaloLinks>,
        Vec<quinn::Connection>,
        Vec<JoinHandle<Result<(), Error>>>,
    ),
    Error,
> {
    let next = init
        .next
        .as_deref()
        .ok_or_else(|| BadAddress(String::new()))?;
    let next: SocketAddr =
        next.parse().map_err(|_| BadAddress(next.to_string()))?;

    // every client opens towards the next one while accepting from the
    // previous one, so nobody waits on anybody in turn
    let (below, above) = try_join!(
        connect_next(endpoint, next, init.client),
        accept_previous(endpoint),
    )?;
    debug!(%next, "halo links up");

    let (links, top, bottom) = ring::chain(bands);
    let relays = vec![
        // our last row goes into the next client's top padding
        tokio::spawn(relay_out(bottom.outgoing, below.send, Slot::Top).in_current_span()),
        tokio::spawn(relay_in(below.recv, bottom.incoming, Slot::Bottom).in_current_span()),
        // our first row goes into the previous client's bottom padding
        tokio::spawn(relay_out(top.outgoing, above.send, Slot::Bottom).in_current_span()),
        tokio::spawn(relay_in(above.recv, top.incoming, Slot::Top).in_current_span()),
    ];
    Ok((links, vec![below.conn, above.conn], relays))
}

async fn connect_next(
    endpoint: &quinn::Endpoint,
    next: SocketAddr,
    client: u32,
) -> Result<Neighbour, Error> {
    let conn = endpoint.connect(next, SERVER_NAME)?.await?;
    let (mut send, recv) = link::open(&conn).await?;
    send.send(&Frame::LinkOpen { client }).await?;
    Ok(Neighbour { conn, send, recv })
}

async fn accept_previous(endpoint: &quinn::Endpoint) -> Result<Neighbour, Error> {
    let conn = endpoint.accept().await.ok_or(EndpointClosed)?.await?;
    let (send, mut recv) = link::accept(&conn).await?;
    match recv.expect().await? {
        Frame::LinkOpen { client } => debug!(client, "previous client linked"),
        other => Err(ReceivedUnexpectedFrame(other.kind()))?,
    }
    Ok(Neighbour { conn, send, recv })
}

async fn relay_out(
    mut rows: mpsc::Receiver<Row>,
    mut stream: FrameSendStream,
    slot: Slot,
) -> Result<(), Error> {
    while let Some(row) = rows.recv().await {
        let halo = HaloRow {
            slot: slot as u8,
            row,
        };
        stream.send(&Frame::Halo(halo)).await?;
    }
    stream.finish().await
}

async fn relay_in(
    mut stream: FrameRecvStream,
    rows: mpsc::Sender<Row>,
    slot: Slot,
) -> Result<(), Error> {
    let mut open = true;
    while let Some(frame) = stream.recv().await? {
        match frame {
            Frame::Halo(halo) if halo.slot == slot as u8 => {
                // keep draining once the band is gone so the sender can finish
                if open && rows.send(halo.row).await.is_err() {
                    debug!(?slot, "band gone, discarding halo rows");
                    open = false;
                }
            }
            other => Err(ReceivedUnexpectedFrame(other.kind()))?,
        }
    }
    Ok(())
}

async fn read_commands(
    mut recv: FrameRecvStream,
    routes: Routes<Command>,
) -> Result<(), Error> {
    let mut shut_down = false;
    loop {
        let frame = match recv.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            // the host may close the connection as soon as it has our reports
            Err(e) if shut_down => {
                debug!("stream ended after shutdown: {}", e);
                break;
            }
            Err(e) => return Err(e),
        };
        match frame {
            Frame::Control { worker, command } if !shut_down => {
                routes.deliver(worker, command)
            }
            Frame::Shutdown if !shut_down => {
                debug!("host ended the run");
                shut_down = true;
            }
            other => Err(ReceivedUnexpectedFrame(other.kind()))?,
        }
    }
    if !shut_down {
        warn!("host closed its stream without ending the run");
    }
    Ok(())
}
