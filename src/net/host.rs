use std::{net::SocketAddr, ops::Range};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, debug_span, info, warn, Instrument};
use typed_builder::TypedBuilder;

use super::{
    endpoint,
    error::Error::{self, *},
    link::{self, FrameRecvStream, FrameSendStream},
    mux::{self, Routes, OUTGOING_CAPACITY},
    wire::{Frame, InitRun},
};
use crate::engine::{
    control::{self, ControlHandle},
    local::check_world,
    Coordinator, Event, KeyCommand, Params, Partition, Report, RunOutcome,
    SnapshotSink, World,
};

#[derive(Debug, Clone, TypedBuilder)]
pub struct ServeConfig {
    /// Where clients connect to.
    pub listen: SocketAddr,
    /// Number of clients the workers are spread over.
    #[builder(default = 1)]
    pub clients: usize,
    pub params: Params,
}

/// A connected client before the run starts.
struct Peer {
    conn: quinn::Connection,
    send: FrameSendStream,
    recv: FrameRecvStream,
    /// Where the client accepts halo links.
    halo_addr: SocketAddr,
}

/// A client's stream tasks while the run is on.
struct Session {
    conn: quinn::Connection,
    frames: mpsc::Sender<Frame>,
    writer: JoinHandle<Result<(), Error>>,
    reader: JoinHandle<Result<(), Error>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Session {
    /// Relays the control channels of `workers` over the client's stream and
    /// returns the coordinator's ends of them.
    fn start(
        client: usize,
        peer: Peer,
        workers: Range<usize>,
    ) -> (Vec<ControlHandle>, Self) {
        let (frames, outgoing) = mpsc::channel(OUTGOING_CAPACITY);
        let writer = mux::spawn_writer(peer.send, outgoing);

        let mut routes = Routes::new();
        let mut handles = Vec::with_capacity(workers.len());
        let mut forwarders = Vec::with_capacity(workers.len());
        for index in workers {
            let (handle, port) = control::channel(index);
            let (commands, reports) = port.into_parts();
            let worker = index as u32;
            forwarders.push(mux::spawn_forwarder(
                commands,
                frames.clone(),
                move |command| Frame::Control { worker, command },
            ));
            routes.insert(worker, reports);
            handles.push(handle);
        }

        let span = debug_span!("session", client);
        let reader = tokio::spawn(read_reports(peer.recv, routes).instrument(span));
        (
            handles,
            Self {
                conn: peer.conn,
                frames,
                writer,
                reader,
                forwarders,
            },
        )
    }

    /// Tells the client the run is over once every command the coordinator
    /// sent has gone out, then waits for the client to finish its side.
    async fn shutdown(self) -> Result<(), Error> {
        let Session {
            conn,
            frames,
            writer,
            reader,
            forwarders,
        } = self;
        futures::future::join_all(forwarders).await;
        if frames.send(Frame::Shutdown).await.is_err() {
            debug!("writer already gone");
        }
        drop(frames);
        let result = mux::join_streams(vec![writer, reader]).await;
        conn.close(0u32.into(), b"done");
        result
    }
}

async fn read_reports(
    mut recv: FrameRecvStream,
    routes: Routes<Report>,
) -> Result<(), Error> {
    while let Some(frame) = recv.recv().await? {
        match frame {
            Frame::Report { worker, report } => {
                routes.deliver(worker, report)
            }
            other => Err(ReceivedUnexpectedFrame(other.kind()))?,
        }
    }
    debug!("client finished its stream");
    Ok(())
}

/// Hosts the coordinator of a run whose workers live on remote clients.
pub struct Server {
    endpoint: quinn::Endpoint,
    config: ServeConfig,
}

impl Server {
    pub fn bind(config: ServeConfig) -> Result<Self, Error> {
        let endpoint = endpoint::bind(config.listen)?;
        Ok(Self { endpoint, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Waits for every client, hands out the bands of `world` and runs the
    /// coordinator until the run completes or a quit is requested.
    pub async fn run<S: SnapshotSink>(
        self,
        world: World,
        keys: mpsc::Receiver<KeyCommand>,
        sink: &mut S,
        events: Option<mpsc::UnboundedSender<Event>>,
    ) -> Result<RunOutcome, Error> {
        let params = &self.config.params;
        let clients = self.config.clients;
        check_world(params, &world)?;
        let partition = Partition::new(params.height, params.threads)?;
        let placement = Partition::new(params.threads, clients)?;
        info!(
            clients,
            threads = params.threads,
            turns = params.turns,
            "waiting for clients"
        );

        let mut peers = Vec::with_capacity(clients);
        while peers.len() < clients {
            let peer = self.accept().await?;
            info!(client = peers.len(), remote = %peer.conn.remote_address(), "client joined");
            peers.push(peer);
        }

        let halo_addrs: Vec<SocketAddr> =
            peers.iter().map(|peer| peer.halo_addr).collect();
        for (client, (peer, workers)) in
            peers.iter_mut().zip(placement.iter()).enumerate()
        {
            let next = (clients > 1)
                .then(|| halo_addrs[(client + 1) % clients].to_string());
            let init = InitRun {
                client: client as u32,
                clients: clients as u32,
                turns: params.turns,
                width: params.width as u32,
                height: params.height as u32,
                workers: workers.len() as u32,
                next,
            };
            peer.send.send(&Frame::Init(init)).await?;
            for index in workers.clone() {
                let band = world.band(index, partition.ranges()[index].clone());
                peer.send.send(&Frame::Band(band.into())).await?;
            }
            debug!(client, workers = ?workers, "sent bands");
        }

        for peer in &mut peers {
            match peer.recv.expect().await? {
                Frame::Ready(_) => {}
                other => Err(ReceivedUnexpectedFrame(other.kind()))?,
            }
        }
        for peer in &mut peers {
            peer.send.send(&Frame::Ready(1)).await?;
        }
        info!("all clients ready, starting run");

        let mut handles = Vec::with_capacity(params.threads);
        let mut sessions = Vec::with_capacity(clients);
        for (client, (peer, workers)) in
            peers.into_iter().zip(placement.iter()).enumerate()
        {
            let (controls, session) = Session::start(client, peer, workers.clone());
            handles.extend(controls);
            sessions.push(session);
        }

        let mut coordinator = Coordinator::new(params, &partition, handles)?;
        if let Some(events) = events {
            coordinator = coordinator.with_events(events);
        }
        let outcome = coordinator.run(world, keys, sink).await;

        for (client, session) in sessions.into_iter().enumerate() {
            if let Err(e) = session.shutdown().await {
                warn!(client, "client did not shut down cleanly: {}", e);
            }
        }
        self.endpoint.wait_idle().await;
        Ok(outcome?)
    }

    async fn accept(&self) -> Result<Peer, Error> {
        let connecting = self.endpoint.accept().await.ok_or(EndpointClosed)?;
        let remote = connecting.remote_address();
        let conn = connecting.await?;
        let (send, mut recv) = link::accept(&conn).await?;
        let halo_port = match recv.expect().await? {
            Frame::Hello { halo_port } => halo_port,
            other => Err(ReceivedUnexpectedFrame(other.kind()))?,
        };
        debug!(%remote, halo_port, "client said hello");
        Ok(Peer {
            conn,
            send,
            recv,
            halo_addr: SocketAddr::new(remote.ip(), halo_port),
        })
    }
}
