use std::{
    io::BufRead,
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};

use torus::{
    engine::{self, Event, KeyCommand, Params, RunOutcome, World},
    net::{self, ClientConfig, ServeConfig, Server},
};

mod pgm;

/// Conway's Game of Life on a torus, split into bands that run in parallel.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Run every worker in this process.
    Local(RunArgs),
    /// Host the coordinator and spread the workers over remote clients.
    Serve {
        /// Address clients connect to.
        #[arg(long, default_value = "0.0.0.0:4000")]
        listen: SocketAddr,
        /// Number of clients to wait for.
        #[arg(long, default_value_t = 1)]
        clients: usize,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run workers for a coordinator hosted elsewhere.
    Client {
        /// Address of the host.
        #[arg(long)]
        server: SocketAddr,
        /// Address neighbouring clients connect to.
        #[arg(long, default_value = "0.0.0.0:0")]
        listen: SocketAddr,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value_t = 10_000_000)]
    turns: u64,
    #[arg(long, default_value_t = 8)]
    threads: usize,
    #[arg(long, default_value_t = 512)]
    width: usize,
    #[arg(long, default_value_t = 512)]
    height: usize,
    /// Initial world; defaults to `images/<width>x<height>.pgm`.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Start from a random world with this seed instead of an image.
    #[arg(long, conflicts_with = "input")]
    seed: Option<u64>,
    /// Share of cells alive in a random world.
    #[arg(long, default_value_t = 0.25)]
    density: f64,
    /// Where snapshots are written.
    #[arg(long, default_value = "out")]
    out: PathBuf,
    /// Seconds between alive cell reports.
    #[arg(long, default_value_t = 2)]
    tick: u64,
}

impl RunArgs {
    fn params(&self) -> Params {
        Params::builder()
            .turns(self.turns)
            .threads(self.threads)
            .width(self.width)
            .height(self.height)
            .tick(Duration::from_secs(self.tick.max(1)))
            .build()
    }

    fn world(&self) -> Result<World, engine::Error> {
        match self.seed {
            Some(seed) => {
                World::random(self.width, self.height, self.density, seed)
            }
            None => {
                let path = self.input.clone().unwrap_or_else(|| {
                    PathBuf::from(format!(
                        "images/{}x{}.pgm",
                        self.width, self.height
                    ))
                });
                info!(path = %path.display(), "loading world");
                pgm::read(&path, self.width, self.height)
            }
        }
    }
}

/// Reads `p`, `s` and `q` from stdin, one or more per line.
fn spawn_keyboard() -> mpsc::Receiver<KeyCommand> {
    let (keys, rx) = mpsc::channel(4);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            for key in line.chars() {
                let command = match key {
                    'p' => KeyCommand::TogglePause,
                    's' => KeyCommand::Save,
                    'q' => KeyCommand::Quit,
                    _ => continue,
                };
                if keys.blocking_send(command).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

fn spawn_printer() -> mpsc::UnboundedSender<Event> {
    let (events, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::AliveCells { turn, count } => {
                    println!("turn {turn}: {count} alive cells")
                }
                Event::Paused { turn } => println!("paused after turn {turn}"),
                Event::Resumed => println!("continuing"),
                Event::Saved { turn } => println!("saved turn {turn}"),
                Event::Finished { turn } => println!("finished {turn} turns"),
                Event::Quit { turn } => println!("quit after turn {turn}"),
            }
        }
    });
    events
}

fn report(
    outcome: &RunOutcome,
    sink: &mut pgm::PgmSink,
) -> Result<(), engine::Error> {
    use engine::SnapshotSink;

    let snapshot = engine::Snapshot {
        turn: outcome.turn,
        world: outcome.world.clone(),
    };
    if !outcome.saved {
        sink.save(&snapshot)?;
    }
    println!(
        "{} alive cells after {} turns, written to {}",
        outcome.alive.len(),
        outcome.turn,
        sink.path_for(&snapshot).display()
    );
    Ok(())
}

async fn local(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let params = args.params();
    let world = args.world()?;
    let mut sink = pgm::PgmSink::new(args.out.clone())?;
    let outcome = engine::local::run(
        &params,
        world,
        spawn_keyboard(),
        &mut sink,
        Some(spawn_printer()),
    )
    .await?;
    report(&outcome, &mut sink)?;
    Ok(())
}

async fn serve(
    listen: SocketAddr,
    clients: usize,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let world = args.world()?;
    let mut sink = pgm::PgmSink::new(args.out.clone())?;
    let config = ServeConfig::builder()
        .listen(listen)
        .clients(clients)
        .params(args.params())
        .build();
    let server = Server::bind(config)?;
    println!(
        "waiting for {} clients on {}",
        clients,
        server.local_addr()?
    );
    let outcome = server
        .run(world, spawn_keyboard(), &mut sink, Some(spawn_printer()))
        .await?;
    report(&outcome, &mut sink)?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let result = match Cli::parse().command {
        Mode::Local(args) => local(args).await,
        Mode::Serve {
            listen,
            clients,
            run,
        } => serve(listen, clients, run).await,
        Mode::Client { server, listen } => {
            let config =
                ClientConfig::builder().server(server).listen(listen).build();
            net::client::run(config).await.map_err(Into::into)
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
