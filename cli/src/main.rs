//! Boots a worker or broker, or drives a random world through a broker.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{info, warn};

use torus::{
    broker::{Broker, BrokerClient},
    net::Endpoint,
    worker::Worker,
    BrokerConfig, Error, Grid, WorkerConfig, ALIVE,
};

#[derive(Parser)]
#[command(name = "torus")]
#[command(about = "Game of Life on a ring of worker nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a worker node.
    Worker {
        #[arg(long, default_value = "127.0.0.1:8030")]
        listen: SocketAddr,
    },

    /// Serve a broker in front of a set of workers.
    Broker {
        #[arg(long, default_value = "127.0.0.1:8040")]
        listen: SocketAddr,
        /// Worker address (repeatable)
        #[arg(long = "node", required = true)]
        nodes: Vec<SocketAddr>,
        /// Check the workers every this many seconds
        #[arg(long)]
        heartbeat_secs: Option<u64>,
    },

    /// Run a random world for a number of turns.
    Run {
        #[arg(long, default_value = "127.0.0.1:8040")]
        broker: SocketAddr,
        #[arg(long, default_value = "512")]
        width: usize,
        #[arg(long, default_value = "512")]
        height: usize,
        #[arg(long, default_value = "100")]
        turns: usize,
        /// Compute tasks per worker
        #[arg(long, default_value = "4")]
        threads: u32,
        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Shut the cluster down afterwards
        #[arg(long)]
        shutdown: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Commands::Worker { listen } => {
            let worker = Worker::bind(WorkerConfig::builder().listen(listen).build())?;
            worker.run().await;
        }
        Commands::Broker {
            listen,
            nodes,
            heartbeat_secs,
        } => {
            let config = match heartbeat_secs {
                Some(secs) => BrokerConfig::builder()
                    .listen(listen)
                    .nodes(nodes)
                    .heartbeat(Duration::from_secs(secs))
                    .build(),
                None => BrokerConfig::builder().listen(listen).nodes(nodes).build(),
            };
            let broker: Arc<Broker> = Broker::bind(config).await?;
            info!(workers = broker.nodes().await.len(), "cluster ready");
            broker.run().await;
        }
        Commands::Run {
            broker,
            width,
            height,
            turns,
            threads,
            seed,
            shutdown,
        } => {
            let endpoint = client_endpoint()?;
            let client = BrokerClient::connect(&endpoint, broker).await?;
            let world = soup(width, height, seed)?;
            info!(alive = world.alive_count(), "seeded {}x{} world", width, height);

            let started = Instant::now();
            let world = drive(&client, world, turns, threads).await?;
            info!(
                turns,
                alive = world.alive_count(),
                elapsed = ?started.elapsed(),
                "run complete"
            );

            if shutdown {
                client.shut_down().await?;
            }
        }
    }
    Ok(())
}

/// An endpoint for calling out. Bound on every interface so a broker on
/// another host can answer.
fn client_endpoint() -> Result<Endpoint, Error> {
    Endpoint::bind(
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        Duration::from_secs(5),
    )
}

/// Voided turns in a row before the run gives up.
const MAX_FAILED_ATTEMPTS: usize = 3;

/// Advances `world` by `turns` turns. A voided turn leaves the world as it
/// was, so the same turn is run again against the broker's healed ring.
async fn drive(
    client: &BrokerClient,
    mut world: Grid,
    turns: usize,
    threads: u32,
) -> Result<Grid, Error> {
    let mut turn = 1;
    let mut failed = 0;
    while turn <= turns {
        let t = Instant::now();
        match client.run_gol(world.clone(), threads).await {
            Ok(outcome) => {
                info!(
                    turn,
                    flipped = outcome.flipped.len(),
                    alive = outcome.world.alive_count(),
                    elapsed = ?t.elapsed(),
                    "turn complete"
                );
                world = outcome.world;
                turn += 1;
                failed = 0;
            }
            Err(Error::TurnFailed(failures)) => {
                for failure in &failures {
                    warn!(turn, addr = %failure.addr, "{}", failure.reason);
                }
                failed += 1;
                if failed >= MAX_FAILED_ATTEMPTS {
                    return Err(Error::TurnFailed(failures));
                }
                warn!(turn, attempt = failed + 1, "retrying voided turn");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(world)
}

fn soup(width: usize, height: usize, seed: u64) -> Result<Grid, Error> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut world = Grid::new(width, height);
    for y in 0..height {
        for x in 0..width {
            if rng.gen_bool(0.25) {
                world.set(x, y, ALIVE)?;
            }
        }
    }
    world.validate()?;
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use torus::{life, RetryPolicy};

    const SHORT: Duration = Duration::from_millis(500);

    #[tokio::test(flavor = "multi_thread")]
    async fn voided_turns_are_run_again() {
        let localhost = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let mut workers: Vec<_> = (0..3)
            .map(|_| {
                let config = WorkerConfig::builder()
                    .listen(localhost)
                    .halo(RetryPolicy::builder().attempts(2).timeout(SHORT).build())
                    .connect_timeout(SHORT)
                    .build();
                let worker = Worker::bind(config).unwrap();
                let task = worker.spawn();
                (worker, task)
            })
            .collect();
        let nodes = workers
            .iter()
            .map(|(worker, _)| worker.local_addr().unwrap())
            .collect();
        let broker = Broker::bind(
            BrokerConfig::builder()
                .listen(localhost)
                .nodes(nodes)
                .connect_timeout(SHORT)
                .turn_timeout(Duration::from_secs(5))
                .build(),
        )
        .await
        .unwrap();
        let _broker_task = broker.spawn();

        let endpoint = client_endpoint().unwrap();
        let client = BrokerClient::connect(&endpoint, broker.local_addr().unwrap())
            .await
            .unwrap();
        let world = drive(&client, soup(8, 12, 7).unwrap(), 1, 2).await.unwrap();

        let (lost, task) = workers.remove(2);
        lost.shutdown();
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();

        // the first attempt is voided by the lost worker, the retry runs on
        // the two that are left
        let mut reference = world.clone();
        life::step(&mut reference);
        life::step(&mut reference);
        let world = drive(&client, world, 2, 2).await.unwrap();
        assert_eq!(world, reference);
        assert_eq!(broker.nodes().await.len(), 2);
    }
}
