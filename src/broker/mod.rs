//! The coordinator: owns the authoritative world and the worker ring.
//!
//! A turn fans `NextTurn` out to every active worker, waits for all of them,
//! and toggles every reported cell in a copy of the world. The ring is laid
//! out lazily: the partition plan needs the world's height, so workers are
//! (re-)initialised when a world is first seen, when the caller hands in a
//! different world, or after the pool changed.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{
    future::{join_all, BoxFuture},
    FutureExt,
};
use hashbrown::HashMap;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, info_span, warn, Instrument};

mod client;
mod pool;
mod topic;

pub use client::BrokerClient;

use pool::NodePool;
use topic::Topic;

use crate::{
    config::BrokerConfig,
    error::{Error, Result},
    life::{Cell, Grid},
    net::{
        retry::with_retries,
        wire::{
            BrokerRequest, BrokerResponse, Collected, InitRequest, NodeFailure,
            SectionRequest, TurnOutcome,
        },
        Endpoint, Service, Shutdown,
    },
    partition,
    worker::WorkerClient,
};

pub struct Broker {
    config: BrokerConfig,
    endpoint: Endpoint,
    pool: RwLock<NodePool>,
    /// The last world a turn was computed from or produced. Held for the
    /// whole of a turn, which serialises turns.
    world: Mutex<Option<Grid>>,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    shutdown: Shutdown,
}

impl Broker {
    /// Binds the broker's endpoint and dials the configured workers.
    pub async fn bind(config: BrokerConfig) -> Result<Arc<Self>> {
        let endpoint = Endpoint::bind(config.listen, config.connect_timeout)?;
        let broker = Arc::new(Self {
            config,
            endpoint,
            pool: RwLock::new(NodePool::default()),
            world: Mutex::new(None),
            topics: RwLock::new(HashMap::new()),
            shutdown: Shutdown::new(),
        });
        let nodes = broker.config.nodes.clone();
        broker.init_cluster(&nodes).await;
        Ok(broker)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Serves calls until the broker is shut down, probing the workers in
    /// the background if a heartbeat is configured.
    pub async fn run(self: Arc<Self>) {
        let span = info_span!("broker", addr = ?self.local_addr().ok());
        let endpoint = self.endpoint.clone();
        let shutdown = self.shutdown.clone();
        if let Some(interval) = self.config.heartbeat {
            tokio::spawn(self.clone().heartbeat(interval).instrument(span.clone()));
        }
        async move {
            info!("serving");
            endpoint.serve(self, shutdown).await;
        }
        .instrument(span)
        .await
    }

    /// Runs [`Broker::run`] on a new task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    /// Addresses of the workers currently in the pool, in ring order.
    pub async fn nodes(&self) -> Vec<SocketAddr> {
        self.pool.read().await.addrs()
    }

    /// Dials `addrs` and adds every reachable worker to the pool. Returns the
    /// pool size afterwards.
    pub async fn init_cluster(&self, addrs: &[SocketAddr]) -> usize {
        let connected = pool::dial_all(&self.endpoint, addrs).await;
        let mut pool = self.pool.write().await;
        pool.extend(connected);
        pool.len()
    }

    /// Advances `world` by one turn across the ring and returns the new world
    /// with every cell that flipped.
    ///
    /// If any worker fails the turn is voided: nothing is merged and the
    /// error lists every failing worker. Workers that could not be reached
    /// are dropped from the pool, and the next turn lays the ring out afresh.
    pub async fn run_gol(&self, world: Grid, threads: u32) -> Result<TurnOutcome> {
        if self.shutdown.is_triggered() {
            return Err(Error::ShuttingDown);
        }
        world.validate()?;
        let mut current = self.world.lock().await;
        if self.pool.read().await.is_empty() {
            return Err(Error::PoolExhausted);
        }

        let stale = self.pool.read().await.is_stale();
        let clients = if stale || (*current).as_ref() != Some(&world) {
            let seeded = self.seed(&world).await?;
            *current = Some(world.clone());
            seeded
        } else {
            self.pool.read().await.active(world.height()).to_vec()
        };
        let turn_timeout = self.config.turn_timeout;
        let turns = clients.iter().map(|client| async move {
            let result =
                tokio::time::timeout(turn_timeout, client.next_turn(threads))
                    .await;
            (client.addr(), result)
        });

        let mut flipped: Vec<Cell> = Vec::new();
        let mut failures = Vec::new();
        let mut unreachable = Vec::new();
        for (addr, result) in join_all(turns).await {
            match result {
                Ok(Ok(cells)) => flipped.extend(cells),
                Ok(Err(e)) => {
                    if e.is_transport() {
                        unreachable.push(addr);
                    }
                    failures.push(NodeFailure {
                        addr: addr.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    unreachable.push(addr);
                    failures.push(NodeFailure {
                        addr: addr.to_string(),
                        reason: format!("no answer within {:?}", turn_timeout),
                    });
                }
            }
        }

        if !failures.is_empty() {
            let mut pool = self.pool.write().await;
            pool.evict(&unreachable);
            // workers that finished the turn already applied it
            pool.invalidate();
            warn!(failed = failures.len(), "turn voided");
            return Err(Error::TurnFailed(failures));
        }

        let mut next = world;
        if let Err(e) = next.apply_flips(&flipped) {
            self.pool.write().await.invalidate();
            return Err(e);
        }
        debug!(flipped = flipped.len(), "turn merged");
        *current = Some(next.clone());
        Ok(TurnOutcome {
            world: next,
            flipped,
        })
    }

    /// Hands every active worker its slice of `world` and its ring
    /// neighbours. Unreachable workers are evicted and the layout retried
    /// over the survivors. Returns the workers that now form the ring.
    async fn seed(&self, world: &Grid) -> Result<Vec<WorkerClient>> {
        loop {
            let (clients, generation) = {
                let pool = self.pool.read().await;
                if pool.is_empty() {
                    return Err(Error::PoolExhausted);
                }
                (pool.active(world.height()).to_vec(), pool.generation())
            };
            let requests = Self::layout(world, &clients)?;
            let turn_timeout = self.config.turn_timeout;
            let inits = clients.iter().zip(requests).map(|(client, request)| {
                async move {
                    let result =
                        tokio::time::timeout(turn_timeout, client.init(request))
                            .await;
                    (client.addr(), result)
                }
            });

            let mut failures = Vec::new();
            let mut unreachable = Vec::new();
            for (addr, result) in join_all(inits).await {
                let reason = match result {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => {
                        if e.is_transport() {
                            unreachable.push(addr);
                        }
                        e.to_string()
                    }
                    Err(_) => {
                        unreachable.push(addr);
                        format!("no answer within {:?}", turn_timeout)
                    }
                };
                failures.push(NodeFailure {
                    addr: addr.to_string(),
                    reason,
                });
            }

            let mut pool = self.pool.write().await;
            if failures.is_empty() {
                pool.mark_seeded(generation);
                info!(
                    workers = clients.len(),
                    width = world.width(),
                    height = world.height(),
                    "ring seeded"
                );
                return Ok(clients);
            }
            if unreachable.is_empty() {
                pool.invalidate();
                return Err(Error::TurnFailed(failures));
            }
            pool.evict(&unreachable);
        }
    }

    /// One `Init` per client: its rows and its place in the ring.
    fn layout(world: &Grid, clients: &[WorkerClient]) -> Result<Vec<InitRequest>> {
        let n = clients.len();
        let addrs: Vec<String> =
            clients.iter().map(|c| c.addr().to_string()).collect();
        partition::plan(world.height(), n)?
            .into_iter()
            .enumerate()
            .map(|(i, rows)| {
                let (previous, next) = partition::ring_neighbours(i, n);
                Ok(InitRequest {
                    start_y: rows.start,
                    rows: world.slice_rows(rows)?,
                    self_addr: addrs[i].clone(),
                    previous: addrs[previous].clone(),
                    next: addrs[next].clone(),
                })
            })
            .collect()
    }

    /// Shuts every worker down, then stops serving. Calls in flight finish
    /// first.
    pub async fn shut_down(&self) {
        let clients = self.pool.read().await.clients().to_vec();
        let policy = self.config.liveness;
        let calls = clients.iter().map(|client| async move {
            let result =
                with_retries(policy, "ShutDown", || client.shut_down()).await;
            (client.addr(), result)
        });
        for (addr, result) in join_all(calls).await {
            if let Err(e) = result {
                warn!(%addr, "worker did not acknowledge shutdown: {}", e);
            }
        }
        info!(workers = clients.len(), "shutting down");
        self.shutdown.trigger();
    }

    async fn heartbeat(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_liveness().await,
                _ = self.shutdown.wait() => break,
            }
        }
        debug!("heartbeat stopped");
    }

    /// Calls `CheckWorking` on every worker and evicts those that fail or
    /// report they are stopping.
    async fn check_liveness(&self) {
        let clients = self.pool.read().await.clients().to_vec();
        let policy = self.config.liveness;
        let checks = clients.iter().map(|client| async move {
            let result =
                with_retries(policy, "CheckWorking", || client.check_working())
                    .await;
            (client.addr(), result)
        });
        let dead: Vec<SocketAddr> = join_all(checks)
            .await
            .into_iter()
            .filter_map(|(addr, result)| match result {
                Ok(true) => None,
                Ok(false) => {
                    warn!(%addr, "worker is stopping");
                    Some(addr)
                }
                Err(e) => {
                    warn!(%addr, "worker failed its liveness check: {}", e);
                    Some(addr)
                }
            })
            .collect();
        if !dead.is_empty() {
            self.pool.write().await.evict(&dead);
        }
    }

    /// Creates a topic with one response slot per worker in the pool.
    pub async fn create_channel(&self, topic: String, buffer: u32) -> String {
        let mut topics = self.topics.write().await;
        if topics.contains_key(&topic) {
            return format!("topic {} already exists", topic);
        }
        let workers = self.pool.read().await.addrs();
        let created = Topic::new(workers, buffer);
        let status = format!(
            "created topic {} with {} slot(s) of {}",
            topic,
            created.len(),
            buffer.max(1)
        );
        topics.insert(topic, Arc::new(created));
        status
    }

    /// Splits the requested rows across the pool, has every worker compute
    /// its share, and drops each result into that worker's slot.
    pub async fn publish(
        &self,
        topic: &str,
        request: SectionRequest,
    ) -> Result<String> {
        let slots = self.topic(topic).await?;
        let clients = self.pool.read().await.clients().to_vec();
        if clients.is_empty() {
            return Err(Error::PoolExhausted);
        }
        request.world.validate()?;
        request.validate()?;

        let rows = request.start_y..request.end_y;
        let parts = clients.len().min(rows.len());
        let ranges = partition::plan_within(rows, parts)?;
        let turn_timeout = self.config.turn_timeout;
        let deposit_timeout = self.config.deposit_timeout;
        let slots = &slots;
        let request = &request;
        let calls = clients.iter().zip(ranges).map(|(client, ys)| async move {
            let section = SectionRequest {
                world: request.world.clone(),
                start_x: request.start_x,
                end_x: request.end_x,
                start_y: ys.start,
                end_y: ys.end,
            };
            let addr = client.addr();
            let result = match tokio::time::timeout(
                turn_timeout,
                client.calculate_section(section),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "CalculateSection on {} after {:?}",
                    addr, turn_timeout
                ))),
            };
            let deposited = match result {
                Ok(result) => slots.deposit(addr, result, deposit_timeout).await,
                Err(e) => Err(e),
            };
            match deposited {
                Ok(()) => true,
                Err(e) => {
                    warn!(%addr, "dropping section: {}", e);
                    false
                }
            }
        });
        let delivered =
            join_all(calls).await.into_iter().filter(|ok| *ok).count();
        Ok(format!(
            "published {} of {} section(s) to {}",
            delivered, parts, topic
        ))
    }

    /// Takes one result per slot and pastes them into a fresh grid. Slots
    /// that stay empty are left out rather than failing the call.
    pub async fn collect_responses(
        &self,
        topic: &str,
        width: usize,
        height: usize,
    ) -> Result<Collected> {
        let slots = self.topic(topic).await?;
        let results = slots.collect(self.config.collect).await;
        topic::merge(width, height, results)
    }

    async fn topic(&self, topic: &str) -> Result<Arc<Topic>> {
        self.topics
            .read()
            .await
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))
    }
}

impl Service for Broker {
    type Request = BrokerRequest;
    type Response = BrokerResponse;

    fn handle(
        self: Arc<Self>,
        request: BrokerRequest,
    ) -> BoxFuture<'static, BrokerResponse> {
        async move {
            let response: BrokerResponse = match request {
                BrokerRequest::RunGol { world, threads } => self
                    .run_gol(world, threads)
                    .await
                    .map(BrokerResponse::Turn)
                    .into(),
                BrokerRequest::CreateChannel { topic, buffer } => {
                    BrokerResponse::Status(
                        self.create_channel(topic, buffer).await,
                    )
                }
                BrokerRequest::Publish { topic, request } => self
                    .publish(&topic, request)
                    .await
                    .map(BrokerResponse::Status)
                    .into(),
                BrokerRequest::CollectResponses {
                    topic,
                    width,
                    height,
                } => self
                    .collect_responses(&topic, width, height)
                    .await
                    .map(BrokerResponse::Collected)
                    .into(),
                BrokerRequest::ShutDown => {
                    self.shut_down().await;
                    BrokerResponse::Ack
                }
            };
            response
        }
        .boxed()
    }
}
