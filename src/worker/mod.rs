//! A worker node: owns one contiguous slice of rows and advances it turn by
//! turn, swapping boundary rows with its two ring neighbours.
//!
//! Every worker is requester and responder at once. During a turn it fetches
//! the row above its slice from the previous neighbour and the row below from
//! the next neighbour, and in parallel waits until both neighbours have
//! fetched its own boundary rows. Only then does it compute, so no worker can
//! run ahead of its neighbours: the ring moves in lockstep without any
//! central turn counter.

use std::{net::SocketAddr, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, debug_span, info, info_span, warn, Instrument};

mod client;
mod compute;
mod session;

pub use client::WorkerClient;
pub use session::TurnPhase;

use session::{Neighbour, Session};

use crate::{
    config::WorkerConfig,
    error::{Error, Result},
    life::{self, Cell, Grid},
    net::{
        wire::{
            InitRequest, SectionRequest, SectionResult, WorkerRequest,
            WorkerResponse,
        },
        Endpoint, Service, Shutdown,
    },
};

pub struct Worker {
    config: WorkerConfig,
    endpoint: Endpoint,
    session: RwLock<Option<Arc<Session>>>,
    phase: Mutex<TurnPhase>,
    shutdown: Shutdown,
}

impl Worker {
    /// Binds the worker's endpoint. Nothing is served until [`Worker::run`].
    pub fn bind(config: WorkerConfig) -> Result<Arc<Self>> {
        let endpoint = Endpoint::bind(config.listen, config.connect_timeout)?;
        Ok(Arc::new(Self {
            config,
            endpoint,
            session: RwLock::new(None),
            phase: Mutex::new(TurnPhase::Idle),
            shutdown: Shutdown::new(),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint.local_addr()
    }

    /// Serves calls until the worker is shut down.
    pub async fn run(self: Arc<Self>) {
        let span = info_span!("worker", addr = ?self.local_addr().ok());
        let endpoint = self.endpoint.clone();
        let shutdown = self.shutdown.clone();
        async move {
            info!("serving");
            endpoint.serve(self, shutdown).await;
        }
        .instrument(span)
        .await
    }

    /// Runs [`Worker::run`] on a new task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run())
    }

    /// Stops accepting calls; in-flight calls finish first.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub async fn phase(&self) -> TurnPhase {
        *self.phase.lock().await
    }

    /// A copy of the rows this worker currently owns.
    pub async fn rows(&self) -> Result<Grid> {
        Ok(self.session().await?.snapshot().await)
    }

    /// Takes ownership of a partition and connects to both ring neighbours.
    /// Replaces any previous partition, neighbours and barrier state.
    pub async fn init(&self, request: InitRequest) -> Result<()> {
        let InitRequest {
            rows,
            start_y,
            self_addr,
            previous,
            next,
        } = request;
        rows.validate()?;

        let previous_neighbour = self.neighbour(&self_addr, &previous).await?;
        let next_neighbour = if next == previous {
            previous_neighbour.clone()
        } else {
            self.neighbour(&self_addr, &next).await?
        };

        info!(
            start_y,
            rows = rows.height(),
            %previous,
            %next,
            "initialised"
        );
        let session =
            Session::new(rows, start_y, previous_neighbour, next_neighbour);
        *self.session.write().await = Some(Arc::new(session));
        *self.phase.lock().await = TurnPhase::Idle;
        Ok(())
    }

    /// The first owned row, for a neighbour computing `turn`. Only a
    /// request for the turn this worker is on counts towards its barrier.
    pub async fn first_line(&self, turn: u64) -> Result<Vec<u8>> {
        self.session().await?.take_first_line(turn).await
    }

    /// The last owned row, for a neighbour computing `turn`.
    pub async fn last_line(&self, turn: u64) -> Result<Vec<u8>> {
        self.session().await?.take_last_line(turn).await
    }

    /// Turns completed since the last `Init`.
    pub async fn turn(&self) -> Result<u64> {
        Ok(self.session().await?.turn())
    }

    /// Runs one turn: halo exchange, barrier, computation. Returns the cells
    /// that flipped, in global coordinates.
    ///
    /// On failure the owned rows are left as they were.
    pub async fn next_turn(&self, threads: u32) -> Result<Vec<Cell>> {
        let session = self.session().await?;
        {
            let mut phase = self.phase.lock().await;
            if *phase != TurnPhase::Idle {
                return Err(Error::Busy);
            }
            *phase = TurnPhase::RequestingHalo;
        }

        let span = debug_span!("turn", start_y = session.start_y());
        let result = self.run_turn(&session, threads).instrument(span).await;
        self.set_phase(TurnPhase::Idle).await;
        if let Err(e) = &result {
            warn!("turn failed: {}", e);
        }
        result
    }

    async fn run_turn(
        &self,
        session: &Session,
        threads: u32,
    ) -> Result<Vec<Cell>> {
        let policy = self.config.halo;
        let halo = async {
            let halo = session.fetch_halo(policy).await?;
            self.set_phase(TurnPhase::AwaitingOwnRequests).await;
            Ok::<_, Error>(halo)
        };
        let ((top, bottom), ()) = tokio::try_join!(
            halo,
            session.await_own_requests(policy.deadline())
        )?;

        self.set_phase(TurnPhase::Computing).await;
        let extended = Arc::new(session.extended(&top, &bottom).await?);
        let flipped =
            compute::flips_in_parallel(extended, session.start_y(), threads)
                .await?;
        session.apply(&flipped).await?;
        debug!(flipped = flipped.len(), "turn computed");
        Ok(flipped)
    }

    /// Advances one section of a supplied world. Holds no state.
    pub fn calculate_section(request: SectionRequest) -> Result<SectionResult> {
        request.world.validate()?;
        request.validate()?;
        let SectionRequest {
            world,
            start_x,
            end_x,
            start_y,
            end_y,
        } = request;
        let section =
            life::next_section(&world, start_y..end_y, start_x..end_x)?;
        let alive_cells = section
            .alive_cells()
            .into_iter()
            .map(|cell| Cell::new(cell.x + start_x, cell.y + start_y))
            .collect();
        Ok(SectionResult {
            start_x,
            end_x,
            start_y,
            end_y,
            section,
            alive_cells,
        })
    }

    pub fn check_working(&self) -> bool {
        !self.shutdown.is_triggered()
    }

    async fn session(&self) -> Result<Arc<Session>> {
        self.session.read().await.clone().ok_or(Error::NotInitialised)
    }

    async fn set_phase(&self, phase: TurnPhase) {
        *self.phase.lock().await = phase;
    }

    async fn neighbour(&self, self_addr: &str, addr: &str) -> Result<Neighbour> {
        if addr == self_addr {
            return Ok(Neighbour::Local);
        }
        let remote: SocketAddr = addr.parse().map_err(|_| {
            Error::Connection(format!("invalid neighbour address {}", addr))
        })?;
        let client = WorkerClient::connect(&self.endpoint, remote).await?;
        Ok(Neighbour::Remote(client))
    }
}

impl Service for Worker {
    type Request = WorkerRequest;
    type Response = WorkerResponse;

    fn handle(
        self: Arc<Self>,
        request: WorkerRequest,
    ) -> BoxFuture<'static, WorkerResponse> {
        async move {
            let response: WorkerResponse = match request {
                WorkerRequest::Init(init) => self.init(init).await.into(),
                WorkerRequest::GetFirstLine { turn } => self
                    .first_line(turn)
                    .await
                    .map(WorkerResponse::HaloLine)
                    .into(),
                WorkerRequest::GetLastLine { turn } => self
                    .last_line(turn)
                    .await
                    .map(WorkerResponse::HaloLine)
                    .into(),
                WorkerRequest::NextTurn { threads } => self
                    .next_turn(threads)
                    .await
                    .map(WorkerResponse::Flipped)
                    .into(),
                WorkerRequest::CalculateSection(section) => {
                    tokio::task::spawn_blocking(move || {
                        Worker::calculate_section(section)
                    })
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))
                    .and_then(|result| result)
                    .map(WorkerResponse::Section)
                    .into()
                }
                WorkerRequest::CheckWorking => {
                    WorkerResponse::Working(self.check_working())
                }
                WorkerRequest::ShutDown => {
                    info!("shutdown requested");
                    self.shutdown();
                    WorkerResponse::Ack
                }
            };
            response
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;
    use crate::life::ALIVE;

    fn config() -> WorkerConfig {
        WorkerConfig::builder()
            .listen(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
            .build()
    }

    fn init_alone(worker: &Worker, rows: Grid) -> InitRequest {
        let addr = worker.local_addr().unwrap().to_string();
        InitRequest {
            rows,
            start_y: 0,
            self_addr: addr.clone(),
            previous: addr.clone(),
            next: addr,
        }
    }

    #[tokio::test]
    async fn turns_need_an_init_first() {
        let worker = Worker::bind(config()).unwrap();
        assert!(matches!(worker.next_turn(1).await, Err(Error::NotInitialised)));
        assert!(matches!(worker.first_line(0).await, Err(Error::NotInitialised)));
    }

    #[tokio::test]
    async fn single_node_ring_is_its_own_neighbour() {
        let worker = Worker::bind(config()).unwrap();
        let blinker =
            Grid::with_alive(5, 5, [1, 2, 3].map(|x| Cell::new(x, 2))).unwrap();
        worker.init(init_alone(&worker, blinker.clone())).await.unwrap();

        let flipped = worker.next_turn(2).await.unwrap();
        assert_eq!(flipped.len(), 4);
        assert_eq!(worker.phase().await, TurnPhase::Idle);
        worker.next_turn(2).await.unwrap();
        assert_eq!(worker.rows().await.unwrap(), blinker);
        assert_eq!(worker.turn().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn halo_lines_are_copies() {
        let worker = Worker::bind(config()).unwrap();
        let rows = Grid::with_alive(3, 2, [Cell::new(0, 0)]).unwrap();
        worker.init(init_alone(&worker, rows)).await.unwrap();

        let first = worker.first_line(0).await.unwrap();
        let last = worker.last_line(0).await.unwrap();
        assert_eq!(first, vec![ALIVE, 0, 0]);
        assert_eq!(last, vec![0, 0, 0]);

        // the lone cell dies
        worker.next_turn(1).await.unwrap();
        assert_eq!(worker.turn().await.unwrap(), 1);
        assert_eq!(first, vec![ALIVE, 0, 0]);
        assert_eq!(worker.first_line(1).await.unwrap(), vec![0, 0, 0]);
        assert!(matches!(
            worker.first_line(0).await,
            Err(Error::OutOfTurn { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_neighbour_fails_init() {
        let worker = Worker::bind(
            WorkerConfig::builder()
                .listen(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
                .connect_timeout(std::time::Duration::from_millis(200))
                .build(),
        )
        .unwrap();
        let mut request = init_alone(&worker, Grid::new(3, 3));
        request.next = "not an address".into();
        assert!(matches!(
            worker.init(request).await,
            Err(Error::Connection(_))
        ));
        assert!(matches!(worker.rows().await, Err(Error::NotInitialised)));
    }

    #[test]
    fn sections_report_global_alive_cells() {
        let world = Grid::with_alive(6, 6, [1, 2, 3].map(|x| Cell::new(x, 2)))
            .unwrap();
        let result = Worker::calculate_section(SectionRequest {
            world: world.clone(),
            start_x: 0,
            end_x: 6,
            start_y: 1,
            end_y: 4,
        })
        .unwrap();
        assert_eq!(
            result.alive_cells,
            vec![Cell::new(2, 1), Cell::new(2, 2), Cell::new(2, 3)]
        );

        let inverted = SectionRequest {
            world,
            start_x: 4,
            end_x: 2,
            start_y: 0,
            end_y: 6,
        };
        assert!(matches!(
            Worker::calculate_section(inverted),
            Err(Error::Bounds(_))
        ));
    }
}
