use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    life::{Cell, Grid},
};

/// A message that can be framed onto a stream.
pub trait WireMessage: Sized + Send + Sync + 'static {
    fn encode(&self) -> Result<AlignedVec>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

macro_rules! wire_message {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireMessage for $ty {
                fn encode(&self) -> Result<AlignedVec> {
                    rkyv::to_bytes::<_, 1024>(self)
                        .map_err(|_| Error::CouldNotEncodeMessage)
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    // archived roots must sit on an aligned buffer
                    let mut aligned = AlignedVec::with_capacity(bytes.len());
                    aligned.extend_from_slice(bytes);
                    rkyv::from_bytes::<Self>(&aligned)
                        .map_err(|_| Error::CouldNotDecodeMessage)
                }
            }
        )*
    };
}

wire_message!(WorkerRequest, WorkerResponse, BrokerRequest, BrokerResponse);

/// An error reported by the remote end of a call.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum Fault {
    Connection(String),
    Bounds(String),
    Timeout(String),
    PoolExhausted,
    NotInitialised,
    Busy,
    TopicNotFound(String),
    TurnFailed(Vec<NodeFailure>),
    OutOfTurn { requested: u64, current: u64 },
    ShuttingDown,
    Internal(String),
}

/// One line of a partial-failure report.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct NodeFailure {
    pub addr: String,
    pub reason: String,
}

/// Hands a worker its partition and its place in the ring.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct InitRequest {
    /// The rows this worker owns.
    pub rows: Grid,
    /// Global index of the first owned row.
    pub start_y: usize,
    /// The address the broker knows this worker by. A neighbour with the
    /// same address is the worker itself.
    pub self_addr: String,
    pub previous: String,
    pub next: String,
}

/// A section of a full world to advance by one turn.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct SectionRequest {
    pub world: Grid,
    pub start_x: usize,
    pub end_x: usize,
    pub start_y: usize,
    pub end_y: usize,
}

impl SectionRequest {
    /// A request covering the whole world.
    pub fn whole(world: Grid) -> Self {
        Self {
            start_x: 0,
            end_x: world.width(),
            start_y: 0,
            end_y: world.height(),
            world,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_x >= self.end_x
            || self.start_y >= self.end_y
            || self.end_x > self.world.width()
            || self.end_y > self.world.height()
        {
            return Err(Error::Bounds(format!(
                "section x {}..{}, y {}..{} invalid for {}x{} world",
                self.start_x,
                self.end_x,
                self.start_y,
                self.end_y,
                self.world.width(),
                self.world.height()
            )));
        }
        Ok(())
    }
}

/// The next state of one section.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct SectionResult {
    pub start_x: usize,
    pub end_x: usize,
    pub start_y: usize,
    pub end_y: usize,
    pub section: Grid,
    /// Alive cells of the section in global coordinates.
    pub alive_cells: Vec<Cell>,
}

/// What `CollectResponses` hands back.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Collected {
    pub world: Grid,
    pub alive_cells: Vec<Cell>,
    pub results: Vec<SectionResult>,
}

/// The merged world after a turn and the cells that flipped during it.
#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct TurnOutcome {
    pub world: Grid,
    pub flipped: Vec<Cell>,
}

#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum WorkerRequest {
    Init(InitRequest),
    /// The first owned row, asked for by a neighbour computing `turn`.
    GetFirstLine { turn: u64 },
    /// The last owned row, asked for by a neighbour computing `turn`.
    GetLastLine { turn: u64 },
    NextTurn { threads: u32 },
    CalculateSection(SectionRequest),
    CheckWorking,
    ShutDown,
}

#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum WorkerResponse {
    Ack,
    HaloLine(Vec<u8>),
    Flipped(Vec<Cell>),
    Section(SectionResult),
    Working(bool),
    Failed(Fault),
}

#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum BrokerRequest {
    RunGol { world: Grid, threads: u32 },
    CreateChannel { topic: String, buffer: u32 },
    Publish { topic: String, request: SectionRequest },
    CollectResponses { topic: String, width: usize, height: usize },
    ShutDown,
}

#[derive(Archive, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[archive(check_bytes)]
pub enum BrokerResponse {
    Turn(TurnOutcome),
    Status(String),
    Collected(Collected),
    Ack,
    Failed(Fault),
}

impl<T: Into<WorkerResponse>> From<Result<T>> for WorkerResponse {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(response) => response.into(),
            Err(e) => WorkerResponse::Failed(e.to_fault()),
        }
    }
}

impl<T: Into<BrokerResponse>> From<Result<T>> for BrokerResponse {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(response) => response.into(),
            Err(e) => BrokerResponse::Failed(e.to_fault()),
        }
    }
}

impl From<()> for WorkerResponse {
    fn from(_: ()) -> Self {
        WorkerResponse::Ack
    }
}

impl From<()> for BrokerResponse {
    fn from(_: ()) -> Self {
        BrokerResponse::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_survive_unaligned_buffers() {
        let request = WorkerRequest::Init(InitRequest {
            rows: Grid::with_alive(4, 2, [Cell::new(1, 1)]).unwrap(),
            start_y: 6,
            self_addr: "127.0.0.1:8031".into(),
            previous: "127.0.0.1:8032".into(),
            next: "127.0.0.1:8033".into(),
        });
        let bytes = request.encode().unwrap();

        // shift the payload by one byte to break the original alignment
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let decoded = WorkerRequest::decode(&shifted[1..]).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = BrokerResponse::decode(&[0xff; 7]).unwrap_err();
        assert!(matches!(err, Error::CouldNotDecodeMessage));
    }

    #[test]
    fn errors_cross_the_wire_as_faults() {
        let response: BrokerResponse = Err::<(), _>(Error::PoolExhausted).into();
        let BrokerResponse::Failed(fault) = response else {
            panic!("expected a fault");
        };
        assert!(matches!(Error::from(fault), Error::PoolExhausted));
    }
}
