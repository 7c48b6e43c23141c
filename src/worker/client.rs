use std::net::SocketAddr;

use crate::{
    error::{Error, Result},
    life::Cell,
    net::{
        wire::{
            InitRequest, SectionRequest, SectionResult, WorkerRequest,
            WorkerResponse,
        },
        Endpoint, Link,
    },
};

/// Typed handle for calling a worker.
///
/// Can be cloned to obtain another handle to the same connection.
#[derive(Clone)]
pub struct WorkerClient {
    link: Link,
}

impl WorkerClient {
    pub async fn connect(endpoint: &Endpoint, addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            link: endpoint.connect(addr).await?,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.link.remote_addr()
    }

    /// Closes the connection; calls in flight fail.
    pub fn close(&self) {
        self.link.close();
    }

    pub async fn init(&self, request: InitRequest) -> Result<()> {
        match self.call(WorkerRequest::Init(request)).await? {
            WorkerResponse::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse("Init")),
        }
    }

    pub async fn first_line(&self, turn: u64) -> Result<Vec<u8>> {
        match self.call(WorkerRequest::GetFirstLine { turn }).await? {
            WorkerResponse::HaloLine(line) => Ok(line),
            _ => Err(Error::UnexpectedResponse("GetFirstLine")),
        }
    }

    pub async fn last_line(&self, turn: u64) -> Result<Vec<u8>> {
        match self.call(WorkerRequest::GetLastLine { turn }).await? {
            WorkerResponse::HaloLine(line) => Ok(line),
            _ => Err(Error::UnexpectedResponse("GetLastLine")),
        }
    }

    pub async fn next_turn(&self, threads: u32) -> Result<Vec<Cell>> {
        match self.call(WorkerRequest::NextTurn { threads }).await? {
            WorkerResponse::Flipped(cells) => Ok(cells),
            _ => Err(Error::UnexpectedResponse("NextTurn")),
        }
    }

    pub async fn calculate_section(
        &self,
        request: SectionRequest,
    ) -> Result<SectionResult> {
        match self.call(WorkerRequest::CalculateSection(request)).await? {
            WorkerResponse::Section(result) => Ok(result),
            _ => Err(Error::UnexpectedResponse("CalculateSection")),
        }
    }

    pub async fn check_working(&self) -> Result<bool> {
        match self.call(WorkerRequest::CheckWorking).await? {
            WorkerResponse::Working(ok) => Ok(ok),
            _ => Err(Error::UnexpectedResponse("CheckWorking")),
        }
    }

    pub async fn shut_down(&self) -> Result<()> {
        match self.call(WorkerRequest::ShutDown).await? {
            WorkerResponse::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse("ShutDown")),
        }
    }

    /// Makes the call and turns a reported fault into an error.
    async fn call(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        match self.link.call(&request).await? {
            WorkerResponse::Failed(fault) => Err(fault.into()),
            response => Ok(response),
        }
    }
}
