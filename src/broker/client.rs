use std::net::SocketAddr;

use crate::{
    error::{Error, Result},
    life::Grid,
    net::{
        wire::{
            BrokerRequest, BrokerResponse, Collected, SectionRequest,
            TurnOutcome,
        },
        Endpoint, Link,
    },
};

/// Typed handle for calling a broker.
///
/// Can be cloned to obtain another handle to the same connection.
#[derive(Clone)]
pub struct BrokerClient {
    link: Link,
}

impl BrokerClient {
    pub async fn connect(endpoint: &Endpoint, addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            link: endpoint.connect(addr).await?,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.link.remote_addr()
    }

    /// Advances `world` by one turn on the cluster.
    pub async fn run_gol(&self, world: Grid, threads: u32) -> Result<TurnOutcome> {
        match self.call(BrokerRequest::RunGol { world, threads }).await? {
            BrokerResponse::Turn(outcome) => Ok(outcome),
            _ => Err(Error::UnexpectedResponse("RunGol")),
        }
    }

    pub async fn create_channel(
        &self,
        topic: impl Into<String>,
        buffer: u32,
    ) -> Result<String> {
        let request = BrokerRequest::CreateChannel {
            topic: topic.into(),
            buffer,
        };
        match self.call(request).await? {
            BrokerResponse::Status(status) => Ok(status),
            _ => Err(Error::UnexpectedResponse("CreateChannel")),
        }
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        request: SectionRequest,
    ) -> Result<String> {
        let request = BrokerRequest::Publish {
            topic: topic.into(),
            request,
        };
        match self.call(request).await? {
            BrokerResponse::Status(status) => Ok(status),
            _ => Err(Error::UnexpectedResponse("Publish")),
        }
    }

    pub async fn collect_responses(
        &self,
        topic: impl Into<String>,
        width: usize,
        height: usize,
    ) -> Result<Collected> {
        let request = BrokerRequest::CollectResponses {
            topic: topic.into(),
            width,
            height,
        };
        match self.call(request).await? {
            BrokerResponse::Collected(collected) => Ok(collected),
            _ => Err(Error::UnexpectedResponse("CollectResponses")),
        }
    }

    /// Shuts down every worker, then the broker itself.
    pub async fn shut_down(&self) -> Result<()> {
        match self.call(BrokerRequest::ShutDown).await? {
            BrokerResponse::Ack => Ok(()),
            _ => Err(Error::UnexpectedResponse("ShutDown")),
        }
    }

    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse> {
        match self.link.call(&request).await? {
            BrokerResponse::Failed(fault) => Err(fault.into()),
            response => Ok(response),
        }
    }
}
