use std::net::SocketAddr;

use tracing::trace;

use super::{
    frame::{FrameRecvStream, FrameSendStream},
    wire::WireMessage,
};
use crate::error::Result;

/// A QUIC connection to another node, used for request/response calls.
///
/// Every call runs on a fresh bidirectional stream, so a link can carry any
/// number of concurrent calls. Can be cloned to obtain another handle to the
/// same connection.
#[derive(Clone)]
pub struct Link {
    conn: quinn::Connection,
    remote_addr: SocketAddr,
}

impl Link {
    pub(crate) fn new(conn: quinn::Connection, remote_addr: SocketAddr) -> Self {
        Self { conn, remote_addr }
    }

    /// Sends one request and waits for its response.
    pub async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        let (raw_tx, raw_rx) = self.conn.open_bi().await?;
        let mut tx = FrameSendStream::new(raw_tx);
        let mut rx = FrameRecvStream::new(raw_rx);
        tx.send(request).await?;
        trace!(remote = %self.remote_addr, "request sent");
        let ((), response) = tokio::try_join!(tx.finish(), rx.receive())?;
        Ok(response)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn close(&self) {
        self.conn.close(0u32.into(), b"closed");
    }
}
