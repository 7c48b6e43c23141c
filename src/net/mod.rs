//! Request/response calls between nodes over QUIC.
//!
//! Each node owns one [`Endpoint`], which both serves its own [`Service`] and
//! dials other nodes. A call opens a bidirectional stream, writes one
//! length-prefixed rkyv frame, and reads one back.

use std::sync::Arc;

use futures::future::BoxFuture;

mod endpoint;
mod frame;
mod link;
pub mod retry;
mod shutdown;
pub mod wire;

pub use endpoint::Endpoint;
pub use link::Link;
pub use shutdown::Shutdown;

use wire::WireMessage;

/// Name every node's certificate is issued for.
const SERVER_NAME: &str = "torus";

/// Largest frame either side will read or write (256 MiB).
const MAX_FRAME_LEN: u32 = 256 << 20;

/// A node's typed call surface.
pub trait Service: Send + Sync + 'static {
    type Request: WireMessage;
    type Response: WireMessage;

    fn handle(
        self: Arc<Self>,
        request: Self::Request,
    ) -> BoxFuture<'static, Self::Response>;
}
