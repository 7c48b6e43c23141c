//! Conway's Game of Life computed by a ring of worker nodes.
//!
//! A [`broker::Broker`] slices the world into contiguous row ranges and hands
//! one to every [`worker::Worker`]. Each turn the workers swap their boundary
//! rows ("halos") with their two ring neighbours, compute the next state of
//! their own rows, and report the cells that flipped. The broker merges the
//! flip lists into its copy of the world.
//!
//! All traffic runs over QUIC (see [`net`]); every call is one typed request
//! and one typed response on its own bidirectional stream.

pub mod broker;
pub mod config;
pub mod error;
pub mod life;
pub mod net;
pub mod partition;
pub mod worker;

pub use config::{BrokerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use life::{Cell, FlippedCell, Grid, ALIVE, DEAD};
pub use net::retry::RetryPolicy;
