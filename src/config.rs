//! Node configuration. There is no file format: callers build these with the
//! generated builders and inject the node address list.

use std::{net::SocketAddr, time::Duration};

use typed_builder::TypedBuilder;

use crate::net::retry::RetryPolicy;

#[derive(Clone, Debug, TypedBuilder)]
pub struct WorkerConfig {
    /// Address to serve calls on.
    pub listen: SocketAddr,
    /// Policy for the halo calls to the ring neighbours. Its total deadline
    /// also bounds the wait for the neighbours' own halo requests.
    #[builder(default)]
    pub halo: RetryPolicy,
    #[builder(default = Duration::from_secs(5))]
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct BrokerConfig {
    /// Address to serve calls on.
    pub listen: SocketAddr,
    /// Workers to dial at startup.
    #[builder(default)]
    pub nodes: Vec<SocketAddr>,
    #[builder(default = Duration::from_secs(5))]
    pub connect_timeout: Duration,
    /// Deadline for one worker's `NextTurn`, `Init` or `CalculateSection`.
    /// Should comfortably exceed the workers' halo deadline, so a worker
    /// stuck waiting on a dead neighbour answers before it is written off.
    #[builder(default = Duration::from_secs(60))]
    pub turn_timeout: Duration,
    /// Policy for waiting on each topic response slot.
    #[builder(default)]
    pub collect: RetryPolicy,
    /// Policy for liveness checks and shutdown calls.
    #[builder(default = RetryPolicy::builder()
        .attempts(1)
        .timeout(Duration::from_secs(2))
        .build())]
    pub liveness: RetryPolicy,
    /// How long a published response may wait for room in its slot.
    #[builder(default = Duration::from_secs(2))]
    pub deposit_timeout: Duration,
    /// Interval between liveness checks; `None` disables the heartbeat.
    #[builder(default, setter(strip_option))]
    pub heartbeat: Option<Duration>,
}
