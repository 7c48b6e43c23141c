use std::{fmt, io};

use quinn::{ConnectError, ConnectionError, ReadExactError, WriteError};

use crate::net::wire::{Fault, NodeFailure};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    ConnectError(ConnectError),
    ConnectionError(ConnectionError),
    Io(io::Error),
    WriteError(WriteError),
    ReadExactError(ReadExactError),
    Tls(rustls::Error),
    Certificate(rcgen::RcgenError),
    CouldNotEncodeMessage,
    CouldNotDecodeMessage,
    MessageLengthOverflowed,
    UnexpectedResponse(&'static str),

    /// A node or neighbour could not be reached.
    Connection(String),
    /// A row or column range does not fit the grid it refers to.
    Bounds(String),
    /// A deadline ran out, retries included.
    Timeout(String),
    /// The broker has no connected workers.
    PoolExhausted,
    /// The worker has not received `Init` yet.
    NotInitialised,
    /// The worker is already in the middle of a turn.
    Busy,
    TopicNotFound(String),
    /// One or more workers failed during a turn; the turn was voided.
    TurnFailed(Vec<NodeFailure>),
    /// A halo row was asked for on behalf of a turn other than the one the
    /// worker is on, typically a retried call answered late.
    OutOfTurn { requested: u64, current: u64 },
    ShuttingDown,
    Internal(String),
}

impl Error {
    /// True when the failure happened on the link itself rather than being
    /// reported by the remote node.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ConnectError(_)
                | Error::ConnectionError(_)
                | Error::Io(_)
                | Error::WriteError(_)
                | Error::ReadExactError(_)
                | Error::CouldNotDecodeMessage
                | Error::MessageLengthOverflowed
        )
    }

    /// Converts the error into the form that crosses the wire.
    pub fn to_fault(&self) -> Fault {
        match self {
            Error::Bounds(msg) => Fault::Bounds(msg.clone()),
            Error::Timeout(msg) => Fault::Timeout(msg.clone()),
            Error::PoolExhausted => Fault::PoolExhausted,
            Error::NotInitialised => Fault::NotInitialised,
            Error::Busy => Fault::Busy,
            Error::TopicNotFound(topic) => Fault::TopicNotFound(topic.clone()),
            Error::TurnFailed(failures) => Fault::TurnFailed(failures.clone()),
            Error::OutOfTurn { requested, current } => Fault::OutOfTurn {
                requested: *requested,
                current: *current,
            },
            Error::ShuttingDown => Fault::ShuttingDown,
            Error::Internal(msg) => Fault::Internal(msg.clone()),
            Error::Connection(msg) => Fault::Connection(msg.clone()),
            other => Fault::Connection(other.to_string()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectError(e) => write!(f, "connect error: {}", e),
            Error::ConnectionError(e) => write!(f, "connection error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::WriteError(e) => write!(f, "write error: {}", e),
            Error::ReadExactError(e) => write!(f, "read error: {}", e),
            Error::Tls(e) => write!(f, "tls error: {}", e),
            Error::Certificate(e) => write!(f, "certificate error: {}", e),
            Error::CouldNotEncodeMessage => write!(f, "could not encode message"),
            Error::CouldNotDecodeMessage => write!(f, "could not decode message"),
            Error::MessageLengthOverflowed => {
                write!(f, "message length overflowed")
            }
            Error::UnexpectedResponse(call) => {
                write!(f, "unexpected response to {}", call)
            }
            Error::Connection(msg) => write!(f, "unreachable: {}", msg),
            Error::Bounds(msg) => write!(f, "out of bounds: {}", msg),
            Error::Timeout(msg) => write!(f, "timed out: {}", msg),
            Error::PoolExhausted => write!(f, "no workers connected"),
            Error::NotInitialised => write!(f, "worker not initialised"),
            Error::Busy => write!(f, "worker already computing a turn"),
            Error::TopicNotFound(topic) => write!(f, "topic {} not found", topic),
            Error::TurnFailed(failures) => {
                write!(f, "turn failed on {} node(s):", failures.len())?;
                for failure in failures {
                    write!(f, " [{}: {}]", failure.addr, failure.reason)?;
                }
                Ok(())
            }
            Error::OutOfTurn { requested, current } => write!(
                f,
                "halo row asked for turn {} while on turn {}",
                requested, current
            ),
            Error::ShuttingDown => write!(f, "shutting down"),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Connection(msg) => Error::Connection(msg),
            Fault::Bounds(msg) => Error::Bounds(msg),
            Fault::Timeout(msg) => Error::Timeout(msg),
            Fault::PoolExhausted => Error::PoolExhausted,
            Fault::NotInitialised => Error::NotInitialised,
            Fault::Busy => Error::Busy,
            Fault::TopicNotFound(topic) => Error::TopicNotFound(topic),
            Fault::TurnFailed(failures) => Error::TurnFailed(failures),
            Fault::OutOfTurn { requested, current } => {
                Error::OutOfTurn { requested, current }
            }
            Fault::ShuttingDown => Error::ShuttingDown,
            Fault::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<ConnectError> for Error {
    fn from(error: ConnectError) -> Self {
        Self::ConnectError(error)
    }
}

impl From<ConnectionError> for Error {
    fn from(error: ConnectionError) -> Self {
        Self::ConnectionError(error)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        Self::WriteError(e)
    }
}

impl From<ReadExactError> for Error {
    fn from(e: ReadExactError) -> Self {
        Self::ReadExactError(e)
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e)
    }
}

impl From<rcgen::RcgenError> for Error {
    fn from(e: rcgen::RcgenError) -> Self {
        Self::Certificate(e)
    }
}
