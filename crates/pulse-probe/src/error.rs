//! Error types for probes, transports, and round trips.

use std::time::Duration;

use pulse_journal::JournalError;
use thiserror::Error;

use crate::status::Signal;

/// Errors returned when talking to a probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe {0} has terminated")]
    Terminated(String),

    #[error("probe {name} did not answer within {timeout:?}")]
    AskTimeout { name: String, timeout: Duration },
}

/// Errors from a transport `go`/`stop` call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport call exceeded {0:?}")]
    Deadline(Duration),

    #[error("transport consumer has gone away")]
    Closed,

    #[error("transport refused: {0}")]
    Refused(String),
}

/// A transport call failed while mirroring a probe.
///
/// Fatal to the sync component that raised it; the supervisor restarts
/// the component rather than retrying in place.
#[derive(Debug, Error)]
#[error("failed to update {signal} transport: {source}")]
pub struct ProbeUpdateError {
    pub signal: Signal,
    #[source]
    pub source: TransportError,
}

/// Why one axis of a persistence round trip failed.
#[derive(Debug, Clone, Error)]
pub enum RoundTripFailure {
    #[error(transparent)]
    Store(#[from] JournalError),

    #[error("record {seq} written by the previous round trip was not recovered")]
    Lost { seq: u64 },
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown {signal} provider '{value}', expected one of default, cluster, persistence")]
    UnknownProvider { signal: Signal, value: String },

    #[error("the {provider} provider does not support {signal}")]
    UnsupportedProvider { signal: Signal, provider: String },

    #[error("invalid duration '{0}'")]
    Duration(String),
}
