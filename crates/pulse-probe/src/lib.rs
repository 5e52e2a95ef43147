//! pulse-probe — liveness and readiness probes for Pulse.
//!
//! Probes are small tokio tasks that own a health [`Status`] and push it
//! to subscribers. Transport syncs subscribe to probes and mirror their
//! status onto an external signal (a file, a listening socket, or a
//! channel) so an orchestrator can see it.
//!
//! # Architecture
//!
//! ```text
//! MembershipFeed ──► cluster probes ─┐
//!                                    ├─► StatusHub ──► subscribers
//! JournalStore ◄── round-trip worker │       │
//!        persistence probe ──────────┘       ▼
//!                           TransportSync / AggregateTransportSync
//!                                    │  (supervised, restarted on failure)
//!                                    ▼
//!                        Transport: file | tcp | channel
//! ```
//!
//! # Failure model
//!
//! A probe never fails. Store errors become "down" statuses, and a
//! crashed or stalled round-trip worker is replaced after the retry delay.
//! A sync whose transport call fails returns a [`ProbeUpdateError`]; the
//! [`supervisor`] starts a fresh run that re-subscribes from scratch.
//! Every sync run ends with one bounded, best-effort `stop`.

pub mod config;
pub mod error;
pub mod membership;
pub mod probe;
pub mod protocol;
pub mod status;
pub mod supervisor;
pub mod sync;
pub mod transport;

pub use config::{ProviderKind, PulseConfig, TransportSpec};
pub use error::{ConfigError, ProbeError, ProbeUpdateError, RoundTripFailure, TransportError};
pub use membership::{ClusterSnapshot, MemberEvent, MembershipFeed, MembershipState, NodeId};
pub use probe::{ProbeDeps, build_probe};
pub use protocol::{ProbeHandle, Subscriber, SubscriberId, Subscription};
pub use status::{Signal, Status};
pub use supervisor::{Component, RestartStrategy, Supervised, SupervisorExit, supervise};
pub use sync::{AggregateTransportSync, TransportSync};
pub use transport::{ChannelTransport, FileTransport, TcpTransport, Transport, TransportSignal};
