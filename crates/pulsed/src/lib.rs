//! pulsed — wiring for the Pulse daemon.
//!
//! [`Daemon::start`] assembles probes, transport syncs, and the HTTP
//! router from a [`PulseConfig`]; the binary adds CLI parsing, tracing,
//! and the listener.

pub mod daemon;

pub use daemon::Daemon;
pub use pulse_probe::PulseConfig;
