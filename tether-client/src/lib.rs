//! Tether client library exports.
//!
//! Glue between the cache core and the surrounding application: session
//! lifecycle, the inbound feed pump, configuration and tracing setup.

pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod telemetry;

pub use config::{ClientConfig, LogConfig};
pub use error::{ClientError, ClientResult};
pub use realtime::{decode_push_frame, spawn_inbound_pump, PumpStats};
pub use session::{CacheSession, SessionSummary};
pub use telemetry::init_tracing;
