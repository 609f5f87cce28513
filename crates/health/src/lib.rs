//! Shared process health state and its read-only `/healthz` HTTP surface.

pub mod server;
pub mod state;

pub use server::serve;
pub use state::{HealthSnapshot, HealthState, SseStatus};
