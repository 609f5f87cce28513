//! Re-export hub for the handful of third-party crates nearly every
//! mailroom crate touches, so call sites write `common::prelude::{tracing, anyhow}`
//! instead of juggling a dozen separate `Cargo.toml` entries per crate.

pub mod prelude {
    pub use anyhow;
    pub use chrono;
    pub use reqwest;
    pub use serde;
    pub use serde_json;
    pub use tokio;
    pub use tracing;
}
