//! Thin JMAP-style client over `reqwest` for a hosted mail provider:
//! session discovery, mailbox resolution, email queries and batch moves.

pub mod client;
pub mod error;
pub mod types;

pub use client::MailApiClient;
pub use error::MailApiError;
pub use types::{normalize_sender, Sender};
