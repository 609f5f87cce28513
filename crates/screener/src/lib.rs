//! Screener (C4 + C5): debounced triage dispatch and the per-cycle
//! workflow state machine, built against narrow trait seams so the
//! workflow can be driven by fakes in tests and by the real
//! `mail-api`/`contacts` clients in production via [`adapters`].

pub mod adapters;
pub mod dispatcher;
pub mod traits;
pub mod workflow;

pub use adapters::{ContactStoreAdapter, MailApiAdapter};
pub use dispatcher::{wait_for_trigger, TriggerReason};
pub use traits::{ContactStore, MailApi};
pub use workflow::ScreenerWorkflow;
