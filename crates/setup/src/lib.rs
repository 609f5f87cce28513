//! `mailroom setup`: dry-run (default) or `--apply` reconciliation of
//! required mailboxes, action labels, and contact groups.

pub mod provisioner;
pub mod reporting;

pub use provisioner::{apply_resources, plan_resources, run_setup};
pub use reporting::{print_plan, ResourceAction, ResourceKind, ResourceStatus};
