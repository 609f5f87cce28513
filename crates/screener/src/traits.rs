//! Narrow trait seams over C1 (mail API) and C2 (contact store) so the
//! workflow in [`crate::workflow`] can be driven by fakes in tests,
//! mirroring how the teacher's workflow tasks are built against
//! `common::prelude` trait objects rather than concrete clients.

use std::collections::HashMap;

use async_trait::async_trait;
use mail_api::Sender;

use contacts::{ContactType, UpsertResult};

#[async_trait]
pub trait MailApi: Send + Sync {
    async fn query_emails(
        &self,
        mailbox_id: &str,
        sender: Option<&str>,
    ) -> anyhow::Result<Vec<String>>;
    async fn get_senders(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Sender>>;
    async fn get_mailbox_ids(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Vec<String>>>;
    async fn add_label(&self, email_id: &str, mailbox_id: &str) -> anyhow::Result<()>;
    async fn remove_label(&self, email_id: &str, mailbox_id: &str) -> anyhow::Result<()>;
    async fn batch_move_emails(
        &self,
        email_ids: &[String],
        remove_mailbox_id: &str,
        add_mailbox_ids: &[String],
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Some(group_name) if the sender has an existing contact that belongs
    /// to a group other than `target_group`.
    async fn find_conflicting_group(
        &self,
        email: &str,
        target_group: &str,
    ) -> anyhow::Result<Option<String>>;

    async fn upsert_contact(
        &self,
        email: &str,
        display_name: Option<&str>,
        group_name: &str,
        contact_type: ContactType,
    ) -> anyhow::Result<UpsertResult>;
}
