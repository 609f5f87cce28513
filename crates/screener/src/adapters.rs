//! Adapts the concrete `mail-api`/`contacts` clients to the
//! [`crate::traits`] seams. `ContactStoreClient` needs `&mut self` for its
//! cached-group bookkeeping, so the adapter serializes access behind a
//! `tokio::sync::Mutex` rather than widen the trait to `&mut self`.

use std::collections::HashMap;

use async_trait::async_trait;
use contacts::{ContactStoreClient, ContactType, UpsertResult};
use mail_api::{MailApiClient, Sender};
use tokio::sync::Mutex;

use crate::traits::{ContactStore, MailApi};

pub struct MailApiAdapter(pub MailApiClient);

#[async_trait]
impl MailApi for MailApiAdapter {
    async fn query_emails(
        &self,
        mailbox_id: &str,
        sender: Option<&str>,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self.0.query_emails(mailbox_id, sender).await?)
    }

    async fn get_senders(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Sender>> {
        Ok(self.0.get_senders(ids).await?)
    }

    async fn get_mailbox_ids(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Vec<String>>> {
        Ok(self.0.get_mailbox_ids(ids).await?)
    }

    async fn add_label(&self, email_id: &str, mailbox_id: &str) -> anyhow::Result<()> {
        Ok(self.0.add_label(email_id, mailbox_id).await?)
    }

    async fn remove_label(&self, email_id: &str, mailbox_id: &str) -> anyhow::Result<()> {
        Ok(self.0.remove_label(email_id, mailbox_id).await?)
    }

    async fn batch_move_emails(
        &self,
        email_ids: &[String],
        remove_mailbox_id: &str,
        add_mailbox_ids: &[String],
    ) -> anyhow::Result<()> {
        Ok(self
            .0
            .batch_move_emails(email_ids, remove_mailbox_id, add_mailbox_ids)
            .await?)
    }
}

pub struct ContactStoreAdapter(pub Mutex<ContactStoreClient>);

#[async_trait]
impl ContactStore for ContactStoreAdapter {
    async fn find_conflicting_group(
        &self,
        email: &str,
        target_group: &str,
    ) -> anyhow::Result<Option<String>> {
        let client = self.0.lock().await;
        let hits = client.search_by_email(email).await?;
        let Some(hit) = hits.first() else {
            return Ok(None);
        };
        let card = contacts::vcard::VCard::parse(&hit.vcard_data)?;
        let Some(uid) = card.uid else {
            return Ok(None);
        };
        Ok(client.check_membership(&uid, target_group))
    }

    async fn upsert_contact(
        &self,
        email: &str,
        display_name: Option<&str>,
        group_name: &str,
        contact_type: ContactType,
    ) -> anyhow::Result<UpsertResult> {
        let mut client = self.0.lock().await;
        Ok(client
            .upsert_contact(email, display_name, group_name, contact_type)
            .await?)
    }
}
