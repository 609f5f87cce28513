//! Screener workflow (C5): the per-cycle state machine -- collect,
//! filter already-errored, detect conflicts, mark conflicted, process
//! each clean sender. Step order and retry-safety rules come straight
//! from the specification; `spec.md`'s ordering is authoritative over
//! the older Python `screener.py` wherever the two disagree (the
//! already-grouped check ordering, and the `name_mismatch` field).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use contacts::ContactType;
use mailroom_config::ResolvedCategory;
use tracing::{info, warn};

use crate::traits::{ContactStore, MailApi};

#[derive(Debug, Clone)]
struct TriagedItem {
    message_id: String,
    label: String,
}

pub struct ScreenerWorkflow<M: MailApi, C: ContactStore> {
    mail: Arc<M>,
    contacts: Arc<C>,
    categories: Vec<ResolvedCategory>,
    /// action label -> mailbox id
    label_mailbox_ids: HashMap<String, String>,
    /// destination mailbox name -> mailbox id
    destination_mailbox_ids: HashMap<String, String>,
    screener_mailbox_id: String,
    error_label_id: String,
    warning_label_id: Option<String>,
    warnings_enabled: bool,
}

impl<M: MailApi, C: ContactStore> ScreenerWorkflow<M, C> {
    pub fn new(
        mail: Arc<M>,
        contacts: Arc<C>,
        categories: Vec<ResolvedCategory>,
        label_mailbox_ids: HashMap<String, String>,
        destination_mailbox_ids: HashMap<String, String>,
        screener_mailbox_id: String,
        error_label_id: String,
        warning_label_id: Option<String>,
    ) -> Self {
        let warnings_enabled = warning_label_id.is_some();
        Self {
            mail,
            contacts,
            categories,
            label_mailbox_ids,
            destination_mailbox_ids,
            screener_mailbox_id,
            error_label_id,
            warning_label_id,
            warnings_enabled,
        }
    }

    fn category_for_label(&self, label: &str) -> Option<&ResolvedCategory> {
        self.categories.iter().find(|c| c.label == label)
    }

    /// Run a single triage cycle. Returns the count of senders
    /// successfully processed through to label removal.
    pub async fn poll(&self) -> anyhow::Result<usize> {
        let (mut by_sender, mut display_names) = self.collect().await?;
        self.filter_already_errored(&mut by_sender).await?;

        let mut clean: Vec<(String, Vec<TriagedItem>)> = Vec::new();
        for (sender, items) in by_sender {
            if items.is_empty() {
                continue;
            }
            let distinct_labels: HashSet<&str> = items.iter().map(|i| i.label.as_str()).collect();
            if distinct_labels.len() > 1 {
                self.mark_conflicted(&sender, &items).await;
            } else {
                clean.push((sender, items));
            }
        }

        let mut processed = 0;
        for (sender, items) in clean {
            let display_name = display_names.remove(&sender).flatten();
            match self.process_sender(&sender, display_name.as_deref(), &items).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    warn!(sender, error = %e, "sender pipeline failed, action labels left in place for retry");
                }
            }
        }

        Ok(processed)
    }

    /// Step 1: query every action label's mailbox, resolve senders.
    async fn collect(
        &self,
    ) -> anyhow::Result<(
        HashMap<String, Vec<TriagedItem>>,
        HashMap<String, Option<String>>,
    )> {
        let mut by_sender: HashMap<String, Vec<TriagedItem>> = HashMap::new();
        let mut display_names: HashMap<String, Option<String>> = HashMap::new();

        for category in &self.categories {
            let Some(mailbox_id) = self.label_mailbox_ids.get(&category.label) else {
                continue;
            };
            let ids = self.mail.query_emails(mailbox_id, None).await?;
            if ids.is_empty() {
                continue;
            }
            let senders = self.mail.get_senders(&ids).await?;
            for id in ids {
                let Some(sender) = senders.get(&id) else {
                    warn!(message_id = id, "message missing From header, skipping");
                    continue;
                };
                by_sender.entry(sender.email.clone()).or_default().push(TriagedItem {
                    message_id: id,
                    label: category.label.clone(),
                });
                let entry = display_names.entry(sender.email.clone()).or_insert(None);
                if entry.is_none() {
                    if let Some(name) = &sender.display_name {
                        *entry = Some(name.clone());
                    }
                }
            }
        }

        Ok((by_sender, display_names))
    }

    /// Step 2: drop any message that already carries the error label.
    async fn filter_already_errored(
        &self,
        by_sender: &mut HashMap<String, Vec<TriagedItem>>,
    ) -> anyhow::Result<()> {
        let all_ids: Vec<String> = by_sender
            .values()
            .flatten()
            .map(|i| i.message_id.clone())
            .collect();
        if all_ids.is_empty() {
            return Ok(());
        }
        let mailbox_ids = self.mail.get_mailbox_ids(&all_ids).await?;

        for items in by_sender.values_mut() {
            items.retain(|item| {
                mailbox_ids
                    .get(&item.message_id)
                    .map(|ids| !ids.iter().any(|id| id == &self.error_label_id))
                    .unwrap_or(true)
            });
        }
        by_sender.retain(|_, items| !items.is_empty());
        Ok(())
    }

    /// Step 4: apply the error label to every conflicted message and
    /// leave the sender alone for this cycle. Failures here are
    /// logged and swallowed -- the cycle continues.
    async fn mark_conflicted(&self, sender: &str, items: &[TriagedItem]) {
        warn!(sender, count = items.len(), "conflicting action labels, applying error label");
        for item in items {
            if let Err(e) = self.mail.add_label(&item.message_id, &self.error_label_id).await {
                warn!(sender, message_id = item.message_id, error = %e, "failed to apply error label");
            }
        }
    }

    /// Step 5: process one clean sender through already-grouped check,
    /// upsert, name-mismatch warning, sweep, and label removal.
    async fn process_sender(
        &self,
        sender: &str,
        display_name: Option<&str>,
        items: &[TriagedItem],
    ) -> anyhow::Result<()> {
        let label = items[0].label.clone();
        let category = self
            .category_for_label(&label)
            .ok_or_else(|| anyhow::anyhow!("no category resolves label '{label}'"))?
            .clone();

        // (a) Already-grouped check.
        if let Some(other_group) = self
            .contacts
            .find_conflicting_group(sender, &category.contact_group)
            .await?
        {
            info!(sender, other_group, "contact already grouped elsewhere, applying error label");
            for item in items {
                self.mail.add_label(&item.message_id, &self.error_label_id).await?;
            }
            return Ok(());
        }

        // (b) Upsert contact.
        let contact_type = match category.contact_type {
            mailroom_config::ContactType::Company => ContactType::Company,
            mailroom_config::ContactType::Person => ContactType::Person,
        };
        let upsert = self
            .contacts
            .upsert_contact(sender, display_name, &category.contact_group, contact_type)
            .await?;

        // (c) Name-mismatch warning -- non-blocking.
        if self.warnings_enabled && upsert.name_mismatch {
            if let Some(warning_id) = &self.warning_label_id {
                for item in items {
                    if let Err(e) = self.mail.add_label(&item.message_id, warning_id).await {
                        warn!(sender, error = %e, "failed to apply name-mismatch warning label");
                    }
                }
            }
        }

        // (d) Sweep every message from this sender currently in Screener.
        let destination_id = self
            .destination_mailbox_ids
            .get(&category.destination_mailbox)
            .ok_or_else(|| {
                anyhow::anyhow!("destination mailbox '{}' not resolved", category.destination_mailbox)
            })?
            .clone();
        let sweep_ids = self
            .mail
            .query_emails(&self.screener_mailbox_id, Some(sender))
            .await?;
        if !sweep_ids.is_empty() {
            self.mail
                .batch_move_emails(&sweep_ids, &self.screener_mailbox_id, &[destination_id])
                .await?;
        }

        // (e) Remove the action label -- the commit point.
        for item in items {
            self.mail.remove_label(&item.message_id, self.label_mailbox_ids.get(&item.label).unwrap()).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use contacts::UpsertAction;
    use mailroom_config::{ContactType as CfgContactType, ResolvedCategory};
    use std::sync::Mutex as StdMutex;

    fn imbox_category() -> ResolvedCategory {
        ResolvedCategory {
            name: "Imbox".to_string(),
            label: "@ToImbox".to_string(),
            contact_group: "Imbox".to_string(),
            destination_mailbox: "Inbox".to_string(),
            contact_type: CfgContactType::Company,
            parent: None,
        }
    }

    fn feed_category() -> ResolvedCategory {
        ResolvedCategory {
            name: "Feed".to_string(),
            label: "@ToFeed".to_string(),
            contact_group: "Feed".to_string(),
            destination_mailbox: "Feed".to_string(),
            contact_type: CfgContactType::Company,
            parent: None,
        }
    }

    struct FakeMail {
        label_messages: HashMap<String, Vec<String>>,
        senders: HashMap<String, Sender>,
        mailbox_ids: HashMap<String, Vec<String>>,
        screener_messages: HashMap<String, Vec<String>>,
        added_labels: StdMutex<Vec<(String, String)>>,
        removed_labels: StdMutex<Vec<(String, String)>>,
        moved: StdMutex<Vec<(Vec<String>, String, Vec<String>)>>,
    }

    use mail_api::Sender;

    #[async_trait]
    impl MailApi for FakeMail {
        async fn query_emails(
            &self,
            mailbox_id: &str,
            sender: Option<&str>,
        ) -> anyhow::Result<Vec<String>> {
            if let Some(sender) = sender {
                Ok(self
                    .screener_messages
                    .get(sender)
                    .cloned()
                    .unwrap_or_default())
            } else {
                Ok(self.label_messages.get(mailbox_id).cloned().unwrap_or_default())
            }
        }

        async fn get_senders(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Sender>> {
            Ok(ids
                .iter()
                .filter_map(|id| self.senders.get(id).cloned().map(|s| (id.clone(), s)))
                .collect())
        }

        async fn get_mailbox_ids(&self, ids: &[String]) -> anyhow::Result<HashMap<String, Vec<String>>> {
            Ok(ids
                .iter()
                .map(|id| (id.clone(), self.mailbox_ids.get(id).cloned().unwrap_or_default()))
                .collect())
        }

        async fn add_label(&self, email_id: &str, mailbox_id: &str) -> anyhow::Result<()> {
            self.added_labels
                .lock()
                .unwrap()
                .push((email_id.to_string(), mailbox_id.to_string()));
            Ok(())
        }

        async fn remove_label(&self, email_id: &str, mailbox_id: &str) -> anyhow::Result<()> {
            self.removed_labels
                .lock()
                .unwrap()
                .push((email_id.to_string(), mailbox_id.to_string()));
            Ok(())
        }

        async fn batch_move_emails(
            &self,
            email_ids: &[String],
            remove_mailbox_id: &str,
            add_mailbox_ids: &[String],
        ) -> anyhow::Result<()> {
            self.moved.lock().unwrap().push((
                email_ids.to_vec(),
                remove_mailbox_id.to_string(),
                add_mailbox_ids.to_vec(),
            ));
            Ok(())
        }
    }

    struct FakeContacts {
        conflicting_group: Option<String>,
    }

    #[async_trait]
    impl ContactStore for FakeContacts {
        async fn find_conflicting_group(
            &self,
            _email: &str,
            _target_group: &str,
        ) -> anyhow::Result<Option<String>> {
            Ok(self.conflicting_group.clone())
        }

        async fn upsert_contact(
            &self,
            _email: &str,
            _display_name: Option<&str>,
            group_name: &str,
            _contact_type: ContactType,
        ) -> anyhow::Result<contacts::UpsertResult> {
            Ok(contacts::UpsertResult {
                action: UpsertAction::Created,
                uid: "uid-1".to_string(),
                group: group_name.to_string(),
                name_mismatch: false,
            })
        }
    }

    fn sender(email: &str, name: Option<&str>) -> Sender {
        Sender {
            email: email.to_string(),
            display_name: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn clean_sender_moves_to_inbox_and_label_is_removed_last() {
        let mail = Arc::new(FakeMail {
            label_messages: HashMap::from([("mbx-imbox".to_string(), vec!["m1".to_string()])]),
            senders: HashMap::from([("m1".to_string(), sender("alice@example.com", None))]),
            mailbox_ids: HashMap::new(),
            screener_messages: HashMap::from([(
                "alice@example.com".to_string(),
                vec!["m1".to_string(), "m2".to_string()],
            )]),
            added_labels: StdMutex::new(Vec::new()),
            removed_labels: StdMutex::new(Vec::new()),
            moved: StdMutex::new(Vec::new()),
        });
        let contacts = Arc::new(FakeContacts { conflicting_group: None });

        let workflow = ScreenerWorkflow::new(
            mail.clone(),
            contacts,
            vec![imbox_category()],
            HashMap::from([("@ToImbox".to_string(), "mbx-imbox".to_string())]),
            HashMap::from([("Inbox".to_string(), "mbx-inbox".to_string())]),
            "mbx-screener".to_string(),
            "mbx-error".to_string(),
            None,
        );

        let processed = workflow.poll().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(mail.removed_labels.lock().unwrap().len(), 1);
        assert_eq!(mail.moved.lock().unwrap().len(), 1);
        let (ids, remove_id, add_ids) = mail.moved.lock().unwrap()[0].clone();
        assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(remove_id, "mbx-screener");
        assert_eq!(add_ids, vec!["mbx-inbox".to_string()]);
    }

    #[tokio::test]
    async fn conflicted_sender_gets_error_label_and_no_mutations() {
        let mail = Arc::new(FakeMail {
            label_messages: HashMap::from([
                ("mbx-imbox".to_string(), vec!["m1".to_string()]),
                ("mbx-feed".to_string(), vec!["m2".to_string()]),
            ]),
            senders: HashMap::from([
                ("m1".to_string(), sender("bob@example.com", None)),
                ("m2".to_string(), sender("bob@example.com", None)),
            ]),
            mailbox_ids: HashMap::new(),
            screener_messages: HashMap::new(),
            added_labels: StdMutex::new(Vec::new()),
            removed_labels: StdMutex::new(Vec::new()),
            moved: StdMutex::new(Vec::new()),
        });
        let contacts = Arc::new(FakeContacts { conflicting_group: None });

        let workflow = ScreenerWorkflow::new(
            mail.clone(),
            contacts,
            vec![imbox_category(), feed_category()],
            HashMap::from([
                ("@ToImbox".to_string(), "mbx-imbox".to_string()),
                ("@ToFeed".to_string(), "mbx-feed".to_string()),
            ]),
            HashMap::from([
                ("Inbox".to_string(), "mbx-inbox".to_string()),
                ("Feed".to_string(), "mbx-feed-dest".to_string()),
            ]),
            "mbx-screener".to_string(),
            "mbx-error".to_string(),
            None,
        );

        let processed = workflow.poll().await.unwrap();
        assert_eq!(processed, 0);
        assert!(mail.removed_labels.lock().unwrap().is_empty());
        assert!(mail.moved.lock().unwrap().is_empty());
        assert_eq!(mail.added_labels.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn already_grouped_elsewhere_gets_error_label_and_no_move() {
        let mail = Arc::new(FakeMail {
            label_messages: HashMap::from([("mbx-imbox".to_string(), vec!["m3".to_string()])]),
            senders: HashMap::from([("m3".to_string(), sender("carol@example.com", None))]),
            mailbox_ids: HashMap::new(),
            screener_messages: HashMap::new(),
            added_labels: StdMutex::new(Vec::new()),
            removed_labels: StdMutex::new(Vec::new()),
            moved: StdMutex::new(Vec::new()),
        });
        let contacts = Arc::new(FakeContacts {
            conflicting_group: Some("Feed".to_string()),
        });

        let workflow = ScreenerWorkflow::new(
            mail.clone(),
            contacts,
            vec![imbox_category()],
            HashMap::from([("@ToImbox".to_string(), "mbx-imbox".to_string())]),
            HashMap::from([("Inbox".to_string(), "mbx-inbox".to_string())]),
            "mbx-screener".to_string(),
            "mbx-error".to_string(),
            None,
        );

        let processed = workflow.poll().await.unwrap();
        assert_eq!(processed, 0);
        assert!(mail.moved.lock().unwrap().is_empty());
        assert!(mail.removed_labels.lock().unwrap().is_empty());
        assert_eq!(mail.added_labels.lock().unwrap(), vec![("m3".to_string(), "mbx-error".to_string())]);
    }

    #[tokio::test]
    async fn already_errored_message_is_dropped_from_the_cycle() {
        let mail = Arc::new(FakeMail {
            label_messages: HashMap::from([("mbx-imbox".to_string(), vec!["m1".to_string()])]),
            senders: HashMap::from([("m1".to_string(), sender("dave@example.com", None))]),
            mailbox_ids: HashMap::from([("m1".to_string(), vec!["mbx-error".to_string()])]),
            screener_messages: HashMap::new(),
            added_labels: StdMutex::new(Vec::new()),
            removed_labels: StdMutex::new(Vec::new()),
            moved: StdMutex::new(Vec::new()),
        });
        let contacts = Arc::new(FakeContacts { conflicting_group: None });

        let workflow = ScreenerWorkflow::new(
            mail.clone(),
            contacts,
            vec![imbox_category()],
            HashMap::from([("@ToImbox".to_string(), "mbx-imbox".to_string())]),
            HashMap::from([("Inbox".to_string(), "mbx-inbox".to_string())]),
            "mbx-screener".to_string(),
            "mbx-error".to_string(),
            None,
        );

        let processed = workflow.poll().await.unwrap();
        assert_eq!(processed, 0);
        assert!(mail.moved.lock().unwrap().is_empty());
    }
}
