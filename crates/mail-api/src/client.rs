//! JMAP client: session discovery, mailbox resolution, query and move
//! operations against a hosted mail provider's JSON-over-HTTP API.
//!
//! Structured after the teacher's `users::ipa::IPA` client (`reqwest::Client`
//! held on a struct, bearer auth via default headers, `serde_json::Value`
//! indexing of loosely-typed responses) but the wire shape itself -- the
//! `methodCalls`/`methodResponses` envelope -- comes from JMAP (RFC 8620).

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::MailApiError;
use crate::types::{normalize_sender, JmapSession, MethodCall, Sender, MAIL_ACCOUNT_URN};

/// Conservative chunk size for `Email/set` calls, comfortably under
/// Fastmail-style providers' `maxObjectsInSet` limits.
const BATCH_SIZE: usize = 100;

pub struct MailApiClient {
    http: reqwest::Client,
    hostname: String,
    api_url: Option<String>,
    account_id: Option<String>,
    event_source_url: Option<String>,
}

impl MailApiClient {
    pub fn new(token: &str, hostname: &str) -> Result<Self, MailApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| MailApiError::UnexpectedShape(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            hostname: hostname.to_string(),
            api_url: None,
            account_id: None,
            event_source_url: None,
        })
    }

    pub fn account_id(&self) -> Result<&str, MailApiError> {
        self.account_id.as_deref().ok_or(MailApiError::NotConnected)
    }

    pub fn event_source_url(&self) -> Option<&str> {
        self.event_source_url.as_deref()
    }

    /// Discover the JMAP session: primary account ID and API endpoint.
    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> Result<(), MailApiError> {
        let resp = self
            .http
            .get(format!("https://{}/jmap/session", self.hostname))
            .send()
            .await?
            .error_for_status()?;
        let session: JmapSession = resp.json().await?;

        let account_id = session
            .primary_accounts
            .get(MAIL_ACCOUNT_URN)
            .cloned()
            .ok_or_else(|| {
                MailApiError::UnexpectedShape("session missing mail primary account".to_string())
            })?;

        self.account_id = Some(account_id);
        self.event_source_url = session.event_source_url;
        self.api_url = Some(session.api_url);
        Ok(())
    }

    async fn call(&self, method_calls: Vec<MethodCall>) -> Result<Vec<Value>, MailApiError> {
        let api_url = self.api_url.as_deref().ok_or(MailApiError::NotConnected)?;
        let payload = json!({
            "using": ["urn:ietf:params:jmap:core", MAIL_ACCOUNT_URN],
            "methodCalls": method_calls,
        });

        let resp = self
            .http
            .post(api_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        let responses = body
            .get("methodResponses")
            .and_then(Value::as_array)
            .ok_or_else(|| MailApiError::UnexpectedShape("missing methodResponses".to_string()))?;
        Ok(responses.clone())
    }

    fn first_result(responses: Vec<Value>) -> Result<Value, MailApiError> {
        responses
            .into_iter()
            .next()
            .and_then(|r| r.as_array().map(|a| a[1].clone()))
            .ok_or_else(|| MailApiError::UnexpectedShape("empty methodResponses".to_string()))
    }

    /// Resolve mailbox names to provider IDs, fetching every mailbox once
    /// and mapping by name. `"Inbox"` is resolved by `role="inbox"` rather
    /// than name, since a custom mailbox named "Inbox" could otherwise
    /// shadow the real one.
    #[instrument(skip(self))]
    pub async fn resolve_mailboxes(
        &self,
        required_names: &[&str],
    ) -> Result<HashMap<String, String>, MailApiError> {
        let account_id = self.account_id()?.to_string();
        let responses = self
            .call(vec![MethodCall(
                "Mailbox/get",
                json!({"accountId": account_id, "ids": Value::Null}),
                "m0",
            )])
            .await?;
        let data = Self::first_result(responses)?;
        let list = data
            .get("list")
            .and_then(Value::as_array)
            .ok_or_else(|| MailApiError::UnexpectedShape("Mailbox/get missing list".to_string()))?;

        let mut name_to_id: HashMap<String, String> = HashMap::new();
        let mut inbox_id: Option<String> = None;

        for mb in list {
            if mb.get("role").and_then(Value::as_str) == Some("inbox") {
                inbox_id = mb.get("id").and_then(Value::as_str).map(str::to_string);
            }
            let name = mb.get("name").and_then(Value::as_str).unwrap_or_default();
            let id = mb.get("id").and_then(Value::as_str).unwrap_or_default();
            let parent_is_none = mb.get("parentId").map(Value::is_null).unwrap_or(true);

            match name_to_id.get(name) {
                None => {
                    name_to_id.insert(name.to_string(), id.to_string());
                }
                Some(_) if parent_is_none => {
                    name_to_id.insert(name.to_string(), id.to_string());
                }
                Some(_) => {}
            }
        }

        let mut result = HashMap::new();
        let mut missing = Vec::new();
        for name in required_names {
            if *name == "Inbox" {
                match &inbox_id {
                    Some(id) => {
                        result.insert("Inbox".to_string(), id.clone());
                    }
                    None => missing.push("Inbox".to_string()),
                }
            } else if let Some(id) = name_to_id.get(*name) {
                result.insert((*name).to_string(), id.clone());
            } else {
                missing.push((*name).to_string());
            }
        }

        if !missing.is_empty() {
            return Err(MailApiError::MailboxesNotFound(missing.join(", ")));
        }
        Ok(result)
    }

    /// Every existing mailbox name, with `"Inbox"` added whenever a
    /// `role="inbox"` mailbox exists (regardless of its actual name).
    #[instrument(skip(self))]
    pub async fn list_existing_mailbox_names(&self) -> Result<std::collections::HashSet<String>, MailApiError> {
        let account_id = self.account_id()?.to_string();
        let responses = self
            .call(vec![MethodCall(
                "Mailbox/get",
                json!({"accountId": account_id, "ids": Value::Null}),
                "m0",
            )])
            .await?;
        let data = Self::first_result(responses)?;
        let list = data
            .get("list")
            .and_then(Value::as_array)
            .ok_or_else(|| MailApiError::UnexpectedShape("Mailbox/get missing list".to_string()))?;

        let mut names = std::collections::HashSet::new();
        for mb in list {
            if mb.get("role").and_then(Value::as_str) == Some("inbox") {
                names.insert("Inbox".to_string());
            }
            if let Some(name) = mb.get("name").and_then(Value::as_str) {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    #[instrument(skip(self))]
    pub async fn create_mailbox(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, MailApiError> {
        let account_id = self.account_id()?.to_string();
        let mut create_args = json!({"name": name, "isSubscribed": true});
        if let Some(parent) = parent_id {
            create_args["parentId"] = json!(parent);
        }

        let responses = self
            .call(vec![MethodCall(
                "Mailbox/set",
                json!({
                    "accountId": account_id,
                    "create": {"mb0": create_args},
                }),
                "c0",
            )])
            .await?;
        let data = Self::first_result(responses)?;

        if let Some(id) = data
            .get("created")
            .and_then(|c| c.get("mb0"))
            .and_then(|mb| mb.get("id"))
            .and_then(Value::as_str)
        {
            return Ok(id.to_string());
        }

        let reason = data
            .get("notCreated")
            .and_then(|nc| nc.get("mb0"))
            .map(|e| {
                format!(
                    "{} - {}",
                    e.get("type").and_then(Value::as_str).unwrap_or("unknown"),
                    e.get("description").and_then(Value::as_str).unwrap_or("")
                )
            })
            .unwrap_or_else(|| "unknown error".to_string());
        Err(MailApiError::MailboxCreateFailed {
            name: name.to_string(),
            reason,
        })
    }

    /// List every email ID in `mailbox_id`, optionally filtered by sender,
    /// paging through results until the full total has been collected.
    #[instrument(skip(self))]
    pub async fn query_emails(
        &self,
        mailbox_id: &str,
        sender: Option<&str>,
    ) -> Result<Vec<String>, MailApiError> {
        const PAGE: u64 = 100;
        let account_id = self.account_id()?.to_string();
        let mut filter = json!({"inMailbox": mailbox_id});
        if let Some(s) = sender {
            filter["from"] = json!(s);
        }

        let mut all_ids = Vec::new();
        let mut position: u64 = 0;
        loop {
            let responses = self
                .call(vec![MethodCall(
                    "Email/query",
                    json!({
                        "accountId": account_id,
                        "filter": filter,
                        "limit": PAGE,
                        "position": position,
                    }),
                    "q0",
                )])
                .await?;
            let data = Self::first_result(responses)?;
            let ids = data
                .get("ids")
                .and_then(Value::as_array)
                .ok_or_else(|| MailApiError::UnexpectedShape("Email/query missing ids".to_string()))?;
            let total = data.get("total").and_then(Value::as_u64).unwrap_or(0);

            for id in ids {
                if let Some(s) = id.as_str() {
                    all_ids.push(s.to_string());
                }
            }

            if all_ids.len() as u64 >= total {
                break;
            }
            position = all_ids.len() as u64;
        }
        debug!(count = all_ids.len(), mailbox_id, "queried emails");
        Ok(all_ids)
    }

    /// Fetch sender address + display name for a batch of email IDs.
    #[instrument(skip(self, email_ids))]
    pub async fn get_senders(
        &self,
        email_ids: &[String],
    ) -> Result<HashMap<String, Sender>, MailApiError> {
        let account_id = self.account_id()?.to_string();
        let responses = self
            .call(vec![MethodCall(
                "Email/get",
                json!({
                    "accountId": account_id,
                    "ids": email_ids,
                    "properties": ["id", "from"],
                }),
                "g0",
            )])
            .await?;
        let data = Self::first_result(responses)?;
        let list = data
            .get("list")
            .and_then(Value::as_array)
            .ok_or_else(|| MailApiError::UnexpectedShape("Email/get missing list".to_string()))?;

        let mut result = HashMap::new();
        for email in list {
            let id = match email.get("id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let from_list = match email.get("from").and_then(Value::as_array) {
                Some(l) if !l.is_empty() => l,
                _ => continue,
            };
            let first = &from_list[0];
            let email_addr = match first.get("email").and_then(Value::as_str) {
                Some(e) => e.to_string(),
                None => continue,
            };
            let display_name = first
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            result.insert(
                id,
                Sender {
                    email: normalize_sender(&email_addr),
                    display_name,
                },
            );
        }
        Ok(result)
    }

    /// Fetch the current set of mailbox IDs each email belongs to --
    /// used by the screener's already-errored filter.
    #[instrument(skip(self, email_ids))]
    pub async fn get_mailbox_ids(
        &self,
        email_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, MailApiError> {
        let account_id = self.account_id()?.to_string();
        let responses = self
            .call(vec![MethodCall(
                "Email/get",
                json!({
                    "accountId": account_id,
                    "ids": email_ids,
                    "properties": ["id", "mailboxIds"],
                }),
                "g1",
            )])
            .await?;
        let data = Self::first_result(responses)?;
        let list = data
            .get("list")
            .and_then(Value::as_array)
            .ok_or_else(|| MailApiError::UnexpectedShape("Email/get missing list".to_string()))?;

        let mut result = HashMap::new();
        for email in list {
            let id = match email.get("id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let mailbox_ids: Vec<String> = email
                .get("mailboxIds")
                .and_then(Value::as_object)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            result.insert(id, mailbox_ids);
        }
        Ok(result)
    }

    /// Add a single mailbox label to one email, leaving every other label
    /// untouched. Used to apply the error/warning labels.
    #[instrument(skip(self))]
    pub async fn add_label(&self, email_id: &str, mailbox_id: &str) -> Result<(), MailApiError> {
        let account_id = self.account_id()?.to_string();
        let patch_key = format!("mailboxIds/{mailbox_id}");
        let responses = self
            .call(vec![MethodCall(
                "Email/set",
                json!({
                    "accountId": account_id,
                    "update": {email_id: {patch_key: true}},
                }),
                "s1",
            )])
            .await?;
        let data = Self::first_result(responses)?;
        Self::check_not_updated(&data)
    }

    /// Remove a single mailbox label from one email, leaving every other
    /// label untouched.
    #[instrument(skip(self))]
    pub async fn remove_label(&self, email_id: &str, mailbox_id: &str) -> Result<(), MailApiError> {
        let account_id = self.account_id()?.to_string();
        let patch_key = format!("mailboxIds/{mailbox_id}");
        let responses = self
            .call(vec![MethodCall(
                "Email/set",
                json!({
                    "accountId": account_id,
                    "update": {email_id: {patch_key: Value::Null}},
                }),
                "s0",
            )])
            .await?;
        let data = Self::first_result(responses)?;
        Self::check_not_updated(&data)
    }

    /// Move a batch of emails: drop `remove_mailbox_id`, add every ID in
    /// `add_mailbox_ids`. Processed `BATCH_SIZE` emails at a time.
    #[instrument(skip(self, email_ids))]
    pub async fn batch_move_emails(
        &self,
        email_ids: &[String],
        remove_mailbox_id: &str,
        add_mailbox_ids: &[String],
    ) -> Result<(), MailApiError> {
        let account_id = self.account_id()?.to_string();

        for chunk in email_ids.chunks(BATCH_SIZE) {
            let mut update = serde_json::Map::new();
            for email_id in chunk {
                let mut patch = serde_json::Map::new();
                patch.insert(format!("mailboxIds/{remove_mailbox_id}"), Value::Null);
                for add_id in add_mailbox_ids {
                    patch.insert(format!("mailboxIds/{add_id}"), Value::Bool(true));
                }
                update.insert(email_id.clone(), Value::Object(patch));
            }

            let responses = self
                .call(vec![MethodCall(
                    "Email/set",
                    json!({"accountId": account_id, "update": update}),
                    "s0",
                )])
                .await?;
            let data = Self::first_result(responses)?;
            Self::check_not_updated(&data)?;
        }
        Ok(())
    }

    fn check_not_updated(data: &Value) -> Result<(), MailApiError> {
        let not_updated = match data.get("notUpdated").and_then(Value::as_object) {
            Some(m) if !m.is_empty() => m,
            _ => return Ok(()),
        };
        let errors: Vec<String> = not_updated
            .iter()
            .map(|(id, err)| {
                format!(
                    "{id}: {}",
                    err.get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                )
            })
            .collect();
        Err(MailApiError::UpdateFailed(errors.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_connect_before_account_id() {
        let client = MailApiClient::new("tok", "api.example.com").unwrap();
        assert!(matches!(client.account_id(), Err(MailApiError::NotConnected)));
    }

    #[test]
    fn normalize_sender_lowercases_and_trims() {
        assert_eq!(normalize_sender("  Alice@Example.COM "), "alice@example.com");
    }
}
