use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single `[method, arguments, call_id]` triple as JMAP's method-call
/// envelope expects it.
#[derive(Debug, Serialize)]
pub struct MethodCall(pub &'static str, pub Value, pub &'static str);

#[derive(Debug, Deserialize)]
pub struct JmapSession {
    #[serde(rename = "primaryAccounts")]
    pub primary_accounts: HashMap<String, String>,
    #[serde(rename = "apiUrl")]
    pub api_url: String,
    #[serde(rename = "downloadUrl")]
    pub download_url: Option<String>,
    #[serde(rename = "eventSourceUrl")]
    pub event_source_url: Option<String>,
}

pub const MAIL_ACCOUNT_URN: &str = "urn:ietf:params:jmap:mail";

/// The sender's address and optional display name, as extracted from a
/// `From` header. A blank or whitespace-only display name is normalized
/// to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub display_name: Option<String>,
}

/// Lower-cases and trims an email address so sender comparisons are
/// case-insensitive, matching how mail providers treat the local part.
pub fn normalize_sender(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
