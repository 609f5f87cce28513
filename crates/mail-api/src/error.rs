use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailApiError {
    #[error("not connected: call connect() before issuing requests")]
    NotConnected,
    #[error("request to mail API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail API returned an unexpected response shape: {0}")]
    UnexpectedShape(String),
    #[error("required mailboxes not found: {0}")]
    MailboxesNotFound(String),
    #[error("failed to create mailbox '{name}': {reason}")]
    MailboxCreateFailed { name: String, reason: String },
    #[error("failed to update emails: {0}")]
    UpdateFailed(String),
}
