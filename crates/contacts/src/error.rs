use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContactError {
    #[error("not connected: call connect() before issuing requests")]
    NotConnected,
    #[error("request to contact store failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to discover the addressbook collection during connect()")]
    DiscoveryFailed,
    #[error("required contact groups not found: {0}")]
    GroupsNotFound(String),
    #[error("unknown contact group: {0}")]
    UnknownGroup(String),
    #[error("failed to add member to group '{group}' after {attempts} attempts (etag conflict)")]
    GroupAddConflict { group: String, attempts: u32 },
    #[error("malformed vCard: {0}")]
    MalformedVCard(String),
    #[error("malformed XML response: {0}")]
    MalformedXml(String),
}
