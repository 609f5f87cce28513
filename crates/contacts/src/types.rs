#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactType {
    Company,
    Person,
}

#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub href: String,
    pub etag: String,
    pub uid: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub action: UpsertAction,
    pub uid: String,
    pub group: String,
    pub name_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Existing,
}
