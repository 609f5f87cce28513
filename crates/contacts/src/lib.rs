//! CardDAV contact-store client: discovery, group validation, and
//! ETag-guarded contact upsert against a hosted mail provider's
//! addressbook.

pub mod client;
pub mod error;
pub mod types;
pub mod vcard;
pub mod xml;

pub use client::ContactStoreClient;
pub use error::ContactError;
pub use types::{ContactType, GroupInfo, UpsertAction, UpsertResult};
