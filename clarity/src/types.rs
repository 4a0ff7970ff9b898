//! Shared identifier types.
//!
//! - [`DocumentId`]: names an uploaded document and its working directory
//! - [`UserId`]: the identity provider's `sub` claim
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use uuid::Uuid;

pub type DocumentId = Uuid;
pub type UserId = String;

/// Abbreviate a UUID to its first 8 characters for more readable logs
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
