//! Utility functions for identifiers and storage keys

use bech32::Bech32m;
use uuid7::{Uuid, uuid7};

// encode an existing uuid using bech32
pub fn uuid_to_bech32(hrp: &str, id: &Uuid) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, id.as_bytes())?;
    Ok(encode)
}

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    uuid_to_bech32(hrp, &uuid7())
}

/// Joins project and table ids in storage keys, so neither may contain it.
pub const KEY_SEPARATOR: char = '/';

/// Whether `id` can be used as a project or table id in a storage key.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(KEY_SEPARATOR)
}

/// Key of a table's snapshot document.
pub fn document_key(project: &str, table_id: &str) -> String {
    format!("{project}{KEY_SEPARATOR}{table_id}")
}

/// Prefix shared by every history event of a project.
pub fn project_prefix(project: &str) -> Vec<u8> {
    format!("{project}{KEY_SEPARATOR}").into_bytes()
}

/// History keys sort by append order: uuid7 bytes are time-ordered.
pub fn event_key(project: &str, id: &Uuid) -> Vec<u8> {
    let mut key = project_prefix(project);
    key.extend_from_slice(id.as_bytes());
    key
}
