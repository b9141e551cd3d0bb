// Record identifier assignment.
//
// Identifiers are deterministic across runs: byte-identical inputs always
// hash to the same identifier, while any change to the implementation,
// signature or return type produces a new one. The registry relies on this
// to detect true no-ops and skip re-embedding unchanged definitions.

use std::collections::HashMap;

use crate::model::CodeRecord;

/// Hex digits of the content hash kept in the identifier.
const SHORT_HASH_LEN: usize = 12;

/// Derive the identifier for a single record:
/// `path:kind:name:start_line:short_hash`.
///
/// The hash covers content, signature, return type and parameters, so
/// overload sets and renamed-but-identical-body functions stay distinct.
pub fn record_identifier(record: &CodeRecord) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(record.content.as_bytes());
    hasher.update(&[0]);
    if let Some(sig) = &record.signature {
        hasher.update(sig.as_bytes());
    }
    hasher.update(&[0]);
    if let Some(ret) = &record.return_type {
        hasher.update(ret.as_bytes());
    }
    hasher.update(&[0]);
    for param in &record.parameters {
        hasher.update(param.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hasher.finalize().to_hex();

    format!(
        "{}:{}:{}:{}:{}",
        record.path,
        record.kind.as_str(),
        record.name,
        record.start_line,
        &digest[..SHORT_HASH_LEN]
    )
}

/// Assign identifiers to a batch of records from one file.
///
/// If two records in the batch still collide after hashing, a numeric
/// suffix is appended in first-seen order so the result is deterministic.
pub fn assign_identifiers(records: &mut [CodeRecord]) {
    let mut seen: HashMap<String, u32> = HashMap::new();

    for record in records.iter_mut() {
        let base = record_identifier(record);
        let count = seen.entry(base.clone()).or_insert(0);
        record.id = if *count == 0 {
            base.clone()
        } else {
            format!("{}#{}", base, count)
        };
        *count += 1;
    }
}
