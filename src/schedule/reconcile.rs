use std::collections::HashSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::model::ClassSession;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiff {
    pub to_delete: Vec<ClassSession>,
    pub to_add: Vec<ClassSession>,
}

impl SessionDiff {
    pub fn is_in_sync(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }
}

/// Diffs the sessions a course should have against the ones already stored,
/// by session id. Sessions present on both sides are never touched, so edits
/// made to stored sessions survive.
pub fn reconcile(ideal: &[ClassSession], persisted: &[ClassSession]) -> SessionDiff {
    let ideal_ids: HashSet<&str> = ideal.iter().map(|s| s.id.as_str()).collect();
    let persisted_ids: HashSet<&str> = persisted.iter().map(|s| s.id.as_str()).collect();

    SessionDiff {
        to_delete: persisted
            .iter()
            .filter(|s| !ideal_ids.contains(s.id.as_str()))
            .cloned()
            .collect(),
        to_add: ideal
            .iter()
            .filter(|s| !persisted_ids.contains(s.id.as_str()))
            .cloned()
            .collect(),
    }
}

/// Order-independent fingerprint of a persisted session set.
pub fn snapshot_token(persisted: &[ClassSession]) -> String {
    let mut ids: Vec<&str> = persisted.iter().map(|s| s.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
