use serde::{Deserialize, Serialize};

use crate::{ContentKind, CLASS_COUNT};

/// The matcher's scored identification of one fingerprint batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Reference file of the winning vote, if any fingerprints matched.
    pub file: Option<String>,
    pub kind: Option<ContentKind>,
    /// Alignment offset of the winning vote, in fingerprint steps.
    pub alignment: i64,
    /// Vote count of the winning `(alignment, file)` pair.
    pub matches_sync: usize,
    /// Total matched rows across all alignments and files.
    pub matches_total: usize,
    pub confidence1: f64,
    pub confidence2: f64,
    pub softmax: [f32; CLASS_COUNT],
}

impl Detection {
    /// The fixed neutral result for empty batches and degraded lookups.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            file: None,
            kind: None,
            alignment: 0,
            matches_sync: 0,
            matches_total: 0,
            confidence1: 0.0,
            confidence2: 0.0,
            softmax: [1.0 / CLASS_COUNT as f32; CLASS_COUNT],
        }
    }
}
