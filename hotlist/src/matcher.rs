use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use model::{Detection, FingerprintBatch, CLASS_COUNT};

use crate::db::HotlistDb;

/// Analysis step of the fingerprinter: 512 samples at 22.05 kHz. Converts
/// fingerprint time offsets to seconds for the concentration measure.
const DT_SECONDS: f64 = 512.0 / 22050.0;

/// Content-fingerprint matcher against the curated reference database.
///
/// Matching never fails hard: an absent database, an empty batch or a query
/// error all degrade to the neutral [`Detection::empty`] with a log line, so
/// one bad lookup cannot take the pipeline down.
pub struct Hotlist {
    db: Option<HotlistDb>,
}

impl Hotlist {
    #[must_use]
    pub fn new(db: Option<HotlistDb>) -> Self {
        Self { db }
    }

    /// Opens the reference database, degrading to matcher-disabled on error.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        match HotlistDb::open(&path) {
            Ok(db) => Self::new(Some(db)),
            Err(err) => {
                log::error!(
                    "could not prepare hotlist db {}: {err:#}",
                    path.as_ref().display()
                );
                Self::new(None)
            }
        }
    }

    #[must_use]
    pub fn db_mut(&mut self) -> Option<&mut HotlistDb> {
        self.db.as_mut()
    }

    /// Finds the best-aligned reference track for one batch of fingerprints.
    ///
    /// True matches cluster tightly at one alignment offset while spurious
    /// hash collisions scatter, so the candidate is picked by voting per
    /// `(alignment, track)` pair.
    #[must_use]
    pub fn match_batch(&self, batch: &FingerprintBatch) -> Detection {
        let Some(db) = &self.db else {
            log::warn!("match: no hotlist db loaded");
            return Detection::empty();
        };
        if batch.is_empty() {
            log::warn!("match: no fingerprints to search");
            return Detection::empty();
        }

        let hashes: Vec<u32> = batch.hashes().collect();
        let rows = match db.batched_lookup(&hashes) {
            Ok(rows) => rows,
            Err(err) => {
                log::warn!("match: query error: {err:#}");
                return Detection::empty();
            }
        };
        if rows.is_empty() {
            log::debug!("match: no results for a query of {}", batch.len());
            return Detection::empty();
        }

        // Measurement offset of the first batch fingerprint carrying a hash.
        let mut query_dt: HashMap<u32, u32> = HashMap::new();
        for fingerprint in batch.iter() {
            query_dt.entry(fingerprint.hash).or_insert(fingerprint.dt);
        }

        let meas_anchor = i64::from(batch.first().expect("non-empty batch").dt);
        let ref_anchor = i64::from(rows[0].dt);

        // BTreeMap keeps the winner selection deterministic under ties.
        let mut votes: BTreeMap<(i64, i64), Vec<u32>> = BTreeMap::new();
        for row in &rows {
            let dt_query = i64::from(query_dt[&row.hash]);
            let alignment = (i64::from(row.dt) - ref_anchor) - (dt_query - meas_anchor);
            votes
                .entry((alignment, row.track_id))
                .or_default()
                .push(row.dt);
        }

        let (&(alignment, track_id), bucket) = votes
            .iter()
            .max_by_key(|(_, bucket)| bucket.len())
            .expect("non-empty rows");

        let Some(track) = db.track(track_id) else {
            log::warn!("match: winning track {track_id} vanished from db");
            return Detection::empty();
        };

        let matches_sync = bucket.len();
        let matches_total = rows.len();

        // Temporal concentration of the winning bucket: real matches are
        // focused in one stretch of the reference track, echoes are spread.
        let mean = bucket.iter().map(|&dt| f64::from(dt)).sum::<f64>() / matches_sync as f64;
        let variance = bucket
            .iter()
            .map(|&dt| (f64::from(dt) - mean).powi(2))
            .sum::<f64>()
            / matches_sync as f64;
        let std = variance.sqrt() * DT_SECONDS;
        let matching_focus = if std > 0.0 { track.length / std } else { 0.0 };

        let ratio_reference = matches_sync as f64 / track.fingers_count as f64;
        let ratio_measurements = matches_sync as f64 / batch.len() as f64;
        let confidence1 = 1.0 - (-(ratio_reference * ratio_measurements) / 0.01).exp();
        let confidence2 =
            1.0 - (-(ratio_reference * ratio_measurements * matching_focus) / 0.02).exp();

        let winner = 0.25 + 0.75 * confidence2 as f32;
        let mut softmax = [(1.0 - winner) / (CLASS_COUNT - 1) as f32; CLASS_COUNT];
        softmax[track.kind.index()] = winner;

        log::info!(
            "match: nf={} class={:#} file={} diff={alignment} count={matches_sync}/{matches_total}",
            batch.len(),
            track.kind,
            track.file
        );

        Detection {
            file: Some(track.file),
            kind: Some(track.kind),
            alignment,
            matches_sync,
            matches_total,
            confidence1,
            confidence2,
            softmax,
        }
    }
}
