/// A single `(time offset, hash)` pair produced by the fingerprint extractor.
///
/// `dt` counts analysis steps since the start of the extractor's stream,
/// monotonically increasing within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub dt: u32,
    pub hash: u32,
}

/// All fingerprints extracted from one audio segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintBatch(Vec<Fingerprint>);

impl FingerprintBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fingerprint: Fingerprint) {
        self.0.push(fingerprint);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Fingerprint> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.0.iter()
    }

    pub fn hashes(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().map(|f| f.hash)
    }
}

impl From<Vec<Fingerprint>> for FingerprintBatch {
    fn from(fingerprints: Vec<Fingerprint>) -> Self {
        Self(fingerprints)
    }
}

impl FromIterator<Fingerprint> for FingerprintBatch {
    fn from_iter<T: IntoIterator<Item = Fingerprint>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Fingerprint> for FingerprintBatch {
    fn extend<T: IntoIterator<Item = Fingerprint>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}
