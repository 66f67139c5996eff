mod chunk;
mod content_kind;
mod detection;
mod fingerprint;
mod prediction;
mod station;

pub use chunk::AudioChunk;
pub use content_kind::{ContentKind, Verdict};
pub use detection::Detection;
pub use fingerprint::{Fingerprint, FingerprintBatch};
pub use prediction::{ClassifierOutput, FusedPrediction, HotlistOutput, MlOutput, TitleMeta};
pub use station::{Codec, StationInfo};

/// Number of content classes carried through the whole pipeline.
pub const CLASS_COUNT: usize = 4;
