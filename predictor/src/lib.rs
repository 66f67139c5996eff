mod extractor;
mod pipeline;

pub use extractor::{FingerprintExtractor, NullExtractor};
pub use pipeline::Predictor;
