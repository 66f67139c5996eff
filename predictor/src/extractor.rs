use model::FingerprintBatch;

/// Contract of the external fingerprint extraction transform.
///
/// Implementations decode the fed container bytes to 16-bit mono PCM and run
/// the fingerprinting pass over it; `drain` hands back everything extracted
/// since the previous call, once per segment.
pub trait FingerprintExtractor: Send {
    fn write(&mut self, audio: &[u8]);

    fn drain(&mut self) -> FingerprintBatch;
}

/// Stand-in used when fingerprinting is disabled: every segment drains to an
/// empty batch, which the matcher answers with its neutral detection.
#[derive(Debug, Default)]
pub struct NullExtractor;

impl FingerprintExtractor for NullExtractor {
    fn write(&mut self, _audio: &[u8]) {}

    fn drain(&mut self) -> FingerprintBatch {
        FingerprintBatch::new()
    }
}
