use async_trait::async_trait;
use model::ClassifierOutput;

/// Contract of the external acoustic classifier.
///
/// The model receives raw audio incrementally and is queried once per
/// segment. Implementations are expected to be slow, asynchronous and
/// sometimes not ready; callers must treat every error as a missing result
/// for that segment, never as a pipeline failure.
#[async_trait]
pub trait Classify: Send {
    /// Feeds a slice of segment audio to the model.
    fn write(&mut self, audio: &[u8]);

    /// Produces the prediction for the audio fed since the last call.
    async fn predict(&mut self) -> anyhow::Result<ClassifierOutput>;

    /// A model still warming up reports `false` and is skipped.
    fn ready(&self) -> bool {
        true
    }
}

/// Stand-in used when no acoustic model is wired up; the fusion stage then
/// decides on hotlist evidence alone.
#[derive(Debug, Default)]
pub struct NullClassifier;

#[async_trait]
impl Classify for NullClassifier {
    fn write(&mut self, _audio: &[u8]) {}

    async fn predict(&mut self) -> anyhow::Result<ClassifierOutput> {
        anyhow::bail!("no classifier configured")
    }

    fn ready(&self) -> bool {
        false
    }
}
