use analyzer::{Classify, FusionCache, FusionHandle, FusionTask, Payload};
use fetcher::StreamEvent;
use hotlist::Hotlist;
use model::{AudioChunk, Detection, FusedPrediction};
use tokio::sync::mpsc;

use crate::extractor::FingerprintExtractor;

/// Joins the detectors into one flow: every chunk goes to the fusion cache,
/// the fingerprint extractor and the classifier; each segment boundary closes
/// the previous segment by querying the matcher and the classifier and
/// writing their results before the boundary chunk opens the next slot.
///
/// Matcher and classifier failures are logged and leave the slot without
/// that result; the fusion stage is built to cope.
pub struct Predictor;

impl Predictor {
    pub fn spawn<E, C>(
        events: mpsc::Receiver<StreamEvent>,
        extractor: E,
        classifier: C,
        hotlist: Hotlist,
    ) -> (FusionHandle, mpsc::Receiver<FusedPrediction>)
    where
        E: FingerprintExtractor + 'static,
        C: Classify + 'static,
    {
        let (fusion, predictions) = FusionTask::spawn(FusionCache::new());
        tokio::spawn(run(events, extractor, classifier, hotlist, fusion.clone()));
        (fusion, predictions)
    }
}

async fn run<E, C>(
    mut events: mpsc::Receiver<StreamEvent>,
    mut extractor: E,
    mut classifier: C,
    hotlist: Hotlist,
    fusion: FusionHandle,
) where
    E: FingerprintExtractor,
    C: Classify,
{
    let mut started = false;

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Metadata(info) => {
                log::info!(
                    "stream metadata: url={} codec={:?} rate={}B/s",
                    info.url,
                    info.codec,
                    info.byte_rate
                );
            }
            StreamEvent::Chunk(chunk) => {
                if chunk.segment_start && started {
                    let batch = extractor.drain();
                    let detection = hotlist.match_batch(&batch);
                    close_segment(&mut classifier, detection, &fusion).await;
                }
                started = true;

                extractor.write(&chunk.data);
                classifier.write(&chunk.data);
                if !forward_audio(&fusion, chunk).await {
                    break;
                }
            }
            StreamEvent::Fatal(err) => {
                log::error!("stream failed: {err}");
                break;
            }
        }
    }
    log::debug!("predictor ended");
}

/// The boundary chunk belongs to the next segment; everything accumulated so
/// far is scored and written to the still-current slot first.
async fn close_segment<C>(
    classifier: &mut C,
    detection: Detection,
    fusion: &FusionHandle,
) where
    C: Classify,
{
    log::info!(
        "in: hotlist => matches={}/{} class={:?}",
        detection.matches_sync,
        detection.matches_total,
        detection.kind
    );
    fusion.write(Payload::Matcher(detection)).await;

    if classifier.ready() {
        match classifier.predict().await {
            Ok(output) => {
                log::info!(
                    "in: ml => type={:#} confidence={:.2}",
                    output.kind,
                    output.confidence
                );
                fusion.write(Payload::Classifier(output)).await;
            }
            Err(err) => log::warn!("classifier prediction failed: {err:#}"),
        }
    }
}

async fn forward_audio(fusion: &FusionHandle, chunk: AudioChunk) -> bool {
    fusion.write(Payload::Audio(chunk)).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use analyzer::Classify;
    use async_trait::async_trait;
    use bytes::Bytes;
    use fetcher::StreamEvent;
    use hotlist::{Hotlist, HotlistDb};
    use model::{
        AudioChunk, ClassifierOutput, ContentKind, Fingerprint, FingerprintBatch, Verdict,
    };

    use super::*;
    use crate::extractor::FingerprintExtractor;

    /// Replays one canned batch per segment.
    struct CannedExtractor(Vec<FingerprintBatch>);

    impl FingerprintExtractor for CannedExtractor {
        fn write(&mut self, _audio: &[u8]) {}

        fn drain(&mut self) -> FingerprintBatch {
            self.0.pop().unwrap_or_default()
        }
    }

    struct CannedClassifier(ClassifierOutput);

    #[async_trait]
    impl Classify for CannedClassifier {
        fn write(&mut self, _audio: &[u8]) {}

        async fn predict(&mut self) -> anyhow::Result<ClassifierOutput> {
            Ok(self.0.clone())
        }
    }

    fn chunk(segment_start: bool) -> StreamEvent {
        StreamEvent::Chunk(AudioChunk {
            data: Bytes::from_static(b"\0\0\0\0"),
            segment_start,
            t_buffer: 2.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn segment_boundary_scores_the_previous_slot() {
        let mut db = HotlistDb::open_in_memory().unwrap();
        let reference: FingerprintBatch = (0..15)
            .map(|i| Fingerprint { dt: i, hash: 500 + i })
            .collect();
        db.insert_track("spot.mp3", ContentKind::Advertisement, 15.0, &reference)
            .unwrap();
        let hotlist = Hotlist::new(Some(db));

        // The first segment's fingerprints replay the reference track.
        let batch: FingerprintBatch = (0..15)
            .map(|i| Fingerprint { dt: i, hash: 500 + i })
            .collect();
        let extractor = CannedExtractor(vec![batch]);

        let classifier = CannedClassifier(ClassifierOutput {
            kind: ContentKind::Music,
            confidence: 0.9,
            softmax: [0.02, 0.03, 0.9, 0.05],
            gain: -6.0,
        });

        let (events_tx, events_rx) = mpsc::channel(8);
        let (_fusion, mut predictions) =
            Predictor::spawn(events_rx, extractor, classifier, hotlist);

        events_tx.send(chunk(true)).await.unwrap();
        events_tx.send(chunk(false)).await.unwrap();
        events_tx.send(chunk(true)).await.unwrap();
        drop(events_tx);

        let prediction = tokio::time::timeout(Duration::from_secs(10), predictions.recv())
            .await
            .expect("finalize timer fires")
            .expect("first segment prediction");

        // The hotlist identified the ad and outranks the music classifier.
        assert_eq!(prediction.class, Verdict::Sure(ContentKind::Advertisement));
        let hl = prediction.hotlist.expect("hotlist result on first slot");
        assert_eq!(hl.matches, 15);
        assert_eq!(hl.file.as_deref(), Some("spot.mp3"));
        assert!(prediction.ml.is_some());
        assert_eq!(prediction.audio_len, 8);
    }
}
