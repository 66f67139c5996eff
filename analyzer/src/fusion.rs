use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use model::{
    AudioChunk, ClassifierOutput, ContentKind, Detection, FusedPrediction, HotlistOutput,
    MlOutput, TitleMeta, Verdict, CLASS_COUNT,
};
use ndarray::Array1;
use ndarray_stats::QuantileExt;

/// Bounded cache length; the oldest slot is evicted first, finalized or not.
pub const CACHE_MAX_LEN: usize = 50;

/// Finalization happens this long before the audio is expected to play, so
/// downstream consumers have time to react.
pub const PLAYOUT_MARGIN: Duration = Duration::from_millis(500);

/// Slots with almost no buffer still get a minimal finalize delay, leaving
/// the matcher and classifier a chance to land their results.
const MIN_FINALIZE_DELAY: Duration = Duration::from_secs(2);

const SLOTS_FUTURE_MAX: usize = 4;
const WEIGHTS_WIDTH: usize = 10;

/// Empirical smoothing kernels indexed by the number of available future
/// slots. Fewer future slots are compensated by flatter weighting near the
/// edges; with the full four, the kernel peaks on the slot itself.
const MOV_AVG_WEIGHTS: [[f32; WEIGHTS_WIDTH]; SLOTS_FUTURE_MAX + 1] = [
    [0.05, 0.05, 0.05, 0.10, 0.10, 0.15, 0.20, 0.30, 0.80, 1.00],
    [0.10, 0.15, 0.20, 0.25, 0.30, 0.35, 0.45, 0.70, 0.80, 1.00],
    [0.10, 0.15, 0.20, 0.25, 0.30, 0.35, 0.45, 0.70, 0.80, 1.00],
    [0.10, 0.20, 0.30, 0.40, 0.50, 0.60, 0.70, 0.80, 0.90, 1.00],
    [0.25, 0.35, 0.50, 0.70, 0.90, 1.00, 1.00, 0.80, 0.70, 0.20],
];

const ML_CONFIDENCE_THRESHOLD: f32 = 0.65;
const HOTLIST_MIN_MATCHES: usize = 10;
const HOTLIST_MIN_SYNC_RATIO: f64 = 0.2;

/// Partial results addressed to a segment slot.
#[derive(Debug, Clone)]
pub enum Payload {
    Audio(AudioChunk),
    Classifier(ClassifierOutput),
    Matcher(Detection),
    Title(TitleMeta),
}

/// Finalize-timer request returned when a write opened a new slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTimer {
    pub seq: u64,
    pub delay: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum SlotState {
    Open,
    Finalizing,
    Closed,
}

struct CacheSlot {
    seq: u64,
    created_ms: u64,
    t_buffer: f64,
    audio: BytesMut,
    gain: Option<f32>,
    ml: Option<ClassifierOutput>,
    hotlist: Option<Detection>,
    state: SlotState,
}

impl CacheSlot {
    fn new(seq: u64, t_buffer: f64) -> Self {
        Self {
            seq,
            created_ms: epoch_ms(),
            t_buffer,
            audio: BytesMut::new(),
            gain: None,
            ml: None,
            hotlist: None,
            state: SlotState::Open,
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Buffers per-segment partial results that arrive out of order and at
/// different times, and emits one smoothed, confidence-gated classification
/// per segment once its finalize timer fires.
///
/// Slots are kept newest-first and are never reordered; sequence numbers are
/// contiguous, so slot lookup is O(1). Finalized slots stay in the cache as
/// past context for younger slots until eviction.
pub struct FusionCache {
    slots: VecDeque<CacheSlot>,
    slot_counter: u64,
    metadata: Option<TitleMeta>,
    playout_margin: Duration,
}

impl Default for FusionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_margin(PLAYOUT_MARGIN)
    }

    #[must_use]
    pub fn with_margin(playout_margin: Duration) -> Self {
        Self {
            slots: VecDeque::with_capacity(CACHE_MAX_LEN + 1),
            slot_counter: 0,
            metadata: None,
            playout_margin,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Writes a partial result to the current (newest) slot. Audio flagged
    /// `segment_start` opens a new slot; the returned [`SlotTimer`] asks the
    /// caller to schedule its finalization.
    pub fn write(&mut self, payload: Payload) -> Option<SlotTimer> {
        match payload {
            Payload::Audio(chunk) => {
                let timer = if self.slots.is_empty() {
                    Some(self.new_slot(chunk.t_buffer))
                } else if chunk.segment_start && !self.slots[0].audio.is_empty() {
                    Some(self.new_slot(chunk.t_buffer))
                } else {
                    None
                };
                self.slots[0].audio.extend_from_slice(&chunk.data);
                timer
            }
            Payload::Classifier(output) => {
                let timer = self.ensure_slot();
                let slot = &mut self.slots[0];
                if slot.ml.is_some() {
                    log::warn!("overwriting ml cache data!");
                }
                slot.gain = Some(output.gain);
                slot.ml = Some(output);
                timer
            }
            Payload::Matcher(detection) => {
                let timer = self.ensure_slot();
                let slot = &mut self.slots[0];
                if slot.hotlist.is_some() {
                    log::warn!("overwriting hotlist cache data!");
                }
                slot.hotlist = Some(detection);
                timer
            }
            Payload::Title(meta) => {
                self.metadata = Some(meta);
                None
            }
        }
    }

    /// Writes a partial result to the addressed slot instead of the newest
    /// one. Returns false (with a warning) when the slot has been evicted.
    pub fn write_to(&mut self, seq: u64, payload: Payload) -> bool {
        let Some(index) = self.index_of(seq) else {
            log::warn!("write: slot #{seq} not in cache");
            return false;
        };
        let slot = &mut self.slots[index];
        match payload {
            Payload::Audio(chunk) => slot.audio.extend_from_slice(&chunk.data),
            Payload::Classifier(output) => {
                if slot.ml.is_some() {
                    log::warn!("overwriting ml cache data!");
                }
                slot.gain = Some(output.gain);
                slot.ml = Some(output);
            }
            Payload::Matcher(detection) => {
                if slot.hotlist.is_some() {
                    log::warn!("overwriting hotlist cache data!");
                }
                slot.hotlist = Some(detection);
            }
            Payload::Title(meta) => self.metadata = Some(meta),
        }
        true
    }

    fn ensure_slot(&mut self) -> Option<SlotTimer> {
        self.slots.is_empty().then(|| self.new_slot(0.0))
    }

    fn new_slot(&mut self, t_buffer: f64) -> SlotTimer {
        self.slot_counter += 1;
        let seq = self.slot_counter;
        self.slots.push_front(CacheSlot::new(seq, t_buffer));

        if self.slots.len() > CACHE_MAX_LEN {
            if let Some(evicted) = self.slots.pop_back() {
                if evicted.state == SlotState::Open {
                    log::debug!("evicted slot #{} before finalization", evicted.seq);
                }
            }
        }

        let delay = Duration::from_secs_f64(t_buffer.max(MIN_FINALIZE_DELAY.as_secs_f64()))
            .saturating_sub(self.playout_margin);
        SlotTimer { seq, delay }
    }

    /// Sequence numbers are contiguous newest-first, so the slot position
    /// follows from the newest sequence number alone.
    fn index_of(&self, seq: u64) -> Option<usize> {
        let newest = self.slots.front()?.seq;
        let index = newest.checked_sub(seq)? as usize;
        (index < self.slots.len()).then_some(index)
    }

    /// Runs the smoothing and fusion for one slot once its timer fires.
    ///
    /// An evicted or already-finalized slot is a logged no-op: at most one
    /// prediction is ever emitted per slot.
    pub fn finalize(&mut self, seq: u64) -> Option<FusedPrediction> {
        let Some(index) = self.index_of(seq) else {
            log::warn!("finalize: cache item #{seq} not found");
            return None;
        };
        if self.slots[index].state != SlotState::Open {
            log::warn!("finalize: slot #{seq} already finalized");
            return None;
        }
        self.slots[index].state = SlotState::Finalizing;

        let slots_future = index.min(SLOTS_FUTURE_MAX);
        let slots_past =
            (self.slots.len() - 1 - index).min(WEIGHTS_WIDTH - slots_future - 1);

        let ml = self.slots[index]
            .ml
            .as_ref()
            .map(|raw| self.smooth(index, slots_future, slots_past, raw));

        let hotlist = self.slots[index].hotlist.as_ref().map(|detection| {
            let confident = detection.matches_total >= HOTLIST_MIN_MATCHES
                && detection.matches_sync as f64 / detection.matches_total as f64
                    > HOTLIST_MIN_SYNC_RATIO;
            let class = match detection.kind {
                Some(kind) if confident => Verdict::Sure(kind),
                _ => Verdict::Unsure,
            };
            HotlistOutput {
                class,
                file: if confident { detection.file.clone() } else { None },
                matches: detection.matches_sync,
                total: detection.matches_total,
            }
        });

        // Hotlist, when confident, is always right; machine learning
        // otherwise.
        let class = match (&hotlist, &ml) {
            (Some(hl), _) if hl.class.is_sure() => hl.class,
            (_, Some(ml)) if ml.class.is_sure() => ml.class,
            _ => Verdict::Unsure,
        };

        let slot = &mut self.slots[index];
        slot.state = SlotState::Closed;

        let audio = slot.audio.clone().freeze();
        log::debug!(
            "out: slot #{seq} class={class:#} audio={} bytes",
            audio.len()
        );

        Some(FusedPrediction {
            audio_len: audio.len(),
            audio,
            gain: slot.gain,
            ml,
            hotlist,
            class,
            metadata: self.metadata.clone(),
            t_buffer: slot.t_buffer,
            play_time_ms: slot.created_ms,
            slot: seq,
        })
    }

    /// Weighted moving average of classifier softmaxes over the available
    /// temporal window. Slots without a classifier output are skipped and
    /// the weight sum adjusted, not zero-filled.
    fn smooth(
        &self,
        index: usize,
        slots_future: usize,
        slots_past: usize,
        raw: &ClassifierOutput,
    ) -> MlOutput {
        let weights = &MOV_AVG_WEIGHTS[slots_future];
        let mut smoothed = Array1::<f32>::zeros(CLASS_COUNT);

        for class in 0..CLASS_COUNT {
            let mut acc = 0.0f32;
            let mut used = 0.0f32;
            for j in 0..=(slots_past + slots_future) {
                let slot = &self.slots[index + slots_past - j];
                if let Some(ml) = &slot.ml {
                    acc += ml.softmax[class] * weights[j];
                    used += weights[j];
                }
            }
            smoothed[class] = if used > 0.0 { acc / used } else { 0.0 };
        }

        let class = match smoothed.argmax() {
            Ok(winner) if smoothed[winner] > ML_CONFIDENCE_THRESHOLD => {
                match ContentKind::from_index(winner) {
                    Some(kind) => Verdict::Sure(kind),
                    None => Verdict::Unsure,
                }
            }
            _ => Verdict::Unsure,
        };

        let mut softmax = [0.0f32; CLASS_COUNT];
        for (target, value) in softmax.iter_mut().zip(smoothed.iter()) {
            *target = *value;
        }

        MlOutput {
            class,
            softmax,
            softmax_raw: raw.softmax,
            slots_future,
            slots_past,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn audio(segment_start: bool) -> Payload {
        Payload::Audio(AudioChunk {
            data: Bytes::from_static(b"aabb"),
            segment_start,
            t_buffer: 3.0,
        })
    }

    fn classifier(softmax: [f32; 4]) -> Payload {
        let winner = softmax
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        Payload::Classifier(ClassifierOutput {
            kind: ContentKind::from_index(winner).unwrap(),
            confidence: softmax[winner],
            softmax,
            gain: -7.5,
        })
    }

    fn matcher(sync: usize, total: usize) -> Payload {
        Payload::Matcher(Detection {
            file: Some("spot.mp3".to_owned()),
            kind: Some(ContentKind::Advertisement),
            matches_sync: sync,
            matches_total: total,
            ..Detection::empty()
        })
    }

    /// Opens `count` slots, each with a classifier output, newest last.
    fn filled_cache(count: usize, softmax: [f32; 4]) -> (FusionCache, Vec<SlotTimer>) {
        let mut cache = FusionCache::new();
        let mut timers = Vec::new();
        for _ in 0..count {
            timers.push(cache.write(audio(true)).unwrap());
            cache.write(classifier(softmax));
        }
        (cache, timers)
    }

    #[test]
    fn one_prediction_per_slot_never_two() {
        let (mut cache, timers) = filled_cache(1, [0.9, 0.1, 0.0, 0.0]);
        let seq = timers[0].seq;

        assert!(cache.finalize(seq).is_some());
        assert!(cache.finalize(seq).is_none());
    }

    #[test]
    fn evicted_slot_finalizes_to_nothing() {
        let (mut cache, timers) = filled_cache(CACHE_MAX_LEN + 3, [0.9, 0.1, 0.0, 0.0]);
        assert_eq!(cache.len(), CACHE_MAX_LEN);

        // The first slots fell off the back of the cache.
        assert!(cache.finalize(timers[0].seq).is_none());
        assert!(cache.finalize(timers[2].seq).is_none());
        assert!(cache.finalize(timers[3].seq).is_some());
    }

    #[test]
    fn window_bounds_hold_for_any_position() {
        let (mut cache, timers) = filled_cache(12, [0.9, 0.1, 0.0, 0.0]);
        for timer in &timers {
            if let Some(prediction) = cache.finalize(timer.seq) {
                let ml = prediction.ml.expect("classifier output present");
                assert!(ml.slots_future <= 4);
                assert!(ml.slots_past + ml.slots_future + 1 <= 10);
            }
        }
    }

    #[test]
    fn newest_slot_has_no_future_context() {
        let (mut cache, timers) = filled_cache(6, [0.9, 0.1, 0.0, 0.0]);
        let newest = timers.last().unwrap().seq;
        let ml = cache.finalize(newest).unwrap().ml.unwrap();
        assert_eq!(ml.slots_future, 0);
        assert_eq!(ml.slots_past, 5);
    }

    #[test]
    fn missing_classifier_outputs_are_skipped_not_zero_filled() {
        let mut cache = FusionCache::new();
        let first = cache.write(audio(true)).unwrap();
        cache.write(classifier([1.0, 0.0, 0.0, 0.0]));
        // Middle slot carries no classifier output at all.
        let middle = cache.write(audio(true)).unwrap();
        let _ = middle;
        let last = cache.write(audio(true)).unwrap();
        cache.write(classifier([1.0, 0.0, 0.0, 0.0]));
        let _ = first;

        let ml = cache.finalize(last.seq).unwrap().ml.unwrap();
        // Skipping the empty slot keeps the average at exactly 1.0.
        assert!((ml.softmax[0] - 1.0).abs() < 1e-6);
        assert_eq!(ml.class, Verdict::Sure(ContentKind::Advertisement));
    }

    #[test]
    fn ml_confidence_gate_at_065() {
        let (mut cache, timers) = filled_cache(1, [0.6, 0.2, 0.1, 0.1]);
        let prediction = cache.finalize(timers[0].seq).unwrap();
        assert_eq!(prediction.ml.unwrap().class, Verdict::Unsure);
        assert_eq!(prediction.class, Verdict::Unsure);

        let (mut cache, timers) = filled_cache(1, [0.7, 0.1, 0.1, 0.1]);
        let prediction = cache.finalize(timers[0].seq).unwrap();
        assert_eq!(
            prediction.class,
            Verdict::Sure(ContentKind::Advertisement)
        );
    }

    #[test]
    fn hotlist_confidence_gate() {
        // 10 total with 3 in sync passes (0.3 > 0.2).
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap();
        cache.write(matcher(3, 10));
        let prediction = cache.finalize(timer.seq).unwrap();
        let hotlist = prediction.hotlist.unwrap();
        assert_eq!(hotlist.class, Verdict::Sure(ContentKind::Advertisement));
        assert_eq!(hotlist.file.as_deref(), Some("spot.mp3"));

        // 9 total fails the absolute floor.
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap();
        cache.write(matcher(9, 9));
        let hotlist = cache.finalize(timer.seq).unwrap().hotlist.unwrap();
        assert_eq!(hotlist.class, Verdict::Unsure);
        assert_eq!(hotlist.file, None);

        // 2/10 fails the sync ratio.
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap();
        cache.write(matcher(2, 10));
        assert_eq!(
            cache.finalize(timer.seq).unwrap().hotlist.unwrap().class,
            Verdict::Unsure
        );
    }

    #[test]
    fn hotlist_takes_precedence_over_classifier() {
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap();
        cache.write(classifier([0.0, 0.0, 0.9, 0.1]));
        cache.write(matcher(8, 12));
        let prediction = cache.finalize(timer.seq).unwrap();
        // Both are confident; the hotlist wins.
        assert_eq!(
            prediction.class,
            Verdict::Sure(ContentKind::Advertisement)
        );
    }

    #[test]
    fn unsure_when_neither_side_is_confident() {
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap();
        cache.write(classifier([0.4, 0.3, 0.2, 0.1]));
        cache.write(matcher(1, 10));
        let prediction = cache.finalize(timer.seq).unwrap();
        assert_eq!(prediction.class, Verdict::Unsure);
    }

    #[test]
    fn cache_never_exceeds_max_len() {
        let (cache, _) = filled_cache(CACHE_MAX_LEN * 2, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(cache.len(), CACHE_MAX_LEN);
    }

    #[test]
    fn addressed_write_reaches_older_slot() {
        let mut cache = FusionCache::new();
        let first = cache.write(audio(true)).unwrap();
        let _second = cache.write(audio(true)).unwrap();

        assert!(cache.write_to(first.seq, matcher(5, 20)));
        let hotlist = cache.finalize(first.seq).unwrap().hotlist.unwrap();
        assert_eq!(hotlist.total, 20);

        // Writes to evicted slots are refused.
        assert!(!cache.write_to(0, matcher(1, 1)));
    }

    #[test]
    fn audio_accumulates_until_segment_boundary() {
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap();
        assert!(cache.write(audio(false)).is_none());
        assert!(cache.write(audio(false)).is_none());
        let next = cache.write(audio(true)).unwrap();
        assert_eq!(next.seq, timer.seq + 1);

        let prediction = cache.finalize(timer.seq).unwrap();
        assert_eq!(prediction.audio_len, 3 * 4);
    }

    #[test]
    fn finalize_delay_honors_playout_margin() {
        let mut cache = FusionCache::new();
        let timer = cache.write(audio(true)).unwrap(); // t_buffer = 3.0
        assert_eq!(timer.delay, Duration::from_millis(2500));

        let mut cache = FusionCache::with_margin(Duration::ZERO);
        let timer = cache.write(audio(true)).unwrap();
        assert_eq!(timer.delay, Duration::from_secs(3));
    }
}
