use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{ContentKind, Verdict, CLASS_COUNT};

/// One acoustic-classifier prediction for a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub kind: ContentKind,
    pub confidence: f32,
    pub softmax: [f32; CLASS_COUNT],
    /// Playback gain estimated by the model, in dB.
    pub gain: f32,
}

/// Scraped now-playing metadata, forwarded opaquely to the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleMeta {
    pub artist: String,
    pub title: String,
}

/// Smoothed classifier side of a [`FusedPrediction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlOutput {
    pub class: Verdict,
    /// Softmax after temporal smoothing.
    pub softmax: [f32; CLASS_COUNT],
    /// Softmax of this segment alone.
    pub softmax_raw: [f32; CLASS_COUNT],
    pub slots_future: usize,
    pub slots_past: usize,
}

/// Confidence-gated hotlist side of a [`FusedPrediction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotlistOutput {
    pub class: Verdict,
    pub file: Option<String>,
    pub matches: usize,
    pub total: usize,
}

/// Final per-segment output of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedPrediction {
    #[serde(skip)]
    pub audio: Bytes,
    pub audio_len: usize,
    pub gain: Option<f32>,
    pub ml: Option<MlOutput>,
    pub hotlist: Option<HotlistOutput>,
    pub class: Verdict,
    pub metadata: Option<TitleMeta>,
    pub t_buffer: f64,
    /// Wall-clock instant the slot was created, epoch milliseconds.
    pub play_time_ms: u64,
    /// Slot sequence number, monotonically increasing per session.
    pub slot: u64,
}
