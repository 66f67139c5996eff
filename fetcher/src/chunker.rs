use std::time::Instant;

use bytes::Bytes;
use model::AudioChunk;

/// Splits the incoming byte flow into fixed-duration segments and keeps the
/// rolling buffered-seconds estimate.
///
/// The estimate is `bytes_received / byte_rate - wall_clock_since_first_byte`:
/// how far ahead of real time the server has fed us.
pub struct SegmentChunker {
    byte_rate: u64,
    limit: usize,
    received: u64,
    in_segment: usize,
    first_data: Option<Instant>,
}

impl SegmentChunker {
    #[must_use]
    pub fn new(byte_rate: u64, segment_duration_secs: u64) -> Self {
        Self {
            byte_rate,
            limit: (byte_rate * segment_duration_secs) as usize,
            received: 0,
            in_segment: 0,
            first_data: None,
        }
    }

    /// The stream URL may move to a server with a different rate.
    pub fn set_byte_rate(&mut self, byte_rate: u64, segment_duration_secs: u64) {
        self.byte_rate = byte_rate;
        self.limit = (byte_rate * segment_duration_secs) as usize;
    }

    #[must_use]
    pub fn t_buffer(&self) -> f64 {
        let elapsed = self
            .first_data
            .map_or(0.0, |first| first.elapsed().as_secs_f64());
        self.received as f64 / self.byte_rate as f64 - elapsed
    }

    /// Feeds one network read into the chunker. A single buffer may span
    /// several segment boundaries and then yields several chunks, each chunk
    /// after a boundary flagged `segment_start`.
    pub fn push(&mut self, mut data: Bytes) -> Vec<AudioChunk> {
        if data.is_empty() {
            return Vec::new();
        }

        let mut segment_start = self.first_data.is_none();
        if segment_start {
            self.first_data = Some(Instant::now());
        }
        self.received += data.len() as u64;
        let t_buffer = self.t_buffer();

        if self.limit == 0 {
            return vec![AudioChunk {
                data,
                segment_start,
                t_buffer,
            }];
        }

        let mut chunks = Vec::new();
        loop {
            let remaining = self.limit - self.in_segment;
            if remaining == 0 {
                self.in_segment = 0;
                segment_start = true;
                continue;
            }
            if data.len() <= remaining {
                self.in_segment += data.len();
                chunks.push(AudioChunk {
                    data,
                    segment_start,
                    t_buffer,
                });
                break;
            }
            chunks.push(AudioChunk {
                data: data.split_to(remaining),
                segment_start,
                t_buffer,
            });
            self.in_segment = 0;
            segment_start = true;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u64 = 16_000;
    const SEG_SECS: u64 = 1;
    const LIMIT: usize = (RATE * SEG_SECS) as usize;

    fn total_len(chunks: &[AudioChunk]) -> usize {
        chunks.iter().map(AudioChunk::len).sum()
    }

    #[test]
    fn first_chunk_starts_a_segment() {
        let mut chunker = SegmentChunker::new(RATE, SEG_SECS);
        let chunks = chunker.push(Bytes::from(vec![0u8; 100]));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].segment_start);
    }

    #[test]
    fn split_at_two_and_a_half_segments() {
        let mut chunker = SegmentChunker::new(RATE, SEG_SECS);
        // Consume the initial segment-start flag first.
        let head = chunker.push(Bytes::from(vec![0u8; LIMIT / 2]));
        assert!(head[0].segment_start);

        let input = LIMIT * 5 / 2;
        let chunks = chunker.push(Bytes::from(vec![0u8; input]));

        assert_eq!(total_len(&chunks), input);
        let starts: Vec<bool> = chunks.iter().map(|c| c.segment_start).collect();
        assert_eq!(starts, vec![false, true, true]);
        assert_eq!(chunks[0].len(), LIMIT / 2);
        assert_eq!(chunks[1].len(), LIMIT);
        assert_eq!(chunks[2].len(), LIMIT);
    }

    #[test]
    fn exact_boundary_flags_next_push() {
        let mut chunker = SegmentChunker::new(RATE, SEG_SECS);
        let chunks = chunker.push(Bytes::from(vec![0u8; LIMIT]));
        assert_eq!(chunks.len(), 1);

        let next = chunker.push(Bytes::from(vec![0u8; 10]));
        assert_eq!(next.len(), 1);
        assert!(next[0].segment_start);
        assert_eq!(next[0].len(), 10);
    }

    #[test]
    fn zero_duration_disables_splitting() {
        let mut chunker = SegmentChunker::new(RATE, 0);
        let chunks = chunker.push(Bytes::from(vec![0u8; LIMIT * 3]));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), LIMIT * 3);
    }

    #[test]
    fn t_buffer_tracks_received_bytes() {
        let mut chunker = SegmentChunker::new(RATE, SEG_SECS);
        let chunks = chunker.push(Bytes::from(vec![0u8; LIMIT * 2]));
        // Two seconds of audio arrived in well under a second of wall clock.
        assert!(chunks.last().unwrap().t_buffer > 1.5);
    }
}
