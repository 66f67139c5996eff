use bytes::Bytes;

/// A slice of the live stream as received from the network.
///
/// `segment_start` marks the first chunk of a new fixed-duration segment.
/// `t_buffer` is the estimated number of seconds of audio buffered ahead of
/// real time at the moment the chunk was emitted.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub segment_start: bool,
    pub t_buffer: f64,
}

impl AudioChunk {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
