//! # Audio Buffer
//!
//! Per-session accumulator of base64 audio fragments. Fragments are kept as
//! received and only concatenated on commit, so the clip handed to decoding is
//! exactly the client's payloads in arrival order.
//!
//! ## Ownership:
//! A buffer belongs to exactly one [`Session`](crate::relay::session::Session)
//! and is never shared, so no locking is needed here (unlike a buffer that is
//! written by a socket thread and read by a transcription thread).

/// Ordered list of base64 audio fragments for the current utterance.
#[derive(Debug, Default)]
pub struct AudioBuffer {
    chunks: Vec<String>,
    encoded_len: usize,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment. Empty fragments are kept so chunk counts match what the client sent.
    pub fn push(&mut self, chunk: String) {
        self.encoded_len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Number of fragments received since the last commit.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total length of the buffered base64 text in bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    /// Concatenate the fragments in arrival order without clearing.
    pub fn concatenated(&self) -> String {
        self.chunks.concat()
    }

    /// Concatenate the fragments and clear the buffer in one step.
    ///
    /// This is the only way a commit consumes the buffer, which keeps the
    /// "cleared exactly once per commit" rule in one place.
    pub fn take_concatenated(&mut self) -> String {
        let clip = self.concatenated();
        self.clear();
        clip
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.encoded_len = 0;
    }
}
