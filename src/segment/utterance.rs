//! Finalized utterance type.

/// Lifecycle of an utterance after finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    /// Emitted by the segmenter, not yet transcribed.
    Finalized,
    /// Transcription succeeded; a translation job exists for it.
    Transcribed,
    /// The recognition engine failed; the utterance is dropped from the live
    /// stream but kept in history.
    TranscriptionFailed,
    /// Dropped during shutdown or under overload before completion.
    Abandoned,
}

/// One finalized, contiguous span of speech.
///
/// Identity is the monotonically increasing `id`. The sample range uses the
/// absolute positions of [`crate::audio::UtteranceBuffer`]; `samples` holds
/// the extracted audio (overlap prefix followed by the finalized range).
/// Immutable once finalized except for the state transitions above.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: u64,
    /// First sample of the finalized range (overlap prefix excluded).
    pub start_sample: u64,
    /// One past the last sample of the finalized range.
    pub end_sample: u64,
    /// Where the carried overlap prefix begins; equals `start_sample` when
    /// there was no previous utterance to carry from.
    pub overlap_start: u64,
    /// Stream-relative start timestamp in milliseconds.
    pub started_at_ms: u64,
    /// Stream-relative end timestamp in milliseconds.
    pub ended_at_ms: u64,
    /// True when finalization was forced by the duration cap rather than
    /// detected silence.
    pub forced: bool,
    /// Extracted audio: overlap prefix ++ finalized range, 16-bit PCM.
    pub samples: Vec<i16>,
    pub state: UtteranceState,
}

impl Utterance {
    /// Duration of the finalized range in milliseconds (prefix excluded).
    pub fn duration_ms(&self) -> u64 {
        self.ended_at_ms.saturating_sub(self.started_at_ms)
    }
}
