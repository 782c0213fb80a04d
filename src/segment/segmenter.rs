//! Voice-activity state machine.
//!
//! Consumes fixed-duration audio blocks, classifies each through the block
//! gates, and places utterance boundaries:
//! - speech must run contiguously for `min_speech_to_start_ms` before an
//!   utterance starts accumulating (coughs and noise bursts are discarded),
//! - silence lasting `min_silence_to_finalize_ms` finalizes the utterance at
//!   the position silence *began*, so trailing silence is excluded,
//! - `max_utterance_duration_s` forces a finalize regardless of silence so a
//!   continuous speaker never delays the pipeline unboundedly.
//!
//! All bookkeeping is in absolute sample positions, so decisions are
//! deterministic and independent of wall-clock time.

use crate::audio::buffer::UtteranceBuffer;
use crate::audio::gate::BlockGate;
use crate::config::RuntimeConfig;
use crate::segment::utterance::{Utterance, UtteranceState};
use tracing::debug;

/// Current state of the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No utterance in progress; watching for a qualifying speech span.
    Idle,
    /// An utterance is accumulating speech.
    Accumulating,
    /// Silence observed during an utterance; waiting to confirm the end.
    PendingSilence,
}

/// Segmenter that turns classified blocks into finalized utterances.
pub struct Segmenter {
    gate: BlockGate,
    buffer: UtteranceBuffer,
    sample_rate: u32,

    min_speech_samples: u64,
    min_silence_samples: u64,
    max_utterance_samples: u64,
    overlap_samples: u64,

    state: SegmenterState,
    /// Where the current candidate speech span began (Idle only).
    candidate_start: Option<u64>,
    /// Contiguous speech accumulated toward the start threshold (Idle only).
    candidate_run: u64,
    /// Start of the utterance being accumulated.
    utterance_start: u64,
    /// Where the current silence span began (PendingSilence only).
    silence_start: Option<u64>,
    /// End of the previously finalized utterance, for the overlap prefix.
    prev_end: Option<u64>,
    next_id: u64,
}

impl Segmenter {
    /// Builds a segmenter from the runtime configuration with the default
    /// block gate.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let gate = BlockGate::new(
            config.audio.energy_threshold,
            config.audio.no_speech_threshold,
        );
        Self::with_gate(config, gate)
    }

    /// Builds a segmenter with a custom block gate (model-backed or mock).
    pub fn with_gate(config: &RuntimeConfig, gate: BlockGate) -> Self {
        let rate = config.audio.sample_rate as u64;
        let buffer = UtteranceBuffer::new(
            config.audio.audio_buffer_duration_s,
            config.audio.sample_rate,
        );
        Self {
            gate,
            buffer,
            sample_rate: config.audio.sample_rate,
            min_speech_samples: config.segmenter.min_speech_to_start_ms as u64 * rate / 1000,
            min_silence_samples: config.segmenter.min_silence_to_finalize_ms as u64 * rate / 1000,
            max_utterance_samples: (config.segmenter.max_utterance_duration_s as f64
                * rate as f64) as u64,
            overlap_samples: config.segmenter.overlap_after_processing_ms as u64 * rate / 1000,
            state: SegmenterState::Idle,
            candidate_start: None,
            candidate_run: 0,
            utterance_start: 0,
            silence_start: None,
            prev_end: None,
            next_id: 0,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Samples evicted from the rolling buffer so far.
    pub fn evicted_samples(&self) -> u64 {
        self.buffer.total_evicted()
    }

    /// Consumes one audio block and returns any utterance finalized by it.
    pub fn push_block(&mut self, samples: &[i16]) -> Vec<Utterance> {
        let block_start = self.buffer.latest();
        self.buffer.append(samples);
        let block_end = self.buffer.latest();

        let is_speech = self.gate.is_speech(samples, self.sample_rate);

        match self.state {
            SegmenterState::Idle => {
                self.on_idle(is_speech, block_start, block_end);
                Vec::new()
            }
            SegmenterState::Accumulating => self.on_accumulating(is_speech, block_start, block_end),
            SegmenterState::PendingSilence => {
                self.on_pending_silence(is_speech, block_start, block_end)
            }
        }
    }

    fn on_idle(&mut self, is_speech: bool, block_start: u64, block_end: u64) {
        if is_speech {
            if self.candidate_start.is_none() {
                self.candidate_start = Some(block_start);
            }
            self.candidate_run += block_end - block_start;
            if self.candidate_run >= self.min_speech_samples {
                // Qualifying span: the utterance starts where the span began.
                self.utterance_start = self.candidate_start.unwrap_or(block_start);
                self.state = SegmenterState::Accumulating;
                self.silence_start = None;
                debug!(start = self.utterance_start, "utterance accumulating");
            }
        } else if self.candidate_start.take().is_some() {
            // Burst too short to qualify: discard and keep waiting.
            debug!(run = self.candidate_run, "speech burst below start threshold, discarded");
            self.candidate_run = 0;
        }
    }

    fn on_accumulating(
        &mut self,
        is_speech: bool,
        block_start: u64,
        block_end: u64,
    ) -> Vec<Utterance> {
        if !is_speech {
            self.state = SegmenterState::PendingSilence;
            self.silence_start = Some(block_start);
        }
        self.check_forced(block_end)
    }

    fn on_pending_silence(
        &mut self,
        is_speech: bool,
        block_start: u64,
        block_end: u64,
    ) -> Vec<Utterance> {
        if is_speech {
            // Speech resumed before the threshold: cancel the silence counter.
            self.state = SegmenterState::Accumulating;
            self.silence_start = None;
            return self.check_forced(block_end);
        }

        let silence_start = self.silence_start.unwrap_or(block_start);
        if block_end - silence_start >= self.min_silence_samples {
            // End boundary sits where silence began, not where it was
            // confirmed: trailing silence never reaches the recognizer.
            return self.finalize(silence_start, false);
        }
        self.check_forced(block_end)
    }

    fn check_forced(&mut self, block_end: u64) -> Vec<Utterance> {
        if block_end - self.utterance_start >= self.max_utterance_samples {
            return self.finalize(block_end, true);
        }
        Vec::new()
    }

    fn finalize(&mut self, end: u64, forced: bool) -> Vec<Utterance> {
        let start = self.utterance_start;

        // A forced cut restarts accumulation from the very next sample; a
        // silence cut goes back to watching for speech.
        if forced {
            self.state = SegmenterState::Accumulating;
            self.utterance_start = end;
        } else {
            self.state = SegmenterState::Idle;
        }
        self.silence_start = None;
        self.candidate_start = None;
        self.candidate_run = 0;

        if end <= start {
            // Nothing accumulated (an all-silence forced window); emit nothing.
            self.state = SegmenterState::Idle;
            return Vec::new();
        }

        // Overlap prefix: the tail of the previous utterance, retained in the
        // rolling buffer, so words spanning the cut are not clipped.
        let overlap_start = match self.prev_end {
            Some(prev_end) => prev_end.saturating_sub(self.overlap_samples),
            None => start,
        };
        let mut samples = match self.prev_end {
            Some(prev_end) => self.buffer.extract(overlap_start, prev_end),
            None => Vec::new(),
        };
        samples.extend(self.buffer.extract(start, end));

        self.prev_end = Some(end);

        let rate = self.sample_rate as u64;
        let utterance = Utterance {
            id: self.next_id,
            start_sample: start,
            end_sample: end,
            overlap_start,
            started_at_ms: start * 1000 / rate,
            ended_at_ms: end * 1000 / rate,
            forced,
            samples,
            state: UtteranceState::Finalized,
        };
        self.next_id += 1;
        debug!(
            id = utterance.id,
            start_ms = utterance.started_at_ms,
            end_ms = utterance.ended_at_ms,
            forced,
            "utterance finalized"
        );
        vec![utterance]
    }
}
