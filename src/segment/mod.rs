//! Utterance boundary detection.
//!
//! The segmenter consumes fixed-duration audio blocks and emits finalized
//! utterances:
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌────────────────┐
//! │ Capture  │───▶│ Segmenter │───▶│ Finalized      │───▶ transcription
//! │ blocks   │    │ (FSM)     │    │ Utterance      │
//! └──────────┘    └───────────┘    └────────────────┘
//!                      │ ▲
//!                      ▼ │
//!                 UtteranceBuffer
//!                 (rolling store + overlap retention)
//! ```

pub mod segmenter;
pub mod utterance;

pub use segmenter::{Segmenter, SegmenterState};
pub use utterance::{Utterance, UtteranceState};
