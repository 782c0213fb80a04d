//! Pipelined translation of finalized utterances.
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌──────────────────┐   ┌───────────┐
//! │ Segmenter │──▶│ Transcription │──▶│ Translation      │──▶│ Synthesis │
//! │           │   │ (sequential)  │   │ dispatcher (N)   │   │ (spawned) │
//! └───────────┘   └───────────────┘   └──────────────────┘   └───────────┘
//!                                            │ completion callback
//!                                            ▼
//!                              broadcast snapshot + display + history
//! ```
//!
//! Transcription is strictly sequential; translation fans out to a bounded
//! worker pool; synthesis is fire-and-forget. Completions may arrive out of
//! enqueue order and every consumer downstream tolerates that.

pub mod coordinator;
pub mod dispatch;
pub mod synthesis;
pub mod transcribe;

pub use coordinator::{Pipeline, PipelineHandle};
pub use dispatch::{JobStatus, TranslationDispatcher, TranslationJob};
pub use synthesis::SynthesisStage;
pub use transcribe::TranscriptionStage;
