//! Local output: display/audio scheduling and the permanent history log.

pub mod history;
pub mod sink;
pub mod synchronizer;

pub use history::{HistoryEntry, HistoryLog, HistoryStatus};
pub use sink::{AudioSink, CollectorAudioSink, CollectorDisplay, DisplaySink, NullAudioSink, StdoutDisplay};
pub use synchronizer::{Clock, OutputEvent, OutputSynchronizer, SystemClock};
