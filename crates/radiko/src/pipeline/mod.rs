//! Drives walker, fetcher and sink for one recording.

pub mod progress;
pub mod recording;
pub mod reorder;

pub use progress::{OnProgress, ProgressEvent};
pub use recording::{RecordingPipeline, RecordingResult};
pub use reorder::ReorderBuffer;
