use indicatif::{ProgressBar, ProgressStyle};
use radiko_engine::ProgressEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::utils::format_bytes;

fn recording_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len}s of broadcast")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Renders recording progress as a single bar measured in broadcast seconds.
#[derive(Clone)]
pub struct ProgressManager {
    bar: Arc<Mutex<Option<ProgressBar>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            bar: Arc::new(Mutex::new(None)),
            disabled: false,
        }
    }

    pub fn new_disabled() -> Self {
        Self {
            bar: Arc::new(Mutex::new(None)),
            disabled: true,
        }
    }

    pub fn handle_event(&self, event: ProgressEvent) {
        if self.disabled {
            return;
        }

        let Ok(mut bar) = self.bar.lock() else {
            return;
        };
        match event {
            ProgressEvent::RecordingStarted { station, expected } => {
                let new_bar = ProgressBar::new(expected.as_secs());
                new_bar.set_style(recording_style());
                new_bar.set_message(format!("Recording {station}"));
                new_bar.enable_steady_tick(Duration::from_millis(500));
                *bar = Some(new_bar);
            }
            ProgressEvent::SegmentWritten {
                bytes_written,
                covered,
                ..
            } => {
                if let Some(bar) = bar.as_ref() {
                    bar.set_position(covered.as_secs());
                    bar.set_message(format!("Recorded {}", format_bytes(bytes_written)));
                }
            }
            ProgressEvent::RecordingFinished {
                bytes_written,
                complete,
                ..
            } => {
                if let Some(bar) = bar.take() {
                    let state = if complete { "Finished" } else { "Stopped" };
                    bar.finish_with_message(format!("{state}, {}", format_bytes(bytes_written)));
                }
            }
        }
    }
}
