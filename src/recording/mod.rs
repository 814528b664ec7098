mod gif_encoder;
mod post;
mod progress;
mod recorder;

pub use gif_encoder::GifAssembler;
pub use post::ExternalEncoder;
pub use progress::{ProgressCallback, PROGRESS_COMPLETE, PROGRESS_INDETERMINATE};
pub use recorder::Recorder;

use std::path::PathBuf;
use std::time::Duration;

use crate::capture::Rectangle;
use crate::sink::{CodecOptions, OutputKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub fps: u32,
    /// `0` records until stopped.
    pub duration_secs: u32,
    pub region: Rectangle,
    pub output: OutputKind,
    pub cache_path: PathBuf,
    pub codec: CodecOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub frame_interval_ms: u64,
    /// `0` means unbounded.
    pub total_frames: u64,
}

impl FrameTiming {
    pub fn new(fps: u32, duration_secs: u32) -> Self {
        let fps = u64::from(fps.max(1));
        Self {
            frame_interval_ms: 1000 / fps,
            total_frames: fps * u64::from(duration_secs),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.total_frames == 0
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_submitted: u64,
    pub late_frames: u64,
    pub frame_interval_ms: u64,
    pub elapsed: Duration,
    pub stopped_early: bool,
}
