pub mod cache;
pub mod capture;
pub mod config;
pub mod error;
pub mod recording;
pub mod sink;

pub use cache::DiskCache;
pub use capture::{list_monitors, Frame, FrameSource, MonitorInfo, Rectangle, ScreenSource};
pub use config::Config;
pub use error::{RecorderError, Result};
pub use recording::{
    ExternalEncoder, FrameTiming, ProgressCallback, Recorder, RecordingConfig, RecordingState,
    SessionStats, PROGRESS_COMPLETE, PROGRESS_INDETERMINATE,
};
pub use sink::{CodecOptions, FfmpegTranscoder, FrameSink, OutputKind, VideoCodec};
