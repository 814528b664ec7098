mod avi;
mod ffmpeg;
mod worker;

pub use avi::{AviSink, AviWriter};
pub use ffmpeg::{FfmpegSink, FfmpegTranscoder};
pub use worker::{FrameWorker, FrameWriter};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::capture::Frame;
use crate::error::RecorderError;

pub trait FrameSink: Send {
    fn submit(&mut self, frame: Frame) -> Result<()>;

    fn finish(&mut self) -> Result<()>;

    fn dispose(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Gif,
    Avi,
    Ffmpeg,
}

impl OutputKind {
    pub fn all() -> &'static [OutputKind] {
        &[OutputKind::Gif, OutputKind::Avi, OutputKind::Ffmpeg]
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputKind::Gif => "gif",
            OutputKind::Avi => "avi",
            OutputKind::Ffmpeg => "ffmpeg",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OutputKind::Gif => "Animated GIF",
            OutputKind::Avi => "AVI (uncompressed)",
            OutputKind::Ffmpeg => "FFmpeg video",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Gif => "gif",
            OutputKind::Avi => "avi",
            OutputKind::Ffmpeg => "mp4",
        }
    }

    pub fn is_container(&self) -> bool {
        match self {
            OutputKind::Gif => false,
            OutputKind::Avi | OutputKind::Ffmpeg => true,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for OutputKind {
    type Err = RecorderError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        OutputKind::all()
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RecorderError::config(format!("unknown output kind '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    /// Maps quality 0..=100 onto the encoder's CRF scale, 100 being best.
    pub fn crf(&self, quality: u8) -> u8 {
        let (best, worst): (u32, u32) = match self {
            VideoCodec::H264 | VideoCodec::H265 => (14, 38),
            VideoCodec::Vp9 => (15, 50),
        };
        let quality = u32::from(quality.min(100));
        (worst - (worst - best) * quality / 100) as u8
    }

    pub fn ffmpeg_args(&self, quality: u8) -> Vec<String> {
        let crf = self.crf(quality).to_string();
        let args: Vec<&str> = match self {
            VideoCodec::H264 => vec!["-c:v", "libx264", "-preset", "veryfast", "-crf", crf.as_str()],
            VideoCodec::H265 => vec!["-c:v", "libx265", "-preset", "fast", "-crf", crf.as_str()],
            VideoCodec::Vp9 => vec!["-c:v", "libvpx-vp9", "-b:v", "0", "-crf", crf.as_str()],
        };
        args.into_iter()
            .chain(["-pix_fmt", "yuv420p"])
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecOptions {
    pub ffmpeg_path: PathBuf,
    pub codec: VideoCodec,
    pub quality: u8,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            codec: VideoCodec::H264,
            quality: 75,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub frame_size: (u32, u32),
    pub fps: u32,
    pub output_path: PathBuf,
    pub codec: CodecOptions,
}

pub(crate) fn fit_frame(frame: Frame, size: (u32, u32)) -> Frame {
    if frame.dimensions() == size {
        return frame;
    }
    image::imageops::resize(&frame, size.0, size.1, image::imageops::FilterType::Nearest)
}
