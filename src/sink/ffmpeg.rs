use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use super::worker::{FrameWorker, FrameWriter};
use super::{fit_frame, EncoderOptions, FrameSink, VideoCodec};
use crate::capture::Frame;
use crate::recording::ExternalEncoder;

const QUIET_ARGS: [&str; 4] = ["-hide_banner", "-loglevel", "error", "-y"];
// yuv420p needs even dimensions
const EVEN_PAD_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

struct FfmpegPipe {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    frame_size: (u32, u32),
    program: PathBuf,
}

impl FfmpegPipe {
    fn command(options: &EncoderOptions) -> Command {
        let (width, height) = options.frame_size;
        let mut cmd = Command::new(&options.codec.ffmpeg_path);
        cmd.args(QUIET_ARGS)
            .args(["-f", "rawvideo", "-pixel_format", "rgba"])
            .arg("-video_size")
            .arg(format!("{}x{}", width, height))
            .arg("-framerate")
            .arg(options.fps.to_string())
            .args(["-i", "pipe:0", "-vf", EVEN_PAD_FILTER])
            .args(options.codec.codec.ffmpeg_args(options.codec.quality))
            .arg(&options.output_path);
        cmd
    }

    fn spawn(options: &EncoderOptions) -> Result<Self> {
        if options.frame_size.0 == 0 || options.frame_size.1 == 0 {
            return Err(anyhow!("ffmpeg frame size must be non-zero"));
        }
        if let Some(parent) = options.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let program = options.codec.ffmpeg_path.clone();
        let mut child = Self::command(options)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to launch {}", program.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
        // drained concurrently so a full stderr pipe cannot stall the encoder
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            frame_size: options.frame_size,
            program,
        })
    }
}

impl FrameWriter for FfmpegPipe {
    fn write(&mut self, frame: Frame) -> Result<()> {
        let frame = fit_frame(frame, self.frame_size);
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg stdin already closed"))?;
        stdin
            .write_all(frame.as_raw())
            .with_context(|| format!("{} stopped accepting frames", self.program.display()))
    }

    fn close(mut self) -> Result<()> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        check_status(&self.program, status, &stderr)
    }
}

impl Drop for FfmpegPipe {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn check_status(program: &Path, status: ExitStatus, stderr: &[u8]) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(stderr);
    Err(anyhow!(
        "{} exited with {}: {}",
        program.display(),
        status,
        stderr.trim()
    ))
}

pub struct FfmpegSink {
    options: EncoderOptions,
    worker: Option<FrameWorker>,
}

impl FfmpegSink {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            options,
            worker: None,
        }
    }
}

impl FrameSink for FfmpegSink {
    fn submit(&mut self, frame: Frame) -> Result<()> {
        let worker = match self.worker.as_mut() {
            Some(worker) => worker,
            None => self
                .worker
                .insert(FrameWorker::spawn("ffmpeg", FfmpegPipe::spawn(&self.options)?)?),
        };
        worker.submit(frame)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            let written = worker.finish()?;
            tracing::debug!(
                "ffmpeg wrote {} frames to {}",
                written,
                self.options.output_path.display()
            );
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("Failed to finalize ffmpeg output during dispose: {:#}", e);
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    pub ffmpeg_path: PathBuf,
    pub codec: VideoCodec,
    pub quality: u8,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, codec: VideoCodec, quality: u8) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            codec,
            quality,
        }
    }

    fn command(&self, source: &Path, target: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(QUIET_ARGS)
            .arg("-i")
            .arg(source)
            .args(["-vf", EVEN_PAD_FILTER])
            .args(self.codec.ffmpeg_args(self.quality))
            .arg(target);
        cmd
    }
}

impl ExternalEncoder for FfmpegTranscoder {
    fn encode(&self, source: &Path, target: &Path) -> Result<()> {
        let output = self
            .command(source, target)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to launch {}", self.ffmpeg_path.display()))?;
        check_status(&self.ffmpeg_path, output.status, &output.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CodecOptions;
    use std::ffi::OsStr;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(OsStr::to_string_lossy)
            .map(|s| s.into_owned())
            .collect()
    }

    fn options(dir: &Path, ffmpeg: &str) -> EncoderOptions {
        EncoderOptions {
            frame_size: (640, 480),
            fps: 30,
            output_path: dir.join("capture.mp4"),
            codec: CodecOptions {
                ffmpeg_path: PathBuf::from(ffmpeg),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_pipe_command_describes_raw_input() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), "ffmpeg");
        let args = args(&FfmpegPipe::command(&opts));

        assert!(args.windows(2).any(|w| w[0] == "-video_size" && w[1] == "640x480"));
        assert!(args.windows(2).any(|w| w[0] == "-framerate" && w[1] == "30"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "pipe:0"));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.last().unwrap().ends_with("capture.mp4"));
    }

    #[test]
    fn test_missing_binary_fails_on_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FfmpegSink::new(options(dir.path(), "/nonexistent/ffmpeg-capscr"));
        let err = sink.submit(Frame::new(640, 480)).unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
        sink.finish().unwrap();
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_noisy_stderr_does_not_stall_frames() {
        let dir = tempfile::tempdir().unwrap();
        // more stderr than a pipe buffer holds, before reading any input
        let program = fake_ffmpeg(dir.path(), "head -c 262144 /dev/zero >&2\ncat > /dev/null");
        let mut opts = options(dir.path(), program.to_str().unwrap());
        opts.frame_size = (100, 100);

        let mut sink = FfmpegSink::new(opts);
        for _ in 0..10 {
            sink.submit(Frame::new(100, 100)).unwrap();
        }
        sink.finish().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffmpeg(
            dir.path(),
            "cat > /dev/null\necho 'Unknown encoder libx264' >&2\nexit 1",
        );
        let mut opts = options(dir.path(), program.to_str().unwrap());
        opts.frame_size = (8, 8);

        let mut sink = FfmpegSink::new(opts);
        sink.submit(Frame::new(8, 8)).unwrap();
        let err = sink.finish().unwrap_err();
        assert!(err.to_string().contains("Unknown encoder libx264"));
    }

    #[test]
    fn test_transcoder_command() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", VideoCodec::H265, 100);
        let args = args(&transcoder.command(Path::new("in.avi"), Path::new("out.mp4")));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "in.avi"));
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "14"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_transcoder_failure_propagates() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg-capscr", VideoCodec::H264, 50);
        assert!(transcoder
            .encode(Path::new("in.avi"), Path::new("out.mp4"))
            .is_err());
    }
}
