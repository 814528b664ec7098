use std::path::Path;

use super::gif_encoder::GifAssembler;
use super::progress::{percent, PROGRESS_COMPLETE, PROGRESS_INDETERMINATE};
use super::Recorder;
use crate::cache::CacheFrames;
use crate::error::{RecorderError, Result};
use crate::sink::OutputKind;

pub trait ExternalEncoder {
    fn encode(&self, source: &Path, target: &Path) -> anyhow::Result<()>;
}

impl<F> ExternalEncoder for F
where
    F: Fn(&Path, &Path) -> anyhow::Result<()>,
{
    fn encode(&self, source: &Path, target: &Path) -> anyhow::Result<()> {
        self(source, target)
    }
}

impl Recorder {
    pub fn save_as_animated_image(&self, path: impl AsRef<Path>, quality: u8) -> Result<()> {
        if self.is_recording() {
            tracing::debug!("Ignoring GIF export while recording");
            return Ok(());
        }
        let path = path.as_ref();

        let frames = {
            let backend = self.backend();
            let cache = backend
                .cache
                .as_ref()
                .ok_or(RecorderError::OutputKindMismatch {
                    expected: OutputKind::Gif,
                    actual: self.output_kind(),
                })?;
            if cache.is_empty() {
                return Err(RecorderError::EmptyCache);
            }
            cache.frames()?
        };
        let count = frames.len();
        let frame_interval_ms = self
            .last_session()
            .map(|s| s.frame_interval_ms)
            .unwrap_or_else(|| self.frame_interval_ms());

        self.assemble_gif(frames, path, frame_interval_ms, quality)?;

        self.progress.emit(PROGRESS_COMPLETE);
        tracing::info!("Saved {} frames to {}", count, path.display());
        Ok(())
    }

    fn assemble_gif(
        &self,
        frames: CacheFrames,
        path: &Path,
        frame_interval_ms: u64,
        quality: u8,
    ) -> Result<()> {
        let count = frames.len();
        let mut gif: Option<GifAssembler> = None;

        for (index, frame) in frames.enumerate() {
            let frame = frame?;
            self.progress.emit(percent(index, count));
            let encoder = match gif.as_mut() {
                Some(encoder) => encoder,
                None => gif.insert(GifAssembler::create(
                    path,
                    frame.dimensions(),
                    frame_interval_ms,
                    quality,
                )?),
            };
            encoder.push(frame)?;
        }

        let encoder = gif.ok_or(RecorderError::EmptyCache)?;
        encoder.finish()?;
        Ok(())
    }

    pub fn encode_using_external_encoder<E>(&self, encoder: &E, target: impl AsRef<Path>) -> Result<()>
    where
        E: ExternalEncoder + ?Sized,
    {
        if self.is_recording() {
            tracing::debug!("Ignoring external encode while recording");
            return Ok(());
        }
        let source = self.cache_path();
        if !source.is_file() {
            return Err(RecorderError::MissingIntermediate(source.to_path_buf()));
        }

        let target = target.as_ref();
        self.progress.emit(PROGRESS_INDETERMINATE);
        tracing::info!("Encoding {} into {}", source.display(), target.display());
        encoder.encode(source, target)?;
        self.progress.emit(PROGRESS_COMPLETE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, Rectangle};
    use crate::recording::RecordingConfig;
    use crate::sink::CodecOptions;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    fn gradient(region: Rectangle) -> anyhow::Result<Frame> {
        Ok(Frame::from_fn(region.width, region.height, |x, y| {
            image::Rgba([(x * 40) as u8, (y * 40) as u8, 128, 255])
        }))
    }

    fn recorder(dir: &Path, output: OutputKind, fps: u32, duration_secs: u32) -> Recorder {
        let cache_path = match output {
            OutputKind::Gif => dir.join("frames"),
            _ => dir.join("capture.avi"),
        };
        let config = RecordingConfig {
            fps,
            duration_secs,
            region: Rectangle::new(0, 0, 6, 4),
            output,
            cache_path,
            codec: CodecOptions::default(),
        };
        Recorder::new(config, gradient).unwrap()
    }

    fn track_progress(recorder: &Recorder) -> Arc<Mutex<Vec<i32>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        recorder.on_progress(move |p| sink.lock().unwrap().push(p));
        seen
    }

    #[test]
    fn test_save_gif_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), OutputKind::Gif, 20, 1);
        let seen = track_progress(&recorder);
        recorder.start_recording().unwrap();

        let target = dir.path().join("out.gif");
        recorder.save_as_animated_image(&target, 60).unwrap();
        assert!(target.exists());

        let progress = seen.lock().unwrap().clone();
        assert_eq!(progress.len(), 21);
        assert_eq!(progress[0], 0);
        assert_eq!(progress[19], 95);
        assert_eq!(*progress.last().unwrap(), 100);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        let file = std::fs::File::open(&target).unwrap();
        let mut decoder = gif::DecodeOptions::new().read_info(file).unwrap();
        let first = decoder.read_next_frame().unwrap().unwrap();
        assert_eq!(first.delay, 5);
    }

    #[test]
    fn test_save_gif_while_recording_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(recorder(dir.path(), OutputKind::Gif, 20, 0));
        let seen = track_progress(&recorder);

        let handle = {
            let recorder = Arc::clone(&recorder);
            thread::spawn(move || recorder.start_recording())
        };
        while !recorder.is_recording() && !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }

        let target = dir.path().join("out.gif");
        recorder.save_as_animated_image(&target, 60).unwrap();
        recorder.stop_recording();
        handle.join().unwrap().unwrap();

        assert!(!target.exists());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progress_callback_may_reenter_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(recorder(dir.path(), OutputKind::Gif, 20, 1));
        recorder.start_recording().unwrap();

        let weak = Arc::downgrade(&recorder);
        recorder.on_progress(move |p| {
            if p == PROGRESS_COMPLETE {
                if let Some(recorder) = weak.upgrade() {
                    recorder.dispose();
                }
            }
        });

        let target = dir.path().join("out.gif");
        recorder.save_as_animated_image(&target, 60).unwrap();
        assert!(target.exists());
        assert!(!dir.path().join("frames").exists());
    }

    #[test]
    fn test_external_encode_while_recording_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(recorder(dir.path(), OutputKind::Avi, 20, 0));
        let seen = track_progress(&recorder);

        let handle = {
            let recorder = Arc::clone(&recorder);
            thread::spawn(move || recorder.start_recording())
        };
        while !recorder.is_recording() && !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        // wait for the intermediate file so only the recording guard applies
        while !dir.path().join("capture.avi").exists() && !handle.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }

        let calls = Mutex::new(0);
        let encoder = |_: &Path, _: &Path| -> anyhow::Result<()> {
            *calls.lock().unwrap() += 1;
            Ok(())
        };
        recorder
            .encode_using_external_encoder(&encoder, dir.path().join("out.mp4"))
            .unwrap();
        recorder.stop_recording();
        handle.join().unwrap().unwrap();

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert!(!dir.path().join("out.mp4").exists());
    }

    #[test]
    fn test_save_gif_requires_gif_output() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), OutputKind::Avi, 20, 1);
        let err = recorder
            .save_as_animated_image(dir.path().join("out.gif"), 60)
            .unwrap_err();
        assert!(matches!(
            err,
            RecorderError::OutputKindMismatch {
                expected: OutputKind::Gif,
                actual: OutputKind::Avi
            }
        ));
    }

    #[test]
    fn test_save_gif_with_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), OutputKind::Gif, 20, 1);
        let seen = track_progress(&recorder);
        let err = recorder
            .save_as_animated_image(dir.path().join("out.gif"), 60)
            .unwrap_err();
        assert!(matches!(err, RecorderError::EmptyCache));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_external_encoder_progress() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), OutputKind::Avi, 20, 1);
        let seen = track_progress(&recorder);
        recorder.start_recording().unwrap();

        let calls: Mutex<Vec<(PathBuf, PathBuf)>> = Mutex::new(Vec::new());
        let encoder = |source: &Path, target: &Path| -> anyhow::Result<()> {
            calls
                .lock()
                .unwrap()
                .push((source.to_path_buf(), target.to_path_buf()));
            Ok(())
        };
        let target = dir.path().join("capture.mp4");
        recorder.encode_using_external_encoder(&encoder, &target).unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![(dir.path().join("capture.avi"), target)]
        );
        assert_eq!(*seen.lock().unwrap(), vec![-1, 100]);
    }

    #[test]
    fn test_external_encoder_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), OutputKind::Avi, 20, 1);
        let seen = track_progress(&recorder);
        recorder.start_recording().unwrap();

        let encoder = |_: &Path, _: &Path| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("encoder exited with status 1"))
        };
        let err = recorder
            .encode_using_external_encoder(&encoder, dir.path().join("out.mp4"))
            .unwrap_err();
        assert_eq!(err.to_string(), "encoder exited with status 1");
        assert_eq!(*seen.lock().unwrap(), vec![-1]);
    }

    #[test]
    fn test_external_encoder_needs_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder(dir.path(), OutputKind::Avi, 20, 1);
        let encoder = |_: &Path, _: &Path| -> anyhow::Result<()> { panic!("must not run") };
        let err = recorder
            .encode_using_external_encoder(&encoder, dir.path().join("out.mp4"))
            .unwrap_err();
        assert!(matches!(err, RecorderError::MissingIntermediate(_)));
    }
}
