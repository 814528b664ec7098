use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::progress::ProgressListeners;
use super::{FrameTiming, RecordingConfig, RecordingState, SessionStats};
use crate::cache::DiskCache;
use crate::capture::{FrameSource, Rectangle};
use crate::error::{RecorderError, Result};
use crate::sink::{AviSink, CodecOptions, EncoderOptions, FfmpegSink, FrameSink, OutputKind};

pub struct Recorder {
    settings: Mutex<Settings>,
    output_kind: OutputKind,
    cache_path: PathBuf,
    codec: CodecOptions,
    source: Mutex<Box<dyn FrameSource>>,
    backend: Mutex<Backend>,
    recording: AtomicBool,
    stop_requested: AtomicBool,
    disposing: AtomicBool,
    pub(super) progress: ProgressListeners,
    last_session: Mutex<Option<SessionStats>>,
}

struct Settings {
    fps: u32,
    duration_secs: u32,
    region: Rectangle,
    timing: FrameTiming,
}

impl Settings {
    fn retime(&mut self) {
        self.timing = FrameTiming::new(self.fps, self.duration_secs);
    }
}

#[derive(Default)]
pub(super) struct Backend {
    sink: Option<Box<dyn FrameSink>>,
    options: Option<EncoderOptions>,
    pub(super) cache: Option<DiskCache>,
}

impl Backend {
    fn active(&mut self) -> Option<&mut (dyn FrameSink + 'static)> {
        match (self.cache.as_mut(), self.sink.as_mut()) {
            (Some(cache), _) => Some(cache),
            (None, Some(sink)) => Some(&mut **sink),
            (None, None) => None,
        }
    }

    fn dispose(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.dispose();
        }
        if let Some(mut cache) = self.cache.take() {
            cache.dispose();
        }
        self.options = None;
    }
}

fn container_sink(kind: OutputKind, options: EncoderOptions) -> Option<Box<dyn FrameSink>> {
    match kind {
        OutputKind::Avi => Some(Box::new(AviSink::new(options))),
        OutputKind::Ffmpeg => Some(Box::new(FfmpegSink::new(options))),
        OutputKind::Gif => None,
    }
}

struct SessionGuard<'a>(&'a AtomicBool);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Recorder {
    pub fn new(config: RecordingConfig, source: impl FrameSource + 'static) -> Result<Self> {
        Self::with_boxed_source(config, Box::new(source))
    }

    pub fn with_boxed_source(config: RecordingConfig, source: Box<dyn FrameSource>) -> Result<Self> {
        validate(&config)?;

        let mut backend = Backend::default();
        match config.output {
            OutputKind::Avi | OutputKind::Ffmpeg => {
                let options = EncoderOptions {
                    frame_size: config.region.size(),
                    fps: config.fps,
                    output_path: config.cache_path.clone(),
                    codec: config.codec.clone(),
                };
                backend.sink = container_sink(config.output, options.clone());
                backend.options = Some(options);
            }
            OutputKind::Gif => {
                backend.cache = Some(DiskCache::create(&config.cache_path)?);
            }
        }

        tracing::debug!(
            "Recorder ready: {} at {} fps into {}",
            config.output,
            config.fps,
            config.cache_path.display()
        );
        Ok(Self::assemble(config, source, backend))
    }

    #[cfg(test)]
    pub(crate) fn with_sink(
        config: RecordingConfig,
        source: impl FrameSource + 'static,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self> {
        validate(&config)?;
        let backend = Backend {
            sink: Some(sink),
            ..Default::default()
        };
        Ok(Self::assemble(config, Box::new(source), backend))
    }

    fn assemble(config: RecordingConfig, source: Box<dyn FrameSource>, backend: Backend) -> Self {
        let settings = Settings {
            fps: config.fps,
            duration_secs: config.duration_secs,
            region: config.region,
            timing: FrameTiming::new(config.fps, config.duration_secs),
        };

        Self {
            settings: Mutex::new(settings),
            output_kind: config.output,
            cache_path: config.cache_path,
            codec: config.codec,
            source: Mutex::new(source),
            backend: Mutex::new(backend),
            recording: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            disposing: AtomicBool::new(false),
            progress: ProgressListeners::default(),
            last_session: Mutex::new(None),
        }
    }

    fn settings(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn backend(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RecordingState {
        if self.is_recording() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        self.output_kind
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn fps(&self) -> u32 {
        self.settings().fps
    }

    pub fn duration_secs(&self) -> u32 {
        self.settings().duration_secs
    }

    pub fn region(&self) -> Rectangle {
        self.settings().region
    }

    pub fn timing(&self) -> FrameTiming {
        self.settings().timing
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.timing().frame_interval_ms
    }

    pub fn total_frame_count(&self) -> u64 {
        self.timing().total_frames
    }

    pub fn last_session(&self) -> Option<SessionStats> {
        *self.last_session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.progress.register(Arc::new(callback));
    }

    pub fn set_fps(&self, fps: u32) {
        let mut settings = self.settings();
        if self.is_recording() {
            tracing::debug!("Ignoring fps change to {} while recording", fps);
            return;
        }
        if fps == 0 {
            tracing::warn!("Ignoring fps of zero");
            return;
        }
        settings.fps = fps;
        settings.retime();
    }

    /// Ignored while recording. `0` records until stopped.
    pub fn set_duration_secs(&self, duration_secs: u32) {
        let mut settings = self.settings();
        if self.is_recording() {
            tracing::debug!("Ignoring duration change to {}s while recording", duration_secs);
            return;
        }
        settings.duration_secs = duration_secs;
        settings.retime();
    }

    pub fn set_region(&self, region: Rectangle) {
        let mut settings = self.settings();
        if self.is_recording() {
            tracing::debug!("Ignoring region change to {:?} while recording", region);
            return;
        }
        if region.is_empty() {
            tracing::warn!("Ignoring empty capture region {:?}", region);
            return;
        }
        settings.region = region;
        settings.retime();
    }

    pub fn stop_recording(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst) || self.disposing.load(Ordering::SeqCst)
    }

    /// Runs a recording session on the calling thread.
    pub fn start_recording(&self) -> Result<()> {
        if self.recording.swap(true, Ordering::SeqCst) {
            tracing::debug!("Start ignored: already recording");
            return Ok(());
        }
        let _session = SessionGuard(&self.recording);
        self.stop_requested.store(false, Ordering::SeqCst);

        let (region, timing, fps) = {
            let settings = self.settings();
            (settings.region, settings.timing, settings.fps)
        };

        let mut backend = self.backend();
        // a dispose racing this start may have had its stop request cleared above
        if self.disposing.load(Ordering::SeqCst) {
            return Err(RecorderError::config("recorder has been disposed"));
        }
        self.prepare_backend(&mut backend, region, fps)?;
        let sink = backend
            .active()
            .ok_or_else(|| RecorderError::config("recorder has been disposed"))?;

        let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(
            "Recording {:?} at {} fps ({})",
            region,
            fps,
            if timing.is_unbounded() {
                "until stopped".to_string()
            } else {
                format!("{} frames", timing.total_frames)
            }
        );

        let mut stats = SessionStats {
            frames_submitted: 0,
            late_frames: 0,
            frame_interval_ms: timing.frame_interval_ms,
            elapsed: Duration::ZERO,
            stopped_early: false,
        };
        let started = Instant::now();
        let paced = self.pace(&mut **source, sink, region, timing, &mut stats);
        let finished = sink.finish();
        stats.elapsed = started.elapsed();

        tracing::info!(
            "Recording ended: {} frames in {:.2?}",
            stats.frames_submitted,
            stats.elapsed
        );
        if stats.late_frames > 0 {
            tracing::debug!(
                "{} of {} frames overran the {} ms interval",
                stats.late_frames,
                stats.frames_submitted,
                stats.frame_interval_ms
            );
        }
        *self.last_session.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats);

        paced?;
        finished?;
        Ok(())
    }

    fn prepare_backend(&self, backend: &mut Backend, region: Rectangle, fps: u32) -> Result<()> {
        if let Some(cache) = backend.cache.as_mut() {
            cache.clear()?;
        }

        let stale = backend
            .options
            .as_ref()
            .is_some_and(|o| o.fps != fps || o.frame_size != region.size());
        if stale {
            let options = EncoderOptions {
                frame_size: region.size(),
                fps,
                output_path: self.cache_path.clone(),
                codec: self.codec.clone(),
            };
            if let Some(mut old) = backend.sink.take() {
                old.dispose();
            }
            backend.sink = container_sink(self.output_kind, options.clone());
            backend.options = Some(options);
        }
        Ok(())
    }

    fn pace(
        &self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        region: Rectangle,
        timing: FrameTiming,
        stats: &mut SessionStats,
    ) -> Result<()> {
        let interval = timing.interval();
        let mut index: u64 = 0;

        loop {
            if self.should_stop() {
                stats.stopped_early = true;
                break;
            }
            if !timing.is_unbounded() && index >= timing.total_frames {
                break;
            }

            let frame_start = Instant::now();
            let frame = source.capture(region)?;
            sink.submit(frame)?;
            stats.frames_submitted += 1;
            let elapsed = frame_start.elapsed();

            let more = timing.is_unbounded() || index + 1 < timing.total_frames;
            if more && !self.should_stop() {
                match interval.checked_sub(elapsed) {
                    Some(remaining) if !remaining.is_zero() => thread::sleep(remaining),
                    // no catch-up: the next frame starts right away
                    _ => {
                        stats.late_frames += 1;
                        tracing::trace!("Frame {} overran interval by {:?}", index, elapsed - interval);
                    }
                }
            }
            index += 1;
        }
        Ok(())
    }

    /// Releases the sink and the cache. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.disposing.store(true, Ordering::SeqCst);
        self.stop_recording();
        self.backend().dispose();
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn validate(config: &RecordingConfig) -> Result<()> {
    if config.cache_path.as_os_str().is_empty() {
        return Err(RecorderError::config("cache path must not be empty"));
    }
    if config.fps == 0 {
        return Err(RecorderError::config("fps must be greater than zero"));
    }
    if config.region.is_empty() {
        return Err(RecorderError::config("capture region must not be empty"));
    }
    Ok(())
}
