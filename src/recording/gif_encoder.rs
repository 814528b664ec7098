use anyhow::{anyhow, Result};
use gif::{Encoder, Repeat};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::capture::Frame;
use crate::sink::fit_frame;

const MAX_GIF_DIMENSION: u32 = 4096;
const MAX_GIF_FILE_SIZE: u64 = 500 * 1024 * 1024;
const MIN_DELAY_CS: u16 = 2;

pub struct GifAssembler {
    encoder: Option<Encoder<BufWriter<File>>>,
    path: PathBuf,
    size: (u16, u16),
    delay: u16,
    speed: i32,
    frames: usize,
    complete: bool,
}

impl GifAssembler {
    pub fn create(path: &Path, size: (u32, u32), frame_interval_ms: u64, quality: u8) -> Result<Self> {
        let path_str = path.to_string_lossy();
        if path_str.contains("..") {
            return Err(anyhow!("Path contains directory traversal"));
        }

        let (orig_width, orig_height) = size;
        if orig_width == 0 || orig_height == 0 {
            return Err(anyhow!("Image has zero dimension"));
        }
        if orig_width > MAX_GIF_DIMENSION || orig_height > MAX_GIF_DIMENSION {
            return Err(anyhow!("Image dimensions exceed GIF safety limit"));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let width = orig_width as u16;
        let height = orig_height as u16;
        let mut encoder = Encoder::new(BufWriter::new(file), width, height, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;

        Ok(Self {
            encoder: Some(encoder),
            path: path.to_path_buf(),
            size: (width, height),
            delay: delay_centis(frame_interval_ms),
            speed: speed_for_quality(quality),
            frames: 0,
            complete: false,
        })
    }

    pub fn push(&mut self, frame: Frame) -> Result<()> {
        let (width, height) = self.size;
        let frame = fit_frame(frame, (u32::from(width), u32::from(height)));
        let mut rgba = frame.into_raw();

        let mut gif_frame = gif::Frame::from_rgba_speed(width, height, &mut rgba, self.speed);
        gif_frame.delay = self.delay;
        self.encoder
            .as_mut()
            .ok_or_else(|| anyhow!("GIF encoder already finished"))?
            .write_frame(&gif_frame)?;
        self.frames += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| anyhow!("GIF encoder already finished"))?;
        let mut out = encoder.into_inner()?;
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);

        let metadata = std::fs::metadata(&self.path)?;
        if metadata.len() > MAX_GIF_FILE_SIZE {
            return Err(anyhow!("Generated GIF exceeds maximum file size"));
        }
        self.complete = true;
        tracing::debug!("GIF {} finished with {} frames", self.path.display(), self.frames);
        Ok(())
    }
}

impl Drop for GifAssembler {
    fn drop(&mut self) {
        if self.complete {
            return;
        }
        drop(self.encoder.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Could not remove partial GIF {}: {}", self.path.display(), e);
        }
    }
}

fn delay_centis(frame_interval_ms: u64) -> u16 {
    let centis = (frame_interval_ms as f64 / 10.0).round();
    centis.clamp(f64::from(MIN_DELAY_CS), f64::from(u16::MAX)) as u16
}

fn speed_for_quality(quality: u8) -> i32 {
    30 - i32::from(quality.min(100)) * 29 / 100
}
