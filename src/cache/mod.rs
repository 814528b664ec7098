use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::Frame;
use crate::sink::{FrameSink, FrameWorker, FrameWriter};

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";

pub struct DiskCache {
    dir: PathBuf,
    count: usize,
    worker: Option<FrameWorker>,
    disposed: bool,
}

impl DiskCache {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create frame cache {}", dir.display()))?;

        let mut cache = Self {
            dir,
            count: 0,
            worker: None,
            disposed: false,
        };
        cache.clear()?;
        Ok(cache)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) -> Result<()> {
        self.finish()?;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_frame_file(&path) {
                fs::remove_file(&path)?;
            }
        }
        self.count = 0;
        Ok(())
    }

    pub fn frames(&self) -> Result<CacheFrames> {
        if self.worker.is_some() {
            return Err(anyhow!("frame cache has pending writes; finish it first"));
        }
        if self.disposed {
            return Err(anyhow!("frame cache has been disposed"));
        }
        Ok(CacheFrames {
            dir: self.dir.clone(),
            count: self.count,
            next: 0,
        })
    }
}

fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}{:06}.{}", FRAME_PREFIX, index, FRAME_EXTENSION))
}

fn is_frame_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(FRAME_PREFIX));
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == FRAME_EXTENSION);
    name_matches && ext_matches && path.is_file()
}

impl FrameSink for DiskCache {
    fn submit(&mut self, frame: Frame) -> Result<()> {
        if self.disposed {
            return Err(anyhow!("frame cache has been disposed"));
        }
        let worker = match self.worker.as_mut() {
            Some(worker) => worker,
            None => {
                let writer = CacheWriter {
                    dir: self.dir.clone(),
                    next: self.count,
                };
                self.worker.insert(FrameWorker::spawn("cache", writer)?)
            }
        };
        worker.submit(frame)?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            let written = worker.finish()?;
            tracing::debug!("Frame cache flushed {} frames to {}", written, self.dir.display());
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(e) = self.clear() {
            tracing::warn!("Failed to clear frame cache {}: {:#}", self.dir.display(), e);
        }
        // a non-empty directory holds files we did not write
        let _ = fs::remove_dir(&self.dir);
        self.disposed = true;
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct CacheWriter {
    dir: PathBuf,
    next: usize,
}

impl FrameWriter for CacheWriter {
    fn write(&mut self, frame: Frame) -> Result<()> {
        let path = frame_path(&self.dir, self.next);
        frame
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to cache frame {}", path.display()))?;
        self.next += 1;
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

pub struct CacheFrames {
    dir: PathBuf,
    count: usize,
    next: usize,
}

impl Iterator for CacheFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let path = frame_path(&self.dir, self.next);
        self.next += 1;
        Some(
            image::open(&path)
                .map(|img| img.to_rgba8())
                .with_context(|| format!("failed to read cached frame {}", path.display())),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CacheFrames {}
