use anyhow::{anyhow, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};

use super::worker::{FrameWorker, FrameWriter};
use super::{fit_frame, EncoderOptions, FrameSink};
use crate::capture::Frame;

const HEADER_LEN: u64 = 224;
const HDRL_LEN: u32 = 192;
const STRL_LEN: u32 = 116;
const CHUNK_HEADER_LEN: u64 = 8;
const INDEX_ENTRY_LEN: u64 = 16;
const MAX_RIFF_LEN: u64 = u32::MAX as u64;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const FRAME_CHUNK_ID: &[u8; 4] = b"00db";

pub struct AviWriter {
    out: BufWriter<File>,
    frame_size: (u32, u32),
    frame_bytes: u32,
    fps: u32,
    movi_len: u64,
    index: Vec<(u32, u32)>,
}

impl AviWriter {
    pub fn create(options: &EncoderOptions) -> Result<Self> {
        let (width, height) = options.frame_size;
        if width == 0 || height == 0 {
            return Err(anyhow!("AVI frame size must be non-zero"));
        }
        let frame_bytes = u64::from(width) * u64::from(height) * 4;
        if HEADER_LEN + CHUNK_HEADER_LEN + frame_bytes + CHUNK_HEADER_LEN + INDEX_ENTRY_LEN
            > MAX_RIFF_LEN
        {
            return Err(anyhow!(
                "AVI frame size {}x{} does not fit in a RIFF file",
                width,
                height
            ));
        }
        if options.fps == 0 {
            return Err(anyhow!("AVI frame rate must be non-zero"));
        }

        let path = &options.output_path;
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

        let mut writer = Self {
            out: BufWriter::new(file),
            frame_size: options.frame_size,
            frame_bytes: frame_bytes as u32,
            fps: options.fps,
            movi_len: 0,
            index: Vec::new(),
        };
        let header = writer.header();
        writer.out.write_all(&header)?;
        Ok(writer)
    }

    fn index_len(&self, entries: usize) -> u64 {
        CHUNK_HEADER_LEN + INDEX_ENTRY_LEN * entries as u64
    }

    fn header(&self) -> Vec<u8> {
        let (width, height) = self.frame_size;
        let frame_bytes = self.frame_bytes;
        let frames = self.index.len() as u32;
        let riff_len = HEADER_LEN - 8 + self.movi_len + self.index_len(self.index.len());

        let mut h = Vec::with_capacity(HEADER_LEN as usize);
        h.extend_from_slice(b"RIFF");
        put_u32(&mut h, riff_len as u32);
        h.extend_from_slice(b"AVI ");

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, HDRL_LEN);
        h.extend_from_slice(b"hdrl");

        h.extend_from_slice(b"avih");
        put_u32(&mut h, 56);
        put_u32(&mut h, 1_000_000 / self.fps);
        put_u32(&mut h, frame_bytes.saturating_mul(self.fps));
        put_u32(&mut h, 0);
        put_u32(&mut h, AVIF_HASINDEX);
        put_u32(&mut h, frames);
        put_u32(&mut h, 0);
        put_u32(&mut h, 1);
        put_u32(&mut h, frame_bytes);
        put_u32(&mut h, width);
        put_u32(&mut h, height);
        h.extend_from_slice(&[0u8; 16]);

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, STRL_LEN);
        h.extend_from_slice(b"strl");

        h.extend_from_slice(b"strh");
        put_u32(&mut h, 56);
        h.extend_from_slice(b"vids");
        h.extend_from_slice(b"DIB ");
        put_u32(&mut h, 0);
        put_u16(&mut h, 0);
        put_u16(&mut h, 0);
        put_u32(&mut h, 0);
        put_u32(&mut h, 1);
        put_u32(&mut h, self.fps);
        put_u32(&mut h, 0);
        put_u32(&mut h, frames);
        put_u32(&mut h, frame_bytes);
        put_u32(&mut h, u32::MAX);
        put_u32(&mut h, frame_bytes);
        put_u16(&mut h, 0);
        put_u16(&mut h, 0);
        put_u16(&mut h, width.min(u16::MAX as u32) as u16);
        put_u16(&mut h, height.min(u16::MAX as u32) as u16);

        // BITMAPINFOHEADER, positive height = bottom-up rows
        h.extend_from_slice(b"strf");
        put_u32(&mut h, 40);
        put_u32(&mut h, 40);
        put_u32(&mut h, width);
        put_u32(&mut h, height);
        put_u16(&mut h, 1);
        put_u16(&mut h, 32);
        put_u32(&mut h, 0);
        put_u32(&mut h, frame_bytes);
        h.extend_from_slice(&[0u8; 16]);

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, (4 + self.movi_len) as u32);
        h.extend_from_slice(b"movi");

        debug_assert_eq!(h.len() as u64, HEADER_LEN);
        h
    }
}

impl FrameWriter for AviWriter {
    fn write(&mut self, frame: Frame) -> Result<()> {
        let frame_bytes = self.frame_bytes;
        let projected = HEADER_LEN
            + self.movi_len
            + CHUNK_HEADER_LEN
            + u64::from(frame_bytes)
            + self.index_len(self.index.len() + 1);
        if projected > MAX_RIFF_LEN {
            return Err(anyhow!("AVI file would exceed the 4 GiB RIFF limit"));
        }

        let frame = fit_frame(frame, self.frame_size);
        let (width, height) = self.frame_size;
        let row_bytes = width as usize * 4;
        let raw = frame.as_raw();

        let mut data = Vec::with_capacity(frame_bytes as usize);
        for y in (0..height as usize).rev() {
            let row = &raw[y * row_bytes..(y + 1) * row_bytes];
            for px in row.chunks_exact(4) {
                data.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
            }
        }

        self.out.write_all(FRAME_CHUNK_ID)?;
        self.out.write_all(&frame_bytes.to_le_bytes())?;
        self.out.write_all(&data)?;

        // offsets are relative to the `movi` fourcc
        self.index.push(((4 + self.movi_len) as u32, frame_bytes));
        self.movi_len += CHUNK_HEADER_LEN + u64::from(frame_bytes);
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        self.out.write_all(b"idx1")?;
        self.out
            .write_all(&((INDEX_ENTRY_LEN * self.index.len() as u64) as u32).to_le_bytes())?;
        for &(offset, size) in &self.index {
            self.out.write_all(FRAME_CHUNK_ID)?;
            self.out.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.out.write_all(&offset.to_le_bytes())?;
            self.out.write_all(&size.to_le_bytes())?;
        }

        let header = self.header();
        let mut file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.sync_all()?;
        Ok(())
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub struct AviSink {
    options: EncoderOptions,
    worker: Option<FrameWorker>,
}

impl AviSink {
    pub fn new(options: EncoderOptions) -> Self {
        Self {
            options,
            worker: None,
        }
    }
}

impl FrameSink for AviSink {
    fn submit(&mut self, frame: Frame) -> Result<()> {
        let worker = match self.worker.as_mut() {
            Some(worker) => worker,
            None => self
                .worker
                .insert(FrameWorker::spawn("avi", AviWriter::create(&self.options)?)?),
        };
        worker.submit(frame)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut worker) = self.worker.take() {
            let written = worker.finish()?;
            tracing::debug!(
                "AVI {} finalized with {} frames",
                self.options.output_path.display(),
                written
            );
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!("Failed to finalize AVI during dispose: {:#}", e);
        }
    }
}

impl Drop for AviSink {
    fn drop(&mut self) {
        self.dispose();
    }
}
