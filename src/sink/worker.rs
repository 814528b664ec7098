use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::capture::Frame;

const MAX_QUEUED_MB: usize = 1024;

pub trait FrameWriter: Send + 'static {
    fn write(&mut self, frame: Frame) -> Result<()>;

    fn close(self) -> Result<()>
    where
        Self: Sized;
}

pub struct FrameWorker {
    name: &'static str,
    tx: Option<Sender<Frame>>,
    handle: Option<JoinHandle<Result<usize>>>,
    queued_bytes: Arc<AtomicUsize>,
    max_queued_bytes: usize,
}

impl FrameWorker {
    pub fn spawn<W: FrameWriter>(name: &'static str, writer: W) -> Result<Self> {
        Self::with_limit(name, writer, MAX_QUEUED_MB * 1024 * 1024)
    }

    pub fn with_limit<W: FrameWriter>(
        name: &'static str,
        writer: W,
        max_queued_bytes: usize,
    ) -> Result<Self> {
        let (tx, rx): (Sender<Frame>, Receiver<Frame>) = channel();
        let queued_bytes = Arc::new(AtomicUsize::new(0));
        let queued = Arc::clone(&queued_bytes);
        let handle = thread::Builder::new()
            .name(format!("capscr-{}", name))
            .spawn(move || drain(writer, rx, &queued))?;

        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
            queued_bytes,
            max_queued_bytes,
        })
    }

    pub fn submit(&mut self, frame: Frame) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(anyhow!("{} worker already finished", self.name));
        };

        let size = frame.as_raw().len();
        let queued = self.queued_bytes.fetch_add(size, Ordering::SeqCst);
        if queued + size > self.max_queued_bytes {
            self.queued_bytes.fetch_sub(size, Ordering::SeqCst);
            return Err(anyhow!(
                "{} writer is falling behind: {} MiB of frames queued",
                self.name,
                queued / (1024 * 1024)
            ));
        }

        if tx.send(frame).is_err() {
            return match self.join() {
                Err(e) => Err(e),
                Ok(_) => Err(anyhow!("{} worker stopped unexpectedly", self.name)),
            };
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<usize> {
        self.join()
    }

    fn join(&mut self) -> Result<usize> {
        self.tx = None;
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("{} worker panicked", self.name))?,
            None => Ok(0),
        }
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            tracing::warn!("{} worker failed during shutdown: {:#}", self.name, e);
        }
    }
}

fn drain<W: FrameWriter>(
    mut writer: W,
    rx: Receiver<Frame>,
    queued: &AtomicUsize,
) -> Result<usize> {
    let mut written = 0;
    for frame in rx {
        let size = frame.as_raw().len();
        let result = writer.write(frame);
        queued.fetch_sub(size, Ordering::SeqCst);
        result?;
        written += 1;
    }
    writer.close()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct SlowWriter {
        seen: Arc<Mutex<Vec<u8>>>,
        fail_at: Option<u8>,
    }

    impl FrameWriter for SlowWriter {
        fn write(&mut self, frame: Frame) -> Result<()> {
            thread::sleep(Duration::from_millis(5));
            let tag = frame.get_pixel(0, 0)[0];
            if self.fail_at == Some(tag) {
                return Err(anyhow!("disk full"));
            }
            self.seen.lock().unwrap().push(tag);
            Ok(())
        }

        fn close(self) -> Result<()> {
            self.seen.lock().unwrap().push(u8::MAX);
            Ok(())
        }
    }

    fn tagged(tag: u8) -> Frame {
        Frame::from_pixel(1, 1, image::Rgba([tag, 0, 0, 255]))
    }

    #[test]
    fn test_finish_drains_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut worker = FrameWorker::spawn(
            "test",
            SlowWriter {
                seen: Arc::clone(&seen),
                fail_at: None,
            },
        )
        .unwrap();

        for tag in 0..10 {
            worker.submit(tagged(tag)).unwrap();
        }
        assert_eq!(worker.finish().unwrap(), 10);

        let expected: Vec<u8> = (0..10).chain([u8::MAX]).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn test_finish_twice_is_harmless() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut worker = FrameWorker::spawn("test", SlowWriter { seen, fail_at: None }).unwrap();
        worker.submit(tagged(1)).unwrap();
        assert_eq!(worker.finish().unwrap(), 1);
        assert_eq!(worker.finish().unwrap(), 0);
        assert!(worker.submit(tagged(2)).is_err());
    }

    struct GatedWriter {
        gate: Receiver<()>,
    }

    impl FrameWriter for GatedWriter {
        fn write(&mut self, _frame: Frame) -> Result<()> {
            let _ = self.gate.recv();
            Ok(())
        }

        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_queue_limit_refuses_frames() {
        let (open, gate) = channel();
        // two 1x1 RGBA frames
        let mut worker = FrameWorker::with_limit("test", GatedWriter { gate }, 8).unwrap();

        worker.submit(tagged(1)).unwrap();
        worker.submit(tagged(2)).unwrap();
        let err = worker.submit(tagged(3)).unwrap_err();
        assert!(err.to_string().contains("falling behind"));

        open.send(()).unwrap();
        open.send(()).unwrap();
        // room again once the writer catches up
        let mut accepted = false;
        for _ in 0..500 {
            if worker.submit(tagged(4)).is_ok() {
                accepted = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(accepted);

        drop(open);
        assert_eq!(worker.finish().unwrap(), 3);
    }

    #[test]
    fn test_writer_error_surfaces() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut worker = FrameWorker::spawn(
            "test",
            SlowWriter {
                seen: Arc::clone(&seen),
                fail_at: Some(2),
            },
        )
        .unwrap();

        let mut submit_error = None;
        for tag in 0..50 {
            if let Err(e) = worker.submit(tagged(tag)) {
                submit_error = Some(e);
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let err = match submit_error {
            Some(e) => e,
            None => worker.finish().unwrap_err(),
        };
        assert!(err.to_string().contains("disk full"));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }
}
