use anyhow::{anyhow, Result};
use xcap::Monitor;

use super::{Frame, FrameSource, MonitorInfo, Rectangle};

const MAX_CAPTURE_DIMENSION: u32 = 16384;

pub struct ScreenSource {
    monitor_id: Option<u32>,
}

impl ScreenSource {
    pub fn new() -> Self {
        Self { monitor_id: None }
    }

    pub fn with_monitor(monitor_id: u32) -> Self {
        Self {
            monitor_id: Some(monitor_id),
        }
    }

    fn find_monitor(&self) -> Result<Monitor> {
        let mut monitors = Monitor::all()?;

        match self.monitor_id {
            Some(id) => monitors
                .into_iter()
                .find(|m| m.id() == id)
                .ok_or_else(|| anyhow!("Monitor {} not found", id)),
            None => {
                if monitors.is_empty() {
                    return Err(anyhow!("No monitors found"));
                }
                let index = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
                Ok(monitors.swap_remove(index))
            }
        }
    }

    pub fn monitor_info(&self) -> Result<MonitorInfo> {
        let monitor = self.find_monitor()?;
        Ok(MonitorInfo {
            id: monitor.id(),
            name: monitor.name().to_string(),
            x: monitor.x(),
            y: monitor.y(),
            width: monitor.width(),
            height: monitor.height(),
            is_primary: monitor.is_primary(),
        })
    }
}

impl Default for ScreenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for ScreenSource {
    fn capture(&mut self, region: Rectangle) -> Result<Frame> {
        let monitor = self.find_monitor()?;
        let bounds = Rectangle::new(monitor.x(), monitor.y(), monitor.width(), monitor.height());
        let clipped = region
            .clamp_to(&bounds)
            .ok_or_else(|| anyhow!("Region {:?} lies outside monitor {}", region, monitor.id()))?;

        let img = monitor.capture_image()?;
        if img.width() > MAX_CAPTURE_DIMENSION || img.height() > MAX_CAPTURE_DIMENSION {
            return Err(anyhow!("Captured image dimensions exceed safety limit"));
        }

        let src_x = (clipped.x - bounds.x) as u32;
        let src_y = (clipped.y - bounds.y) as u32;
        let width = clipped.width.min(img.width().saturating_sub(src_x));
        let height = clipped.height.min(img.height().saturating_sub(src_y));
        if width == 0 || height == 0 {
            return Err(anyhow!("Invalid region"));
        }

        Ok(image::imageops::crop_imm(&img, src_x, src_y, width, height).to_image())
    }
}
