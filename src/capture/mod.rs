mod screen;

pub use screen::ScreenSource;

use anyhow::Result;
use image::RgbaImage;

pub type Frame = RgbaImage;

pub trait FrameSource: Send {
    fn capture(&mut self, region: Rectangle) -> Result<Frame>;
}

impl<F> FrameSource for F
where
    F: FnMut(Rectangle) -> Result<Frame> + Send,
{
    fn capture(&mut self, region: Rectangle) -> Result<Frame> {
        self(region)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn clamp_to(&self, bounds: &Rectangle) -> Option<Rectangle> {
        let left = i64::from(self.x).max(i64::from(bounds.x));
        let top = i64::from(self.y).max(i64::from(bounds.y));
        let right = (i64::from(self.x) + i64::from(self.width))
            .min(i64::from(bounds.x) + i64::from(bounds.width));
        let bottom = (i64::from(self.y) + i64::from(self.height))
            .min(i64::from(bounds.y) + i64::from(bounds.height));

        if right <= left || bottom <= top {
            return None;
        }

        Some(Rectangle {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

impl std::str::FromStr for Rectangle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(anyhow::anyhow!("expected x,y,width,height, got '{}'", s));
        }
        let rect = Rectangle {
            x: parts[0].parse()?,
            y: parts[1].parse()?,
            width: parts[2].parse()?,
            height: parts[3].parse()?,
        };
        if rect.is_empty() {
            return Err(anyhow::anyhow!("region must have a non-zero size"));
        }
        Ok(rect)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub id: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

impl MonitorInfo {
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(self.x, self.y, self.width, self.height)
    }
}

pub fn list_monitors() -> Result<Vec<MonitorInfo>> {
    let screens = xcap::Monitor::all()?;
    let monitors: Vec<MonitorInfo> = screens
        .into_iter()
        .map(|s| MonitorInfo {
            id: s.id(),
            name: s.name().to_string(),
            x: s.x(),
            y: s.y(),
            width: s.width(),
            height: s.height(),
            is_primary: s.is_primary(),
        })
        .collect();
    Ok(monitors)
}
