use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::color::Rgba;
use crate::map2d::Map2D;

/// One finished frame of packed `0xRRGGBBAA` pixels.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<u32>,
}

/// Requested presentation geometry for the current display mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
    pub upscale: i32,
    pub padding: i32,
}

/// The display-buffer sink shared between a worker core and its host.
///
/// The worker writes one frame per tick through one of the `write_*`
/// methods; the host clones frames out with [DisplaySink::snapshot] at its
/// own cadence. Border colour, viewport geometry and viewport alpha are
/// presentation hints for whatever eventually puts the frame on screen.
#[derive(Default)]
pub struct DisplaySink {
    frame: Mutex<Frame>,
    viewport: Mutex<Viewport>,
    border_color: AtomicU32,
    viewport_alpha: AtomicU32,
}

impl DisplaySink {
    pub fn new() -> Self {
        let sink = DisplaySink::default();
        sink.viewport_alpha.store(0xFF, Ordering::Relaxed);
        sink
    }

    /// Publishes a frame of palette indices mapped through `transform`.
    pub fn write_indexed<F>(&self, source: &[u8], width: i32, height: i32, mut transform: F)
    where
        F: FnMut(u8) -> u32,
    {
        let mut frame = self.frame.lock().unwrap();
        frame.width = width;
        frame.height = height;
        frame.pixels.clear();
        frame
            .pixels
            .extend(source.iter().map(|&index| transform(index)));
    }

    /// Publishes an indexed [Map2D] through `transform`.
    pub fn write_map<F>(&self, source: &Map2D<u8>, transform: F)
    where
        F: FnMut(u8) -> u32,
    {
        self.write_indexed(source.as_slice(), source.width(), source.height(), transform);
    }

    /// Publishes a fully resolved RGBA buffer as-is.
    pub fn write_rgba_map(&self, source: &Map2D<Rgba>) {
        let mut frame = self.frame.lock().unwrap();
        frame.width = source.width();
        frame.height = source.height();
        frame.pixels.clear();
        frame
            .pixels
            .extend(source.as_slice().iter().map(|color| color.packed()));
    }

    /// Publishes the composite of two RGBA buffers through `blend`, pixel by
    /// pixel: `blend(src, dst)` with `src` from `source` and `dst` from
    /// `background`.
    pub fn write_blended<F>(&self, source: &Map2D<Rgba>, background: &Map2D<Rgba>, mut blend: F)
    where
        F: FnMut(Rgba, Rgba) -> Rgba,
    {
        let mut frame = self.frame.lock().unwrap();
        frame.width = source.width();
        frame.height = source.height();
        frame.pixels.clear();
        frame.pixels.extend(
            source
                .as_slice()
                .iter()
                .zip(background.as_slice())
                .map(|(&src, &dst)| blend(src, dst).packed()),
        );
    }

    /// Clones the most recent frame for host-side presentation.
    pub fn snapshot(&self) -> Frame {
        self.frame.lock().unwrap().clone()
    }

    pub fn set_border_color(&self, color: Rgba) {
        self.border_color.store(color.packed(), Ordering::Relaxed);
    }

    pub fn border_color(&self) -> Rgba {
        Rgba::from_packed(self.border_color.load(Ordering::Relaxed))
    }

    /// Updates the viewport geometry when `changed` is set; the flag lets
    /// cores forward their resolution-changed trait without branching.
    pub fn set_viewport_sizes(&self, changed: bool, width: i32, height: i32, upscale: i32, padding: i32) {
        if changed {
            *self.viewport.lock().unwrap() = Viewport {
                width,
                height,
                upscale,
                padding,
            };
        }
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.lock().unwrap()
    }

    pub fn set_viewport_alpha(&self, alpha: u8) {
        self.viewport_alpha.store(alpha as u32, Ordering::Relaxed);
    }

    pub fn viewport_alpha(&self) -> u8 {
        self.viewport_alpha.load(Ordering::Relaxed) as u8
    }
}
