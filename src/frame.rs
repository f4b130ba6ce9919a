//! Decoded frames and the classification window.
//!
//! - `Frame`: one decoded RGB24 image from a camera.
//! - `NormalizedFrame`: square, channel-planar, [0, 1]-scaled copy for the classifier.
//! - `FrameWindow`: bounded batch of normalized frames. Windows never overlap:
//!   a frame is classified at most once.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;
use std::time::SystemTime;

/// Frames per classification window.
pub const DEFAULT_WINDOW_SIZE: usize = 16;

/// Side of the square classifier input.
pub const DEFAULT_INPUT_SIZE: u32 = 224;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded camera frame (RGB24, row-major).
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
    pub captured_at: SystemTime,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
            captured_at: SystemTime::now(),
        })
    }

    /// Uniformly colored frame.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            pixels,
            captured_at: SystemTime::now(),
        }
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
            captured_at: SystemTime::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Normalization
// ----------------------------------------------------------------------------

/// Classifier input: `size`×`size`, planar channels (R, G, B), values in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedFrame {
    size: u32,
    data: Vec<f32>,
}

impl NormalizedFrame {
    pub fn size(&self) -> u32 {
        self.size
    }

    /// CHW-ordered samples.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn channel(&self, channel: usize) -> &[f32] {
        let plane = (self.size * self.size) as usize;
        &self.data[channel * plane..(channel + 1) * plane]
    }
}

/// Resize to a square, reorder interleaved RGB into planes, scale to [0, 1].
pub fn normalize(frame: &Frame, input_size: u32) -> Result<NormalizedFrame> {
    if input_size == 0 {
        return Err(anyhow!("normalization size must be > 0"));
    }
    let image = frame.to_image()?;
    let resized = if frame.width == input_size && frame.height == input_size {
        image
    } else {
        image::imageops::resize(&image, input_size, input_size, FilterType::Triangle)
    };

    let plane = (input_size * input_size) as usize;
    let mut data = vec![0f32; plane * 3];
    for (i, pixel) in resized.pixels().enumerate() {
        for channel in 0..3 {
            data[channel * plane + i] = pixel[channel] as f32 / 255.0;
        }
    }

    Ok(NormalizedFrame {
        size: input_size,
        data,
    })
}

// ----------------------------------------------------------------------------
// FrameWindow
// ----------------------------------------------------------------------------

/// Fixed-capacity batch of normalized frames awaiting classification.
#[derive(Debug)]
pub struct FrameWindow {
    frames: Vec<NormalizedFrame>,
    capacity: usize,
}

impl FrameWindow {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame window capacity must be > 0"));
        }
        Ok(Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// Append a frame. Fails if the window is already full; take it first.
    pub fn push(&mut self, frame: NormalizedFrame) -> Result<()> {
        if self.is_full() {
            return Err(anyhow!("frame window is full ({} frames)", self.capacity));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the buffered frames, padded to capacity by repeating the last one.
    ///
    /// Leaves the window empty. Returns `None` when there is nothing to classify.
    pub fn take_padded(&mut self) -> Option<Vec<NormalizedFrame>> {
        let mut frames = std::mem::replace(&mut self.frames, Vec::with_capacity(self.capacity));
        let last = frames.last()?.clone();
        frames.resize(self.capacity, last);
        Some(frames)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(value: u8) -> NormalizedFrame {
        normalize(&Frame::solid(4, 4, [value, value, value]), 2).unwrap()
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn normalize_produces_planar_unit_range() -> Result<()> {
        let frame = Frame::solid(8, 6, [255, 0, 51]);
        let norm = normalize(&frame, 4)?;

        assert_eq!(norm.size(), 4);
        assert_eq!(norm.data().len(), 4 * 4 * 3);
        assert!(norm.channel(0).iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(norm.channel(1).iter().all(|v| v.abs() < 1e-6));
        assert!(norm.channel(2).iter().all(|v| (*v - 0.2).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn window_fills_and_clears() -> Result<()> {
        let mut window = FrameWindow::new(3)?;
        for v in [10, 20, 30] {
            assert!(!window.is_full());
            window.push(normalized(v))?;
        }
        assert!(window.is_full());
        assert!(window.push(normalized(40)).is_err());

        let batch = window.take_padded().expect("full window");
        assert_eq!(batch.len(), 3);
        assert!(window.is_empty());
        Ok(())
    }

    #[test]
    fn short_window_is_padded_with_last_frame() -> Result<()> {
        let mut window = FrameWindow::new(4)?;
        window.push(normalized(10))?;
        window.push(normalized(200))?;

        let batch = window.take_padded().expect("partial window");
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[1], batch[2]);
        assert_eq!(batch[1], batch[3]);
        assert_ne!(batch[0], batch[1]);
        assert!(window.take_padded().is_none());
        Ok(())
    }
}
