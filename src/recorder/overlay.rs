//! Burned-in clip annotations.
//!
//! Each clip frame gets a translucent banner with the phase relative to the
//! trigger, the camera and the confidence, plus a timeline bar along the
//! bottom edge. Text uses a built-in 5x7 bitmap font (upper case, digits and
//! a few symbols).

use image::{Rgb, RgbImage};

use crate::camera::CameraId;
use crate::detect::ClassLabel;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const BANNER_ALPHA: f32 = 0.3;

pub(crate) const BEFORE_COLOR: [u8; 3] = [0, 255, 255];
pub(crate) const ALERT_COLOR: [u8; 3] = [255, 0, 0];
pub(crate) const AFTER_COLOR: [u8; 3] = [255, 255, 0];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const TRACK_COLOR: [u8; 3] = [64, 64, 64];

/// Seconds after the trigger still labelled as the alert instant.
const ALERT_SPAN_SECS: f64 = 0.5;

/// Per-frame annotation input.
pub(crate) struct OverlayInfo {
    pub camera_id: CameraId,
    pub label: ClassLabel,
    pub confidence: f32,
    /// Seconds relative to the trigger (negative = before).
    pub offset_secs: f64,
    /// Position of this frame in the clip, in [0, 1].
    pub progress: f32,
    /// Position of the trigger in the clip, in [0, 1].
    pub trigger_progress: f32,
}

/// Phase line text and color for a frame offset.
pub(crate) fn phase_line(offset_secs: f64, label: ClassLabel) -> (String, [u8; 3]) {
    if offset_secs < 0.0 {
        (format!("BEFORE {:.1}S", offset_secs), BEFORE_COLOR)
    } else if offset_secs < ALERT_SPAN_SECS {
        (
            format!("ALERT {}", label.as_str().to_uppercase()),
            ALERT_COLOR,
        )
    } else {
        (format!("AFTER +{:.1}S", offset_secs), AFTER_COLOR)
    }
}

pub(crate) fn annotate(image: &mut RgbImage, info: &OverlayInfo) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let scale = (height / 240).max(1);
    let line_h = (GLYPH_H + 3) * scale;
    let margin = 2 * scale;

    let (phase, phase_color) = phase_line(info.offset_secs, info.label);
    let lines = [
        (phase, phase_color),
        (format!("CAM {}", info.camera_id), TEXT_COLOR),
        (
            format!("CONF {:.1}%", info.confidence * 100.0),
            TEXT_COLOR,
        ),
    ];

    let text_w = lines
        .iter()
        .map(|(text, _)| text_width(text, scale))
        .max()
        .unwrap_or(0);
    darken(
        image,
        0,
        0,
        text_w + 2 * margin,
        line_h * lines.len() as u32 + margin,
    );
    for (i, (text, color)) in lines.iter().enumerate() {
        draw_text(
            image,
            margin,
            margin + i as u32 * line_h,
            text,
            scale,
            *color,
        );
    }

    let bar_h = 3 * scale;
    let bar_y = height.saturating_sub(bar_h);
    fill(image, 0, bar_y, width, bar_h, TRACK_COLOR);
    let filled = (info.progress.clamp(0.0, 1.0) * width as f32).round() as u32;
    fill(image, 0, bar_y, filled, bar_h, phase_color);
    let marker_x = (info.trigger_progress.clamp(0.0, 1.0) * width as f32) as u32;
    fill(
        image,
        marker_x.min(width.saturating_sub(scale)),
        bar_y,
        scale,
        bar_h,
        ALERT_COLOR,
    );
}

fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        (n * (GLYPH_W + 1) - 1) * scale
    }
}

pub(crate) fn draw_text(image: &mut RgbImage, x: u32, y: u32, text: &str, scale: u32, color: [u8; 3]) {
    let mut cursor = x;
    for ch in text.chars() {
        let rows = glyph(ch.to_ascii_uppercase());
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                fill(
                    image,
                    cursor + col * scale,
                    y + row as u32 * scale,
                    scale,
                    scale,
                    color,
                );
            }
        }
        cursor += (GLYPH_W + 1) * scale;
    }
}

fn fill(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
    let (width, height) = image.dimensions();
    for py in y..y.saturating_add(h).min(height) {
        for px in x..x.saturating_add(w).min(width) {
            image.put_pixel(px, py, Rgb(color));
        }
    }
}

fn darken(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32) {
    let (width, height) = image.dimensions();
    for py in y..y.saturating_add(h).min(height) {
        for px in x..x.saturating_add(w).min(width) {
            let pixel = image.get_pixel_mut(px, py);
            for c in pixel.0.iter_mut() {
                *c = (*c as f32 * (1.0 - BANNER_ALPHA)).round() as u8;
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        ' ' => [0x00; 7],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}
