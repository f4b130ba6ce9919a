//! MJPEG elementary streams: back-to-back baseline JPEGs.
//!
//! Used on the wire (HTTP multipart bodies) and on disk (segments and clips).

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use std::io::Read;

use crate::frame::Frame;

pub(crate) const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Splits a byte stream into individual JPEG images.
pub(crate) struct MjpegReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> MjpegReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` once the stream ends.
    ///
    /// Trailing bytes that never form a complete image are dropped at end of stream.
    pub(crate) fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                self.buffer.clear();
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }

    /// Next decoded frame, or `None` once the stream ends.
    pub(crate) fn read_next_frame(&mut self) -> Result<Option<Frame>> {
        match self.read_next_jpeg()? {
            Some(bytes) => decode_jpeg(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

pub(crate) fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image =
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).context("decode jpeg")?;
    Ok(Frame::from_image(image.into_rgb8()))
}

pub(crate) fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frame.pixels().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            frame.pixels(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .context("encode jpeg")?;
    if out.is_empty() {
        return Err(anyhow!("jpeg encoder produced no output"));
    }
    Ok(out)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut start = None;
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == 0xFF && buffer[i + 1] == 0xD8 {
            start = Some(i);
            break;
        }
        i += 1;
    }
    let start = start?;
    let mut j = start + 2;
    while j + 1 < buffer.len() {
        if buffer[j] == 0xFF && buffer[j + 1] == 0xD9 {
            return Some((start, j + 2));
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finds_jpeg_bounds_in_multipart_noise() {
        let mut body = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        body.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        body.extend_from_slice(b"\r\n--frame");

        let (start, end) = find_jpeg_bounds(&body).expect("bounds");
        assert_eq!(&body[start..start + 2], &[0xFF, 0xD8]);
        assert_eq!(&body[end - 2..end], &[0xFF, 0xD9]);
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00]).is_none());
    }

    #[test]
    fn reader_splits_concatenated_frames() -> Result<()> {
        let mut stream = Vec::new();
        for shade in [0u8, 128, 255] {
            stream.extend(encode_jpeg(&Frame::solid(16, 8, [shade, shade, shade]), 85)?);
        }

        let mut reader = MjpegReader::new(Cursor::new(stream));
        let mut count = 0;
        while let Some(frame) = reader.read_next_frame()? {
            assert_eq!((frame.width, frame.height), (16, 8));
            count += 1;
        }
        assert_eq!(count, 3);
        Ok(())
    }
}
