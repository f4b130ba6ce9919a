//! Recording segments and the pre-event ring buffer.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

use crate::frame::Frame;
use crate::ingest::mjpeg::{encode_jpeg, MjpegReader};

/// A completed slice of continuous recording.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub path: PathBuf,
    pub frame_count: u32,
    pub created_at: SystemTime,
}

/// The segment currently being written.
pub(crate) struct SegmentWriter {
    path: PathBuf,
    out: BufWriter<File>,
    frame_count: u32,
    created_at: SystemTime,
}

impl SegmentWriter {
    pub(crate) fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("create segment file {}", path.display()))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            frame_count: 0,
            created_at: SystemTime::now(),
        })
    }

    pub(crate) fn write_frame(&mut self, frame: &Frame, quality: u8) -> Result<()> {
        let jpeg = encode_jpeg(frame, quality)?;
        self.out
            .write_all(&jpeg)
            .with_context(|| format!("write segment {}", self.path.display()))?;
        self.frame_count += 1;
        Ok(())
    }

    pub(crate) fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Flush and close. The file is removed if the flush fails.
    pub(crate) fn finish(mut self) -> Result<Segment> {
        if let Err(e) = self.out.flush() {
            remove_segment_file(&self.path);
            return Err(e).with_context(|| format!("flush segment {}", self.path.display()));
        }
        Ok(Segment {
            path: self.path,
            frame_count: self.frame_count,
            created_at: self.created_at,
        })
    }

    /// Close and delete without keeping anything.
    pub(crate) fn abandon(self) {
        let path = self.path.clone();
        drop(self);
        remove_segment_file(&path);
    }
}

/// Fixed-capacity ring of the most recent completed segments.
///
/// Pushing into a full buffer hands back the oldest segment; the caller owns
/// its file from then on.
#[derive(Debug)]
pub struct SegmentBuffer {
    segments: VecDeque<Segment>,
    capacity: usize,
}

impl SegmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            segments: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a segment, returning the evicted one if the buffer was full.
    pub fn push(&mut self, segment: Segment) -> Option<Segment> {
        if self.capacity == 0 {
            return Some(segment);
        }
        let evicted = if self.segments.len() >= self.capacity {
            self.segments.pop_front()
        } else {
            None
        };
        self.segments.push_back(segment);
        evicted
    }

    /// Remove every segment, oldest first.
    pub fn take_all(&mut self) -> Vec<Segment> {
        self.segments.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn total_frames(&self) -> u64 {
        self.segments.iter().map(|s| s.frame_count as u64).sum()
    }
}

pub(crate) fn open_segment_reader(path: &Path) -> Result<MjpegReader<BufReader<File>>> {
    let file =
        File::open(path).with_context(|| format!("open segment file {}", path.display()))?;
    Ok(MjpegReader::new(BufReader::new(file)))
}

/// Delete a temporary segment file. Missing files are fine.
pub(crate) fn remove_segment_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            log::warn!("failed to remove segment {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(name: &str, frames: u32) -> Segment {
        Segment {
            path: PathBuf::from(name),
            frame_count: frames,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn buffer_evicts_oldest() {
        let mut buffer = SegmentBuffer::new(2);
        assert!(buffer.push(segment("a", 2)).is_none());
        assert!(buffer.push(segment("b", 2)).is_none());
        let evicted = buffer.push(segment("c", 2)).expect("eviction");
        assert_eq!(evicted.path, PathBuf::from("a"));

        let names: Vec<_> = buffer.segments().map(|s| s.path.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("b"), PathBuf::from("c")]);
        assert_eq!(buffer.total_frames(), 4);
    }

    #[test]
    fn zero_capacity_buffer_keeps_nothing() {
        let mut buffer = SegmentBuffer::new(0);
        let evicted = buffer.push(segment("a", 1)).expect("immediate eviction");
        assert_eq!(evicted.path, PathBuf::from("a"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn take_all_drains_in_order() {
        let mut buffer = SegmentBuffer::new(3);
        buffer.push(segment("a", 1));
        buffer.push(segment("b", 1));
        let taken: Vec<_> = buffer.take_all().into_iter().map(|s| s.path).collect();
        assert_eq!(taken, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn writer_round_trips_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seg.mjpeg");
        let mut writer = SegmentWriter::create(path.clone())?;
        writer.write_frame(&Frame::solid(8, 8, [10, 20, 30]), 85)?;
        writer.write_frame(&Frame::solid(8, 8, [200, 20, 30]), 85)?;
        let segment = writer.finish()?;
        assert_eq!(segment.frame_count, 2);

        let mut reader = open_segment_reader(&segment.path)?;
        let mut frames = 0;
        while reader.read_next_frame()?.is_some() {
            frames += 1;
        }
        assert_eq!(frames, 2);
        Ok(())
    }

    #[test]
    fn abandon_removes_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seg.mjpeg");
        let writer = SegmentWriter::create(path.clone())?;
        writer.abandon();
        assert!(!path.exists());
        assert!(remove_segment_file(&path));
        Ok(())
    }
}
