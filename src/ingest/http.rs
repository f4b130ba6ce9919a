//! HTTP frame source.
//!
//! This module provides `HttpSource` for IP-webcam style cameras that serve
//! MJPEG (multipart) or single JPEG snapshots over HTTP.
//!
//! The HTTP source is responsible for:
//! - Connecting to the stream (or polling the snapshot URL)
//! - Decoding JPEG frames in-memory
//! - Decimating to the target frame rate
//! - Reconnecting on the next call after the stream drops

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::mjpeg::{decode_jpeg, MjpegReader};
use super::{frame_interval, health_grace, FrameSource, SourceStats};
use crate::frame::Frame;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for an HTTP source.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Stream URL (e.g., "http://192.168.1.20:8080/video").
    pub url: String,
    /// Target frame rate (frames per second). Source will decimate to this rate.
    pub target_fps: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/video".to_string(),
            target_fps: 16,
        }
    }
}

/// HTTP MJPEG/JPEG frame source.
pub struct HttpSource {
    config: HttpConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegReader<Box<dyn Read + Send>>),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse http camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported http source scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn open_stream(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to http camera {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader: Box<dyn Read + Send> = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegReader::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        Ok(())
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.config.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        Ok(bytes)
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        let is_single = matches!(self.stream, Some(HttpStream::SingleJpeg));
        if is_single {
            return self.fetch_single_jpeg();
        }
        let Some(HttpStream::Mjpeg(reader)) = self.stream.as_mut() else {
            return Err(anyhow!("http source not connected"));
        };
        reader
            .read_next_jpeg()?
            .ok_or_else(|| anyhow!("mjpeg stream ended"))
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        self.open_stream()?;
        log::info!("HttpSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.stream.is_none() {
            self.open_stream()?;
            log::info!("HttpSource: reconnected to {}", self.config.url);
        }
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            // Snapshots are pulled, so wait for the next slot instead of
            // fetching and discarding.
            if matches!(self.stream, Some(HttpStream::SingleJpeg)) {
                let now = Instant::now();
                if let Some(wait) = remaining_interval(self.last_frame_at, min_interval, now) {
                    std::thread::sleep(wait);
                }
            }
            let jpeg_bytes = match self.read_jpeg() {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.last_error = Some(e.to_string());
                    self.stream = None;
                    return Err(e);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let frame = decode_jpeg(&jpeg_bytes)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(frame);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.config.url.clone(),
        }
    }
}

/// Time left before the next frame is due, if any.
fn remaining_interval(
    last_frame_at: Option<Instant>,
    min_interval: Duration,
    now: Instant,
) -> Option<Duration> {
    let due = last_frame_at? + min_interval;
    let wait = due.saturating_duration_since(now);
    (!wait.is_zero()).then_some(wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::super::mjpeg::encode_jpeg;

    /// Serves the same JPEG snapshot to every request and counts them.
    fn snapshot_server(requests: Arc<AtomicUsize>) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let body = encode_jpeg(&Frame::solid(16, 16, [90, 90, 90]), 80)?;
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap_or(0) > 0 && line != "\r\n" {
                    line.clear();
                }
                requests.fetch_add(1, Ordering::SeqCst);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        Ok(format!("http://{}/shot.jpg", addr))
    }

    #[test]
    fn remaining_interval_counts_down() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        assert_eq!(remaining_interval(None, interval, start), None);
        assert_eq!(
            remaining_interval(Some(start), interval, start + Duration::from_millis(40)),
            Some(Duration::from_millis(60))
        );
        assert_eq!(
            remaining_interval(Some(start), interval, start + Duration::from_millis(150)),
            None
        );
        assert_eq!(remaining_interval(Some(start), Duration::ZERO, start), None);
    }

    #[test]
    fn snapshot_mode_fetches_once_per_frame() -> Result<()> {
        let requests = Arc::new(AtomicUsize::new(0));
        let url = snapshot_server(requests.clone())?;
        let mut source = HttpSource::new(HttpConfig { url, target_fps: 10 })?;
        source.connect()?;
        assert_eq!(requests.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        for _ in 0..3 {
            let frame = source.next_frame()?;
            assert_eq!((frame.width, frame.height), (16, 16));
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(requests.load(Ordering::SeqCst), 4);
        assert_eq!(source.stats().frames_captured, 3);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpSource::new(HttpConfig {
            url: "rtsp://10.0.0.5:554/".to_string(),
            target_fps: 10,
        })
        .is_err());
        assert!(HttpSource::new(HttpConfig {
            url: "not a url".to_string(),
            target_fps: 10,
        })
        .is_err());
    }

    #[test]
    fn unconnected_source_is_unhealthy() -> Result<()> {
        let source = HttpSource::new(HttpConfig::default())?;
        assert!(!source.is_healthy());
        assert_eq!(source.stats().frames_captured, 0);
        Ok(())
    }
}
