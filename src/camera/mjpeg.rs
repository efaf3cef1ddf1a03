//! Live frames from the doorbell's MJPEG endpoint.
//!
//! The endpoint serves `multipart/x-mixed-replace` with one JPEG per part.
//! Frames are cut out of the byte stream by their SOI/EOI markers, so part
//! headers and boundaries never need to be parsed. Only the newest complete
//! frame of each chunk is decoded.

use std::sync::Arc;

use image::ImageFormat;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::stream::StreamError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Partial frames larger than this are discarded
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Decoded RGBA frame
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

impl Frame {
    pub fn decode(jpeg: &[u8]) -> Result<Self, StreamError> {
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .map_err(|e| StreamError::Decode(e.to_string()))?
            .to_rgba8();

        Ok(Self {
            width: image.width() as usize,
            height: image.height() as usize,
            rgba: image.into_raw(),
        })
    }
}

/// Cuts complete JPEG images out of an arbitrary chunked byte stream
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: Vec<u8>,
}

impl FrameSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buffer, SOI, 0) else {
                // A trailing 0xFF may be the first half of the next SOI
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let len = self.buffer.len();
                self.buffer.drain(..len - keep);
                break;
            };
            let Some(end) = find_marker(&self.buffer, EOI, start + SOI.len()) else {
                self.buffer.drain(..start);
                if self.buffer.len() > MAX_FRAME_BYTES {
                    warn!("Discarding {} bytes without end of frame", self.buffer.len());
                    self.buffer.clear();
                }
                break;
            };

            let end = end + EOI.len();
            frames.push(self.buffer[start..end].to_vec());
            self.buffer.drain(..end);
        }
        frames
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|pair| pair == marker)
        .map(|offset| offset + from)
}

/// Opens frame feeds on the application runtime
#[derive(Clone)]
pub struct MjpegReader {
    client: reqwest::Client,
    runtime: Handle,
}

impl MjpegReader {
    pub fn new(runtime: Handle) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StreamError::Request(e.to_string()))?;
        Ok(Self { client, runtime })
    }

    pub fn open(&self, url: String) -> FrameFeed {
        let (frames_tx, frames) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let client = self.client.clone();

        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Frame feed for {} closed", url),
                result = read_frames(client, &url, frames_tx) => {
                    if let Err(e) = result {
                        warn!("Frame feed for {} ended: {}", url, e);
                    }
                }
            }
        });

        FrameFeed { frames, cancel }
    }
}

async fn read_frames(
    client: reqwest::Client,
    url: &str,
    frames: watch::Sender<Option<Arc<Frame>>>,
) -> Result<(), StreamError> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| StreamError::Request(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Status(status.as_u16()));
    }

    let mut splitter = FrameSplitter::default();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StreamError::Request(e.to_string()))?
    {
        let Some(jpeg) = splitter.push(&chunk).pop() else {
            continue;
        };
        match Frame::decode(&jpeg) {
            Ok(frame) => {
                if frames.send(Some(Arc::new(frame))).is_err() {
                    return Ok(());
                }
            }
            Err(e) => debug!("Skipping frame: {}", e),
        }
    }
    Err(StreamError::Empty)
}

/// Running frame download, stopped when dropped
pub struct FrameFeed {
    frames: watch::Receiver<Option<Arc<Frame>>>,
    cancel: CancellationToken,
}

impl FrameFeed {
    /// Newest frame, if one arrived since the last call
    pub fn latest(&mut self) -> Option<Arc<Frame>> {
        if !self.frames.has_changed().unwrap_or(false) {
            return None;
        }
        self.frames.borrow_and_update().clone()
    }
}

impl Drop for FrameFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
