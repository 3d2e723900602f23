use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{SosError, SosResult};

pub const WEBM_MIME_TYPE: &str = "video/webm";

/// Upper bound on a single fragment read from a file-backed source.
const FRAGMENT_SIZE: usize = 64 * 1024;

/// Requested stream characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Request the camera facing the user
    pub front_facing_video: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            front_facing_video: true,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Platform media-device API
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a combined audio/video stream matching `constraints`
    async fn acquire(&self, constraints: &MediaConstraints) -> SosResult<Box<dyn MediaStream>>;
}

/// An acquired stream producing encoded fragments in arrival order
#[async_trait]
pub trait MediaStream: Send {
    /// Next encoded fragment, or `None` once the stream has ended
    async fn next_fragment(&mut self) -> Option<SosResult<Vec<u8>>>;

    /// Stop every device track backing this stream
    fn stop_tracks(&mut self);

    fn mime_type(&self) -> &str {
        WEBM_MIME_TYPE
    }
}

/// Reads an already-encoded WebM stream from a file or FIFO fed by an
/// external encoder. No configured source behaves like a denied device.
pub struct FileMediaDevice {
    source: Option<PathBuf>,
}

impl FileMediaDevice {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl MediaDevices for FileMediaDevice {
    async fn acquire(&self, constraints: &MediaConstraints) -> SosResult<Box<dyn MediaStream>> {
        let path = self.source.as_ref().ok_or_else(|| {
            SosError::MediaAccessDenied("no capture source configured".to_string())
        })?;

        debug!(
            "Opening capture source {} (front camera: {}, echo cancellation: {}, noise suppression: {})",
            path.display(),
            constraints.front_facing_video,
            constraints.echo_cancellation,
            constraints.noise_suppression
        );
        let file = File::open(path)
            .await
            .map_err(|e| SosError::MediaAccessDenied(format!("{}: {}", path.display(), e)))?;

        Ok(Box::new(FileMediaStream { file: Some(file) }))
    }
}

struct FileMediaStream {
    file: Option<File>,
}

#[async_trait]
impl MediaStream for FileMediaStream {
    async fn next_fragment(&mut self) -> Option<SosResult<Vec<u8>>> {
        let file = self.file.as_mut()?;
        let mut buf = vec![0u8; FRAGMENT_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Err(e) => Some(Err(SosError::MediaAccessDenied(format!(
                "capture source read failed: {}",
                e
            )))),
        }
    }

    fn stop_tracks(&mut self) {
        self.file = None;
    }
}
