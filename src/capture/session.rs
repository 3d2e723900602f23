use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device::{MediaConstraints, MediaDevices, MediaStream};
use crate::error::{SosError, SosResult};

pub const CAPTURE_LIMIT: Duration = Duration::from_millis(5000);

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Not recording (never started, or device access failed)
    Idle,
    Recording,
    Stopped,
}

/// A finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl MediaBlob {
    pub fn from_chunks(chunks: Vec<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: chunks.concat(),
            mime_type: mime_type.into(),
        }
    }
}

/// What a session reports to its consumer
#[derive(Debug)]
pub enum CaptureEvent {
    /// Stream acquired, recording in progress
    Started,
    /// Device access failed; nothing will be recorded
    Failed(SosError),
    /// Recording stopped; emitted at most once
    Finished(MediaBlob),
}

pub struct CaptureSession {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    duration_limit: Duration,
}

impl CaptureSession {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        constraints: MediaConstraints,
        duration_limit: Duration,
    ) -> Self {
        Self {
            devices,
            constraints,
            duration_limit,
        }
    }

    /// Start recording in the background.
    ///
    /// The stop deadline is fixed here, so the session never runs longer than
    /// `duration_limit` from this call whatever else happens.
    pub fn start(self, consumer: mpsc::Sender<CaptureEvent>) -> CaptureHandle {
        let stop = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(CaptureStatus::Idle);

        let recorder = Recorder {
            deadline: Instant::now() + self.duration_limit,
            session: self,
            status: status_tx,
            consumer,
            stop: stop.clone(),
        };
        tokio::spawn(recorder.run());

        CaptureHandle {
            stop,
            status: status_rx,
        }
    }
}

/// Control side of a running session
pub struct CaptureHandle {
    stop: CancellationToken,
    status: watch::Receiver<CaptureStatus>,
}

impl CaptureHandle {
    /// Stop recording. Safe to call any number of times, in any state.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn status(&self) -> CaptureStatus {
        *self.status.borrow()
    }
}

/// Owns the acquired stream; its tracks are stopped on every exit path.
struct TrackGuard {
    stream: Option<Box<dyn MediaStream>>,
}

impl TrackGuard {
    fn new(stream: Box<dyn MediaStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    async fn next_fragment(&mut self) -> Option<SosResult<Vec<u8>>> {
        match self.stream.as_mut() {
            Some(stream) => stream.next_fragment().await,
            None => None,
        }
    }

    fn mime_type(&self) -> String {
        self.stream
            .as_ref()
            .map(|s| s.mime_type().to_string())
            .unwrap_or_default()
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            debug!("Released capture device tracks");
        }
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct Recorder {
    session: CaptureSession,
    deadline: Instant,
    status: watch::Sender<CaptureStatus>,
    consumer: mpsc::Sender<CaptureEvent>,
    stop: CancellationToken,
}

impl Recorder {
    async fn run(self) {
        let acquired = tokio::select! {
            biased;
            _ = self.stop.cancelled() => {
                debug!("Capture stopped before the device was acquired");
                return;
            }
            _ = sleep_until(self.deadline) => {
                let err = SosError::MediaAccessDenied(
                    "device not acquired within the recording window".to_string(),
                );
                warn!("{}", err);
                let _ = self.consumer.send(CaptureEvent::Failed(err)).await;
                return;
            }
            acquired = self.session.devices.acquire(&self.session.constraints) => acquired,
        };

        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to access camera or microphone: {}", e);
                let _ = self.consumer.send(CaptureEvent::Failed(e)).await;
                return;
            }
        };

        let mut tracks = TrackGuard::new(stream);
        self.status.send_replace(CaptureStatus::Recording);
        info!("Recording started");
        let _ = self.consumer.send(CaptureEvent::Started).await;

        let mut chunks = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = sleep_until(self.deadline) => {
                    debug!("Recording limit reached");
                    break;
                }
                fragment = tracks.next_fragment() => match fragment {
                    Some(Ok(bytes)) => {
                        if !bytes.is_empty() {
                            chunks.push(bytes);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Capture stream failed, keeping {} fragments: {}", chunks.len(), e);
                        break;
                    }
                    None => {
                        debug!("Capture stream ended");
                        break;
                    }
                },
            }
        }

        let mime_type = tracks.mime_type();
        tracks.release();
        self.status.send_replace(CaptureStatus::Stopped);

        let blob = MediaBlob::from_chunks(chunks, mime_type);
        info!("Recording stopped ({} bytes)", blob.bytes.len());
        if self.consumer.send(CaptureEvent::Finished(blob)).await.is_err() {
            warn!("Recording finished but nobody is waiting for it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Probe {
        acquired: AtomicUsize,
        released: AtomicUsize,
        constraints: Mutex<Option<MediaConstraints>>,
    }

    /// Delivers scripted fragments 100 ms apart, then stays silent.
    struct ScriptedDevice {
        fragments: Vec<Vec<u8>>,
        deny: bool,
        probe: Arc<Probe>,
    }

    struct ScriptedStream {
        fragments: VecDeque<Vec<u8>>,
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl MediaDevices for ScriptedDevice {
        async fn acquire(&self, constraints: &MediaConstraints) -> SosResult<Box<dyn MediaStream>> {
            *self.probe.constraints.lock().unwrap() = Some(*constraints);
            if self.deny {
                return Err(SosError::MediaAccessDenied("permission denied".to_string()));
            }
            self.probe.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedStream {
                fragments: self.fragments.clone().into(),
                probe: self.probe.clone(),
            }))
        }
    }

    #[async_trait]
    impl MediaStream for ScriptedStream {
        async fn next_fragment(&mut self) -> Option<SosResult<Vec<u8>>> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            match self.fragments.pop_front() {
                Some(fragment) => Some(Ok(fragment)),
                None => std::future::pending().await,
            }
        }

        fn stop_tracks(&mut self) {
            self.probe.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session(fragments: Vec<Vec<u8>>, deny: bool) -> (CaptureSession, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let device = ScriptedDevice {
            fragments,
            deny,
            probe: probe.clone(),
        };
        (
            CaptureSession::new(Arc::new(device), MediaConstraints::default(), CAPTURE_LIMIT),
            probe,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stops_at_limit_and_emits_fragments_in_order() {
        let (session, probe) = session(vec![b"ab".to_vec(), Vec::new(), b"cd".to_vec()], false);
        let (tx, mut rx) = mpsc::channel(4);
        let started = Instant::now();

        let handle = session.start(tx);

        assert!(matches!(rx.recv().await, Some(CaptureEvent::Started)));
        assert_eq!(handle.status(), CaptureStatus::Recording);

        match rx.recv().await {
            Some(CaptureEvent::Finished(blob)) => {
                assert_eq!(blob.bytes, b"abcd".to_vec());
                assert_eq!(blob.mime_type, "video/webm");
            }
            other => panic!("expected a finished recording, got {:?}", other),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= CAPTURE_LIMIT);
        assert!(elapsed < CAPTURE_LIMIT + Duration::from_millis(50));
        assert_eq!(handle.status(), CaptureStatus::Stopped);
        assert_eq!(probe.released.load(Ordering::SeqCst), 1);
        assert_eq!(*probe.constraints.lock().unwrap(), Some(MediaConstraints::default()));

        // Only one recording per session.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_is_idempotent() {
        let (session, probe) = session(vec![b"ab".to_vec(), b"cd".to_vec()], false);
        let (tx, mut rx) = mpsc::channel(4);
        let handle = session.start(tx);

        assert!(matches!(rx.recv().await, Some(CaptureEvent::Started)));
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
        handle.stop();

        match rx.recv().await {
            Some(CaptureEvent::Finished(blob)) => assert_eq!(blob.bytes, b"ab".to_vec()),
            other => panic!("expected a finished recording, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
        handle.stop();

        assert_eq!(handle.status(), CaptureStatus::Stopped);
        assert_eq!(probe.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_access_never_emits_a_recording() {
        let (session, probe) = session(vec![b"ab".to_vec()], true);
        let (tx, mut rx) = mpsc::channel(4);
        let handle = session.start(tx);

        assert!(matches!(
            rx.recv().await,
            Some(CaptureEvent::Failed(SosError::MediaAccessDenied(_)))
        ));
        assert!(rx.recv().await.is_none());

        handle.stop();
        assert_eq!(handle.status(), CaptureStatus::Idle);
        assert_eq!(probe.acquired.load(Ordering::SeqCst), 0);
        assert_eq!(probe.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_acquisition_stays_idle() {
        let (session, _probe) = session(Vec::new(), false);
        let (tx, mut rx) = mpsc::channel(4);
        let handle = session.start(tx);
        handle.stop();

        assert!(rx.recv().await.is_none());
        assert_eq!(handle.status(), CaptureStatus::Idle);
    }
}
