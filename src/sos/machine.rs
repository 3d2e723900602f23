use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::device::{MediaConstraints, MediaDevices};
use crate::capture::session::{CaptureEvent, CaptureHandle, CaptureSession, CAPTURE_LIMIT};
use crate::capture::upload::{upload_recording, ObjectStore};
use crate::error::SosError;
use crate::location::{LocationProvider, Position};
use crate::models::alert::{AlertContext, NewAlert};
use crate::repository::AlertStore;
use crate::sos::state::AlertUiState;

const NOTICE_CAPACITY: usize = 16;
const CAPTURE_EVENT_CAPACITY: usize = 4;

/// User actions dispatched from the alert panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Start,
    Confirm,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct SosTimings {
    /// Dwell in `Idle` before the countdown starts on its own
    pub idle_dwell: Duration,
    pub countdown_seconds: u32,
    pub tick: Duration,
    pub capture_limit: Duration,
}

impl Default for SosTimings {
    fn default() -> Self {
        Self {
            idle_dwell: Duration::from_millis(3000),
            countdown_seconds: 30,
            tick: Duration::from_secs(1),
            capture_limit: CAPTURE_LIMIT,
        }
    }
}

/// External collaborators the machine coordinates
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AlertStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub location: Arc<LocationProvider>,
    pub devices: Arc<dyn MediaDevices>,
}

#[derive(Debug)]
enum Event {
    DwellElapsed { epoch: u64 },
    Tick { epoch: u64 },
    LocationResolved(Position),
    AlertCreated(Option<Uuid>),
    PreviewStarted,
    MediaSettled(Option<String>),
    AttachSettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Countdown,
    Triggered,
}

pub struct AlertStateMachine {
    collaborators: Collaborators,
    context: AlertContext,
    timings: SosTimings,
    ui: watch::Sender<AlertUiState>,
    notices: broadcast::Sender<SosError>,
    events: mpsc::UnboundedSender<Event>,

    phase: Phase,
    counter: u32,
    /// Set by a cancellation; suppresses the automatic idle dwell
    cancelled: bool,
    /// Bumped whenever the pending timer is discarded
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    capture: Option<CaptureHandle>,

    position: Position,
    live_preview: bool,
    alert_id: Option<Uuid>,
    media_url: Option<String>,
    create_issued: bool,
    create_settled: bool,
    attach_issued: bool,
    /// Spawned tasks that still owe the machine an event
    in_flight: usize,
}

impl AlertStateMachine {
    /// Spawn a machine for one alert instance, starting in `Idle`.
    pub fn spawn(
        collaborators: Collaborators,
        context: AlertContext,
        timings: SosTimings,
    ) -> AlertHandle {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui, state) = watch::channel(AlertUiState::Idle);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let machine = Self {
            collaborators,
            context,
            counter: timings.countdown_seconds,
            timings,
            ui,
            notices: notices.clone(),
            events: events_tx,
            phase: Phase::Idle,
            cancelled: false,
            epoch: 0,
            timer: None,
            capture: None,
            position: Position::unavailable(),
            live_preview: false,
            alert_id: None,
            media_url: None,
            create_issued: false,
            create_settled: false,
            attach_issued: false,
            in_flight: 0,
        };
        let task = tokio::spawn(machine.run(intents_rx, events_rx));

        AlertHandle {
            intents: intents_tx,
            state,
            notices,
            task,
        }
    }

    async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<Intent>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        self.enter_idle();

        let mut accepting = true;
        loop {
            if !accepting && self.in_flight == 0 {
                break;
            }
            tokio::select! {
                intent = intents.recv(), if accepting => match intent {
                    Some(intent) => self.handle_intent(intent),
                    None => {
                        accepting = false;
                        self.clear_timer();
                        if self.in_flight > 0 {
                            info!("Waiting for {} pending SOS operations", self.in_flight);
                        }
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                else => break,
            }
        }
        debug!("SOS state machine stopped");
    }

    fn handle_intent(&mut self, intent: Intent) {
        match (intent, self.phase) {
            (Intent::Start, Phase::Idle) => {
                info!("SOS started by user");
                self.cancelled = false;
                self.enter_countdown();
            }
            (Intent::Confirm, Phase::Countdown) => {
                info!("SOS confirmed by user");
                self.trigger();
            }
            (Intent::Cancel, Phase::Idle | Phase::Countdown) => self.cancel(),
            (intent, phase) => debug!("Ignoring {:?} while {:?}", intent, phase),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::DwellElapsed { epoch }
                if epoch == self.epoch && self.phase == Phase::Idle && !self.cancelled =>
            {
                info!("No action after idle dwell, starting countdown");
                self.enter_countdown();
            }
            Event::Tick { epoch } if epoch == self.epoch && self.phase == Phase::Countdown => {
                self.tick();
            }
            Event::DwellElapsed { .. } | Event::Tick { .. } => debug!("Dropping stale timer event"),
            Event::LocationResolved(position) => {
                self.settle();
                self.position = position;
                self.publish();
                self.create_alert();
            }
            Event::AlertCreated(id) => {
                self.settle();
                self.create_settled = true;
                self.alert_id = id;
                self.try_attach();
            }
            Event::PreviewStarted => {
                self.live_preview = true;
                self.publish();
            }
            Event::MediaSettled(url) => {
                self.settle();
                self.capture = None;
                self.media_url = url;
                self.try_attach();
            }
            Event::AttachSettled => self.settle(),
        }
    }

    fn enter_idle(&mut self) {
        self.phase = Phase::Idle;
        self.publish();
        if self.cancelled {
            return;
        }

        let events = self.events.clone();
        let epoch = self.epoch;
        let dwell = self.timings.idle_dwell;
        self.timer = Some(tokio::spawn(async move {
            sleep(dwell).await;
            let _ = events.send(Event::DwellElapsed { epoch });
        }));
    }

    fn enter_countdown(&mut self) {
        self.clear_timer();
        self.phase = Phase::Countdown;
        self.counter = self.timings.countdown_seconds;
        self.publish();

        let events = self.events.clone();
        let epoch = self.epoch;
        let period = self.timings.tick;
        self.timer = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if events.send(Event::Tick { epoch }).is_err() {
                    break;
                }
            }
        }));
    }

    fn tick(&mut self) {
        self.counter = self.counter.saturating_sub(1);
        if self.counter == 0 {
            info!("Countdown elapsed, sending SOS");
            self.trigger();
        } else {
            self.publish();
        }
    }

    /// Back to the initial `Idle` defaults. Idempotent.
    fn cancel(&mut self) {
        info!("SOS cancelled");
        self.clear_timer();
        if let Some(capture) = self.capture.take() {
            debug!("Stopping capture in state {:?}", capture.status());
            capture.stop();
        }
        self.counter = self.timings.countdown_seconds;
        self.position = Position::unavailable();
        self.live_preview = false;
        self.alert_id = None;
        self.media_url = None;
        self.create_issued = false;
        self.create_settled = false;
        self.attach_issued = false;
        self.cancelled = true;
        self.enter_idle();
    }

    fn trigger(&mut self) {
        self.clear_timer();
        self.phase = Phase::Triggered;
        warn!(
            "SOS triggered for team {} ({})",
            self.context.team_name(),
            self.context.team_id()
        );
        self.publish();

        // Capture and location are independent; neither waits for the other.
        self.start_capture();
        self.request_location();
    }

    fn start_capture(&mut self) {
        let (tx, rx) = mpsc::channel(CAPTURE_EVENT_CAPACITY);
        let session = CaptureSession::new(
            self.collaborators.devices.clone(),
            MediaConstraints::default(),
            self.timings.capture_limit,
        );
        self.capture = Some(session.start(tx));

        self.in_flight += 1;
        tokio::spawn(run_media_pipeline(
            rx,
            self.collaborators.storage.clone(),
            self.events.clone(),
            self.notices.clone(),
        ));
    }

    fn request_location(&mut self) {
        self.in_flight += 1;
        let location = self.collaborators.location.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let position = location.current_position().await;
            let _ = events.send(Event::LocationResolved(position));
        });
    }

    fn create_alert(&mut self) {
        if self.create_issued {
            warn!("Alert record already requested, ignoring");
            return;
        }
        self.create_issued = true;

        let alert = NewAlert::new(&self.context, self.position, Utc::now());
        let store = self.collaborators.store.clone();
        let events = self.events.clone();
        let notices = self.notices.clone();

        self.in_flight += 1;
        tokio::spawn(async move {
            let id = match store.create_alert(&alert).await {
                Ok(record) => {
                    info!("SOS alert recorded with id {}", record.id);
                    Some(record.id)
                }
                Err(e) => {
                    error!("Failed to insert SOS alert: {}", e);
                    let _ = notices.send(e);
                    None
                }
            };
            let _ = events.send(Event::AlertCreated(id));
        });
    }

    /// Issues the media patch once both the record id and the URL are known.
    fn try_attach(&mut self) {
        if self.attach_issued {
            return;
        }
        let Some(url) = self.media_url.clone() else {
            return;
        };
        let Some(id) = self.alert_id else {
            if self.create_settled {
                warn!("Alert was never recorded, dropping video url {}", url);
            }
            return;
        };
        self.attach_issued = true;

        let store = self.collaborators.store.clone();
        let events = self.events.clone();
        let notices = self.notices.clone();

        self.in_flight += 1;
        tokio::spawn(async move {
            match store.attach_media_url(id, &url).await {
                Ok(()) => info!("Video attached to SOS alert {}", id),
                Err(e) => {
                    error!("Failed to attach video url to SOS alert {}: {}", id, e);
                    let _ = notices.send(e);
                }
            }
            let _ = events.send(Event::AttachSettled);
        });
    }

    fn clear_timer(&mut self) {
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn settle(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn publish(&self) {
        let state = match self.phase {
            Phase::Idle => AlertUiState::Idle,
            Phase::Countdown => AlertUiState::Countdown {
                seconds_remaining: self.counter,
                total_seconds: self.timings.countdown_seconds,
            },
            Phase::Triggered => AlertUiState::Triggered {
                latitude: self.position.latitude,
                longitude: self.position.longitude,
                live_preview: self.live_preview,
            },
        };
        self.ui.send_replace(state);
    }
}

/// Forwards capture progress to the machine and uploads the finished recording.
async fn run_media_pipeline(
    mut capture: mpsc::Receiver<CaptureEvent>,
    storage: Arc<dyn ObjectStore>,
    events: mpsc::UnboundedSender<Event>,
    notices: broadcast::Sender<SosError>,
) {
    let mut url = None;
    while let Some(event) = capture.recv().await {
        match event {
            CaptureEvent::Started => {
                let _ = events.send(Event::PreviewStarted);
            }
            CaptureEvent::Failed(e) => {
                let _ = notices.send(e);
            }
            CaptureEvent::Finished(blob) => {
                match upload_recording(storage.as_ref(), blob).await {
                    Ok(public_url) => url = Some(public_url),
                    Err(e) => {
                        error!("Failed to upload SOS recording: {}", e);
                        let _ = notices.send(e);
                    }
                }
                break;
            }
        }
    }
    let _ = events.send(Event::MediaSettled(url));
}

/// Client side of a running state machine
pub struct AlertHandle {
    intents: mpsc::UnboundedSender<Intent>,
    state: watch::Receiver<AlertUiState>,
    notices: broadcast::Sender<SosError>,
    task: JoinHandle<()>,
}

impl AlertHandle {
    pub fn dispatch(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            warn!("SOS state machine is no longer running, dropping {:?}", intent);
        }
    }

    pub fn state(&self) -> watch::Receiver<AlertUiState> {
        self.state.clone()
    }

    /// Failures the user should hear about
    pub fn notices(&self) -> broadcast::Receiver<SosError> {
        self.notices.subscribe()
    }

    /// Stop accepting intents and wait until in-flight work has settled.
    pub async fn shutdown(self) {
        let Self { intents, task, .. } = self;
        drop(intents);
        if let Err(e) = task.await {
            error!("SOS state machine task failed: {}", e);
        }
    }
}
