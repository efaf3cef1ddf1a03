//! # Remote Control Engine
//!
//! Single task that owns every component and is the only writer of their
//! state. Helper tasks (MQTT poller, stream probes, retry timers, recorder
//! and speaker threads) only ever send events back.
//!
//! ```text
//!  UI ──UserIntent──────┐
//!  MQTT poller ─────────┤
//!  probes / timers ─────┼──► RemoteControl::run ──watch<ControlPanel>──► UI
//!  recorder ────────────┘                        └─mpsc<Alert>─────────► UI
//! ```
//!
//! Events are processed one at a time in arrival order, and the panel is
//! republished after each one.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assistant::AiQueryCoordinator;
use crate::audio::capture::{AudioCapture, CaptureError, CaptureEvent, CaptureOutcome, Recorder};
use crate::audio::playback::{AudioPlayback, AudioSink};
use crate::camera::stream::StreamProbe;
use crate::camera::{CameraController, CameraEvent};
use crate::config::AppConfig;
use crate::mqtt::connection::ConnectionManager;
use crate::mqtt::message::MessageEvent;
use crate::mqtt::transport::{Transport, TransportEvent};
use crate::protocol::{self, Command, Inbound, Switch, VolumeStep};
use crate::ui_sync::{Alert, ControlPanel, UiSync};

const INTENT_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserIntent {
    ToggleCamera,
    AskAi,
    ToggleListen,
    ToggleTalk,
    VolumeUp,
    VolumeDown,
    Reconnect,
    Shutdown,
}

/// External backends the engine drives
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub probe: Arc<dyn StreamProbe>,
    pub recorder: Box<dyn Recorder>,
    pub sink: Box<dyn AudioSink>,
}

/// Front-end side of a running engine
pub struct RemoteControlHandle {
    pub intents: mpsc::Sender<UserIntent>,
    pub panel: watch::Receiver<ControlPanel>,
    pub alerts: mpsc::UnboundedReceiver<Alert>,
    pub task: JoinHandle<()>,
}

enum EngineEvent {
    Intent(UserIntent),
    Transport(TransportEvent),
    Camera(CameraEvent),
    Capture(CaptureEvent),
}

pub struct RemoteControl {
    connection: ConnectionManager,
    camera: CameraController,
    capture: AudioCapture,
    playback: AudioPlayback,
    ai: AiQueryCoordinator,
    ui: UiSync,
    panel: ControlPanel,

    intents: mpsc::Receiver<UserIntent>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    camera_events: mpsc::UnboundedReceiver<CameraEvent>,
    capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
}

impl RemoteControl {
    pub fn spawn(config: &AppConfig, collaborators: Collaborators) -> RemoteControlHandle {
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
        let (panel_tx, panel_rx) = watch::channel(ControlPanel::default());
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (camera_tx, camera_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();

        let engine = Self {
            connection: ConnectionManager::new(collaborators.transport, transport_tx),
            camera: CameraController::new(config.stream.clone(), collaborators.probe, camera_tx),
            capture: AudioCapture::probe(config.broker.secure, collaborators.recorder, capture_tx),
            playback: AudioPlayback::new(
                collaborators.sink,
                config.audio.play_when_not_listening,
            ),
            ai: AiQueryCoordinator::new(),
            ui: UiSync::new(panel_tx, alert_tx),
            panel: ControlPanel::default(),
            intents: intent_rx,
            transport_events: transport_rx,
            camera_events: camera_rx,
            capture_events: capture_rx,
        };

        let task = tokio::spawn(engine.run());
        info!("Remote control engine spawned");

        RemoteControlHandle {
            intents: intent_tx,
            panel: panel_rx,
            alerts: alert_rx,
            task,
        }
    }

    async fn run(mut self) {
        if let Some(alert) = self.connection.connect() {
            self.ui.alert(alert);
        }
        self.refresh();

        loop {
            let event = tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(UserIntent::Shutdown) | None => break,
                    Some(intent) => EngineEvent::Intent(intent),
                },
                Some(event) = self.transport_events.recv() => EngineEvent::Transport(event),
                Some(event) = self.camera_events.recv() => EngineEvent::Camera(event),
                Some(event) = self.capture_events.recv() => EngineEvent::Capture(event),
            };

            match event {
                EngineEvent::Intent(intent) => self.on_intent(intent),
                EngineEvent::Transport(event) => self.on_transport(event),
                EngineEvent::Camera(event) => {
                    let alert = self.camera.handle(event);
                    self.raise(alert);
                }
                EngineEvent::Capture(event) => self.on_capture(event),
            }
            self.refresh();
        }

        info!("Remote control engine shutting down");
        if self.capture.is_recording() {
            warn!("Shutting down while talking, the recording is discarded");
            if let Err(e) = self.capture.stop() {
                debug!("Stopping capture on shutdown: {}", e);
            }
        }
        self.playback.set_listening(false);
        self.connection.shutdown();
    }

    fn refresh(&mut self) {
        self.panel = ControlPanel::project(
            &self.connection,
            &self.camera,
            &self.capture,
            &self.playback,
            &self.ai,
        );
        self.ui.publish(self.panel.clone());
    }

    fn raise(&self, alert: Option<Alert>) {
        if let Some(alert) = alert {
            self.ui.alert(alert);
        }
    }

    fn on_intent(&mut self, intent: UserIntent) {
        let allowed = match intent {
            UserIntent::ToggleCamera => self.panel.camera_enabled,
            UserIntent::AskAi => self.panel.ask_enabled,
            UserIntent::ToggleListen => self.panel.listen_enabled,
            UserIntent::ToggleTalk => self.panel.controls_unlocked,
            UserIntent::VolumeUp | UserIntent::VolumeDown => self.panel.volume_enabled,
            UserIntent::Reconnect | UserIntent::Shutdown => true,
        };
        if !allowed {
            debug!("{:?} ignored, control is disabled", intent);
            return;
        }

        match intent {
            UserIntent::ToggleCamera => {
                let mode = Switch::from(self.camera.is_off());
                self.connection.send(Command::Camera(mode));
                let alert = self.camera.request(mode);
                self.raise(alert);
            }
            UserIntent::AskAi => {
                let alert = self.ai.ask(&mut self.camera, &mut self.connection);
                self.raise(alert);
            }
            UserIntent::ToggleListen => {
                let listening = !self.playback.is_listening();
                self.connection.send(Command::Microphone(Switch::from(listening)));
                self.playback.set_listening(listening);
            }
            UserIntent::ToggleTalk => self.toggle_talk(),
            UserIntent::VolumeUp => {
                self.connection.send(Command::Volume(VolumeStep::Up));
            }
            UserIntent::VolumeDown => {
                self.connection.send(Command::Volume(VolumeStep::Down));
            }
            UserIntent::Reconnect => {
                let alert = self.connection.reconnect();
                self.raise(alert);
            }
            UserIntent::Shutdown => {}
        }
    }

    fn toggle_talk(&mut self) {
        let result = if self.capture.is_recording() {
            self.capture.stop()
        } else {
            self.capture.start()
        };

        match result {
            Ok(()) => {}
            Err(e @ (CaptureError::Unavailable(_) | CaptureError::Device(_))) => {
                self.ui.alert(Alert::new("Microphone access error", e.to_string()));
            }
            Err(e) => warn!("Talk toggle ignored: {}", e),
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.connection.on_connected(),
            TransportEvent::ConnectFailed(reason) => {
                let alert = self.connection.on_connect_failed(reason);
                self.ui.alert(alert);
            }
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Subscribed { topic, granted } => {
                self.connection.on_subscribed(&topic, granted)
            }
            TransportEvent::ConnectionLost(reason) => self.connection.on_connection_lost(&reason),
        }
    }

    fn on_message(&mut self, message: MessageEvent) {
        self.connection.on_message();

        match protocol::decode(&message.topic, &message.payload) {
            Ok(Inbound::CameraStatus(mode)) => {
                let alert = self.camera.apply_remote(mode);
                self.raise(alert);
            }
            Ok(Inbound::AiResponse(reply)) => self.ai.on_response(reply),
            Ok(Inbound::DeviceAudio(clip)) => self.playback.receive(clip),
            Err(e) => warn!("Dropping message {}: {}", message, e),
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match self.capture.handle(event) {
            CaptureOutcome::Pending => {}
            CaptureOutcome::Clip(clip) => {
                info!("Uploading voice clip of {} bytes", clip.len());
                self.connection.send(Command::AudioClip(clip));
            }
            CaptureOutcome::Aborted(e) => {
                self.ui.alert(Alert::new("Microphone access error", e.to_string()));
            }
        }
    }
}
