//! Projection of component state onto the operator panel.
//!
//! [`ControlPanel`] is rebuilt from scratch after every processed event and
//! pushed through a `watch` channel. The front-end renders it and never feeds
//! labels back in as state.

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::assistant::{AiQueryCoordinator, AiQueryState};
use crate::audio::capture::AudioCapture;
use crate::audio::playback::AudioPlayback;
use crate::camera::{CameraController, CameraState, StreamDisplay};
use crate::mqtt::connection::{ConnectionManager, ConnectionState, ConnectionStats};

/// Blocking notification shown to the operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub text: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraToggle {
    #[default]
    Start,
    Stop,
}

impl CameraToggle {
    pub fn label(self) -> &'static str {
        match self {
            CameraToggle::Start => "Start Camera",
            CameraToggle::Stop => "Stop Camera",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenToggle {
    #[default]
    Listen,
    StopListening,
}

impl ListenToggle {
    pub fn label(self) -> &'static str {
        match self {
            ListenToggle::Listen => "Listen",
            ListenToggle::StopListening => "Stop Listening",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TalkToggle {
    #[default]
    Talk,
    StopTalking,
}

impl TalkToggle {
    pub fn label(self) -> &'static str {
        match self {
            TalkToggle::Talk => "Talk",
            TalkToggle::StopTalking => "Stop Talking",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlPanel {
    pub connection: ConnectionState,
    pub controls_unlocked: bool,
    pub stats: ConnectionStats,

    pub camera_state: CameraState,
    pub camera: CameraToggle,
    pub camera_enabled: bool,
    pub ask_enabled: bool,

    pub listen: ListenToggle,
    pub listen_enabled: bool,
    pub talk: TalkToggle,
    pub talk_enabled: bool,
    pub capture_unavailable: Option<String>,
    pub volume_enabled: bool,

    /// Request sent, no description received yet
    pub ai_pending: bool,
    pub busy: bool,
    pub response: Option<String>,
    pub display: StreamDisplay,
}

impl ControlPanel {
    pub fn project(
        connection: &ConnectionManager,
        camera: &CameraController,
        capture: &AudioCapture,
        playback: &AudioPlayback,
        ai: &AiQueryCoordinator,
    ) -> Self {
        let unlocked = connection.controls_unlocked();
        let busy = ai.busy();

        let camera_toggle = if camera.is_off() {
            CameraToggle::Start
        } else {
            CameraToggle::Stop
        };
        let listen = if playback.is_listening() {
            ListenToggle::StopListening
        } else {
            ListenToggle::Listen
        };
        let talk = if capture.is_recording() {
            TalkToggle::StopTalking
        } else {
            TalkToggle::Talk
        };
        let display = if busy {
            StreamDisplay::Hidden
        } else {
            camera.display().clone()
        };

        Self {
            connection: connection.state(),
            controls_unlocked: unlocked,
            stats: connection.stats().clone(),
            camera_state: camera.state(),
            camera: camera_toggle,
            camera_enabled: unlocked && !busy,
            ask_enabled: unlocked && !busy,
            listen,
            listen_enabled: unlocked,
            talk,
            talk_enabled: unlocked && capture.is_available(),
            capture_unavailable: capture.unavailable_reason().map(str::to_string),
            volume_enabled: unlocked,
            ai_pending: *ai.state() == AiQueryState::Pending,
            busy,
            response: ai.response_text().map(str::to_string),
            display,
        }
    }
}

/// Engine side of the panel and alert channels
pub struct UiSync {
    panel: watch::Sender<ControlPanel>,
    alerts: mpsc::UnboundedSender<Alert>,
}

impl UiSync {
    pub fn new(
        panel: watch::Sender<ControlPanel>,
        alerts: mpsc::UnboundedSender<Alert>,
    ) -> Self {
        Self { panel, alerts }
    }

    pub fn publish(&self, next: ControlPanel) {
        self.panel.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    pub fn alert(&self, alert: Alert) {
        warn!("Alert: {} - {}", alert.title, alert.text);
        if self.alerts.send(alert).is_err() {
            debug!("No front-end listening for alerts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_projections_of_the_enums() {
        assert_eq!(CameraToggle::Start.label(), "Start Camera");
        assert_eq!(CameraToggle::Stop.label(), "Stop Camera");
        assert_eq!(ListenToggle::StopListening.label(), "Stop Listening");
        assert_eq!(TalkToggle::StopTalking.label(), "Stop Talking");
    }

    #[test]
    fn default_panel_is_locked() {
        let panel = ControlPanel::default();
        assert!(!panel.controls_unlocked);
        assert!(!panel.camera_enabled);
        assert!(!panel.talk_enabled);
        assert_eq!(panel.display, StreamDisplay::Hidden);
    }

    #[tokio::test]
    async fn unchanged_panel_is_not_republished() {
        let (tx, mut rx) = watch::channel(ControlPanel::default());
        let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
        let sync = UiSync::new(tx, alert_tx);

        sync.publish(ControlPanel::default());
        assert!(!rx.has_changed().unwrap());

        sync.publish(ControlPanel {
            busy: true,
            ..ControlPanel::default()
        });
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().busy);

        sync.alert(Alert::new("MQTT Failure", "connection refused"));
        assert_eq!(alert_rx.recv().await.unwrap().title, "MQTT Failure");
    }
}
