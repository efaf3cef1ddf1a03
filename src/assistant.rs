use tracing::{debug, info, warn};

use crate::camera::{CameraController, CameraState};
use crate::mqtt::connection::ConnectionManager;
use crate::protocol::{AiReply, Command, Switch};
use crate::ui_sync::Alert;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AiQueryState {
    #[default]
    Idle,
    Pending,
    Answered(String),
}

/// Sequences "camera off + describe scene" and tracks the answer
#[derive(Debug, Default)]
pub struct AiQueryCoordinator {
    state: AiQueryState,
    busy: bool,
    response: Option<String>,
}

impl AiQueryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AiQueryState {
        &self.state
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn response_text(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Requests a scene description; only allowed while the camera is exactly On
    pub fn ask(
        &mut self,
        camera: &mut CameraController,
        connection: &mut ConnectionManager,
    ) -> Option<Alert> {
        if camera.state() != CameraState::On {
            debug!("AI request rejected, camera is {:?}", camera.state());
            return Some(Alert::new(
                "Camera must be running",
                "Start camera before asking GPT.",
            ));
        }

        if !connection.send(Command::DescribeScene) {
            warn!("AI request was not delivered");
        }
        connection.send(Command::Camera(Switch::Off));
        camera.request(Switch::Off);

        info!("Scene description requested");
        self.state = AiQueryState::Pending;
        None
    }

    pub fn on_response(&mut self, reply: AiReply) {
        self.response = Some(reply.text().to_string());
        match reply {
            AiReply::Waiting => {
                debug!("AI is still working");
                self.state = AiQueryState::Pending;
                self.busy = true;
            }
            AiReply::Description(text) => {
                info!("AI answered with {} characters", text.len());
                self.state = AiQueryState::Answered(text);
                self.busy = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::camera::testing::{Scripted, ScriptedProbe};
    use crate::camera::StreamConfig;
    use crate::mqtt::transport::testing::RecordingTransport;
    use crate::protocol::AI_WAITING_SENTINEL;

    struct Fixture {
        camera: CameraController,
        camera_rx: mpsc::UnboundedReceiver<crate::camera::CameraEvent>,
        connection: ConnectionManager,
        transport: RecordingTransport,
    }

    fn fixture(script: Vec<Scripted>) -> Fixture {
        let (camera_tx, camera_rx) = mpsc::unbounded_channel();
        let camera = CameraController::new(
            StreamConfig::default(),
            Arc::new(ScriptedProbe::new(script)),
            camera_tx,
        );
        let transport = RecordingTransport::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connection = ConnectionManager::new(Box::new(transport.clone()), tx);
        connection.connect();
        connection.on_connected();
        Fixture {
            camera,
            camera_rx,
            connection,
            transport,
        }
    }

    #[tokio::test]
    async fn ask_turns_camera_off_and_goes_pending() {
        let mut f = fixture(vec![]);
        let mut ai = AiQueryCoordinator::new();
        f.camera.request(Switch::On);

        assert!(ai.ask(&mut f.camera, &mut f.connection).is_none());
        assert_eq!(
            f.transport.publishes(),
            vec![
                ("ring/gptrequest".to_string(), b"describe this image".to_vec()),
                ("ring/remote_app_control/camera".to_string(), b"off".to_vec()),
            ]
        );
        assert_eq!(f.camera.state(), CameraState::Off);
        assert_eq!(ai.state(), &AiQueryState::Pending);
        assert!(!ai.busy());
    }

    #[tokio::test]
    async fn ask_rejected_while_camera_off() {
        let mut f = fixture(vec![]);
        let mut ai = AiQueryCoordinator::new();

        let alert = ai.ask(&mut f.camera, &mut f.connection).unwrap();
        assert_eq!(alert.title, "Camera must be running");
        assert_eq!(alert.text, "Start camera before asking GPT.");
        assert!(f.transport.publishes().is_empty());
        assert_eq!(ai.state(), &AiQueryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn ask_rejected_while_retrying() {
        let mut f = fixture(vec![Scripted::Fail, Scripted::Never]);
        let mut ai = AiQueryCoordinator::new();
        f.camera.request(Switch::On);
        let event = tokio::time::timeout(Duration::from_secs(1), f.camera_rx.recv())
            .await
            .unwrap()
            .unwrap();
        f.camera.handle(event);
        assert_eq!(f.camera.state(), CameraState::Retrying(1));

        assert!(ai.ask(&mut f.camera, &mut f.connection).is_some());
        assert!(f.transport.publishes().is_empty());
        assert_eq!(f.camera.state(), CameraState::Retrying(1));
    }

    #[test]
    fn sentinel_sets_busy_and_answer_clears_it() {
        let mut ai = AiQueryCoordinator::new();

        ai.on_response(AiReply::Waiting);
        assert!(ai.busy());
        assert_eq!(ai.state(), &AiQueryState::Pending);
        assert_eq!(ai.response_text(), Some(AI_WAITING_SENTINEL));

        ai.on_response(AiReply::Description("A person is at the door.".to_string()));
        assert!(!ai.busy());
        assert_eq!(
            ai.state(),
            &AiQueryState::Answered("A person is at the door.".to_string())
        );
        assert_eq!(ai.response_text(), Some("A person is at the door."));
    }
}
