//! # Camera Stream Controller
//!
//! Drives the live MJPEG feed through `Off`, `On` and `Retrying(n)`.
//!
//! ```text
//!            start / remote "on"
//!   Off ───────────────────────────► On ──probe ok──► On
//!    ▲                               │
//!    │ stop / remote "off"           │ probe failed, n < max
//!    │                               ▼
//!    └──────────────────────── Retrying(n) ──1s timer──► reload
//!                                    │
//!                                    │ n == max
//!                                    ▼
//!                        On, display blank, "Camera Error"
//! ```
//!
//! Every load is tagged with the current generation. Stopping or re-entering
//! `On` bumps the generation, so probe results and timer expiries from an
//! abandoned load are ignored when they finally arrive.

pub mod mjpeg;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::Switch;
use crate::ui_sync::Alert;
use stream::{stream_url, StreamError, StreamProbe};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraState {
    #[default]
    Off,
    On,
    Retrying(u32),
}

/// What the video area should show
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StreamDisplay {
    #[default]
    Hidden,
    Showing(String),
    Blank,
}

#[derive(Debug)]
pub enum CameraEvent {
    ProbeFinished {
        generation: u64,
        result: Result<(), StreamError>,
    },
    RetryDue {
        generation: u64,
    },
}

/// Pending reload, cancelled when dropped
struct RetryTimer {
    cancel: CancellationToken,
}

impl RetryTimer {
    fn schedule(
        delay: Duration,
        generation: u64,
        events: mpsc::UnboundedSender<CameraEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Retry timer for generation {} cancelled", generation),
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(CameraEvent::RetryDue { generation });
                }
            }
        });

        Self { cancel }
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct CameraController {
    state: CameraState,
    display: StreamDisplay,
    retries: u32,
    generation: u64,
    last_token: i64,
    timer: Option<RetryTimer>,
    config: StreamConfig,
    probe: Arc<dyn StreamProbe>,
    events: mpsc::UnboundedSender<CameraEvent>,
}

impl CameraController {
    pub fn new(
        config: StreamConfig,
        probe: Arc<dyn StreamProbe>,
        events: mpsc::UnboundedSender<CameraEvent>,
    ) -> Self {
        Self {
            state: CameraState::Off,
            display: StreamDisplay::Hidden,
            retries: 0,
            generation: 0,
            last_token: 0,
            timer: None,
            config,
            probe,
            events,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn display(&self) -> &StreamDisplay {
        &self.display
    }

    #[cfg(test)]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_off(&self) -> bool {
        self.state == CameraState::Off
    }

    /// Local user intent
    pub fn request(&mut self, mode: Switch) -> Option<Alert> {
        info!("Camera {} requested locally", mode.as_str());
        self.apply(mode)
    }

    /// Authoritative status reported by the device
    pub fn apply_remote(&mut self, mode: Switch) -> Option<Alert> {
        info!("Device reports camera {}", mode.as_str());
        self.apply(mode)
    }

    pub fn handle(&mut self, event: CameraEvent) -> Option<Alert> {
        match event {
            CameraEvent::ProbeFinished { generation, .. } | CameraEvent::RetryDue { generation }
                if generation != self.generation =>
            {
                debug!(
                    "Ignoring camera event from generation {} (current {})",
                    generation, self.generation
                );
                None
            }
            CameraEvent::ProbeFinished { result, .. } => match result {
                Ok(()) => {
                    self.on_stream_up();
                    None
                }
                Err(e) => self.on_load_failed(e),
            },
            CameraEvent::RetryDue { .. } => {
                if !matches!(self.state, CameraState::Retrying(_)) {
                    debug!("Retry due while {:?}, nothing to do", self.state);
                    return None;
                }
                self.timer = None;
                self.load()
            }
        }
    }

    fn apply(&mut self, mode: Switch) -> Option<Alert> {
        match mode {
            Switch::On => self.enter_on(),
            Switch::Off => {
                self.stop();
                None
            }
        }
    }

    fn enter_on(&mut self) -> Option<Alert> {
        self.timer = None;
        self.generation += 1;
        self.retries = 0;
        self.state = CameraState::On;
        self.load()
    }

    fn stop(&mut self) {
        if self.state != CameraState::Off {
            info!("Camera stopped");
        }
        self.timer = None;
        self.generation += 1;
        self.state = CameraState::Off;
        self.display = StreamDisplay::Hidden;
    }

    fn load(&mut self) -> Option<Alert> {
        // Token is strictly increasing per load
        let token = chrono::Utc::now()
            .timestamp_millis()
            .max(self.last_token + 1);
        self.last_token = token;
        let url = match stream_url(&self.config.base_url, token) {
            Ok(url) => url,
            Err(e) => return self.on_load_failed(e),
        };

        debug!("Loading stream {} (generation {})", url, self.generation);
        self.display = StreamDisplay::Showing(url.clone());

        let generation = self.generation;
        let events = self.events.clone();
        let probe = self.probe.probe(url);
        tokio::spawn(async move {
            let result = probe.await;
            let _ = events.send(CameraEvent::ProbeFinished { generation, result });
        });
        None
    }

    fn on_stream_up(&mut self) {
        match self.state {
            CameraState::Retrying(attempt) => {
                info!("Stream recovered after {} retries", attempt);
                self.state = CameraState::On;
                self.retries = 0;
            }
            CameraState::On => debug!("Stream is delivering frames"),
            CameraState::Off => {}
        }
    }

    fn on_load_failed(&mut self, reason: StreamError) -> Option<Alert> {
        if self.state == CameraState::Off {
            return None;
        }

        self.retries += 1;
        if self.retries < self.config.max_retries {
            warn!(
                "Stream load failed ({}), retry {} of {}",
                reason, self.retries, self.config.max_retries
            );
            self.state = CameraState::Retrying(self.retries);
            self.timer = Some(RetryTimer::schedule(
                Duration::from_millis(self.config.retry_delay_ms),
                self.generation,
                self.events.clone(),
            ));
            return None;
        }

        error!(
            "Stream load failed ({}), giving up after {} attempts",
            reason, self.retries
        );
        self.retries = self.retries.min(self.config.max_retries);
        self.timer = None;
        self.state = CameraState::On;
        self.display = StreamDisplay::Blank;
        Some(Alert::new("Camera Error", "Unable to load video stream."))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::stream::{ProbeFuture, StreamError, StreamProbe};

    /// Outcome handed out for the next probe
    #[derive(Clone, Debug)]
    pub enum Scripted {
        Ok,
        Fail,
        Never,
    }

    /// Probe that replays a script and records every url; `Ok` once the script runs out
    #[derive(Default)]
    pub struct ScriptedProbe {
        script: Mutex<VecDeque<Scripted>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                urls: Mutex::new(Vec::new()),
            }
        }

        pub fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    impl StreamProbe for ScriptedProbe {
        fn probe(&self, url: String) -> ProbeFuture {
            self.urls.lock().unwrap().push(url);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Ok);
            Box::pin(async move {
                match next {
                    Scripted::Ok => Ok(()),
                    Scripted::Fail => Err(StreamError::Status(503)),
                    Scripted::Never => std::future::pending().await,
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Scripted, ScriptedProbe};
    use super::*;

    fn controller(
        script: impl IntoIterator<Item = Scripted>,
    ) -> (
        CameraController,
        Arc<ScriptedProbe>,
        mpsc::UnboundedReceiver<CameraEvent>,
    ) {
        let probe = Arc::new(ScriptedProbe::new(script));
        let (tx, rx) = mpsc::unbounded_channel();
        let camera = CameraController::new(StreamConfig::default(), probe.clone(), tx);
        (camera, probe, rx)
    }

    /// Feeds camera events back until the channel stays quiet for 10s of virtual time
    async fn settle(
        camera: &mut CameraController,
        rx: &mut mpsc::UnboundedReceiver<CameraEvent>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            alerts.extend(camera.handle(event));
        }
        alerts
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_failed_loads() {
        let (mut camera, probe, mut rx) =
            controller([Scripted::Fail, Scripted::Fail, Scripted::Fail]);

        camera.request(Switch::On);
        assert!(matches!(camera.display(), StreamDisplay::Showing(_)));

        let alerts = settle(&mut camera, &mut rx).await;

        assert_eq!(
            alerts,
            vec![Alert::new("Camera Error", "Unable to load video stream.")]
        );
        assert_eq!(camera.state(), CameraState::On);
        assert_eq!(camera.display(), &StreamDisplay::Blank);
        assert_eq!(camera.retries(), 3);
        assert_eq!(probe.urls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_use_fresh_tokens_and_recover() {
        let (mut camera, probe, mut rx) = controller([Scripted::Fail]);

        camera.request(Switch::On);
        let first = rx.recv().await.unwrap();
        camera.handle(first);
        assert_eq!(camera.state(), CameraState::Retrying(1));
        assert_eq!(camera.retries(), 1);

        let alerts = settle(&mut camera, &mut rx).await;
        assert!(alerts.is_empty());
        assert_eq!(camera.state(), CameraState::On);
        assert_eq!(camera.retries(), 0);

        let urls = probe.urls();
        assert_eq!(urls.len(), 2);
        assert_ne!(urls[0], urls[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_off_cancels_pending_retry() {
        let (mut camera, probe, mut rx) = controller([Scripted::Fail]);

        camera.request(Switch::On);
        let first = rx.recv().await.unwrap();
        camera.handle(first);
        assert_eq!(camera.state(), CameraState::Retrying(1));

        camera.apply_remote(Switch::Off);
        assert_eq!(camera.state(), CameraState::Off);
        assert_eq!(camera.display(), &StreamDisplay::Hidden);

        assert!(settle(&mut camera, &mut rx).await.is_empty());
        assert_eq!(camera.state(), CameraState::Off);
        assert_eq!(probe.urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_probe_results_are_ignored() {
        let (mut camera, _probe, mut rx) = controller([Scripted::Fail, Scripted::Never]);

        camera.request(Switch::On);
        camera.apply_remote(Switch::Off);
        camera.apply_remote(Switch::On);

        let stale = rx.recv().await.unwrap();
        assert!(camera.handle(stale).is_none());
        assert_eq!(camera.state(), CameraState::On);
        assert_eq!(camera.retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_on_resets_retry_budget() {
        let (mut camera, _probe, mut rx) = controller([Scripted::Fail, Scripted::Fail]);

        camera.request(Switch::On);
        let event = rx.recv().await.unwrap();
        camera.handle(event);
        assert_eq!(camera.retries(), 1);

        camera.apply_remote(Switch::On);
        assert_eq!(camera.state(), CameraState::On);
        assert_eq!(camera.retries(), 0);

        let mut max_seen = 0;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            camera.handle(event);
            max_seen = max_seen.max(camera.retries());
        }
        assert!(max_seen <= 3);
        assert_eq!(camera.state(), CameraState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn last_remote_write_wins() {
        use Switch::{Off, On};
        // (is_remote, mode)
        let sequences: Vec<Vec<(bool, Switch)>> = vec![
            vec![(false, On), (true, Off)],
            vec![(true, Off), (false, On), (true, On)],
            vec![(false, Off), (true, On), (false, Off), (false, On), (true, Off)],
            vec![(true, On), (true, On), (false, Off), (true, On)],
        ];

        for sequence in sequences {
            let (mut camera, _probe, mut rx) = controller([]);
            for (remote, mode) in &sequence {
                if *remote {
                    camera.apply_remote(*mode);
                } else {
                    camera.request(*mode);
                }
            }
            settle(&mut camera, &mut rx).await;

            let last_remote = sequence
                .iter()
                .rev()
                .find(|(remote, _)| *remote)
                .map(|(_, mode)| *mode)
                .unwrap();
            let expected = match last_remote {
                On => CameraState::On,
                Off => CameraState::Off,
            };
            assert_eq!(camera.state(), expected, "sequence {:?}", sequence);
        }
    }
}
