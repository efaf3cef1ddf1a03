use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Processing requested from the capture backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Output of a running recorder
#[derive(Debug)]
pub enum CaptureEvent {
    Fragment(Vec<u8>),
    /// Recorder has flushed its last fragment after `stop`
    Finished,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Audio capture unavailable: {0}")]
    Unavailable(String),

    #[error("Microphone could not be opened: {0}")]
    Device(String),

    #[error("No recording in progress")]
    NotRecording,

    #[error("A recording is already in progress")]
    AlreadyRecording,
}

/// Recording backend. Fragments and completion arrive on the event channel.
pub trait Recorder: Send {
    fn has_microphone(&self) -> bool;

    fn start(
        &mut self,
        constraints: CaptureConstraints,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<(), CaptureError>;

    /// Requests a flush; the backend answers with `CaptureEvent::Finished`
    fn stop(&mut self);
}

/// Ordered fragments of one recording
#[derive(Debug, Default)]
pub struct CaptureSession {
    fragments: Vec<Vec<u8>>,
}

impl CaptureSession {
    pub fn push(&mut self, fragment: Vec<u8>) {
        if fragment.is_empty() {
            return;
        }
        self.fragments.push(fragment);
    }

    pub fn len_bytes(&self) -> usize {
        self.fragments.iter().map(Vec::len).sum()
    }

    /// Consumes the session into a single clip, fragments in arrival order
    pub fn into_clip(self) -> Vec<u8> {
        self.fragments.concat()
    }
}

/// Result of feeding one capture event to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Pending,
    Clip(Vec<u8>),
    Aborted(CaptureError),
}

pub struct AudioCapture {
    unavailable: Option<String>,
    recorder: Box<dyn Recorder>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    session: Option<CaptureSession>,
    stopping: bool,
}

impl AudioCapture {
    /// Checks availability once: secure broker transport and a microphone
    pub fn probe(
        secure: bool,
        recorder: Box<dyn Recorder>,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        let unavailable = if !secure {
            Some("voice is only sent over a secure broker connection".to_string())
        } else if !recorder.has_microphone() {
            Some("no microphone found".to_string())
        } else {
            None
        };

        match &unavailable {
            Some(reason) => warn!("Audio capture disabled: {}", reason),
            None => info!("Audio capture available"),
        }

        Self {
            unavailable,
            recorder,
            events,
            session: None,
            stopping: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    /// True between a successful `start` and the matching `stop`
    pub fn is_recording(&self) -> bool {
        self.session.is_some() && !self.stopping
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if let Some(reason) = &self.unavailable {
            return Err(CaptureError::Unavailable(reason.clone()));
        }
        if self.session.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let constraints = CaptureConstraints::default();
        if let Err(e) = self.recorder.start(constraints, self.events.clone()) {
            error!("Microphone start failed: {}", e);
            self.unavailable = Some(e.to_string());
            return Err(e);
        }

        info!("Recording started with {:?}", constraints);
        self.session = Some(CaptureSession::default());
        self.stopping = false;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.is_recording() {
            return Err(CaptureError::NotRecording);
        }
        debug!("Stopping recording, waiting for flush");
        self.stopping = true;
        self.recorder.stop();
        Ok(())
    }

    pub fn handle(&mut self, event: CaptureEvent) -> CaptureOutcome {
        match event {
            CaptureEvent::Fragment(fragment) => {
                match self.session.as_mut() {
                    Some(session) => session.push(fragment),
                    None => debug!("Fragment of {} bytes without session", fragment.len()),
                }
                CaptureOutcome::Pending
            }
            CaptureEvent::Finished => {
                self.stopping = false;
                match self.session.take() {
                    Some(session) => {
                        info!("Recording finished with {} bytes", session.len_bytes());
                        CaptureOutcome::Clip(session.into_clip())
                    }
                    None => CaptureOutcome::Pending,
                }
            }
            CaptureEvent::Failed(reason) => {
                error!("Recorder failed: {}", reason);
                self.session = None;
                self.stopping = false;
                self.unavailable = Some(reason.clone());
                CaptureOutcome::Aborted(CaptureError::Device(reason))
            }
        }
    }
}

/// RIFF header for 16-bit PCM with open-ended chunk sizes.
///
/// Prefixed to a live recording so the concatenated clip is a playable WAV.
#[cfg_attr(not(feature = "native-audio"), allow(dead_code))]
pub fn wav_stream_header(sample_rate: u32, channels: u16) -> Vec<u8> {
    const BITS_PER_SAMPLE: u16 = 16;
    const OPEN_ENDED: u32 = u32::MAX;

    let block_align = channels * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&OPEN_ENDED.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&OPEN_ENDED.to_le_bytes());
    header
}

/// Recorder for builds without an audio backend
#[cfg(not(feature = "native-audio"))]
pub struct NullRecorder;

#[cfg(not(feature = "native-audio"))]
impl Recorder for NullRecorder {
    fn has_microphone(&self) -> bool {
        false
    }

    fn start(
        &mut self,
        _constraints: CaptureConstraints,
        _events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<(), CaptureError> {
        Err(CaptureError::Unavailable(
            "built without native audio support".to_string(),
        ))
    }

    fn stop(&mut self) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Emits its fragments on start and `Finished` on stop
    pub struct ScriptedRecorder {
        pub microphone: bool,
        pub refuse: Option<String>,
        pub fragments: Vec<Vec<u8>>,
        events: Option<mpsc::UnboundedSender<CaptureEvent>>,
    }

    impl ScriptedRecorder {
        pub fn with_fragments(fragments: Vec<Vec<u8>>) -> Self {
            Self {
                microphone: true,
                refuse: None,
                fragments,
                events: None,
            }
        }

        pub fn denied(reason: &str) -> Self {
            Self {
                refuse: Some(reason.to_string()),
                ..Self::with_fragments(Vec::new())
            }
        }
    }

    impl Recorder for ScriptedRecorder {
        fn has_microphone(&self) -> bool {
            self.microphone
        }

        fn start(
            &mut self,
            _constraints: CaptureConstraints,
            events: mpsc::UnboundedSender<CaptureEvent>,
        ) -> Result<(), CaptureError> {
            if let Some(reason) = &self.refuse {
                return Err(CaptureError::Device(reason.clone()));
            }
            for fragment in &self.fragments {
                let _ = events.send(CaptureEvent::Fragment(fragment.clone()));
            }
            self.events = Some(events);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(events) = self.events.take() {
                let _ = events.send(CaptureEvent::Finished);
            }
        }
    }
}
