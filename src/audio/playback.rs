use tracing::{debug, info, warn};

/// Opaque reference to a clip loaded into the sink
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(u64);

impl PlaybackHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Could not decode audio clip: {0}")]
    Decode(String),

    #[error("Audio output unavailable: {0}")]
    Output(String),

    #[error("Unknown playback handle {0:?}")]
    UnknownHandle(PlaybackHandle),
}

/// Speaker backend holding loaded clips until released
pub trait AudioSink: Send {
    fn load(&mut self, clip: Vec<u8>) -> Result<PlaybackHandle, PlaybackError>;

    fn play(&mut self, handle: PlaybackHandle) -> Result<(), PlaybackError>;

    /// Stops the clip if playing and frees it
    fn release(&mut self, handle: PlaybackHandle);
}

/// Receive-and-play pipeline with at most one live handle
pub struct AudioPlayback {
    sink: Box<dyn AudioSink>,
    current: Option<PlaybackHandle>,
    listening: bool,
    play_when_not_listening: bool,
}

impl AudioPlayback {
    pub fn new(sink: Box<dyn AudioSink>, play_when_not_listening: bool) -> Self {
        Self {
            sink,
            current: None,
            listening: false,
            play_when_not_listening,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<PlaybackHandle> {
        self.current
    }

    pub fn set_listening(&mut self, listening: bool) {
        self.listening = listening;
        if !listening {
            if let Some(handle) = self.current.take() {
                debug!("Listening stopped, releasing {:?}", handle);
                self.sink.release(handle);
            }
        }
    }

    /// Plays an inbound clip, replacing whatever was loaded before.
    ///
    /// The new handle exists before the previous one is released.
    pub fn receive(&mut self, clip: Vec<u8>) {
        if !self.listening && !self.play_when_not_listening {
            debug!("Not listening, clip of {} bytes not played", clip.len());
            return;
        }

        let size = clip.len();
        let handle = match self.sink.load(clip) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Dropping inbound clip of {} bytes: {}", size, e);
                return;
            }
        };

        if let Some(previous) = self.current.replace(handle) {
            self.sink.release(previous);
        }

        match self.sink.play(handle) {
            Ok(()) => info!("Playing device audio ({} bytes)", size),
            Err(e) => warn!("Playback of {:?} failed: {}", handle, e),
        }
    }
}

/// Sink for builds without an audio backend
#[cfg(not(feature = "native-audio"))]
pub struct NullSink;

#[cfg(not(feature = "native-audio"))]
impl AudioSink for NullSink {
    fn load(&mut self, _clip: Vec<u8>) -> Result<PlaybackHandle, PlaybackError> {
        Err(PlaybackError::Output(
            "built without native audio support".to_string(),
        ))
    }

    fn play(&mut self, handle: PlaybackHandle) -> Result<(), PlaybackError> {
        Err(PlaybackError::UnknownHandle(handle))
    }

    fn release(&mut self, _handle: PlaybackHandle) {}
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingSink, SinkOp};
    use super::*;

    #[test]
    fn new_handle_created_before_old_one_is_released() {
        let sink = RecordingSink::default();
        let mut playback = AudioPlayback::new(Box::new(sink.clone()), false);
        playback.set_listening(true);

        playback.receive(vec![1; 10]);
        playback.receive(vec![2; 10]);
        playback.receive(vec![3; 10]);

        assert_eq!(
            sink.ops(),
            vec![
                SinkOp::Load(1),
                SinkOp::Play(1),
                SinkOp::Load(2),
                SinkOp::Release(1),
                SinkOp::Play(2),
                SinkOp::Load(3),
                SinkOp::Release(2),
                SinkOp::Play(3),
            ]
        );
        assert_eq!(sink.live(), 1);
        assert_eq!(playback.current(), Some(PlaybackHandle::new(3)));
    }

    #[test]
    fn stop_listening_releases_immediately() {
        let sink = RecordingSink::default();
        let mut playback = AudioPlayback::new(Box::new(sink.clone()), false);
        playback.set_listening(true);
        playback.receive(vec![0; 4]);

        playback.set_listening(false);
        assert_eq!(sink.live(), 0);
        assert_eq!(playback.current(), None);

        playback.receive(vec![0; 4]);
        assert_eq!(sink.live(), 0);
        assert_eq!(sink.ops().last(), Some(&SinkOp::Release(1)));
    }

    #[test]
    fn play_when_not_listening_flag_bypasses_gate() {
        let sink = RecordingSink::default();
        let mut playback = AudioPlayback::new(Box::new(sink.clone()), true);

        playback.receive(vec![0; 4]);
        assert_eq!(sink.ops(), vec![SinkOp::Load(1), SinkOp::Play(1)]);
    }

    #[test]
    fn decode_failure_keeps_previous_state() {
        let sink = RecordingSink::rejecting();
        let mut playback = AudioPlayback::new(Box::new(sink.clone()), false);
        playback.set_listening(true);

        playback.receive(b"garbage".to_vec());
        assert_eq!(playback.current(), None);
        assert!(sink.ops().is_empty());
    }
}
