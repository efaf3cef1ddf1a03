//! Voice capture towards the doorbell speaker and playback of doorbell audio.
//!
//! The two pipelines are independent. Native backends live in [`native`] and
//! are only compiled with the `native-audio` feature.

pub mod capture;
#[cfg(feature = "native-audio")]
pub mod native;
pub mod playback;

use serde::{Deserialize, Serialize};

use capture::Recorder;
use playback::{AudioSink, PlaybackError};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Play inbound clips even while the listen toggle is off
    pub play_when_not_listening: bool,
    pub record_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            play_when_not_listening: false,
            record_sample_rate: 44_100,
        }
    }
}

#[cfg(feature = "native-audio")]
pub fn default_recorder(config: &AudioConfig) -> Box<dyn Recorder> {
    Box::new(native::CpalRecorder::new(config.record_sample_rate))
}

#[cfg(not(feature = "native-audio"))]
pub fn default_recorder(_config: &AudioConfig) -> Box<dyn Recorder> {
    Box::new(capture::NullRecorder)
}

#[cfg(feature = "native-audio")]
pub fn default_sink() -> Result<Box<dyn AudioSink>, PlaybackError> {
    Ok(Box::new(native::RodioSink::spawn()?))
}

#[cfg(not(feature = "native-audio"))]
pub fn default_sink() -> Result<Box<dyn AudioSink>, PlaybackError> {
    Ok(Box::new(playback::NullSink))
}
