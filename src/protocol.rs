//! # Doorbell Protocol
//!
//! Fixed topic table shared with the doorbell firmware, plus the payload codec
//! for every topic. Topic names and payload kinds are a compatibility contract
//! with the device and must never be renamed on one side only.
//!
//! ```text
//! app ──camera-control──────► device      device ──camera-status───► app
//! app ──microphone-control──► device      device ──audio-download──► app
//! app ──audio-upload────────► device      device ──ai-response─────► app
//! app ──ai-request──────────► device
//! app ──volume-control──────► device
//! ```
//!
//! Outbound traffic is expressed as [`Command`] values which encode to a topic
//! and a byte payload. Inbound traffic is decoded into [`Inbound`], one variant
//! per subscribed topic, so the engine dispatches with a single exhaustive
//! `match`.

use std::fmt;

/// Prompt sent with every AI description request
pub const AI_PROMPT: &str = "describe this image";

/// Reserved ai-response payload signalling that the description is still being generated
pub const AI_WAITING_SENTINEL: &str = "waiting for the AI to Answer...";

/// All topics known to the doorbell protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CameraControl,
    CameraStatus,
    MicrophoneControl,
    AudioUpload,
    AudioDownload,
    AiRequest,
    AiResponse,
    VolumeControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// app → device
    Outbound,
    /// device → app
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Binary,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::CameraControl,
        Topic::CameraStatus,
        Topic::MicrophoneControl,
        Topic::AudioUpload,
        Topic::AudioDownload,
        Topic::AiRequest,
        Topic::AiResponse,
        Topic::VolumeControl,
    ];

    /// Topics the client subscribes to after every successful connect
    pub const SUBSCRIPTIONS: [Topic; 3] =
        [Topic::AiResponse, Topic::CameraStatus, Topic::AudioDownload];

    /// Wire name as used by the firmware
    pub fn name(self) -> &'static str {
        match self {
            Topic::CameraControl => "ring/remote_app_control/camera",
            Topic::CameraStatus => "ring/local_dev_control/camera",
            Topic::MicrophoneControl => "ring/remote_app_control/microphone",
            Topic::AudioUpload => "ring/remote_app_audio_data",
            Topic::AudioDownload => "ring/audioresponse",
            Topic::AiRequest => "ring/gptrequest",
            Topic::AiResponse => "ring/gptresponse",
            Topic::VolumeControl => "ring/remote_app_control/volume",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Topic::CameraStatus | Topic::AudioDownload | Topic::AiResponse => Direction::Inbound,
            _ => Direction::Outbound,
        }
    }

    pub fn payload_kind(self) -> PayloadKind {
        match self {
            Topic::AudioUpload | Topic::AudioDownload => PayloadKind::Binary,
            _ => PayloadKind::Text,
        }
    }

    pub fn from_name(name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|topic| topic.name() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Two-valued "on"/"off" payload used by camera and microphone topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn as_str(self) -> &'static str {
        match self {
            Switch::On => "on",
            Switch::Off => "off",
        }
    }

    /// Accepts "on"/"off" regardless of case and surrounding whitespace
    pub fn parse(text: &str) -> Option<Switch> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("on") {
            Some(Switch::On)
        } else if text.eq_ignore_ascii_case("off") {
            Some(Switch::Off)
        } else {
            None
        }
    }
}

impl From<bool> for Switch {
    fn from(on: bool) -> Self {
        if on {
            Switch::On
        } else {
            Switch::Off
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

impl VolumeStep {
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeStep::Up => "up",
            VolumeStep::Down => "down",
        }
    }
}

/// Outbound command, one variant per outbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Camera(Switch),
    Microphone(Switch),
    AudioClip(Vec<u8>),
    DescribeScene,
    Volume(VolumeStep),
}

impl Command {
    pub fn topic(&self) -> Topic {
        match self {
            Command::Camera(_) => Topic::CameraControl,
            Command::Microphone(_) => Topic::MicrophoneControl,
            Command::AudioClip(_) => Topic::AudioUpload,
            Command::DescribeScene => Topic::AiRequest,
            Command::Volume(_) => Topic::VolumeControl,
        }
    }

    /// Encodes the command into its topic and raw payload.
    ///
    /// Text payloads are the UTF-8 bytes of the value without any escaping,
    /// binary payloads are passed through untouched.
    pub fn encode(self) -> (Topic, Vec<u8>) {
        let topic = self.topic();
        let payload = match self {
            Command::Camera(mode) | Command::Microphone(mode) => mode.as_str().as_bytes().to_vec(),
            Command::AudioClip(clip) => clip,
            Command::DescribeScene => AI_PROMPT.as_bytes().to_vec(),
            Command::Volume(step) => step.as_str().as_bytes().to_vec(),
        };
        (topic, payload)
    }
}

/// Reply on the ai-response topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiReply {
    Waiting,
    Description(String),
}

impl AiReply {
    /// Text shown to the operator for this reply
    pub fn text(&self) -> &str {
        match self {
            AiReply::Waiting => AI_WAITING_SENTINEL,
            AiReply::Description(text) => text,
        }
    }
}

/// Decoded inbound message, one variant per subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    CameraStatus(Switch),
    AiResponse(AiReply),
    DeviceAudio(Vec<u8>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Topic {0} is not delivered to the app")]
    NotInbound(Topic),

    #[error("Payload on {0} is not valid UTF-8")]
    InvalidUtf8(Topic),

    #[error("Unexpected camera status payload: {0:?}")]
    InvalidSwitch(String),
}

/// Decodes a delivered message into its typed form.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Inbound, DecodeError> {
    let topic = Topic::from_name(topic).ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;
    if topic.direction() != Direction::Inbound {
        return Err(DecodeError::NotInbound(topic));
    }

    match topic {
        Topic::CameraStatus => {
            let text = as_text(topic, payload)?;
            Switch::parse(text)
                .map(Inbound::CameraStatus)
                .ok_or_else(|| DecodeError::InvalidSwitch(text.to_string()))
        }
        Topic::AiResponse => {
            let text = as_text(topic, payload)?;
            let reply = if text == AI_WAITING_SENTINEL {
                AiReply::Waiting
            } else {
                AiReply::Description(text.to_string())
            };
            Ok(Inbound::AiResponse(reply))
        }
        Topic::AudioDownload => Ok(Inbound::DeviceAudio(payload.to_vec())),
        other => Err(DecodeError::NotInbound(other)),
    }
}

fn as_text(topic: Topic, payload: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8(topic))
}
