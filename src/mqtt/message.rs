use chrono::NaiveDateTime;
use std::fmt;

use crate::protocol::{PayloadKind, Topic};

/// Number of payload bytes rendered in log previews
const PREVIEW_LEN: usize = 24;

/// A message delivered by the broker on one of the subscribed topics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl MessageEvent {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        MessageEvent {
            topic,
            payload,
            received_at: chrono::Local::now().naive_local(),
        }
    }

    /// Short printable form of the payload for logging
    pub fn preview(&self) -> String {
        let binary =
            Topic::from_name(&self.topic).map(Topic::payload_kind) == Some(PayloadKind::Binary);
        match std::str::from_utf8(&self.payload) {
            Ok(text) if !binary => text.chars().take(PREVIEW_LEN).collect(),
            _ => format!("<{} bytes>", self.payload.len()),
        }
    }
}

impl fmt::Display for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.preview()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_text_and_summarises_binary() {
        let text = MessageEvent::from_topic(
            "ring/gptresponse".to_string(),
            "A person is standing at the front door holding a parcel.".into(),
        );
        assert_eq!(text.preview().chars().count(), PREVIEW_LEN);

        let binary = MessageEvent::from_topic("ring/audioresponse".to_string(), vec![0xff; 300]);
        assert_eq!(binary.preview(), "<300 bytes>");
        assert!(binary.to_string().contains("ring/audioresponse"));

        let clip = MessageEvent::from_topic("ring/audioresponse".to_string(), b"RIFF".to_vec());
        assert_eq!(clip.preview(), "<4 bytes>");
    }
}
