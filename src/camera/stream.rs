use std::future::Future;
use std::pin::Pin;

use reqwest::Url;
use tracing::debug;

/// Path of the MJPEG endpoint served by the doorbell
pub const STREAM_PATH: &str = "stream.mjpg";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Stream request failed: {0}")]
    Request(String),

    #[error("Stream responded with status {0}")]
    Status(u16),

    #[error("Stream closed before the first frame")]
    Empty,

    #[error("Invalid stream url: {0}")]
    Url(String),

    #[error("Undecodable frame: {0}")]
    Decode(String),
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send>>;

/// Checks whether the video endpoint is actually delivering frames.
pub trait StreamProbe: Send + Sync {
    fn probe(&self, url: String) -> ProbeFuture;
}

/// Builds `{base}/stream.mjpg?ts={token}`
pub fn stream_url(base: &str, token: i64) -> Result<String, StreamError> {
    let raw = format!("{}/{}", base.trim_end_matches('/'), STREAM_PATH);
    let mut url = Url::parse(&raw).map_err(|e| StreamError::Url(format!("{}: {}", raw, e)))?;
    url.query_pairs_mut().append_pair("ts", &token.to_string());
    Ok(url.to_string())
}

/// Probe over HTTP: success status plus a first body chunk
pub struct HttpStreamProbe {
    client: reqwest::Client,
}

impl HttpStreamProbe {
    pub fn new() -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StreamError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl StreamProbe for HttpStreamProbe {
    fn probe(&self, url: String) -> ProbeFuture {
        let client = self.client.clone();
        Box::pin(async move {
            debug!("Probing stream {}", url);
            let mut response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| StreamError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(StreamError::Status(status.as_u16()));
            }

            match response
                .chunk()
                .await
                .map_err(|e| StreamError::Request(e.to_string()))?
            {
                Some(chunk) => {
                    debug!("Stream delivered {} bytes", chunk.len());
                    Ok(())
                }
                None => Err(StreamError::Empty),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_cache_busting_token() {
        assert_eq!(
            stream_url("http://127.0.0.1:8000", 1_700_000_000_123).unwrap(),
            "http://127.0.0.1:8000/stream.mjpg?ts=1700000000123"
        );
        assert_eq!(
            stream_url("http://doorbell.local/cam/", 7).unwrap(),
            "http://doorbell.local/cam/stream.mjpg?ts=7"
        );
    }

    #[test]
    fn rejects_unparsable_base() {
        assert!(matches!(stream_url("not a url", 1), Err(StreamError::Url(_))));
    }

    #[tokio::test]
    async fn unreachable_stream_is_a_request_error() {
        let probe = HttpStreamProbe::new().unwrap();
        let result = probe
            .probe("http://127.0.0.1:1/stream.mjpg?ts=1".to_string())
            .await;
        assert!(matches!(result, Err(StreamError::Request(_))));
    }
}
