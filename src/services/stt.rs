use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;

use crate::audio;

const ENDPOINT: &str = "https://speech.googleapis.com/v1/speech:recognize";

/// Google Cloud Speech-to-Text client for caller recordings.
///
/// Recordings are 16-bit linear PCM WAV files as the engine writes them.
pub struct SttClient {
    client: reqwest::Client,
    api_key: String,
    language: String,
    profanity_filter: bool,
    timeout: Duration,
    min_recording_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

impl SttClient {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        language: String,
        profanity_filter: bool,
        timeout: Duration,
        min_recording_ms: u64,
    ) -> Self {
        Self {
            client,
            api_key,
            language,
            profanity_filter,
            timeout,
            min_recording_ms,
        }
    }

    /// Transcribe a recording. An empty string means the service heard nothing.
    pub async fn transcribe(&self, recording: &Path) -> Result<String, SttError> {
        if self.api_key.is_empty() {
            return Err(SttError::NotConfigured);
        }

        let info = audio::inspect_wav(recording).map_err(|e| SttError::Audio(e.to_string()))?;
        if info.duration_ms < self.min_recording_ms {
            return Err(SttError::TooShort(info.duration_ms));
        }

        let wav = tokio::fs::read(recording)
            .await
            .map_err(|e| SttError::Audio(e.to_string()))?;

        let body = serde_json::json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": info.sample_rate,
                "languageCode": &self.language,
                "profanityFilter": self.profanity_filter
            },
            "audio": {
                "content": base64::engine::general_purpose::STANDARD.encode(&wav)
            }
        });

        let resp = self
            .client
            .post(ENDPOINT)
            .query(&[("key", &self.api_key)])
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Api(format!("{status}: {body}")));
        }

        let parsed: RecognizeResponse = resp
            .json()
            .await
            .map_err(|e| SttError::Parse(e.to_string()))?;

        Ok(join_transcripts(&parsed))
    }
}

/// First alternative of every result, space-joined.
fn join_transcripts(resp: &RecognizeResponse) -> String {
    resp.results
        .iter()
        .filter_map(|r| r.alternatives.first())
        .map(|a| a.transcript.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("speech-to-text API key not configured")]
    NotConfigured,
    #[error("recording unusable: {0}")]
    Audio(String),
    #[error("recording too short ({0} ms)")]
    TooShort(u64),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}
