use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;

use crate::audio::{self, PROMPT_SAMPLE_RATE};

const ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Google's per-request input limit is 5000 bytes.
const MAX_BYTES: usize = 4800;

/// Google Cloud Text-to-Speech client for dynamic prompts.
///
/// Produces 8kHz 16-bit WAV files the engine can play without conversion.
pub struct TtsClient {
    client: reqwest::Client,
    api_key: String,
    language: String,
    timeout: Duration,
}

/// Google TTS response shape.
#[derive(Deserialize)]
struct TtsResponse {
    #[serde(rename = "audioContent")]
    audio_content: String,
}

impl TtsClient {
    pub fn new(client: reqwest::Client, api_key: String, language: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            language,
            timeout,
        }
    }

    /// Synthesize `text` into `<base>.wav` and return `base`, the name the
    /// engine's Playback expects.
    pub async fn synthesize_to_file(&self, text: &str, base: &Path) -> Result<PathBuf, TtsError> {
        let wav = self.synthesize(text).await?;
        let target = base.with_extension("wav");
        tokio::fs::write(&target, wav)
            .await
            .map_err(|e| TtsError::Write(e.to_string()))?;
        tracing::debug!(path = %target.display(), "Prompt synthesized");
        Ok(base.to_path_buf())
    }

    /// Convert text to a single WAV clip, splitting long text across requests.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        if self.api_key.is_empty() {
            return Err(TtsError::NotConfigured);
        }

        let mut clips = Vec::new();
        for chunk in split_text(text, MAX_BYTES) {
            clips.push(self.synthesize_chunk(chunk).await?);
        }

        audio::concat_wavs(&clips, PROMPT_SAMPLE_RATE).map_err(|e| TtsError::Api(format!("Bad audio: {e}")))
    }

    /// Synthesize a single chunk (must be <= MAX_BYTES).
    async fn synthesize_chunk(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let body = serde_json::json!({
            "input": { "text": text },
            "voice": { "languageCode": &self.language },
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": PROMPT_SAMPLE_RATE
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
            .map_err(|e| TtsError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TtsError::Api(format!("{status}: {body}")));
        }

        let tts_resp: TtsResponse = resp
            .json()
            .await
            .map_err(|e| TtsError::Request(e.to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(&tts_resp.audio_content)
            .map_err(|e| TtsError::Api(format!("Bad base64 in audioContent: {e}")))
    }
}

/// Split text at sentence boundaries to stay under the byte limit.
///
/// Splits on `. `, `! `, `? `, `; ` boundaries (`;` is the Greek question
/// mark). If a single sentence exceeds the limit, falls back to the last
/// char boundary within it.
fn split_text(text: &str, max_bytes: usize) -> Vec<&str> {
    if text.len() <= max_bytes {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            chunks.push(remaining);
            break;
        }

        let mut limit = max_bytes;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        // Limit narrower than one character: emit that character whole
        if limit == 0 {
            limit = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }

        // Find the last sentence boundary within the limit
        let search_slice = &remaining[..limit];
        let split_pos = [". ", "! ", "? ", "; "]
            .iter()
            .filter_map(|sep| search_slice.rfind(sep).map(|i| i + sep.len()))
            .max();

        let pos = split_pos.unwrap_or(limit);
        chunks.push(&remaining[..pos]);
        remaining = remaining[pos..].trim_start();
    }

    chunks
}

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("text-to-speech API key not configured")]
    NotConfigured,
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("failed to write prompt: {0}")]
    Write(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_not_split() {
        let chunks = split_text("Καλημέρα.", 2000);
        assert_eq!(chunks, vec!["Καλημέρα."]);
    }

    #[test]
    fn splits_at_sentence_boundary() {
        let text = "First sentence. Second sentence. Third sentence.";
        let chunks = split_text(text, 35);
        assert_eq!(chunks[0], "First sentence. Second sentence. ");
        assert_eq!(chunks[1], "Third sentence.");
    }

    #[test]
    fn falls_back_to_hard_split() {
        let text = "A".repeat(3000);
        let chunks = split_text(&text, 2000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2000);
        assert_eq!(chunks[1].len(), 1000);
    }

    #[test]
    fn hard_split_respects_multibyte_chars() {
        // Greek letters are two bytes each; 7 is not a boundary
        let text = "αβγδεζηθ";
        let chunks = split_text(text, 7);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.len() <= 7));
    }

    #[test]
    fn limit_narrower_than_a_char_still_progresses() {
        let chunks = split_text("αβγ", 1);
        assert_eq!(chunks, vec!["α", "β", "γ"]);
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let client = TtsClient::new(
            reqwest::Client::new(),
            String::new(),
            "el-GR".into(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            client.synthesize("Γεια").await,
            Err(TtsError::NotConfigured)
        ));
    }
}
