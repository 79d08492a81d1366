//! HTTP collaborators for an OpenAI-compatible inference server.
//!
//! The server does the heavy lifting (generation, model residency, voice
//! synthesis); these clients adapt its API onto the troupe-core
//! collaborator traits.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use troupe_core::{
    AudioClip, ChatBackend, ChatRequest, Error, ModelHost, ProgressCallback, Result, SwapProgress,
    SynthesisOptions, Synthesizer, VoiceStyle,
};

fn base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base(base_url),
        }
    }

    fn request_body(request: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = json!({
            "messages": messages,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "max_tokens": request.max_tokens,
            "stop": request.stop,
            "stream": stream,
        });
        if let Some(penalty) = request.presence_penalty {
            body["presence_penalty"] = json!(penalty);
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::UnboundedReceiver<Result<String>>> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&Self::request_body(&request, true))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("chat request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Backend(format!(
                "chat request returned HTTP {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut carry = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(Error::Backend(format!("stream read failed: {err}"))));
                        return;
                    }
                };
                carry.push_str(&String::from_utf8_lossy(&chunk));

                // SSE: newline-delimited `data: {json}` lines, terminated by
                // a `[DONE]` sentinel.
                while let Some(newline) = carry.find('\n') {
                    let line = carry[..newline].trim().to_string();
                    carry.replace_range(..newline + 1, "");
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            let delta = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(delta) = delta {
                                if !delta.is_empty() && tx.send(Ok(delta)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => debug!("Skipping unparseable stream chunk: {err}"),
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn complete(&self, request: ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&Self::request_body(&request, false))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("chat request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Backend(format!(
                "chat request returned HTTP {}",
                response.status()
            )));
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("malformed completion response: {e}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Backend("completion response had no choices".to_string()))
    }
}

pub struct HttpModelHost {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModelHost {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base(base_url),
        }
    }

    async fn post_ok(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModelLoad(format!("{path} request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::ModelLoad(format!("{path} returned HTTP {status}: {detail}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ModelHost for HttpModelHost {
    async fn load(&self, model_id: &str, on_progress: ProgressCallback) -> Result<()> {
        on_progress(SwapProgress {
            text: format!("Requesting load of {model_id}"),
            progress: 0.0,
        });
        self.post_ok("/v1/models/load", json!({ "model": model_id }))
            .await?;
        on_progress(SwapProgress {
            text: format!("{model_id} ready"),
            progress: 1.0,
        });
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        self.post_ok("/v1/models/unload", json!({})).await
    }

    async fn clear_cache(&self) -> Result<()> {
        self.post_ok("/v1/models/cache/clear", json!({})).await
    }
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSynthesizer {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base(base_url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StyleJson {
    style_ttl: StyleTensor,
    style_dp: StyleTensor,
}

#[derive(Debug, Deserialize)]
struct StyleTensor {
    data: Vec<f32>,
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn load_voice(&self, voice_id: &str) -> Result<VoiceStyle> {
        let response = self
            .client
            .get(format!("{}/v1/voices/{voice_id}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::VoiceLoad(format!("voice request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::VoiceLoad(format!(
                "voice '{voice_id}' returned HTTP {}",
                response.status()
            )));
        }

        let style: StyleJson = response
            .json()
            .await
            .map_err(|e| Error::VoiceLoad(format!("malformed style payload: {e}")))?;
        Ok(VoiceStyle {
            voice_id: voice_id.to_string(),
            style_ttl: style.style_ttl.data,
            style_dp: style.style_dp.data,
        })
    }

    async fn synthesize(
        &self,
        text: &str,
        style: &VoiceStyle,
        options: &SynthesisOptions,
    ) -> Result<AudioClip> {
        let mut body = json!({ "input": text, "voice": style.voice_id });
        if let Some(steps) = options.steps {
            body["steps"] = json!(steps);
        }
        if let Some(speed) = options.speed {
            body["speed"] = json!(speed);
        }
        if let Some(seed) = options.seed {
            body["seed"] = json!(seed);
        }

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("speech request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Synthesis(format!(
                "speech request returned HTTP {}",
                response.status()
            )));
        }

        let wav = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to read speech response: {e}")))?;
        decode_wav(&wav)
    }
}

/// Decode WAV bytes to mono f32 samples.
fn decode_wav(wav_bytes: &[u8]) -> Result<AudioClip> {
    let cursor = std::io::Cursor::new(wav_bytes);
    let mut reader = hound::WavReader::new(cursor)
        .map_err(|e| Error::Synthesis(format!("failed to parse WAV: {e}")))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels.max(1) as usize;

    let mut samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample.max(1) as u32;
            let max_val = if bits > 1 {
                ((1i64 << (bits - 1)) - 1) as f32
            } else {
                1.0
            };
            reader
                .samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| (s as f32 / max_val).clamp(-1.0, 1.0))
                .collect()
        }
        hound::SampleFormat::Float => reader.samples::<f32>().filter_map(|s| s.ok()).collect(),
    };

    if channels > 1 {
        let mut mono = Vec::with_capacity(samples.len() / channels + 1);
        for frame in samples.chunks(channels) {
            if frame.is_empty() {
                continue;
            }
            let sum: f32 = frame.iter().copied().sum();
            mono.push(sum / frame.len() as f32);
        }
        samples = mono;
    }

    if samples.is_empty() {
        return Err(Error::Synthesis("decoded WAV contains no samples".to_string()));
    }

    Ok(AudioClip {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut bytes);
            let mut writer = hound::WavWriter::new(cursor, spec).expect("writer");
            for &sample in samples {
                writer.write_sample(sample).expect("write");
            }
            writer.finalize().expect("finalize");
        }
        bytes
    }

    #[test]
    fn decode_wav_downmixes_stereo_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[16_384, -16_384, 8_192, 8_192]);

        let clip = decode_wav(&bytes).expect("decode");
        assert_eq!(clip.sample_rate, 24_000);
        assert_eq!(clip.samples.len(), 2);
        assert!(clip.samples[0].abs() < 0.01);
        assert!((clip.samples[1] - 0.25).abs() < 0.01);
    }

    #[test]
    fn decode_wav_rejects_garbage() {
        assert!(decode_wav(&[0u8; 16]).is_err());
    }

    #[test]
    fn stream_chunk_parses_openai_delta_shape() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).expect("parse");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));

        let done: StreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{}}]}"#).expect("parse");
        assert!(done.choices[0].delta.content.is_none());
    }
}
