//! Bidirectional streaming session against the generative speech API.
//!
//! One connection is opened per generation request; sessions are never
//! reused or pooled. The client sends a single setup frame, waits for the
//! server's acknowledgment, sends exactly one user turn, and then drains
//! server frames into a lazy sequence of PCM fragments until the turn
//! completes or the peer closes the stream.

use async_stream::stream;
use base64::{engine::general_purpose, Engine as _};
use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::SpeechError;
use crate::Voice;

pub const MODEL: &str = "models/gemini-2.0-flash-exp";
pub const HOST: &str = "generativelanguage.googleapis.com";

/// Soft wall-clock budget for one streaming session. Checked once at
/// connection-open time only; a single slow session can run past it.
pub const MAX_SESSION_DURATION: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// System instruction negotiated at setup time. The verbatim-readback rules
/// live here rather than in the user turn so the turn carries only the text
/// to narrate.
const DEFAULT_SYSTEM_MESSAGE: &str = "TEXT-TO-SPEECH MODE ONLY
PURE VOICE SYNTHESIS
NO AI FUNCTIONS

RULES:
1. READ TEXT ONLY
2. NO EXTRA WORDS
3. NO ANALYSIS
4. NO HELP
5. NO COMMENTS

EXAMPLE:
INPUT: \"Hello\"
OUTPUT: \"Hello\"";

/// Consecutive undecodable server messages tolerated before the session is
/// declared broken. A single garbled frame is skipped; a run of them means
/// the stream is not speaking the protocol we expect.
const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 20;

/// One chunk of 16-bit little-endian PCM samples, order-significant.
pub type AudioFragment = Vec<u8>;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Frames carrying model output, in the shape the server sends them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InlineData {
    pub data: String,
}

/// An open streaming session with the setup handshake already completed.
pub struct LiveSession {
    ws: WsStream,
}

impl LiveSession {
    /// Production endpoint for the bidirectional generation service.
    pub fn endpoint(api_key: &str) -> String {
        format!(
            "wss://{HOST}/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent?key={api_key}"
        )
    }

    /// Open a connection and negotiate model, voice and system instruction.
    ///
    /// `url` is normally [`LiveSession::endpoint`]; tests and proxies may
    /// point it elsewhere.
    pub async fn connect(url: &str, voice: Voice, tone: Option<&str>) -> Result<Self, SpeechError> {
        let (mut ws, _response) = connect_async(url).await?;

        let mut instruction = DEFAULT_SYSTEM_MESSAGE.to_string();
        if let Some(tone) = tone {
            instruction.push_str("\n\n");
            instruction.push_str(tone);
        }

        let setup = serde_json::json!({
            "setup": {
                "model": MODEL,
                "generation_config": {
                    "response_modalities": ["AUDIO"],
                    "speech_config": {
                        "voice_config": {
                            "prebuilt_voice_config": { "voice_name": voice.as_str() }
                        }
                    }
                },
                "system_instruction": { "parts": [{ "text": instruction }] }
            }
        });
        ws.send(Message::Text(setup.to_string().into())).await?;

        // The server acknowledges the setup before accepting content. The
        // acknowledgment payload itself carries nothing we need.
        match ws.next().await {
            Some(Ok(frame)) => debug!(len = frame.len(), "setup acknowledged"),
            Some(Err(e)) => return Err(SpeechError::Transport(e)),
            None => {
                return Err(SpeechError::Stream(
                    "connection closed before setup acknowledgment".into(),
                ))
            }
        }

        Ok(Self { ws })
    }

    /// Send the single user turn containing the full input text.
    pub async fn send_turn(&mut self, text: &str) -> Result<(), SpeechError> {
        let msg = serde_json::json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": true
            }
        });
        self.ws.send(Message::Text(msg.to_string().into())).await?;
        Ok(())
    }

    /// Consume the session into a lazy, finite, non-restartable sequence of
    /// audio fragments.
    ///
    /// Fragments are yielded strictly in arrival order. Individual messages
    /// that fail to decode are skipped (up to a bounded run of failures);
    /// transport errors end the sequence with an error item. A peer close is
    /// normal termination: whatever was collected so far stands.
    pub fn fragments(self) -> impl Stream<Item = Result<AudioFragment, SpeechError>> {
        let mut ws = self.ws;
        stream! {
            let mut decode_failures = 0u32;
            while let Some(frame) = ws.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        yield Err(SpeechError::Transport(e));
                        return;
                    }
                };

                let parsed = match &frame {
                    Message::Text(text) => serde_json::from_str::<ServerMessage>(text.as_str()),
                    Message::Binary(bytes) => serde_json::from_slice::<ServerMessage>(bytes),
                    Message::Close(_) => break,
                    // Control frames; the transport handles these itself.
                    _ => continue,
                };

                let message = match parsed {
                    Ok(m) => {
                        decode_failures = 0;
                        m
                    }
                    Err(e) => {
                        decode_failures += 1;
                        warn!(error = %e, "skipping undecodable server message");
                        if decode_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                            yield Err(SpeechError::Stream(format!(
                                "{decode_failures} consecutive undecodable server messages"
                            )));
                            return;
                        }
                        continue;
                    }
                };

                let Some(content) = message.server_content else {
                    debug!("server message without content, skipping");
                    continue;
                };

                if let Some(turn) = content.model_turn {
                    for part in turn.parts {
                        let Some(inline) = part.inline_data else { continue };
                        match general_purpose::STANDARD.decode(inline.data.as_bytes()) {
                            Ok(pcm) => yield Ok(pcm),
                            Err(e) => {
                                decode_failures += 1;
                                warn!(error = %e, "skipping audio part with invalid base64");
                                if decode_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                                    yield Err(SpeechError::Stream(format!(
                                        "{decode_failures} consecutive undecodable server messages"
                                    )));
                                    return;
                                }
                            }
                        }
                    }
                }

                if content.turn_complete {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_frame() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm", "data": "AAABAA==" } },
                        { "text": "ignored" }
                    ]
                }
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert!(!content.turn_complete);
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts.len(), 2);
        let data = parts[0].inline_data.as_ref().unwrap();
        let pcm = general_purpose::STANDARD.decode(&data.data).unwrap();
        assert_eq!(pcm, vec![0, 0, 1, 0]);
        assert!(parts[1].inline_data.is_none());
    }

    #[test]
    fn parses_turn_complete_frame() {
        let raw = r#"{ "serverContent": { "turnComplete": true } }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.turn_complete);
        assert!(content.model_turn.is_none());
    }

    #[test]
    fn tolerates_unrelated_frames() {
        let raw = r#"{ "setupComplete": {} }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.server_content.is_none());
    }
}
