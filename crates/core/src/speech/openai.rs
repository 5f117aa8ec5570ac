use super::{SpeechArtifact, SpeechSynthesizer, SpeechTranscriber};
use crate::audio::{self, AudioFormat};
use crate::error::{SynthesisError, TranscriptionError};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        AudioInput, CreateSpeechRequestArgs, CreateTranscriptionRequestArgs, SpeechModel,
        SpeechResponseFormat, Voice,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

/// Speech synthesis and transcription over the OpenAI audio endpoints.
///
/// Synthesis asks for raw PCM (24 kHz, mono, 16-bit) so playback needs no
/// decoding. Transcription uploads the utterance as a WAV file.
pub struct OpenAISpeech {
    client: Client<OpenAIConfig>,
    tts_model: String,
    stt_model: String,
    language: Option<String>,
}

impl OpenAISpeech {
    pub fn new(config: OpenAIConfig, tts_model: String, stt_model: String) -> Self {
        Self {
            client: Client::with_config(config),
            tts_model,
            stt_model,
            language: None,
        }
    }

    /// Hints the transcription language (ISO-639-1, e.g. "en").
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

pub(crate) fn parse_voice(name: &str) -> Result<Voice, SynthesisError> {
    serde_json::from_value(serde_json::Value::String(name.trim().to_lowercase()))
        .map_err(|_| SynthesisError::Request(format!("unknown voice '{name}'")))
}

pub(crate) fn parse_speech_model(name: &str) -> SpeechModel {
    match name {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    }
}

/// Accepts either raw PCM16 at 24 kHz or a WAV payload.
pub(crate) fn artifact_from_response(
    bytes: Bytes,
    text: &str,
) -> Result<SpeechArtifact, SynthesisError> {
    if bytes.is_empty() {
        return Err(SynthesisError::Empty);
    }
    let (audio, format) = if audio::is_wav(&bytes) {
        let (pcm, format) =
            audio::decode_wav(&bytes).map_err(|e| SynthesisError::Decode(e.to_string()))?;
        (Bytes::from(pcm), format)
    } else {
        (bytes, AudioFormat::PCM16_24K_MONO)
    };
    if audio.is_empty() {
        return Err(SynthesisError::Empty);
    }
    Ok(SpeechArtifact {
        audio,
        format,
        text: text.to_string(),
    })
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeech {
    #[instrument(name = "synthesize", skip_all, fields(chars = text.len(), voice = %voice))]
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechArtifact, SynthesisError> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .model(parse_speech_model(&self.tts_model))
            .voice(parse_voice(voice)?)
            .response_format(SpeechResponseFormat::Pcm)
            .build()
            .map_err(|e| SynthesisError::Request(e.to_string()))?;

        let response = self
            .client
            .audio()
            .speech(request)
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;

        let artifact = artifact_from_response(response.bytes, text)?;
        debug!(
            bytes = artifact.audio.len(),
            duration_ms = artifact.duration().as_millis() as u64,
            "Synthesized utterance"
        );
        Ok(artifact)
    }
}

#[async_trait]
impl SpeechTranscriber for OpenAISpeech {
    #[instrument(name = "transcribe", skip_all, fields(bytes = pcm.len()))]
    async fn transcribe(
        &self,
        pcm: Bytes,
        format: AudioFormat,
    ) -> Result<String, TranscriptionError> {
        let wav =
            audio::encode_wav(&pcm, format).map_err(|e| TranscriptionError::Encode(e.to_string()))?;

        let mut args = CreateTranscriptionRequestArgs::default();
        args.file(AudioInput::from_vec_u8("utterance.wav".to_string(), wav))
            .model(self.stt_model.as_str());
        if let Some(language) = &self.language {
            args.language(language.as_str());
        }
        let request = args
            .build()
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        Ok(response.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_voice() {
        assert_eq!(parse_voice("alloy").unwrap(), Voice::Alloy);
        assert_eq!(parse_voice(" Nova ").unwrap(), Voice::Nova);
        assert!(matches!(
            parse_voice("en-US-AriaNeural"),
            Err(SynthesisError::Request(_))
        ));
    }

    #[test]
    fn test_parse_speech_model() {
        assert_eq!(parse_speech_model("tts-1"), SpeechModel::Tts1);
        assert_eq!(parse_speech_model("tts-1-hd"), SpeechModel::Tts1Hd);
        assert_eq!(
            parse_speech_model("gpt-4o-mini-tts"),
            SpeechModel::Other("gpt-4o-mini-tts".into())
        );
    }

    #[test]
    fn test_raw_pcm_response_is_24k_mono() {
        let artifact = artifact_from_response(Bytes::from(vec![0u8; 4800]), "hi").unwrap();
        assert_eq!(artifact.format, AudioFormat::PCM16_24K_MONO);
        assert_eq!(artifact.duration().as_millis(), 100);
        assert_eq!(artifact.text, "hi");
    }

    #[test]
    fn test_wav_response_is_unwrapped() {
        let format = AudioFormat::pcm16(16_000, 1);
        let wav = audio::encode_wav(&[1, 0, 2, 0], format).unwrap();
        let artifact = artifact_from_response(Bytes::from(wav), "hi").unwrap();
        assert_eq!(artifact.format, format);
        assert_eq!(artifact.audio.as_ref(), &[1, 0, 2, 0]);
    }

    #[test]
    fn test_empty_response_is_an_error() {
        assert!(matches!(
            artifact_from_response(Bytes::new(), "hi"),
            Err(SynthesisError::Empty)
        ));
    }
}
