//! # Configuration Management
//!
//! Loads the service configuration from multiple sources:
//! - Built-in defaults (the fixed Professor Spark chat configuration)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT`, `GEMINI_API_KEY` / `API_KEY`
//! 2. Environment variables (APP_SERVER__PORT, APP_LIVE__VOICE, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The API key is only ever read from here; it is never logged and never
//! returned by the config endpoint.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Gemini Live bidirectional streaming endpoint.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for the voice chat.
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_PERSONA_NAME: &str = "Professor Spark";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Professor Spark, a fun and enthusiastic science teacher for kids. Keep your answers short, exciting, and full of science wonder. Use a warm tone.";

/// Capture sources the service knows how to open.
pub const CAPTURE_SOURCES: &[&str] = &["wav", "silence"];

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one collaborator of the voice session (HTTP surface,
/// remote endpoint, audio formats, capture device, playback device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

/// Local control service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote voice endpoint settings, sent once at connect time.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the bidirectional streaming API
/// - `api_key`: client-held key, appended as `?key=` when connecting
/// - `model`: target model identifier
/// - `voice`: prebuilt synthesized voice ("Charon", "Puck", "Kore", ...)
/// - `persona_name`: shown in the status line while talking
/// - `system_instruction`: free-text persona instruction
/// - `connect_timeout_ms`: upper bound for establishing the channel
/// - `close_timeout_ms`: how long teardown waits for a clean close frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub persona_name: String,
    pub system_instruction: String,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

/// Wire audio formats.
///
/// ## Fields:
/// - `input_sample_rate`: microphone rate sent upstream (16kHz)
/// - `output_sample_rate`: rate of synthesized audio coming back (24kHz)
/// - `chunk_size`: samples per outbound frame (4096 = 256ms at 16kHz)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub chunk_size: usize,
}

/// Capture device selection.
///
/// - `source = "wav"` streams `wav_path` as if it were spoken into the
///   microphone, then keeps sending silence.
/// - `source = "silence"` sends silence only (connectivity checks).
/// - `realtime = false` drops the real-time pacing (tests, benchmarks); the
///   source then ends after the recording, without trailing silence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub source: String,
    pub wav_path: String,
    pub realtime: bool,
}

/// Playback device settings. An empty `record_path` plays into the void.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub record_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(), // Only the app on this device talks to us
                port: 8080,
            },
            live: LiveConfig {
                endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
                api_key: String::new(),
                model: DEFAULT_LIVE_MODEL.to_string(),
                voice: "Charon".to_string(),
                persona_name: DEFAULT_PERSONA_NAME.to_string(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
                connect_timeout_ms: 10_000,
                close_timeout_ms: 2_000,
            },
            audio: AudioConfig {
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                chunk_size: 4096,
            },
            capture: CaptureConfig {
                source: "silence".to_string(),
                wav_path: String::new(),
                realtime: true,
            },
            playback: PlaybackConfig {
                record_path: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_LIVE__VOICE=Puck`: Use a different voice
    /// - `APP_CAPTURE__SOURCE=wav` + `APP_CAPTURE__WAV_PATH=question.wav`
    /// - `GEMINI_API_KEY=...` or `API_KEY=...`: API key
    /// - `HOST` / `PORT`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Some(key) = env::var("GEMINI_API_KEY")
            .ok()
            .or_else(|| env::var("API_KEY").ok())
        {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// A missing API key is deliberately not a validation failure: the control
    /// service still starts and `start()` reports a connection error instead.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.live.endpoint.starts_with("wss://") || self.live.endpoint.starts_with("ws://")) {
            return Err(anyhow::anyhow!(
                "Live endpoint must be a ws:// or wss:// URL, got '{}'",
                self.live.endpoint
            ));
        }

        if self.live.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Live model cannot be empty"));
        }

        if self.live.voice.trim().is_empty() {
            return Err(anyhow::anyhow!("Voice name cannot be empty"));
        }

        if self.live.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be greater than 0"));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.chunk_size == 0 {
            return Err(anyhow::anyhow!("Audio chunk size must be greater than 0"));
        }

        if !CAPTURE_SOURCES.contains(&self.capture.source.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown capture source '{}', expected one of {:?}",
                self.capture.source,
                CAPTURE_SOURCES
            ));
        }

        if self.capture.source == "wav" && self.capture.wav_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Capture source 'wav' needs capture.wav_path"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Only the provided fields change. Changes apply to the next chat; a
    /// running session keeps the configuration it connected with. The API key
    /// cannot be changed through this path.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            if let Some(model) = live.get("model").and_then(|v| v.as_str()) {
                self.live.model = model.to_string();
            }
            if let Some(voice) = live.get("voice").and_then(|v| v.as_str()) {
                self.live.voice = voice.to_string();
            }
            if let Some(name) = live.get("persona_name").and_then(|v| v.as_str()) {
                self.live.persona_name = name.to_string();
            }
            if let Some(instruction) = live.get("system_instruction").and_then(|v| v.as_str()) {
                self.live.system_instruction = instruction.to_string();
            }
            if let Some(timeout) = live.get("connect_timeout_ms").and_then(|v| v.as_u64()) {
                self.live.connect_timeout_ms = timeout;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(chunk) = audio.get("chunk_size").and_then(|v| v.as_u64()) {
                self.audio.chunk_size = chunk as usize;
            }
        }

        if let Some(capture) = partial_config.get("capture") {
            if let Some(source) = capture.get("source").and_then(|v| v.as_str()) {
                self.capture.source = source.to_string();
            }
            if let Some(path) = capture.get("wav_path").and_then(|v| v.as_str()) {
                self.capture.wav_path = path.to_string();
            }
            if let Some(realtime) = capture.get("realtime").and_then(|v| v.as_bool()) {
                self.capture.realtime = realtime;
            }
        }

        if let Some(playback) = partial_config.get("playback") {
            if let Some(path) = playback.get("record_path").and_then(|v| v.as_str()) {
                self.playback.record_path = path.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }

    /// JSON view of the configuration with the API key redacted.
    pub fn redacted_json(&self) -> serde_json::Value {
        serde_json::json!({
            "server": {
                "host": self.server.host,
                "port": self.server.port
            },
            "live": {
                "endpoint": self.live.endpoint,
                "api_key_configured": !self.live.api_key.is_empty(),
                "model": self.live.model,
                "voice": self.live.voice,
                "persona_name": self.live.persona_name,
                "system_instruction": self.live.system_instruction,
                "connect_timeout_ms": self.live.connect_timeout_ms,
                "close_timeout_ms": self.live.close_timeout_ms
            },
            "audio": {
                "input_sample_rate": self.audio.input_sample_rate,
                "output_sample_rate": self.audio.output_sample_rate,
                "chunk_size": self.audio.chunk_size
            },
            "capture": {
                "source": self.capture.source,
                "wav_path": self.capture.wav_path,
                "realtime": self.capture.realtime
            },
            "playback": {
                "record_path": self.playback.record_path
            }
        })
    }
}

impl LiveConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
