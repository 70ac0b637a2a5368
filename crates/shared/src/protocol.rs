use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{CueId, TranscriptionId},
    error::{ProtocolError, ValidationError},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionStats {
    #[serde(default)]
    pub total_detections: u64,
    #[serde(default)]
    pub successful_matches: u64,
    #[serde(default, with = "wire_time::option")]
    pub start_time: Option<DateTime<Utc>>,
}

impl DetectionStats {
    /// Restores `successful_matches <= total_detections`. Returns true when a clamp happened.
    pub fn clamp_matches(&mut self) -> bool {
        if self.successful_matches > self.total_detections {
            self.successful_matches = self.total_detections;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub is_recording: bool,
    #[serde(default)]
    pub is_system_running: bool,
    #[serde(default = "no_cue_index")]
    pub current_cue_index: i64,
    #[serde(default)]
    pub last_played_cue_id: Option<CueId>,
    #[serde(default)]
    pub stats: DetectionStats,
    #[serde(rename = "uptime", default, deserialize_with = "de_seconds")]
    pub uptime_seconds: u64,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            is_recording: false,
            is_system_running: false,
            current_cue_index: no_cue_index(),
            last_played_cue_id: None,
            stats: DetectionStats::default(),
            uptime_seconds: 0,
        }
    }
}

fn no_cue_index() -> i64 {
    -1
}

/// Partial status update. Absent fields leave the current value alone.
///
/// `last_played_cue_id` distinguishes "absent" from an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusPatch {
    #[serde(default)]
    pub is_recording: Option<bool>,
    #[serde(default)]
    pub is_system_running: Option<bool>,
    #[serde(default)]
    pub current_cue_index: Option<i64>,
    #[serde(default, deserialize_with = "de_present")]
    pub last_played_cue_id: Option<Option<CueId>>,
    #[serde(default)]
    pub stats: Option<DetectionStats>,
    #[serde(rename = "uptime", default, deserialize_with = "de_opt_seconds")]
    pub uptime_seconds: Option<u64>,
}

impl From<SystemStatus> for StatusPatch {
    fn from(status: SystemStatus) -> Self {
        Self {
            is_recording: Some(status.is_recording),
            is_system_running: Some(status.is_system_running),
            current_cue_index: Some(status.current_cue_index),
            last_played_cue_id: Some(status.last_played_cue_id),
            stats: Some(status.stats),
            uptime_seconds: Some(status.uptime_seconds),
        }
    }
}

impl StatusPatch {
    pub fn apply_to(self, status: &mut SystemStatus) {
        if let Some(v) = self.is_recording {
            status.is_recording = v;
        }
        if let Some(v) = self.is_system_running {
            status.is_system_running = v;
        }
        if let Some(v) = self.current_cue_index {
            status.current_cue_index = v;
        }
        if let Some(v) = self.last_played_cue_id {
            status.last_played_cue_id = v;
        }
        if let Some(v) = self.stats {
            status.stats = v;
        }
        if let Some(v) = self.uptime_seconds {
            status.uptime_seconds = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub id: CueId,
    #[serde(rename = "hi_text")]
    pub text: String,
    #[serde(rename = "first_tokens")]
    pub trigger_tokens: Vec<String>,
    #[serde(rename = "en_audio")]
    pub audio_path: String,
}

/// Validated cue contents for create and update requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueDraft {
    id: Option<CueId>,
    text: String,
    trigger_tokens: Vec<String>,
    audio_path: String,
}

impl CueDraft {
    pub fn new<I, S>(
        text: impl Into<String>,
        trigger_tokens: I,
        audio_path: impl Into<String>,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let trigger_tokens: Vec<String> = trigger_tokens
            .into_iter()
            .map(|token| token.as_ref().trim().to_lowercase())
            .filter(|token| !token.is_empty())
            .collect();
        if trigger_tokens.is_empty() {
            return Err(ValidationError::NoTriggerTokens);
        }
        let audio_path = audio_path.into().trim().to_string();
        if audio_path.is_empty() {
            return Err(ValidationError::EmptyAudioPath);
        }
        Ok(Self {
            id: None,
            text,
            trigger_tokens,
            audio_path,
        })
    }

    /// Pins a client-chosen id, as the server expects on create.
    pub fn with_id(mut self, id: CueId) -> Result<Self, ValidationError> {
        if id.0 <= 0 {
            return Err(ValidationError::NonPositiveId(id.0));
        }
        self.id = Some(id);
        Ok(self)
    }

    pub fn id(&self) -> Option<CueId> {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn trigger_tokens(&self) -> &[String] {
        &self.trigger_tokens
    }

    pub fn audio_path(&self) -> &str {
        &self.audio_path
    }
}

/// Body of `POST /api/cues`: the id is omitted when the client leaves it to the server.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCueRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CueId>,
    pub hi_text: &'a str,
    pub first_tokens: &'a [String],
    pub en_audio: &'a str,
}

impl<'a> From<&'a CueDraft> for CreateCueRequest<'a> {
    fn from(draft: &'a CueDraft) -> Self {
        Self {
            id: draft.id,
            hi_text: &draft.text,
            first_tokens: &draft.trigger_tokens,
            en_audio: &draft.audio_path,
        }
    }
}

/// Body of `PUT /api/cues/<id>`: the full cue, id taken from the path.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCueRequest<'a> {
    pub id: CueId,
    pub hi_text: &'a str,
    pub first_tokens: &'a [String],
    pub en_audio: &'a str,
}

impl<'a> UpdateCueRequest<'a> {
    pub fn new(id: CueId, draft: &'a CueDraft) -> Self {
        Self {
            id,
            hi_text: &draft.text,
            first_tokens: &draft.trigger_tokens,
            en_audio: &draft.audio_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub id: TranscriptionId,
    #[serde(default)]
    pub text: String,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub matched_cue: Option<Cue>,
    #[serde(rename = "played_audio", default)]
    pub played_audio_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuesEnvelope {
    pub cues: Vec<Cue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CueEnvelope {
    pub cue: Cue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionsEnvelope {
    pub transcriptions: Vec<Transcription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    Next,
    Previous,
    Repeat,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 5] = [
        ControlCommand::Start,
        ControlCommand::Stop,
        ControlCommand::Next,
        ControlCommand::Previous,
        ControlCommand::Repeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Next => "next",
            ControlCommand::Previous => "previous",
            ControlCommand::Repeat => "repeat",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownControlAction(s.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatusPayload {
    #[serde(default)]
    pub status: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemErrorPayload {
    pub error: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CueMatchedPayload {
    pub cue: Cue,
    #[serde(default)]
    pub transcription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioPlayingPayload {
    pub file: String,
}

/// A recognized push event with a shape-checked payload.
#[derive(Debug, Clone)]
pub enum PushEvent {
    SystemStatus(SystemStatusPayload),
    SystemError(SystemErrorPayload),
    CuesUpdated(CuesEnvelope),
    TranscriptionDetected(Transcription),
    CueMatched(CueMatchedPayload),
    AudioPlaying(AudioPlayingPayload),
    AudioFinished,
}

impl PushEvent {
    pub const NAMES: [&'static str; 7] = [
        "system_status",
        "system_error",
        "cues_updated",
        "transcription_detected",
        "cue_matched",
        "audio_playing",
        "audio_finished",
    ];

    /// Decodes a named push payload. `Ok(None)` means the name is not one we handle.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>, ProtocolError> {
        fn parse<T: serde::de::DeserializeOwned>(
            name: &str,
            payload: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(payload).map_err(|source| ProtocolError::MalformedPayload {
                event: name.to_string(),
                source,
            })
        }

        let event = match name {
            "system_status" => Self::SystemStatus(parse(name, payload)?),
            "system_error" => Self::SystemError(parse(name, payload)?),
            "cues_updated" => Self::CuesUpdated(parse(name, payload)?),
            "transcription_detected" => Self::TranscriptionDetected(parse(name, payload)?),
            "cue_matched" => Self::CueMatched(parse(name, payload)?),
            "audio_playing" => Self::AudioPlaying(parse(name, payload)?),
            "audio_finished" => Self::AudioFinished,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn de_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.map(floor_seconds).unwrap_or_default())
}

fn de_opt_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(floor_seconds))
}

fn floor_seconds(raw: f64) -> u64 {
    if raw.is_finite() && raw > 0.0 {
        raw.floor() as u64
    } else {
        0
    }
}

fn de_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Lenient timestamp codec: RFC 3339, naive ISO-8601 (taken as UTC), or epoch seconds.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Epoch(f64),
    }

    pub fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn from_raw(raw: Raw) -> Option<DateTime<Utc>> {
        match raw {
            Raw::Text(text) => parse_str(&text),
            Raw::Epoch(secs) if secs.is_finite() => {
                let millis = (secs * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis).single()
            }
            Raw::Epoch(_) => None,
        }
    }

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Raw::deserialize(deserializer)?;
        from_raw(raw).ok_or_else(|| D::Error::custom("unrecognized timestamp"))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match ts {
                Some(ts) => super::serialize(ts, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) => from_raw(raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom("unrecognized timestamp")),
            }
        }
    }
}
