use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WAITING_FOR_ANALYSIS: &str = "waiting for analysis";
pub const NEUTRAL: &str = "neutral";

/// Inbound analysis result. Both fields are optional and unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub emotion_result: Option<String>,
    #[serde(default)]
    pub emotion_scores: Option<BTreeMap<String, f64>>,
}

impl ResultMessage {
    /// Decode a UTF-8 JSON object.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        if !value.is_object() {
            return Err(Error::MalformedMessage(format!(
                "expected a JSON object, got {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn dominant_emotion(&self) -> Option<&str> {
        self.emotion_scores.as_ref().and_then(dominant_emotion)
    }
}

/// Label with the strictly highest score.
///
/// Ties resolve to the lexicographically smallest label; NaN scores never win.
pub fn dominant_emotion(scores: &BTreeMap<String, f64>) -> Option<&str> {
    let mut best: Option<(&str, f64)> = None;
    for (label, &score) in scores {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((label, score)),
        }
    }
    best.map(|(label, _)| label)
}

/// Latest analysis state as seen by the consuming application.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionSnapshot {
    pub emotion_result: String,
    pub emotion_scores: BTreeMap<String, f64>,
    pub dominant_emotion: String,
}

impl Default for EmotionSnapshot {
    fn default() -> Self {
        Self {
            emotion_result: WAITING_FOR_ANALYSIS.to_string(),
            emotion_scores: BTreeMap::new(),
            dominant_emotion: NEUTRAL.to_string(),
        }
    }
}

impl EmotionSnapshot {
    /// Fold a message into the snapshot. Returns whether anything changed.
    pub fn apply(&mut self, message: &ResultMessage) -> bool {
        let before = self.clone();
        if let Some(result) = &message.emotion_result {
            self.emotion_result.clone_from(result);
        }
        if let Some(scores) = &message.emotion_scores {
            self.emotion_scores.clone_from(scores);
            if let Some(dominant) = dominant_emotion(scores) {
                self.dominant_emotion = dominant.to_string();
            }
        }
        *self != before
    }
}
