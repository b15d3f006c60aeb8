//! Resolved, validated run configuration.
//!
//! Existence of a `Settings` value is the proof of its validity: the raw
//! deserializable shape stays private and is only ever turned into a
//! `Settings` through `TryFrom`, which rejects empty identifiers, an
//! unknown default mode, and out-of-range temperatures at the boundary.

use std::collections::HashMap;

use serde::Deserialize;

/// A named sampling preset. Currently only temperature is bound at
/// inference-call time; the type stays a struct (not a bare `f64`) so a
/// later parameter such as `top_p` is additive without breaking callers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Mode {
    pub temperature: f64,
}

impl Mode {
    #[must_use]
    pub fn new(temperature: f64) -> Self {
        Self { temperature }
    }
}

/// Name -> sampling preset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModeTable(HashMap<String, Mode>);

impl ModeTable {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Mode> {
        self.0.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Mode)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        let mut modes = HashMap::new();
        modes.insert("precise".to_string(), Mode::new(0.2));
        modes.insert("exploratory".to_string(), Mode::new(0.9));
        modes.insert("adversarial".to_string(), Mode::new(0.7));
        modes.insert("balanced".to_string(), Mode::new(0.6));
        Self(modes)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("model must not be empty")]
    EmptyModel,
    #[error("default_mode {0:?} is not present in modes")]
    UnknownDefaultMode(String),
    #[error("mode {0:?} has temperature {1} outside [0.0, 1.0]")]
    TemperatureOutOfRange(String, f64),
}

#[derive(Deserialize)]
struct RawSettings {
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_max_backtracks")]
    max_backtracks: u32,
    #[serde(default = "default_min_tokens_between_signals")]
    min_tokens_between_signals: usize,
    #[serde(default = "default_mode_name")]
    default_mode: String,
    #[serde(default = "default_max_hint_length")]
    max_hint_length: usize,
    #[serde(default)]
    modes: Option<ModeTable>,
}

fn default_model() -> String {
    "inkstream-default".to_string()
}

fn default_max_backtracks() -> u32 {
    8
}

fn default_min_tokens_between_signals() -> usize {
    20
}

fn default_mode_name() -> String {
    "balanced".to_string()
}

fn default_max_hint_length() -> usize {
    200
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_backtracks: default_max_backtracks(),
            min_tokens_between_signals: default_min_tokens_between_signals(),
            default_mode: default_mode_name(),
            max_hint_length: default_max_hint_length(),
            modes: None,
        }
    }
}

/// Validated runtime configuration for a stream orchestrator.
///
/// Invariants: `model` is non-empty, `default_mode` names an entry in
/// `modes`, and every mode's temperature lies in `[0.0, 1.0]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct Settings {
    model: String,
    max_backtracks: u32,
    min_tokens_between_signals: usize,
    default_mode: String,
    max_hint_length: usize,
    modes: ModeTable,
}

impl TryFrom<RawSettings> for Settings {
    type Error = SettingsError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        if raw.model.trim().is_empty() {
            return Err(SettingsError::EmptyModel);
        }
        let modes = raw.modes.unwrap_or_default();
        if !modes.contains(&raw.default_mode) {
            return Err(SettingsError::UnknownDefaultMode(raw.default_mode));
        }
        for (name, mode) in modes.iter() {
            if !(0.0..=1.0).contains(&mode.temperature) {
                return Err(SettingsError::TemperatureOutOfRange(
                    name.to_string(),
                    mode.temperature,
                ));
            }
        }
        Ok(Self {
            model: raw.model,
            max_backtracks: raw.max_backtracks,
            min_tokens_between_signals: raw.min_tokens_between_signals,
            default_mode: raw.default_mode,
            max_hint_length: raw.max_hint_length,
            modes,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::try_from(RawSettings::default()).expect("built-in defaults are valid")
    }
}

impl Settings {
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn max_backtracks(&self) -> u32 {
        self.max_backtracks
    }

    #[must_use]
    pub fn min_tokens_between_signals(&self) -> usize {
        self.min_tokens_between_signals
    }

    #[must_use]
    pub fn default_mode(&self) -> &str {
        &self.default_mode
    }

    #[must_use]
    pub fn max_hint_length(&self) -> usize {
        self.max_hint_length
    }

    #[must_use]
    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.default_mode(), "balanced");
        assert_eq!(settings.modes().get("balanced").unwrap().temperature, 0.6);
    }

    #[test]
    fn rejects_empty_model() {
        let json = serde_json::json!({ "model": "" });
        assert!(serde_json::from_value::<Settings>(json).is_err());
    }

    #[test]
    fn rejects_unknown_default_mode() {
        let json = serde_json::json!({ "default_mode": "nonexistent" });
        assert!(serde_json::from_value::<Settings>(json).is_err());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let json = serde_json::json!({
            "modes": { "balanced": { "temperature": 1.5 } },
            "default_mode": "balanced",
        });
        assert!(serde_json::from_value::<Settings>(json).is_err());
    }

    #[test]
    fn accepts_custom_mode_table() {
        let json = serde_json::json!({
            "modes": { "only": { "temperature": 0.4 } },
            "default_mode": "only",
        });
        let settings: Settings = serde_json::from_value(json).unwrap();
        assert_eq!(settings.modes().get("only").unwrap().temperature, 0.4);
    }
}
