//! Configuration for the learner services.
//!
//! Precedence, highest first:
//! 1. Environment variables (`CURRICULUM_*`)
//! 2. A TOML file, when one is given
//! 3. Defaults
//!
//! Every field is optional. An unparseable environment value is logged and
//! ignored; an out-of-range final config is rejected by [`CurriculumConfig::validate`].

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use curriculum_core::segmenter::{DEFAULT_SECTIONS_PER_CHAPTER, Segmenter};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CurriculumConfig {
    /// Reading sections grouped into one chapter.
    pub sections_per_chapter: usize,
    /// Move to the next chapter after completing the current one.
    pub auto_advance: bool,
    pub quiz_resubmit: QuizResubmitPolicy,
    pub poll: PollPolicy,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self {
            sections_per_chapter: DEFAULT_SECTIONS_PER_CHAPTER,
            auto_advance: true,
            quiz_resubmit: QuizResubmitPolicy::default(),
            poll: PollPolicy::default(),
        }
    }
}

/// What happens when a graded quiz is submitted again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizResubmitPolicy {
    /// Regrade and overwrite the stored answers and score.
    #[default]
    Replace,
    /// Refuse locally once a score exists.
    Reject,
}

impl FromStr for QuizResubmitPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::Invalid(format!(
                "quiz_resubmit must be `replace` or `reject`, got `{other}`"
            ))),
        }
    }
}

impl fmt::Display for QuizResubmitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Reject => "reject",
        })
    }
}

/// Backoff used while waiting for generated content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fetches made before giving up.
    pub max_attempts: u32,
    /// Upper bound of the random delay added to each wait.
    pub jitter_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 15_000,
            multiplier: 2.0,
            max_attempts: 30,
            jitter_ms: 250,
        }
    }
}

impl PollPolicy {
    /// Delay after the `attempt`-th failed check (0-based), before jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

impl CurriculumConfig {
    /// Defaults, then `path` if given, then the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if the
    /// merged config is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `CURRICULUM_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(&lookup, "CURRICULUM_SECTIONS_PER_CHAPTER", &mut self.sections_per_chapter);
        override_from(&lookup, "CURRICULUM_QUIZ_RESUBMIT", &mut self.quiz_resubmit);
        override_from(&lookup, "CURRICULUM_POLL_INITIAL_DELAY_MS", &mut self.poll.initial_delay_ms);
        override_from(&lookup, "CURRICULUM_POLL_MAX_DELAY_MS", &mut self.poll.max_delay_ms);
        override_from(&lookup, "CURRICULUM_POLL_MULTIPLIER", &mut self.poll.multiplier);
        override_from(&lookup, "CURRICULUM_POLL_MAX_ATTEMPTS", &mut self.poll.max_attempts);
        override_from(&lookup, "CURRICULUM_POLL_JITTER_MS", &mut self.poll.jitter_ms);

        if let Some(val) = lookup("CURRICULUM_AUTO_ADVANCE") {
            self.auto_advance = val == "true" || val == "1";
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sections_per_chapter == 0 {
            return Err(ConfigError::Invalid("sections_per_chapter must be > 0".into()));
        }
        if self.poll.max_attempts == 0 {
            return Err(ConfigError::Invalid("poll.max_attempts must be > 0".into()));
        }
        if !self.poll.multiplier.is_finite() || self.poll.multiplier < 1.0 {
            return Err(ConfigError::Invalid("poll.multiplier must be >= 1".into()));
        }
        if self.poll.initial_delay_ms > self.poll.max_delay_ms {
            return Err(ConfigError::Invalid(
                "poll.initial_delay_ms must not exceed poll.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Segment` if the grouping is zero.
    pub fn segmenter(&self) -> Result<Segmenter, ConfigError> {
        Ok(Segmenter::new(self.sections_per_chapter)?)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T)
where
    T: FromStr + fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(
            var = name,
            value = %raw,
            keeping = %slot,
            "ignoring invalid environment override"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CurriculumConfig::default();
        assert_eq!(config.sections_per_chapter, 2);
        assert!(config.auto_advance);
        assert_eq!(config.quiz_resubmit, QuizResubmitPolicy::Replace);
        assert_eq!(config.poll.max_attempts, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CurriculumConfig::from_toml_str(
            r#"
quiz_resubmit = "reject"

[poll]
max_attempts = 5
"#,
        )
        .unwrap();
        assert_eq!(config.quiz_resubmit, QuizResubmitPolicy::Reject);
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.initial_delay_ms, 1_000);
        assert_eq!(config.sections_per_chapter, 2);
    }

    #[test]
    fn test_invalid_toml() {
        let err = CurriculumConfig::from_toml_str("sections_per_chapter = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_var_precedence_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("curriculum.toml");
        fs::write(&path, "sections_per_chapter = 3\nauto_advance = true\n").unwrap();

        let mut config = CurriculumConfig::load_from_file(&path).unwrap();
        config.apply_env_overrides(env(&[
            ("CURRICULUM_SECTIONS_PER_CHAPTER", "4"),
            ("CURRICULUM_AUTO_ADVANCE", "false"),
        ]));

        assert_eq!(config.sections_per_chapter, 4);
        assert!(!config.auto_advance);
    }

    #[test]
    fn test_env_var_invalid_values_ignored() {
        let mut config = CurriculumConfig::default();
        config.apply_env_overrides(env(&[
            ("CURRICULUM_POLL_MAX_ATTEMPTS", "many"),
            ("CURRICULUM_QUIZ_RESUBMIT", "sometimes"),
            ("CURRICULUM_POLL_JITTER_MS", "10"),
        ]));
        assert_eq!(config.poll.max_attempts, 30);
        assert_eq!(config.quiz_resubmit, QuizResubmitPolicy::Replace);
        assert_eq!(config.poll.jitter_ms, 10);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = CurriculumConfig::load(Some(dir.path().join("absent.toml").as_path()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CurriculumConfig {
            sections_per_chapter: 0,
            ..CurriculumConfig::default()
        };
        assert!(config.validate().is_err());

        config.sections_per_chapter = 2;
        config.poll.multiplier = 0.5;
        assert!(config.validate().is_err());

        config.poll.multiplier = 2.0;
        config.poll.initial_delay_ms = 20_000;
        assert!(config.validate().is_err());

        config.poll.initial_delay_ms = 1_000;
        config.poll.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = PollPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(8_000));
        assert_eq!(policy.backoff(4), Duration::from_millis(15_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(15_000));
    }
}
