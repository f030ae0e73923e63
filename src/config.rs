//! Loading configuration (scheduler tuning, session sizes, content/data paths) from TOML.
//!
//! See `PumpkinConfig`, `SchedulerConfig` and `SessionConfig` for the expected schema.
//! Every field has a default, so an empty file (or no file) is a valid configuration.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PumpkinConfig {
  /// Directory scanned for `*.pumpkin.txt` files. `None` means the built-in sample only.
  pub content_dir: Option<PathBuf>,
  /// Directory used by `FileStore` for progress blobs.
  pub data_dir: PathBuf,
  pub scheduler: SchedulerConfig,
  pub session: SessionConfig,
}

impl Default for PumpkinConfig {
  fn default() -> Self {
    Self {
      content_dir: None,
      data_dir: PathBuf::from("data"),
      scheduler: SchedulerConfig::default(),
      session: SessionConfig::default(),
    }
  }
}

/// Product tuning surface of the scheduler. Only the direction of each knob is a
/// contract: wrong streaks compress intervals, good-question signals stretch them
/// within `good_question_cap`, and the mastery base interval dominates.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  pub exposed_hours: f64,
  pub fragile_hours: f64,
  pub stable_hours: f64,
  pub interview_ready_hours: f64,
  /// Interval fraction removed per consecutive wrong answer.
  pub wrong_streak_penalty: f64,
  /// Floor for any computed interval.
  pub min_interval_minutes: f64,
  /// Interval fraction added per counted good-question signal.
  pub good_question_boost: f64,
  /// Signals beyond this count do not lengthen intervals further.
  pub good_question_cap: u32,
  // at-risk score weights
  pub overdue_weight_per_day: f64,
  pub wrong_streak_weight: f64,
  pub good_question_weight: f64,
  /// Variant groups remembered when picking the next question.
  pub recent_history_len: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      exposed_hours: 24.0,
      fragile_hours: 48.0,
      stable_hours: 120.0,
      interview_ready_hours: 288.0,
      wrong_streak_penalty: 0.2,
      min_interval_minutes: 30.0,
      good_question_boost: 0.05,
      good_question_cap: 3,
      overdue_weight_per_day: 1.0,
      wrong_streak_weight: 0.5,
      good_question_weight: 0.2,
      recent_history_len: 4,
    }
  }
}

impl SchedulerConfig {
  /// Replace non-finite or negative values with defaults so hand-edited files
  /// cannot break the interval math.
  pub fn sanitized(mut self) -> Self {
    let d = SchedulerConfig::default();
    let fields: [(&str, &mut f64, f64); 10] = [
      ("exposed_hours", &mut self.exposed_hours, d.exposed_hours),
      ("fragile_hours", &mut self.fragile_hours, d.fragile_hours),
      ("stable_hours", &mut self.stable_hours, d.stable_hours),
      ("interview_ready_hours", &mut self.interview_ready_hours, d.interview_ready_hours),
      ("wrong_streak_penalty", &mut self.wrong_streak_penalty, d.wrong_streak_penalty),
      ("min_interval_minutes", &mut self.min_interval_minutes, d.min_interval_minutes),
      ("good_question_boost", &mut self.good_question_boost, d.good_question_boost),
      ("overdue_weight_per_day", &mut self.overdue_weight_per_day, d.overdue_weight_per_day),
      ("wrong_streak_weight", &mut self.wrong_streak_weight, d.wrong_streak_weight),
      ("good_question_weight", &mut self.good_question_weight, d.good_question_weight),
    ];
    for (name, value, fallback) in fields {
      if !value.is_finite() || *value < 0.0 {
        warn!(target: "pumpkin", field = name, value = *value, fallback, "Invalid scheduler setting; using default");
        *value = fallback;
      }
    }
    self
  }
}

/// Queue sizes per practice mode.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  /// Due concepts pulled into a daily session.
  pub daily_concepts: usize,
  pub questions_per_concept: usize,
  pub review_limit: usize,
  pub learn_limit: usize,
  pub boss_size: usize,
  pub boss_time_limit_secs: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      daily_concepts: 5,
      questions_per_concept: 2,
      review_limit: 10,
      learn_limit: 6,
      boss_size: 12,
      boss_time_limit_secs: 600,
    }
  }
}

impl PumpkinConfig {
  pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
    let mut cfg: PumpkinConfig = toml::from_str(s)?;
    cfg.scheduler = cfg.scheduler.sanitized();
    Ok(cfg)
  }
}

/// Attempt to load `PumpkinConfig` from PUMPKIN_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<PumpkinConfig> {
  let path = std::env::var("PUMPKIN_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match PumpkinConfig::from_toml(&s) {
      Ok(cfg) => {
        info!(target: "pumpkin", %path, "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "pumpkin", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "pumpkin", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
