use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("session duration must be > 0")]
    InvalidDuration,

    #[error("timer tick must be > 0 and no longer than the session")]
    InvalidTickInterval,

    #[error("sampling interval must be > 0")]
    InvalidSampleInterval,

    #[error("look-away threshold must be > 0")]
    InvalidLookAway,

    #[error("brightness threshold must be within 0..=255, got {provided}")]
    InvalidBrightnessThreshold { provided: f64 },

    #[error("variance threshold must be >= 0, got {provided}")]
    InvalidVarianceThreshold { provided: f64 },

    #[error("max warnings must be > 0")]
    InvalidMaxWarnings,
}

/// Tunables for one assessment run.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentSettings {
    duration_ms: u64,
    tick_interval_ms: u64,
    sample_interval_ms: u64,
    look_away_ms: u64,
    brightness_threshold: f64,
    variance_threshold: f64,
    max_warnings: u32,
    auto_submit_on_max_warnings: bool,
    unscored_sections: BTreeSet<u8>,
    expected_per_section: BTreeMap<u8, usize>,
}

/// Unvalidated settings; `None` fields take the default.
#[derive(Debug, Clone, Default)]
pub struct AssessmentSettingsDraft {
    pub duration_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub sample_interval_ms: Option<u64>,
    pub look_away_ms: Option<u64>,
    pub brightness_threshold: Option<f64>,
    pub variance_threshold: Option<f64>,
    pub max_warnings: Option<u32>,
    pub auto_submit_on_max_warnings: Option<bool>,
    pub unscored_sections: Option<BTreeSet<u8>>,
    pub expected_per_section: Option<BTreeMap<u8, usize>>,
}

impl AssessmentSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the draft, filling unset fields from the defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` for the first out-of-range value.
    pub fn validate(self) -> Result<AssessmentSettings, SettingsError> {
        let defaults = AssessmentSettings::default();
        let settings = AssessmentSettings {
            duration_ms: self.duration_ms.unwrap_or(defaults.duration_ms),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(defaults.tick_interval_ms),
            sample_interval_ms: self.sample_interval_ms.unwrap_or(defaults.sample_interval_ms),
            look_away_ms: self.look_away_ms.unwrap_or(defaults.look_away_ms),
            brightness_threshold: self
                .brightness_threshold
                .unwrap_or(defaults.brightness_threshold),
            variance_threshold: self.variance_threshold.unwrap_or(defaults.variance_threshold),
            max_warnings: self.max_warnings.unwrap_or(defaults.max_warnings),
            auto_submit_on_max_warnings: self
                .auto_submit_on_max_warnings
                .unwrap_or(defaults.auto_submit_on_max_warnings),
            unscored_sections: self.unscored_sections.unwrap_or(defaults.unscored_sections),
            expected_per_section: self
                .expected_per_section
                .unwrap_or(defaults.expected_per_section),
        };

        if settings.duration_ms == 0 {
            return Err(SettingsError::InvalidDuration);
        }
        if settings.tick_interval_ms == 0 || settings.tick_interval_ms > settings.duration_ms {
            return Err(SettingsError::InvalidTickInterval);
        }
        if settings.sample_interval_ms == 0 {
            return Err(SettingsError::InvalidSampleInterval);
        }
        if settings.look_away_ms == 0 {
            return Err(SettingsError::InvalidLookAway);
        }
        if !(0.0..=255.0).contains(&settings.brightness_threshold) {
            return Err(SettingsError::InvalidBrightnessThreshold {
                provided: settings.brightness_threshold,
            });
        }
        if !(settings.variance_threshold >= 0.0 && settings.variance_threshold.is_finite()) {
            return Err(SettingsError::InvalidVarianceThreshold {
                provided: settings.variance_threshold,
            });
        }
        if settings.max_warnings == 0 {
            return Err(SettingsError::InvalidMaxWarnings);
        }

        Ok(settings)
    }
}

impl Default for AssessmentSettings {
    /// One hour, three sections of forty, section 2 behavioral and unscored.
    fn default() -> Self {
        Self {
            duration_ms: 3_600_000,
            tick_interval_ms: 1_000,
            sample_interval_ms: 2_000,
            look_away_ms: 8_000,
            brightness_threshold: 40.0,
            variance_threshold: 12.0,
            max_warnings: 5,
            auto_submit_on_max_warnings: false,
            unscored_sections: BTreeSet::from([2]),
            expected_per_section: BTreeMap::from([(1, 40), (2, 40), (3, 40)]),
        }
    }
}

impl AssessmentSettings {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.duration_ms).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub fn sample_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.sample_interval_ms)
    }

    #[must_use]
    pub fn look_away(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.look_away_ms).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn brightness_threshold(&self) -> f64 {
        self.brightness_threshold
    }

    #[must_use]
    pub fn variance_threshold(&self) -> f64 {
        self.variance_threshold
    }

    #[must_use]
    pub fn max_warnings(&self) -> u32 {
        self.max_warnings
    }

    #[must_use]
    pub fn auto_submit_on_max_warnings(&self) -> bool {
        self.auto_submit_on_max_warnings
    }

    #[must_use]
    pub fn unscored_sections(&self) -> &BTreeSet<u8> {
        &self.unscored_sections
    }

    #[must_use]
    pub fn expected_per_section(&self) -> &BTreeMap<u8, usize> {
        &self.expected_per_section
    }

    /// True when `warning_count` has reached the configured maximum.
    #[must_use]
    pub fn warnings_exhausted(&self, warning_count: usize) -> bool {
        warning_count >= self.max_warnings as usize
    }
}
