use clap::ValueEnum;
use std::fmt;

/// Placeholder shown for a reading that could not be obtained
pub const UNAVAILABLE: &str = "n/a";

/// One best-effort poll of the fan daemon and the hardware sensors.
/// Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub temperature_celsius: Option<f64>,
    pub fan_speed_percent: Option<f64>,
    pub active_profile_name: Option<String>,
    pub power_watts: Option<f64>,
}

impl Snapshot {
    pub fn temperature_display(&self) -> String {
        self.temperature_celsius
            .map_or_else(|| UNAVAILABLE.to_string(), |t| format!("{t:.1}°C"))
    }

    pub fn fan_speed_display(&self) -> String {
        self.fan_speed_percent
            .map_or_else(|| UNAVAILABLE.to_string(), |s| format!("{s:.1}%"))
    }

    pub fn profile_display(&self) -> &str {
        self.active_profile_name.as_deref().unwrap_or(UNAVAILABLE)
    }

    pub fn power_display(&self) -> String {
        self.power_watts
            .map_or_else(|| UNAVAILABLE.to_string(), |p| format!("{p:.2} W"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PerformanceMode {
    #[default]
    Normal,
    MaxPerformance,
    PowerSaving, // takes precedence over MaxPerformance when both flags are set on disk
}

impl PerformanceMode {
    /// Resolve the two on-disk flags. Power saving wins if both are set.
    pub const fn from_flags(max_performance: bool, power_saving: bool) -> Self {
        if power_saving {
            Self::PowerSaving
        } else if max_performance {
            Self::MaxPerformance
        } else {
            Self::Normal
        }
    }

    pub const fn is_max_performance(self) -> bool {
        matches!(self, Self::MaxPerformance)
    }

    pub const fn is_power_saving(self) -> bool {
        matches!(self, Self::PowerSaving)
    }
}

/// A named set of ryzenadj power and thermal limits.
///
/// Limits are in watts and seconds; the applicator converts them to the
/// milliwatt / millisecond units ryzenadj expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdpProfile {
    pub name: String,
    pub fast_limit_watts: u32,
    pub slow_limit_watts: u32,
    pub slow_time_seconds: Option<u32>,
    pub tctl_temp_celsius: Option<u32>,
    pub apu_skin_temp_celsius: Option<u32>,
    pub mode: PerformanceMode,
}

impl TdpProfile {
    /// A profile with only the basic limits set
    pub fn basic(name: impl Into<String>, fast_limit_watts: u32, slow_limit_watts: u32) -> Self {
        Self {
            name: name.into(),
            fast_limit_watts,
            slow_limit_watts,
            slow_time_seconds: None,
            tctl_temp_celsius: None,
            apu_skin_temp_celsius: None,
            mode: PerformanceMode::Normal,
        }
    }
}

/// Outcome of one external command, handed to exactly one completion handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub succeeded: bool,
    pub message: String,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.succeeded { "ok" } else { "failed" };
        write!(f, "[{status}] {}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanCurvePoint {
    pub temperature_celsius: f64,
    pub fan_speed_percent: f64,
}

/// Piecewise temperature to fan speed mapping, sorted by temperature
#[derive(Debug, Clone, PartialEq)]
pub struct FanCurve {
    points: Vec<FanCurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FanCurveError {
    #[error("a fan curve needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("fan speed {0} is outside 0-100%")]
    SpeedOutOfRange(String),

    #[error("duplicate temperature {0}°C")]
    DuplicateTemperature(String),

    #[error("non-finite value in fan curve")]
    NonFinite,
}

impl FanCurve {
    pub const MIN_POINTS: usize = 2;

    /// Build a curve from unordered points.
    ///
    /// # Errors
    ///
    /// Rejects curves with fewer than two points, speeds outside 0-100,
    /// repeated temperatures or NaN/infinite values.
    pub fn new(mut points: Vec<FanCurvePoint>) -> Result<Self, FanCurveError> {
        if points.len() < Self::MIN_POINTS {
            return Err(FanCurveError::TooFewPoints(points.len()));
        }

        for point in &points {
            if !point.temperature_celsius.is_finite() || !point.fan_speed_percent.is_finite() {
                return Err(FanCurveError::NonFinite);
            }
            if !(0.0..=100.0).contains(&point.fan_speed_percent) {
                return Err(FanCurveError::SpeedOutOfRange(
                    point.fan_speed_percent.to_string(),
                ));
            }
        }

        points.sort_by(|a, b| a.temperature_celsius.total_cmp(&b.temperature_celsius));

        if let Some(pair) = points
            .windows(2)
            .find(|w| w[0].temperature_celsius == w[1].temperature_celsius)
        {
            return Err(FanCurveError::DuplicateTemperature(
                pair[0].temperature_celsius.to_string(),
            ));
        }

        Ok(Self { points })
    }

    /// Convenience constructor from `(temperature, speed)` pairs
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self, FanCurveError> {
        Self::new(
            pairs
                .iter()
                .map(|&(temperature_celsius, fan_speed_percent)| FanCurvePoint {
                    temperature_celsius,
                    fan_speed_percent,
                })
                .collect(),
        )
    }

    pub fn points(&self) -> &[FanCurvePoint] {
        &self.points
    }
}

impl Default for FanCurve {
    fn default() -> Self {
        Self {
            points: [(20.0, 0.0), (40.0, 30.0), (60.0, 60.0), (80.0, 100.0)]
                .into_iter()
                .map(|(temperature_celsius, fan_speed_percent)| FanCurvePoint {
                    temperature_celsius,
                    fan_speed_percent,
                })
                .collect(),
        }
    }
}
