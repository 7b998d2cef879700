use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default size of the producer/consumer ring, in bytes.
pub const CHANNEL_CAPACITY: usize = 64;
/// Largest single `write` or `read` on the producer/consumer channel.
pub const MAX_TRANSFER: usize = 64;
/// Default size of the timer module's sample ring, in bytes.
pub const SAMPLE_CAPACITY: usize = 128;
/// Longest payload accepted by [`SharedConfig::apply`].
pub const CONFIG_WRITE_MAX: usize = 42;

// =============================================================================
// Fixed limits
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub channel_capacity: usize,
    pub max_transfer: usize,
    pub sample_capacity: usize,
    pub max_producers: Option<usize>,
    pub max_consumers: Option<usize>,
    pub workers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            channel_capacity: CHANNEL_CAPACITY,
            max_transfer: MAX_TRANSFER,
            sample_capacity: SAMPLE_CAPACITY,
            max_producers: None,
            max_consumers: None,
            workers: num_cpus::get().max(2),
        }
    }
}

impl Limits {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::invalid("channel_capacity must be positive"));
        }
        if self.max_transfer == 0 || self.max_transfer > self.channel_capacity {
            return Err(Error::invalid(format!(
                "max_transfer must be in 1..={}, got {}",
                self.channel_capacity, self.max_transfer
            )));
        }
        if self.sample_capacity < VALUE_SIZE {
            return Err(Error::invalid(format!(
                "sample_capacity must hold at least one value ({VALUE_SIZE} bytes)"
            )));
        }
        if self.max_producers == Some(0) || self.max_consumers == Some(0) {
            return Err(Error::invalid("session limits must be positive"));
        }
        if self.workers == 0 {
            return Err(Error::invalid("at least one drain worker is required"));
        }
        Ok(())
    }
}

/// Bytes one generated value occupies in the sample ring.
pub const VALUE_SIZE: usize = std::mem::size_of::<u32>();

// =============================================================================
// Runtime-tunable timer settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimerSettings {
    pub period_ms: u32,
    pub threshold_percent: u32,
    pub value_bound: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            threshold_percent: 75,
            value_bound: 300,
        }
    }
}

impl TimerSettings {
    pub fn validate(&self) -> Result<()> {
        for field in ConfigField::ALL {
            field.check(self.get(field))?;
        }
        Ok(())
    }

    pub fn get(&self, field: ConfigField) -> u32 {
        match field {
            ConfigField::PeriodMs => self.period_ms,
            ConfigField::ThresholdPercent => self.threshold_percent,
            ConfigField::ValueBound => self.value_bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    PeriodMs,
    ThresholdPercent,
    ValueBound,
}

impl ConfigField {
    pub const ALL: [ConfigField; 3] = [
        ConfigField::PeriodMs,
        ConfigField::ThresholdPercent,
        ConfigField::ValueBound,
    ];

    /// Name used by the text configuration endpoint.
    pub fn name(self) -> &'static str {
        match self {
            ConfigField::PeriodMs => "timer_period_ms",
            ConfigField::ThresholdPercent => "emergency_threshold",
            ConfigField::ValueBound => "max_random",
        }
    }

    fn check(self, value: u32) -> Result<()> {
        let ok = match self {
            ConfigField::PeriodMs | ConfigField::ValueBound => value > 0,
            ConfigField::ThresholdPercent => value <= 100,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::invalid(format!("{self}={value} is out of range")))
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConfigField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| Error::invalid(format!("unknown config field '{s}'")))
    }
}

/// Live timer settings shared between the config endpoint and the timer.
///
/// Each field is its own atomic: no reader can see a half-written value,
/// and the fields have no invariant spanning more than one of them.
#[derive(Debug)]
pub struct SharedConfig {
    period_ms: AtomicU32,
    threshold_percent: AtomicU32,
    value_bound: AtomicU32,
}

impl SharedConfig {
    pub fn new(settings: TimerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            period_ms: AtomicU32::new(settings.period_ms),
            threshold_percent: AtomicU32::new(settings.threshold_percent),
            value_bound: AtomicU32::new(settings.value_bound),
        })
    }

    fn slot(&self, field: ConfigField) -> &AtomicU32 {
        match field {
            ConfigField::PeriodMs => &self.period_ms,
            ConfigField::ThresholdPercent => &self.threshold_percent,
            ConfigField::ValueBound => &self.value_bound,
        }
    }

    pub fn get(&self, field: ConfigField) -> u32 {
        self.slot(field).load(Ordering::Relaxed)
    }

    pub fn set(&self, field: ConfigField, value: u32) -> Result<()> {
        field.check(value)?;
        self.slot(field).store(value, Ordering::Relaxed);
        tracing::info!("config: {field}={value}");
        Ok(())
    }

    pub fn snapshot(&self) -> TimerSettings {
        TimerSettings {
            period_ms: self.get(ConfigField::PeriodMs),
            threshold_percent: self.get(ConfigField::ThresholdPercent),
            value_bound: self.get(ConfigField::ValueBound),
        }
    }

    /// Text form served by the read side of the config endpoint.
    pub fn render(&self) -> String {
        ConfigField::ALL
            .into_iter()
            .map(|field| format!("{field}={}\n", self.get(field)))
            .collect()
    }

    /// Applies one `name=value` line. Returns the number of bytes consumed.
    pub fn apply(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > CONFIG_WRITE_MAX {
            return Err(Error::invalid(format!(
                "config payload of {} bytes exceeds {CONFIG_WRITE_MAX}",
                payload.len()
            )));
        }
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::invalid("config payload is not UTF-8"))?;
        let (name, value) = text
            .trim()
            .split_once('=')
            .ok_or_else(|| Error::invalid(format!("expected name=value, got '{}'", text.trim())))?;
        let field: ConfigField = name.trim().parse()?;
        let value: u32 = value
            .trim()
            .parse()
            .map_err(|_| Error::invalid(format!("{field} needs an unsigned integer")))?;
        self.set(field, value)?;
        Ok(payload.len())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        let settings = TimerSettings::default();
        Self {
            period_ms: AtomicU32::new(settings.period_ms),
            threshold_percent: AtomicU32::new(settings.threshold_percent),
            value_bound: AtomicU32::new(settings.value_bound),
        }
    }
}

// =============================================================================
// Whole-module configuration file
// =============================================================================

/// How the timer module fans drained values out to its readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// One session, one queue receiving every value.
    #[default]
    Single,
    /// Two sessions: the first reads even values, the second odd ones.
    Parity,
}

impl Variant {
    /// Consumer queues, and therefore sessions, the variant runs with.
    pub fn queue_count(self) -> usize {
        match self {
            Variant::Single => 1,
            Variant::Parity => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleConfig {
    pub limits: Limits,
    pub timer: TimerSettings,
    pub variant: Variant,
}

impl ModuleConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ModuleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;
        self.timer.validate()
    }
}
