//! # Configuration
//!
//! Environment-driven configuration. The binary loads `.env` through dotenvy
//! before calling [`Config::from_env`].
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use crate::core::retry::RetryPolicy;
use crate::features::reminders::ReminderKind;
use anyhow::{anyhow, Result};
use std::str::FromStr;
use std::time::Duration;

/// Default minutes before a task's due date
pub const DEFAULT_TASK_REMINDER_MINUTES: i64 = 15;

/// Default minutes before a meeting starts
pub const DEFAULT_MEETING_REMINDER_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub reminders_enabled: bool,
    pub task_lead_time: chrono::Duration,
    pub meeting_lead_time: chrono::Duration,
    pub snapshot_retry: RetryPolicy,
    /// Full counter resync on a fixed period; `None` resyncs only on reconnect
    pub resync_interval: Option<Duration>,
    pub agenda_path: String,
    pub agenda_refresh: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            reminders_enabled: true,
            task_lead_time: chrono::Duration::minutes(DEFAULT_TASK_REMINDER_MINUTES),
            meeting_lead_time: chrono::Duration::minutes(DEFAULT_MEETING_REMINDER_MINUTES),
            snapshot_retry: RetryPolicy::default(),
            resync_interval: None,
            agenda_path: "agenda.yaml".to_string(),
            agenda_refresh: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let retry_defaults = &defaults.snapshot_retry;

        let log_level = lookup("LOG_LEVEL")
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| defaults.log_level.clone());

        let reminders_enabled = match lookup("REMINDERS_ENABLED") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| anyhow!("REMINDERS_ENABLED must be true or false, got '{}'", raw))?,
            None => defaults.reminders_enabled,
        };

        let task_minutes: i64 =
            parse_var(&lookup, "TASK_REMINDER_MINUTES", DEFAULT_TASK_REMINDER_MINUTES)?;
        let meeting_minutes: i64 =
            parse_var(&lookup, "MEETING_REMINDER_MINUTES", DEFAULT_MEETING_REMINDER_MINUTES)?;
        if task_minutes < 0 || meeting_minutes < 0 {
            return Err(anyhow!("Reminder lead times must not be negative"));
        }

        let base_ms: u64 = parse_var(
            &lookup,
            "SNAPSHOT_RETRY_BASE_MS",
            retry_defaults.base_delay.as_millis() as u64,
        )?;
        let max_ms: u64 = parse_var(
            &lookup,
            "SNAPSHOT_RETRY_MAX_MS",
            retry_defaults.max_delay.as_millis() as u64,
        )?;
        let max_attempts: u32 = parse_var(
            &lookup,
            "SNAPSHOT_RETRY_MAX_ATTEMPTS",
            retry_defaults.max_attempts,
        )?;
        if max_ms < base_ms {
            return Err(anyhow!(
                "SNAPSHOT_RETRY_MAX_MS ({}) must be >= SNAPSHOT_RETRY_BASE_MS ({})",
                max_ms,
                base_ms
            ));
        }

        let resync_interval = match lookup("RESYNC_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| anyhow!("Invalid RESYNC_INTERVAL_SECS '{}': {}", raw, e))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let agenda_path = lookup("AGENDA_PATH").unwrap_or_else(|| defaults.agenda_path.clone());
        let agenda_refresh_secs: u64 = parse_var(&lookup, "AGENDA_REFRESH_SECS", 60)?;

        Ok(Config {
            log_level,
            reminders_enabled,
            task_lead_time: chrono::Duration::minutes(task_minutes),
            meeting_lead_time: chrono::Duration::minutes(meeting_minutes),
            snapshot_retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                jitter_factor: retry_defaults.jitter_factor,
            },
            resync_interval,
            agenda_path,
            agenda_refresh: Duration::from_secs(agenda_refresh_secs.max(1)),
        })
    }

    /// Lead time configured for a reminder kind
    pub fn lead_time(&self, kind: ReminderKind) -> chrono::Duration {
        match kind {
            ReminderKind::Task => self.task_lead_time,
            ReminderKind::Meeting => self.meeting_lead_time,
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {} '{}': {}", name, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Some(true),
        "false" | "0" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.log_level, "info");
        assert!(config.reminders_enabled);
        assert_eq!(config.lead_time(ReminderKind::Task), chrono::Duration::minutes(15));
        assert_eq!(config.lead_time(ReminderKind::Meeting), chrono::Duration::minutes(10));
        assert_eq!(config.snapshot_retry, RetryPolicy::default());
        assert!(config.resync_interval.is_none());
        assert_eq!(config.agenda_path, "agenda.yaml");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("LOG_LEVEL", "DEBUG"),
            ("REMINDERS_ENABLED", "no"),
            ("TASK_REMINDER_MINUTES", "30"),
            ("MEETING_REMINDER_MINUTES", " 5 "),
            ("SNAPSHOT_RETRY_BASE_MS", "100"),
            ("SNAPSHOT_RETRY_MAX_MS", "2000"),
            ("SNAPSHOT_RETRY_MAX_ATTEMPTS", "4"),
            ("RESYNC_INTERVAL_SECS", "30"),
            ("AGENDA_PATH", "/tmp/agenda.yaml"),
        ]))
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert!(!config.reminders_enabled);
        assert_eq!(config.task_lead_time, chrono::Duration::minutes(30));
        assert_eq!(config.meeting_lead_time, chrono::Duration::minutes(5));
        assert_eq!(config.snapshot_retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.snapshot_retry.max_delay, Duration::from_millis(2000));
        assert_eq!(config.snapshot_retry.max_attempts, 4);
        assert_eq!(config.resync_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.agenda_path, "/tmp/agenda.yaml");
    }

    #[test]
    fn test_zero_resync_interval_disables_it() {
        let config = Config::from_lookup(lookup_from(&[("RESYNC_INTERVAL_SECS", "0")])).unwrap();
        assert!(config.resync_interval.is_none());
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = Config::from_lookup(lookup_from(&[("TASK_REMINDER_MINUTES", "soon")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("TASK_REMINDER_MINUTES"));

        let err = Config::from_lookup(lookup_from(&[("REMINDERS_ENABLED", "maybe")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("REMINDERS_ENABLED"));

        assert!(Config::from_lookup(lookup_from(&[("MEETING_REMINDER_MINUTES", "-5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("SNAPSHOT_RETRY_BASE_MS", "5000"),
            ("SNAPSHOT_RETRY_MAX_MS", "100"),
        ]))
        .is_err());
    }
}
