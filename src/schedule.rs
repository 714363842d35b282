//! The relevance switch.
//!
//! Scoring (manual and cron) runs only while the switch is on. The effective
//! state is resolved in order: a stored manual override, then
//! `[relevance].enabled` from config, then a daily window in a fixed UTC
//! offset. The window bounds are inclusive at minute precision and the
//! window may span midnight (`18:30`–`03:30`).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};
use serde::Serialize;

use crate::config::RelevanceConfig;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl ScheduleWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, offset: FixedOffset) -> Self {
        Self { start, end, offset }
    }

    pub fn from_config(config: &RelevanceConfig) -> Result<Self> {
        let start = parse_hhmm(&config.window_start).context("window_start")?;
        let end = parse_hhmm(&config.window_end).context("window_end")?;
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!("utc_offset_minutes out of range: {}", config.utc_offset_minutes)
        })?;
        Ok(Self::new(start, end, offset))
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        self.contains_local(local)
    }

    pub fn contains_local(&self, time: NaiveTime) -> bool {
        let t = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

fn parse_hhmm(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M")
        .with_context(|| format!("expected HH:MM, got '{}'", text))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchSource {
    StoredOverride,
    ConfigOverride,
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchStatus {
    pub enabled: bool,
    pub source: SwitchSource,
    pub stored_override: Option<bool>,
    pub config_override: Option<bool>,
    pub within_schedule: bool,
}

pub struct RelevanceGate {
    window: ScheduleWindow,
    config_override: Option<bool>,
    store: Arc<dyn JobStore>,
}

impl RelevanceGate {
    pub fn new(window: ScheduleWindow, config_override: Option<bool>, store: Arc<dyn JobStore>) -> Self {
        Self {
            window,
            config_override,
            store,
        }
    }

    pub fn from_config(config: &RelevanceConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        Ok(Self::new(
            ScheduleWindow::from_config(config)?,
            config.enabled,
            store,
        ))
    }

    pub async fn status_at(&self, now: DateTime<Utc>) -> Result<SwitchStatus> {
        let stored_override = self.store.relevance_override().await?;
        let within_schedule = self.window.contains(now);
        let (enabled, source) = match (stored_override, self.config_override) {
            (Some(v), _) => (v, SwitchSource::StoredOverride),
            (None, Some(v)) => (v, SwitchSource::ConfigOverride),
            (None, None) => (within_schedule, SwitchSource::Schedule),
        };
        Ok(SwitchStatus {
            enabled,
            source,
            stored_override,
            config_override: self.config_override,
            within_schedule,
        })
    }

    pub async fn status(&self) -> Result<SwitchStatus> {
        self.status_at(Utc::now()).await
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.status().await?.enabled)
    }

    /// `None` returns control to config and schedule.
    pub async fn set_override(&self, value: Option<bool>) -> Result<SwitchStatus> {
        self.store.set_relevance_override(value).await?;
        tracing::info!(?value, "relevance override updated");
        self.status().await
    }
}

fn print_status(status: &SwitchStatus) {
    let show = |v: Option<bool>| v.map_or("none".to_string(), |b| b.to_string());
    println!("enabled: {}", status.enabled);
    println!("source: {}", match status.source {
        SwitchSource::StoredOverride => "stored_override",
        SwitchSource::ConfigOverride => "config_override",
        SwitchSource::Schedule => "schedule",
    });
    println!("stored_override: {}", show(status.stored_override));
    println!("config_override: {}", show(status.config_override));
    println!("within_schedule: {}", status.within_schedule);
}

/// `jobfit relevance status`
pub async fn run_status(config: &crate::config::Config) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    print_status(&app.relevance_gate.status().await?);
    app.close().await;
    Ok(())
}

/// `jobfit relevance enable|disable|auto`
pub async fn run_set(config: &crate::config::Config, value: Option<bool>) -> Result<()> {
    let app = crate::app::App::from_config(config).await?;
    print_status(&app.relevance_gate.set_override(value).await?);
    app.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn default_window() -> ScheduleWindow {
        ScheduleWindow::from_config(&RelevanceConfig::default()).unwrap()
    }

    #[test]
    fn test_window_spanning_midnight() {
        let w = default_window();
        assert!(w.contains_local(hm(18, 30)));
        assert!(w.contains_local(hm(23, 59)));
        assert!(w.contains_local(hm(0, 0)));
        assert!(w.contains_local(hm(3, 30)));
        assert!(NaiveTime::from_hms_opt(3, 30, 45).map(|t| w.contains_local(t)).unwrap());
        assert!(!w.contains_local(hm(3, 31)));
        assert!(!w.contains_local(hm(12, 0)));
        assert!(!w.contains_local(hm(18, 29)));
    }

    #[test]
    fn test_window_same_day() {
        let w = ScheduleWindow::new(hm(9, 0), hm(17, 0), FixedOffset::east_opt(0).unwrap());
        assert!(w.contains_local(hm(9, 0)));
        assert!(w.contains_local(hm(17, 0)));
        assert!(!w.contains_local(hm(17, 1)));
        assert!(!w.contains_local(hm(8, 59)));
    }

    #[test]
    fn test_window_uses_offset() {
        let w = default_window();
        // 14:00 UTC is 19:00 at UTC+5.
        assert!(w.contains(Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap()));
        // 07:00 UTC is 12:00 at UTC+5.
        assert!(!w.contains(Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()));
    }

    #[test]
    fn test_bad_time_rejected() {
        let config = RelevanceConfig {
            window_start: "6pm".into(),
            ..RelevanceConfig::default()
        };
        assert!(ScheduleWindow::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let store = Arc::new(InMemoryStore::new());
        let noon_local = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();

        let gate = RelevanceGate::new(default_window(), None, store.clone());
        let status = gate.status_at(noon_local).await.unwrap();
        assert!(!status.enabled);
        assert_eq!(status.source, SwitchSource::Schedule);

        let gate = RelevanceGate::new(default_window(), Some(true), store.clone());
        let status = gate.status_at(noon_local).await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.source, SwitchSource::ConfigOverride);

        store.set_relevance_override(Some(false)).await.unwrap();
        let status = gate.status_at(noon_local).await.unwrap();
        assert!(!status.enabled);
        assert_eq!(status.source, SwitchSource::StoredOverride);
    }
}
