//! System health monitoring.
//!
//! Tracks a heartbeat per symbol (stamped on every processed bar),
//! connector liveness, process memory, and the persistence backlog.
//! A symbol silent past the timeout usually means the feed died or
//! inference is stuck, both of which need eyes.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::HealthSection;

/// Snapshot of system health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub memory_mb: f64,
    pub uptime_s: u64,
}

/// Shared health tracker; updated by the bar pipeline, read by the
/// health loop.
pub struct HealthMonitor {
    config: HealthSection,
    started_at: Instant,
    heartbeats: RwLock<HashMap<String, Instant>>,
}

impl HealthMonitor {
    /// Monitor with the configured thresholds.
    #[must_use]
    pub fn new(config: HealthSection) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            heartbeats: RwLock::new(HashMap::new()),
        }
    }

    /// Stamp a symbol's heartbeat.
    pub fn update(&self, symbol: &str) {
        self.heartbeats
            .write()
            .insert(symbol.to_string(), Instant::now());
    }

    /// Forget a symbol (model unloaded).
    pub fn reset_symbol(&self, symbol: &str) {
        self.heartbeats.write().remove(symbol);
    }

    /// Evaluate health.
    #[must_use]
    pub fn check(&self, connector_connected: bool, persistence_pending: usize) -> HealthReport {
        let mut issues = Vec::new();

        if !connector_connected {
            issues.push("broker connector disconnected".to_string());
        }

        let timeout = self.config.symbol_timeout_s;
        for (symbol, last) in self.heartbeats.read().iter() {
            let elapsed = last.elapsed().as_secs();
            if elapsed > timeout {
                issues.push(format!("{symbol}: no bar for {elapsed}s"));
            }
        }

        let memory_mb = process_rss_mb();
        #[allow(clippy::cast_precision_loss)]
        let memory_limit = self.config.memory_limit_mb as f64;
        if memory_mb > memory_limit {
            issues.push(format!("memory high: {memory_mb:.0}MB"));
        }

        if persistence_pending > 100 {
            issues.push(format!("persistence backlog: {persistence_pending}"));
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
            memory_mb,
            uptime_s: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Resident set size in MB, from procfs; 0 where unavailable.
fn process_rss_mb() -> f64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0.0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0.0);
            return kb / 1024.0;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_symbols_are_healthy() {
        let monitor = HealthMonitor::new(HealthSection::default());
        monitor.update("EURUSD");
        let report = monitor.check(true, 0);
        assert!(report.healthy, "issues: {:?}", report.issues);
    }

    #[test]
    fn test_disconnected_connector_flagged() {
        let monitor = HealthMonitor::new(HealthSection::default());
        let report = monitor.check(false, 0);
        assert!(!report.healthy);
        assert!(report.issues[0].contains("disconnected"));
    }

    #[test]
    fn test_stale_symbol_flagged() {
        let monitor = HealthMonitor::new(HealthSection {
            symbol_timeout_s: 0,
            ..HealthSection::default()
        });
        monitor.update("EURUSD");
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let report = monitor.check(true, 0);
        assert!(!report.healthy);
        assert!(report.issues.iter().any(|i| i.contains("EURUSD")));
    }

    #[test]
    fn test_persistence_backlog_flagged() {
        let monitor = HealthMonitor::new(HealthSection::default());
        let report = monitor.check(true, 500);
        assert!(report.issues.iter().any(|i| i.contains("backlog")));
    }

    #[test]
    fn test_reset_symbol_clears_heartbeat() {
        let monitor = HealthMonitor::new(HealthSection {
            symbol_timeout_s: 0,
            ..HealthSection::default()
        });
        monitor.update("EURUSD");
        monitor.reset_symbol("EURUSD");
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(monitor.check(true, 0).healthy);
    }
}
