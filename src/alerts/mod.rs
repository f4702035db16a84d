//! Alert inbox and ingress server
//!
//! External producers push notifications over a private HTTP endpoint; the
//! inbox holds them until the designated speaker is present, then they are
//! delivered as a single spoken briefing.

mod server;

pub use server::{serve, AlertServerState};

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

/// Maximum queued alerts; oldest normal-priority evicted first
const INBOX_CAP: usize = 50;

/// Alerts older than this are silently discarded
const ALERT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Alert priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    Normal,
}

/// One externally-pushed notification
#[derive(Debug, Clone)]
pub struct Alert {
    pub priority: Priority,
    pub message: String,
    pub detail: Option<String>,
    pub source: Option<String>,
    pub received_at: Instant,
}

impl Alert {
    #[must_use]
    pub fn new(priority: Priority, message: impl Into<String>) -> Self {
        Self {
            priority,
            message: message.into(),
            detail: None,
            source: None,
            received_at: Instant::now(),
        }
    }
}

/// Priority-ordered, capped, TTL-enforcing alert queue
pub struct AlertInbox {
    inner: Mutex<Vec<Alert>>,
    cap: usize,
    ttl: Duration,
}

impl Default for AlertInbox {
    fn default() -> Self {
        Self::new(INBOX_CAP, ALERT_TTL)
    }
}

impl AlertInbox {
    /// Create an inbox with explicit bounds
    #[must_use]
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            cap,
            ttl,
        }
    }

    /// Queue an alert, evicting expired entries and then the oldest
    /// normal-priority entries if over capacity
    pub fn push(&self, alert: Alert) {
        let mut alerts = self.inner.lock().expect("alert lock poisoned");
        let now = Instant::now();
        alerts.retain(|a| now.duration_since(a.received_at) < self.ttl);

        tracing::info!(
            priority = ?alert.priority,
            source = alert.source.as_deref().unwrap_or("unknown"),
            "alert queued"
        );
        alerts.push(alert);

        while alerts.len() > self.cap {
            let victim = alerts
                .iter()
                .enumerate()
                .filter(|(_, a)| a.priority == Priority::Normal)
                .min_by_key(|(_, a)| a.received_at)
                .map(|(i, _)| i)
                .or_else(|| {
                    alerts
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, a)| a.received_at)
                        .map(|(i, _)| i)
                });
            match victim {
                Some(i) => {
                    alerts.remove(i);
                }
                None => break,
            }
        }
    }

    /// Take every live alert in delivery order: urgent before normal,
    /// oldest first within a priority. The batch is consumed.
    #[must_use]
    pub fn drain_for_briefing(&self) -> Vec<Alert> {
        let mut alerts = self.inner.lock().expect("alert lock poisoned");
        let now = Instant::now();
        alerts.retain(|a| now.duration_since(a.received_at) < self.ttl);

        let mut batch: Vec<Alert> = alerts.drain(..).collect();
        batch.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.received_at.cmp(&b.received_at))
        });
        batch
    }

    /// Whether any live alert is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let alerts = self.inner.lock().expect("alert lock poisoned");
        let now = Instant::now();
        !alerts
            .iter()
            .any(|a| now.duration_since(a.received_at) < self.ttl)
    }

    /// Number of queued alerts, counting expired entries not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("alert lock poisoned").len()
    }
}

/// Compose the spoken briefing for a drained batch
#[must_use]
pub fn briefing_text(alerts: &[Alert]) -> String {
    if alerts.is_empty() {
        return String::new();
    }

    let urgent = alerts
        .iter()
        .filter(|a| a.priority == Priority::Urgent)
        .count();

    let mut text = if alerts.len() == 1 {
        "You have one notification. ".to_string()
    } else if urgent > 0 {
        format!(
            "You have {} notifications, {urgent} urgent. ",
            alerts.len()
        )
    } else {
        format!("You have {} notifications. ", alerts.len())
    };

    for alert in alerts {
        if alert.priority == Priority::Urgent {
            text.push_str("Urgent: ");
        }
        text.push_str(&alert.message);
        if !alert.message.ends_with(['.', '!', '?']) {
            text.push('.');
        }
        text.push(' ');
    }

    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aged(priority: Priority, message: &str, age: Duration) -> Alert {
        let mut alert = Alert::new(priority, message);
        alert.received_at = Instant::now() - age;
        alert
    }

    #[test]
    fn briefing_orders_urgent_first_then_oldest() {
        let inbox = AlertInbox::default();
        inbox.push(aged(Priority::Normal, "old normal", Duration::from_secs(30)));
        inbox.push(aged(Priority::Urgent, "new urgent", Duration::from_secs(5)));
        inbox.push(aged(Priority::Urgent, "old urgent", Duration::from_secs(20)));
        inbox.push(aged(Priority::Normal, "new normal", Duration::from_secs(1)));

        let batch = inbox.drain_for_briefing();
        let order: Vec<&str> = batch.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(order, vec!["old urgent", "new urgent", "old normal", "new normal"]);
    }

    #[test]
    fn drain_consumes_the_batch() {
        let inbox = AlertInbox::default();
        inbox.push(Alert::new(Priority::Normal, "once"));

        assert_eq!(inbox.drain_for_briefing().len(), 1);
        assert!(inbox.drain_for_briefing().is_empty());
        assert!(inbox.is_empty());
    }

    #[test]
    fn cap_evicts_oldest_normal_first() {
        let inbox = AlertInbox::new(3, ALERT_TTL);
        inbox.push(aged(Priority::Urgent, "keep urgent", Duration::from_secs(50)));
        inbox.push(aged(Priority::Normal, "oldest normal", Duration::from_secs(40)));
        inbox.push(aged(Priority::Normal, "newer normal", Duration::from_secs(30)));
        inbox.push(aged(Priority::Normal, "newest normal", Duration::from_secs(20)));

        let batch = inbox.drain_for_briefing();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|a| a.message != "oldest normal"));
        assert!(batch.iter().any(|a| a.message == "keep urgent"));
    }

    #[test]
    fn expired_alerts_are_dropped() {
        let inbox = AlertInbox::new(50, Duration::from_millis(10));
        inbox.push(aged(Priority::Urgent, "stale", Duration::from_secs(1)));

        assert!(inbox.is_empty());
        assert!(inbox.drain_for_briefing().is_empty());
    }

    #[test]
    fn briefing_text_leads_with_urgent() {
        let batch = vec![
            Alert::new(Priority::Urgent, "Server room is on fire"),
            Alert::new(Priority::Normal, "Build finished"),
        ];

        let text = briefing_text(&batch);
        assert!(text.starts_with("You have 2 notifications, 1 urgent."));
        let fire = text.find("fire").unwrap();
        let build = text.find("Build finished").unwrap();
        assert!(fire < build);
    }

    #[test]
    fn briefing_text_empty_for_no_alerts() {
        assert!(briefing_text(&[]).is_empty());
    }
}
