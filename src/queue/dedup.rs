//! Recency window rejecting near-duplicate sends from racing devices

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::message::DuplicateInfo;

struct DedupEntry {
    device_id: Option<String>,
    seen_at: DateTime<Utc>,
}

/// Recent content fingerprints for one session
pub struct DedupWindow {
    window: Duration,
    entries: HashMap<String, DedupEntry>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Normalized content fingerprint: case-folded, whitespace-collapsed
    pub fn fingerprint(session_id: &str, text: &str) -> String {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        format!("{}:{}", session_id, normalized)
    }

    /// Record a fingerprint; returns who we collided with if one was seen
    /// inside the window
    pub fn check_and_record(
        &mut self,
        fingerprint: String,
        device_id: Option<String>,
    ) -> Option<DuplicateInfo> {
        self.prune();

        if let Some(existing) = self.entries.get(&fingerprint) {
            return Some(DuplicateInfo {
                device_id: existing.device_id.clone(),
                enqueued_at: existing.seen_at,
            });
        }

        self.entries.insert(
            fingerprint,
            DedupEntry {
                device_id,
                seen_at: Utc::now(),
            },
        );
        None
    }

    fn prune(&mut self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::seconds(8));
        self.entries.retain(|_, entry| entry.seen_at > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_normalizes_whitespace_and_case() {
        let a = DedupWindow::fingerprint("s1", "Fix  the\tbug");
        let b = DedupWindow::fingerprint("s1", "fix the bug");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_scoped_to_session() {
        let a = DedupWindow::fingerprint("s1", "hello");
        let b = DedupWindow::fingerprint("s2", "hello");
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_inside_window_names_original_device() {
        let mut window = DedupWindow::new(Duration::from_secs(10));
        let fp = DedupWindow::fingerprint("s1", "hello");

        assert!(window
            .check_and_record(fp.clone(), Some("phone-a".into()))
            .is_none());

        let dup = window
            .check_and_record(fp, Some("phone-b".into()))
            .expect("second send should collide");
        assert_eq!(dup.device_id.as_deref(), Some("phone-a"));
    }

    #[test]
    fn accepted_again_after_window_elapses() {
        let mut window = DedupWindow::new(Duration::from_millis(0));
        let fp = DedupWindow::fingerprint("s1", "hello");

        assert!(window.check_and_record(fp.clone(), None).is_none());
        std::thread::sleep(Duration::from_millis(5));
        assert!(window.check_and_record(fp, None).is_none());
    }
}
