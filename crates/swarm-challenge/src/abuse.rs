use std::collections::HashMap;
use std::sync::Mutex;

use swarm_core::types::TimestampNs;
use swarm_core::{now_ns, SwarmError};

const MAX_CHALLENGES_PER_HOUR: usize = 10;
const MAX_CHALLENGES_PER_DAY: usize = 50;
const SPAM_WINDOW_NS: i64 = 60 * 1_000_000_000;
const SPAM_THRESHOLD: usize = 5;
const LOW_QUALITY_THRESHOLD: f64 = 0.2;
const WITHDRAWAL_PENALTY: f64 = 0.05;

const HOUR_NS: i64 = 3600 * 1_000_000_000;
const DAY_NS: i64 = 24 * HOUR_NS;

/// Per-challenger history.
#[derive(Clone, Debug, Default)]
pub struct ChallengerStats {
    pub total_challenges: u64,
    pub upheld: u64,
    pub rejected: u64,
    pub withdrawn: u64,
    pub submissions: Vec<TimestampNs>,
}

impl ChallengerStats {
    /// Challenger reputation in [0, 1], starting at 0.5 with no history.
    /// Derived from the upheld/rejected rate, with each withdrawal
    /// shaving a small penalty.
    pub fn reputation(&self) -> f64 {
        let settled = self.upheld + self.rejected;
        let base = if settled == 0 {
            0.5
        } else {
            self.upheld as f64 / settled as f64
        };
        (base - self.withdrawn as f64 * WITHDRAWAL_PENALTY).clamp(0.0, 1.0)
    }
}

/// Rate limiting and spam detection for challenge submissions. Load is
/// shed here before any bond or queue work happens.
pub struct AbuseDetector {
    stats: Mutex<HashMap<String, ChallengerStats>>,
}

impl AbuseDetector {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Reject when the hourly or daily submission caps are hit.
    pub fn check_rate_limit(&self, challenger_id: &str) -> Result<(), SwarmError> {
        let stats = self.stats.lock().expect("abuse lock poisoned");
        let Some(s) = stats.get(challenger_id) else {
            return Ok(());
        };
        let now = now_ns();
        let last_hour = s.submissions.iter().filter(|t| now - **t < HOUR_NS).count();
        if last_hour >= MAX_CHALLENGES_PER_HOUR {
            return Err(SwarmError::RateLimitExceeded(format!(
                "{last_hour} challenges in the last hour (max {MAX_CHALLENGES_PER_HOUR})"
            )));
        }
        let last_day = s.submissions.iter().filter(|t| now - **t < DAY_NS).count();
        if last_day >= MAX_CHALLENGES_PER_DAY {
            return Err(SwarmError::RateLimitExceeded(format!(
                "{last_day} challenges in the last 24h (max {MAX_CHALLENGES_PER_DAY})"
            )));
        }
        Ok(())
    }

    /// Rapid-fire detection: ≥ 5 submissions inside one minute.
    pub fn check_spam_pattern(&self, challenger_id: &str) -> Result<(), SwarmError> {
        let stats = self.stats.lock().expect("abuse lock poisoned");
        let Some(s) = stats.get(challenger_id) else {
            return Ok(());
        };
        let now = now_ns();
        let recent = s
            .submissions
            .iter()
            .filter(|t| now - **t < SPAM_WINDOW_NS)
            .count();
        if recent >= SPAM_THRESHOLD {
            return Err(SwarmError::SpamDetected(format!(
                "{recent} challenges within {}s",
                SPAM_WINDOW_NS / 1_000_000_000
            )));
        }
        Ok(())
    }

    /// Low-quality challengers (reputation < 0.2) get flagged for a higher
    /// bond or outright rejection.
    pub fn is_low_quality(&self, challenger_id: &str) -> bool {
        self.reputation(challenger_id) < LOW_QUALITY_THRESHOLD
    }

    pub fn reputation(&self, challenger_id: &str) -> f64 {
        self.stats
            .lock()
            .expect("abuse lock poisoned")
            .get(challenger_id)
            .map(ChallengerStats::reputation)
            .unwrap_or(0.5)
    }

    /// Record a submission (after the limit checks pass).
    pub fn record_challenge(&self, challenger_id: &str) {
        let mut stats = self.stats.lock().expect("abuse lock poisoned");
        let s = stats.entry(challenger_id.to_string()).or_default();
        s.total_challenges += 1;
        let now = now_ns();
        s.submissions.push(now);
        // Keep one day of history; older entries no longer affect any check.
        s.submissions.retain(|t| now - *t < DAY_NS);
    }

    /// Record a settled outcome ("UPHELD" / "REJECTED" / "WITHDRAWN").
    pub fn record_outcome(&self, challenger_id: &str, outcome: &str) {
        let mut stats = self.stats.lock().expect("abuse lock poisoned");
        let s = stats.entry(challenger_id.to_string()).or_default();
        match outcome {
            "UPHELD" => s.upheld += 1,
            "REJECTED" => s.rejected += 1,
            "WITHDRAWN" => s.withdrawn += 1,
            _ => {}
        }
    }

    pub fn stats_for(&self, challenger_id: &str) -> Option<ChallengerStats> {
        self.stats
            .lock()
            .expect("abuse lock poisoned")
            .get(challenger_id)
            .cloned()
    }
}

impl Default for AbuseDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_challenger_is_unrestricted() {
        let detector = AbuseDetector::new();
        detector.check_rate_limit("new").unwrap();
        detector.check_spam_pattern("new").unwrap();
        assert!((detector.reputation("new") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn hourly_cap_blocks_eleventh_challenge() {
        let detector = AbuseDetector::new();
        for _ in 0..MAX_CHALLENGES_PER_HOUR {
            detector.record_challenge("eager");
        }
        assert!(matches!(
            detector.check_rate_limit("eager").unwrap_err(),
            SwarmError::RateLimitExceeded(_)
        ));
    }

    #[test]
    fn rapid_fire_is_spam() {
        let detector = AbuseDetector::new();
        for _ in 0..SPAM_THRESHOLD {
            detector.record_challenge("burst");
        }
        assert!(matches!(
            detector.check_spam_pattern("burst").unwrap_err(),
            SwarmError::SpamDetected(_)
        ));
    }

    #[test]
    fn reputation_tracks_outcomes() {
        let detector = AbuseDetector::new();
        detector.record_outcome("c", "UPHELD");
        detector.record_outcome("c", "REJECTED");
        detector.record_outcome("c", "REJECTED");
        detector.record_outcome("c", "REJECTED");
        // 1 of 4 upheld = 0.25; not yet flagged.
        assert!(!detector.is_low_quality("c"));
        detector.record_outcome("c", "REJECTED");
        detector.record_outcome("c", "REJECTED");
        // 1 of 6 ≈ 0.17 < 0.2.
        assert!(detector.is_low_quality("c"));
    }

    #[test]
    fn withdrawals_penalize_reputation() {
        let detector = AbuseDetector::new();
        detector.record_outcome("w", "UPHELD");
        let before = detector.reputation("w");
        detector.record_outcome("w", "WITHDRAWN");
        assert!(detector.reputation("w") < before);
    }
}
