//! Rate limiting of outgoing position updates.
//!
//! A client sends its position when the heartbeat interval has passed, or
//! when the minimum interval has passed and it moved further than the
//! movement threshold since the last send. The first update after joining
//! has no baseline and goes out once the minimum interval has passed.

use std::time::Duration;

use glam::Vec3;

/// Send policy tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendPolicyConfig {
    /// Lower bound between two sends.
    pub min_interval: Duration,
    /// Upper bound between two sends.
    pub heartbeat: Duration,
    /// Movement that justifies a send before the heartbeat.
    pub movement_threshold: f32,
}

impl Default for SendPolicyConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(50),
            heartbeat: Duration::from_secs(1),
            movement_threshold: 0.1,
        }
    }
}

/// Decides, tick by tick, whether to send the local position.
#[derive(Debug, Clone)]
pub struct PositionSendPolicy {
    config: SendPolicyConfig,
    since_last_send: Duration,
    last_sent: Option<Vec3>,
}

impl PositionSendPolicy {
    /// Create a policy with no send history.
    pub fn new(config: SendPolicyConfig) -> Self {
        Self {
            config,
            since_last_send: Duration::ZERO,
            last_sent: None,
        }
    }

    /// Advance by `dt` and return whether `position` should be sent now.
    /// A `true` result records `position` as the new baseline.
    pub fn update(&mut self, dt: Duration, position: Vec3) -> bool {
        self.since_last_send += dt;
        if self.since_last_send < self.config.min_interval {
            return false;
        }
        let send = match self.last_sent {
            None => true,
            Some(_) if self.since_last_send >= self.config.heartbeat => true,
            Some(last) => position.distance(last) > self.config.movement_threshold,
        };
        if send {
            self.since_last_send = Duration::ZERO;
            self.last_sent = Some(position);
        }
        send
    }

    /// Position of the last send.
    pub fn last_sent(&self) -> Option<Vec3> {
        self.last_sent
    }

    /// Time since the last send.
    pub fn since_last_send(&self) -> Duration {
        self.since_last_send
    }

    /// The tuning in use.
    pub fn config(&self) -> &SendPolicyConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    fn joined() -> PositionSendPolicy {
        let mut policy = PositionSendPolicy::new(SendPolicyConfig::default());
        // Baseline send at the origin.
        let mut sent = false;
        for _ in 0..5 {
            sent |= policy.update(TICK, Vec3::ZERO);
        }
        assert!(sent, "first update goes out after the minimum interval");
        policy
    }

    #[test]
    fn test_first_update_waits_for_min_interval() {
        let mut policy = PositionSendPolicy::new(SendPolicyConfig::default());
        for _ in 0..4 {
            assert!(!policy.update(TICK, Vec3::ZERO));
        }
        assert!(policy.update(TICK, Vec3::ZERO));
        assert_eq!(policy.last_sent(), Some(Vec3::ZERO));
    }

    #[test]
    fn test_stationary_player_sends_every_heartbeat() {
        let mut policy = joined();
        let mut sends = 0;
        // 3 seconds of standing still.
        for _ in 0..300 {
            if policy.update(TICK, Vec3::ZERO) {
                sends += 1;
            }
        }
        assert_eq!(sends, 3);
    }

    #[test]
    fn test_heartbeat_gap_never_exceeded() {
        let mut policy = joined();
        let mut gap = Duration::ZERO;
        for _ in 0..500 {
            gap += TICK;
            if policy.update(TICK, Vec3::ZERO) {
                assert!(gap <= Duration::from_secs(1), "gap {gap:?} exceeds heartbeat");
                gap = Duration::ZERO;
            }
        }
    }

    #[test]
    fn test_continuous_motion_capped_by_min_interval() {
        let mut policy = joined();
        let mut position = Vec3::ZERO;
        let mut sends = 0;
        // Moving 1 unit per tick for one second.
        for _ in 0..100 {
            position.x += 1.0;
            if policy.update(TICK, position) {
                sends += 1;
            }
        }
        assert_eq!(sends, 20, "one send per 50 ms");
    }

    #[test]
    fn test_small_motion_waits_for_heartbeat() {
        let mut policy = joined();
        let mut position = Vec3::ZERO;
        for _ in 0..99 {
            position.x += 0.0005;
            assert!(!policy.update(TICK, position), "drift below threshold must not send");
        }
        assert!(policy.update(TICK, position), "heartbeat sends anyway");
    }

    #[test]
    fn test_send_resets_baseline() {
        let mut policy = joined();
        for _ in 0..5 {
            policy.update(TICK, Vec3::ZERO);
        }
        assert!(policy.update(TICK, Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(policy.last_sent(), Some(Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(policy.since_last_send(), Duration::ZERO);
    }
}
