//! Failure-streak state machine.
//!
//! [`transition`] is pure: it takes the stored [`AlertState`] and whether the
//! latest probe was up, and yields the next state plus at most one event.

use chrono::{DateTime, Duration, Utc};

use crate::db::AlertState;

/// Thresholds governing alert emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertPolicy {
    /// Consecutive down outcomes that trigger a failure alert, at least 1.
    pub threshold: u32,
    /// Minimum time between two failure alerts.
    pub cooldown: Duration,
}

impl AlertPolicy {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
        }
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::new(2, Duration::minutes(15))
    }
}

/// An alert to hand to the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    Failure { consecutive_failures: u32 },
    Recovery,
}

/// Result of feeding one outcome into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: AlertState,
    pub event: Option<AlertEvent>,
}

/// Compute the next alert state for a target.
///
/// A failure event fires only on the outcome where the streak first equals
/// the threshold, and only outside the cooldown. Recovery ignores the cooldown.
pub fn transition(
    current: &AlertState,
    up: bool,
    alert_recovery: bool,
    policy: &AlertPolicy,
    now: DateTime<Utc>,
) -> Transition {
    let mut state = current.clone();

    if up {
        let event = (state.alerting && alert_recovery).then_some(AlertEvent::Recovery);
        state.consecutive_failures = 0;
        state.alerting = false;
        return Transition { state, event };
    }

    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
    if state.consecutive_failures != policy.threshold {
        return Transition { state, event: None };
    }

    state.alerting = true;
    let cooled_down = match state.last_alerted_at {
        None => true,
        Some(last) => now - last >= policy.cooldown,
    };
    if !cooled_down {
        return Transition { state, event: None };
    }

    state.last_alerted_at = Some(now);
    Transition {
        event: Some(AlertEvent::Failure {
            consecutive_failures: state.consecutive_failures,
        }),
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &AlertState, up: bool, now: DateTime<Utc>) -> Transition {
        transition(state, up, true, &AlertPolicy::default(), now)
    }

    #[test]
    fn test_failure_fires_once_per_streak() {
        let now = Utc::now();
        let mut state = AlertState::default();
        let mut events = Vec::new();

        for i in 0..10 {
            let t = feed(&state, false, now + Duration::minutes(i * 30));
            events.extend(t.event);
            state = t.state;
        }

        assert_eq!(state.consecutive_failures, 10);
        assert!(state.alerting);
        assert_eq!(
            events,
            vec![AlertEvent::Failure {
                consecutive_failures: 2
            }]
        );
    }

    #[test]
    fn test_threshold_of_one() {
        let policy = AlertPolicy::new(0, Duration::minutes(15));
        assert_eq!(policy.threshold, 1);

        let t = transition(&AlertState::default(), false, true, &policy, Utc::now());
        assert_eq!(
            t.event,
            Some(AlertEvent::Failure {
                consecutive_failures: 1
            })
        );
    }

    #[test]
    fn test_recovery_requires_alerting() {
        let now = Utc::now();

        // One failure below the threshold, then up: nothing to recover from.
        let below = feed(&AlertState::default(), false, now);
        let t = feed(&below.state, true, now);
        assert_eq!(t.event, None);
        assert_eq!(t.state.consecutive_failures, 0);

        // Never failed at all.
        assert_eq!(feed(&AlertState::default(), true, now).event, None);
    }

    #[test]
    fn test_recovery_respects_opt_out() {
        let alerting = AlertState {
            consecutive_failures: 4,
            last_alerted_at: Some(Utc::now()),
            alerting: true,
        };
        let t = transition(&alerting, true, false, &AlertPolicy::default(), Utc::now());
        assert_eq!(t.event, None);
        assert!(!t.state.alerting);
        assert_eq!(t.state.consecutive_failures, 0);
    }

    #[test]
    fn test_cooldown_suppresses_second_crossing() {
        let start = Utc::now();
        let mut state = AlertState::default();
        let mut events = Vec::new();

        // down, down (alert), up (recovery), down, down (within cooldown)
        for (minute, up) in [(0, false), (1, false), (2, true), (3, false), (4, false)] {
            let t = feed(&state, up, start + Duration::minutes(minute));
            events.extend(t.event);
            state = t.state;
        }

        assert_eq!(
            events,
            vec![
                AlertEvent::Failure {
                    consecutive_failures: 2
                },
                AlertEvent::Recovery
            ]
        );
        assert_eq!(state.consecutive_failures, 2);
        assert!(state.alerting);
        assert_eq!(state.last_alerted_at, Some(start + Duration::minutes(1)));

        // Once the cooldown has elapsed a new streak alerts again.
        let recovered = feed(&state, true, start + Duration::minutes(30)).state;
        let first = feed(&recovered, false, start + Duration::minutes(31)).state;
        let second = feed(&first, false, start + Duration::minutes(32));
        assert_eq!(
            second.event,
            Some(AlertEvent::Failure {
                consecutive_failures: 2
            })
        );
    }

    #[test]
    fn test_documented_scenario() {
        let now = Utc::now();

        let first = feed(&AlertState::default(), false, now);
        assert_eq!(first.state.consecutive_failures, 1);
        assert_eq!(first.event, None);

        let second = feed(&first.state, false, now + Duration::seconds(60));
        assert_eq!(second.state.consecutive_failures, 2);
        assert!(second.state.alerting);
        assert!(matches!(second.event, Some(AlertEvent::Failure { .. })));

        let third = feed(&second.state, false, now + Duration::seconds(120));
        assert_eq!(third.state.consecutive_failures, 3);
        assert_eq!(third.event, None);

        let back = feed(&third.state, true, now + Duration::seconds(180));
        assert_eq!(back.event, Some(AlertEvent::Recovery));
        assert_eq!(back.state.consecutive_failures, 0);
        assert!(!back.state.alerting);
    }
}
