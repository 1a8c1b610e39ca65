//! Threshold configuration for a watch-point

use crate::alert::AlertKind;
use crate::error::{TimemarkError, TimemarkResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value of `more_limit` meaning "never too slow".
pub const MORE_LIMIT_DISABLED: Duration = Duration::MAX;

/// Value of `less_limit` meaning "never too fast".
pub const LESS_LIMIT_DISABLED: Duration = Duration::ZERO;

/// Duration thresholds and start/end flags for one watch-point.
///
/// A limit is active only when it differs from its disabled value. A zero
/// more limit is also inactive, so `Limits::default()` never alerts.
///
/// # Example
///
/// ```rust
/// use timemark::{AlertKind, Limits};
/// use std::time::Duration;
///
/// let limits = Limits::default()
///     .with_more_limit(Duration::from_millis(200))
///     .with_alert_at_end();
///
/// assert_eq!(limits.evaluate(Duration::from_millis(250)), Some(AlertKind::MoreLimit));
/// assert_eq!(limits.evaluate(Duration::from_millis(50)), Some(AlertKind::Finish));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitsConfig", into = "LimitsConfig")]
pub struct Limits {
    /// Alert when the measured scope runs longer than this.
    pub more_limit: Duration,
    /// Alert when the measured scope finishes faster than this.
    pub less_limit: Duration,
    /// Alert as soon as a session starts.
    pub alert_at_start: bool,
    /// Alert when a session is checked and no limit fired.
    pub alert_at_end: bool,
}

impl Limits {
    /// Parse and validate a JSON configuration document.
    ///
    /// Limits are given in `Ms` or `Ns` fields. Absent or `null` limits are
    /// disabled:
    ///
    /// ```rust
    /// let limits = timemark::Limits::from_json(r#"{"moreLimitMs": 300, "alertAtEnd": true}"#).unwrap();
    /// assert!(limits.more_limit_active());
    /// assert!(!limits.less_limit_active());
    /// ```
    pub fn from_json(json: &str) -> TimemarkResult<Self> {
        let limits: Limits = serde_json::from_str(json)?;
        limits.validate()?;
        Ok(limits)
    }

    /// Serialize to the JSON form accepted by [`Limits::from_json`].
    pub fn to_json(&self) -> TimemarkResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reject configurations where both limits are active and no elapsed
    /// time could pass without an alert.
    pub fn validate(&self) -> TimemarkResult<()> {
        if self.more_limit_active()
            && self.less_limit_active()
            && self.less_limit >= self.more_limit
        {
            return Err(TimemarkError::InvertedWindow {
                less: self.less_limit,
                more: self.more_limit,
            });
        }
        Ok(())
    }

    /// Builder method to set the more limit.
    pub fn with_more_limit(mut self, limit: Duration) -> Self {
        self.more_limit = limit;
        self
    }

    /// Builder method to set the less limit.
    pub fn with_less_limit(mut self, limit: Duration) -> Self {
        self.less_limit = limit;
        self
    }

    /// Builder method to enable the START alert.
    pub fn with_alert_at_start(mut self) -> Self {
        self.alert_at_start = true;
        self
    }

    /// Builder method to enable the FINISH alert.
    pub fn with_alert_at_end(mut self) -> Self {
        self.alert_at_end = true;
        self
    }

    /// Check if the more limit takes part in evaluation.
    pub fn more_limit_active(&self) -> bool {
        self.more_limit != MORE_LIMIT_DISABLED && !self.more_limit.is_zero()
    }

    /// Check if the less limit takes part in evaluation.
    pub fn less_limit_active(&self) -> bool {
        self.less_limit != LESS_LIMIT_DISABLED
    }

    /// The more limit, if active.
    pub fn active_more_limit(&self) -> Option<Duration> {
        self.more_limit_active().then_some(self.more_limit)
    }

    /// The less limit, if active.
    pub fn active_less_limit(&self) -> Option<Duration> {
        self.less_limit_active().then_some(self.less_limit)
    }

    /// Decide which alert, if any, a check after `elapsed` fires.
    ///
    /// The rules are mutually exclusive and tried in order: more limit,
    /// less limit, end flag.
    pub fn evaluate(&self, elapsed: Duration) -> Option<AlertKind> {
        if self.more_limit_active() && elapsed > self.more_limit {
            Some(AlertKind::MoreLimit)
        } else if self.less_limit_active() && elapsed < self.less_limit {
            Some(AlertKind::LessLimit)
        } else if self.alert_at_end {
            Some(AlertKind::Finish)
        } else {
            None
        }
    }
}

impl Default for Limits {
    /// Nothing active.
    fn default() -> Self {
        Self {
            more_limit: MORE_LIMIT_DISABLED,
            less_limit: LESS_LIMIT_DISABLED,
            alert_at_start: false,
            alert_at_end: false,
        }
    }
}

/// Wire form of [`Limits`]: `None` when disabled.
///
/// A limit is written in whole milliseconds when that is exact, otherwise in
/// nanoseconds. Either unit is accepted on input, but not both for one limit.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct LimitsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    more_limit_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    more_limit_ns: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    less_limit_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    less_limit_ns: Option<u128>,
    alert_at_start: bool,
    alert_at_end: bool,
}

const NANOS_PER_SEC: u128 = 1_000_000_000;
const NANOS_PER_MILLI: u32 = 1_000_000;

fn wire_limit(
    field: &'static str,
    ms: Option<u64>,
    ns: Option<u128>,
) -> TimemarkResult<Option<Duration>> {
    match (ms, ns) {
        (Some(_), Some(_)) => Err(TimemarkError::InvalidLimit {
            field,
            reason: "given in both ms and ns",
        }),
        (Some(ms), None) => Ok(Some(Duration::from_millis(ms))),
        (None, Some(ns)) => {
            let secs = u64::try_from(ns / NANOS_PER_SEC).map_err(|_| TimemarkError::InvalidLimit {
                field,
                reason: "out of range",
            })?;
            Ok(Some(Duration::new(secs, (ns % NANOS_PER_SEC) as u32)))
        }
        (None, None) => Ok(None),
    }
}

/// Split an active limit into the `(ms, ns)` pair written to the wire.
fn split_limit(limit: Option<Duration>) -> (Option<u64>, Option<u128>) {
    let Some(limit) = limit else {
        return (None, None);
    };
    match u64::try_from(limit.as_millis()) {
        Ok(ms) if limit.subsec_nanos() % NANOS_PER_MILLI == 0 => (Some(ms), None),
        _ => (None, Some(limit.as_nanos())),
    }
}

impl TryFrom<LimitsConfig> for Limits {
    type Error = TimemarkError;

    fn try_from(config: LimitsConfig) -> TimemarkResult<Self> {
        let more = wire_limit("moreLimit", config.more_limit_ms, config.more_limit_ns)?;
        let less = wire_limit("lessLimit", config.less_limit_ms, config.less_limit_ns)?;
        Ok(Self {
            more_limit: more.unwrap_or(MORE_LIMIT_DISABLED),
            less_limit: less.unwrap_or(LESS_LIMIT_DISABLED),
            alert_at_start: config.alert_at_start,
            alert_at_end: config.alert_at_end,
        })
    }
}

impl From<Limits> for LimitsConfig {
    fn from(limits: Limits) -> Self {
        let (more_limit_ms, more_limit_ns) = split_limit(limits.active_more_limit());
        let (less_limit_ms, less_limit_ns) = split_limit(limits.active_less_limit());
        Self {
            more_limit_ms,
            more_limit_ns,
            less_limit_ms,
            less_limit_ns,
            alert_at_start: limits.alert_at_start,
            alert_at_end: limits.alert_at_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_defaults_disabled() {
        let limits = Limits::default();
        assert!(!limits.more_limit_active());
        assert!(!limits.less_limit_active());
        assert_eq!(limits.evaluate(Duration::ZERO), None);
        assert_eq!(limits.evaluate(ms(10_000)), None);
    }

    #[test]
    fn test_zero_more_limit_is_disabled() {
        let limits = Limits::default().with_more_limit(Duration::ZERO);
        assert!(!limits.more_limit_active());
        assert_eq!(limits.evaluate(ms(5)), None);
    }

    #[test]
    fn test_limit_boundaries_are_strict() {
        let limits = Limits::default()
            .with_less_limit(ms(100))
            .with_more_limit(ms(300));

        assert_eq!(limits.evaluate(ms(300)), None);
        assert_eq!(limits.evaluate(ms(100)), None);
        assert_eq!(limits.evaluate(ms(301)), Some(AlertKind::MoreLimit));
        assert_eq!(limits.evaluate(ms(99)), Some(AlertKind::LessLimit));
    }

    #[test]
    fn test_window_with_end_flag() {
        let limits = Limits::default()
            .with_less_limit(ms(200))
            .with_more_limit(ms(300))
            .with_alert_at_end();
        assert_eq!(limits.evaluate(ms(250)), Some(AlertKind::Finish));
    }

    #[test]
    fn test_from_json() {
        let limits = Limits::from_json(
            r#"{"moreLimitMs": 300, "lessLimitMs": 100, "alertAtStart": true}"#,
        )
        .unwrap();
        assert_eq!(limits.more_limit, ms(300));
        assert_eq!(limits.less_limit, ms(100));
        assert!(limits.alert_at_start);
        assert!(!limits.alert_at_end);
    }

    #[test]
    fn test_from_json_empty_object_is_default() {
        assert_eq!(Limits::from_json("{}").unwrap(), Limits::default());
        assert_eq!(
            Limits::from_json(r#"{"moreLimitMs": null}"#).unwrap(),
            Limits::default()
        );
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let err = Limits::from_json(r#"{"maxSameAlerts": 3}"#).unwrap_err();
        assert!(matches!(err, TimemarkError::Parse(_)));
    }

    #[test]
    fn test_from_json_rejects_inverted_window() {
        let err = Limits::from_json(r#"{"moreLimitMs": 100, "lessLimitMs": 100}"#).unwrap_err();
        assert!(matches!(err, TimemarkError::InvertedWindow { .. }));
    }

    #[test]
    fn test_to_json_omits_disabled_limits() {
        let json = Limits::default()
            .with_less_limit(ms(40))
            .with_alert_at_end()
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["moreLimitMs"], serde_json::Value::Null);
        assert_eq!(value["moreLimitNs"], serde_json::Value::Null);
        assert_eq!(value["lessLimitMs"], 40);
        assert_eq!(value["alertAtEnd"], true);
    }

    #[test]
    fn test_submillisecond_limits_survive_json() {
        let limits = Limits::default()
            .with_less_limit(Duration::from_micros(500))
            .with_more_limit(Duration::from_micros(1_500));

        let json = limits.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["lessLimitNs"], 500_000);
        assert_eq!(value["moreLimitNs"], 1_500_000);
        assert_eq!(value["lessLimitMs"], serde_json::Value::Null);

        let back = Limits::from_json(&json).unwrap();
        assert!(back.less_limit_active());
        assert_eq!(back, limits);
    }

    #[test]
    fn test_from_json_accepts_nanoseconds() {
        let limits = Limits::from_json(r#"{"lessLimitNs": 250000, "moreLimitMs": 2}"#).unwrap();
        assert_eq!(limits.less_limit, Duration::from_micros(250));
        assert_eq!(limits.more_limit, ms(2));
    }

    #[test]
    fn test_from_json_rejects_both_units() {
        let err = Limits::from_json(r#"{"moreLimitMs": 1, "moreLimitNs": 1000000}"#).unwrap_err();
        assert!(matches!(err, TimemarkError::Parse(_)));
        assert!(err.to_string().contains("moreLimit"));
    }

    #[test]
    fn test_zero_more_limit_stays_disabled_through_json() {
        let limits = Limits::default().with_more_limit(Duration::ZERO);
        let back = Limits::from_json(&limits.to_json().unwrap()).unwrap();
        assert!(!back.more_limit_active());
    }

    fn any_duration() -> impl Strategy<Value = Duration> {
        (any::<u64>(), 0u32..1_000_000_000).prop_map(|(secs, nanos)| Duration::new(secs, nanos))
    }

    proptest! {
        #[test]
        fn json_preserves_limits(
            more in any_duration(),
            less in any_duration(),
            at_start in any::<bool>(),
            at_end in any::<bool>(),
        ) {
            let limits = Limits {
                more_limit: if more.is_zero() { MORE_LIMIT_DISABLED } else { more },
                less_limit: less,
                alert_at_start: at_start,
                alert_at_end: at_end,
            };
            prop_assume!(limits.validate().is_ok());
            let back = Limits::from_json(&limits.to_json().unwrap()).unwrap();
            prop_assert_eq!(back, limits);
        }

        #[test]
        fn more_limit_wins_over_everything(
            more in 1u64..10_000,
            over in 1u64..10_000,
            less in 0u64..20_000,
            at_end in any::<bool>(),
        ) {
            let mut limits = Limits::default()
                .with_more_limit(ms(more))
                .with_less_limit(ms(less));
            limits.alert_at_end = at_end;
            prop_assert_eq!(limits.evaluate(ms(more + over)), Some(AlertKind::MoreLimit));
        }

        #[test]
        fn less_limit_fires_below_threshold(less in 1u64..10_000, elapsed in 0u64..10_000, at_end in any::<bool>()) {
            prop_assume!(elapsed < less);
            let mut limits = Limits::default().with_less_limit(ms(less));
            limits.alert_at_end = at_end;
            prop_assert_eq!(limits.evaluate(ms(elapsed)), Some(AlertKind::LessLimit));
        }

        #[test]
        fn end_flag_alone_always_finishes(elapsed in 0u64..1_000_000) {
            let limits = Limits::default().with_alert_at_end();
            prop_assert_eq!(limits.evaluate(ms(elapsed)), Some(AlertKind::Finish));
        }

        #[test]
        fn start_flag_never_affects_check(elapsed in 0u64..1_000_000) {
            let limits = Limits::default().with_alert_at_start();
            prop_assert_eq!(limits.evaluate(ms(elapsed)), None);
        }
    }
}
