//! Long-lived watch-point configuration

use crate::alert::{AlertData, AlertDispatcher, AlertFn};
use crate::caller::CallerResolver;
use crate::chain::{default_trampoline_filter, FrameFilter};
use crate::limits::Limits;
use crate::session::Session;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Thresholds and an alert callback for one logical watch-point.
///
/// A monitor is meant to live as long as the code it watches and to be
/// shared between threads. Setters take `&self` and return it for chaining;
/// each one updates the whole [`Limits`] value under a single lock, so a
/// concurrent [`Monitor::new_session`] sees either the old or the new
/// configuration, never a mix.
///
/// # Example
///
/// ```rust
/// use timemark::Monitor;
/// use std::time::Duration;
///
/// let monitor = Monitor::new(|alert| println!("{alert}"));
/// monitor
///     .alert_if_more(Duration::from_millis(200))
///     .alert_at_end();
///
/// let session = monitor.new_session();
/// // ... measured work ...
/// session.check();
/// ```
pub struct Monitor {
    limits: Mutex<Limits>,
    dispatcher: AlertDispatcher,
    resolver: Arc<CallerResolver>,
    trampolines: FrameFilter,
}

impl Monitor {
    /// Create a monitor that reports alerts to `alert`.
    pub fn new<F>(alert: F) -> Self
    where
        F: Fn(&AlertData) + Send + Sync + 'static,
    {
        Self::with_dispatcher(AlertDispatcher::new(Arc::new(alert)))
    }

    /// Create a monitor with an optional callback.
    ///
    /// `None` selects [`default_alert`](crate::default_alert).
    pub fn with_alert(alert: Option<AlertFn>) -> Self {
        Self::with_dispatcher(AlertDispatcher::or_default(alert))
    }

    fn with_dispatcher(dispatcher: AlertDispatcher) -> Self {
        Self {
            limits: Mutex::new(Limits::default()),
            dispatcher,
            resolver: CallerResolver::shared(),
            trampolines: default_trampoline_filter(),
        }
    }

    /// Start from `limits` instead of the disabled defaults.
    pub fn with_limits(self, limits: Limits) -> Self {
        self.set_limits(limits);
        self
    }

    /// Resolve callers with `resolver` instead of the shared native one.
    pub fn with_resolver(mut self, resolver: Arc<CallerResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Leave frames matching `filter` out of rendered call chains.
    pub fn with_trampoline_filter(mut self, filter: FrameFilter) -> Self {
        self.trampolines = filter;
        self
    }

    /// Alert every time a session starts.
    pub fn alert_at_start(&self) -> &Self {
        self.config().alert_at_start = true;
        self
    }

    /// Alert when a session is checked and no limit fired.
    pub fn alert_at_end(&self) -> &Self {
        self.config().alert_at_end = true;
        self
    }

    /// Alert when a session runs longer than `limit`.
    pub fn alert_if_more(&self, limit: Duration) -> &Self {
        self.config().more_limit = limit;
        self
    }

    /// Alert when a session finishes faster than `limit`.
    pub fn alert_if_less(&self, limit: Duration) -> &Self {
        self.config().less_limit = limit;
        self
    }

    /// Replace the whole configuration at once.
    pub fn set_limits(&self, limits: Limits) -> &Self {
        *self.config() = limits;
        tracing::debug!(target: "timemark", ?limits, "monitor limits replaced");
        self
    }

    /// Current configuration.
    pub fn limits(&self) -> Limits {
        *self.config()
    }

    /// Start measuring.
    ///
    /// Resolves the calling code, copies the current limits into the
    /// session, and dispatches START before returning when enabled.
    #[inline(never)]
    pub fn new_session(&self) -> Session {
        Session::begin(self)
    }

    /// Run `f` inside a session, checking it however `f` exits.
    pub fn watch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.new_session().guard();
        f()
    }

    pub(crate) fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    pub(crate) fn resolver(&self) -> &CallerResolver {
        &self.resolver
    }

    pub(crate) fn trampolines(&self) -> FrameFilter {
        Arc::clone(&self.trampolines)
    }

    // Limits is plain data, a panic elsewhere cannot leave it half-written
    fn config(&self) -> MutexGuard<'_, Limits> {
        self.limits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Monitor {
    /// A monitor reporting through [`default_alert`](crate::default_alert).
    fn default() -> Self {
        Self::with_alert(None)
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("limits", &self.limits())
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MORE_LIMIT_DISABLED;
    use std::thread;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_monitor_defaults() {
        let monitor = Monitor::default();
        assert_eq!(monitor.limits(), Limits::default());
        assert_eq!(monitor.limits().more_limit, MORE_LIMIT_DISABLED);
    }

    #[test]
    fn test_setters_chain_on_same_monitor() {
        let monitor = Monitor::new(|_| {});
        let chained = monitor
            .alert_at_start()
            .alert_at_end()
            .alert_if_less(ms(100))
            .alert_if_more(ms(300));

        assert!(std::ptr::eq(chained, &monitor));
        let limits = monitor.limits();
        assert!(limits.alert_at_start);
        assert!(limits.alert_at_end);
        assert_eq!(limits.less_limit, ms(100));
        assert_eq!(limits.more_limit, ms(300));
    }

    #[test]
    fn test_later_setter_wins() {
        let monitor = Monitor::new(|_| {});
        let first = monitor.alert_if_more(ms(1000));
        let second = first.alert_if_more(ms(2000));
        assert_eq!(second.limits().more_limit, ms(2000));
        assert_eq!(monitor.limits().more_limit, ms(2000));
    }

    #[test]
    fn test_with_limits() {
        let limits = Limits::default().with_less_limit(ms(5)).with_alert_at_end();
        let monitor = Monitor::new(|_| {}).with_limits(limits);
        assert_eq!(monitor.limits(), limits);
    }

    #[test]
    fn test_monitor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Monitor>();
    }

    #[test]
    fn test_concurrent_reconfiguration_is_never_torn() {
        let slow = Limits::default()
            .with_more_limit(ms(100))
            .with_less_limit(ms(10))
            .with_alert_at_start();
        let fast = Limits::default().with_more_limit(ms(5)).with_alert_at_end();

        let monitor = Arc::new(Monitor::new(|_| {}).with_limits(slow));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    for n in 0..500 {
                        monitor.set_limits(if (n + i) % 2 == 0 { slow } else { fast });
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let seen = monitor.limits();
                        assert!(seen == slow || seen == fast, "torn read: {seen:?}");
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let monitor = Arc::new(Monitor::new(|_| {}));
        let poisoner = Arc::clone(&monitor);
        let _ = thread::spawn(move || {
            let _held = poisoner.limits.lock().unwrap();
            panic!("poison");
        })
        .join();

        monitor.alert_if_more(ms(7));
        assert_eq!(monitor.limits().more_limit, ms(7));
    }
}
