//! One measured invocation

use crate::alert::{AlertDispatcher, AlertKind};
use crate::caller::Frame;
use crate::chain::{CallChain, CallSite};
use crate::limits::Limits;
use crate::monitor::Monitor;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A measurement started by [`Monitor::new_session`].
///
/// The session owns a copy of the monitor's limits taken at creation, so
/// reconfiguring the monitor afterwards does not change how an outstanding
/// session is judged. The setters below override that copy for this session
/// only.
#[derive(Debug, Clone)]
pub struct Session {
    start: Instant,
    started_at: DateTime<Utc>,
    limits: Limits,
    site: Arc<CallSite>,
    dispatcher: AlertDispatcher,
}

impl Session {
    #[inline(never)]
    pub(crate) fn begin(monitor: &Monitor) -> Self {
        let resolution = monitor.resolver().resolve();
        let site = Arc::new(CallSite::new(resolution, monitor.trampolines()));

        // the clock starts after the stack walk so symbolication is not measured
        let start = Instant::now();
        let started_at = Utc::now();
        let limits = monitor.limits();

        tracing::trace!(
            target: "timemark",
            file = %site.caller().file,
            line = site.caller().line,
            function = %site.caller().function,
            "session started"
        );

        let session = Self {
            start,
            started_at,
            limits,
            site,
            dispatcher: monitor.dispatcher().clone(),
        };
        if session.limits.alert_at_start {
            session.dispatch_start();
        }
        session
    }

    /// Alert at start for this session.
    ///
    /// The session has already started, so START is dispatched right away
    /// unless it was dispatched at creation.
    pub fn alert_at_start(mut self) -> Self {
        if !self.limits.alert_at_start {
            self.limits.alert_at_start = true;
            self.dispatch_start();
        }
        self
    }

    /// Alert on check when no limit fired, for this session.
    pub fn alert_at_end(mut self) -> Self {
        self.limits.alert_at_end = true;
        self
    }

    /// Override the more limit for this session.
    pub fn alert_if_more(mut self, limit: Duration) -> Self {
        self.limits.more_limit = limit;
        self
    }

    /// Override the less limit for this session.
    pub fn alert_if_less(mut self, limit: Duration) -> Self {
        self.limits.less_limit = limit;
        self
    }

    /// Compare the time since start against the limits and dispatch at most
    /// one alert.
    ///
    /// Each call re-evaluates from the same start, so checking twice can
    /// alert twice. Returns the kind that was dispatched.
    pub fn check(&self) -> Option<AlertKind> {
        let elapsed = self.start.elapsed();
        let outcome = self.limits.evaluate(elapsed);

        tracing::trace!(
            target: "timemark",
            function = %self.site.caller().function,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            alert = outcome.map(|kind| kind.as_str()),
            "session checked"
        );

        if let Some(kind) = outcome {
            self.dispatcher.dispatch(kind, &self.site, Utc::now(), elapsed);
        }
        outcome
    }

    /// Check the session when the returned guard is dropped.
    pub fn guard(self) -> SessionGuard {
        SessionGuard {
            session: self,
            armed: true,
        }
    }

    /// Time since the session started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Monotonic start instant.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Wall-clock start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Limits this session is judged by.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The code that started the session.
    pub fn caller(&self) -> &Frame {
        self.site.caller()
    }

    /// Frames leading to [`Session::caller`], oldest first.
    pub fn chain(&self) -> &CallChain {
        self.site.chain()
    }

    fn dispatch_start(&self) {
        self.dispatcher
            .dispatch(AlertKind::Start, &self.site, self.started_at, Duration::ZERO);
    }
}

/// Checks its session when dropped, on every way out of a scope.
///
/// If the alert callback panics while the scope is already unwinding, the
/// process aborts like any other panic during unwinding.
#[must_use = "dropping the guard immediately checks the session"]
#[derive(Debug)]
pub struct SessionGuard {
    session: Session,
    armed: bool,
}

impl SessionGuard {
    /// The guarded session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Give the session back without checking it.
    pub fn disarm(mut self) -> Session {
        self.armed = false;
        self.session.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.session.check();
        }
    }
}

/// Measure the rest of the enclosing scope with a monitor.
///
/// # Example
///
/// ```rust
/// use timemark::{watch_scope, Monitor};
/// use std::time::Duration;
///
/// fn save(monitor: &Monitor) {
///     watch_scope!(monitor);
///     // ... measured work ...
/// } // checked here
///
/// let monitor = Monitor::new(|alert| println!("{alert}"));
/// monitor.alert_if_more(Duration::from_millis(200));
/// save(&monitor);
/// ```
#[macro_export]
macro_rules! watch_scope {
    ($monitor:expr) => {
        let _timemark_guard = $crate::Monitor::new_session(&$monitor).guard();
    };
}
