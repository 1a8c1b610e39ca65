//! Alert records and synchronous dispatch

use crate::caller::Frame;
use crate::chain::{CallChain, CallSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

/// Which condition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// A session started
    Start,
    /// The measured scope ran longer than the more limit
    MoreLimit,
    /// The measured scope finished faster than the less limit
    LessLimit,
    /// The measured scope finished within its limits
    Finish,
}

impl AlertKind {
    /// All kinds in declaration order.
    pub const ALL: [AlertKind; 4] = [
        AlertKind::Start,
        AlertKind::MoreLimit,
        AlertKind::LessLimit,
        AlertKind::Finish,
    ];

    /// Upper-case name used in formatted alerts.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Start => "START",
            AlertKind::MoreLimit => "MORE_LIMIT",
            AlertKind::LessLimit => "LESS_LIMIT",
            AlertKind::Finish => "FINISH",
        }
    }

    /// Check if this kind reports a crossed threshold.
    pub fn is_violation(&self) -> bool {
        matches!(self, AlertKind::MoreLimit | AlertKind::LessLimit)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked for every alert, on the thread that triggered it.
pub type AlertFn = Arc<dyn Fn(&AlertData) + Send + Sync>;

/// One alert, handed to the callback by reference.
#[derive(Debug, Clone)]
pub struct AlertData {
    kind: AlertKind,
    site: Arc<CallSite>,
    when: DateTime<Utc>,
    elapsed: Duration,
}

impl AlertData {
    /// Which condition fired.
    pub fn kind(&self) -> AlertKind {
        self.kind
    }

    /// Upper-case name of [`AlertData::kind`].
    pub fn kind_name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Source file of the measured caller.
    pub fn file(&self) -> &str {
        &self.site.caller().file
    }

    /// Line of the measured caller, 0 when unknown.
    pub fn line(&self) -> u32 {
        self.site.caller().line
    }

    /// Function path of the measured caller.
    pub fn function(&self) -> &str {
        &self.site.caller().function
    }

    /// The measured caller as a frame.
    pub fn caller(&self) -> &Frame {
        self.site.caller()
    }

    /// Frames leading to the measured caller, oldest first.
    pub fn chain(&self) -> &CallChain {
        self.site.chain()
    }

    /// Render the `n` innermost frames of the chain.
    pub fn render_chain(&self, n: usize) -> String {
        self.site.chain().render(n)
    }

    /// Wall-clock time the alert was raised. START alerts carry the session's
    /// start time.
    pub fn when(&self) -> DateTime<Utc> {
        self.when
    }

    /// Time spent in the measured scope; zero for START.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl fmt::Display for AlertData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{} function [{}] worked ",
            self.kind,
            self.file(),
            self.line(),
            self.function(),
        )?;
        let elapsed_ms = u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX);
        if elapsed_ms == 0 {
            f.write_str("0s")?;
        } else {
            write!(f, "{:?}", Duration::from_millis(elapsed_ms))?;
        }
        f.write_str(" !")
    }
}

/// Builds alert records and hands them to the user callback.
///
/// Dispatch is synchronous: the callback runs inside `new_session()` or
/// `check()`, and a panic in it unwinds through the caller.
#[derive(Clone)]
pub struct AlertDispatcher {
    alert: AlertFn,
}

impl AlertDispatcher {
    /// Dispatch to `alert`.
    pub fn new(alert: AlertFn) -> Self {
        Self { alert }
    }

    /// Dispatch to `alert`, or to [`default_alert`] when `None`.
    pub fn or_default(alert: Option<AlertFn>) -> Self {
        alert.map_or_else(Self::default, Self::new)
    }

    /// Build the alert and invoke the callback.
    pub fn dispatch(
        &self,
        kind: AlertKind,
        site: &Arc<CallSite>,
        when: DateTime<Utc>,
        elapsed: Duration,
    ) {
        let data = AlertData {
            kind,
            site: Arc::clone(site),
            when,
            elapsed,
        };

        tracing::debug!(
            target: "timemark",
            kind = kind.as_str(),
            file = data.file(),
            line = data.line(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "dispatching alert"
        );

        (self.alert)(&data);
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(default_alert))
    }
}

impl fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertDispatcher").finish_non_exhaustive()
    }
}

/// Default callback: prints the formatted alert to stdout and logs it
/// through `tracing`.
///
/// Threshold violations are logged at `WARN`, START and FINISH at `INFO`.
pub fn default_alert(alert: &AlertData) {
    console_alert(alert);
    if alert.kind().is_violation() {
        tracing::warn!(
            target: "timemark",
            kind = alert.kind_name(),
            chain = %alert.render_chain(5),
            "{}",
            alert
        );
    } else {
        tracing::info!(target: "timemark", kind = alert.kind_name(), "{}", alert);
    }
}

/// Callback that prints the formatted alert to stdout.
///
/// A closed stdout is ignored.
pub fn console_alert(alert: &AlertData) {
    let _ = write_alert(&mut io::stdout().lock(), alert);
}

/// Write the formatted alert as one line.
pub fn write_alert<W: Write>(out: &mut W, alert: &AlertData) -> io::Result<()> {
    writeln!(out, "{alert}")
}
