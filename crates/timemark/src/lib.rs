//! Function Duration Watchdog
//!
//! This crate measures how long a piece of code takes and calls back when
//! the time falls outside configured limits:
//! - [`Monitor`] holds the limits and the alert callback for one watch-point
//! - [`Session`] measures one invocation and is judged once by [`Session::check`]
//! - Alerts name the code that started the session, found by walking the
//!   stack past this crate's own frames
//!
//! Only one alert fires per check: MORE_LIMIT, else LESS_LIMIT, else FINISH
//! when `alert_at_end` is set. START fires when the session is created.
//!
//! # Example
//!
//! ```rust
//! use timemark::{watch_scope, AlertKind, Monitor};
//! use std::sync::LazyLock;
//! use std::time::Duration;
//!
//! static SAVE: LazyLock<Monitor> = LazyLock::new(|| {
//!     let monitor = Monitor::new(|alert| {
//!         if alert.kind() == AlertKind::MoreLimit {
//!             eprintln!("{alert} via {}", alert.render_chain(3));
//!         }
//!     });
//!     monitor.alert_if_more(Duration::from_millis(200));
//!     monitor
//! });
//!
//! fn save_document() {
//!     watch_scope!(SAVE);
//!     // ... work ...
//! }
//!
//! save_document();
//! ```
//!
//! # Caller resolution
//!
//! Resolution needs debug info. Without it the caller's file and function
//! are empty and its line is 0; measuring and alerting work the same.

mod alert;
mod caller;
mod chain;
mod error;
mod limits;
mod monitor;
mod session;

pub use alert::{
    console_alert, default_alert, write_alert, AlertData, AlertDispatcher, AlertFn, AlertKind,
};
pub use caller::{
    resolve_frames, strip_function_prefix, BacktraceSource, CallerResolver, Frame, FrameSource,
    Resolution, Sentinel, DEFAULT_CAPTURE_DEPTH, FALLBACK_FRAME_INDEX,
};
pub use chain::{default_trampoline_filter, is_runtime_trampoline, CallChain, CallSite, FrameFilter};
pub use error::{TimemarkError, TimemarkResult};
pub use limits::{Limits, LESS_LIMIT_DISABLED, MORE_LIMIT_DISABLED};
pub use monitor::Monitor;
pub use session::{Session, SessionGuard};

/// Re-export for convenience
pub use std::time::Duration;
