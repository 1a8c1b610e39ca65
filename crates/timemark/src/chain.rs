//! Call chains and their compact rendering

use crate::caller::{Frame, Resolution};
use std::fmt;
use std::sync::Arc;

/// Decides whether a frame is a runtime trampoline to leave out of rendered
/// chains.
pub type FrameFilter = Arc<dyn Fn(&Frame) -> bool + Send + Sync>;

/// Rust runtime shims between the OS entry point and user code.
const RUNTIME_SHIMS: &[&str] = &[
    "std::rt::lang_start",
    "std::sys::backtrace::__rust_begin_short_backtrace",
    "std::sys_common::backtrace::__rust_begin_short_backtrace",
    "std::panicking::try",
    "std::panicking::catch_unwind",
    "std::panic::catch_unwind",
    "core::ops::function::FnOnce::call_once",
    "<alloc::boxed::Box<F,A> as core::ops::function::FnOnce<Args>>::call_once",
];

#[cfg(unix)]
const PLATFORM_SHIMS: &[&str] = &[
    "_start",
    "__libc_start_main",
    "__libc_start_call_main",
    "start_thread",
    "clone",
    "clone3",
    "thread_start",
    "_pthread_start",
];

#[cfg(windows)]
const PLATFORM_SHIMS: &[&str] = &[
    "BaseThreadInitThunk",
    "RtlUserThreadStart",
    "mainCRTStartup",
    "__scrt_common_main_seh",
];

#[cfg(not(any(unix, windows)))]
const PLATFORM_SHIMS: &[&str] = &[];

/// Default trampoline predicate for the current platform.
///
/// Matches unsymbolicated frames, Rust runtime entry shims and the
/// platform's thread/process start routines.
pub fn is_runtime_trampoline(frame: &Frame) -> bool {
    if !frame.is_resolved() && frame.function.is_empty() {
        return true;
    }
    RUNTIME_SHIMS
        .iter()
        .any(|shim| frame.function.starts_with(shim))
        || PLATFORM_SHIMS.contains(&frame.function.as_str())
}

/// The default filter as a shareable [`FrameFilter`].
pub fn default_trampoline_filter() -> FrameFilter {
    Arc::new(is_runtime_trampoline)
}

/// Frames leading to a measured call, oldest first.
#[derive(Clone)]
pub struct CallChain {
    frames: Vec<Frame>,
    filter: FrameFilter,
}

impl CallChain {
    /// Create a chain filtered by [`is_runtime_trampoline`].
    pub fn new(frames: Vec<Frame>) -> Self {
        Self::with_filter(frames, default_trampoline_filter())
    }

    /// Create a chain with a custom trampoline predicate.
    pub fn with_filter(frames: Vec<Frame>, filter: FrameFilter) -> Self {
        Self { frames, filter }
    }

    /// All captured frames, trampolines included.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of captured frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames that survive the trampoline filter.
    pub fn visible(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().filter(|frame| !(self.filter)(*frame))
    }

    /// Render the `n` innermost visible frames as `file:line->file:line`.
    ///
    /// Files are reduced to basenames and a file repeated from the previous
    /// frame is left blank, so `main.rs:3->:12->db.rs:40` reads as two frames
    /// in `main.rs` followed by one in `db.rs`.
    pub fn render(&self, n: usize) -> String {
        let visible: Vec<&Frame> = self.visible().collect();
        let start = visible.len().saturating_sub(n);

        let mut out = String::new();
        let mut previous: Option<&str> = None;
        for frame in &visible[start..] {
            if previous.is_some() {
                out.push_str("->");
            }
            if previous != Some(frame.file.as_str()) {
                out.push_str(frame.basename());
            }
            out.push(':');
            out.push_str(&frame.line.to_string());
            previous = Some(frame.file.as_str());
        }
        out
    }
}

impl fmt::Debug for CallChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallChain")
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CallChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(usize::MAX))
    }
}

/// Where a session was started: the resolved caller and the chain leading
/// to it. Shared by a session and every alert it dispatches.
#[derive(Debug, Clone)]
pub struct CallSite {
    caller: Frame,
    chain: CallChain,
}

impl CallSite {
    /// Build a call site from a resolution.
    pub fn new(resolution: Resolution, filter: FrameFilter) -> Self {
        Self {
            caller: resolution.caller,
            chain: CallChain::with_filter(resolution.chain, filter),
        }
    }

    /// The resolved external caller.
    pub fn caller(&self) -> &Frame {
        &self.caller
    }

    /// The chain ending at the caller.
    pub fn chain(&self) -> &CallChain {
        &self.chain
    }
}
