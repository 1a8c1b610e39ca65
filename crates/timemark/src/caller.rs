//! Caller identification by stack walking
//!
//! A session has to report the code that asked for it, not the library
//! function that happened to capture the stack. [`CallerResolver`] captures a
//! snapshot of frames, skips every frame whose source lives in this crate, and
//! reports the first frame after them.
//!
//! Frame capture sits behind [`FrameSource`] so the walk can be tested with
//! synthetic stacks. [`BacktraceSource`] is the native implementation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Maximum number of frames kept in a snapshot.
pub const DEFAULT_CAPTURE_DEPTH: usize = 30;

/// Frame reported when no internal frame is found in the snapshot:
/// `Session::begin` <- `Monitor::new_session` <- caller.
pub const FALLBACK_FRAME_INDEX: usize = 2;

/// Crate names the toolchain invents for code without a package of its own.
/// rustdoc compiles every doctest as `rust_out`.
const ANONYMOUS_CRATE_PREFIXES: &[&str] = &["rust_out::"];

/// Demangled name of [`locate_self`], used to find our own source location.
const SELF_PROBE_SYMBOL: &str = "caller::locate_self";

/// Demangled name of the native capture function. Frames up to and including
/// it belong to the unwinder.
const CAPTURE_SYMBOL: &str = "BacktraceSource as timemark::caller::FrameSource>::capture";

/// Extra frames the unwinder itself adds on top of a native capture.
const UNWINDER_HEADROOM: usize = 16;

/// One symbolicated stack frame.
///
/// Unresolved frames keep an empty file, line 0 and an empty function name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Source file path as recorded in debug info
    pub file: String,
    /// Line within `file`, 0 when unknown
    pub line: u32,
    /// Demangled, hash-free function path
    pub function: String,
}

impl Frame {
    /// Create a frame from its parts.
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }

    /// Check if debug info located this frame in a source file.
    pub fn is_resolved(&self) -> bool {
        !self.file.is_empty()
    }

    /// File name without its directories.
    pub fn basename(&self) -> &str {
        self.file.rsplit(['/', '\\']).next().unwrap_or(&self.file)
    }

    fn from_symbol(symbol: &backtrace::Symbol) -> Self {
        Self {
            file: symbol
                .filename()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
            line: symbol.lineno().unwrap_or(0),
            // `{:#}` drops the trailing `::h<hash>`
            function: symbol
                .name()
                .map(|name| format!("{name:#}"))
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Produces stack snapshots, innermost frame first.
pub trait FrameSource: Send + Sync {
    /// Capture at most `depth` frames.
    ///
    /// The first frame returned is `skip` frames above the function that
    /// called `capture`; with `skip == 0` it is that function itself.
    fn capture(&self, skip: usize, depth: usize) -> Vec<Frame>;
}

/// Captures the real stack with the `backtrace` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceSource;

impl FrameSource for BacktraceSource {
    #[inline(never)]
    fn capture(&self, skip: usize, depth: usize) -> Vec<Frame> {
        let limit = skip + depth + UNWINDER_HEADROOM;
        let mut frames = Vec::with_capacity(limit);

        backtrace::trace(|raw| {
            let before = frames.len();
            // Inlined calls resolve to several symbols, innermost first
            backtrace::resolve_frame(raw, |symbol| frames.push(Frame::from_symbol(symbol)));
            if frames.len() == before {
                frames.push(Frame::default());
            }
            frames.len() < limit
        });

        let start = frames
            .iter()
            .position(|frame| frame.function.ends_with(CAPTURE_SYMBOL))
            .map_or(0, |index| index + 1);

        frames.into_iter().skip(start + skip).take(depth).collect()
    }
}

/// Source location of the library itself.
///
/// A frame is internal when its file lies under the sentinel's directory.
/// An unknown sentinel matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentinel {
    root: PathBuf,
}

impl Sentinel {
    /// Treat every file under `root` as internal.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Treat every file next to `file` as internal.
    pub fn from_file(file: &str) -> Self {
        Path::new(file)
            .parent()
            .map(Self::new)
            .unwrap_or_default()
    }

    /// The directory considered internal.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if the library's location could be determined.
    pub fn is_known(&self) -> bool {
        !self.root.as_os_str().is_empty()
    }

    /// Check if `frame` belongs to the library.
    pub fn matches(&self, frame: &Frame) -> bool {
        self.is_known() && frame.is_resolved() && Path::new(&frame.file).starts_with(&self.root)
    }
}

/// Result of walking one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// The first external frame, or an empty frame when none is known
    pub caller: Frame,
    /// Frames from the outermost captured one down to `caller`
    pub chain: Vec<Frame>,
}

/// Walks stack snapshots to find the code that invoked the library.
pub struct CallerResolver {
    source: Box<dyn FrameSource>,
    sentinel: OnceLock<Sentinel>,
    depth: usize,
}

impl CallerResolver {
    /// Resolver over the real stack.
    pub fn native() -> Self {
        Self::with_source(BacktraceSource)
    }

    /// Process-wide native resolver, shared by every monitor that was not
    /// given its own.
    pub fn shared() -> Arc<CallerResolver> {
        static SHARED: OnceLock<Arc<CallerResolver>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(CallerResolver::native())))
    }

    /// Resolver over an arbitrary frame source.
    ///
    /// The sentinel is discovered from the source on first use unless set
    /// with [`CallerResolver::with_sentinel`].
    pub fn with_source(source: impl FrameSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            sentinel: OnceLock::new(),
            depth: DEFAULT_CAPTURE_DEPTH,
        }
    }

    /// Use a fixed sentinel instead of discovering it.
    pub fn with_sentinel(mut self, sentinel: Sentinel) -> Self {
        self.sentinel = OnceLock::from(sentinel);
        self
    }

    /// Limit snapshots to `depth` frames.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Maximum frames per snapshot.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The library's own location, discovered on first call.
    pub fn sentinel(&self) -> &Sentinel {
        self.sentinel.get_or_init(|| {
            let sentinel = locate_self(self.source.as_ref());
            tracing::debug!(
                target: "timemark",
                root = %sentinel.root().display(),
                known = sentinel.is_known(),
                "caller sentinel located"
            );
            sentinel
        })
    }

    /// Capture the current stack and find the external caller.
    ///
    /// Never fails: unsymbolicated stacks resolve to an empty caller.
    #[inline(never)]
    pub fn resolve(&self) -> Resolution {
        let sentinel = self.sentinel();
        // skip this frame, start at our caller
        let frames = self.source.capture(1, self.depth);
        resolve_frames(&frames, sentinel)
    }
}

impl fmt::Debug for CallerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerResolver")
            .field("sentinel", &self.sentinel.get())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Find our own source location by looking at the frame of this function.
#[inline(never)]
fn locate_self(source: &dyn FrameSource) -> Sentinel {
    source
        .capture(0, DEFAULT_CAPTURE_DEPTH)
        .iter()
        .find(|frame| frame.function.ends_with(SELF_PROBE_SYMBOL))
        .map(|frame| Sentinel::from_file(&frame.file))
        .unwrap_or_default()
}

/// Walk `frames` (innermost first) and pick the external caller.
///
/// Frames before the first internal one are skipped too, since they belong
/// to whatever captured the stack. Without any internal frame the walk falls
/// back to [`FALLBACK_FRAME_INDEX`]. A snapshot that ends inside this crate
/// resolves to an empty [`Resolution`].
pub fn resolve_frames(frames: &[Frame], sentinel: &Sentinel) -> Resolution {
    let mut seen_internal = false;
    let external = frames.iter().position(|frame| {
        if sentinel.matches(frame) {
            seen_internal = true;
            false
        } else {
            seen_internal
        }
    });
    let index = match external {
        Some(index) => index,
        None if seen_internal => return Resolution::default(),
        None => FALLBACK_FRAME_INDEX,
    };

    let Some(outer) = frames.get(index..).filter(|outer| !outer.is_empty()) else {
        return Resolution::default();
    };

    let chain: Vec<Frame> = outer.iter().rev().map(strip_frame).collect();
    let caller = strip_frame(&outer[0]);
    Resolution { caller, chain }
}

/// Remove an anonymous crate prefix from a function path.
pub fn strip_function_prefix(function: &str) -> &str {
    ANONYMOUS_CRATE_PREFIXES
        .iter()
        .find_map(|prefix| function.strip_prefix(prefix))
        .unwrap_or(function)
}

fn strip_frame(frame: &Frame) -> Frame {
    Frame {
        function: strip_function_prefix(&frame.function).to_owned(),
        ..frame.clone()
    }
}
