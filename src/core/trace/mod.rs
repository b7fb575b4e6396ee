//! Stack capture for lock attempts
//!
//! Every lock attempt records the call chain of the requesting thread so a
//! timeout can point at the code that was blocked. Capture goes through the
//! [`TraceProvider`] trait. The default provider walks the native stack with
//! the `backtrace` crate and keeps only instruction pointers; symbols are
//! looked up when a report is built, never on the lock path.

mod parser;
pub use parser::ParsedTrace;

use crate::core::types::get_current_thread_id;
use serde::Serialize;
use std::ffi::c_void;
use std::fmt;

/// Maximum number of frames kept per capture
const MAX_FRAMES: usize = 64;

/// Status recorded for the capturing thread; it is always running when it
/// walks its own stack.
const RUNNING: &str = "running";

/// A single resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Frame {
    /// Demangled function name, without the symbol hash
    pub function: String,
    /// Source location as `file:line`, when debug info is available
    pub location: Option<String>,
}

impl Frame {
    pub fn new(function: impl Into<String>, location: Option<String>) -> Self {
        Frame {
            function: function.into(),
            location,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.function)?;
        if let Some(location) = &self.location {
            write!(f, "\n\t{location}")?;
        }
        Ok(())
    }
}

/// The call chain of one thread at the moment it requested a lock
///
/// The first frame always belongs to the capture routine itself. It is
/// dropped during normalization, see [`ParsedTrace::from_trace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackTrace {
    /// Identifier of the captured thread
    pub thread: String,
    /// Execution status of the captured thread
    pub status: String,
    /// Frames, innermost first
    pub frames: Vec<Frame>,
}

impl StackTrace {
    /// Build a trace for the current thread from already collected frames
    pub fn for_current_thread(frames: Vec<Frame>) -> Self {
        StackTrace {
            thread: get_current_thread_id().to_string(),
            status: RUNNING.to_string(),
            frames,
        }
    }
}

/// Renders the trace as `thread <id> [<status>]:` followed by the frames.
/// This is the textual shape [`ParsedTrace::parse`] understands.
impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {} [{}]:", self.thread, self.status)?;
        for frame in &self.frames {
            write!(f, "\n{frame}")?;
        }
        Ok(())
    }
}

/// A call chain as recorded on the lock path, not yet symbolized
///
/// The default provider stores bare instruction pointers; turning them into
/// [`Frame`]s only happens in [`CapturedTrace::resolve`], which runs when a
/// timeout builds a report.
#[derive(Debug, Clone)]
pub struct CapturedTrace {
    thread: String,
    status: String,
    frames: CapturedFrames,
}

#[derive(Debug, Clone)]
enum CapturedFrames {
    Addresses(Vec<usize>),
    Resolved(Vec<Frame>),
}

impl CapturedTrace {
    /// Record instruction pointers of the current thread
    pub fn from_addresses(ips: Vec<usize>) -> Self {
        CapturedTrace {
            thread: get_current_thread_id().to_string(),
            status: RUNNING.to_string(),
            frames: CapturedFrames::Addresses(ips),
        }
    }

    /// Whether symbols are already available without resolving
    pub fn is_resolved(&self) -> bool {
        matches!(self.frames, CapturedFrames::Resolved(_))
    }

    /// Symbolize the trace, anchoring it at the capture routine
    pub fn resolve(&self) -> StackTrace {
        let frames = match &self.frames {
            CapturedFrames::Resolved(frames) => frames.clone(),
            CapturedFrames::Addresses(ips) => anchor_at_capture(resolve_addresses(ips)),
        };
        StackTrace {
            thread: self.thread.clone(),
            status: self.status.clone(),
            frames,
        }
    }
}

impl From<StackTrace> for CapturedTrace {
    fn from(trace: StackTrace) -> Self {
        CapturedTrace {
            thread: trace.thread,
            status: trace.status,
            frames: CapturedFrames::Resolved(trace.frames),
        }
    }
}

/// Source of stack traces for lock attempts
///
/// `capture` runs on every lock call, so it should only record; expensive
/// work belongs in resolution. Resolved traces must start with the capture
/// routine's own frame.
pub trait TraceProvider: Send + Sync {
    fn capture(&self) -> CapturedTrace;
}

/// Default provider backed by the `backtrace` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceProvider;

impl TraceProvider for BacktraceProvider {
    #[inline(never)]
    fn capture(&self) -> CapturedTrace {
        let mut ips = Vec::with_capacity(MAX_FRAMES);
        backtrace::trace(|frame| {
            ips.push(frame.ip() as usize);
            ips.len() < MAX_FRAMES
        });
        CapturedTrace::from_addresses(ips)
    }
}

fn resolve_addresses(ips: &[usize]) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(ips.len());
    for &ip in ips {
        backtrace::resolve(ip as *mut c_void, |symbol| {
            let function = symbol
                .name()
                .map(|name| format!("{name:#}"))
                .unwrap_or_else(|| "<unknown>".to_string());
            let location = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(line)) => Some(format!("{}:{}", file.display(), line)),
                _ => None,
            };
            frames.push(Frame { function, location });
        });
    }
    frames
}

/// Cut the frames of the unwinder away so the capture routine comes first
///
/// When the capture routine was inlined and cannot be found, a synthetic
/// frame takes its place.
fn anchor_at_capture(mut frames: Vec<Frame>) -> Vec<Frame> {
    // The trace callback runs inside the capture routine, so its closure
    // frames come first; the outermost match is the routine itself.
    if let Some(pos) = frames
        .iter()
        .rposition(|f| f.function.contains("BacktraceProvider"))
    {
        frames.drain(..pos);
        return frames;
    }

    let skip = frames
        .iter()
        .take_while(|f| f.function.starts_with("backtrace::") || f.function == "<unknown>")
        .count();
    frames.drain(..skip);
    frames.insert(
        0,
        Frame::new(
            concat!(module_path!(), "::BacktraceProvider::capture"),
            Some(format!("{}:{}", file!(), line!())),
        ),
    );
    frames
}
