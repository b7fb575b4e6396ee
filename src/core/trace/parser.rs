use crate::core::trace::StackTrace;
use crate::core::types::LockKind;

/// A trace reduced to the parts that matter for grouping
///
/// The signature omits the capture routine's own frame, so two captures
/// taken at the same logical call site compare equal even when they come
/// from different threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTrace {
    pub thread_id: String,
    pub status: String,
    pub signature: String,
    pub kind: LockKind,
}

impl ParsedTrace {
    /// Normalize a structured trace by dropping its first frame
    pub fn from_trace(trace: &StackTrace, kind: LockKind) -> Self {
        let signature = trace
            .frames
            .iter()
            .skip(1)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");

        ParsedTrace {
            thread_id: trace.thread.clone(),
            status: trace.status.clone(),
            signature,
            kind,
        }
    }

    /// Parse a textual dump of the form `<unit> <n> [<status>]:` followed by
    /// frame lines.
    ///
    /// Everything up to and including the first `file:line` location line is
    /// dropped, since it belongs to the capture routine. A header that does
    /// not match yields empty fields instead of an error.
    pub fn parse(text: &str, kind: LockKind) -> Self {
        let empty = ParsedTrace {
            thread_id: String::new(),
            status: String::new(),
            signature: String::new(),
            kind,
        };

        let (header, body) = text.split_once('\n').unwrap_or((text, ""));
        let Some((thread_id, status)) = parse_header(header.trim()) else {
            return empty;
        };

        let mut lines = body.lines().skip_while(|line| !has_location(line));
        // Capture routine's location line.
        lines.next();
        let signature = lines.collect::<Vec<_>>().join("\n");

        ParsedTrace {
            thread_id: thread_id.to_string(),
            status: status.to_string(),
            signature,
            kind,
        }
    }
}

/// Split `<unit> <n> [<status>]:` into the thread number and status
fn parse_header(header: &str) -> Option<(&str, &str)> {
    let header = header.strip_suffix(':')?;
    let mut parts = header.splitn(3, ' ');

    let unit = parts.next()?;
    let number = parts.next()?;
    let status = parts
        .next()?
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))?;

    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_word(unit) || !is_word(status) || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if number.is_empty() {
        return None;
    }
    Some((number, status))
}

/// Whether a line contains a `:<digits>` source location
fn has_location(line: &str) -> bool {
    line.match_indices(':').any(|(idx, _)| {
        line[idx + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    })
}
