//! Change Detector & Reporter.
//!
//! The detector polls every in-scope variable at each statement stop and
//! turns byte-image differences into one or more change events, which it
//! hands to a [`Reporter`] sink. Scalars report a single before/after
//! pair; arrays report one event per changed element, in ascending
//! multi-index order, located via the dispatcher's word-diff scan.

use crate::child::TracedMemory;
use crate::dispatcher::WordDiff;
use crate::error::Result;
use crate::variable::{format_value, ArrayShape, Encoding, Scope, VariableDescriptor, VariableSnapshot};
use std::io::Write;

/// Whether a reported change is a local's very first write (reported as
/// "initialized", before-value synthesized as zero) or an ordinary
/// overwrite of a value that was already live.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    Initialized,
    Changed,
}

impl ChangeKind {
    fn verb(self) -> &'static str {
        match self {
            ChangeKind::Initialized => "initialized!",
            ChangeKind::Changed => "has changed!",
        }
    }
}

/// One reported change: either a whole scalar, or a single array element
/// addressed by its multi-index.
pub struct ChangeEvent<'a> {
    pub variable_name: &'a str,
    pub indices: Vec<usize>,
    pub before: String,
    pub after: String,
    pub line_no: Option<u32>,
    pub depth: usize,
    pub scope: Scope,
    pub kind: ChangeKind,
}

/// Where change events go. Kept as a trait so `--dump-all` can reuse the
/// same detection path with a sink that builds JSON instead of text
///.
pub trait Reporter {
    fn report(&mut self, event: &ChangeEvent) -> Result<()>;
    fn report_line(&mut self, line_no: u32, depth: usize) -> Result<()> {
        let _ = (line_no, depth);
        Ok(())
    }
    /// A frame became live at `depth` (function entry or recursive
    /// re-entry). Emitted once, before any change event from that frame.
    fn report_enter(&mut self, depth: usize) -> Result<()> {
        let _ = depth;
        Ok(())
    }
    /// A frame returned from `depth`. Emitted once, after the last change
    /// event observed at that depth.
    fn report_leave(&mut self, depth: usize) -> Result<()> {
        let _ = depth;
        Ok(())
    }
}

/// Compact line form: `[Line: N] [scope] (name[idx]) has changed!, before: X, after: Y`.
/// This is the default sink and its exact wording is part of the tool's
/// observable output, not just a style choice.
pub struct CompactReporter<W: Write> {
    sink: W,
}

impl<W: Write> CompactReporter<W> {
    pub fn new(sink: W) -> Self {
        CompactReporter { sink }
    }
}

fn format_line(event: &ChangeEvent) -> String {
    let indices: String = event.indices.iter().map(|i| format!("[{}]", i)).collect();
    let scope = match event.scope {
        Scope::Global => "global",
        Scope::Local => "local",
    };
    let line = event
        .line_no
        .map(|l| l.to_string())
        .unwrap_or_else(|| "?".to_string());
    format!(
        "[Line: {}] [{}] ({}{}) {}, before: {}, after: {}",
        line,
        scope,
        event.variable_name,
        indices,
        event.kind.verb(),
        event.before,
        event.after
    )
}

impl<W: Write> Reporter for CompactReporter<W> {
    fn report(&mut self, event: &ChangeEvent) -> Result<()> {
        writeln!(self.sink, "{}", format_line(event))
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))
    }

    fn report_enter(&mut self, depth: usize) -> Result<()> {
        writeln!(self.sink, "-- entering depth {} --", depth)
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))
    }

    fn report_leave(&mut self, depth: usize) -> Result<()> {
        writeln!(self.sink, "-- returning to depth {} --", depth.saturating_sub(1))
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))
    }
}

/// Prints the change plus a window of surrounding source lines with a
/// caret under the variable name.
pub struct SourceContextReporter<W: Write> {
    sink: W,
    source_lines: Vec<String>,
    context: usize,
}

impl<W: Write> SourceContextReporter<W> {
    pub fn new(sink: W, source_lines: Vec<String>, context: usize) -> Self {
        SourceContextReporter {
            sink,
            source_lines,
            context,
        }
    }

    fn print_context(&mut self, line_no: u32) -> Result<()> {
        let center = line_no as usize;
        let start = center.saturating_sub(self.context).max(1);
        let end = (center + self.context).min(self.source_lines.len());
        for n in start..=end {
            if let Some(src) = self.source_lines.get(n - 1) {
                let marker = if n == center { ">" } else { " " };
                writeln!(self.sink, "{} {:4} | {}", marker, n, src)
                    .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))?;
            }
        }
        Ok(())
    }
}

impl<W: Write> Reporter for SourceContextReporter<W> {
    fn report(&mut self, event: &ChangeEvent) -> Result<()> {
        if let Some(line_no) = event.line_no {
            self.print_context(line_no)?;
        }
        writeln!(self.sink, "{}", format_line(event))
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))?;

        // Caret under the variable's first appearance on its source line,
        // prefixed the same way `print_context` indents each line.
        let prefix_width = "> 9999 | ".len();
        let caret_column = event
            .line_no
            .and_then(|n| self.source_lines.get(n as usize - 1))
            .and_then(|src| src.find(event.variable_name))
            .unwrap_or(0);
        writeln!(self.sink, "{}^", " ".repeat(prefix_width + caret_column))
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))
    }

    fn report_enter(&mut self, depth: usize) -> Result<()> {
        writeln!(self.sink, "-- entering depth {} --", depth)
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))
    }

    fn report_leave(&mut self, depth: usize) -> Result<()> {
        writeln!(self.sink, "-- returning to depth {} --", depth.saturating_sub(1))
            .map_err(|e| crate::error::PbdError::Configuration(format!("write failed: {}", e)))
    }
}

/// Wraps another reporter and adds ANSI color to the before/after values,
/// loaded from a simple `key = #rrggbb`-or-ANSI-code theme file, for the
/// `--theme`/`--color` flags.
pub struct ColorSourceReporter<W: Write> {
    inner: SourceContextReporter<W>,
    before_code: String,
    after_code: String,
}

impl<W: Write> ColorSourceReporter<W> {
    pub fn new(inner: SourceContextReporter<W>, before_code: String, after_code: String) -> Self {
        ColorSourceReporter {
            inner,
            before_code,
            after_code,
        }
    }
}

impl<W: Write> Reporter for ColorSourceReporter<W> {
    fn report(&mut self, event: &ChangeEvent) -> Result<()> {
        let colored_before = format!("\x1b[{}m{}\x1b[0m", self.before_code, event.before);
        let colored_after = format!("\x1b[{}m{}\x1b[0m", self.after_code, event.after);
        let recolored = ChangeEvent {
            variable_name: event.variable_name,
            indices: event.indices.clone(),
            before: colored_before,
            after: colored_after,
            line_no: event.line_no,
            depth: event.depth,
            scope: event.scope,
            kind: event.kind,
        };
        self.inner.report(&recolored)
    }

    fn report_line(&mut self, line_no: u32, depth: usize) -> Result<()> {
        self.inner.report_line(line_no, depth)
    }

    fn report_enter(&mut self, depth: usize) -> Result<()> {
        self.inner.report_enter(depth)
    }

    fn report_leave(&mut self, depth: usize) -> Result<()> {
        self.inner.report_leave(depth)
    }
}

/// Compare a scalar's last image against a fresh read and, if different,
/// emit a single change event.
pub fn detect_scalar_change(
    name: &str,
    before: &[u8],
    after: &[u8],
    encoding: Encoding,
    byte_size: usize,
    line_no: Option<u32>,
    depth: usize,
    scope: Scope,
    kind: ChangeKind,
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    if before == after {
        return Ok(false);
    }
    let displayed_before = match kind {
        ChangeKind::Initialized => vec![0u8; before.len()],
        ChangeKind::Changed => before.to_vec(),
    };
    let event = ChangeEvent {
        variable_name: name,
        indices: Vec::new(),
        before: format_value(&displayed_before, encoding, byte_size),
        after: format_value(after, encoding, byte_size),
        line_no,
        depth,
        scope,
        kind,
    };
    reporter.report(&event)?;
    Ok(true)
}

/// Compare an array's last image against a fresh read, emitting one
/// event per changed element in ascending index order. Uses the
/// dispatcher's word-diff strategy to jump straight to each differing
/// region instead of comparing element-by-element.
pub fn detect_array_changes(
    name: &str,
    before: &[u8],
    after: &[u8],
    shape: &ArrayShape,
    encoding: Encoding,
    line_no: Option<u32>,
    depth: usize,
    scope: Scope,
    kind: ChangeKind,
    word_diff: WordDiff,
    reporter: &mut dyn Reporter,
) -> Result<usize> {
    let elem_size = shape.element_byte_size;
    let mut changed = 0usize;
    let mut cursor = 0usize;

    while cursor < before.len() {
        let remaining_before = &before[cursor..];
        let remaining_after = &after[cursor..];
        let rel_offset = match word_diff(remaining_before, remaining_after) {
            Some(o) => o,
            None => break,
        };
        let abs_offset = cursor + rel_offset;
        let elem_index = abs_offset / elem_size;
        let elem_start = elem_index * elem_size;
        let elem_end = (elem_start + elem_size).min(before.len());

        let indices = shape.multi_index(elem_start);
        let displayed_before = match kind {
            ChangeKind::Initialized => vec![0u8; elem_end - elem_start],
            ChangeKind::Changed => before[elem_start..elem_end].to_vec(),
        };
        let event = ChangeEvent {
            variable_name: name,
            indices,
            before: format_value(&displayed_before, encoding, elem_size),
            after: format_value(&after[elem_start..elem_end], encoding, elem_size),
            line_no,
            depth,
            scope,
            kind,
        };
        reporter.report(&event)?;
        changed += 1;
        cursor = elem_end;
    }

    Ok(changed)
}

/// Poll one variable (scalar or array) against the tracee, report any
/// change through `reporter`, and return the fresh image so the caller
/// can commit it to the snapshot. Handles the first-write synthesis for
/// locals: the very first observed write reports
/// zero as the "before" value instead of scratch garbage.
pub fn poll_and_report(
    descriptor: &VariableDescriptor,
    snapshot: &VariableSnapshot,
    memory: &dyn TracedMemory,
    frame_base: u64,
    line_no: Option<u32>,
    depth: usize,
    word_diff: WordDiff,
    reporter: &mut dyn Reporter,
) -> Result<Option<Vec<u8>>> {
    let (changed, fresh) = snapshot.poll(descriptor, memory, frame_base)?;
    if !changed {
        return Ok(None);
    }

    let kind = if snapshot.initialized {
        ChangeKind::Changed
    } else {
        ChangeKind::Initialized
    };
    // Diff against the real scratch/last-observed bytes, not a
    // whole-variable zero buffer: on a local's first write, that would
    // make every nonzero-but-unchanged garbage byte look like a change
    // too. `detect_scalar_change`/`detect_array_changes` already
    // substitute zero for the *displayed* before-value of whatever they
    // locate as actually changed.
    let before = &snapshot.last_image;

    match &descriptor.array_shape {
        Some(shape) => {
            detect_array_changes(
                &descriptor.name,
                before,
                &fresh,
                shape,
                descriptor.encoding,
                line_no,
                depth,
                descriptor.scope,
                kind,
                word_diff,
                reporter,
            )?;
        }
        None => {
            detect_scalar_change(
                &descriptor.name,
                before,
                &fresh,
                descriptor.encoding,
                descriptor.byte_size,
                line_no,
                depth,
                descriptor.scope,
                kind,
                reporter,
            )?;
        }
    }

    Ok(Some(fresh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::diff_offset_generic;

    struct CollectingReporter {
        events: Vec<(String, String)>,
    }

    impl Reporter for CollectingReporter {
        fn report(&mut self, event: &ChangeEvent) -> Result<()> {
            self.events.push((event.before.clone(), event.after.clone()));
            Ok(())
        }
    }

    #[test]
    fn scalar_change_emits_one_event() {
        let mut reporter = CollectingReporter { events: Vec::new() };
        let changed = detect_scalar_change(
            "x",
            &5i32.to_le_bytes(),
            &9i32.to_le_bytes(),
            Encoding::Signed,
            4,
            Some(10),
            0,
            Scope::Local,
            ChangeKind::Changed,
            &mut reporter,
        )
        .unwrap();
        assert!(changed);
        assert_eq!(reporter.events, vec![("5".to_string(), "9".to_string())]);
    }

    #[test]
    fn scalar_no_change_emits_nothing() {
        let mut reporter = CollectingReporter { events: Vec::new() };
        let changed = detect_scalar_change(
            "x",
            &5i32.to_le_bytes(),
            &5i32.to_le_bytes(),
            Encoding::Signed,
            4,
            Some(10),
            0,
            Scope::Local,
            ChangeKind::Changed,
            &mut reporter,
        )
        .unwrap();
        assert!(!changed);
        assert!(reporter.events.is_empty());
    }

    #[test]
    fn array_change_emits_one_event_per_changed_element() {
        let mut reporter = CollectingReporter { events: Vec::new() };
        let shape = ArrayShape {
            element_byte_size: 4,
            counts: vec![4],
        };
        let before: Vec<u8> = [0i32, 0, 0, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let after: Vec<u8> = [0i32, 7, 0, 9].iter().flat_map(|v| v.to_le_bytes()).collect();
        let n = detect_array_changes(
            "arr",
            &before,
            &after,
            &shape,
            Encoding::Signed,
            Some(10),
            0,
            Scope::Global,
            ChangeKind::Changed,
            diff_offset_generic,
            &mut reporter,
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(reporter.events, vec![
            ("0".to_string(), "7".to_string()),
            ("0".to_string(), "9".to_string()),
        ]);
    }

    #[test]
    fn array_first_write_ignores_nonzero_garbage_in_other_elements() {
        let mut reporter = CollectingReporter { events: Vec::new() };
        let shape = ArrayShape {
            element_byte_size: 4,
            counts: vec![4],
        };
        // Uninitialized local `int buf[4]`: scratch is garbage, nonzero in
        // every slot. Only buf[2] gets a real write.
        let scratch: Vec<u8> = [0xdeadbeefu32, 0x11111111, 0x22222222, 0x33333333]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut fresh = scratch.clone();
        fresh[8..12].copy_from_slice(&5i32.to_le_bytes());
        let n = detect_array_changes(
            "buf",
            &scratch,
            &fresh,
            &shape,
            Encoding::Signed,
            Some(10),
            0,
            Scope::Local,
            ChangeKind::Initialized,
            diff_offset_generic,
            &mut reporter,
        )
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(reporter.events, vec![("0".to_string(), "5".to_string())]);
    }

    #[test]
    fn compact_reporter_matches_canonical_format() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut reporter = CompactReporter::new(&mut buf);
            let event = ChangeEvent {
                variable_name: "x",
                indices: Vec::new(),
                before: "3".to_string(),
                after: "4".to_string(),
                line_no: Some(37),
                depth: 1,
                scope: Scope::Local,
                kind: ChangeKind::Changed,
            };
            reporter.report(&event).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "[Line: 37] [local] (x) has changed!, before: 3, after: 4\n");
    }

    #[test]
    fn compact_reporter_formats_initialization() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut reporter = CompactReporter::new(&mut buf);
            let event = ChangeEvent {
                variable_name: "d",
                indices: Vec::new(),
                before: "0.000000".to_string(),
                after: "2.030000".to_string(),
                line_no: Some(5),
                depth: 1,
                scope: Scope::Local,
                kind: ChangeKind::Initialized,
            };
            reporter.report(&event).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "[Line: 5] [local] (d) initialized!, before: 0.000000, after: 2.030000\n");
    }
}
