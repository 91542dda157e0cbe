//! The default command: trace `function_name` in `executable` and report
//! every variable change observed while it runs.

use crate::commands::Command;
use crate::config::{BreakpointPlanKind, NameFilter, ReporterKind, Run, ScopeFilter};
use crate::controller::Controller;
use crate::debuginfo::DebugInfo;
use crate::detector::{ColorSourceReporter, CompactReporter, Reporter, SourceContextReporter};
use crate::error::{PbdError, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

pub struct DebugCommand;

fn read_source_lines(path: Option<&str>) -> Vec<String> {
    match path {
        Some(p) => fs::read_to_string(p)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

fn build_reporter<'w>(
    run: &Run,
    sink: Box<dyn Write + 'w>,
    source_lines: Vec<String>,
) -> Box<dyn Reporter + 'w> {
    match &run.reporter_kind {
        ReporterKind::Compact => Box::new(CompactReporter::new(sink)),
        ReporterKind::SourceContext { context_lines } => {
            Box::new(SourceContextReporter::new(sink, source_lines, *context_lines))
        }
        ReporterKind::Color { context_lines, theme } => {
            let (before, after) = load_theme(theme);
            let inner = SourceContextReporter::new(sink, source_lines, *context_lines);
            Box::new(ColorSourceReporter::new(inner, before, after))
        }
    }
}

/// Read a two-line `before=<ansi code>` / `after=<ansi code>` theme file,
/// falling back to plain red/green if it can't be read.
fn load_theme(path: &std::path::Path) -> (String, String) {
    let contents = fs::read_to_string(path).unwrap_or_default();
    let mut before = "31".to_string();
    let mut after = "32".to_string();
    for line in contents.lines() {
        if let Some(v) = line.strip_prefix("before=") {
            before = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("after=") {
            after = v.trim().to_string();
        }
    }
    (before, after)
}

impl Command for DebugCommand {
    fn run(&mut self, run: &Run) -> Result<i32> {
        let executable_path = run
            .executable
            .to_str()
            .ok_or_else(|| PbdError::Configuration("executable path is not valid UTF-8".into()))?;

        let data = fs::read(&run.executable).map_err(|e| {
            PbdError::Configuration(format!(
                "failed to read executable {:?}: {}",
                run.executable, e
            ))
        })?;
        let debug_info = DebugInfo::load(&data)?;
        let function = debug_info.resolve_function(&run.function_name)?;

        let source_lines = read_source_lines(function.source_path.as_deref());
        let identifiers: Vec<String> = function.variables.iter().map(|v| v.name.clone()).collect();
        let plan = run.resolve_breakpoint_plan(source_lines.clone(), identifiers);
        let planned = crate::planner::plan_breakpoints(&function, &plan, run.ignore_equal_statements);

        let mut controller = Controller::new(executable_path, &run.child_argv, &function, &planned, run)?;

        let exit_code = match &run.output {
            Some(path) => {
                let file = File::create(path).map_err(|e| {
                    PbdError::Configuration(format!("failed to open output file {:?}: {}", path, e))
                })?;
                let mut reporter = build_reporter(run, Box::new(BufWriter::new(file)), source_lines);
                controller.run(reporter.as_mut())?
            }
            None => {
                let mut reporter = build_reporter(run, Box::new(io::stdout()), source_lines);
                controller.run(reporter.as_mut())?
            }
        };

        Ok(exit_code.unwrap_or(128))
    }
}

/// Apply the CLI's scope/name filters onto a [`Run`], used by `main` when
/// assembling the configuration from parsed options.
pub fn scope_filter_from_flags(only_locals: bool, only_globals: bool) -> ScopeFilter {
    if only_locals {
        ScopeFilter::OnlyLocals
    } else if only_globals {
        ScopeFilter::OnlyGlobals
    } else {
        ScopeFilter::All
    }
}

pub fn name_filter_from_flags(ignore: Vec<String>, watch: Vec<String>) -> NameFilter {
    if !watch.is_empty() {
        NameFilter::Watch(watch)
    } else if !ignore.is_empty() {
        NameFilter::Ignore(ignore)
    } else {
        NameFilter::None
    }
}

pub fn breakpoint_plan_kind_from_flags(static_filter: bool) -> BreakpointPlanKind {
    if static_filter {
        BreakpointPlanKind::Static
    } else {
        BreakpointPlanKind::AllStatements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn load_theme_reads_before_and_after_codes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "before=31\nafter=32").unwrap();
        let (before, after) = load_theme(file.path());
        assert_eq!(before, "31");
        assert_eq!(after, "32");
    }

    #[test]
    fn load_theme_falls_back_when_file_is_missing() {
        let (before, after) = load_theme(std::path::Path::new("/nonexistent/theme.txt"));
        assert_eq!(before, "31");
        assert_eq!(after, "32");
    }

    #[test]
    fn read_source_lines_splits_on_newlines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "int main() {{\n  return 0;\n}}").unwrap();
        let lines = read_source_lines(file.path().to_str());
        assert_eq!(lines, vec!["int main() {", "  return 0;", "}"]);
    }

    #[test]
    fn read_source_lines_empty_when_path_is_none() {
        assert!(read_source_lines(None).is_empty());
    }
}
