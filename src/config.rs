//! Run Configuration.
//!
//! Every setting a run needs lives here as a plain field on a value
//! `main` constructs once from parsed CLI flags and threads through the
//! rest of the run. Nothing in the core reaches for ambient/global
//! state.

use crate::planner::BreakpointPlan;
use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// Static-analysis preprocessor controls (`-D`, `-U`, `-I`, `--std`),
    /// kept as a bitset.
    pub struct StaticAnalysisFlags: u32 {
        const ENABLE_DEFINES   = 0b0001;
        const ENABLE_UNDEFINES = 0b0010;
        const ENABLE_INCLUDES  = 0b0100;
        const ENABLE_STD       = 0b1000;
    }
}

#[derive(Clone, Debug)]
pub enum ScopeFilter {
    All,
    OnlyLocals,
    OnlyGlobals,
}

/// Mutually exclusive name filters: either skip the named variables or
/// restrict reporting to only them.
#[derive(Clone, Debug)]
pub enum NameFilter {
    None,
    Ignore(Vec<String>),
    Watch(Vec<String>),
}

impl NameFilter {
    pub fn admits(&self, name: &str) -> bool {
        match self {
            NameFilter::None => true,
            NameFilter::Ignore(names) => !names.iter().any(|n| n == name),
            NameFilter::Watch(names) => names.iter().any(|n| n == name),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ReporterKind {
    Compact,
    SourceContext { context_lines: usize },
    Color { context_lines: usize, theme: PathBuf },
}

#[derive(Clone, Debug)]
pub struct StaticAnalysisConfig {
    pub flags: StaticAnalysisFlags,
    pub defines: Vec<String>,
    pub undefines: Vec<String>,
    pub include_paths: Vec<PathBuf>,
    pub std: Option<String>,
}

impl Default for StaticAnalysisConfig {
    fn default() -> Self {
        StaticAnalysisConfig {
            flags: StaticAnalysisFlags::empty(),
            defines: Vec::new(),
            undefines: Vec::new(),
            include_paths: Vec::new(),
            std: None,
        }
    }
}

/// Everything a single PBD invocation needs, resolved once up front.
pub struct Run {
    pub executable: PathBuf,
    pub function_name: String,
    pub child_argv: Vec<String>,

    pub scope_filter: ScopeFilter,
    pub name_filter: NameFilter,
    pub breakpoint_plan_kind: BreakpointPlanKind,
    pub ignore_equal_statements: bool,

    pub reporter_kind: ReporterKind,
    pub output: Option<PathBuf>,
    pub show_source: bool,

    pub static_analysis: StaticAnalysisConfig,
    pub dump_all: bool,
}

/// Which flavor of [`BreakpointPlan`] to build once the function's debug
/// info is resolved; kept separate from `planner::BreakpointPlan` since
/// the latter needs the source text, which isn't read until after the
/// executable is parsed.
#[derive(Clone, Debug)]
pub enum BreakpointPlanKind {
    AllStatements,
    Static,
}

impl Run {
    pub fn resolve_breakpoint_plan(&self, source_lines: Vec<String>, identifiers: Vec<String>) -> BreakpointPlan {
        match self.breakpoint_plan_kind {
            BreakpointPlanKind::AllStatements => BreakpointPlan::AllStatements,
            BreakpointPlanKind::Static => BreakpointPlan::StaticFiltered {
                source_lines,
                identifiers,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_filter_excludes_named_variables() {
        let f = NameFilter::Ignore(vec!["tmp".into()]);
        assert!(!f.admits("tmp"));
        assert!(f.admits("total"));
    }

    #[test]
    fn watch_filter_admits_only_named_variables() {
        let f = NameFilter::Watch(vec!["total".into()]);
        assert!(f.admits("total"));
        assert!(!f.admits("tmp"));
    }
}
