//! Breakpoint Planner.
//!
//! Decides *where* to put breakpoints before the child ever runs: either
//! one per statement address, or a subset filtered by the static
//! analyzer, but always including the function's entry address and its
//! final statement's address, since the controller's state machine
//! depends on both being present.

use crate::analysis;
use crate::debuginfo::{group_by_line, FunctionInfo, LineKind};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct PlannedBreakpoint {
    pub address: u64,
    pub line_no: Option<u32>,
}

/// Whether to stop at every statement or only at statements the static
/// analyzer judges interesting.
#[derive(Clone, Debug)]
pub enum BreakpointPlan {
    AllStatements,
    StaticFiltered { source_lines: Vec<String>, identifiers: Vec<String> },
}

/// Build the final, sorted, deduplicated breakpoint plan for a function.
///
/// By default every statement-begin address is kept, even when several
/// share a source line (a `for` header compiles to separate init/cond/
/// increment addresses that all map to the same line). Only when
/// `ignore_equal_statements` is set is that collapsed to one
/// representative (lowest) address per line. The entry/final-statement
/// addresses are always present regardless of what the static filter
/// would otherwise drop.
pub fn plan_breakpoints(info: &FunctionInfo, plan: &BreakpointPlan, ignore_equal_statements: bool) -> Vec<PlannedBreakpoint> {
    let representative: BTreeMap<u64, u32> = if ignore_equal_statements {
        let by_line = group_by_line(&info.lines);
        let mut rep = BTreeMap::new();
        for (&line_no, addrs) in &by_line {
            if let Some(&min_addr) = addrs.iter().min() {
                rep.insert(min_addr, line_no);
            }
        }
        rep
    } else {
        info.lines
            .iter()
            .filter(|l| l.kind == LineKind::Statement)
            .map(|l| (l.address, l.line))
            .collect()
    };

    let entry_address = info.low_pc;
    let final_statement_address = info
        .lines
        .iter()
        .filter(|l| l.kind == LineKind::Statement)
        .map(|l| l.address)
        .max()
        .unwrap_or(entry_address);

    let mut kept: BTreeMap<u64, Option<u32>> = BTreeMap::new();

    match plan {
        BreakpointPlan::AllStatements => {
            for (&addr, &line) in &representative {
                kept.insert(addr, Some(line));
            }
        }
        BreakpointPlan::StaticFiltered {
            source_lines,
            identifiers,
        } => {
            for (&addr, &line) in &representative {
                let interesting = source_lines
                    .get((line as usize).saturating_sub(1))
                    .map(|src| analysis::is_interesting(src, identifiers))
                    .unwrap_or(true);
                if interesting {
                    kept.insert(addr, Some(line));
                }
            }
        }
    }

    kept.entry(entry_address)
        .or_insert_with(|| representative.get(&entry_address).copied());
    kept.entry(final_statement_address)
        .or_insert_with(|| representative.get(&final_statement_address).copied());

    kept.into_iter()
        .map(|(address, line_no)| PlannedBreakpoint { address, line_no })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debuginfo::LineRecord;

    fn info_with_lines(lines: Vec<LineRecord>) -> FunctionInfo {
        FunctionInfo {
            low_pc: lines.first().map(|l| l.address).unwrap_or(0),
            high_pc: lines.last().map(|l| l.address + 1).unwrap_or(1),
            lines,
            variables: Vec::new(),
            source_path: None,
        }
    }

    #[test]
    fn all_statements_plan_keeps_every_address_by_default() {
        let info = info_with_lines(vec![
            LineRecord { address: 0x100, line: 1, kind: LineKind::Statement },
            LineRecord { address: 0x104, line: 2, kind: LineKind::Statement },
            LineRecord { address: 0x108, line: 2, kind: LineKind::Statement },
        ]);
        let planned = plan_breakpoints(&info, &BreakpointPlan::AllStatements, false);
        assert_eq!(planned.len(), 3);
    }

    #[test]
    fn ignore_equal_statements_collapses_to_one_address_per_line() {
        let info = info_with_lines(vec![
            LineRecord { address: 0x100, line: 1, kind: LineKind::Statement },
            LineRecord { address: 0x104, line: 2, kind: LineKind::Statement },
            LineRecord { address: 0x108, line: 2, kind: LineKind::Statement },
        ]);
        let planned = plan_breakpoints(&info, &BreakpointPlan::AllStatements, true);
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().any(|p| p.address == 0x104));
        assert!(!planned.iter().any(|p| p.address == 0x108));
    }

    #[test]
    fn entry_and_final_statement_always_survive_static_filtering() {
        let info = info_with_lines(vec![
            LineRecord { address: 0x100, line: 1, kind: LineKind::Statement },
            LineRecord { address: 0x104, line: 2, kind: LineKind::Statement },
            LineRecord { address: 0x108, line: 3, kind: LineKind::Statement },
        ]);
        let plan = BreakpointPlan::StaticFiltered {
            source_lines: vec!["int x;".into(), "return;".into(), "return x;".into()],
            identifiers: vec![],
        };
        let planned = plan_breakpoints(&info, &plan, false);
        let addrs: Vec<u64> = planned.iter().map(|p| p.address).collect();
        assert!(addrs.contains(&0x100));
        assert!(addrs.contains(&0x108));
    }
}
