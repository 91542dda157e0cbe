//! `--dump-all`: print the resolved function's debug info as JSON instead
//! of tracing it: build a plain serde-derived struct and hand it to
//! `serde_json::to_string`.

use crate::commands::Command;
use crate::config::Run;
use crate::debuginfo::{DebugInfo, FunctionInfo, LineKind};
use crate::error::{PbdError, Result};
use crate::planner::{self, BreakpointPlan};
use crate::variable::{Encoding, Location, Scope, VariableDescriptor};
use serde::Serialize;
use std::fs;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VariableDump {
    name: String,
    scope: &'static str,
    location: String,
    byte_size: usize,
    encoding: &'static str,
    array_counts: Option<Vec<usize>>,
}

impl From<&VariableDescriptor> for VariableDump {
    fn from(d: &VariableDescriptor) -> Self {
        VariableDump {
            name: d.name.clone(),
            scope: match d.scope {
                Scope::Global => "global",
                Scope::Local => "local",
            },
            location: match d.location {
                Location::Absolute(a) => format!("absolute:{:#x}", a),
                Location::FrameOffset(o) => format!("fbreg:{}", o),
            },
            byte_size: d.byte_size,
            encoding: match d.encoding {
                Encoding::Signed => "signed",
                Encoding::Unsigned => "unsigned",
                Encoding::Float => "float",
                Encoding::Pointer => "pointer",
                Encoding::Enum => "enum",
            },
            array_counts: d.array_shape.as_ref().map(|s| s.counts.clone()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LineDump {
    address: String,
    line: u32,
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BreakpointDump {
    address: String,
    line: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDump {
    low_pc: String,
    high_pc: String,
    lines: Vec<LineDump>,
    variables: Vec<VariableDump>,
    breakpoints: Vec<BreakpointDump>,
}

fn dump_function(info: &FunctionInfo, ignore_equal_statements: bool) -> FunctionDump {
    let planned = planner::plan_breakpoints(info, &BreakpointPlan::AllStatements, ignore_equal_statements);
    FunctionDump {
        low_pc: format!("{:#x}", info.low_pc),
        high_pc: format!("{:#x}", info.high_pc),
        lines: info
            .lines
            .iter()
            .map(|l| LineDump {
                address: format!("{:#x}", l.address),
                line: l.line,
                kind: match l.kind {
                    LineKind::Statement => "statement",
                    LineKind::SequenceEnd => "sequence-end",
                    LineKind::Block => "block",
                },
            })
            .collect(),
        variables: info.variables.iter().map(VariableDump::from).collect(),
        breakpoints: planned
            .iter()
            .map(|p| BreakpointDump {
                address: format!("{:#x}", p.address),
                line: p.line_no,
            })
            .collect(),
    }
}

pub struct DumpAllCommand;

impl Command for DumpAllCommand {
    fn run(&mut self, run: &Run) -> Result<i32> {
        let data = fs::read(&run.executable).map_err(|e| {
            PbdError::Configuration(format!(
                "failed to read executable {:?}: {}",
                run.executable, e
            ))
        })?;
        let debug_info = DebugInfo::load(&data)?;
        let function = debug_info.resolve_function(&run.function_name)?;
        let dump = dump_function(&function, run.ignore_equal_statements);

        let serialized = serde_json::to_string_pretty(&dump)
            .map_err(|e| PbdError::Configuration(format!("failed to serialize dump: {}", e)))?;
        println!("{}", serialized);
        Ok(0)
    }
}
