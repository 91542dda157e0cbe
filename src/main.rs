mod analysis;
mod breakpoint;
mod child;
mod cli;
mod commands;
mod config;
mod controller;
mod debuginfo;
mod detector;
mod dispatcher;
mod error;
mod frame;
mod log;
mod planner;
mod variable;

use cli::Options;
use commands::debug_command::{
    breakpoint_plan_kind_from_flags, name_filter_from_flags, scope_filter_from_flags, DebugCommand,
};
use commands::dump_all_command::DumpAllCommand;
use commands::Command;
use config::{ReporterKind, Run, StaticAnalysisConfig};
use error::PbdError;
use structopt::StructOpt;

fn build_run(options: Options) -> Result<Run, PbdError> {
    if options.executable.as_os_str().is_empty() {
        return Err(PbdError::Configuration("no executable given".into()));
    }

    let reporter_kind = match (options.color, options.show_source) {
        (true, _) => ReporterKind::Color {
            context_lines: options.context,
            theme: options
                .theme
                .clone()
                .ok_or_else(|| PbdError::Configuration("--color requires --theme FILE".into()))?,
        },
        (false, true) => ReporterKind::SourceContext {
            context_lines: options.context,
        },
        (false, false) => ReporterKind::Compact,
    };

    Ok(Run {
        executable: options.executable.clone(),
        function_name: options.function_name.clone(),
        child_argv: options.child_argv.clone(),
        scope_filter: scope_filter_from_flags(options.only_locals, options.only_globals),
        name_filter: name_filter_from_flags(options.ignore_names(), options.watch_names()),
        breakpoint_plan_kind: breakpoint_plan_kind_from_flags(options.static_filter),
        ignore_equal_statements: options.avoid_equal_statements,
        reporter_kind,
        output: options.output.clone(),
        show_source: options.show_source,
        static_analysis: StaticAnalysisConfig {
            defines: options.defines.clone(),
            undefines: options.undefines.clone(),
            include_paths: options.include_paths.clone(),
            std: options.std.clone(),
            ..StaticAnalysisConfig::default()
        },
        dump_all: options.dump_all,
    })
}

fn main() {
    let options = Options::from_args();
    let dump_all = options.dump_all;

    let run = match build_run(options) {
        Ok(run) => run,
        Err(e) => {
            eprintln!("pbd: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    let mut command: Box<dyn Command> = if dump_all {
        Box::new(DumpAllCommand)
    } else {
        Box::new(DebugCommand)
    };

    match command.run(&run) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("pbd: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
