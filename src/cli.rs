//! Command-line surface, built with `structopt`. A single flat flag set,
//! since PBD has no subcommand hierarchy to dispatch on.

use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "pbd",
    about = "Non-interactive printf-style variable-change debugger"
)]
pub struct Options {
    /// Print the surrounding source line(s) around each change.
    #[structopt(long = "show-source")]
    pub show_source: bool,

    /// Number of source lines of context to show above and below each
    /// change when --show-source is set.
    #[structopt(long = "context", default_value = "0")]
    pub context: usize,

    /// Report only local (stack) variables.
    #[structopt(long = "only-locals", conflicts_with = "only_globals")]
    pub only_locals: bool,

    /// Report only global variables.
    #[structopt(long = "only-globals")]
    pub only_globals: bool,

    /// Comma-separated variable names to exclude from reporting.
    #[structopt(long = "ignore", conflicts_with = "watch")]
    pub ignore: Option<String>,

    /// Comma-separated variable names to exclusively report.
    #[structopt(long = "watch")]
    pub watch: Option<String>,

    /// Restrict breakpoints to statements the static analyzer judges
    /// interesting, instead of every statement.
    #[structopt(long = "static")]
    pub static_filter: bool,

    /// `-D` style preprocessor define, may be repeated.
    #[structopt(short = "D", long = "define")]
    pub defines: Vec<String>,

    /// `-U` style preprocessor undefine, may be repeated.
    #[structopt(short = "U", long = "undefine")]
    pub undefines: Vec<String>,

    /// `-I` style include search path, may be repeated.
    #[structopt(short = "I", long = "include", parse(from_os_str))]
    pub include_paths: Vec<PathBuf>,

    /// C standard to assume when tokenizing source for `--static`.
    #[structopt(long = "std")]
    pub std: Option<String>,

    /// Collapse consecutive statement stops that map to the same source
    /// line when nothing changed.
    #[structopt(long = "avoid-equal-statements")]
    pub avoid_equal_statements: bool,

    /// Enable ANSI color output using the named theme file.
    #[structopt(long = "color")]
    pub color: bool,

    /// Theme file consulted when --color is set.
    #[structopt(long = "theme", parse(from_os_str))]
    pub theme: Option<PathBuf>,

    /// Write trace output to this file instead of stdout.
    #[structopt(long = "output", short = "o", parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Instead of tracing, dump the resolved function's debug info
    /// (address range, line table, variables) as JSON and exit.
    #[structopt(long = "dump-all")]
    pub dump_all: bool,

    /// Executable to trace.
    #[structopt(parse(from_os_str))]
    pub executable: PathBuf,

    /// Name of the function to watch for variable changes.
    pub function_name: String,

    /// Arguments passed through to the traced executable, after `--`.
    #[structopt(last = true)]
    pub child_argv: Vec<String>,
}

impl Options {
    pub fn ignore_names(&self) -> Vec<String> {
        self.ignore
            .as_deref()
            .map(|s| s.split(',').map(|n| n.trim().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn watch_names(&self) -> Vec<String> {
        self.watch
            .as_deref()
            .map(|s| s.split(',').map(|n| n.trim().to_string()).collect())
            .unwrap_or_default()
    }
}
