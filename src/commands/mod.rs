//! Top-level commands a parsed [`crate::cli::Options`] dispatches to.

use crate::config::Run;
use crate::error::Result;

pub mod debug_command;
pub mod dump_all_command;

pub trait Command {
    fn run(&mut self, run: &Run) -> Result<i32>;
}
