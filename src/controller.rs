//! Controller / state machine.
//!
//! Drives the whole run: spawn the child, install the breakpoint plan,
//! then alternate between letting it run free and stopping it at each
//! planned address to poll variables, push/pop frames, and report
//! changes — until the child exits or a tracing-fatal error occurs.

use crate::breakpoint::BreakpointTable;
use crate::child::{Child, Stop};
use crate::config::{NameFilter, Run, ScopeFilter};
use crate::debuginfo::FunctionInfo;
use crate::dispatcher::{select_word_diff, WordDiff};
use crate::detector::{self, Reporter};
use crate::error::{PbdError, Result};
use crate::frame::FrameStack;
use crate::log::{log, LogLevel::{LogDebug, LogInfo}};
use crate::planner::PlannedBreakpoint;
use crate::variable::Scope;
use std::collections::HashSet;

/// The run's coarse phase, kept for diagnostics and tests; the loop below
/// doesn't dispatch on an explicit enum value but its branches correspond
/// 1:1 to these phases.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    PreEntry,
    Running,
    Entering,
    Stepping,
    Leaving,
}

/// An entry trap has fired but the frame isn't pushed yet: `rbp` isn't
/// the new frame's base until the prologue instructions between the
/// entry breakpoint and the first ordinary statement have actually run.
/// The return address is already known (it sits at `[rsp]` the instant
/// `call` lands), so it's captured here and the frame is materialized
/// once the first post-entry statement stop reads a valid `rbp`.
struct PendingEntry {
    return_address: u64,
}

pub struct Controller<'a> {
    child: Child,
    breakpoints: BreakpointTable,
    frames: FrameStack,
    function: &'a FunctionInfo,
    entry_address: u64,
    /// Addresses currently doing duty as a return-address trap for some
    /// live frame, as opposed to an address from the statement plan.
    /// Checked before falling back to ordinary-statement handling so a
    /// return site that happens to coincide with a later statement
    /// breakpoint is still recognized as a return first.
    return_sites: HashSet<u64>,
    word_diff: WordDiff,
    run: &'a Run,
    phase: Phase,
    last_reported_line: Option<u32>,
    pending_entry: Option<PendingEntry>,
}

impl<'a> Controller<'a> {
    pub fn new(
        executable: &str,
        argv: &[String],
        function: &'a FunctionInfo,
        plan: &[PlannedBreakpoint],
        run: &'a Run,
    ) -> Result<Self> {
        let child = Child::spawn(executable, argv)?;
        // The execve SIGTRAP fires before the first instruction runs.
        match child.wait()? {
            Stop::Trap => {}
            Stop::Exited(code) => {
                return Err(PbdError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("child exited before reaching execve (status {:?})", code),
                )))
            }
        }

        let mut breakpoints = BreakpointTable::new();
        let patch_plan: Vec<(u64, Option<u32>)> = plan.iter().map(|p| (p.address, p.line_no)).collect();
        breakpoints.install_all(&child, &patch_plan)?;

        let frames = FrameStack::new(function.variables.clone(), &child)?;

        Ok(Controller {
            child,
            breakpoints,
            frames,
            function,
            entry_address: function.low_pc,
            return_sites: HashSet::new(),
            word_diff: select_word_diff(),
            run,
            phase: Phase::PreEntry,
            last_reported_line: None,
            pending_entry: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the child to completion, reporting every observed change
    /// through `reporter`. Returns the child's exit code, or `None` if it
    /// was killed by a signal.
    pub fn run(&mut self, reporter: &mut dyn Reporter) -> Result<Option<i32>> {
        self.phase = Phase::Running;
        loop {
            self.child.continue_running()?;
            match self.child.wait()? {
                Stop::Exited(code) => {
                    let _ = self.breakpoints.teardown(&self.child);
                    return Ok(code);
                }
                Stop::Trap => {
                    if let Err(e) = self.handle_trap(reporter) {
                        self.fail_and_kill();
                        return Err(e);
                    }
                }
            }
        }
    }

    fn fail_and_kill(&mut self) {
        let _ = self.breakpoints.teardown(&self.child);
        self.child.kill();
    }

    fn handle_trap(&mut self, reporter: &mut dyn Reporter) -> Result<()> {
        let pc = self.child.read_pc()?;
        let addr = match self.breakpoints.breakpoint_address_for_trap_pc(pc) {
            Some(a) => a,
            None => {
                log!(LogDebug, "trap at {:#x} with no matching breakpoint; ignoring", pc);
                return Ok(());
            }
        };
        // The trap landed one past the patched byte; rewind so the
        // instruction re-executes from its real start once stepped over.
        self.child.set_pc(addr)?;

        if addr == self.entry_address {
            self.phase = Phase::Entering;
            self.handle_entry()?;
        } else if self.return_sites.contains(&addr) && self.is_live_return_address(addr) {
            self.phase = Phase::Leaving;
            self.handle_return(addr, reporter)?;
        } else if self.pending_entry.is_some() || self.frames.depth() > 0 {
            // A retired return-site breakpoint can linger in the child
            // after every frame referencing it has popped (e.g. the same
            // call site used again once F has fully unwound); outside a
            // live frame there's nothing of ours to poll.
            self.phase = Phase::Stepping;
            let line_no = self.breakpoints.find(addr).and_then(|r| r.line_no);
            self.handle_statement(line_no, reporter)?;
        }

        self.breakpoints.step_over_and_rearm(&self.child, addr)?;
        Ok(())
    }

    /// Whether `addr` is the return address of the innermost live frame
    /// that still expects to return to it. A return-site breakpoint that
    /// outlives every frame referencing it (the same call site used
    /// again after this function has fully unwound) is otherwise inert:
    /// it just isn't reached while nothing is traced.
    fn is_live_return_address(&self, addr: u64) -> bool {
        self.frames.top().map(|f| f.return_address) == Some(addr)
    }

    /// Function entry: either the bottom frame (depth 0 → 1) or, for
    /// recursion, a re-entry while a frame is already live. Either way
    /// the return address is read off the stack now (the only point at
    /// which it's guaranteed to sit at `[rsp]`) and a breakpoint is
    /// installed there so the controller can tell when *this* call
    /// returns. Frame creation itself waits for the next stop, once the
    /// prologue has set up `rbp`.
    fn handle_entry(&mut self) -> Result<()> {
        let return_address = self.child.read_return_address()?;
        self.breakpoints.install_one(&self.child, return_address, None)?;
        self.return_sites.insert(return_address);
        self.pending_entry = Some(PendingEntry { return_address });
        Ok(())
    }

    /// The top frame has returned: report it, then pop. If no other live
    /// frame shares this return address (recursion can, when every
    /// recursive call shares one call site), retire it from the
    /// return-site set — a future fresh call from the same site will
    /// re-add it at its next entry.
    fn handle_return(&mut self, addr: u64, reporter: &mut dyn Reporter) -> Result<()> {
        let depth = self.frames.depth();
        reporter.report_leave(depth)?;
        self.frames.pop();
        log!(LogInfo, "leaving frame, depth now {}", self.frames.depth());
        if !self.frames.frames_with_return_address(addr) {
            self.return_sites.remove(&addr);
        }
        Ok(())
    }

    /// An ordinary statement stop, or the first stop after an entry trap
    /// (`pending_entry` is `Some`) — in which case no diffing happens:
    /// the frame is materialized here (now that `rbp` is valid) and only
    /// an "entering depth D" event is reported.
    fn handle_statement(&mut self, line_no: Option<u32>, reporter: &mut dyn Reporter) -> Result<()> {
        if let Some(pending) = self.pending_entry.take() {
            let frame_base = self.child.read_bp()?;
            self.frames.push(pending.return_address, frame_base, &self.child)?;
            let depth = self.frames.depth();
            log!(LogInfo, "entering frame, depth now {}", depth);
            reporter.report_enter(depth)?;
            return Ok(());
        }

        self.poll_current_frame(line_no, reporter)
    }

    fn poll_current_frame(&mut self, line_no: Option<u32>, reporter: &mut dyn Reporter) -> Result<()> {
        let depth = self.frames.depth();
        let skip_line_report = self.run.ignore_equal_statements
            && line_no.is_some()
            && line_no == self.last_reported_line;
        if !skip_line_report {
            if let Some(l) = line_no {
                reporter.report_line(l, depth)?;
            }
        }
        self.last_reported_line = line_no.or(self.last_reported_line);

        // Globals, depth-independent.
        if !matches!(self.run.scope_filter, ScopeFilter::OnlyLocals) {
            let frame_base = 0;
            let child = &self.child;
            let word_diff = self.word_diff;
            let run = self.run;
            let descriptors = self.frames.global_descriptors().to_vec();
            let mut fresh_images = Vec::with_capacity(descriptors.len());
            for (descriptor, snapshot) in descriptors.iter().zip(self.frames.globals().iter()) {
                if !run.name_filter.admits(&descriptor.name) {
                    fresh_images.push(None);
                    continue;
                }
                let fresh = detector::poll_and_report(
                    descriptor,
                    snapshot,
                    child,
                    frame_base,
                    line_no,
                    depth,
                    word_diff,
                    reporter,
                )?;
                fresh_images.push(fresh);
            }
            for (snapshot, fresh) in self.frames.globals_mut().iter_mut().zip(fresh_images) {
                if let Some(image) = fresh {
                    snapshot.commit(image);
                }
            }
        }

        // Locals, innermost frame only.
        if !matches!(self.run.scope_filter, ScopeFilter::OnlyGlobals) && depth > 0 {
            let frame_base = self.frames.top().unwrap().frame_base;
            let child = &self.child;
            let word_diff = self.word_diff;
            let run = self.run;
            let descriptors = self.frames.top().unwrap().descriptors.clone();
            let snapshots = self.frames.top().unwrap().snapshots.clone();
            let mut fresh_images = Vec::with_capacity(descriptors.len());
            for (descriptor, snapshot) in descriptors.iter().zip(snapshots.iter()) {
                if descriptor.scope != Scope::Local || !run.name_filter.admits(&descriptor.name) {
                    fresh_images.push(None);
                    continue;
                }
                let fresh = detector::poll_and_report(
                    descriptor,
                    snapshot,
                    child,
                    frame_base,
                    line_no,
                    depth,
                    word_diff,
                    reporter,
                )?;
                fresh_images.push(fresh);
            }
            let top = self.frames.top_mut().unwrap();
            for (snapshot, fresh) in top.snapshots.iter_mut().zip(fresh_images) {
                if let Some(image) = fresh {
                    snapshot.commit(image);
                }
            }
        }

        Ok(())
    }
}
