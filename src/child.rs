//! Child Process Handle.
//!
//! The only component that touches the traced process. Every ptrace call
//! here is either `Ok` or promoted to [`PbdError::TracingFatal`] — the
//! rest of the core never sees a raw `nix::Error`.

use crate::error::{PbdError, Result};
use crate::log::{log, LogLevel::LogDebug};
use libc::{c_void, user_regs_struct};
use nix::sys::ptrace;
use nix::sys::uio::{process_vm_readv, IoVec, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus as NixWaitStatus};
use nix::unistd::{execv, fork, ForkResult, Pid};
use std::ffi::CString;

// The word-at-a-time ptrace peek/poke paths in `read_bytes_via_peek` and
// `write_bytes` assume an 8-byte machine word, matching the original's
// `COMPILE_TIME_ASSERT(sizeof(long) == 8)`: this crate targets x86_64 only.
static_assertions::const_assert_eq!(std::mem::size_of::<*mut c_void>(), 8);

/// Outcome of a single `wait()`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stop {
    /// The child hit a `SIGTRAP` (breakpoint or single-step).
    Trap,
    /// The child ran to completion. Carries its exit status if it exited
    /// normally, or `None` if it died from a signal.
    Exited(Option<i32>),
}

/// Anything the Variable Reader needs to pull bytes out of the tracee.
/// Kept as a trait so §4.3 can be unit-tested against a fake.
pub trait TracedMemory {
    fn read_mem(&self, addr: u64, len: usize) -> Result<Vec<u8>>;
    fn read_bp(&self) -> Result<u64>;
}

/// A spawned, traced child process. Owns the OS process: dropping it does
/// not kill the tracee — the controller kills it explicitly on the
/// tracing-fatal path, after tearing down breakpoints.
pub struct Child {
    pid: Pid,
}

impl Child {
    /// Fork-and-exec `path` with `argv` under `PTRACE_TRACEME`. The child
    /// stops (via the implicit `SIGTRAP` on `execve` while traced) before
    /// its first instruction; the caller must `wait()` once before doing
    /// anything else.
    pub fn spawn(path: &str, argv: &[String]) -> Result<Child> {
        let c_path = CString::new(path).map_err(|e| PbdError::Spawn(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            e,
        )))?;
        let c_argv: Vec<CString> = std::iter::once(c_path.clone())
            .chain(argv.iter().map(|a| CString::new(a.as_str()).unwrap()))
            .collect();

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                ptrace::traceme().expect("PTRACE_TRACEME failed in child");
                execv(&c_path, &c_argv).expect("execv failed in traced child");
                unreachable!("execv does not return on success");
            }
            Ok(ForkResult::Parent { child }) => {
                log!(LogDebug, "spawned traced child pid={}", child);
                Ok(Child { pid: child })
            }
            Err(e) => Err(PbdError::Spawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("fork() failed: {}", e),
            ))),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child's state changes.
    pub fn wait(&self) -> Result<Stop> {
        match waitpid(self.pid, None) {
            Ok(NixWaitStatus::Exited(_, code)) => Ok(Stop::Exited(Some(code))),
            Ok(NixWaitStatus::Signaled(_, _, _)) => Ok(Stop::Exited(None)),
            Ok(NixWaitStatus::Stopped(_, _)) => Ok(Stop::Trap),
            Ok(_) => Ok(Stop::Trap),
            Err(e) => Err(PbdError::tracing_fatal(None, e)),
        }
    }

    pub fn read_regs(&self) -> Result<user_regs_struct> {
        ptrace::getregs(self.pid).map_err(|e| PbdError::tracing_fatal(None, e))
    }

    pub fn write_regs(&self, regs: user_regs_struct) -> Result<()> {
        ptrace::setregs(self.pid, regs).map_err(|e| PbdError::tracing_fatal(None, e))
    }

    pub fn read_pc(&self) -> Result<u64> {
        Ok(self.read_regs()?.rip)
    }

    pub fn set_pc(&self, addr: u64) -> Result<()> {
        let mut regs = self.read_regs()?;
        regs.rip = addr;
        self.write_regs(regs)
    }

    pub fn read_bp(&self) -> Result<u64> {
        Ok(self.read_regs()?.rbp)
    }

    pub fn read_sp(&self) -> Result<u64> {
        Ok(self.read_regs()?.rsp)
    }

    /// Read the return address at function entry. On System V AMD64, the
    /// `call` instruction pushes it onto the stack, so right after the
    /// prologue breakpoint (the function's very first instruction) it
    /// sits at `[rsp]`.
    pub fn read_return_address(&self) -> Result<u64> {
        let sp = self.read_sp()?;
        self.read_word(sp)
    }

    /// Read a single word (8 bytes on this architecture) via
    /// `PTRACE_PEEKDATA`. Used by the breakpoint table, which must
    /// byte-patch a single opcode inside an otherwise-untouched word.
    pub fn read_word(&self, addr: u64) -> Result<u64> {
        ptrace::read(self.pid, addr as *mut c_void)
            .map(|v| v as u64)
            .map_err(|e| PbdError::tracing_fatal(Some(addr), e))
    }

    pub fn write_word(&self, addr: u64, word: u64) -> Result<()> {
        unsafe {
            ptrace::write(self.pid, addr as *mut c_void, word as *mut c_void)
        }
        .map_err(|e| PbdError::tracing_fatal(Some(addr), e))
    }

    /// Bulk-read `len` bytes starting at `addr`, preferring the batched
    /// `process_vm_readv` syscall and falling back to word-at-a-time
    /// `PTRACE_PEEKDATA` if it's unavailable (older kernels, or a
    /// restricted sandbox). Correctness does not depend on which path
    /// runs.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; len];
        let local = [IoVec::from_mut_slice(&mut buf)];
        let remote = [RemoteIoVec {
            base: addr as usize,
            len,
        }];

        match process_vm_readv(self.pid, &local, &remote) {
            Ok(n) if n == len => return Ok(buf),
            _ => {}
        }

        self.read_bytes_via_peek(addr, len)
    }

    fn read_bytes_via_peek(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let word_size = std::mem::size_of::<u64>();
        let mut offset = 0usize;
        while offset < len {
            let word = self.read_word(addr + offset as u64)?;
            let bytes = word.to_ne_bytes();
            let take = word_size.min(len - offset);
            out.extend_from_slice(&bytes[..take]);
            offset += take;
        }
        Ok(out)
    }

    /// Write `data` into the child starting at `addr`, word-at-a-time via
    /// `PTRACE_POKEDATA` (the teardown path and breakpoint installation
    /// only ever patch single bytes inside a word, so a bulk-write
    /// syscall buys nothing here).
    pub fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<()> {
        let word_size = std::mem::size_of::<u64>();
        let mut offset = 0usize;
        while offset < data.len() {
            let take = word_size.min(data.len() - offset);
            let mut word_bytes = if take < word_size {
                self.read_word(addr + offset as u64)?.to_ne_bytes()
            } else {
                [0u8; 8]
            };
            word_bytes[..take].copy_from_slice(&data[offset..offset + take]);
            self.write_word(addr + offset as u64, u64::from_ne_bytes(word_bytes))?;
            offset += take;
        }
        Ok(())
    }

    pub fn continue_running(&self) -> Result<()> {
        ptrace::cont(self.pid, None).map_err(|e| PbdError::tracing_fatal(None, e))
    }

    pub fn single_step(&self) -> Result<()> {
        ptrace::step(self.pid, None).map_err(|e| PbdError::tracing_fatal(None, e))
    }

    pub fn kill(&self) {
        let _ = nix::sys::signal::kill(self.pid, nix::sys::signal::Signal::SIGKILL);
    }
}

impl TracedMemory for Child {
    fn read_mem(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        self.read_bytes(addr, len)
    }

    fn read_bp(&self) -> Result<u64> {
        Child::read_bp(self)
    }
}
