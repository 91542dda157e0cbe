//! Breakpoint Table.
//!
//! A map from address to the byte it overwrote with `0xCC` (`INT3`),
//! plus the step-over protocol that temporarily restores that byte so
//! the child can execute the real instruction once before the trap is
//! rearmed.

use crate::child::Child;
use crate::error::Result;
use std::collections::HashMap;

const TRAP_OPCODE: u8 = 0xCC;

#[derive(Clone, Copy, Debug)]
pub struct BreakpointRecord {
    pub address: u64,
    pub original_byte: u8,
    pub line_no: Option<u32>,
}

/// Owns every installed trap and the atomic step-over-and-rearm protocol.
/// All mutation goes through `&Child`, so the struct itself carries no
/// handle to the tracee.
pub struct BreakpointTable {
    records: HashMap<u64, BreakpointRecord>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        BreakpointTable {
            records: HashMap::new(),
        }
    }

    /// Install traps at every address in `plan`, recording each original
    /// byte before overwriting it. If installation of any address fails,
    /// no partial state is left behind: whatever was installed so far is
    /// torn down first.
    pub fn install_all(&mut self, child: &Child, plan: &[(u64, Option<u32>)]) -> Result<()> {
        for &(addr, line_no) in plan {
            if let Err(e) = self.install_one(child, addr, line_no) {
                let _ = self.teardown(child);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn install_one(&mut self, child: &Child, address: u64, line_no: Option<u32>) -> Result<()> {
        if self.records.contains_key(&address) {
            return Ok(());
        }
        let original = child.read_bytes(address, 1)?[0];
        child.write_bytes(address, &[TRAP_OPCODE])?;
        self.records.insert(
            address,
            BreakpointRecord {
                address,
                original_byte: original,
                line_no,
            },
        );
        Ok(())
    }

    pub fn find(&self, address: u64) -> Option<&BreakpointRecord> {
        self.records.get(&address)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.records.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Execute the real instruction at `address` exactly once, then
    /// restore the trap. Must run as a single atomic unit relative to
    /// the child: rewind PC to the breakpoint, restore the original
    /// byte, single-step, then reinstall `0xCC`.
    pub fn step_over_and_rearm(&self, child: &Child, address: u64) -> Result<()> {
        let record = match self.records.get(&address) {
            Some(r) => *r,
            None => return Ok(()),
        };

        child.set_pc(address)?;
        child.write_bytes(address, &[record.original_byte])?;
        child.single_step()?;
        child.wait()?;
        child.write_bytes(address, &[TRAP_OPCODE])?;
        Ok(())
    }

    /// Remove every installed trap, restoring original bytes. Called on
    /// normal completion and on the tracing-fatal path before the child
    /// is killed, so a partially-patched binary is never left behind in
    /// a still-running process.
    pub fn teardown(&mut self, child: &Child) -> Result<()> {
        for record in self.records.values() {
            child.write_bytes(record.address, &[record.original_byte])?;
        }
        self.records.clear();
        Ok(())
    }

    /// Adjust a PC that landed one byte past a trap (the `0xCC` itself is
    /// a one-byte instruction, so `rip` already points at the following
    /// byte when the trap fires — nothing to rewind on this
    /// architecture). Kept as a named seam in case a future architecture
    /// needs it.
    pub fn breakpoint_address_for_trap_pc(&self, trap_pc: u64) -> Option<u64> {
        let candidate = trap_pc.wrapping_sub(1);
        if self.records.contains_key(&candidate) {
            Some(candidate)
        } else if self.records.contains_key(&trap_pc) {
            Some(trap_pc)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_trap_pc_accounts_for_the_int3_width() {
        let mut table = BreakpointTable::new();
        table.records.insert(
            0x1000,
            BreakpointRecord {
                address: 0x1000,
                original_byte: 0x55,
                line_no: Some(10),
            },
        );
        assert_eq!(table.breakpoint_address_for_trap_pc(0x1001), Some(0x1000));
        assert_eq!(table.breakpoint_address_for_trap_pc(0x2000), None);
    }

    #[test]
    fn empty_table_reports_correctly() {
        let table = BreakpointTable::new();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert!(table.find(0x1000).is_none());
    }
}
