//! Frame Stack.
//!
//! Recursion means the same local descriptors exist once per active call.
//! Each push clones the *shape* (the descriptors) but starts fresh
//! storage (new, un-initialized snapshots) for the new frame, so a
//! shadowed outer-frame local never leaks its value into the inner call.

use crate::child::TracedMemory;
use crate::error::Result;
use crate::variable::{Scope, VariableDescriptor, VariableSnapshot};

pub struct Frame {
    pub descriptors: Vec<VariableDescriptor>,
    pub snapshots: Vec<VariableSnapshot>,
    pub return_address: u64,
    pub frame_base: u64,
}

impl Frame {
    fn new(descriptors: Vec<VariableDescriptor>, return_address: u64, frame_base: u64, memory: &dyn TracedMemory) -> Result<Self> {
        let snapshots = descriptors
            .iter()
            .map(|d| VariableSnapshot::initial(d, memory, frame_base))
            .collect::<Result<Vec<_>>>()?;
        Ok(Frame {
            descriptors,
            snapshots,
            return_address,
            frame_base,
        })
    }
}

/// Owns the global variables (depth-independent, snapshotted once) and a
/// stack of per-call frames for locals. Depth is `frames.len()`; depth 0
/// means the traced function has not yet been entered.
pub struct FrameStack {
    local_descriptors: Vec<VariableDescriptor>,
    globals: Vec<VariableSnapshot>,
    global_descriptors: Vec<VariableDescriptor>,
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new(all_descriptors: Vec<VariableDescriptor>, memory: &dyn TracedMemory) -> Result<Self> {
        let (global_descriptors, local_descriptors): (Vec<_>, Vec<_>) = all_descriptors
            .into_iter()
            .partition(|d| d.scope == Scope::Global);
        let globals = global_descriptors
            .iter()
            .map(|d| VariableSnapshot::initial(d, memory, 0))
            .collect::<Result<Vec<_>>>()?;
        Ok(FrameStack {
            local_descriptors,
            globals,
            global_descriptors,
            frames: Vec::new(),
        })
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push a new frame on entry (or re-entry, for recursion), snapshotting
    /// fresh local storage. `frame_base` is the callee's `rbp` and
    /// `return_address` is read from `[rsp]` right at the prologue
    /// breakpoint.
    pub fn push(&mut self, return_address: u64, frame_base: u64, memory: &dyn TracedMemory) -> Result<()> {
        let frame = Frame::new(self.local_descriptors.clone(), return_address, frame_base, memory)?;
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame on return, restoring the caller's shadow
    /// (if any) as the current top.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Whether any currently-live frame still expects to return to
    /// `address`. Used to decide whether a return-site breakpoint should
    /// stay registered after a pop — direct recursion through one call
    /// site means several frames can share the same return address.
    pub fn frames_with_return_address(&self, address: u64) -> bool {
        self.frames.iter().any(|f| f.return_address == address)
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn global_descriptors(&self) -> &[VariableDescriptor] {
        &self.global_descriptors
    }

    pub fn globals(&self) -> &[VariableSnapshot] {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut [VariableSnapshot] {
        &mut self.globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{Encoding, Location};

    struct FakeMemory;
    impl TracedMemory for FakeMemory {
        fn read_mem(&self, _addr: u64, len: usize) -> Result<Vec<u8>> {
            Ok(vec![0u8; len])
        }
        fn read_bp(&self) -> Result<u64> {
            Ok(0)
        }
    }

    fn local(name: &str) -> VariableDescriptor {
        VariableDescriptor {
            name: name.into(),
            scope: Scope::Local,
            location: Location::FrameOffset(-8),
            byte_size: 4,
            encoding: Encoding::Signed,
            array_shape: None,
        }
    }

    #[test]
    fn push_and_pop_tracks_depth() {
        let mut stack = FrameStack::new(vec![local("n")], &FakeMemory).unwrap();
        assert_eq!(stack.depth(), 0);
        stack.push(0x400, 0x7fff0000, &FakeMemory).unwrap();
        assert_eq!(stack.depth(), 1);
        stack.push(0x404, 0x7ffeffe0, &FakeMemory).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().unwrap().return_address, 0x404);
        stack.pop();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().unwrap().return_address, 0x400);
    }

    #[test]
    fn recursive_push_gives_fresh_uninitialized_storage() {
        let mut stack = FrameStack::new(vec![local("n")], &FakeMemory).unwrap();
        stack.push(0x400, 0x7fff0000, &FakeMemory).unwrap();
        stack.top_mut().unwrap().snapshots[0].commit(vec![9, 0, 0, 0]);
        stack.push(0x404, 0x7ffeffe0, &FakeMemory).unwrap();
        assert!(!stack.top().unwrap().snapshots[0].initialized);
    }
}
