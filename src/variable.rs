//! Variable Descriptor, Snapshot, and Reader.
//!
//! A descriptor is static — it comes straight out of debug info and never
//! changes once resolved. A snapshot is the mutable half: the last byte
//! image read from the tracee, whether it has been observed written to
//! yet, and (for locals only) the scratch image used to distinguish
//! genuine writes from uninitialized stack garbage.

use crate::child::TracedMemory;
use crate::error::Result;
use std::fmt;

/// Where a variable lives relative to the function under test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Scope {
    Global,
    Local,
}

/// How to interpret a variable's raw byte image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Encoding {
    Signed,
    Unsigned,
    Float,
    Pointer,
    Enum,
}

/// A variable's address, expressed either as an absolute address (globals)
/// or an offset from the frame base (locals, `DW_OP_fbreg`).
#[derive(Copy, Clone, Debug)]
pub enum Location {
    Absolute(u64),
    FrameOffset(i64),
}

/// Array dimensionality, outermost dimension first (max 8 dimensions).
#[derive(Clone, Debug)]
pub struct ArrayShape {
    pub element_byte_size: usize,
    pub counts: Vec<usize>,
}

impl ArrayShape {
    pub fn total_elements(&self) -> usize {
        self.counts.iter().product()
    }

    /// Convert a flat byte offset into the array into a multi-index,
    /// outermost dimension first, by repeated division.
    pub fn multi_index(&self, byte_offset: usize) -> Vec<usize> {
        let mut element = byte_offset / self.element_byte_size;
        let mut indices = vec![0usize; self.counts.len()];
        for (i, &count) in self.counts.iter().enumerate().rev() {
            indices[i] = element % count;
            element /= count;
        }
        indices
    }
}

#[derive(Clone, Debug)]
pub struct VariableDescriptor {
    pub name: String,
    pub scope: Scope,
    pub location: Location,
    pub byte_size: usize,
    pub encoding: Encoding,
    pub array_shape: Option<ArrayShape>,
}

impl VariableDescriptor {
    pub fn is_array(&self) -> bool {
        self.array_shape.is_some()
    }

    /// Resolve the absolute address of byte 0 of this variable in the
    /// tracee, given the current frame base (ignored for globals).
    pub fn effective_address(&self, frame_base: u64) -> u64 {
        match self.location {
            Location::Absolute(addr) => addr,
            Location::FrameOffset(off) => (frame_base as i64 + off) as u64,
        }
    }
}

/// The last observed byte image of a variable, plus the bookkeeping
/// needed for first-write detection.
#[derive(Clone, Debug)]
pub struct VariableSnapshot {
    pub last_image: Vec<u8>,
    pub initialized: bool,
    /// Garbage-on-entry image for locals, compared against to detect the
    /// first real write; irrelevant once `initialized` is true. Globals
    /// start `initialized` and never consult this field.
    scratch_image: Vec<u8>,
}

impl VariableSnapshot {
    /// Take the first snapshot of a variable right after its enclosing
    /// frame (or the program, for globals) becomes live.
    pub fn initial(descriptor: &VariableDescriptor, memory: &dyn TracedMemory, frame_base: u64) -> Result<Self> {
        let addr = descriptor.effective_address(frame_base);
        let image = memory.read_mem(addr, descriptor.byte_size)?;
        match descriptor.scope {
            Scope::Global => Ok(VariableSnapshot {
                last_image: image,
                initialized: true,
                scratch_image: Vec::new(),
            }),
            Scope::Local => Ok(VariableSnapshot {
                scratch_image: image.clone(),
                last_image: image,
                initialized: false,
            }),
        }
    }

    /// Re-read this variable's current bytes and report whether they
    /// differ from what was last observed. Returns `(changed, new_image)`
    /// without mutating `self` — the detector decides whether and how to
    /// commit the update after it finishes reporting.
    pub fn poll(&self, descriptor: &VariableDescriptor, memory: &dyn TracedMemory, frame_base: u64) -> Result<(bool, Vec<u8>)> {
        let addr = descriptor.effective_address(frame_base);
        let fresh = memory.read_mem(addr, descriptor.byte_size)?;
        let changed = fresh != self.last_image;
        Ok((changed, fresh))
    }

    /// Commit a freshly-read image as the new baseline.
    pub fn commit(&mut self, fresh: Vec<u8>) {
        self.last_image = fresh;
        self.initialized = true;
    }

    /// Whether this snapshot would still show zero as the displayed
    /// before-value if polled right now — `None` once a local has taken
    /// its first real write, or always for a global. Exposed mainly for
    /// tests; the detector computes the same thing inline against
    /// whatever region it locates as changed, since the whole-variable
    /// zero buffer this returns must never be used as a diff baseline
    /// (it would make unrelated scratch garbage look like a change too).
    pub fn synthetic_before(&self) -> Option<Vec<u8>> {
        if self.initialized {
            None
        } else {
            Some(vec![0u8; self.last_image.len()])
        }
    }

    #[cfg(test)]
    pub fn scratch_image_for_test(&self) -> &[u8] {
        &self.scratch_image
    }
}

/// Interpret a fixed-size byte image as a signed integer (little-endian,
/// the only order this architecture produces).
fn as_signed(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    let mut v = i64::from_le_bytes(buf);
    if n < 8 && n > 0 {
        let sign_bit = 1i64 << (n * 8 - 1);
        if v & sign_bit != 0 {
            v -= 1i64 << (n * 8);
        }
    }
    v
}

fn as_unsigned(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

fn as_float(bytes: &[u8]) -> f64 {
    match bytes.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[..4]);
            f32::from_le_bytes(buf) as f64
        }
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            f64::from_le_bytes(buf)
        }
        // `long double` (80-bit extended, padded to 16 bytes by the
        // compiler's ABI). We keep only the portion a plain f64 can hold;
        // full extended-precision display is not attempted.
        _ => {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            f64::from_le_bytes(buf)
        }
    }
}

fn is_printable(byte: u8) -> bool {
    byte.is_ascii_graphic() || byte == b' '
}

/// Render a byte image per the signed/unsigned/float/pointer formatting rules.
pub fn format_value(bytes: &[u8], encoding: Encoding, byte_size: usize) -> String {
    match encoding {
        Encoding::Signed | Encoding::Enum => {
            let v = as_signed(bytes);
            if byte_size == 1 && is_printable(bytes[0]) {
                format!("{} (CH)", v)
            } else {
                format!("{}", v)
            }
        }
        Encoding::Unsigned => {
            let v = as_unsigned(bytes);
            if byte_size == 1 && is_printable(bytes[0]) {
                format!("{} (CH)", v)
            } else {
                format!("{}", v)
            }
        }
        Encoding::Float => format!("{:.6}", as_float(bytes)),
        Encoding::Pointer => {
            let v = as_unsigned(bytes);
            let width = byte_size * 2;
            format!("0x{:0width$X}", v, width = width)
        }
    }
}

/// A single changed array element, identified by its multi-index.
pub struct ArrayElementChange {
    pub indices: Vec<usize>,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

impl fmt::Display for ArrayElementChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for idx in &self.indices {
            write!(f, "[{}]", idx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(scope: Scope, byte_size: usize) -> VariableDescriptor {
        VariableDescriptor {
            name: "x".into(),
            scope,
            location: Location::Absolute(0x1000),
            byte_size,
            encoding: Encoding::Signed,
            array_shape: None,
        }
    }

    struct FakeMemory(Vec<u8>);
    impl TracedMemory for FakeMemory {
        fn read_mem(&self, _addr: u64, len: usize) -> Result<Vec<u8>> {
            Ok(self.0[..len].to_vec())
        }
        fn read_bp(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn global_starts_initialized() {
        let d = descriptor(Scope::Global, 4);
        let mem = FakeMemory(vec![1, 2, 3, 4]);
        let snap = VariableSnapshot::initial(&d, &mem, 0).unwrap();
        assert!(snap.initialized);
        assert!(snap.synthetic_before().is_none());
    }

    #[test]
    fn local_starts_uninitialized_and_synthesizes_zero() {
        let d = descriptor(Scope::Local, 4);
        let mem = FakeMemory(vec![0xde, 0xad, 0xbe, 0xef]);
        let snap = VariableSnapshot::initial(&d, &mem, 0).unwrap();
        assert!(!snap.initialized);
        assert_eq!(snap.synthetic_before(), Some(vec![0, 0, 0, 0]));
        assert_eq!(snap.scratch_image_for_test(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn signed_formatting() {
        assert_eq!(format_value(&(-5i32).to_le_bytes(), Encoding::Signed, 4), "-5");
    }

    #[test]
    fn char_gets_printable_annotation() {
        assert_eq!(format_value(&[b'A'], Encoding::Signed, 1), "65 (CH)");
    }

    #[test]
    fn pointer_formats_as_uppercase_hex() {
        assert_eq!(format_value(&0xABCDu64.to_le_bytes()[..8], Encoding::Pointer, 8), "0x000000000000ABCD");
    }

    #[test]
    fn float_formats_with_six_decimals() {
        assert_eq!(format_value(&3.5f64.to_le_bytes(), Encoding::Float, 8), "3.500000");
    }

    #[test]
    fn array_shape_computes_multi_index_outermost_first() {
        let shape = ArrayShape {
            element_byte_size: 4,
            counts: vec![2, 3],
        };
        // element 4 (0-indexed) in a 2x3 array of 4-byte ints: row 1, col 1
        assert_eq!(shape.multi_index(4 * 4), vec![1, 1]);
        assert_eq!(shape.total_elements(), 6);
    }
}
