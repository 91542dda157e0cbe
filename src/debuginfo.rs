//! Debug-info oracle: resolves a function name to its address range, its
//! line table, and its variables, by reading DWARF out of the ELF binary
//! with `gimli` + `goblin`.
//!
//! This is the one place in the crate allowed to know what DWARF tags and
//! attributes look like; everything downstream only sees
//! [`VariableDescriptor`], [`LineRecord`], and [`FunctionInfo`].

use crate::error::{PbdError, Result};
use crate::log::{log, LogLevel::LogWarn};
use crate::variable::{ArrayShape, Encoding, Location, Scope, VariableDescriptor};
use gimli::{
    Attribute, DebuggingInformationEntry, Dwarf, EndianSlice, Operation, Reader, RunTimeEndian,
    Unit, UnitOffset,
};
use goblin::elf::Elf;
use std::borrow::Cow;
use std::collections::HashMap;

/// What kind of line-table row this is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineKind {
    Statement,
    SequenceEnd,
    Block,
}

#[derive(Clone, Debug)]
pub struct LineRecord {
    pub address: u64,
    pub line: u32,
    pub kind: LineKind,
}

/// Everything the planner and controller need about the traced function.
pub struct FunctionInfo {
    pub low_pc: u64,
    pub high_pc: u64,
    pub lines: Vec<LineRecord>,
    pub variables: Vec<VariableDescriptor>,
    pub source_path: Option<String>,
}

/// Parsed DWARF for one executable, held for the lifetime of the run.
pub struct DebugInfo<'a> {
    dwarf: Dwarf<EndianSlice<'a, RunTimeEndian>>,
}

type SliceReader<'a> = EndianSlice<'a, RunTimeEndian>;

impl<'a> DebugInfo<'a> {
    /// Parse the ELF and load its DWARF sections. `data` must outlive the
    /// returned value; callers mmap or read the executable once up front
    /// and keep the buffer alive for the whole run.
    pub fn load(data: &'a [u8]) -> Result<Self> {
        let elf = Elf::parse(data)
            .map_err(|e| PbdError::DebugInfo(format!("failed to parse ELF: {}", e)))?;
        let endian = if elf.little_endian {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let section_data = |name: &str| -> Cow<'a, [u8]> {
            for header in &elf.section_headers {
                if let Some(sh_name) = elf.shdr_strtab.get_at(header.sh_name) {
                    if sh_name == name {
                        let start = header.sh_offset as usize;
                        let end = start + header.sh_size as usize;
                        if end <= data.len() {
                            return Cow::Borrowed(&data[start..end]);
                        }
                    }
                }
            }
            Cow::Borrowed(&[][..])
        };

        let dwarf = Dwarf::load::<_, std::convert::Infallible>(|id| {
            let name = id.name();
            Ok(EndianSlice::new(
                Box::leak(section_data(name).into_owned().into_boxed_slice()),
                endian,
            ))
        })
        .map_err(|e| PbdError::DebugInfo(format!("failed to load DWARF sections: {:?}", e)))?;

        Ok(DebugInfo { dwarf })
    }

    /// Resolve `function_name` to its address range, line table, and
    /// parameter/local/global variable descriptors. Returns
    /// [`PbdError::DebugInfo`] if the function can't be found, lacks a
    /// usable address range, or its frame base isn't a single
    /// `DW_OP_call_frame_cfa`/`DW_OP_breg6`/`DW_OP_reg6` atom.
    pub fn resolve_function(&self, function_name: &str) -> Result<FunctionInfo> {
        let mut units = self.dwarf.units();
        while let Some(header) = units
            .next()
            .map_err(|e| PbdError::DebugInfo(format!("malformed unit header: {:?}", e)))?
        {
            let unit = self
                .dwarf
                .unit(header)
                .map_err(|e| PbdError::DebugInfo(format!("malformed unit: {:?}", e)))?;

            if let Some(found) = self.find_in_unit(&unit, function_name)? {
                return Ok(found);
            }
        }
        Err(PbdError::DebugInfo(format!(
            "function '{}' not found in debug info",
            function_name
        )))
    }

    fn find_in_unit(
        &self,
        unit: &Unit<SliceReader<'a>>,
        function_name: &str,
    ) -> Result<Option<FunctionInfo>> {
        let mut entries = unit.entries();
        let mut global_descriptors = Vec::new();
        let mut source_path = None;
        // `next_dfs` yields a depth *delta* relative to the previous entry,
        // not an absolute depth, so the root (the compile unit DIE itself,
        // at depth 0) has to be tracked by hand: its direct children, where
        // top-level globals live, sit at depth 1.
        let mut depth = 0isize;

        while let Some((delta, entry)) = entries
            .next_dfs()
            .map_err(|e| PbdError::DebugInfo(format!("malformed DIE tree: {:?}", e)))?
        {
            depth += delta;

            if entry.tag() == gimli::DW_TAG_compile_unit {
                let name = self.die_name(unit, entry)?;
                let comp_dir = entry
                    .attr_value(gimli::DW_AT_comp_dir)
                    .ok()
                    .flatten()
                    .and_then(|v| self.dwarf.attr_string(unit, v).ok())
                    .and_then(|s| s.to_string_lossy().ok().map(|c| c.into_owned()));
                source_path = match (comp_dir, name) {
                    (Some(dir), Some(n)) if !n.starts_with('/') => Some(format!("{}/{}", dir, n)),
                    (_, Some(n)) => Some(n),
                    _ => None,
                };
            }

            if entry.tag() == gimli::DW_TAG_variable && depth == 1 {
                if let Some(desc) = self.variable_descriptor(unit, entry, Scope::Global)? {
                    global_descriptors.push(desc);
                }
            }

            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            let name = match self.die_name(unit, entry)? {
                Some(n) if n == function_name => n,
                _ => continue,
            };
            self.validate_frame_base(unit, entry, &name)?;

            let low_pc = self.die_low_pc(unit, entry)?;
            let high_pc = self.die_high_pc(unit, entry, low_pc)?;
            let (low_pc, high_pc) = match (low_pc, high_pc) {
                (Some(l), Some(h)) => (l, h),
                _ => {
                    return Err(PbdError::DebugInfo(format!(
                        "function '{}' has no usable address range",
                        function_name
                    )))
                }
            };

            let mut variables = global_descriptors.clone();
            variables.extend(self.collect_locals(unit, entry)?);

            let lines = self.line_records(unit, low_pc, high_pc)?;

            return Ok(Some(FunctionInfo {
                low_pc,
                high_pc,
                lines,
                variables,
                source_path: source_path.clone(),
            }));
        }
        Ok(None)
    }

    fn collect_locals(
        &self,
        unit: &Unit<SliceReader<'a>>,
        subprogram: &DebuggingInformationEntry<SliceReader<'a>>,
    ) -> Result<Vec<VariableDescriptor>> {
        let mut out = Vec::new();
        let offset = subprogram.offset();
        let mut tree = unit
            .entries_tree(Some(offset))
            .map_err(|e| PbdError::DebugInfo(format!("malformed subprogram subtree: {:?}", e)))?;
        let root = tree
            .root()
            .map_err(|e| PbdError::DebugInfo(format!("malformed subprogram root: {:?}", e)))?;
        self.walk_locals(unit, root, &mut out)?;
        Ok(out)
    }

    fn walk_locals(
        &self,
        unit: &Unit<SliceReader<'a>>,
        mut node: gimli::EntriesTreeNode<SliceReader<'a>>,
        out: &mut Vec<VariableDescriptor>,
    ) -> Result<()> {
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|e| PbdError::DebugInfo(format!("malformed DIE subtree: {:?}", e)))?
        {
            let entry = child.entry();
            let tag = entry.tag();
            if tag == gimli::DW_TAG_formal_parameter || tag == gimli::DW_TAG_variable {
                if let Some(desc) = self.variable_descriptor(unit, entry, Scope::Local)? {
                    out.push(desc);
                }
            }
            if tag == gimli::DW_TAG_lexical_block {
                self.walk_locals(unit, child, out)?;
            }
        }
        Ok(())
    }

    fn variable_descriptor(
        &self,
        unit: &Unit<SliceReader<'a>>,
        entry: &DebuggingInformationEntry<SliceReader<'a>>,
        scope: Scope,
    ) -> Result<Option<VariableDescriptor>> {
        let name = match self.die_name(unit, entry)? {
            Some(n) => n,
            None => return Ok(None),
        };

        let location = match entry
            .attr(gimli::DW_AT_location)
            .map_err(|e| PbdError::DebugInfo(format!("malformed location attribute: {:?}", e)))?
        {
            Some(attr) => match self.resolve_location(unit, &attr)? {
                Some(loc) => loc,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let type_offset = entry
            .attr_value(gimli::DW_AT_type)
            .map_err(|e| PbdError::DebugInfo(format!("malformed type attribute: {:?}", e)))?
            .and_then(|v| v.offset_value());
        let type_offset = match type_offset {
            Some(o) => UnitOffset(o.0),
            None => return Ok(None),
        };

        let (byte_size, encoding, array_shape) = match self.resolve_type(unit, type_offset)? {
            Some(t) => t,
            None => return Ok(None),
        };

        Ok(Some(VariableDescriptor {
            name,
            scope,
            location,
            byte_size,
            encoding,
            array_shape,
        }))
    }

    /// Decode a `DW_AT_location` exprloc into our [`Location`] model.
    /// Only single-atom expressions are supported: `DW_OP_addr` for
    /// globals, `DW_OP_fbreg` for locals relative to the frame base.
    fn resolve_location(
        &self,
        unit: &Unit<SliceReader<'a>>,
        attr: &Attribute<SliceReader<'a>>,
    ) -> Result<Option<Location>> {
        let expr = match attr.exprloc_value() {
            Some(e) => e,
            None => return Ok(None),
        };
        let mut ops = expr.operations(unit.encoding());
        match ops
            .next()
            .map_err(|e| PbdError::DebugInfo(format!("malformed location expression: {:?}", e)))?
        {
            Some(Operation::Address { address }) => Ok(Some(Location::Absolute(address))),
            Some(Operation::FrameOffset { offset }) => Ok(Some(Location::FrameOffset(offset))),
            _ => Ok(None),
        }
    }

    /// Validate that `entry`'s `DW_AT_frame_base` is one of the single
    /// atoms the controller assumes when it hands `rbp` to every
    /// `Location::FrameOffset`: `DW_OP_call_frame_cfa`, `DW_OP_breg6`, or
    /// `DW_OP_reg6`. Anything else (missing attribute, multi-atom
    /// expression, a register other than rbp) means the controller would
    /// compute wrong addresses for every local without ever noticing, so
    /// this rejects the function outright instead.
    fn validate_frame_base(
        &self,
        unit: &Unit<SliceReader<'a>>,
        entry: &DebuggingInformationEntry<SliceReader<'a>>,
        function_name: &str,
    ) -> Result<()> {
        const RBP: u16 = 6;

        let attr = entry
            .attr(gimli::DW_AT_frame_base)
            .map_err(|e| PbdError::DebugInfo(format!("malformed frame_base attribute: {:?}", e)))?
            .ok_or_else(|| {
                PbdError::DebugInfo(format!(
                    "function '{}' has no DW_AT_frame_base",
                    function_name
                ))
            })?;
        let expr = attr.exprloc_value().ok_or_else(|| {
            PbdError::DebugInfo(format!(
                "function '{}' has a non-exprloc frame_base",
                function_name
            ))
        })?;

        let mut ops = expr.operations(unit.encoding());
        let first = ops
            .next()
            .map_err(|e| PbdError::DebugInfo(format!("malformed frame_base expression: {:?}", e)))?;
        let single_atom_ok = matches!(
            first,
            Some(Operation::CallFrameCfa)
                | Some(Operation::Register { register: gimli::Register(RBP) })
                | Some(Operation::RegisterOffset { register: gimli::Register(RBP), .. })
        );
        let trailing = ops
            .next()
            .map_err(|e| PbdError::DebugInfo(format!("malformed frame_base expression: {:?}", e)))?;

        if !single_atom_ok || trailing.is_some() {
            return Err(PbdError::DebugInfo(format!(
                "function '{}' has an unsupported frame_base expression (only DW_OP_call_frame_cfa/DW_OP_breg6/DW_OP_reg6 are supported)",
                function_name
            )));
        }
        Ok(())
    }

    /// Walk a `DW_AT_type` chain, resolving `typedef`/`const`/`volatile`
    /// passthroughs, to a `(byte_size, encoding, array_shape)` triple.
    /// Returns `Ok(None)` for a tag we don't know how to read (struct,
    /// union, ...) so the caller can skip just this one variable instead
    /// of failing the whole function.
    fn resolve_type(
        &self,
        unit: &Unit<SliceReader<'a>>,
        offset: UnitOffset,
    ) -> Result<Option<(usize, Encoding, Option<ArrayShape>)>> {
        let entry = unit
            .entry(offset)
            .map_err(|e| PbdError::DebugInfo(format!("dangling type reference: {:?}", e)))?;

        match entry.tag() {
            gimli::DW_TAG_typedef | gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type => {
                match self.next_type_offset(&entry)? {
                    Some(next) => self.resolve_type(unit, next),
                    // A bare `const void` or similar with no DW_AT_type:
                    // treat as an opaque unsigned byte.
                    None => Ok(Some((1, Encoding::Unsigned, None))),
                }
            }
            gimli::DW_TAG_pointer_type => {
                let byte_size = self.die_byte_size(&entry)?.unwrap_or(8);
                Ok(Some((byte_size, Encoding::Pointer, None)))
            }
            gimli::DW_TAG_enumeration_type => {
                let byte_size = self.die_byte_size(&entry)?.unwrap_or(4);
                Ok(Some((byte_size, Encoding::Enum, None)))
            }
            gimli::DW_TAG_base_type => {
                let byte_size = self.die_byte_size(&entry)?.unwrap_or(4);
                let dw_encoding = entry
                    .attr_value(gimli::DW_AT_encoding)
                    .map_err(|e| PbdError::DebugInfo(format!("malformed encoding: {:?}", e)))?
                    .and_then(|v| v.udata_value());
                let encoding = match dw_encoding {
                    Some(e) if e as u8 == gimli::DW_ATE_float.0 => Encoding::Float,
                    Some(e) if e as u8 == gimli::DW_ATE_unsigned.0 => Encoding::Unsigned,
                    Some(e) if e as u8 == gimli::DW_ATE_unsigned_char.0 => Encoding::Unsigned,
                    Some(e) if e as u8 == gimli::DW_ATE_boolean.0 => Encoding::Unsigned,
                    _ => Encoding::Signed,
                };
                Ok(Some((byte_size, encoding, None)))
            }
            gimli::DW_TAG_array_type => {
                let element_offset = self
                    .next_type_offset(&entry)?
                    .ok_or_else(|| PbdError::DebugInfo("array type missing element type".into()))?;
                let (element_byte_size, element_encoding, _) =
                    match self.resolve_type(unit, element_offset)? {
                        Some(t) => t,
                        None => return Ok(None),
                    };

                let counts = self.array_dimensions(unit, &entry)?;
                if counts.is_empty() || counts.len() > 8 {
                    return Err(PbdError::DebugInfo(format!(
                        "array has unsupported dimensionality ({})",
                        counts.len()
                    )));
                }
                let total: usize = counts.iter().product();
                Ok(Some((
                    total * element_byte_size,
                    element_encoding,
                    Some(ArrayShape {
                        element_byte_size,
                        counts,
                    }),
                )))
            }
            other => {
                log!(
                    LogWarn,
                    "skipping variable of unsupported DWARF type tag {}",
                    other
                );
                Ok(None)
            }
        }
    }

    /// Dimension counts for an array, outermost first. Handles both
    /// `DW_AT_upper_bound` (GCC: inclusive upper bound, count = bound+1)
    /// and `DW_AT_count` (Clang: direct element count).
    fn array_dimensions(
        &self,
        unit: &Unit<SliceReader<'a>>,
        array_entry: &DebuggingInformationEntry<SliceReader<'a>>,
    ) -> Result<Vec<usize>> {
        let mut tree = unit
            .entries_tree(Some(array_entry.offset()))
            .map_err(|e| PbdError::DebugInfo(format!("malformed array subtree: {:?}", e)))?;
        let root = tree
            .root()
            .map_err(|e| PbdError::DebugInfo(format!("malformed array root: {:?}", e)))?;
        let mut counts = Vec::new();
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|e| PbdError::DebugInfo(format!("malformed subrange entry: {:?}", e)))?
        {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_subrange_type {
                continue;
            }
            let count = if let Some(c) = entry
                .attr_value(gimli::DW_AT_count)
                .map_err(|e| PbdError::DebugInfo(format!("malformed count: {:?}", e)))?
                .and_then(|v| v.udata_value())
            {
                c as usize
            } else if let Some(ub) = entry
                .attr_value(gimli::DW_AT_upper_bound)
                .map_err(|e| PbdError::DebugInfo(format!("malformed upper bound: {:?}", e)))?
                .and_then(|v| v.udata_value())
            {
                ub as usize + 1
            } else {
                return Err(PbdError::DebugInfo(
                    "array subrange has neither DW_AT_count nor DW_AT_upper_bound".into(),
                ));
            };
            counts.push(count);
        }
        Ok(counts)
    }

    fn next_type_offset(
        &self,
        entry: &DebuggingInformationEntry<SliceReader<'a>>,
    ) -> Result<Option<UnitOffset>> {
        Ok(entry
            .attr_value(gimli::DW_AT_type)
            .map_err(|e| PbdError::DebugInfo(format!("malformed type attribute: {:?}", e)))?
            .and_then(|v| v.offset_value())
            .map(|o| UnitOffset(o.0)))
    }

    fn die_byte_size(&self, entry: &DebuggingInformationEntry<SliceReader<'a>>) -> Result<Option<usize>> {
        Ok(entry
            .attr_value(gimli::DW_AT_byte_size)
            .map_err(|e| PbdError::DebugInfo(format!("malformed byte_size: {:?}", e)))?
            .and_then(|v| v.udata_value())
            .map(|v| v as usize))
    }

    fn die_name(
        &self,
        unit: &Unit<SliceReader<'a>>,
        entry: &DebuggingInformationEntry<SliceReader<'a>>,
    ) -> Result<Option<String>> {
        match entry
            .attr_value(gimli::DW_AT_name)
            .map_err(|e| PbdError::DebugInfo(format!("malformed name attribute: {:?}", e)))?
        {
            Some(value) => {
                let s = self
                    .dwarf
                    .attr_string(unit, value)
                    .map_err(|e| PbdError::DebugInfo(format!("malformed name string: {:?}", e)))?;
                Ok(Some(
                    s.to_string_lossy()
                        .map_err(|e| PbdError::DebugInfo(format!("non-utf8 name: {:?}", e)))?
                        .into_owned(),
                ))
            }
            None => Ok(None),
        }
    }

    fn die_low_pc(
        &self,
        unit: &Unit<SliceReader<'a>>,
        entry: &DebuggingInformationEntry<SliceReader<'a>>,
    ) -> Result<Option<u64>> {
        Ok(self
            .dwarf
            .die_ranges(unit, entry)
            .ok()
            .and_then(|mut ranges| ranges.next().ok().flatten())
            .map(|r| r.begin)
            .or_else(|| {
                entry
                    .attr_value(gimli::DW_AT_low_pc)
                    .ok()
                    .flatten()
                    .and_then(|v| v.udata_value())
            }))
    }

    fn die_high_pc(
        &self,
        unit: &Unit<SliceReader<'a>>,
        entry: &DebuggingInformationEntry<SliceReader<'a>>,
        low_pc: Option<u64>,
    ) -> Result<Option<u64>> {
        let low = match low_pc {
            Some(l) => l,
            None => return Ok(None),
        };
        let attr = entry
            .attr_value(gimli::DW_AT_high_pc)
            .map_err(|e| PbdError::DebugInfo(format!("malformed high_pc: {:?}", e)))?;
        Ok(match attr {
            Some(gimli::AttributeValue::Addr(a)) => Some(a),
            Some(other) => other.udata_value().map(|offset| low + offset),
            None => None,
        })
    }

    /// Flatten this unit's line program into [`LineRecord`]s whose
    /// address falls within `[low_pc, high_pc)`.
    fn line_records(
        &self,
        unit: &Unit<SliceReader<'a>>,
        low_pc: u64,
        high_pc: u64,
    ) -> Result<Vec<LineRecord>> {
        let program = match &unit.line_program {
            Some(p) => p.clone(),
            None => return Ok(Vec::new()),
        };
        let mut rows = program.rows();
        let mut records = Vec::new();
        while let Some((_, row)) = rows
            .next_row()
            .map_err(|e| PbdError::DebugInfo(format!("malformed line program: {:?}", e)))?
        {
            let addr = row.address();
            if addr < low_pc || addr >= high_pc {
                continue;
            }
            let line = row.line().map(|l| l.get() as u32).unwrap_or(0);
            let kind = if row.end_sequence() {
                LineKind::SequenceEnd
            } else if row.is_stmt() {
                LineKind::Statement
            } else {
                LineKind::Block
            };
            records.push(LineRecord {
                address: addr,
                line,
                kind,
            });
        }
        records.sort_by_key(|r| r.address);
        records.dedup_by_key(|r| r.address);
        Ok(records)
    }
}

/// Group line records by their source line number, preserving address
/// order — used by the planner to pick one representative address per
/// statement.
pub fn group_by_line(lines: &[LineRecord]) -> HashMap<u32, Vec<u64>> {
    let mut out: HashMap<u32, Vec<u64>> = HashMap::new();
    for record in lines {
        if record.kind == LineKind::Statement {
            out.entry(record.line).or_default().push(record.address);
        }
    }
    out
}
