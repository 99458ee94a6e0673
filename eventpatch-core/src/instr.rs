use std::fmt;
use std::str::FromStr;

use crate::catalog::{ArgDoc, Catalog, InstrDoc};
use crate::codec::{layout, pack, unpack, ArgType, ArgValue};
use crate::edits::EditError;
use crate::event::{Instruction, Parameter};
use crate::ledger::OldParams;

/// Category of event-initialization instructions.
pub const INIT_CATEGORY: i32 = 2000;
/// Long form: (slot, event id, args...).
pub const INIT_OPCODE: i32 = 0;
/// Short form: (event id, args...).
pub const INIT_COMMON_OPCODE: i32 = 6;

/// Instruction the runtime treats as inert. Removed instructions are
/// overwritten with it so that indices do not shift.
pub const REMOVED_CATEGORY: i32 = 1014;
pub const REMOVED_OPCODE: i32 = 69;

pub fn is_init_shape(category: i32, opcode: i32) -> bool {
    category == INIT_CATEGORY && (opcode == INIT_OPCODE || opcode == INIT_COMMON_OPCODE)
}

/// `X<offset>` or `X<offset>_<length>`: the argument takes its value from
/// `length` bytes at `offset` of the event's own call-time arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placeholder {
    pub source_offset: u32,
    pub length: u32,
}

impl Placeholder {
    pub fn is_token(s: &str) -> bool {
        let s = s.trim();
        s.len() > 1 && s.starts_with('X') && s[1..].starts_with(|c: char| c.is_ascii_digit())
    }
}

impl FromStr for Placeholder {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let bad = |reason: &'static str| EditError::BadPlaceholder {
            token: token.to_string(),
            reason,
        };
        let body = token.strip_prefix('X').ok_or_else(|| bad("must start with X"))?;
        let (offset, length) = match body.split_once('_') {
            Some((o, l)) => (o, Some(l)),
            None => (body, None),
        };
        let source_offset: u32 = offset.parse().map_err(|_| bad("offset is not a number"))?;
        let length: u32 = match length {
            Some(l) => l.parse().map_err(|_| bad("length is not a number"))?,
            None => 4,
        };
        if source_offset % 4 != 0 {
            return Err(bad("offset must be a multiple of 4"));
        }
        if length == 0 || length > 4 {
            return Err(bad("length must be between 1 and 4"));
        }
        Ok(Placeholder {
            source_offset,
            length,
        })
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{}_{}", self.source_offset, self.length)
    }
}

/// Canonical display string of a value; all matching compares these.
///
/// Enum slots show their display name, and integer values sitting in a
/// float-typed slot are shown as the float they encode.
pub fn format_value(value: &ArgValue, doc: Option<&ArgDoc>) -> String {
    if let (Some(doc), Some(raw)) = (doc, value.as_i64()) {
        if let Some(name) = doc.display_value(raw) {
            return name.to_string();
        }
        if doc.arg_type == ArgType::F32 {
            return f32::from_bits(raw as u32).to_string();
        }
    }
    value.to_string()
}

/// Mutable decoded view of one instruction.
#[derive(Debug, Clone)]
pub struct Instr<'c> {
    catalog: &'c Catalog,
    source: Instruction,
    doc: Option<&'c InstrDoc>,
    types: Vec<ArgType>,
    args: Vec<ArgValue>,
    // Whether this calls another event and forwards its trailing arguments.
    pub init: bool,
    pub callee: i64,
    pub callee_offset: usize,
    pub modified: bool,
    erased: bool,
}

impl<'c> Instr<'c> {
    pub fn decode(catalog: &'c Catalog, source: Instruction) -> Result<Instr<'c>, EditError> {
        let init = is_init_shape(source.category, source.opcode);
        let doc = catalog.resolve(source.category, source.opcode);
        // Initializations forward a variable number of words, so they are
        // never described argument by argument.
        let types = match doc {
            Some(doc) if !init => doc.arg_types(),
            _ => vec![ArgType::I32; source.args.len() / 4],
        };
        let args = unpack(&types, &source.args)?;
        let (callee, callee_offset) = if init {
            let (callee_index, offset) = if source.opcode == INIT_OPCODE { (1, 2) } else { (0, 1) };
            let callee = args
                .get(callee_index)
                .and_then(ArgValue::as_i64)
                .ok_or(EditError::Truncated {
                    needed: (callee_index + 1) * 4,
                    available: source.args.len(),
                })?;
            (callee, offset)
        } else {
            (0, 0)
        };
        Ok(Instr {
            catalog,
            source,
            doc,
            types,
            args,
            init,
            callee,
            callee_offset,
            modified: false,
            erased: false,
        })
    }

    pub fn name(&self) -> Option<&'c str> {
        self.doc.map(|d| d.name.as_str())
    }

    pub fn doc(&self) -> Option<&'c InstrDoc> {
        self.doc
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    pub fn source(&self) -> &Instruction {
        &self.source
    }

    pub fn into_source(self) -> Instruction {
        self.source
    }

    pub fn args(&self) -> &[ArgValue] {
        &self.args
    }

    pub fn types(&self) -> &[ArgType] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn is_erased(&self) -> bool {
        self.erased
    }

    /// False while any argument is still a placeholder; such an instruction
    /// can only be saved through a parameter ledger.
    pub fn is_writable(&self) -> bool {
        !self.args.iter().any(ArgValue::is_placeholder)
    }

    fn label(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("{}[{}]", self.source.category, self.source.opcode),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), EditError> {
        if index >= self.args.len() {
            return Err(EditError::ArgIndex {
                command: self.label(),
                index,
                len: self.args.len(),
            });
        }
        Ok(())
    }

    pub fn format_arg(&self, index: usize) -> String {
        let doc = self.doc.and_then(|d| d.args.get(index));
        self.args
            .get(index)
            .map(|v| format_value(v, doc))
            .unwrap_or_default()
    }

    pub fn formatted_args(&self) -> Vec<String> {
        (0..self.args.len()).map(|i| self.format_arg(i)).collect()
    }

    /// Sets argument `index` from its text form: a placeholder token is
    /// kept as-is, anything else is parsed for the slot's type (enum names
    /// allowed).
    pub fn set(&mut self, index: usize, token: &str) -> Result<(), EditError> {
        self.check_index(index)?;
        let value = if Placeholder::is_token(token) {
            ArgValue::Param(token.parse()?)
        } else {
            self.catalog.parse_value(token, self.types[index])?
        };
        self.args[index] = value;
        self.modified = true;
        Ok(())
    }

    pub fn set_value(&mut self, index: usize, value: ArgValue) -> Result<(), EditError> {
        self.check_index(index)?;
        self.args[index] = value;
        self.modified = true;
        Ok(())
    }

    // Shows an existing parameter binding in place of the packed value.
    // Nothing changes in the underlying bytes, so this is not a modification.
    pub(crate) fn show_placeholder(&mut self, index: usize, placeholder: Placeholder) -> Result<(), EditError> {
        self.check_index(index)?;
        self.args[index] = ArgValue::Param(placeholder);
        Ok(())
    }

    /// Start byte of every argument slot.
    pub fn byte_offsets(&self) -> Vec<usize> {
        match self.doc {
            Some(doc) if !self.init => doc.offsets.clone(),
            _ => layout(&self.types).0,
        }
    }

    /// Argument slot starting at byte `offset`, if any.
    pub fn slot_at_offset(&self, offset: usize) -> Option<usize> {
        self.byte_offsets().iter().position(|&o| o == offset)
    }

    /// Overwrites the instruction with the inert sentinel. The sentinel is a
    /// new instruction, so bindings to the old one are dropped at
    /// reconciliation.
    pub fn erase(&mut self) {
        self.source = Instruction::new(REMOVED_CATEGORY, REMOVED_OPCODE, Vec::new());
        self.doc = None;
        self.init = false;
        self.types.clear();
        self.args.clear();
        self.modified = false;
        self.erased = true;
    }

    /// Packs modified arguments back into the source instruction.
    ///
    /// Placeholder arguments become parameters registered with `ledger`
    /// and are packed as zero. When a ledger is supplied every saved
    /// instruction re-registers its bindings, replacing whatever the ledger
    /// knew about it before. Returns whether anything was written.
    pub fn save(&mut self, ledger: Option<&mut OldParams>) -> Result<bool, EditError> {
        if !self.modified {
            return Ok(false);
        }
        let offsets = self.byte_offsets();
        let mut params = Vec::new();
        let mut values = self.args.clone();
        for (i, value) in self.args.iter().enumerate() {
            if let ArgValue::Param(p) = value {
                let target = offsets.get(i).copied().ok_or_else(|| EditError::UnboundPlaceholder {
                    token: p.to_string(),
                    reason: format!("{} has no argument slot {i}", self.label()),
                })?;
                params.push(Parameter {
                    instruction_index: 0,
                    target_start_byte: target as u32,
                    source_start_byte: p.source_offset,
                    byte_count: p.length,
                });
                values[i] = self.types[i].zero();
            }
        }
        match ledger {
            Some(ledger) => ledger.add_parameters(self.source.key(), params),
            None if !params.is_empty() => {
                return Err(EditError::UnboundPlaceholder {
                    token: self.to_string(),
                    reason: "no parameter ledger was supplied".to_string(),
                })
            }
            None => {}
        }
        self.source.args = pack(&self.types, &values)?;
        self.modified = false;
        Ok(true)
    }
}

impl fmt::Display for Instr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.formatted_args().join(", "))
    }
}
