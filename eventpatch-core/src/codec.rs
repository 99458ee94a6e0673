use serde::{Deserialize, Serialize};
use std::fmt;

use crate::edits::EditError;
use crate::instr::Placeholder;

/// Primitive argument types as numbered by catalog documents.
///
/// Type code 8 is an older alias for an unsigned 32-bit slot and decodes to
/// `U32`; it is written back out as 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ArgType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
}

impl ArgType {
    pub fn width(self) -> usize {
        match self {
            ArgType::U8 | ArgType::I8 => 1,
            ArgType::U16 | ArgType::I16 => 2,
            ArgType::U32 | ArgType::I32 | ArgType::F32 => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ArgType::F32)
    }

    /// Value written into a slot whose real content comes from a parameter.
    pub fn zero(self) -> ArgValue {
        match self {
            ArgType::U8 => ArgValue::U8(0),
            ArgType::U16 => ArgValue::U16(0),
            ArgType::U32 => ArgValue::U32(0),
            ArgType::I8 => ArgValue::I8(0),
            ArgType::I16 => ArgValue::I16(0),
            ArgType::I32 => ArgValue::I32(0),
            ArgType::F32 => ArgValue::F32(0.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArgType::U8 => "u8",
            ArgType::U16 => "u16",
            ArgType::U32 => "u32",
            ArgType::I8 => "i8",
            ArgType::I16 => "i16",
            ArgType::I32 => "i32",
            ArgType::F32 => "f32",
        }
    }
}

impl TryFrom<u8> for ArgType {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(ArgType::U8),
            1 => Ok(ArgType::U16),
            2 | 8 => Ok(ArgType::U32),
            3 => Ok(ArgType::I8),
            4 => Ok(ArgType::I16),
            5 => Ok(ArgType::I32),
            6 => Ok(ArgType::F32),
            other => Err(format!("unrecognized argument type code {other}")),
        }
    }
}

impl From<ArgType> for u8 {
    fn from(ty: ArgType) -> u8 {
        match ty {
            ArgType::U8 => 0,
            ArgType::U16 => 1,
            ArgType::U32 => 2,
            ArgType::I8 => 3,
            ArgType::I16 => 4,
            ArgType::I32 => 5,
            ArgType::F32 => 6,
        }
    }
}

/// One decoded argument. `Param` is a placeholder standing in for a byte
/// range of the owning event's call-time arguments; it has no byte form of
/// its own and must be resolved through a ledger before packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
    Param(Placeholder),
}

impl ArgValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ArgValue::U8(v) => Some(v as i64),
            ArgValue::U16(v) => Some(v as i64),
            ArgValue::U32(v) => Some(v as i64),
            ArgValue::I8(v) => Some(v as i64),
            ArgValue::I16(v) => Some(v as i64),
            ArgValue::I32(v) => Some(v as i64),
            ArgValue::F32(_) | ArgValue::Param(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ArgValue::Param(_))
    }

    /// Builds a value of type `ty` from an integer, wrapping like a cast.
    pub fn from_i64(ty: ArgType, v: i64) -> ArgValue {
        match ty {
            ArgType::U8 => ArgValue::U8(v as u8),
            ArgType::U16 => ArgValue::U16(v as u16),
            ArgType::U32 => ArgValue::U32(v as u32),
            ArgType::I8 => ArgValue::I8(v as i8),
            ArgType::I16 => ArgValue::I16(v as i16),
            ArgType::I32 => ArgValue::I32(v as i32),
            ArgType::F32 => ArgValue::F32(f32::from_bits(v as u32)),
        }
    }
}

impl fmt::Display for ArgValue {
    // Rust's float Display is locale-independent and shortest-round-trip,
    // so "1", "0.5" and "-2.25" come out the same everywhere.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::U8(v) => write!(f, "{v}"),
            ArgValue::U16(v) => write!(f, "{v}"),
            ArgValue::U32(v) => write!(f, "{v}"),
            ArgValue::I8(v) => write!(f, "{v}"),
            ArgValue::I16(v) => write!(f, "{v}"),
            ArgValue::I32(v) => write!(f, "{v}"),
            ArgValue::F32(v) => write!(f, "{v}"),
            ArgValue::Param(p) => write!(f, "{p}"),
        }
    }
}

/// Byte offset of every argument plus the padded total length.
///
/// Each argument is aligned to its own width and the buffer as a whole is
/// padded to a multiple of 4.
pub fn layout(types: &[ArgType]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(types.len());
    let mut pos = 0usize;
    for ty in types {
        let width = ty.width();
        if pos % width != 0 {
            pos += width - pos % width;
        }
        offsets.push(pos);
        pos += width;
    }
    if pos % 4 != 0 {
        pos += 4 - pos % 4;
    }
    (offsets, pos)
}

pub fn unpack(types: &[ArgType], bytes: &[u8]) -> Result<Vec<ArgValue>, EditError> {
    let (offsets, _) = layout(types);
    let mut values = Vec::with_capacity(types.len());
    for (ty, &off) in types.iter().zip(&offsets) {
        let end = off + ty.width();
        if end > bytes.len() {
            return Err(EditError::Truncated {
                needed: end,
                available: bytes.len(),
            });
        }
        let b = &bytes[off..end];
        let value = match ty {
            ArgType::U8 => ArgValue::U8(b[0]),
            ArgType::I8 => ArgValue::I8(b[0] as i8),
            ArgType::U16 => ArgValue::U16(u16::from_le_bytes([b[0], b[1]])),
            ArgType::I16 => ArgValue::I16(i16::from_le_bytes([b[0], b[1]])),
            ArgType::U32 => ArgValue::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ArgType::I32 => ArgValue::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ArgType::F32 => ArgValue::F32(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        };
        values.push(value);
    }
    Ok(values)
}

/// Packs values into the byte layout of `types`.
///
/// A value is written in the slot's type, not its own: integers are cast,
/// and floats stored in integer slots (or the reverse) keep their bit
/// pattern. Placeholders cannot be packed.
pub fn pack(types: &[ArgType], values: &[ArgValue]) -> Result<Vec<u8>, EditError> {
    if types.len() != values.len() {
        return Err(EditError::ArgCount {
            command: "<pack>".to_string(),
            expected: types.len(),
            got: values.len(),
        });
    }
    let (offsets, total) = layout(types);
    let mut out = vec![0u8; total];
    for ((ty, value), &off) in types.iter().zip(values).zip(&offsets) {
        let bits: u32 = match value {
            ArgValue::Param(p) => {
                return Err(EditError::UnboundPlaceholder {
                    token: p.to_string(),
                    reason: "placeholders have no byte encoding".to_string(),
                })
            }
            ArgValue::F32(f) => f.to_bits(),
            other => other.as_i64().map_or(0, |v| v as u32),
        };
        let le = bits.to_le_bytes();
        out[off..off + ty.width()].copy_from_slice(&le[..ty.width()]);
    }
    Ok(out)
}

/// Parses a literal argument for a slot of type `ty`.
pub fn parse_arg(token: &str, ty: ArgType) -> Result<ArgValue, EditError> {
    let t = token.trim();
    let bad = || EditError::ArgParse {
        token: t.to_string(),
        arg_type: ty.name(),
    };
    let value = match ty {
        ArgType::U8 => ArgValue::U8(t.parse().map_err(|_| bad())?),
        ArgType::U16 => ArgValue::U16(t.parse().map_err(|_| bad())?),
        ArgType::U32 => ArgValue::U32(t.parse().map_err(|_| bad())?),
        ArgType::I8 => ArgValue::I8(t.parse().map_err(|_| bad())?),
        ArgType::I16 => ArgValue::I16(t.parse().map_err(|_| bad())?),
        ArgType::I32 => ArgValue::I32(t.parse().map_err(|_| bad())?),
        ArgType::F32 => ArgValue::F32(t.parse().map_err(|_| bad())?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_aligns_each_slot_to_its_width() {
        let (offsets, total) = layout(&[ArgType::U8, ArgType::U32, ArgType::I16, ArgType::U8]);
        assert_eq!(offsets, vec![0, 4, 8, 10]);
        assert_eq!(total, 12);
    }

    #[test]
    fn layout_of_nothing_is_empty() {
        let (offsets, total) = layout(&[]);
        assert!(offsets.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn unpack_then_pack_reproduces_bytes() {
        let types = [ArgType::U8, ArgType::I8, ArgType::U16, ArgType::F32, ArgType::I32];
        let bytes = vec![
            0x05, 0xFF, 0x34, 0x12, // u8, i8, u16
            0x00, 0x00, 0x80, 0x3F, // 1.0f
            0xFE, 0xFF, 0xFF, 0xFF, // -2
        ];
        let values = unpack(&types, &bytes).unwrap();
        assert_eq!(values[1], ArgValue::I8(-1));
        assert_eq!(values[3], ArgValue::F32(1.0));
        assert_eq!(values[4], ArgValue::I32(-2));
        assert_eq!(pack(&types, &values).unwrap(), bytes);
    }

    #[test]
    fn unpack_reports_short_buffers() {
        let err = unpack(&[ArgType::U32, ArgType::U32], &[0; 6]).unwrap_err();
        assert!(matches!(err, EditError::Truncated { needed: 8, available: 6 }));
    }

    #[test]
    fn pack_keeps_float_bits_in_integer_slots() {
        let bytes = pack(&[ArgType::I32], &[ArgValue::F32(2.5)]).unwrap();
        assert_eq!(bytes, 2.5f32.to_le_bytes().to_vec());
    }

    #[test]
    fn parse_arg_rejects_out_of_range_values() {
        assert_eq!(parse_arg("255", ArgType::U8).unwrap(), ArgValue::U8(255));
        assert!(parse_arg("256", ArgType::U8).is_err());
        assert!(parse_arg("-1", ArgType::U32).is_err());
        assert_eq!(parse_arg(" 0.5 ", ArgType::F32).unwrap(), ArgValue::F32(0.5));
    }

    #[test]
    fn type_code_eight_is_unsigned_word() {
        assert_eq!(ArgType::try_from(8).unwrap(), ArgType::U32);
        assert!(ArgType::try_from(7).is_err());
    }
}
