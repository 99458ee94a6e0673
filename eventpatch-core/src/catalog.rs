use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::category::ValueCategory;
use crate::codec::{layout, parse_arg, ArgType, ArgValue};
use crate::edits::EditError;

// On-disk catalog document. Only the fields the patcher needs are read;
// anything else in the file is ignored.
#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(rename = "main_classes")]
    classes: Vec<ClassDocument>,
    #[serde(default)]
    enums: Vec<EnumDocument>,
}

#[derive(Debug, Deserialize)]
struct ClassDocument {
    index: i32,
    #[serde(rename = "instrs", default)]
    instructions: Vec<InstrDocument>,
}

#[derive(Debug, Deserialize)]
struct InstrDocument {
    name: String,
    index: i32,
    #[serde(default)]
    args: Vec<ArgDocument>,
}

#[derive(Debug, Deserialize)]
struct ArgDocument {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    arg_type: ArgType,
    #[serde(default)]
    enum_name: Option<String>,
    #[serde(default)]
    category: Option<ValueCategory>,
}

#[derive(Debug, Deserialize)]
struct EnumDocument {
    name: String,
    values: BTreeMap<String, String>,
    #[serde(default)]
    global: bool,
}

/// Catalog description of one instruction.
#[derive(Debug, Clone)]
pub struct InstrDoc {
    pub name: String,
    pub category: i32,
    pub opcode: i32,
    pub args: Vec<ArgDoc>,
    /// Start byte of each argument within the packed buffer.
    pub offsets: Vec<usize>,
}

impl InstrDoc {
    pub fn arg_types(&self) -> Vec<ArgType> {
        self.args.iter().map(|a| a.arg_type).collect()
    }

    pub fn has_categories(&self) -> bool {
        self.args.iter().any(|a| a.category.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct ArgDoc {
    pub name: String,
    pub arg_type: ArgType,
    pub category: Option<ValueCategory>,
    // raw integer value -> display name, present when the slot is enum-typed
    display: Option<HashMap<i64, String>>,
}

impl ArgDoc {
    pub fn display_value(&self, raw: i64) -> Option<&str> {
        self.display.as_ref()?.get(&raw).map(String::as_str)
    }
}

/// Read-only lookup from (category, opcode) or name to instruction layout.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    instrs: HashMap<(i32, i32), InstrDoc>,
    by_name: HashMap<String, (i32, i32)>,
    enum_by_name: HashMap<String, i64>,
}

fn word_chars(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect()
}

impl Catalog {
    pub fn from_json(text: &str) -> Result<Catalog, serde_json::Error> {
        let document: CatalogDocument = serde_json::from_str(text)?;
        Ok(Catalog::from_document(document))
    }

    pub fn load(path: &Path) -> crate::Result<Catalog> {
        let text = fs::read_to_string(path)?;
        Ok(Catalog::from_json(&text)?)
    }

    fn from_document(document: CatalogDocument) -> Catalog {
        let mut enum_by_name = HashMap::new();
        let mut displays: HashMap<String, HashMap<i64, String>> = HashMap::new();

        for enm in &document.enums {
            let prefix = if enm.global {
                String::new()
            } else {
                format!("{}.", word_chars(&enm.name))
            };
            let mut display = HashMap::new();
            for (raw, label) in &enm.values {
                // Keys that are not integers cannot be matched against
                // decoded values, so they are skipped.
                let Ok(value) = raw.trim().parse::<i64>() else {
                    log::warn!("enum {} has non-integer key {raw:?}", enm.name);
                    continue;
                };
                let name = format!("{prefix}{}", word_chars(label));
                enum_by_name.insert(name.clone(), value);
                display.insert(value, name);
            }
            displays.insert(enm.name.clone(), display);
        }

        let mut instrs = HashMap::new();
        let mut by_name = HashMap::new();
        for class in document.classes {
            for ins in class.instructions {
                let args: Vec<ArgDoc> = ins
                    .args
                    .into_iter()
                    .map(|a| ArgDoc {
                        display: a.enum_name.as_ref().and_then(|e| displays.get(e).cloned()),
                        name: a.name,
                        arg_type: a.arg_type,
                        category: a.category,
                    })
                    .collect();
                let types: Vec<ArgType> = args.iter().map(|a| a.arg_type).collect();
                let (offsets, _) = layout(&types);
                let key = (class.index, ins.index);
                if by_name.insert(ins.name.clone(), key).is_some() {
                    log::warn!("instruction name {} is defined more than once", ins.name);
                }
                instrs.insert(
                    key,
                    InstrDoc {
                        name: ins.name,
                        category: class.index,
                        opcode: ins.index,
                        args,
                        offsets,
                    },
                );
            }
        }

        log::debug!(
            "catalog loaded: {} instructions, {} enum names",
            instrs.len(),
            enum_by_name.len()
        );

        Catalog {
            instrs,
            by_name,
            enum_by_name,
        }
    }

    pub fn resolve(&self, category: i32, opcode: i32) -> Option<&InstrDoc> {
        self.instrs.get(&(category, opcode))
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<(i32, i32)> {
        self.by_name.get(name).copied()
    }

    pub fn doc_by_name(&self, name: &str) -> Option<&InstrDoc> {
        let (category, opcode) = self.resolve_by_name(name)?;
        self.resolve(category, opcode)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn enum_value(&self, name: &str) -> Option<i64> {
        self.enum_by_name.get(name).copied()
    }

    /// Parses a literal for a slot of type `ty`, accepting enum display
    /// names in place of their integer values.
    pub fn parse_value(&self, token: &str, ty: ArgType) -> Result<ArgValue, EditError> {
        let token = token.trim();
        match self.enum_value(token) {
            Some(v) => parse_arg(&v.to_string(), ty),
            None => parse_arg(token, ty),
        }
    }
}
