use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Synthetic identity of an instruction.
///
/// Every instruction gets a key when it is created or loaded. Clones keep
/// the key, so a cloned instruction placed twice in an event is "the same
/// instruction" for parameter bookkeeping; `Instruction::duplicate` hands
/// out a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrKey(u64);

impl InstrKey {
    pub fn fresh() -> InstrKey {
        InstrKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// One raw instruction: a (category, opcode) pair and its packed arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(skip, default = "InstrKey::fresh")]
    key: InstrKey,
    pub category: i32,
    pub opcode: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<u32>,
    #[serde(default)]
    pub args: Vec<u8>,
}

impl Instruction {
    pub fn new(category: i32, opcode: i32, args: Vec<u8>) -> Instruction {
        Instruction {
            key: InstrKey::fresh(),
            category,
            opcode,
            layer: None,
            args,
        }
    }

    pub fn with_layer(mut self, layer: u32) -> Instruction {
        self.layer = Some(layer);
        self
    }

    pub fn key(&self) -> InstrKey {
        self.key
    }

    /// Copy of the content under a new identity.
    pub fn duplicate(&self) -> Instruction {
        Instruction {
            key: InstrKey::fresh(),
            ..self.clone()
        }
    }

    pub fn same_content(&self, other: &Instruction) -> bool {
        self.category == other.category
            && self.opcode == other.opcode
            && self.layer == other.layer
            && self.args == other.args
    }
}

/// Binds `byte_count` bytes at `source_start_byte` of the event's own
/// call-time arguments into the arguments of instruction
/// `instruction_index`, starting at `target_start_byte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub instruction_index: usize,
    pub target_start_byte: u32,
    pub source_start_byte: u32,
    pub byte_count: u32,
}

impl Parameter {
    pub fn at_index(self, instruction_index: usize) -> Parameter {
        Parameter {
            instruction_index,
            ..self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    #[serde(default)]
    pub rest_behavior: u32,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl Event {
    pub fn new(id: i64) -> Event {
        Event {
            id,
            rest_behavior: 0,
            instructions: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_instructions(id: i64, instructions: Vec<Instruction>) -> Event {
        Event {
            instructions,
            ..Event::new(id)
        }
    }

    pub fn index_of(&self, key: InstrKey) -> Option<usize> {
        self.instructions.iter().position(|i| i.key() == key)
    }
}

/// A file of events as read from and written to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFile {
    pub events: Vec<Event>,
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

impl EventFile {
    /// Reads a `.json` or gzip-compressed `.json.gz` event file.
    pub fn load(path: &Path) -> crate::Result<EventFile> {
        let raw = fs::read(path)?;
        let text = if is_gzip(path) {
            let mut decoder = GzDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        } else {
            raw
        };
        Ok(serde_json::from_slice(&text)?)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(&json)?;
            fs::write(path, encoder.finish()?)?;
        } else {
            fs::write(path, json)?;
        }
        Ok(())
    }
}
