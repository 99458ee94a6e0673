use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::category::{is_arg_compatible, ValueCategory};
use crate::codec::ArgType;
use crate::event::{Instruction, Parameter};
use crate::instr::{format_value, is_init_shape, Instr, Placeholder};
use crate::segment::SegmentState;

/// Errors raised while building rule sets or running an edit pass.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("unknown instruction '{name}' in {context}")]
    UnknownInstruction { name: String, context: String },

    #[error("bad command string '{command}'")]
    BadCommand { command: String },

    #[error("wrong argument count for {command}: expected {expected}, got {got}")]
    ArgCount {
        command: String,
        expected: usize,
        got: usize,
    },

    #[error("failed to parse '{token}' as {arg_type}")]
    ArgParse { token: String, arg_type: &'static str },

    #[error("argument index {index} out of range for {command} ({len} arguments)")]
    ArgIndex {
        command: String,
        index: usize,
        len: usize,
    },

    #[error("unbound placeholder {token}: {reason}")]
    UnboundPlaceholder { token: String, reason: String },

    #[error("invalid placeholder '{token}': {reason}")]
    BadPlaceholder { token: String, reason: &'static str },

    #[error("misaligned parameter X{source_start}->{target_start} in {instruction}")]
    MisalignedParameter {
        instruction: String,
        source_start: u32,
        target_start: u32,
    },

    #[error("segment '{segment}' is not registered")]
    UnknownSegment { segment: String },

    #[error("segment '{segment}' is already registered")]
    DuplicateSegment { segment: String },

    #[error("segment '{segment}': {reason}")]
    BadSegment { segment: String, reason: &'static str },

    #[error("invalid edit {edit}: {reason}")]
    InvalidEditType { edit: String, reason: &'static str },

    #[error("argument buffer too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("event {event}: {count} required rule(s) never applied: {summary}")]
    UnsatisfiedRules {
        event: i64,
        count: usize,
        summary: String,
    },
}

/// Rule kinds in the order they are applied to a single instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EditType {
    EndSegment,
    Remove,
    MatchSegment,
    AddAfter,
    AddBefore,
    SegmentAdd,
    SegmentCheck,
    Replace,
    StartSegment,
}

impl fmt::Display for EditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An instruction to insert, with the parameter bindings it carries. The
/// bindings' `instruction_index` is resolved when the pass finishes.
#[derive(Debug, Clone)]
pub struct Insertion {
    pub instruction: Instruction,
    pub params: Vec<Parameter>,
}

#[derive(Debug, Clone, Default)]
pub struct ValueEdit {
    /// Argument index to new value.
    pub positional: BTreeMap<usize, String>,
    /// Formatted old value to new value, applied to every argument.
    pub replacements: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum EditKind {
    StartSegment {
        segment: String,
        /// Ignore the start marker until this segment has begun.
        pre_segment: Option<String>,
    },
    EndSegment {
        segment: String,
    },
    Remove {
        segment: Option<String>,
    },
    MatchSegment {
        segment: String,
    },
    AddAfter(Insertion),
    AddBefore(Insertion),
    SegmentAdd {
        segment: String,
        insertion: Insertion,
    },
    SegmentCheck {
        segment: String,
    },
    Replace(ValueEdit),
}

/// One declarative rule. Rules never change once registered; what has
/// happened to them during a pass is tracked by the pass.
#[derive(Debug, Clone)]
pub struct InstrEdit {
    /// The pattern the rule was registered under, for reports.
    pub search: Option<String>,
    pub kind: EditKind,
    pub category: ValueCategory,
    pub optional: bool,
    pub apply_once: bool,
}

impl InstrEdit {
    pub fn new(search: Option<&str>, kind: EditKind) -> InstrEdit {
        InstrEdit {
            search: search.map(str::to_string),
            kind,
            category: ValueCategory::Any,
            optional: false,
            apply_once: false,
        }
    }

    pub fn edit_type(&self) -> EditType {
        match self.kind {
            EditKind::StartSegment { .. } => EditType::StartSegment,
            EditKind::EndSegment { .. } => EditType::EndSegment,
            EditKind::Remove { .. } => EditType::Remove,
            EditKind::MatchSegment { .. } => EditType::MatchSegment,
            EditKind::AddAfter(_) => EditType::AddAfter,
            EditKind::AddBefore(_) => EditType::AddBefore,
            EditKind::SegmentAdd { .. } => EditType::SegmentAdd,
            EditKind::SegmentCheck { .. } => EditType::SegmentCheck,
            EditKind::Replace(_) => EditType::Replace,
        }
    }

    pub fn segment(&self) -> Option<&str> {
        match &self.kind {
            EditKind::StartSegment { segment, .. }
            | EditKind::EndSegment { segment }
            | EditKind::MatchSegment { segment }
            | EditKind::SegmentAdd { segment, .. }
            | EditKind::SegmentCheck { segment } => Some(segment),
            EditKind::Remove { segment } => segment.as_deref(),
            EditKind::AddAfter(_) | EditKind::AddBefore(_) | EditKind::Replace(_) => None,
        }
    }

    pub fn insertion(&self) -> Option<&Insertion> {
        match &self.kind {
            EditKind::AddAfter(ins) | EditKind::AddBefore(ins) => Some(ins),
            EditKind::SegmentAdd { insertion, .. } => Some(insertion),
            _ => None,
        }
    }
}

impl fmt::Display for InstrEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.search.as_deref().unwrap_or("<unanchored>"),
            self.edit_type()
        )?;
        if self.optional {
            f.write_str("[Optional]")?;
        }
        if let Some(ins) = self.insertion() {
            write!(f, " [Cmd:{}.{}]", ins.instruction.category, ins.instruction.opcode)?;
            if !ins.params.is_empty() {
                write!(f, "[Param:{}]", ins.params.len())?;
            }
        }
        if let EditKind::Replace(edit) = &self.kind {
            if !edit.positional.is_empty() {
                let set: Vec<String> = edit
                    .positional
                    .iter()
                    .map(|(i, v)| format!("{i}={v}"))
                    .collect();
                write!(f, "[Set:{}]", set.join(","))?;
            }
            if !edit.replacements.is_empty() {
                let rep: Vec<String> = edit
                    .replacements
                    .iter()
                    .map(|(a, b)| format!("{a}->{b}"))
                    .collect();
                write!(f, "[Replace:{}]", rep.join(", "))?;
            }
        }
        Ok(())
    }
}

/// Splits `Name(a, b)` into its name and non-blank arguments. The last
/// pair of parentheses delimits the argument list.
pub fn parse_command_string(command: &str) -> Result<(String, Vec<String>), EditError> {
    let bad = || EditError::BadCommand {
        command: command.to_string(),
    };
    let open = command.rfind('(').ok_or_else(bad)?;
    let close = command.rfind(')').ok_or_else(bad)?;
    if close < open {
        return Err(bad());
    }
    let name = command[..open].trim().to_string();
    let args = command[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    Ok((name, args))
}

/// Canonical form of a command pattern's arguments, comparable with the
/// joined formatted arguments of a decoded instruction.
pub fn canonical_args(catalog: &Catalog, name: &str, args: &[String]) -> Result<String, EditError> {
    let doc = catalog
        .doc_by_name(name)
        .ok_or_else(|| EditError::UnknownInstruction {
            name: name.to_string(),
            context: "command pattern".to_string(),
        })?;
    let init = is_init_shape(doc.category, doc.opcode);
    if !init && args.len() != doc.args.len() {
        return Err(EditError::ArgCount {
            command: name.to_string(),
            expected: doc.args.len(),
            got: args.len(),
        });
    }
    let mut out = Vec::with_capacity(args.len());
    for (i, token) in args.iter().enumerate() {
        if Placeholder::is_token(token) {
            out.push(token.parse::<Placeholder>()?.to_string());
            continue;
        }
        // Init slots are always words, but keep whatever display the catalog
        // gives them so patterns format like decoded arguments.
        let formatted = if init {
            format_value(&catalog.parse_value(token, ArgType::I32)?, doc.args.get(i))
        } else {
            let arg = &doc.args[i];
            format_value(&catalog.parse_value(token, arg.arg_type)?, Some(arg))
        };
        out.push(formatted);
    }
    Ok(out.join(","))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(usize);

/// Where a deferred insertion is attached. `End` sorts first, so walking
/// anchors in descending order visits it last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Anchor {
    End,
    At(usize),
}

/// Which index a rule pattern files the rule under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Any argument formatted to this value.
    Value(String),
    Name(String),
    Segment(String),
    /// Name plus the canonical joined argument list.
    Command { name: String, args: String },
}

/// Immutable rule definitions for one group of events, shared by every
/// pass that applies them.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<InstrEdit>,
    by_name: HashMap<String, Vec<RuleId>>,
    by_value: HashMap<String, Vec<RuleId>>,
    by_command: HashMap<(String, String), Vec<RuleId>>,
    by_segment: HashMap<String, Vec<RuleId>>,
    segments: BTreeMap<String, SegmentState>,
    required: BTreeSet<RuleId>,
    unanchored: Vec<(Anchor, RuleId)>,
}

impl RuleSet {
    pub fn new() -> RuleSet {
        RuleSet::default()
    }

    pub fn get(&self, id: RuleId) -> &InstrEdit {
        &self.rules[id.0]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &InstrEdit)> {
        self.rules.iter().enumerate().map(|(i, r)| (RuleId(i), r))
    }

    /// Initial state of every registered segment.
    pub fn segments(&self) -> &BTreeMap<String, SegmentState> {
        &self.segments
    }

    pub fn has_segment(&self, name: &str) -> bool {
        self.segments.contains_key(name)
    }

    /// Rules that must apply for a pass to count as complete.
    pub fn required(&self) -> &BTreeSet<RuleId> {
        &self.required
    }

    pub fn unanchored(&self) -> &[(Anchor, RuleId)] {
        &self.unanchored
    }

    pub fn segment_rules(&self, segment: &str) -> &[RuleId] {
        self.by_segment.get(segment).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn declare_segment(&mut self, name: &str, initial: SegmentState) -> Result<(), EditError> {
        if self.segments.contains_key(name) {
            return Err(EditError::DuplicateSegment {
                segment: name.to_string(),
            });
        }
        self.segments.insert(name.to_string(), initial);
        Ok(())
    }

    pub fn classify(&self, pattern: &str, catalog: &Catalog) -> Result<Pattern, EditError> {
        let p = pattern.trim();
        if let Ok(value) = p.parse::<i64>() {
            return Ok(Pattern::Value(value.to_string()));
        }
        if catalog.contains_name(p) {
            return Ok(Pattern::Name(p.to_string()));
        }
        if self.segments.contains_key(p) || p.contains("segment") {
            return Ok(Pattern::Segment(p.to_string()));
        }
        if !p.contains('(') {
            return Err(EditError::UnknownInstruction {
                name: p.to_string(),
                context: "rule pattern".to_string(),
            });
        }
        let (name, args) = parse_command_string(p)?;
        if !catalog.contains_name(&name) {
            return Err(EditError::UnknownInstruction {
                name,
                context: p.to_string(),
            });
        }
        let args = canonical_args(catalog, &name, &args)?;
        Ok(Pattern::Command { name, args })
    }

    fn check_segments(&self, edit: &InstrEdit) -> Result<(), EditError> {
        let mut names: Vec<&str> = edit.segment().into_iter().collect();
        if let EditKind::StartSegment {
            pre_segment: Some(pre),
            ..
        } = &edit.kind
        {
            names.push(pre);
        }
        for name in names {
            if !self.segments.contains_key(name) {
                return Err(EditError::UnknownSegment {
                    segment: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn push(&mut self, edit: InstrEdit) -> RuleId {
        let id = RuleId(self.rules.len());
        if !edit.optional {
            self.required.insert(id);
        }
        self.rules.push(edit);
        id
    }

    /// Files `edit` under an already classified pattern.
    pub fn insert(&mut self, pattern: Pattern, edit: InstrEdit) -> Result<RuleId, EditError> {
        self.check_segments(&edit)?;
        let segment_kind = matches!(
            edit.kind,
            EditKind::SegmentAdd { .. } | EditKind::SegmentCheck { .. }
        );
        match (&pattern, segment_kind) {
            (Pattern::Segment(name), true) if edit.segment() != Some(name.as_str()) => {
                return Err(EditError::InvalidEditType {
                    edit: edit.to_string(),
                    reason: "segment rules must be filed under their own segment",
                })
            }
            (Pattern::Segment(_), false) => {
                return Err(EditError::InvalidEditType {
                    edit: edit.to_string(),
                    reason: "only segment additions and checks can target a segment",
                })
            }
            (Pattern::Value(_) | Pattern::Name(_) | Pattern::Command { .. }, true) => {
                return Err(EditError::InvalidEditType {
                    edit: edit.to_string(),
                    reason: "segment additions and checks must target a segment",
                })
            }
            _ => {}
        }

        let id = self.push(edit);
        let index = match pattern {
            Pattern::Value(v) => self.by_value.entry(v),
            Pattern::Name(n) => self.by_name.entry(n),
            Pattern::Segment(s) => self.by_segment.entry(s),
            Pattern::Command { name, args } => {
                self.by_command.entry((name, args)).or_default().push(id);
                return Ok(id);
            }
        };
        index.or_default().push(id);
        Ok(id)
    }

    pub fn add_edit(&mut self, pattern: &str, edit: InstrEdit, catalog: &Catalog) -> Result<RuleId, EditError> {
        let pattern = self.classify(pattern, catalog)?;
        self.insert(pattern, edit)
    }

    /// Registers an insertion with no pattern: `AddBefore` prepends to the
    /// event and `AddAfter` appends to it.
    pub fn add_unanchored(&mut self, edit: InstrEdit) -> Result<RuleId, EditError> {
        let anchor = match edit.kind {
            EditKind::AddAfter(_) => Anchor::End,
            EditKind::AddBefore(_) => Anchor::At(0),
            _ => {
                return Err(EditError::InvalidEditType {
                    edit: edit.to_string(),
                    reason: "only plain additions can be unanchored",
                })
            }
        };
        let id = self.push(edit);
        self.unanchored.push((anchor, id));
        Ok(id)
    }

    /// Every rule whose pattern matches `instr`, each at most once, in
    /// index order: by name, by argument value, then by full command.
    pub fn matches(&self, instr: &Instr<'_>) -> Vec<RuleId> {
        let Some(name) = instr.name() else {
            return Vec::new();
        };
        let args = instr.formatted_args();
        let mut found = Vec::new();

        if let Some(ids) = self.by_name.get(name) {
            found.extend_from_slice(ids);
        }
        if !self.by_value.is_empty() {
            for (pos, arg) in args.iter().enumerate() {
                if let Some(ids) = self.by_value.get(arg) {
                    found.extend(
                        ids.iter()
                            .copied()
                            .filter(|id| is_arg_compatible(instr, pos, self.get(*id).category)),
                    );
                }
            }
        }
        if !self.by_command.is_empty() {
            if let Some(ids) = self.by_command.get(&(name.to_string(), args.join(","))) {
                found.extend_from_slice(ids);
            }
        }

        let mut seen = BTreeSet::new();
        found.retain(|id| seen.insert(*id));
        found
    }
}
