use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::category::{is_arg_compatible, ValueCategory};
use crate::codec::{layout, pack, ArgType, ArgValue};
use crate::edits::{
    parse_command_string, canonical_args, EditError, EditKind, EditType, InstrEdit, Insertion, Pattern,
    RuleId, RuleSet, ValueEdit,
};
use crate::event::{Event, Instruction, Parameter};
use crate::instr::{is_init_shape, Instr, Placeholder, INIT_CATEGORY, INIT_OPCODE};
use crate::ledger::OldParams;
use crate::segment::SegmentState;
use crate::session::{EditSession, PassReport};

/// A named region to track while editing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentSpec {
    pub name: String,
    /// Pattern whose match starts the segment. Without one the segment is
    /// waiting for its first anchoring match from the outset.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// The start marker begins the segment itself, right after it.
    #[serde(default)]
    pub matchless: bool,
    /// Segment that must have begun before the start marker counts.
    #[serde(default)]
    pub pre_segment: Option<String>,
}

/// An instruction to add before or after a pattern. With neither set it
/// is appended; `before: "start"` prepends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventAddCommand {
    pub cmd: String,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

pub fn is_temp_flag(flag: i64) -> bool {
    (flag / 1000) % 10 == 5
}

/// Copy of `instruction` with its own identity.
pub fn copy_instruction(instruction: &Instruction) -> Instruction {
    instruction.duplicate()
}

/// Copy of `src` under `new_id`. The copy's instructions are new
/// identities and its parameters keep their indices.
pub fn copy_event(src: &Event, new_id: i64) -> Event {
    Event {
        id: new_id,
        rest_behavior: src.rest_behavior,
        instructions: src.instructions.iter().map(copy_instruction).collect(),
        parameters: src.parameters.clone(),
    }
}

fn split_arrow(s: &str) -> Option<(&str, &str)> {
    s.split_once("->").map(|(a, b)| (a.trim(), b.trim()))
}

fn is_plain_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Builds rules and runs edit passes against one instruction catalog.
#[derive(Debug, Clone)]
pub struct EventEditor {
    catalog: Arc<Catalog>,
}

impl EventEditor {
    pub fn new(catalog: Arc<Catalog>) -> EventEditor {
        EventEditor { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn decode(&self, instruction: &Instruction) -> Result<Instr<'_>, EditError> {
        Instr::decode(&self.catalog, instruction.clone())
    }

    fn command_types(&self, name: &str, command: &str, argc: usize) -> Result<(i32, i32, Vec<ArgType>), EditError> {
        let doc = self
            .catalog
            .doc_by_name(name)
            .ok_or_else(|| EditError::UnknownInstruction {
                name: name.to_string(),
                context: command.to_string(),
            })?;
        // Initializations take however many words the callee expects.
        let types = if is_init_shape(doc.category, doc.opcode) {
            vec![ArgType::I32; argc]
        } else {
            doc.arg_types()
        };
        if types.len() != argc {
            return Err(EditError::ArgCount {
                command: command.to_string(),
                expected: types.len(),
                got: argc,
            });
        }
        Ok((doc.category, doc.opcode, types))
    }

    /// Builds an instruction from a literal command string.
    pub fn parse_add(&self, command: &str) -> Result<Instruction, EditError> {
        let (name, args) = parse_command_string(command)?;
        let (category, opcode, types) = self.command_types(&name, command, args.len())?;
        let mut values = Vec::with_capacity(args.len());
        for (token, ty) in args.iter().zip(&types) {
            if Placeholder::is_token(token) {
                return Err(EditError::UnboundPlaceholder {
                    token: token.clone(),
                    reason: format!("{command} needs parameter bindings"),
                });
            }
            values.push(self.catalog.parse_value(token, *ty)?);
        }
        Ok(Instruction::new(category, opcode, pack(&types, &values)?))
    }

    /// Like `parse_add`, but placeholder arguments become parameters bound
    /// at the slot's byte offset. The parameters' instruction index is 0
    /// until a ledger resolves it.
    pub fn parse_add_arg(&self, command: &str) -> Result<(Instruction, Vec<Parameter>), EditError> {
        let (name, args) = parse_command_string(command)?;
        let (category, opcode, types) = self.command_types(&name, command, args.len())?;
        let (offsets, _) = layout(&types);
        let mut values = Vec::with_capacity(args.len());
        let mut params = Vec::new();
        for (i, (token, ty)) in args.iter().zip(&types).enumerate() {
            if Placeholder::is_token(token) {
                let p: Placeholder = token.parse()?;
                params.push(Parameter {
                    instruction_index: 0,
                    target_start_byte: offsets[i] as u32,
                    source_start_byte: p.source_offset,
                    byte_count: p.length,
                });
                values.push(ty.zero());
            } else {
                values.push(self.catalog.parse_value(token, *ty)?);
            }
        }
        Ok((Instruction::new(category, opcode, pack(&types, &values)?), params))
    }

    /// Shows the instruction's existing parameter bindings as placeholder
    /// arguments, so rules can match and preserve them.
    pub fn set_instr_param_args(&self, instr: &mut Instr<'_>, ledger: &OldParams) -> Result<(), EditError> {
        let params = ledger.instruction_params(instr.source());
        if params.is_empty() {
            return Ok(());
        }
        if instr.doc().is_none() && !instr.init {
            return Err(EditError::UnknownInstruction {
                name: instr.to_string(),
                context: "parameterized instruction".to_string(),
            });
        }
        for p in params {
            let slot = instr
                .slot_at_offset(p.target_start_byte as usize)
                .ok_or_else(|| EditError::MisalignedParameter {
                    instruction: instr.to_string(),
                    source_start: p.source_start_byte,
                    target_start: p.target_start_byte,
                })?;
            let placeholder = Placeholder {
                source_offset: p.source_start_byte,
                length: p.byte_count,
            };
            instr.show_placeholder(slot, placeholder)?;
        }
        Ok(())
    }

    pub fn register_segment(&self, rules: &mut RuleSet, spec: &SegmentSpec) -> Result<(), EditError> {
        if spec.pre_segment.is_some() && spec.start.is_none() {
            return Err(EditError::BadSegment {
                segment: spec.name.clone(),
                reason: "a pre-segment only gates a start marker",
            });
        }
        if let Some(pre) = &spec.pre_segment {
            if !rules.has_segment(pre) {
                return Err(EditError::UnknownSegment { segment: pre.clone() });
            }
        }
        rules.declare_segment(&spec.name, SegmentState::initial(spec.start.is_some(), spec.matchless))?;
        if let Some(start) = &spec.start {
            let edit = InstrEdit::new(
                Some(start),
                EditKind::StartSegment {
                    segment: spec.name.clone(),
                    pre_segment: spec.pre_segment.clone(),
                },
            );
            rules.add_edit(start, edit, &self.catalog)?;
        }
        if let Some(end) = &spec.end {
            let edit = InstrEdit::new(
                Some(end),
                EditKind::EndSegment {
                    segment: spec.name.clone(),
                },
            );
            rules.add_edit(end, edit, &self.catalog)?;
        }
        Ok(())
    }

    /// Registers an insertion of `add`. `AddBefore` and `AddAfter` anchor
    /// to `to_find` or, without it, prepend and append; `SegmentAdd` takes
    /// the segment name as `to_find`.
    pub fn add_macro(
        &self,
        rules: &mut RuleSet,
        edit_type: EditType,
        add: &str,
        to_find: Option<&str>,
        apply_once: bool,
    ) -> Result<RuleId, EditError> {
        let (instruction, params) = self.parse_add_arg(add)?;
        let insertion = Insertion { instruction, params };
        let kind = match (edit_type, to_find) {
            (EditType::AddAfter, _) => EditKind::AddAfter(insertion),
            (EditType::AddBefore, _) => EditKind::AddBefore(insertion),
            (EditType::SegmentAdd, Some(segment)) => EditKind::SegmentAdd {
                segment: segment.to_string(),
                insertion,
            },
            _ => {
                return Err(EditError::InvalidEditType {
                    edit: format!("{add} [{edit_type}]"),
                    reason: "additions are AddBefore, AddAfter, or SegmentAdd with a segment",
                })
            }
        };
        let mut edit = InstrEdit::new(to_find, kind);
        edit.apply_once = apply_once;
        match to_find {
            Some(pattern) => rules.add_edit(pattern, edit, &self.catalog),
            None => rules.add_unanchored(edit),
        }
    }

    pub fn add_commands(&self, rules: &mut RuleSet, adds: &[EventAddCommand]) -> Result<(), EditError> {
        for add in adds {
            match add.before.as_deref() {
                None => self.add_macro(rules, EditType::AddAfter, &add.cmd, add.after.as_deref(), false)?,
                Some("start") => self.add_macro(rules, EditType::AddBefore, &add.cmd, None, false)?,
                Some(before) => self.add_macro(rules, EditType::AddBefore, &add.cmd, Some(before), false)?,
            };
        }
        Ok(())
    }

    pub fn remove_macro(&self, rules: &mut RuleSet, to_find: &str, apply_once: bool) -> Result<RuleId, EditError> {
        let mut edit = InstrEdit::new(Some(to_find), EditKind::Remove { segment: None });
        edit.apply_once = apply_once;
        rules.add_edit(to_find, edit, &self.catalog)
    }

    /// Removes matches of `to_find` only while `segment` is open. Such
    /// removals are optional, since the segment may never be entered.
    pub fn remove_segment_macro(&self, rules: &mut RuleSet, segment: &str, to_find: &str) -> Result<RuleId, EditError> {
        let mut edit = InstrEdit::new(
            Some(to_find),
            EditKind::Remove {
                segment: Some(segment.to_string()),
            },
        );
        edit.optional = true;
        rules.add_edit(to_find, edit, &self.catalog)
    }

    /// Anchors a started segment at the first match of `to_find`.
    pub fn match_segment_macro(&self, rules: &mut RuleSet, segment: &str, to_find: &str) -> Result<RuleId, EditError> {
        let edit = InstrEdit::new(
            Some(to_find),
            EditKind::MatchSegment {
                segment: segment.to_string(),
            },
        );
        rules.add_edit(to_find, edit, &self.catalog)
    }

    /// Requires that `segment` is entered during the pass.
    pub fn check_segment_macro(&self, rules: &mut RuleSet, segment: &str) -> Result<RuleId, EditError> {
        let edit = InstrEdit::new(
            Some(segment),
            EditKind::SegmentCheck {
                segment: segment.to_string(),
            },
        );
        rules.insert(Pattern::Segment(segment.to_string()), edit)
    }

    /// Registers a replacement in one of three forms:
    ///
    /// - `"5 -> 6"` (or `to_find = "5"`, `to_val = "6"`): every argument
    ///   formatted as `5` becomes `6`.
    /// - `"Name(a, b -> c)"`: in exact matches of `Name(a, b)`, the
    ///   arrowed arguments are set.
    /// - `"Name(..) -> Other(..)"`: the whole command is removed and the
    ///   new one added after it.
    pub fn replace_macro(&self, rules: &mut RuleSet, to_find: &str, to_val: Option<&str>) -> Result<(), EditError> {
        let whole = match to_val {
            Some(val) => Some((to_find.trim(), val.trim())),
            None => split_arrow(to_find),
        };

        if let Some((from, to)) = whole {
            if to.contains('(') {
                self.remove_macro(rules, from, false)?;
                self.add_macro(rules, EditType::AddAfter, to, Some(from), false)?;
                return Ok(());
            }
            if to_val.is_some() || (is_plain_number(from) && is_plain_number(to)) {
                let key = from.parse::<i64>().map(|v| v.to_string()).unwrap_or_else(|_| from.to_string());
                let mut edit = ValueEdit::default();
                edit.replacements.insert(key.clone(), to.to_string());
                let rule = InstrEdit::new(Some(to_find), EditKind::Replace(edit));
                rules.insert(Pattern::Value(key), rule)?;
                return Ok(());
            }
        }

        let (name, mut args) = parse_command_string(to_find)?;
        let mut edit = ValueEdit::default();
        for (i, arg) in args.iter_mut().enumerate() {
            if let Some((old, new)) = split_arrow(arg) {
                edit.positional.insert(i, new.to_string());
                *arg = old.to_string();
            }
        }
        let canonical = canonical_args(&self.catalog, &name, &args)?;
        let rule = InstrEdit::new(Some(to_find), EditKind::Replace(edit));
        rules.insert(Pattern::Command { name, args: canonical }, rule)?;
        Ok(())
    }

    /// Rewrites argument value `from` to `to` wherever a slot of a
    /// compatible category holds it.
    pub fn replace_value(
        &self,
        rules: &mut RuleSet,
        from: i64,
        to: i64,
        category: ValueCategory,
    ) -> Result<RuleId, EditError> {
        let mut edit = ValueEdit::default();
        edit.replacements.insert(from.to_string(), to.to_string());
        let search = format!("{from} -> {to}");
        let mut rule = InstrEdit::new(Some(&search), EditKind::Replace(edit));
        rule.category = category;
        rules.insert(Pattern::Value(from.to_string()), rule)
    }

    /// Bulk rewrite of 32-bit integer arguments through `changes`, limited
    /// to slots compatible with `category`. Returns how many changed.
    pub fn rewrite_ints(
        &self,
        instr: &mut Instr<'_>,
        changes: &BTreeMap<i64, i64>,
        category: ValueCategory,
    ) -> Result<usize, EditError> {
        let mut changed = 0;
        for i in 0..instr.len() {
            let ty = instr.types()[i];
            if !matches!(ty, ArgType::I32 | ArgType::U32) {
                continue;
            }
            let Some(old) = instr.args()[i].as_i64() else {
                continue;
            };
            let Some(&new) = changes.get(&old) else {
                continue;
            };
            if !is_arg_compatible(instr, i, category) {
                continue;
            }
            instr.set_value(i, ArgValue::from_i64(ty, new))?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Rewrites integer literals in a command string.
    pub fn rewrite_ints_in_command(&self, command: &str, changes: &BTreeMap<i64, i64>) -> Result<String, EditError> {
        let (name, args) = parse_command_string(command)?;
        let args: Vec<String> = args
            .into_iter()
            .map(|arg| match arg.parse::<i64>().ok().and_then(|v| changes.get(&v)) {
                Some(new) => new.to_string(),
                None => arg,
            })
            .collect();
        Ok(format!("{name}({})", args.join(", ")))
    }

    /// `rewrite_ints` over every instruction of `event`.
    pub fn rewrite_event_ints(
        &self,
        event: &mut Event,
        changes: &BTreeMap<i64, i64>,
        category: ValueCategory,
    ) -> Result<usize, EditError> {
        let mut changed = 0;
        for slot in event.instructions.iter_mut() {
            let mut instr = self.decode(slot)?;
            let n = self.rewrite_ints(&mut instr, changes, category)?;
            if n > 0 {
                instr.save(None)?;
                *slot = instr.into_source();
                changed += n;
            }
        }
        Ok(changed)
    }

    /// Copy of an initialization retargeted at `new_event_id`. The short
    /// form is widened to the long form with slot 0. Other instructions are
    /// copied unchanged.
    pub fn copy_init(&self, instruction: &Instruction, new_event_id: i64) -> Result<Instruction, EditError> {
        let instr = self.decode(&copy_instruction(instruction))?;
        if !instr.init {
            return Ok(instr.into_source());
        }
        let mut values = instr.args().to_vec();
        if instruction.opcode != INIT_OPCODE {
            values.insert(0, ArgValue::I32(0));
        }
        values[0] = ArgValue::I32(0);
        values[1] = ArgValue::from_i64(ArgType::I32, new_event_id);
        let types = vec![ArgType::I32; values.len()];
        let mut out = Instruction::new(INIT_CATEGORY, INIT_OPCODE, pack(&types, &values)?);
        out.layer = instruction.layer;
        Ok(out)
    }

    /// Runs `rules` over `event`: every instruction in order, then the
    /// scheduled insertions, then parameter reconciliation.
    pub fn apply_all_edits(&self, event: &mut Event, rules: &Arc<RuleSet>) -> Result<PassReport, EditError> {
        let mut ledger = OldParams::preprocess(event);
        let mut session = EditSession::new(Arc::clone(rules));
        for j in 0..event.instructions.len() {
            let mut instr = Instr::decode(&self.catalog, event.instructions[j].clone())?;
            // Unknown instructions never match, so their bindings can stay
            // as they are.
            if instr.doc().is_some() {
                self.set_instr_param_args(&mut instr, &ledger)?;
            }
            session.apply_edits(&mut instr, j)?;
            instr.save(Some(&mut ledger))?;
            event.instructions[j] = instr.into_source();
        }
        session.apply_adds(event, Some(&mut ledger))?;
        let params_dropped = ledger.postprocess(event);

        let mut report = session.finish(event.id);
        report.params_dropped = params_dropped;
        log::debug!(
            "event {}: {} applied, {} removed, {} inserted, {} unsatisfied",
            event.id,
            report.applied,
            report.removed,
            report.inserted,
            report.unsatisfied.len()
        );
        Ok(report)
    }
}
