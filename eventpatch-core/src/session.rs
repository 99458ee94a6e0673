use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::category::{is_arg_compatible, ValueCategory};
use crate::edits::{Anchor, EditError, EditKind, EditType, Insertion, RuleId, RuleSet, ValueEdit};
use crate::event::Event;
use crate::instr::Instr;
use crate::ledger::OldParams;
use crate::segment::{SegmentState, Transition};

/// Outcome of one edit pass over one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub event_id: i64,
    /// Rule applications, counting each rule once per instruction it fired on.
    pub applied: usize,
    pub removed: usize,
    pub inserted: usize,
    /// Parameter bindings lost with their instructions.
    pub params_dropped: usize,
    /// Required rules that never applied, rendered for display.
    pub unsatisfied: Vec<String>,
}

impl PassReport {
    pub fn is_complete(&self) -> bool {
        self.unsatisfied.is_empty()
    }

    pub fn ensure_complete(&self) -> Result<(), EditError> {
        if self.is_complete() {
            return Ok(());
        }
        Err(EditError::UnsatisfiedRules {
            event: self.event_id,
            count: self.unsatisfied.len(),
            summary: self.unsatisfied.join("; "),
        })
    }
}

/// Mutable state of one pass of a shared rule set over one event.
///
/// Instructions are fed to `apply_edits` in stream order; insertions are
/// only scheduled, and happen all at once in `apply_adds`.
#[derive(Debug)]
pub struct EditSession {
    rules: Arc<RuleSet>,
    states: BTreeMap<String, SegmentState>,
    pending_adds: BTreeMap<Anchor, Vec<RuleId>>,
    pending: BTreeSet<RuleId>,
    seen: HashSet<RuleId>,
    applied: usize,
    removed: usize,
    inserted: usize,
}

impl EditSession {
    pub fn new(rules: Arc<RuleSet>) -> EditSession {
        let mut pending_adds: BTreeMap<Anchor, Vec<RuleId>> = BTreeMap::new();
        for &(anchor, id) in rules.unanchored() {
            pending_adds.entry(anchor).or_default().push(id);
        }
        EditSession {
            states: rules.segments().clone(),
            pending: rules.required().clone(),
            pending_adds,
            seen: HashSet::new(),
            applied: 0,
            removed: 0,
            inserted: 0,
            rules,
        }
    }

    pub fn segment_state(&self, segment: &str) -> Option<SegmentState> {
        self.states.get(segment).copied()
    }

    fn transition(&mut self, segment: &str, transition: Transition, anchor: usize) {
        match transition {
            Transition::Stay => {}
            Transition::Become(state) => {
                log::trace!("segment {segment} -> {state:?}");
                self.states.insert(segment.to_string(), state);
            }
            Transition::Begin => self.begin_segment(segment, anchor),
        }
    }

    /// Enters `segment`, scheduling its additions at `anchor` and
    /// satisfying its checks.
    pub fn begin_segment(&mut self, segment: &str, anchor: usize) {
        log::debug!("segment {segment} begins at {anchor}");
        self.states.insert(segment.to_string(), SegmentState::During);
        let rules = Arc::clone(&self.rules);
        for &id in rules.segment_rules(segment) {
            match rules.get(id).kind {
                EditKind::SegmentAdd { .. } => {
                    self.pending_adds.entry(Anchor::At(anchor)).or_default().push(id);
                }
                EditKind::SegmentCheck { .. } => {
                    self.seen.insert(id);
                    self.pending.remove(&id);
                    self.applied += 1;
                }
                _ => {}
            }
        }
    }

    fn schedule(&mut self, anchor: Anchor, id: RuleId) {
        self.pending_adds.entry(anchor).or_default().push(id);
    }

    /// Applies every matching rule to the instruction at `index`.
    ///
    /// Rules run in `EditType` order. Removal, segment changes and value
    /// edits happen in place; insertions are scheduled for `apply_adds`.
    pub fn apply_edits(&mut self, instr: &mut Instr<'_>, index: usize) -> Result<(), EditError> {
        let rules = Arc::clone(&self.rules);
        let mut matched = rules.matches(instr);
        if matched.is_empty() {
            return Ok(());
        }
        matched.sort_by_key(|id| rules.get(*id).edit_type());
        log::trace!("{index}: {instr} matched {} rule(s)", matched.len());

        let mut erased = false;
        for id in matched {
            let rule = rules.get(id);
            if rule.apply_once && (self.seen.contains(&id) || erased) {
                continue;
            }

            match &rule.kind {
                EditKind::StartSegment {
                    segment,
                    pre_segment,
                } => {
                    if let Some(pre) = pre_segment {
                        let ready = self.segment_state(pre).map_or(false, SegmentState::reached);
                        if !ready {
                            continue;
                        }
                    }
                    let Some(state) = self.segment_state(segment) else {
                        continue;
                    };
                    self.transition(segment, state.on_start_marker(), index + 1);
                }
                EditKind::EndSegment { segment } => {
                    let Some(state) = self.segment_state(segment) else {
                        continue;
                    };
                    self.transition(segment, state.on_end_marker(), index);
                }
                EditKind::Remove { segment } => {
                    let state = match segment {
                        Some(seg) => match self.segment_state(seg) {
                            Some(state) if state.allows_edits() => Some((seg, state)),
                            _ => continue,
                        },
                        None => None,
                    };
                    if !erased {
                        instr.erase();
                        erased = true;
                        self.removed += 1;
                    }
                    if let Some((seg, state)) = state {
                        self.transition(seg, state.on_anchor(), index);
                    }
                }
                EditKind::MatchSegment { segment } => {
                    if self.segment_state(segment) != Some(SegmentState::Prematch) {
                        continue;
                    }
                    self.begin_segment(segment, index);
                }
                EditKind::AddAfter(_) | EditKind::AddBefore(_) | EditKind::SegmentAdd { .. } => {
                    self.schedule(Anchor::At(index), id);
                }
                EditKind::SegmentCheck { .. } => {}
                EditKind::Replace(edit) => {
                    if !erased {
                        apply_value_edit(instr, edit, rule.category)?;
                    }
                }
            }

            log::debug!("{index}: applied {rule}");
            self.applied += 1;
            self.seen.insert(id);
            if rule.insertion().is_none() {
                self.pending.remove(&id);
            }
        }
        Ok(())
    }

    /// Performs every scheduled insertion.
    ///
    /// Anchors are visited from the highest index down so that inserting
    /// never moves an anchor still to be processed; appends come last.
    /// Instructions carrying parameters need `ledger`.
    pub fn apply_adds(&mut self, event: &mut Event, mut ledger: Option<&mut OldParams>) -> Result<(), EditError> {
        let rules = Arc::clone(&self.rules);
        let adds = std::mem::take(&mut self.pending_adds);
        for (anchor, ids) in adds.into_iter().rev() {
            match anchor {
                Anchor::End => {
                    for id in ids {
                        let Some(add) = rules.get(id).insertion() else {
                            continue;
                        };
                        let at = event.instructions.len();
                        self.insert(event, at, add, ledger.as_deref_mut())?;
                        self.pending.remove(&id);
                    }
                }
                Anchor::At(index) => {
                    // Inserting repeatedly at one position reverses the
                    // order, so walk each side backwards.
                    for after in [true, false] {
                        for &id in ids.iter().rev() {
                            let rule = rules.get(id);
                            if (rule.edit_type() == EditType::AddAfter) != after {
                                continue;
                            }
                            let Some(add) = rule.insertion() else {
                                continue;
                            };
                            let at = if after { index + 1 } else { index };
                            let at = at.min(event.instructions.len());
                            self.insert(event, at, add, ledger.as_deref_mut())?;
                            self.pending.remove(&id);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn insert(
        &mut self,
        event: &mut Event,
        at: usize,
        add: &Insertion,
        ledger: Option<&mut OldParams>,
    ) -> Result<(), EditError> {
        // Each placement is a new instruction, even when one rule fires
        // at several anchors or across several events.
        let instruction = add.instruction.duplicate();
        if !add.params.is_empty() {
            let Some(ledger) = ledger else {
                return Err(EditError::UnboundPlaceholder {
                    token: format!("{}[{}]", instruction.category, instruction.opcode),
                    reason: format!("event {} has no parameter ledger for the insertion", event.id),
                });
            };
            ledger.add_parameters(instruction.key(), add.params.clone());
        }
        event.instructions.insert(at, instruction);
        self.inserted += 1;
        Ok(())
    }

    pub fn finish(self, event_id: i64) -> PassReport {
        let unsatisfied: Vec<String> = self
            .pending
            .iter()
            .map(|id| self.rules.get(*id).to_string())
            .collect();
        for rule in &unsatisfied {
            log::debug!("event {event_id}: unsatisfied {rule}");
        }
        PassReport {
            event_id,
            applied: self.applied,
            removed: self.removed,
            inserted: self.inserted,
            params_dropped: 0,
            unsatisfied,
        }
    }
}

fn apply_value_edit(instr: &mut Instr<'_>, edit: &ValueEdit, category: ValueCategory) -> Result<(), EditError> {
    for (&index, value) in &edit.positional {
        instr.set(index, value)?;
    }
    if edit.replacements.is_empty() {
        return Ok(());
    }
    for index in 0..instr.len() {
        if !is_arg_compatible(instr, index, category) {
            continue;
        }
        if let Some(to) = edit.replacements.get(&instr.format_arg(index)) {
            instr.set(index, to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::InstrEdit;
    use crate::event::Instruction;
    use crate::test_support::{ins, sample_editor};

    fn insertion(instruction: Instruction) -> Insertion {
        Insertion {
            instruction,
            params: Vec::new(),
        }
    }

    #[test]
    fn scheduled_insertions_keep_registration_order() {
        let editor = sample_editor();
        let catalog = editor.catalog();
        let mut rules = RuleSet::new();
        for lot in [1, 2, 3] {
            let add = ins(&editor, &format!("AwardItemLot({lot})"));
            let edit = InstrEdit::new(Some("EndEvent"), EditKind::AddBefore(insertion(add)));
            rules.add_edit("EndEvent", edit, catalog).unwrap();
        }
        let after = ins(&editor, "AwardItemLot(4)");
        let edit = InstrEdit::new(Some("EndEvent"), EditKind::AddAfter(insertion(after)));
        rules.add_edit("EndEvent", edit, catalog).unwrap();

        let mut event = Event::with_instructions(
            1,
            vec![ins(&editor, "WaitFixedTime(1)"), ins(&editor, "EndEvent()")],
        );
        let mut session = EditSession::new(Arc::new(rules));
        for i in 0..event.instructions.len() {
            let mut instr = editor.decode(&event.instructions[i]).unwrap();
            session.apply_edits(&mut instr, i).unwrap();
        }
        session.apply_adds(&mut event, None).unwrap();
        let report = session.finish(1);
        assert!(report.is_complete());
        assert_eq!(report.inserted, 4);

        let names: Vec<String> = event
            .instructions
            .iter()
            .map(|i| editor.decode(i).unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "WaitFixedTime (1)",
                "AwardItemLot (1)",
                "AwardItemLot (2)",
                "AwardItemLot (3)",
                "EndEvent ()",
                "AwardItemLot (4)",
            ]
        );
    }

    #[test]
    fn unanchored_insertions_prepend_and_append() {
        let editor = sample_editor();
        let mut rules = RuleSet::new();
        rules
            .add_unanchored(InstrEdit::new(None, EditKind::AddAfter(insertion(ins(&editor, "AwardItemLot(9)")))))
            .unwrap();
        rules
            .add_unanchored(InstrEdit::new(None, EditKind::AddBefore(insertion(ins(&editor, "AwardItemLot(1)")))))
            .unwrap();
        let mut event = Event::with_instructions(1, vec![ins(&editor, "EndEvent()")]);
        let mut session = EditSession::new(Arc::new(rules));
        session.apply_adds(&mut event, None).unwrap();
        assert!(session.finish(1).is_complete());
        let ops: Vec<(i32, i32)> = event.instructions.iter().map(|i| (i.category, i.opcode)).collect();
        assert_eq!(ops, vec![(2003, 4), (1000, 4), (2003, 4)]);
    }

    #[test]
    fn several_appends_after_one_anchor_keep_their_order() {
        let editor = sample_editor();
        let catalog = editor.catalog();
        let mut rules = RuleSet::new();
        for lot in [1, 2, 3] {
            let add = ins(&editor, &format!("AwardItemLot({lot})"));
            let edit = InstrEdit::new(Some("WaitFixedTime"), EditKind::AddAfter(insertion(add)));
            rules.add_edit("WaitFixedTime", edit, catalog).unwrap();
        }
        for lot in [4, 5, 6] {
            let add = ins(&editor, &format!("AwardItemLot({lot})"));
            rules
                .add_unanchored(InstrEdit::new(None, EditKind::AddAfter(insertion(add))))
                .unwrap();
        }

        let mut event = Event::with_instructions(
            1,
            vec![ins(&editor, "WaitFixedTime(1)"), ins(&editor, "AwardItemLot(0)")],
        );
        let mut session = EditSession::new(Arc::new(rules));
        for i in 0..event.instructions.len() {
            let mut instr = editor.decode(&event.instructions[i]).unwrap();
            session.apply_edits(&mut instr, i).unwrap();
        }
        session.apply_adds(&mut event, None).unwrap();
        assert!(session.finish(1).is_complete());

        let names: Vec<String> = event
            .instructions
            .iter()
            .map(|i| editor.decode(i).unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "WaitFixedTime (1)",
                "AwardItemLot (1)",
                "AwardItemLot (2)",
                "AwardItemLot (3)",
                "AwardItemLot (0)",
                "AwardItemLot (4)",
                "AwardItemLot (5)",
                "AwardItemLot (6)",
            ]
        );
    }

    #[test]
    fn parameterized_insertions_need_a_ledger() {
        let editor = sample_editor();
        let (add, params) = editor.parse_add_arg("AwardItemLot(X0)").unwrap();
        let mut rules = RuleSet::new();
        rules
            .add_unanchored(InstrEdit::new(None, EditKind::AddAfter(Insertion { instruction: add, params })))
            .unwrap();
        let rules = Arc::new(rules);

        let mut event = Event::new(1);
        let mut session = EditSession::new(Arc::clone(&rules));
        let err = session.apply_adds(&mut event, None).unwrap_err();
        assert!(matches!(err, EditError::UnboundPlaceholder { .. }));

        let mut event = Event::new(1);
        let mut ledger = OldParams::new_event();
        let mut session = EditSession::new(rules);
        session.apply_adds(&mut event, Some(&mut ledger)).unwrap();
        ledger.postprocess(&mut event);
        assert_eq!(event.parameters.len(), 1);
        assert_eq!(event.parameters[0].instruction_index, 0);
    }

    #[test]
    fn segment_checks_are_satisfied_when_the_segment_begins() {
        let editor = sample_editor();
        let catalog = editor.catalog();
        let mut rules = RuleSet::new();
        rules.declare_segment("fight", SegmentState::Before).unwrap();
        let start = InstrEdit::new(
            Some("EnableCharacter"),
            EditKind::StartSegment {
                segment: "fight".into(),
                pre_segment: None,
            },
        );
        rules.add_edit("EnableCharacter", start, catalog).unwrap();
        let anchor = InstrEdit::new(Some("WaitFixedTime"), EditKind::MatchSegment { segment: "fight".into() });
        rules.add_edit("WaitFixedTime", anchor, catalog).unwrap();
        let check = InstrEdit::new(Some("fight"), EditKind::SegmentCheck { segment: "fight".into() });
        rules.add_edit("fight", check, catalog).unwrap();

        let event = Event::with_instructions(
            1,
            vec![
                ins(&editor, "WaitFixedTime(1)"),
                ins(&editor, "EnableCharacter(5)"),
                ins(&editor, "WaitFixedTime(2)"),
            ],
        );
        let mut session = EditSession::new(Arc::new(rules));
        let mut first = editor.decode(&event.instructions[0]).unwrap();
        session.apply_edits(&mut first, 0).unwrap();
        assert_eq!(session.segment_state("fight"), Some(SegmentState::Before));

        let mut second = editor.decode(&event.instructions[1]).unwrap();
        session.apply_edits(&mut second, 1).unwrap();
        assert_eq!(session.segment_state("fight"), Some(SegmentState::Prematch));

        let mut third = editor.decode(&event.instructions[2]).unwrap();
        session.apply_edits(&mut third, 2).unwrap();
        assert_eq!(session.segment_state("fight"), Some(SegmentState::During));
        assert!(session.finish(1).is_complete());
    }

    #[test]
    fn reports_list_unsatisfied_rules() {
        let editor = sample_editor();
        let mut rules = RuleSet::new();
        let edit = InstrEdit::new(Some("EndEvent"), EditKind::Remove { segment: None });
        rules.add_edit("EndEvent", edit, editor.catalog()).unwrap();
        let session = EditSession::new(Arc::new(rules));
        let report = session.finish(42);
        assert_eq!(report.unsatisfied, vec!["EndEvent [Remove]".to_string()]);
        let err = report.ensure_complete().unwrap_err();
        assert!(matches!(err, EditError::UnsatisfiedRules { event: 42, count: 1, .. }));
    }
}
