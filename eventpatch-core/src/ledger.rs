use std::collections::HashMap;

use crate::event::{Event, InstrKey, Instruction, Parameter};

/// Keeps an event's parameter bindings attached to the right instructions
/// while a pass adds, removes and duplicates them.
///
/// Bindings are tracked by instruction identity, not position. After the
/// pass, `postprocess` rewrites every surviving binding to its
/// instruction's final index and drops bindings whose instruction is gone.
/// Parameters should not be edited by hand while a ledger is active.
#[derive(Debug, Clone, Default)]
pub struct OldParams {
    // instruction identities in their order before the pass
    original: Vec<InstrKey>,
    // the event's bindings before the pass, indexed against `original`
    params: Vec<Parameter>,
    new_bindings: HashMap<InstrKey, Vec<Parameter>>,
    binding_order: Vec<InstrKey>,
}

impl OldParams {
    pub fn preprocess(event: &Event) -> OldParams {
        OldParams {
            original: event.instructions.iter().map(Instruction::key).collect(),
            params: event.parameters.clone(),
            ..OldParams::default()
        }
    }

    /// Ledger for an event being assembled from scratch.
    pub fn new_event() -> OldParams {
        OldParams::default()
    }

    pub fn has_parameters(&self) -> bool {
        !self.params.is_empty() || !self.new_bindings.is_empty()
    }

    /// Records the bindings of an instruction written during this pass.
    ///
    /// The instruction's index is filled in by `postprocess`. Registering an
    /// instruction that already had bindings replaces them.
    pub fn add_parameters(&mut self, key: InstrKey, params: Vec<Parameter>) {
        if self.new_bindings.insert(key, params).is_none() {
            self.binding_order.push(key);
        }
    }

    /// Currently known bindings of `instruction`. The `instruction_index`
    /// of the returned parameters is not meaningful.
    pub fn instruction_params(&self, instruction: &Instruction) -> Vec<Parameter> {
        let key = instruction.key();
        if let Some(params) = self.new_bindings.get(&key) {
            return params.clone();
        }
        // With duplicated identities the first original position wins.
        match self.original.iter().position(|k| *k == key) {
            Some(index) => self
                .params
                .iter()
                .filter(|p| p.instruction_index == index)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Rebuilds `event.parameters` against the event's current instructions.
    /// Returns how many earlier bindings were dropped.
    pub fn postprocess(&mut self, event: &mut Event) -> usize {
        if !self.has_parameters() {
            return 0;
        }

        let mut current: HashMap<InstrKey, Vec<usize>> = HashMap::new();
        for (i, ins) in event.instructions.iter().enumerate() {
            current.entry(ins.key()).or_default().push(i);
        }

        let mut rebuilt = Vec::new();
        let mut dropped = 0;
        for p in &self.params {
            let Some(key) = self.original.get(p.instruction_index) else {
                log::warn!(
                    "event {}: dropping parameter bound to missing instruction {}",
                    event.id,
                    p.instruction_index
                );
                dropped += 1;
                continue;
            };
            if self.new_bindings.contains_key(key) {
                continue;
            }
            match current.get(key) {
                Some(indices) => rebuilt.extend(indices.iter().map(|&i| p.at_index(i))),
                None => {
                    log::debug!(
                        "event {}: instruction {} removed, dropping parameter X{}_{}",
                        event.id,
                        p.instruction_index,
                        p.source_start_byte,
                        p.byte_count
                    );
                    dropped += 1;
                }
            }
        }

        for key in &self.binding_order {
            let Some(indices) = current.get(key) else {
                continue;
            };
            for p in &self.new_bindings[key] {
                rebuilt.extend(indices.iter().map(|&i| p.at_index(i)));
            }
        }

        event.parameters = rebuilt;
        self.original = event.instructions.iter().map(Instruction::key).collect();
        self.params = event.parameters.clone();
        self.new_bindings.clear();
        self.binding_order.clear();
        dropped
    }
}
