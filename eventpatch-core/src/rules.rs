use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::category::ValueCategory;
use crate::edits::{EditError, EditType, RuleSet};
use crate::editor::{EventAddCommand, EventEditor, SegmentSpec};

/// A rule file: groups of edits, each applied to a list of events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleGroup {
    pub events: Vec<i64>,
    /// Registered in order, so a `pre_segment` must come earlier.
    #[serde(default)]
    pub segments: Vec<SegmentSpec>,
    #[serde(default)]
    pub edits: Vec<EditConfig>,
    #[serde(default)]
    pub adds: Vec<EventAddCommand>,
    #[serde(default)]
    pub rewrite_ints: Option<RewriteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum EditConfig {
    Remove {
        find: String,
        /// Only remove while this segment is open.
        #[serde(default)]
        segment: Option<String>,
        #[serde(default)]
        apply_once: bool,
    },
    AddBefore {
        add: String,
        #[serde(default)]
        find: Option<String>,
        #[serde(default)]
        apply_once: bool,
    },
    AddAfter {
        add: String,
        #[serde(default)]
        find: Option<String>,
        #[serde(default)]
        apply_once: bool,
    },
    SegmentAdd {
        segment: String,
        add: String,
    },
    SegmentCheck {
        segment: String,
    },
    MatchSegment {
        segment: String,
        find: String,
    },
    Replace {
        find: String,
        #[serde(default)]
        to: Option<String>,
    },
}

/// Bulk integer rewrite run after a group's edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteConfig {
    pub changes: BTreeMap<i64, i64>,
    #[serde(default)]
    pub category: ValueCategory,
}

/// A rule group ready to run.
#[derive(Debug, Clone)]
pub struct CompiledGroup {
    pub events: Vec<i64>,
    pub rules: Arc<RuleSet>,
    pub rewrite: Option<RewriteConfig>,
}

impl EditConfig {
    fn register(&self, editor: &EventEditor, rules: &mut RuleSet) -> Result<(), EditError> {
        match self {
            EditConfig::Remove {
                find,
                segment: Some(segment),
                ..
            } => {
                editor.remove_segment_macro(rules, segment, find)?;
            }
            EditConfig::Remove {
                find,
                segment: None,
                apply_once,
            } => {
                editor.remove_macro(rules, find, *apply_once)?;
            }
            EditConfig::AddBefore { add, find, apply_once } => {
                editor.add_macro(rules, EditType::AddBefore, add, find.as_deref(), *apply_once)?;
            }
            EditConfig::AddAfter { add, find, apply_once } => {
                editor.add_macro(rules, EditType::AddAfter, add, find.as_deref(), *apply_once)?;
            }
            EditConfig::SegmentAdd { segment, add } => {
                editor.add_macro(rules, EditType::SegmentAdd, add, Some(segment), false)?;
            }
            EditConfig::SegmentCheck { segment } => {
                editor.check_segment_macro(rules, segment)?;
            }
            EditConfig::MatchSegment { segment, find } => {
                editor.match_segment_macro(rules, segment, find)?;
            }
            EditConfig::Replace { find, to } => {
                editor.replace_macro(rules, find, to.as_deref())?;
            }
        }
        Ok(())
    }
}

impl RuleFile {
    pub fn from_json(text: &str) -> Result<RuleFile, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> crate::Result<RuleFile> {
        let text = fs::read_to_string(path)?;
        Ok(RuleFile::from_json(&text)?)
    }

    /// Builds one shared rule set per group.
    pub fn compile(&self, editor: &EventEditor) -> Result<Vec<CompiledGroup>, EditError> {
        let mut out = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let mut rules = RuleSet::new();
            for segment in &group.segments {
                editor.register_segment(&mut rules, segment)?;
            }
            for edit in &group.edits {
                edit.register(editor, &mut rules)?;
            }
            editor.add_commands(&mut rules, &group.adds)?;
            log::debug!(
                "compiled {} rule(s) for events {:?}",
                rules.len(),
                group.events
            );
            out.push(CompiledGroup {
                events: group.events.clone(),
                rules: Arc::new(rules),
                rewrite: group.rewrite_ints.clone(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_editor;

    const RULES: &str = r#"{
        "groups": [
            {
                "events": [100, 101],
                "segments": [
                    { "name": "fight", "start": "EnableCharacter", "end": "EndEvent" }
                ],
                "edits": [
                    { "type": "remove", "find": "ForceCharacterDeath", "segment": "fight" },
                    { "type": "segment_add", "segment": "fight", "add": "AwardItemLot(50)" },
                    { "type": "add_after", "add": "SetEventFlag(X0, ON)", "find": "EndEvent" },
                    { "type": "replace", "find": "WaitFixedTime(1 -> 2)" }
                ],
                "adds": [ { "cmd": "AwardItemLot(1)", "before": "start" } ],
                "rewrite_ints": { "changes": { "7": 9 }, "category": "enemy" }
            }
        ]
    }"#;

    #[test]
    fn rule_files_compile_into_rule_sets() {
        let editor = sample_editor();
        let file = RuleFile::from_json(RULES).unwrap();
        let groups = file.compile(&editor).unwrap();
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.events, vec![100, 101]);
        // start, end, remove, segment add, add after, replace, add command
        assert_eq!(group.rules.len(), 7);
        assert!(group.rules.has_segment("fight"));
        let rewrite = group.rewrite.as_ref().unwrap();
        assert_eq!(rewrite.changes.get(&7), Some(&9));
        assert_eq!(rewrite.category, ValueCategory::Enemy);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = r#"{ "groups": [ { "events": [1], "edits": [ { "type": "remove", "find": "EndEvent", "oops": 1 } ] } ] }"#;
        assert!(RuleFile::from_json(text).is_err());
    }

    #[test]
    fn bad_patterns_fail_compilation() {
        let editor = sample_editor();
        let text = r#"{ "groups": [ { "events": [1], "edits": [ { "type": "remove", "find": "NotACommand" } ] } ] }"#;
        let file = RuleFile::from_json(text).unwrap();
        assert!(matches!(
            file.compile(&editor).unwrap_err(),
            EditError::UnknownInstruction { .. }
        ));
    }
}
