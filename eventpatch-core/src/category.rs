use serde::{Deserialize, Serialize};
use std::fmt;

use crate::instr::Instr;

/// Semantic tag on an argument slot or on a rewrite value.
///
/// Placed enemies, objects, regions and generators share one numeric id
/// space at runtime, so everything under the entity umbrella is mutually
/// compatible even though the kinds are distinct for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueCategory {
    #[default]
    Any,
    Entity,
    Enemy,
    Object,
    Region,
    Generator,
    Player,
    Boss,
    EventFlag,
    EventId,
}

impl ValueCategory {
    pub fn is_entity(self) -> bool {
        matches!(
            self,
            ValueCategory::Entity
                | ValueCategory::Enemy
                | ValueCategory::Object
                | ValueCategory::Region
                | ValueCategory::Generator
                | ValueCategory::Player
                | ValueCategory::Boss
        )
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueCategory::Any => "any",
            ValueCategory::Entity => "entity",
            ValueCategory::Enemy => "enemy",
            ValueCategory::Object => "object",
            ValueCategory::Region => "region",
            ValueCategory::Generator => "generator",
            ValueCategory::Player => "player",
            ValueCategory::Boss => "boss",
            ValueCategory::EventFlag => "event_flag",
            ValueCategory::EventId => "event_id",
        };
        f.write_str(name)
    }
}

pub fn are_compatible(a: ValueCategory, b: ValueCategory) -> bool {
    if a == ValueCategory::Any || b == ValueCategory::Any {
        return true;
    }
    if a.is_entity() && b.is_entity() {
        return true;
    }
    a == b
}

/// Whether a value of `category` may be matched or rewritten at argument
/// `index` of `instr`.
///
/// Instructions whose catalog entry carries no category annotations at all
/// fall back to plain value equality. Otherwise the slot must declare a
/// category and it must be compatible, even for a wildcard.
pub fn is_arg_compatible(instr: &Instr<'_>, index: usize, category: ValueCategory) -> bool {
    let Some(doc) = instr.doc() else {
        return true;
    };
    if !doc.has_categories() {
        return true;
    }
    match doc.args.get(index).and_then(|arg| arg.category) {
        Some(declared) => are_compatible(declared, category),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ins, sample_editor};

    #[test]
    fn wildcard_is_compatible_with_everything() {
        assert!(are_compatible(ValueCategory::Any, ValueCategory::EventFlag));
        assert!(are_compatible(ValueCategory::Boss, ValueCategory::Any));
    }

    #[test]
    fn entity_kinds_share_an_id_space() {
        assert!(are_compatible(ValueCategory::Enemy, ValueCategory::Region));
        assert!(are_compatible(ValueCategory::Entity, ValueCategory::Boss));
        assert!(!are_compatible(ValueCategory::Enemy, ValueCategory::EventFlag));
        assert!(!are_compatible(ValueCategory::EventId, ValueCategory::EventFlag));
        assert!(are_compatible(ValueCategory::EventFlag, ValueCategory::EventFlag));
    }

    #[test]
    fn slot_compatibility_follows_catalog_annotations() {
        let editor = sample_editor();
        let instr = editor
            .decode(&ins(&editor, "ChangeCharacterFlag(7, 7)"))
            .unwrap();
        assert!(is_arg_compatible(&instr, 0, ValueCategory::Enemy));
        assert!(!is_arg_compatible(&instr, 1, ValueCategory::Enemy));
        assert!(is_arg_compatible(&instr, 1, ValueCategory::EventFlag));
    }

    #[test]
    fn annotated_instructions_reject_undeclared_slots() {
        let editor = sample_editor();
        let instr = editor
            .decode(&ins(&editor, "ForceCharacterDeath(7, 1)"))
            .unwrap();
        assert!(!is_arg_compatible(&instr, 1, ValueCategory::Enemy));
        assert!(!is_arg_compatible(&instr, 1, ValueCategory::Any));
        assert!(is_arg_compatible(&instr, 0, ValueCategory::Any));
    }

    #[test]
    fn unannotated_instructions_match_by_value_alone() {
        let editor = sample_editor();
        let instr = editor.decode(&ins(&editor, "AwardItemLot(7)")).unwrap();
        assert!(is_arg_compatible(&instr, 0, ValueCategory::EventFlag));
    }
}
