use std::sync::Arc;

use crate::catalog::Catalog;
use crate::editor::EventEditor;
use crate::event::Instruction;

pub(crate) const SAMPLE_CATALOG: &str = r#"{
    "main_classes": [
        {
            "name": "System",
            "index": 3,
            "instrs": [
                {
                    "name": "IfEventFlag",
                    "index": 0,
                    "args": [
                        { "name": "Result Condition Group", "type": 3, "enum_name": "Condition Group" },
                        { "name": "Desired Flag State", "type": 0, "enum_name": "ON/OFF" },
                        { "name": "Target Event Flag Type", "type": 0 },
                        { "name": "Target Event Flag ID", "type": 2, "category": "event_flag" }
                    ]
                }
            ]
        },
        {
            "name": "Timer",
            "index": 1000,
            "instrs": [
                { "name": "WaitFixedTime", "index": 0, "args": [ { "name": "Seconds", "type": 6 } ] },
                { "name": "EndEvent", "index": 4, "args": [] }
            ]
        },
        {
            "name": "Event",
            "index": 2000,
            "instrs": [
                {
                    "name": "InitializeEvent",
                    "index": 0,
                    "args": [
                        { "name": "Event Slot Number", "type": 5 },
                        { "name": "Event ID", "type": 2, "category": "event_id" }
                    ]
                },
                {
                    "name": "InitializeCommonEvent",
                    "index": 6,
                    "args": [ { "name": "Event ID", "type": 2, "category": "event_id" } ]
                }
            ]
        },
        {
            "name": "Event Control",
            "index": 2003,
            "instrs": [
                { "name": "AwardItemLot", "index": 4, "args": [ { "name": "Item Lot ID", "type": 5 } ] },
                {
                    "name": "SetEventFlag",
                    "index": 66,
                    "args": [
                        { "name": "Target Event Flag ID", "type": 2, "category": "event_flag" },
                        { "name": "Desired Flag State", "type": 0, "enum_name": "ON/OFF" }
                    ]
                }
            ]
        },
        {
            "name": "Character",
            "index": 2004,
            "instrs": [
                {
                    "name": "EnableCharacter",
                    "index": 1,
                    "args": [ { "name": "Target Entity ID", "type": 2, "category": "enemy" } ]
                },
                {
                    "name": "ForceCharacterDeath",
                    "index": 5,
                    "args": [
                        { "name": "Target Entity ID", "type": 2, "category": "enemy" },
                        { "name": "Award Souls", "type": 0 }
                    ]
                },
                {
                    "name": "ChangeCharacterFlag",
                    "index": 10,
                    "args": [
                        { "name": "Target Entity ID", "type": 2, "category": "enemy" },
                        { "name": "Event Flag ID", "type": 2, "category": "event_flag" }
                    ]
                }
            ]
        }
    ],
    "enums": [
        { "name": "ON/OFF", "values": { "0": "OFF", "1": "ON" }, "global": true },
        { "name": "Condition Group", "values": { "-1": "OR 01", "0": "MAIN", "1": "AND 01" } }
    ]
}"#;

pub(crate) fn sample_catalog() -> Catalog {
    Catalog::from_json(SAMPLE_CATALOG).unwrap()
}

pub(crate) fn sample_editor() -> EventEditor {
    EventEditor::new(Arc::new(sample_catalog()))
}

/// Shorthand for building an instruction from a command string in tests.
pub(crate) fn ins(editor: &EventEditor, command: &str) -> Instruction {
    editor.parse_add(command).unwrap()
}
