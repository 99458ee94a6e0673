use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

pub mod catalog;
pub mod category;
pub mod codec;
pub mod edits;
pub mod editor;
pub mod event;
pub mod instr;
pub mod ledger;
pub mod rules;
pub mod segment;
pub mod session;
#[cfg(test)]
mod test_support;

pub use catalog::Catalog;
pub use category::{are_compatible, is_arg_compatible, ValueCategory};
pub use edits::{EditError, EditKind, EditType, InstrEdit, RuleSet};
pub use editor::{EventAddCommand, EventEditor, SegmentSpec};
pub use event::{Event, EventFile, Instruction, Parameter};
pub use instr::{Instr, Placeholder};
pub use ledger::OldParams;
pub use rules::RuleFile;
pub use segment::SegmentState;
pub use session::{EditSession, PassReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSettings {
    pub catalog_path: PathBuf,
    pub rules_path: PathBuf,
    /// An event file, or a directory searched for `.json` / `.json.gz` files.
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Fail the run when a required rule never applies.
    pub strict: bool,
    /// Write `patch_log.txt` next to the output.
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),
    #[error("edit error: {0}")]
    Edit(#[from] EditError),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PatchError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub events_patched: usize,
    pub unsatisfied: usize,
}

fn is_event_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".json") || name.ends_with(".json.gz")
}

// (source, path relative to the input root)
fn collect_inputs(input: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    if input.is_file() {
        let name = input
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| PatchError::Config(format!("Input path has no file name: {}", input.display())))?;
        return Ok(vec![(input.to_path_buf(), name)]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_event_file(entry.path()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(input)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));
        files.push((entry.path().to_path_buf(), rel));
    }
    Ok(files)
}

/// Applies a rule file to every event file under `settings.input_path`,
/// mirroring the input layout under `settings.output_path`.
pub fn run(settings: PatchSettings) -> Result<RunSummary> {
    if !settings.input_path.exists() {
        return Err(PatchError::Config(format!(
            "Input path does not exist: {}",
            settings.input_path.display()
        )));
    }
    if !settings.output_path.exists() {
        fs::create_dir_all(&settings.output_path)?;
    }

    let catalog = Arc::new(Catalog::load(&settings.catalog_path)?);
    let editor = EventEditor::new(catalog);
    let groups = RuleFile::load(&settings.rules_path)?.compile(&editor)?;

    let mut by_event: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, group) in groups.iter().enumerate() {
        for &id in &group.events {
            by_event.entry(id).or_default().push(i);
        }
    }

    let inputs = collect_inputs(&settings.input_path)?;
    log::info!("patching {} file(s) with {} rule group(s)", inputs.len(), groups.len());

    let mut patch_log = String::new();
    let mut summary = RunSummary::default();
    let mut found: BTreeSet<i64> = BTreeSet::new();

    for (source, rel) in &inputs {
        let mut file = EventFile::load(source)?;
        patch_log.push_str(&format!("{}:\n", rel.display()));
        let mut touched = false;

        for event in file.events.iter_mut() {
            let Some(group_ids) = by_event.get(&event.id) else {
                continue;
            };
            found.insert(event.id);
            touched = true;
            summary.events_patched += 1;

            for &g in group_ids {
                let group = &groups[g];
                let report = editor.apply_all_edits(event, &group.rules)?;
                patch_log.push_str(&format!(
                    "  event {}: {} applied, {} removed, {} inserted, {} parameter(s) dropped\n",
                    event.id, report.applied, report.removed, report.inserted, report.params_dropped
                ));
                if let Some(rewrite) = &group.rewrite {
                    let changed = editor.rewrite_event_ints(event, &rewrite.changes, rewrite.category)?;
                    patch_log.push_str(&format!("  event {}: {} value(s) rewritten\n", event.id, changed));
                }
                for rule in &report.unsatisfied {
                    log::warn!("event {}: rule never applied: {rule}", event.id);
                    patch_log.push_str(&format!("    unsatisfied: {rule}\n"));
                }
                summary.unsatisfied += report.unsatisfied.len();
                if settings.strict {
                    report.ensure_complete()?;
                }
            }
        }

        if !touched {
            patch_log.push_str("  (no matching events)\n");
        }
        let out = settings.output_path.join(rel);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        file.save(&out)?;
        summary.files += 1;
    }

    let missing: Vec<i64> = by_event.keys().copied().filter(|id| !found.contains(id)).collect();
    if !missing.is_empty() {
        log::warn!("events named in rules but not found: {missing:?}");
        patch_log.push_str(&format!("events not found: {missing:?}\n"));
        if settings.strict {
            return Err(PatchError::Config(format!(
                "Events named in rules were not found: {missing:?}"
            )));
        }
    }

    log::info!(
        "patched {} event(s) in {} file(s), {} unsatisfied rule(s)",
        summary.events_patched,
        summary.files,
        summary.unsatisfied
    );

    if settings.debug {
        let log_path = settings.output_path.join("patch_log.txt");
        fs::write(log_path, patch_log)?;
    }

    Ok(summary)
}

/// Human-readable listing of every event in `file`, with parameter
/// bindings shown as placeholders.
pub fn dump_events(catalog_path: &Path, file: &Path) -> Result<String> {
    let catalog = Arc::new(Catalog::load(catalog_path)?);
    let editor = EventEditor::new(catalog);
    let events = EventFile::load(file)?;
    let mut out = String::new();
    for event in &events.events {
        out.push_str(&format!("Event {} (rest {}):\n", event.id, event.rest_behavior));
        let ledger = OldParams::preprocess(event);
        for (i, instruction) in event.instructions.iter().enumerate() {
            let mut instr = editor.decode(instruction)?;
            if instr.doc().is_some() {
                editor.set_instr_param_args(&mut instr, &ledger)?;
            }
            out.push_str(&format!("  {i:>3}: {instr}\n"));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SAMPLE_CATALOG;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("eventpatch-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const EVENTS: &str = r#"{"events":[
        {"id":100,"instructions":[
            {"category":2004,"opcode":1,"args":[7,0,0,0]},
            {"category":1000,"opcode":4,"args":[]}
        ]},
        {"id":200,"instructions":[
            {"category":1000,"opcode":4,"args":[]}
        ]}
    ]}"#;

    const RULES: &str = r#"{"groups":[
        {"events":[100],"edits":[{"type":"add_before","add":"AwardItemLot(5)","find":"EndEvent"}]}
    ]}"#;

    fn settings(dir: &Path, strict: bool) -> PatchSettings {
        PatchSettings {
            catalog_path: dir.join("catalog.json"),
            rules_path: dir.join("rules.json"),
            input_path: dir.join("in"),
            output_path: dir.join("out"),
            strict,
            debug: true,
        }
    }

    #[test]
    fn run_patches_matching_events_and_mirrors_layout() {
        let dir = scratch_dir("run");
        fs::write(dir.join("catalog.json"), SAMPLE_CATALOG).unwrap();
        fs::write(dir.join("rules.json"), RULES).unwrap();
        fs::create_dir_all(dir.join("in/sub")).unwrap();
        fs::write(dir.join("in/sub/m10.json"), EVENTS).unwrap();
        fs::write(dir.join("in/readme.txt"), "ignored").unwrap();

        let summary = run(settings(&dir, true)).unwrap();
        assert_eq!(summary, RunSummary { files: 1, events_patched: 1, unsatisfied: 0 });

        let out = EventFile::load(&dir.join("out/sub/m10.json")).unwrap();
        let patched = &out.events[0];
        assert_eq!(patched.instructions.len(), 3);
        assert_eq!((patched.instructions[1].category, patched.instructions[1].opcode), (2003, 4));
        assert_eq!(out.events[1].instructions.len(), 1);
        let patch_log = fs::read_to_string(dir.join("out/patch_log.txt")).unwrap();
        assert!(patch_log.contains("sub/m10.json:\n") || patch_log.contains("sub\\m10.json:\n"));
        assert!(patch_log.contains("  event 100: 1 applied, 0 removed, 1 inserted, 0 parameter(s) dropped\n"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn strict_runs_fail_on_unsatisfied_rules() {
        let dir = scratch_dir("strict");
        fs::write(dir.join("catalog.json"), SAMPLE_CATALOG).unwrap();
        let rules = r#"{"groups":[{"events":[200],"edits":[{"type":"remove","find":"AwardItemLot"}]}]}"#;
        fs::write(dir.join("rules.json"), rules).unwrap();
        fs::create_dir_all(dir.join("in")).unwrap();
        fs::write(dir.join("in/m10.json"), EVENTS).unwrap();

        let err = run(settings(&dir, true)).unwrap_err();
        assert!(matches!(err, PatchError::Edit(EditError::UnsatisfiedRules { event: 200, .. })));

        let summary = run(settings(&dir, false)).unwrap();
        assert_eq!(summary.unsatisfied, 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_input_is_a_config_error() {
        let dir = scratch_dir("missing");
        let err = run(settings(&dir, false)).unwrap_err();
        assert!(matches!(err, PatchError::Config(_)));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dump_lists_instructions() {
        let dir = scratch_dir("dump");
        fs::write(dir.join("catalog.json"), SAMPLE_CATALOG).unwrap();
        fs::write(dir.join("events.json"), EVENTS).unwrap();
        let text = dump_events(&dir.join("catalog.json"), &dir.join("events.json")).unwrap();
        assert!(text.contains("Event 100 (rest 0):"));
        assert!(text.contains("  0: EnableCharacter (7)"));
        assert!(text.contains("  0: EndEvent ()"));
        fs::remove_dir_all(&dir).ok();
    }
}
