/*!
 * Tests for the progress store under concurrency and across saves
 */

use rand::Rng;
use serde_json::json;
use std::sync::Arc;

use transkit::project::ItemStatus;
use transkit::store::{ItemFilter, ProgressStore, SCHEMA_VERSION};

use crate::common;

#[derive(Debug, Clone)]
enum Op {
    Translate(String),
    Polish(String),
    Metadata(String, i64),
    Requeue,
    Exclude,
}

fn random_op(rng: &mut impl Rng, step: usize) -> Op {
    match rng.random_range(0..10) {
        0..=3 => Op::Translate(format!("t{}", step)),
        4 => Op::Polish(format!("p{}", step)),
        5..=7 => Op::Metadata(format!("k{}", rng.random_range(0..3)), step as i64),
        8 => Op::Requeue,
        _ => Op::Exclude,
    }
}

fn apply(store: &ProgressStore, path: &str, index: u64, op: &Op) {
    // illegal transitions fail identically in both runs, so results are ignored
    let _ = match op {
        Op::Translate(text) => store.set_translated(path, index, text.clone(), Some("m")),
        Op::Polish(text) => store.set_polished(path, index, text.clone(), None),
        Op::Metadata(key, value) => store.set_metadata(path, index, key.clone(), json!(value)),
        Op::Requeue => store.requeue(path, index),
        Op::Exclude => store.set_status(path, index, ItemStatus::Excluded),
    };
}

type Plan = Vec<(String, u64, Vec<Op>)>;

#[test]
fn test_concurrentDisjointWrites_shouldMatchSequentialApplication() {
    let mut rng = rand::rng();
    let sources: Vec<String> = (0..40).map(|i| format!("line {}", i)).collect();
    let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
    let project = common::project_with(&[("a.txt", &sources), ("b.txt", &sources)]);

    for _ in 0..5 {
        let workers = rng.random_range(2..8);
        let mut plans: Vec<Plan> = vec![Vec::new(); workers];
        for path in ["a.txt", "b.txt"] {
            for index in 0..sources.len() as u64 {
                let ops = (0..rng.random_range(1..6)).map(|step| random_op(&mut rng, step)).collect();
                plans[index as usize % workers].push((path.to_string(), index, ops));
            }
        }

        let concurrent = Arc::new(ProgressStore::new(project.clone()).unwrap());
        std::thread::scope(|scope| {
            for plan in &plans {
                let store = Arc::clone(&concurrent);
                scope.spawn(move || {
                    for (path, index, ops) in plan {
                        for op in ops {
                            apply(&store, path, *index, op);
                        }
                    }
                });
            }
        });

        let sequential = ProgressStore::new(project.clone()).unwrap();
        for plan in &plans {
            for (path, index, ops) in plan {
                for op in ops {
                    apply(&sequential, path, *index, op);
                }
            }
        }

        assert_eq!(concurrent.snapshot().files, sequential.snapshot().files);
    }
}

#[test]
fn test_save_twiceWithoutMutation_shouldWriteIdenticalBytes() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("progress.json");
    let store = common::store_with(&["Hello", "World"]);
    store.set_translated("a.txt", 0, "Bonjour", Some("m")).unwrap();

    store.save(&path).unwrap();
    let first = std::fs::read(&path).unwrap();
    store.save(&path).unwrap();
    let second = std::fs::read(&path).unwrap();
    assert_eq!(first, second);

    store.set_translated("a.txt", 1, "Monde", Some("m")).unwrap();
    store.save(&path).unwrap();
    assert_ne!(std::fs::read(&path).unwrap(), second);
}

#[test]
fn test_save_shouldClearDirtyFlagAndReloadEqual() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("progress.json");
    let store = common::store_with(&["one", "two\nlines", "  padded  "]);
    store.set_metadata("a.txt", 2, "leading_whitespace", json!("  ")).unwrap();
    assert!(store.is_dirty());

    store.save(&path).unwrap();
    assert!(!store.is_dirty());

    let loaded = ProgressStore::load(&path).unwrap();
    assert_eq!(loaded.snapshot(), store.snapshot());
}

#[test]
fn test_save_whileWorkersMutate_shouldAlwaysLeaveReadableSnapshot() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("progress.json");
    let sources: Vec<String> = (0..200).map(|i| format!("item {}", i)).collect();
    let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
    let store = Arc::new(ProgressStore::new(common::project_with(&[("a.txt", &sources)])).unwrap());

    std::thread::scope(|scope| {
        let writer = Arc::clone(&store);
        scope.spawn(move || {
            for index in 0..200 {
                writer.set_translated("a.txt", index, format!("done {}", index), None).unwrap();
            }
        });
        for _ in 0..20 {
            store.save(&path).unwrap();
            let reloaded = ProgressStore::load(&path).unwrap();
            assert_eq!(reloaded.file_items("a.txt").unwrap().len(), 200);
        }
    });

    store.save(&path).unwrap();
    let reloaded = ProgressStore::load(&path).unwrap();
    assert_eq!(reloaded.count_items(ItemStatus::Translated), 200);
}

#[test]
fn test_load_withLegacySnapshot_shouldUpgradeAndSaveCurrentSchema() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("legacy.json");
    let legacy = json!({
        "project_id": "p1",
        "project_type": "Mtool",
        "project_name": "old",
        "files": {
            "data.json": {"file_project_type": "Mtool", "items": [
                {"row_index": 0, "source_text": "hi", "translation_status": 0},
                {"row_index": 1, "source_text": "yo", "translated_text": "salut", "translation_status": 1}
            ]}
        }
    });
    std::fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

    let store = ProgressStore::load(&path).unwrap();
    assert_eq!(store.count_items(ItemStatus::Untranslated), 1);
    assert_eq!(store.item("data.json", 1).unwrap().final_text(), "salut");

    store.save(&path).unwrap();
    let saved: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(saved["schema_version"], SCHEMA_VERSION);
}

#[test]
fn test_load_withMissingFile_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    assert!(ProgressStore::load(&dir.path().join("absent.json")).is_err());
}

#[test]
fn test_iterItems_withStatusFilter_shouldSkipProcessedItems() {
    let store = common::store_with(&["a", "b", "c"]);
    store.set_translated("a.txt", 1, "B", None).unwrap();

    let pending: Vec<u64> = store
        .iter_items(ItemFilter::with_status(ItemStatus::Untranslated))
        .map(|entry| entry.item.index)
        .collect();
    assert_eq!(pending, vec![0, 2]);
}
