/*!
 * Controller runs against snapshots on disk
 */

use serde_json::json;
use std::sync::Arc;

use transkit::app_config::TranslationProvider;
use transkit::app_controller::Controller;
use transkit::project::ItemStatus;
use transkit::providers::mock::MockClient;
use transkit::store::{ProgressStore, SCHEMA_VERSION};
use transkit::translation::StopHandle;

use crate::common;
use crate::common::mock_providers;

#[tokio::test]
async fn test_runWithClient_shouldPersistTranslationsAndStatistics() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let project = common::project_with(&[("a.txt", &["Hello", "World", "Hello World"])]);
    let path = common::write_snapshot(dir.path(), project).unwrap();
    let controller = Controller::with_config(common::test_config()).unwrap();
    let client = mock_providers::translating(|block| block.replace("Hello", "Hallo").replace("World", "Welt"));

    let report = controller
        .run_with_client(&path, Arc::new(client), StopHandle::new(), false)
        .await
        .unwrap();
    assert!(report.is_complete());

    let reloaded = ProgressStore::load(&path).unwrap();
    assert_eq!(reloaded.item("a.txt", 2).unwrap().final_text(), "Hallo Welt");
    assert_eq!(reloaded.count_items(ItemStatus::Translated), 3);
    let stats = reloaded.statistics();
    assert_eq!(stats.total_requests, report.requests);
    assert_eq!(stats.line, 3);
    assert!(stats.total_tokens() > 0);
}

#[tokio::test]
async fn test_runWithClient_twice_shouldOnlySendPendingItems() {
    let dir = common::create_temp_dir().unwrap();
    let project = common::project_with(&[("a.txt", &["one", "two", "three", "four"])]);
    let path = common::write_snapshot(dir.path(), project).unwrap();
    let mut config = common::test_config();
    config.pipeline.round_limit = 1;
    config.pipeline.shrink_on_retry = false;
    let controller = Controller::with_config(config).unwrap();

    // the first chunk fails, the second lands
    let first = mock_providers::scripted(vec![mock_providers::Step::Skip]);
    let mut config_one = controller.config().clone();
    config_one.pipeline.worker_count = Some(1);
    let report = Controller::with_config(config_one)
        .unwrap()
        .run_with_client(&path, Arc::new(first), StopHandle::new(), false)
        .await
        .unwrap();
    assert_eq!(report.still_pending, 2);

    let second = MockClient::echo();
    let report = controller
        .run_with_client(&path, Arc::new(second.clone()), StopHandle::new(), false)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(second.request_count(), 1);
    assert_eq!(Controller::status(&path).unwrap().get(ItemStatus::Translated), 4);
}

#[tokio::test]
async fn test_runWithClient_withInvalidConfig_shouldFailBeforeAnyRequest() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::write_snapshot(dir.path(), common::project_with(&[("a.txt", &["Hello"])])).unwrap();
    let mut config = common::test_config();
    config.translation.provider = TranslationProvider::Anthropic;
    let client = MockClient::echo();

    let result = Controller::with_config(config)
        .unwrap()
        .run_with_client(&path, Arc::new(client.clone()), StopHandle::new(), false)
        .await;

    assert!(result.is_err());
    assert_eq!(client.request_count(), 0);
}

#[test]
fn test_runWithClient_withMissingSnapshot_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let controller = Controller::with_config(common::test_config()).unwrap();

    let result = tokio_test::block_on(async {
        controller
            .run_with_client(&dir.path().join("nope.json"), Arc::new(MockClient::echo()), StopHandle::new(), false)
            .await
    });

    assert!(result.is_err());
}

#[tokio::test]
async fn test_runWithClient_withLegacySnapshot_shouldUpgradeOnSave() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("cache.json");
    let legacy = json!({
        "project_id": "legacy",
        "project_type": "Mtool",
        "project_name": "old game",
        "stats_data": {"total_requests": 7, "line": 1, "total_line": 3},
        "files": {
            "data.json": {"file_project_type": "Mtool", "items": [
                {"text_index": 0, "source_text": "Hello", "translated_text": "Bonjour", "translation_status": 1},
                {"text_index": 1, "source_text": "World", "translation_status": 0},
                {"text_index": 2, "source_text": "12345", "translation_status": 0}
            ]}
        }
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&legacy).unwrap()).unwrap();
    let controller = Controller::with_config(common::test_config()).unwrap();

    let report = controller
        .run_with_client(&path, Arc::new(MockClient::echo()), StopHandle::new(), false)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.excluded, 1);

    let saved: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(saved["schema_version"], SCHEMA_VERSION);

    let reloaded = ProgressStore::load(&path).unwrap();
    assert_eq!(reloaded.id(), "legacy");
    assert_eq!(reloaded.item("data.json", 0).unwrap().final_text(), "Bonjour");
    assert_eq!(reloaded.status("data.json", 2).unwrap(), ItemStatus::Excluded);
    // earlier counters carry over
    assert_eq!(reloaded.statistics().total_requests, 7 + report.requests);
}

#[test]
fn test_status_shouldCountItemsPerStatus() {
    let dir = common::create_temp_dir().unwrap();
    let store = common::store_with(&["a", "b", "c"]);
    store.set_translated("a.txt", 0, "A", None).unwrap();
    store.set_status("a.txt", 2, ItemStatus::Excluded).unwrap();
    let path = dir.path().join("progress.json");
    store.save(&path).unwrap();

    let counts = Controller::status(&path).unwrap();

    assert_eq!(counts.total(), 3);
    assert_eq!(counts.get(ItemStatus::Untranslated), 1);
    assert_eq!(counts.get(ItemStatus::Translated), 1);
    assert_eq!(counts.get(ItemStatus::Excluded), 1);
}
