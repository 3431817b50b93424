/*!
 * End-to-end engine runs against scripted clients
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use transkit::app_config::Config;
use transkit::project::ItemStatus;
use transkit::providers::mock::MockClient;
use transkit::store::ProgressStore;
use transkit::translation::events::ChunkOutcome;
use transkit::translation::rate_limit::{RateGovernor, RateLimits};
use transkit::translation::{EventHub, PipelineContext, PipelineEngine, PipelineEvent, PipelineObserver};

use crate::common;
use crate::common::mock_providers::{self, Step};

fn engine(store: &Arc<ProgressStore>, config: Config, client: MockClient) -> PipelineEngine {
    let context = PipelineContext::from_config(config, Arc::new(client));
    PipelineEngine::from_context(Arc::clone(store), context)
}

fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Sentence number {}", i)).collect()
}

fn store_of(sources: &[String]) -> Arc<ProgressStore> {
    let sources: Vec<&str> = sources.iter().map(String::as_str).collect();
    common::store_with(&sources)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<PipelineEvent>>,
}

impl PipelineObserver for Recorder {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().push(event.clone());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_withTranslatingClient_shouldTranslateAllFiles() {
    common::init_logging();
    let project = common::project_with(&[
        ("menu.txt", &["Hello", "Hello\nWorld", "---"]),
        ("dialog.txt", &["World", "  Hello  ", "World again"]),
    ]);
    let store = Arc::new(ProgressStore::new(project).unwrap());
    let client = mock_providers::translating(|block| block.replace("Hello", "Bonjour").replace("World", "Monde"));

    let report = engine(&store, common::test_config(), client).run().await;

    assert!(report.is_complete());
    assert_eq!(report.completed, 5);
    assert_eq!(report.excluded, 1);
    assert_eq!(report.errored_and_retried, 0);
    assert_eq!(store.item("menu.txt", 1).unwrap().final_text(), "Bonjour\nMonde");
    assert_eq!(store.item("dialog.txt", 1).unwrap().final_text(), "  Bonjour  ");
    assert_eq!(store.item("dialog.txt", 2).unwrap().final_text(), "Monde again");
    assert_eq!(store.status("menu.txt", 2).unwrap(), ItemStatus::Excluded);

    let stats = store.statistics();
    assert_eq!(stats.total_requests, report.requests);
    assert_eq!(stats.line, 5);
    assert!(stats.start_time_ms.is_some());
}

#[tokio::test]
async fn test_run_withFailingClient_shouldRetryEachChunkUpToRoundLimit() {
    let store = store_of(&numbered(4));
    let mut config = common::test_config();
    config.pipeline.shrink_on_retry = false;
    let client = MockClient::failing();

    let report = engine(&store, config, client.clone()).run().await;

    // two chunks of two, three rounds each
    assert_eq!(client.request_count(), 6);
    assert_eq!(report.rounds_run, 3);
    assert_eq!(report.failed_requests, 6);
    assert_eq!(report.completed, 0);
    assert_eq!(report.still_pending, 4);
    assert_eq!(report.errored_and_retried, 4);
    assert!(!report.is_complete());
    assert_eq!(store.count_items(ItemStatus::Untranslated), 4);
    assert_eq!(store.statistics().error_requests, 6);
}

#[tokio::test]
async fn test_run_withUndecodableAnswers_shouldLeaveItemsUntouched() {
    for client in [MockClient::malformed(), MockClient::truncated(), MockClient::empty()] {
        let store = store_of(&numbered(3));
        let before = store.file_items("a.txt").unwrap();

        let report = engine(&store, common::test_config(), client).run().await;

        assert_eq!(report.completed, 0);
        assert_eq!(report.still_pending, 3);
        assert_eq!(store.file_items("a.txt").unwrap(), before);
    }
}

#[tokio::test]
async fn test_run_withMergedLinesInAnswer_shouldDiscardChunkAndRetry() {
    let store = common::store_with(&["Good\nmorning"]);
    let client = mock_providers::scripted(vec![Step::Reply(
        "<textarea>\n1.[\n\"1.1.,Bonjour\"\n]\n</textarea>".to_string(),
    )]);

    let report = engine(&store, common::test_config(), client.clone()).run().await;

    assert_eq!(client.request_count(), 2);
    assert_eq!(report.rounds_run, 2);
    assert_eq!(report.errored_and_retried, 1);
    assert_eq!(store.item("a.txt", 0).unwrap().final_text(), "Good\nmorning");
    assert_eq!(store.status("a.txt", 0).unwrap(), ItemStatus::Translated);
}

#[tokio::test]
async fn test_run_withIntermittentClient_shouldRecoverInLaterRounds() {
    let store = store_of(&numbered(6));
    // first round: three chunks, the third request is skipped
    let client = MockClient::intermittent(3);

    let report = engine(&store, common::test_config(), client.clone()).run().await;

    assert!(report.is_complete());
    assert_eq!(report.completed, 6);
    assert_eq!(report.rounds_run, 2);
    assert_eq!(report.failed_requests, 1);
    assert_eq!(report.errored_and_retried, 2);
    // the retried pair went out one item per request
    assert_eq!(client.request_count(), 5);
}

#[tokio::test]
async fn test_run_withTruncatedTranslation_shouldRequeueItem() {
    let source = "This is a long line of dialogue that goes on and on well past one hundred characters in total length.";
    let store = common::store_with(&[source]);
    let client = mock_providers::scripted(vec![Step::Reply("<textarea>\n1.Short.\n</textarea>".to_string())]);

    let report = engine(&store, common::test_config(), client).run().await;

    assert_eq!(report.rounds_run, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.errored_and_retried, 1);
    assert_eq!(store.item("a.txt", 0).unwrap().final_text(), source);
}

#[tokio::test]
async fn test_run_withContextLines_shouldSendPrecedingSources() {
    let store = common::store_with(&["Alpha", "Beta", "Gamma"]);
    let mut config = common::test_config();
    config.pipeline.worker_count = Some(1);
    let client = MockClient::echo();

    engine(&store, config, client.clone()).run().await;

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1].last().unwrap().content;
    assert!(second.contains("Alpha"));
    assert!(second.contains("Beta"));
    assert!(second.contains("1.Gamma"));
}

#[tokio::test(start_paused = true)]
async fn test_run_whenStoppedMidJob_shouldFinishInFlightRequestsOnly() {
    let store = store_of(&numbered(10));
    let mut config = common::test_config();
    config.pipeline.lines_limit = 1;
    let client = MockClient::slow(200);
    let engine = engine(&store, config, client.clone());
    let stop = engine.stop_handle();

    let job = tokio::spawn(async move { engine.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.stop();
    let report = job.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(client.request_count(), 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.still_pending, 8);
    assert_eq!(report.rounds_run, 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_withRateLimit_shouldSpreadRequestsOverWindows() {
    let store = store_of(&numbered(6));
    let mut config = common::test_config();
    config.pipeline.lines_limit = 1;
    config.pipeline.worker_count = Some(4);
    let governor = RateGovernor::new(RateLimits::per_minute(Some(2), None), Duration::from_secs(10));
    let context = PipelineContext::from_config(config, Arc::new(MockClient::echo())).with_governor(governor);

    let report = PipelineEngine::from_context(Arc::clone(&store), context).run().await;

    assert_eq!(report.completed, 6);
    assert!(report.duration >= Duration::from_secs(20), "{:?}", report.duration);
    assert!(report.duration < Duration::from_secs(30), "{:?}", report.duration);
}

#[tokio::test]
async fn test_run_withObserver_shouldEmitJobRoundAndChunkEvents() {
    let store = store_of(&numbered(4));
    let recorder = Arc::new(Recorder::default());
    let events = EventHub::new();
    events.subscribe(recorder.clone());
    let context = PipelineContext::from_config(common::test_config(), Arc::new(MockClient::intermittent(2)))
        .with_events(events);

    let report = PipelineEngine::from_context(Arc::clone(&store), context).run().await;

    let events = recorder.events.lock();
    assert!(matches!(events.first(), Some(PipelineEvent::JobStarted { pending: 4, .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::JobCompleted { report: r }) if *r == report));

    let rounds = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::RoundStarted { .. }))
        .count();
    assert_eq!(rounds as u32, report.rounds_run);

    let chunk_outcomes: Vec<ChunkOutcome> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ChunkCompleted { outcome, .. } => Some(*outcome),
            _ => None,
        })
        .collect();
    assert_eq!(chunk_outcomes.len() as u64, report.requests);
    let retried = chunk_outcomes.iter().filter(|o| **o == ChunkOutcome::Retryable).count();
    assert_eq!(retried as u64, report.failed_requests);
}

#[tokio::test]
async fn test_run_withMarkerTextInSource_shouldTranslateWholeChunk() {
    let store = common::store_with(&["a </textarea> b", "innocent one", "innocent two"]);
    let mut config = common::test_config();
    config.pipeline.lines_limit = 15;
    let client = MockClient::echo();

    let report = engine(&store, config, client.clone()).run().await;

    assert!(report.is_complete());
    assert_eq!(report.completed, 3);
    assert_eq!(report.errored_and_retried, 0);
    assert_eq!(client.request_count(), 1);
    assert_eq!(store.item("a.txt", 0).unwrap().final_text(), "a </textarea> b");
    assert_eq!(store.status("a.txt", 1).unwrap(), ItemStatus::Translated);
}

#[tokio::test]
async fn test_run_resumedAfterPartialRun_shouldKeepLineCountsWithinTotal() {
    let store = store_of(&numbered(4));
    let mut config = common::test_config();
    config.pipeline.lines_limit = 1;
    config.pipeline.round_limit = 1;

    engine(&store, config.clone(), MockClient::intermittent(2)).run().await;
    let stats = store.statistics();
    assert_eq!((stats.line, stats.total_line), (2, 4));

    let report = engine(&store, config, MockClient::echo()).run().await;

    assert!(report.is_complete());
    let stats = store.statistics();
    assert!(stats.line <= stats.total_line, "{} > {}", stats.line, stats.total_line);
    assert_eq!((stats.line, stats.total_line), (4, 4));
}

#[tokio::test]
async fn test_run_withExcludedItems_shouldLeaveThemOutOfTotal() {
    let store = common::store_with(&["Hello", "---", "World"]);

    engine(&store, common::test_config(), MockClient::echo()).run().await;

    let stats = store.statistics();
    assert_eq!((stats.line, stats.total_line), (2, 2));
}

/// Records each chunk outcome with the untranslated count seen right after it
struct OutcomeRecorder {
    store: Arc<ProgressStore>,
    seen: Mutex<Vec<(u32, ChunkOutcome, usize)>>,
}

impl PipelineObserver for OutcomeRecorder {
    fn on_event(&self, event: &PipelineEvent) {
        if let PipelineEvent::ChunkCompleted { round, outcome, .. } = event {
            let untranslated = self.store.count_items(ItemStatus::Untranslated);
            self.seen.lock().push((*round, *outcome, untranslated));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_whenRequestTimesOut_shouldRetryInNextRound() {
    let store = store_of(&numbered(2));
    let mut config = common::test_config();
    config.pipeline.request_timeout_secs = Some(1);
    config.pipeline.shrink_on_retry = false;
    let recorder = Arc::new(OutcomeRecorder {
        store: Arc::clone(&store),
        seen: Mutex::new(Vec::new()),
    });
    let events = EventHub::new();
    events.subscribe(recorder.clone());
    let client = MockClient::stalling(1, 5_000);
    let context = PipelineContext::from_config(config, Arc::new(client.clone())).with_events(events);

    let report = PipelineEngine::from_context(Arc::clone(&store), context).run().await;

    let seen = recorder.seen.lock().clone();
    // the timed-out chunk changed nothing
    assert_eq!(seen[0], (1, ChunkOutcome::Retryable, 2));
    assert_eq!(seen[1], (2, ChunkOutcome::Succeeded, 0));
    assert_eq!(client.request_count(), 2);
    assert_eq!(report.rounds_run, 2);
    assert_eq!(report.failed_requests, 1);
    assert_eq!(report.errored_and_retried, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(store.statistics().error_requests, 1);
    assert!(report.duration < Duration::from_secs(5), "{:?}", report.duration);
}
