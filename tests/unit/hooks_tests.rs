/*!
 * Tests for extension hooks running inside the engine
 */

use std::sync::Arc;

use transkit::app_config::HooksConfig;
use transkit::project::ItemStatus;
use transkit::providers::mock::MockClient;
use transkit::translation::hooks::{HookContext, TruncationCheck, WorkUnit};
use transkit::translation::{ExtensionHook, HookPhase, HookRegistry, PipelineContext, PipelineEngine};

use crate::common;

/// Hook running `action` on every active unit
struct FnHook {
    name: &'static str,
    priority: i32,
    enabled: bool,
    phase: [HookPhase; 1],
    action: fn(&mut WorkUnit),
}

impl FnHook {
    fn new(name: &'static str, phase: HookPhase, action: fn(&mut WorkUnit)) -> Self {
        Self {
            name,
            priority: 0,
            enabled: true,
            phase: [phase],
            action,
        }
    }
}

impl ExtensionHook for FnHook {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn phases(&self) -> &[HookPhase] {
        &self.phase
    }

    fn run(&self, _phase: HookPhase, ctx: &mut HookContext<'_>) {
        for unit in ctx.units.iter_mut().filter(|u| u.is_active()) {
            (self.action)(unit);
        }
    }
}

fn engine_with(store: Arc<transkit::ProgressStore>, client: MockClient, hooks: HookRegistry) -> PipelineEngine {
    let context = PipelineContext::from_config(common::test_config(), Arc::new(client)).with_hooks(hooks);
    PipelineEngine::from_context(store, context)
}

#[tokio::test]
async fn test_preProcessHook_shouldChangeTextSentToProvider() {
    let store = common::store_with(&["Hello", "World"]);
    let client = MockClient::echo();
    let mut hooks = HookRegistry::new();
    hooks.register(Arc::new(FnHook::new("tag", HookPhase::PreProcess, |unit| {
        unit.request_text = format!("[x]{}", unit.request_text);
    })));

    engine_with(Arc::clone(&store), client.clone(), hooks).run().await;

    let sent = &client.requests()[0];
    assert!(sent.iter().any(|m| m.content.contains("1.[x]Hello")));
    assert_eq!(store.item("a.txt", 0).unwrap().final_text(), "[x]Hello");
    // the stored source is untouched
    assert_eq!(store.item("a.txt", 0).unwrap().source_text(), "Hello");
}

#[tokio::test]
async fn test_postProcessHook_shouldRewriteStoredTranslation() {
    let store = common::store_with(&["Hello", "World"]);
    let mut hooks = HookRegistry::new();
    hooks.register(Arc::new(FnHook::new("shout", HookPhase::PostProcess, |unit| {
        unit.translation = unit.translation.as_ref().map(|t| t.to_uppercase());
    })));

    let report = engine_with(Arc::clone(&store), MockClient::echo(), hooks).run().await;

    assert_eq!(report.completed, 2);
    assert_eq!(store.item("a.txt", 1).unwrap().final_text(), "WORLD");
    assert_eq!(store.status("a.txt", 1).unwrap(), ItemStatus::Translated);
}

#[tokio::test]
async fn test_preFilterHook_shouldExcludeItemsWithoutSendingThem() {
    let store = common::store_with(&["keep", "skip me", "keep too"]);
    let client = MockClient::echo();
    let mut hooks = HookRegistry::new();
    hooks.register(Arc::new(FnHook::new("skipper", HookPhase::PreFilter, |unit| {
        if unit.source_text.starts_with("skip") {
            unit.exclude();
        }
    })));

    let report = engine_with(Arc::clone(&store), client.clone(), hooks).run().await;

    assert_eq!(report.excluded, 1);
    assert_eq!(store.status("a.txt", 1).unwrap(), ItemStatus::Excluded);
    assert!(
        client
            .requests()
            .iter()
            .flatten()
            .all(|m| !m.content.contains(".skip me"))
    );
}

#[tokio::test]
async fn test_disabledHook_shouldNeverRun() {
    let store = common::store_with(&["Hello"]);
    let mut hooks = HookRegistry::new();
    let mut hook = FnHook::new("breaker", HookPhase::PostProcess, |unit| {
        unit.translation = Some("broken".to_string());
    });
    hook.enabled = false;
    hooks.register(Arc::new(hook));

    engine_with(Arc::clone(&store), MockClient::echo(), hooks).run().await;

    assert_eq!(store.item("a.txt", 0).unwrap().final_text(), "Hello");
}

#[tokio::test]
async fn test_hooks_shouldRunByPriorityAroundBuiltins() {
    let store = common::store_with(&["  Hello  "]);
    let mut hooks = HookRegistry::with_builtins(&HooksConfig::default());
    let mut first = FnHook::new("first", HookPhase::PostProcess, |unit| {
        unit.translation = Some("Bonjour".to_string());
    });
    first.priority = 80;
    hooks.register(Arc::new(first));

    assert_eq!(
        hooks.names_for(HookPhase::PostProcess),
        ["first", "whitespace_preserver", "truncation_check"]
    );

    engine_with(Arc::clone(&store), MockClient::echo(), hooks).run().await;

    // the custom hook ran before whitespace was restored
    let item = store.item("a.txt", 0).unwrap();
    assert_eq!(item.final_text(), "  Bonjour  ");
    assert_eq!(item.metadata["leading_whitespace"], "  ");
}

#[test]
fn test_withBuiltins_shouldHonorSwitches() {
    let config = HooksConfig {
        blank_line_filter: false,
        whitespace_preserver: true,
        truncation_check: false,
    };
    let hooks = HookRegistry::with_builtins(&config);

    assert_eq!(hooks.len(), 3);
    assert!(hooks.names_for(HookPhase::PreFilter).is_empty());
    assert_eq!(hooks.names_for(HookPhase::PostProcess), ["whitespace_preserver"]);
}

#[test]
fn test_truncationCheck_verdict_shouldFlagShortAnswersToLongSources() {
    let check = TruncationCheck::new(true);
    let long_source = "word ".repeat(40);

    assert!(check.verdict(&long_source, "tiny").is_some());
    assert!(check.verdict(&long_source, &"mot ".repeat(30)).is_none());
    assert!(check.verdict("short", "x").is_none());
    assert!(check.verdict("short", "   ").is_some());
}
