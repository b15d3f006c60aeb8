//! End-to-end scenarios for the stream orchestrator, driven against a
//! scripted inference backend.

use futures_util::future::{BoxFuture, FutureExt};

use inkstream_engine::{Callbacks, StreamOrchestrator};
use inkstream_providers::scripted::{ScriptedEvent, ScriptedInference};
use inkstream_types::settings::Settings;
use inkstream_types::Backtrack;

#[derive(Default)]
struct Recorder {
    texts: Vec<String>,
    backtracks: Vec<(Backtrack, String)>,
    error: Option<String>,
    done: Option<String>,
}

impl Callbacks for Recorder {
    fn on_text(&mut self, text: String) -> BoxFuture<'_, ()> {
        self.texts.push(text);
        futures_util::future::ready(()).boxed()
    }

    fn on_backtrack(&mut self, event: Backtrack, rewound_text: String) -> BoxFuture<'_, ()> {
        self.backtracks.push((event, rewound_text));
        futures_util::future::ready(()).boxed()
    }

    fn on_error(&mut self, message: String) -> BoxFuture<'_, ()> {
        self.error = Some(message);
        futures_util::future::ready(()).boxed()
    }

    fn on_done(&mut self, final_text: String) -> BoxFuture<'_, ()> {
        self.done = Some(final_text);
        futures_util::future::ready(()).boxed()
    }
}

/// Settings with signal gating disabled, so every checkpoint admits
/// regardless of how much text preceded it -- isolates the scenarios below
/// to backtrack/checkpoint bookkeeping rather than admission policy.
fn ungated_settings() -> Settings {
    serde_json::from_value(serde_json::json!({ "min_tokens_between_signals": 0 })).unwrap()
}

fn settings_with_max_backtracks(n: u32) -> Settings {
    serde_json::from_value(serde_json::json!({
        "min_tokens_between_signals": 0,
        "max_backtracks": n,
    }))
    .unwrap()
}

#[tokio::test]
async fn no_signal_run() {
    let inference = ScriptedInference::single_attempt(["Hello", " world"]);
    let mut orchestrator = StreamOrchestrator::new(inference, ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    assert_eq!(rec.texts, vec!["Hello", " world"]);
    assert_eq!(rec.done.as_deref(), Some("Hello world"));
    assert!(rec.error.is_none());
    assert_eq!(orchestrator.conversation().len(), 2);
}

#[tokio::test]
async fn rewind_to_empty_prefix() {
    let inference = ScriptedInference::new(vec![
        vec![
            ScriptedEvent::Text("<<checkpoint:intro>>".into()),
            ScriptedEvent::Text("Wrong start".into()),
            ScriptedEvent::Text("<<backtrack:intro|bad framing>>".into()),
        ],
        vec![ScriptedEvent::Text("Good start".into())],
    ]);
    let mut orchestrator = StreamOrchestrator::new(inference, ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    assert_eq!(rec.backtracks.len(), 1);
    assert_eq!(rec.backtracks[0].1, "");
    assert_eq!(rec.done.as_deref(), Some("Good start"));
}

#[tokio::test]
async fn preserves_pre_checkpoint_text() {
    let inference = ScriptedInference::new(vec![
        vec![
            ScriptedEvent::Text("Preamble. ".into()),
            ScriptedEvent::Text("<<checkpoint:mid>>".into()),
            ScriptedEvent::Text("Bad".into()),
            ScriptedEvent::Text("<<backtrack:mid|wrong>>".into()),
        ],
        vec![ScriptedEvent::Text("Better".into())],
    ]);
    let mut orchestrator = StreamOrchestrator::new(inference, ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    assert_eq!(rec.backtracks[0].1, "Preamble. ");
    assert_eq!(rec.done.as_deref(), Some("Preamble. Better"));
}

#[tokio::test]
async fn false_positive_avoidance() {
    let inference = ScriptedInference::single_attempt([r#"std::cout << "hello""#]);
    let mut orchestrator = StreamOrchestrator::new(inference, ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    assert!(rec.backtracks.is_empty());
    assert_eq!(rec.done.as_deref(), Some(r#"std::cout << "hello""#));
}

#[tokio::test]
async fn budget_exhaustion_caps_backtracks() {
    let inference = ScriptedInference::new(vec![
        vec![
            ScriptedEvent::Text("<<checkpoint:a>>".into()),
            ScriptedEvent::Text("x".into()),
            ScriptedEvent::Text("<<backtrack:a|r1>>".into()),
        ],
        vec![
            ScriptedEvent::Text("<<checkpoint:b>>".into()),
            ScriptedEvent::Text("y".into()),
            ScriptedEvent::Text("<<backtrack:b|r2>>".into()),
        ],
        vec![
            ScriptedEvent::Text("<<checkpoint:c>>".into()),
            ScriptedEvent::Text("z".into()),
            ScriptedEvent::Text("<<backtrack:c|r3>>".into()),
            ScriptedEvent::Text(" done".into()),
        ],
    ]);
    let mut orchestrator = StreamOrchestrator::new(inference, settings_with_max_backtracks(2));
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    assert_eq!(rec.backtracks.len(), 2);
    let final_text = rec.done.expect("run should complete");
    assert!(final_text.contains("[backtrack budget exhausted]"));
}

#[tokio::test]
async fn stale_checkpoint_pruned_after_backtrack() {
    let inference = ScriptedInference::new(vec![
        vec![
            ScriptedEvent::Text("<<checkpoint:a>>".into()),
            ScriptedEvent::Text("X".into()),
            ScriptedEvent::Text("<<checkpoint:b>>".into()),
            ScriptedEvent::Text("Y".into()),
            ScriptedEvent::Text("<<backtrack:a|because>>".into()),
        ],
        vec![
            ScriptedEvent::Text("<<backtrack:b|later>>".into()),
            ScriptedEvent::Text("Z".into()),
        ],
    ]);
    let mut orchestrator = StreamOrchestrator::new(inference, ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    // Only the backtrack to `a` executes; `b` was pruned and its backtrack
    // is dropped silently, so the stream completes normally from there.
    // `a` was admitted before "X" was emitted, so its snapshot is empty and
    // the rewind discards "X" along with "Y".
    assert_eq!(rec.backtracks.len(), 1);
    assert_eq!(rec.backtracks[0].0.checkpoint_id.as_str(), "a");
    assert_eq!(rec.backtracks[0].1, "");
    assert_eq!(rec.done.as_deref(), Some("Z"));
}

#[tokio::test]
async fn hints_reset_between_runs() {
    let shared = std::sync::Arc::new(ScriptedInference::new(vec![
        vec![
            ScriptedEvent::Text("<<checkpoint:a>>".into()),
            ScriptedEvent::Text("<<backtrack:a|too academic>>".into()),
        ],
        vec![ScriptedEvent::Text("first run done".into())],
        vec![ScriptedEvent::Text("second run done".into())],
    ]));
    let mut orchestrator = StreamOrchestrator::new(ArcInference(shared.clone()), ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("first", &mut rec).await;
    orchestrator.run("second", &mut rec).await;

    let systems = shared.recorded_systems();
    // attempts: [0]=first run's first try, [1]=first run's retry after
    // backtrack, [2]=second run's only try.
    assert!(systems[1].contains("## Constraints for This Attempt"));
    assert!(!systems[2].contains("## Constraints for This Attempt"));
}

#[tokio::test]
async fn upstream_error_reports_and_does_not_commit_turn() {
    let inference = ScriptedInference::new(vec![vec![ScriptedEvent::Text("partial".into())
        , ScriptedEvent::Error("upstream overloaded".into())]]);
    let mut orchestrator = StreamOrchestrator::new(inference, ungated_settings());
    let mut rec = Recorder::default();

    orchestrator.run("hi", &mut rec).await;

    assert!(rec.done.is_none());
    assert!(rec.error.as_deref().unwrap().contains("upstream overloaded"));
    // The tentative user turn is rolled back: nothing was ever committed.
    assert!(orchestrator.conversation().is_empty());
}

/// Thin `Inference` forwarder over a shared handle, so a test can both drive
/// an orchestrator and inspect the backend afterward.
struct ArcInference(std::sync::Arc<ScriptedInference>);

impl inkstream_providers::Inference for ArcInference {
    fn stream(
        &self,
        messages: Vec<inkstream_types::Turn>,
        system: String,
        mode: &str,
        temperature: Option<f64>,
    ) -> inkstream_providers::InferenceStream {
        self.0.stream(messages, system, mode, temperature)
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}
