//! End-to-end tests for the code-agent job.
//!
//! Every test runs the real pipeline against a mock sandbox, scripted models
//! and an in-memory message store.

use frag_agent::{ModelResponse, OutputMessage, ScriptedModel};
use frag_core::{
    FileJournal, FragConfig, FragError, MemoryJournal, MessageKind, NewMessage, SandboxId,
    StepJournal, ERROR_MESSAGE,
};
use frag_orchestrator::{
    submit_prompt, AgentModels, CodeAgentJob, JobRunner, MemoryStore, MessageStore, CODE_AGENT,
    RESPONSE_AGENT, TITLE_AGENT,
};
use frag_sandbox::MockSandbox;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    sandbox: MockSandbox,
    store: Arc<MemoryStore>,
    code: ScriptedModel,
    title: ScriptedModel,
    response: ScriptedModel,
}

impl Harness {
    fn new(code: ScriptedModel) -> Self {
        Self {
            sandbox: MockSandbox::new(),
            store: Arc::new(MemoryStore::new()),
            code,
            title: ScriptedModel::new().otherwise(ModelResponse::text("Counter Page")),
            response: ScriptedModel::new().otherwise(ModelResponse::text("I built a counter page.")),
        }
    }

    fn with_title(mut self, title: ScriptedModel) -> Self {
        self.title = title;
        self
    }

    fn job(&self, config: FragConfig) -> CodeAgentJob {
        CodeAgentJob::new(
            config,
            Arc::new(self.sandbox.clone()),
            self.store.clone(),
            AgentModels {
                code: Arc::new(self.code.clone()),
                title: Arc::new(self.title.clone()),
                response: Arc::new(self.response.clone()),
            },
        )
    }

    fn runner(&self) -> JobRunner {
        JobRunner::new(self.job(FragConfig::default())).with_retry_delay(Duration::ZERO)
    }

    async fn outcomes(&self, project_id: &str) -> Vec<frag_core::StoredMessage> {
        self.store
            .messages(project_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.role == frag_core::Role::Assistant)
            .collect()
    }
}

/// One turn that writes index.html and finishes
fn finishing_turn() -> ModelResponse {
    ModelResponse::new(vec![
        OutputMessage::tool_call(
            "call-1",
            "createOrUpdateFiles",
            r#"{"files":[{"path":"index.html","content":"<h1>Counter</h1>"}]}"#,
        ),
        OutputMessage::assistant_text("<task_summary>Built a counter page</task_summary>"),
    ])
}

#[tokio::test]
async fn test_summary_on_first_turn_saves_fragment() {
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn()));
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();

    let result = harness.runner().run(&event).await.unwrap();

    assert_eq!(result.status, "ok");
    assert_eq!(result.title, "Counter Page");
    assert_eq!(result.sandbox_url, "https://3000-mock-1.mock.dev");
    assert_eq!(result.files.get("index.html").unwrap(), "<h1>Counter</h1>");
    assert!(result.summary.contains("<task_summary>"));
    assert_eq!(harness.code.calls(), 1);

    let outcomes = harness.outcomes("p1").await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, MessageKind::Result);
    assert_eq!(outcomes[0].content, "I built a counter page.");
    let fragment = outcomes[0].fragment.as_ref().unwrap();
    assert_eq!(fragment.title, "Counter Page");
    assert_eq!(fragment.files.len(), 1);

    let sandbox_id = SandboxId::new("mock-1");
    assert_eq!(harness.sandbox.files(&sandbox_id).len(), 1);
    assert_eq!(
        harness.sandbox.timeout(&sandbox_id),
        Some(Duration::from_secs(FragConfig::default().sandbox.idle_timeout_secs))
    );
}

#[tokio::test]
async fn test_history_without_marker_ends_in_error_message() {
    let harness =
        Harness::new(ScriptedModel::new().otherwise(ModelResponse::text("I am still thinking")));
    harness
        .store
        .create_message(NewMessage::user_prompt("p1", "make a landing page"))
        .await
        .unwrap();
    let event = submit_prompt(harness.store.as_ref(), "now add a footer", "p1")
        .await
        .unwrap();

    let result = harness.runner().run(&event).await.unwrap();

    assert_eq!(harness.code.calls(), 15);
    assert!(result.files.is_empty());
    assert!(result.summary.is_empty());

    let outcomes = harness.outcomes("p1").await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, MessageKind::Error);
    assert_eq!(outcomes[0].content, ERROR_MESSAGE);
    assert!(outcomes[0].fragment.is_none());

    // stored history (which already holds the submitted prompt), then the prompt
    let first = &harness.code.requests()[0];
    assert_eq!(first.messages.len(), 3);
    assert_eq!(
        first.messages[0],
        frag_agent::ChatMessage::user("make a landing page")
    );
}

#[tokio::test]
async fn test_invocations_bounded_by_max_iter() {
    let harness = Harness::new(ScriptedModel::new().otherwise(ModelResponse::text("working")));
    let mut config = FragConfig::default();
    config.network.max_iter = 3;
    let runner = JobRunner::new(harness.job(config)).with_retry_delay(Duration::ZERO);
    let event = submit_prompt(harness.store.as_ref(), "build it", "p1").await.unwrap();

    runner.run(&event).await.unwrap();

    assert_eq!(harness.code.calls(), 3);
    assert_eq!(harness.outcomes("p1").await.len(), 1);
}

#[tokio::test]
async fn test_retry_replays_completed_steps_and_saves_once() {
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn()))
        .with_title(
            ScriptedModel::new()
                .then_fail("overloaded")
                .otherwise(ModelResponse::text("Counter Page")),
        );
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();

    let result = harness.runner().run(&event).await.unwrap();

    assert_eq!(result.title, "Counter Page");
    // the second attempt replayed sandbox creation, the code agent and its tool call
    assert_eq!(harness.sandbox.created_count(), 1);
    assert_eq!(harness.sandbox.write_count(), 1);
    assert_eq!(harness.code.calls(), 1);
    assert_eq!(harness.title.calls(), 2);
    assert_eq!(harness.outcomes("p1").await.len(), 1);
}

#[tokio::test]
async fn test_rerun_of_finished_job_is_a_replay() {
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn()));
    let runner = harness.runner();
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();
    let journal = Arc::new(MemoryJournal::new());

    let first = runner
        .run_with_journal("job-1", &event, journal.clone())
        .await
        .unwrap();
    let second = runner.run_with_journal("job-1", &event, journal.clone()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.code.calls(), 1);
    assert_eq!(harness.response.calls(), 1);
    assert_eq!(harness.outcomes("p1").await.len(), 1);
    for key in [
        "get-sandbox-id",
        "get-previous-messages",
        CODE_AGENT,
        "createOrUpdateFiles",
        TITLE_AGENT,
        RESPONSE_AGENT,
        "get-sandbox-url",
        "save-result",
    ] {
        assert!(journal.contains(key), "missing step {}", key);
    }
}

#[tokio::test]
async fn test_lost_sandbox_is_never_replaced() {
    let harness = Harness::new(ScriptedModel::new().otherwise(finishing_turn()));
    harness.sandbox.expire(&SandboxId::new("mock-1"));
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();

    let result = harness.runner().run(&event).await;

    assert!(matches!(result, Err(FragError::SessionUnavailable(_))));
    assert_eq!(harness.sandbox.created_count(), 1);
    // every attempt re-resolved the same memoized sandbox id
    assert_eq!(harness.sandbox.resolve_count(), 3);
    // the code agent step was recorded on the first attempt and replayed
    assert_eq!(harness.code.calls(), 1);
    assert!(harness.outcomes("p1").await.is_empty());
}

#[tokio::test]
async fn test_first_request_holds_last_five_messages_then_prompt() {
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn()));
    for i in 1..=7 {
        harness
            .store
            .create_message(NewMessage::user_prompt("p1", format!("message {}", i)))
            .await
            .unwrap();
    }
    let event = submit_prompt(harness.store.as_ref(), "message 8", "p1")
        .await
        .unwrap();

    harness.runner().run(&event).await.unwrap();

    let first = &harness.code.requests()[0];
    // the five newest stored messages, oldest first, then the prompt itself
    let expected: Vec<frag_agent::ChatMessage> = [4, 5, 6, 7, 8, 8]
        .into_iter()
        .map(|i| frag_agent::ChatMessage::user(format!("message {}", i)))
        .collect();
    assert_eq!(first.messages, expected);
}

#[tokio::test]
async fn test_attempts_exhausted_returns_last_error() {
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn())).with_title(
        ScriptedModel::new()
            .then_fail("down")
            .then_fail("down")
            .then_fail("down"),
    );
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();

    let result = harness.runner().with_max_attempts(3).run(&event).await;

    assert!(matches!(result, Err(FragError::Model(_))));
    assert_eq!(harness.title.calls(), 3);
    assert!(harness.outcomes("p1").await.is_empty());
}

#[tokio::test]
async fn test_invalid_event_is_not_retried() {
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn()));
    let mut event = frag_core::JobEvent::code_agent_run("build", "p1").unwrap();
    event.data.value.clear();

    let result = harness.runner().run(&event).await;

    assert!(matches!(result, Err(FragError::Validation(_))));
    assert_eq!(harness.sandbox.created_count(), 0);
    assert_eq!(harness.code.calls(), 0);
}

#[tokio::test]
async fn test_file_journal_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn())).with_title(
        ScriptedModel::new()
            .then_fail("crash")
            .otherwise(ModelResponse::text("Counter Page")),
    );
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();

    // first process gives up after one attempt
    let journal: Arc<dyn StepJournal> = Arc::new(FileJournal::for_job(dir.path(), "job-7"));
    let failed = harness
        .runner()
        .with_max_attempts(1)
        .run_with_journal("job-7", &event, journal)
        .await;
    assert!(failed.is_err());

    // a new process picks the job up from disk
    let journal: Arc<dyn StepJournal> = Arc::new(FileJournal::for_job(dir.path(), "job-7"));
    let result = harness
        .runner()
        .run_with_journal("job-7", &event, journal)
        .await
        .unwrap();

    assert_eq!(result.title, "Counter Page");
    assert_eq!(harness.sandbox.created_count(), 1);
    assert_eq!(harness.code.calls(), 1);
    assert_eq!(harness.outcomes("p1").await.len(), 1);
}

#[tokio::test]
async fn test_activity_log_written_per_job() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(ScriptedModel::new().then(finishing_turn()));
    let job = harness
        .job(FragConfig::default())
        .with_activity_root(dir.path());
    let event = submit_prompt(harness.store.as_ref(), "build a counter", "p1")
        .await
        .unwrap();

    JobRunner::new(job)
        .run_with_journal("job-3", &event, Arc::new(MemoryJournal::new()))
        .await
        .unwrap();

    let log = std::fs::read_to_string(dir.path().join("job-3").join("activity.md")).unwrap();
    assert!(log.contains("p1"));
}
