//! Orchestrator loop - drives one conversation session.
//!
//! Each user message runs one turn through
//! `Dispatching -> ToolExecution -> Responding` and back to
//! `WaitingForInput`. A turn either completes or is rolled back in full, so
//! the transcript only ever holds finished turns.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, ToolInvocationError};
use crate::tools::{self, connect_all, Diagnostic, ProviderConnection, ToolRegistry};
use crate::Result;

use super::llm::{GatewayRegistry, LlmClient, Reply};
use super::message::{ToolCallRequest, ToolCallResult, Turn};
use super::transcript::Transcript;

/// Where the session is in its turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForInput,
    Dispatching,
    ToolExecution,
    Responding,
    Shutdown,
}

/// How a turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    /// The final assistant message
    Reply(String),
    /// The turn failed and its turns were discarded
    Failed { error: Error, discarded: usize },
    /// The turn was aborted and its turns were discarded
    Cancelled { discarded: usize },
}

/// Hooks for watching a turn as it runs. All methods default to no-ops.
pub trait TurnObserver: Send + Sync {
    fn on_state(&self, _state: SessionState) {}

    /// A tool call is about to be dispatched
    fn on_tool_call(&self, _call: &ToolCallRequest) {}

    fn on_tool_result(&self, _result: &ToolCallResult) {}
}

struct Silent;

impl TurnObserver for Silent {}

/// The orchestrator owns the transcript and the tool registry of one session.
pub struct Orchestrator<C: LlmClient> {
    client: C,
    registry: ToolRegistry,
    connections: Vec<Arc<ProviderConnection>>,
    transcript: Transcript,
    state: SessionState,
    observer: Box<dyn TurnObserver>,
}

impl<C: LlmClient> Orchestrator<C> {
    /// Create an orchestrator over already-connected providers
    pub fn new(client: C, registry: ToolRegistry, connections: Vec<Arc<ProviderConnection>>) -> Self {
        Self {
            client,
            registry,
            connections,
            transcript: Transcript::new(),
            state: SessionState::WaitingForInput,
            observer: Box::new(Silent),
        }
    }

    pub fn with_observer(mut self, observer: impl TurnObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &[Arc<ProviderConnection>] {
        &self.connections
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Run one turn to completion.
    pub async fn run_turn(&mut self, input: &str) -> TurnOutcome {
        self.run_turn_until(input, std::future::pending::<()>()).await
    }

    /// Run one turn, aborting it if `cancel` resolves first.
    ///
    /// An aborted or failed turn leaves the transcript exactly as it was
    /// before the turn began.
    pub async fn run_turn_until<F>(&mut self, input: &str, cancel: F) -> TurnOutcome
    where
        F: Future<Output = ()>,
    {
        if self.state == SessionState::Shutdown {
            return TurnOutcome::Failed {
                error: Error::Transcript("session has shut down".to_string()),
                discarded: 0,
            };
        }

        let checkpoint = self.transcript.checkpoint();

        let result = tokio::select! {
            biased;
            _ = cancel => Err(Error::Cancelled),
            result = self.dispatch(input) => result,
        };

        let outcome = match result {
            Ok(reply) => TurnOutcome::Reply(reply),
            Err(Error::Cancelled) => {
                let discarded = self.transcript.rollback(checkpoint);
                info!("Turn cancelled, discarded {} turn(s)", discarded);
                TurnOutcome::Cancelled { discarded }
            }
            Err(error) => {
                let discarded = self.transcript.rollback(checkpoint);
                warn!("Turn failed in {:?}: {}", self.state, error);
                TurnOutcome::Failed { error, discarded }
            }
        };

        self.enter(SessionState::WaitingForInput);
        outcome
    }

    async fn dispatch(&mut self, input: &str) -> Result<String> {
        self.enter(SessionState::Dispatching);
        self.transcript.append(Turn::user(input))?;

        let tools = self.registry.definitions();
        let response = self.client.send(self.transcript.turns(), &tools).await?;

        let calls = match response.reply {
            Reply::Message(text) => {
                self.transcript.append(Turn::assistant(text.clone()))?;
                return Ok(text);
            }
            Reply::ToolCalls(calls) => calls,
        };

        if let Some(text) = &response.withheld_content {
            debug!("Withholding {} chars of content while tools run", text.len());
        }
        self.transcript.append(Turn::assistant_with_tools(
            response.withheld_content.unwrap_or_default(),
            calls.clone(),
        ))?;

        self.enter(SessionState::ToolExecution);
        for result in self.execute_tools(&calls).await {
            self.transcript.append(Turn::tool_result(&result))?;
        }

        // One follow-up call, without tools, for the user-visible answer.
        self.enter(SessionState::Responding);
        let follow_up = self.client.send(self.transcript.turns(), &[]).await?;
        let answer = match follow_up.reply {
            Reply::Message(text) => text,
            Reply::ToolCalls(calls) => follow_up.withheld_content.ok_or_else(|| {
                Error::Gateway(format!(
                    "model requested {} more tool call(s) after tool results",
                    calls.len()
                ))
            })?,
        };

        self.transcript.append(Turn::assistant(answer.clone()))?;
        Ok(answer)
    }

    /// Run every call concurrently and return the results in request order.
    async fn execute_tools(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        let invocations = calls.iter().map(|call| async move {
            self.observer.on_tool_call(call);

            let result = match self.registry.lookup(&call.name) {
                Some(tool) => match tool.invoke(call.arguments.clone()).await {
                    Ok(output) => ToolCallResult::success(call, output),
                    Err(e) => ToolCallResult::failure(call, e),
                },
                None => ToolCallResult::failure(
                    call,
                    ToolInvocationError::new(&call.name, format!("Unknown tool: {}", call.name)),
                ),
            };

            if let Err(e) = &result.outcome {
                debug!("Tool {} failed: {}", call.name, e);
            }
            self.observer.on_tool_result(&result);
            result
        });

        join_all(invocations).await
    }

    fn enter(&mut self, state: SessionState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
            self.state = state;
            self.observer.on_state(state);
        }
    }

    /// Close every provider connection. Returns how many were closed by
    /// this call; a second shutdown closes nothing.
    pub async fn shutdown(&mut self) -> usize {
        self.enter(SessionState::Shutdown);

        let closed = join_all(self.connections.iter().map(|c| c.close())).await;
        let count = closed.into_iter().filter(|&c| c).count();
        if count > 0 {
            info!("Closed {} provider connection(s)", count);
        }
        count
    }
}

impl Orchestrator<Box<dyn LlmClient>> {
    /// Build a session from configuration: gateway first, then every
    /// provider concurrently, then the registry.
    ///
    /// Unreachable providers are reported as diagnostics. Only
    /// configuration problems are returned as errors.
    pub async fn start(config: &Config) -> Result<(Self, Vec<Diagnostic>)> {
        let client = GatewayRegistry::create(
            &config.model,
            config.system_prompt.clone(),
            config.request_timeout(),
        )?;

        let mut diagnostics = Vec::new();
        let mut providers = Vec::new();
        for provider in &config.providers {
            match tools::create_provider(provider, config.request_timeout()) {
                Ok(p) => providers.push((provider.name.clone(), p)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => diagnostics.push(Diagnostic::new(&provider.name, e.to_string())),
            }
        }

        let startup = connect_all(providers).await;
        diagnostics.extend(startup.diagnostics);

        let (registry, collisions) = match ToolRegistry::build(&startup.connections, config.collision_policy) {
            Ok(built) => built,
            Err(e) => {
                join_all(startup.connections.iter().map(|c| c.close())).await;
                return Err(e);
            }
        };
        diagnostics.extend(collisions);

        info!(
            "Session ready: {} provider(s), {} tool(s), model {}",
            startup.connections.len(),
            registry.len(),
            client.model()
        );
        Ok((Self::new(client, registry, startup.connections), diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::fake::call;
    use crate::agent::llm::{FakeLlmClient, Scripted};
    use crate::agent::message::Role;
    use crate::tools::fake::FakeProvider;
    use crate::tools::CollisionPolicy;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    async fn session(client: FakeLlmClient, providers: Vec<(&str, FakeProvider)>) -> Orchestrator<FakeLlmClient> {
        let providers = providers
            .into_iter()
            .map(|(name, p)| (name.to_string(), Box::new(p) as Box<dyn tools::ToolProvider>))
            .collect();
        let startup = connect_all(providers).await;
        let (registry, _) = ToolRegistry::build(&startup.connections, CollisionPolicy::FirstWins).unwrap();
        Orchestrator::new(client, registry, startup.connections)
    }

    fn items() -> FakeProvider {
        FakeProvider::new()
            .with_tool("get_item", "Item 5: Widget")
            .with_failing_tool("delete_item", "permission denied")
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let client = FakeLlmClient::with_tool_call("get_item", json!({"id": 5}), "Item 5 is a Widget.");
        let requests = client.requests();
        let mut orchestrator = session(client, vec![("p", items())]).await;

        let outcome = orchestrator.run_turn("look up item 5").await;
        assert!(matches!(outcome, TurnOutcome::Reply(ref r) if r == "Item 5 is a Widget."));

        let turns = orchestrator.transcript().turns();
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(turns[2].content, "Item 5: Widget");
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("tc_1"));

        // The follow-up sees the tool result and no tool definitions.
        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].tool_names, ["get_item", "delete_item"]);
        assert!(requests[1].tool_names.is_empty());
        assert_eq!(requests[1].turns.last().unwrap().content, "Item 5: Widget");
        assert_eq!(orchestrator.state(), SessionState::WaitingForInput);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_skipped() {
        let client = FakeLlmClient::new(vec!["hi"]);
        let providers = vec![
            ("down".to_string(), Box::new(FakeProvider::unreachable()) as Box<dyn tools::ToolProvider>),
            ("up".to_string(), Box::new(items()) as Box<dyn tools::ToolProvider>),
        ];
        let startup = connect_all(providers).await;
        assert_eq!(startup.diagnostics.len(), 1);
        assert_eq!(startup.diagnostics[0].source, "down");

        let (registry, _) = ToolRegistry::build(&startup.connections, CollisionPolicy::FirstWins).unwrap();
        let mut orchestrator = Orchestrator::new(client, registry, startup.connections);
        assert_eq!(orchestrator.registry().tool_names(), ["get_item", "delete_item"]);
        assert!(matches!(orchestrator.run_turn("hello").await, TurnOutcome::Reply(_)));
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_content() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Calls(vec![call("c1", "delete_item", json!({"id": 5}))]),
            Scripted::Text("I could not delete it.".into()),
            Scripted::Text("Anything else?".into()),
        ]);
        let mut orchestrator = session(client, vec![("p", items())]).await;

        let outcome = orchestrator.run_turn("delete item 5").await;
        assert!(matches!(outcome, TurnOutcome::Reply(_)));

        let tool_turn = &orchestrator.transcript().turns()[2];
        assert!(tool_turn.is_error);
        assert!(tool_turn.content.contains("permission denied"));

        // Session keeps accepting input
        assert!(matches!(orchestrator.run_turn("thanks").await, TurnOutcome::Reply(_)));
        assert_eq!(orchestrator.transcript().len(), 6);
    }

    #[tokio::test]
    async fn test_plain_reply_skips_tools() {
        let provider = items();
        let calls = provider.calls.clone();
        let mut orchestrator = session(FakeLlmClient::new(vec!["Hello!"]), vec![("p", provider)]).await;

        let outcome = orchestrator.run_turn("hi").await;
        assert!(matches!(outcome, TurnOutcome::Reply(ref r) if r == "Hello!"));
        assert_eq!(orchestrator.transcript().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_call_gets_a_result_in_order() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Calls(vec![
                call("a", "delete_item", json!({})),
                call("b", "no_such_tool", json!({})),
                call("c", "get_item", json!({"id": 5})),
            ]),
            Scripted::Text("done".into()),
        ]);
        let mut orchestrator = session(client, vec![("p", items())]).await;
        orchestrator.run_turn("do three things").await;

        let ids: Vec<_> = orchestrator
            .transcript()
            .turns()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .map(|t| t.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let unknown = &orchestrator.transcript().turns()[3];
        assert!(unknown.is_error);
        assert!(unknown.content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_dispatch_failure_rolls_back() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Text("first".into()),
            Scripted::Fail("service unavailable".into()),
        ]);
        let mut orchestrator = session(client, vec![("p", items())]).await;
        orchestrator.run_turn("one").await;
        let before = orchestrator.transcript().len();

        let outcome = orchestrator.run_turn("two").await;
        assert!(matches!(outcome, TurnOutcome::Failed { discarded: 1, error: Error::Gateway(_) }));
        assert_eq!(orchestrator.transcript().len(), before);
        assert_eq!(orchestrator.state(), SessionState::WaitingForInput);
    }

    #[tokio::test]
    async fn test_responding_failure_rolls_back() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Calls(vec![call("c1", "get_item", json!({"id": 5}))]),
            Scripted::Fail("timeout".into()),
        ]);
        let mut orchestrator = session(client, vec![("p", items())]).await;

        let outcome = orchestrator.run_turn("look up item 5").await;
        assert!(matches!(outcome, TurnOutcome::Failed { discarded: 3, .. }));
        assert!(orchestrator.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_asking_for_more_tools() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Calls(vec![call("c1", "get_item", json!({"id": 5}))]),
            Scripted::TextAndCalls("Item 5 is a Widget.".into(), vec![call("c2", "get_item", json!({"id": 6}))]),
            Scripted::Calls(vec![call("c3", "get_item", json!({"id": 5}))]),
            Scripted::Calls(vec![call("c4", "get_item", json!({"id": 6}))]),
        ]);
        let mut orchestrator = session(client, vec![("p", items())]).await;

        let outcome = orchestrator.run_turn("item 5?").await;
        assert!(matches!(outcome, TurnOutcome::Reply(ref r) if r == "Item 5 is a Widget."));

        let outcome = orchestrator.run_turn("item 5 again?").await;
        assert!(matches!(outcome, TurnOutcome::Failed { error: Error::Gateway(_), .. }));
        assert_eq!(orchestrator.transcript().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_rolls_back() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Calls(vec![call("c1", "get_item", json!({"id": 5}))]),
            Scripted::Hang,
        ]);
        let mut orchestrator = session(client, vec![("p", items())]).await;

        let cancel = tokio::time::sleep(std::time::Duration::from_millis(20));
        let outcome = orchestrator.run_turn_until("look up item 5", cancel).await;
        assert!(matches!(outcome, TurnOutcome::Cancelled { discarded: 3 }));
        assert!(orchestrator.transcript().is_empty());
        assert_eq!(orchestrator.state(), SessionState::WaitingForInput);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_execution() {
        let client = FakeLlmClient::scripted(vec![
            Scripted::Calls(vec![call("c1", "slow_tool", json!({}))]),
            Scripted::Text("Still here.".to_string()),
        ]);
        let provider = FakeProvider::new().with_hanging_tool("slow_tool");
        let calls = provider.calls.clone();
        let mut orchestrator = session(client, vec![("p", provider)]).await;

        let cancel = tokio::time::sleep(std::time::Duration::from_millis(20));
        let outcome = orchestrator.run_turn_until("run the slow tool", cancel).await;

        // User turn and the assistant's request; no tool result was written.
        assert!(matches!(outcome, TurnOutcome::Cancelled { discarded: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.transcript().is_empty());
        assert_eq!(orchestrator.state(), SessionState::WaitingForInput);

        let outcome = orchestrator.run_turn("hello").await;
        assert!(matches!(outcome, TurnOutcome::Reply(ref r) if r == "Still here."));
        assert_eq!(orchestrator.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (a, b) = (items(), FakeProvider::new().with_tool("hello", "Hello, world!"));
        let (da, db) = (a.disconnects.clone(), b.disconnects.clone());
        let mut orchestrator = session(FakeLlmClient::new(vec![]), vec![("a", a), ("b", b)]).await;

        assert_eq!(orchestrator.shutdown().await, 2);
        assert_eq!(orchestrator.shutdown().await, 0);
        assert_eq!(da.load(Ordering::SeqCst), 1);
        assert_eq!(db.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.state(), SessionState::Shutdown);
        assert!(matches!(orchestrator.run_turn("hi").await, TurnOutcome::Failed { .. }));
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TurnObserver for Arc<Recorder> {
        fn on_state(&self, state: SessionState) {
            self.0.lock().unwrap().push(format!("{state:?}"));
        }

        fn on_tool_call(&self, call: &ToolCallRequest) {
            self.0.lock().unwrap().push(format!("call {}", call.name));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_phases() {
        let recorder = Arc::new(Recorder::default());
        let client = FakeLlmClient::with_tool_call("get_item", json!({"id": 5}), "ok");
        let mut orchestrator = session(client, vec![("p", items())]).await.with_observer(recorder.clone());

        orchestrator.run_turn("look up item 5").await;
        assert_eq!(
            *recorder.0.lock().unwrap(),
            ["Dispatching", "ToolExecution", "call get_item", "Responding", "WaitingForInput"]
        );
    }

    #[tokio::test]
    async fn test_start_from_builtin_config() {
        std::env::set_var("SWITCHBOARD_TEST_START_KEY", "sk-test");
        let config = crate::config::parse(
            r#"{
                "providers": [
                    {"name": "parts", "transport": "builtin", "server": "spare-parts"},
                    {"name": "demo", "transport": "builtin", "server": "sample-demo"},
                    {"name": "gone", "transport": "stdio", "command": "/nonexistent/switchboard-test-server"}
                ],
                "model": {"provider": "openai", "model": "gpt-4o", "api_key_env": "SWITCHBOARD_TEST_START_KEY"}
            }"#,
        )
        .unwrap();

        let (mut orchestrator, diagnostics) = Orchestrator::start(&config).await.unwrap();
        assert_eq!(orchestrator.connections().len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].source, "gone");
        assert!(orchestrator.registry().has("order_part"));
        assert!(orchestrator.registry().has("hello"));
        assert_eq!(orchestrator.shutdown().await, 2);
    }
}
