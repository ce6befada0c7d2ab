//! CLI adapter - interactive line-based chat session.
//!
//! Reads one user message per line and runs it as one orchestrator turn.
//! `exit`, `quit`, end of input or Ctrl+C at the prompt end the session;
//! Ctrl+C while a turn is running aborts only that turn.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::agent::{
    LlmClient, Orchestrator, SessionState, ToolCallRequest, ToolCallResult, TurnObserver,
    TurnOutcome,
};
use crate::error::Error;
use crate::ui;
use crate::Result;

/// Prints tool activity as a turn runs.
pub struct ConsoleObserver;

impl TurnObserver for ConsoleObserver {
    fn on_tool_call(&self, call: &ToolCallRequest) {
        ui::print_tool_call(&call.name, &call.arguments);
    }

    fn on_tool_result(&self, result: &ToolCallResult) {
        if let Err(e) = &result.outcome {
            ui::print_warning(&e.to_string());
        }
    }
}

/// Returns true for the words that end a session.
pub fn is_exit_command(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// CLI channel for interactive sessions.
pub struct CliChannel<C: LlmClient> {
    orchestrator: Orchestrator<C>,
}

impl<C: LlmClient> CliChannel<C> {
    /// Create a new CLI channel.
    pub fn new(orchestrator: Orchestrator<C>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator<C> {
        &self.orchestrator
    }

    /// Run the interactive loop on stdin.
    pub async fn run_interactive(&mut self) -> Result<()> {
        self.run(BufReader::new(tokio::io::stdin())).await
    }

    /// Run the loop over any line source, then shut the session down.
    ///
    /// The session is shut down on every exit path, including read errors.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        let result = self.read_loop(input).await;

        let closed = self.orchestrator.shutdown().await;
        tracing::debug!("Session ended, {} connection(s) closed", closed);
        println!("Goodbye! 👋");
        result
    }

    async fn read_loop<R: AsyncBufRead + Unpin>(&mut self, mut input: R) -> Result<()> {
        let mut buf = Vec::new();

        loop {
            ui::print_prompt()?;

            buf.clear();
            let read = tokio::select! {
                read = input.read_until(b'\n', &mut buf) => read?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    0
                }
            };

            // EOF
            if read == 0 {
                return Ok(());
            }

            let Ok(line) = std::str::from_utf8(&buf) else {
                ui::print_warning("Ignoring input that is not valid UTF-8");
                continue;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if is_exit_command(line) {
                return Ok(());
            }

            let outcome = self.orchestrator.run_turn_until(line, interrupted()).await;
            report(outcome);
        }
    }

    /// Current lifecycle state of the underlying session
    pub fn state(&self) -> SessionState {
        self.orchestrator.state()
    }
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn report(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Reply(text) => ui::print_reply(&text),
        TurnOutcome::Cancelled { .. } => ui::print_warning("Turn cancelled"),
        TurnOutcome::Failed { error, .. } => match error {
            Error::Gateway(message) => ui::print_error(&format!("Model request failed: {message}")),
            other => ui::print_error(&other.to_string()),
        },
    }
}
