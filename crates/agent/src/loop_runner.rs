//! The function-call loop.

use std::sync::Arc;
use std::time::Duration;

use memloop_config::AppConfig;
use memloop_core::cancel::CancelSignal;
use memloop_core::error::{AgentError, Result, ToolError};
use memloop_core::message::{FunctionCall, Message, Role};
use memloop_core::provider::{Provider, ProviderRequest};
use memloop_core::token::definitions_tokens;
use memloop_core::tool::{Tool, ToolContext, ToolRegistry, ToolResult};
use memloop_core::variable;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent_context::AgentContext;
use crate::context::{LogType, TokenLimits};
use crate::functions::FINISH;
use crate::variables::render;

/// Appended after a reply that called no function.
const DECIDE_NUDGE: &str =
    "No function was called. Decide on your next step and call a function to take it.";

/// Replaces a reply identical to the previous two.
const REPEAT_NUDGE: &str = "You have sent the same reply three times in a row. \
     Stop repeating it and call a function to make progress.";

/// Marks a result the function itself rejected, as opposed to a failure.
pub const REJECTED_PREFIX: &str = "Rejected: ";

/// Decides whether calling the named function ends the task.
pub type DonePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Loop settings.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Results at least this many characters long are stored as variables.
    pub save_threshold_chars: usize,
    pub max_iterations: u32,
    /// Wall-clock budget after which a function is asked to stop.
    pub function_timeout: Duration,
    /// Store every result as a variable regardless of size.
    pub force_store_results: bool,
    pub window_tokens: usize,
    pub reserved_for_response: usize,
    pub persistent_share: f32,
    /// Working messages that make up the retrieval query.
    pub recent_context_messages: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            max_tokens: None,
            save_threshold_chars: 1250,
            max_iterations: 25,
            function_timeout: Duration::from_secs(60),
            force_store_results: false,
            window_tokens: 8192,
            reserved_for_response: 1024,
            persistent_share: 0.3,
            recent_context_messages: 3,
        }
    }
}

impl LoopConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: Some(config.provider.max_tokens),
            save_threshold_chars: config.agent.save_threshold_chars,
            max_iterations: config.agent.max_iterations,
            function_timeout: Duration::from_secs(config.agent.function_timeout_secs),
            force_store_results: config.agent.force_store_results,
            window_tokens: config.context.window_tokens,
            reserved_for_response: config.context.reserved_for_response,
            persistent_share: config.context.persistent_share,
            ..Self::default()
        }
    }
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Continue,
    /// The termination predicate matched `function`; `output` is its last
    /// raw output.
    Finished { function: String, output: Value },
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutput {
    pub function: String,
    pub output: Value,
    pub iterations: u32,
}

/// Drives an [`AgentContext`] through completion requests and function
/// executions until the termination predicate matches.
pub struct FunctionLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: LoopConfig,
    is_done: DonePredicate,
}

impl FunctionLoop {
    /// Create a loop that finishes when `finish` is called.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            is_done: Box::new(|name| name == FINISH),
        }
    }

    /// Replace the termination predicate.
    pub fn with_done_predicate(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_done = Box::new(predicate);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Step until the predicate matches. State is saved after every step,
    /// including failed ones, so a retried run resumes.
    pub async fn run(&self, ctx: &mut AgentContext) -> Result<TurnOutput> {
        info!(
            context = ctx.id(),
            functions = self.tools.len(),
            max_iterations = self.config.max_iterations,
            "Running function loop"
        );

        for iteration in 1..=self.config.max_iterations {
            debug!(context = ctx.id(), iteration, "Function loop iteration");
            let outcome = self.step(ctx).await;
            ctx.save_state().await?;

            if let StepOutcome::Finished { function, output } = outcome? {
                info!(context = ctx.id(), function = %function, iterations = iteration, "Task finished");
                return Ok(TurnOutput {
                    function,
                    output,
                    iterations: iteration,
                });
            }
        }

        warn!(
            context = ctx.id(),
            iterations = self.config.max_iterations,
            "Iteration limit reached"
        );
        Err(AgentError::IterationLimit(self.config.max_iterations).into())
    }

    /// One completion request and whatever it asks for.
    pub async fn step(&self, ctx: &mut AgentContext) -> Result<StepOutcome> {
        let functions = self.tools.definitions();
        if functions.is_empty() {
            return Err(AgentError::NoFunctionCatalog.into());
        }

        let limits = TokenLimits::fit(
            self.config.window_tokens,
            self.config.reserved_for_response,
            definitions_tokens(ctx.tokenizer(), &functions),
            self.config.persistent_share,
        );
        let chat = ctx
            .compact(&limits, self.config.recent_context_messages)
            .await?;

        let request = ProviderRequest {
            model: self.config.model.clone(),
            messages: chat.messages(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            functions,
        };
        debug!(
            messages = request.messages.len(),
            persistent_limit = limits.persistent,
            temporary_limit = limits.temporary,
            "Requesting completion"
        );

        let response = self.provider.complete(request).await?;
        let message = response.message;

        match message.function_call.clone() {
            None => {
                self.handle_reply(ctx, message);
                Ok(StepOutcome::Continue)
            }
            Some(call) => {
                ctx.append(LogType::Temporary, message);
                self.handle_call(ctx, call).await
            }
        }
    }

    fn handle_reply(&self, ctx: &mut AgentContext, message: Message) {
        let previous: Vec<&Message> = ctx
            .manager()
            .messages(LogType::Temporary)
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .take(2)
            .collect();
        let repeated = previous.len() == 2 && previous.iter().all(|m| m.content == message.content);

        if repeated {
            warn!(context = ctx.id(), "Reply repeated, nudging");
            ctx.append(LogType::Temporary, Message::system(REPEAT_NUDGE));
        } else {
            ctx.append(LogType::Temporary, message);
            ctx.append(LogType::Temporary, Message::system(DECIDE_NUDGE));
        }
    }

    async fn handle_call(&self, ctx: &mut AgentContext, call: FunctionCall) -> Result<StepOutcome> {
        let name = call.name.trim();
        if name.is_empty() {
            recoverable(ctx, "The function call did not name a function.".into());
            return Ok(StepOutcome::Continue);
        }

        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments) => arguments,
                Err(e) => {
                    recoverable(ctx, format!("The arguments for {name} are not valid JSON: {e}"));
                    return Ok(StepOutcome::Continue);
                }
            }
        };

        let Some(tool) = self.tools.get(name) else {
            recoverable(
                ctx,
                format!(
                    "There is no function named '{name}'. Available functions: {}.",
                    self.tools.names().join(", ")
                ),
            );
            return Ok(StepOutcome::Continue);
        };

        let arguments = match ctx.variables().substitute(arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                recoverable(ctx, format!("Could not call {name}: {e}"));
                return Ok(StepOutcome::Continue);
            }
        };

        debug!(function = name, "Executing function");
        let result = match self.execute(tool, name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(function = name, error = %e, "Function failed");
                let error = self.externalize(ctx, name, Value::String(e.to_string()), false);
                recoverable(ctx, format!("Function {name} failed: {error}"));
                return Ok(StepOutcome::Continue);
            }
        };

        if !result.success {
            debug!(function = name, "Function rejected its input");
            for output in result.outputs {
                let content = self.externalize(ctx, name, output, self.config.force_store_results);
                ctx.append(
                    LogType::Temporary,
                    Message::function_result(name, format!("{REJECTED_PREFIX}{content}")),
                );
            }
            return Ok(StepOutcome::Continue);
        }

        let output = self.log_outputs(ctx, name, result);
        if (self.is_done)(name) {
            return Ok(StepOutcome::Finished {
                function: name.to_string(),
                output,
            });
        }
        Ok(StepOutcome::Continue)
    }

    /// Run a function under the wall-clock budget. Past the deadline the
    /// function is notified and still awaited.
    async fn execute(
        &self,
        tool: &dyn Tool,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let (handle, signal) = CancelSignal::pair();
        let tool_ctx = ToolContext::new(name, signal);

        let call = tool.execute(arguments, &tool_ctx);
        tokio::pin!(call);
        let deadline = tokio::time::sleep(self.config.function_timeout);
        tokio::pin!(deadline);

        tokio::select! {
            result = &mut call => return result,
            () = &mut deadline => {
                warn!(
                    function = name,
                    timeout_secs = self.config.function_timeout.as_secs(),
                    "Function over time, requesting cancellation"
                );
                handle.cancel();
            }
        }
        call.await
    }

    /// Append each output to the working log, storing oversized ones as
    /// variables. Returns the last raw output.
    fn log_outputs(&self, ctx: &mut AgentContext, name: &str, result: ToolResult) -> Value {
        if result.outputs.is_empty() {
            ctx.append(LogType::Temporary, Message::function_result(name, ""));
            return Value::Null;
        }

        let mut last = Value::Null;
        for output in result.outputs {
            let content = self.externalize(ctx, name, output.clone(), self.config.force_store_results);
            ctx.append(LogType::Temporary, Message::function_result(name, content));
            last = output;
        }
        last
    }

    /// The text to log for `output`: its rendering, or the placeholder of a
    /// new variable holding it when it reaches the save threshold.
    fn externalize(&self, ctx: &mut AgentContext, name: &str, output: Value, force: bool) -> String {
        let text = render(&output);
        let chars = text.chars().count();
        if !force && chars < self.config.save_threshold_chars {
            return text;
        }
        let stored = ctx.variables_mut().store(name, output);
        debug!(function = name, variable = %stored, chars, "Output stored as variable");
        variable::placeholder(&stored)
    }
}

/// Log an in-band error the model can recover from.
fn recoverable(ctx: &mut AgentContext, text: String) {
    debug!(context = ctx.id(), error = %text, "Recoverable function call error");
    ctx.append(LogType::Temporary, Message::system(text));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FinishTool;
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use memloop_core::error::Error;
    use memloop_core::storage::Storage;
    use serde_json::json;

    /// Returns the `text` argument.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {}}})
        }
        async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            match arguments.get("text") {
                Some(text) => Ok(ToolResult::ok(text.clone())),
                None => Ok(ToolResult::rejected("nothing to echo")),
            }
        }
    }

    /// Returns a 5,000 character page.
    struct FetchTool;

    #[async_trait]
    impl Tool for FetchTool {
        fn name(&self) -> &str {
            "fetch"
        }
        fn description(&self) -> &str {
            "Fetch a page"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("p".repeat(5000)))
        }
    }

    /// Always fails.
    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    /// Rejects with a long explanation.
    struct PickyTool;

    #[async_trait]
    impl Tool for PickyTool {
        fn name(&self) -> &str {
            "picky"
        }
        fn description(&self) -> &str {
            "Rejects everything at length"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::rejected("r".repeat(100_000)))
        }
    }

    /// Fails with a long error.
    struct VerboseFailureTool;

    #[async_trait]
    impl Tool for VerboseFailureTool {
        fn name(&self) -> &str {
            "verbose"
        }
        fn description(&self) -> &str {
            "Fails with a stack dump"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "verbose".into(),
                reason: "frame\n".repeat(2_000),
            })
        }
    }

    /// Waits for cancellation, then reports it.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Runs until cancelled"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, ctx: &ToolContext) -> std::result::Result<ToolResult, ToolError> {
            let mut cancel = ctx.cancel.clone();
            cancel.cancelled().await;
            Ok(ToolResult::ok("stopped early"))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool)).unwrap();
        tools.register(Box::new(FetchTool)).unwrap();
        tools.register(Box::new(BrokenTool)).unwrap();
        tools.register(Box::new(SlowTool)).unwrap();
        tools.register(Box::new(PickyTool)).unwrap();
        tools.register(Box::new(VerboseFailureTool)).unwrap();
        tools.register(Box::new(FinishTool)).unwrap();
        Arc::new(tools)
    }

    fn function_loop(responses: Vec<memloop_core::provider::ProviderResponse>) -> (Arc<SequentialMockProvider>, FunctionLoop) {
        let provider = Arc::new(SequentialMockProvider::new(responses));
        let agent = FunctionLoop::new(provider.clone(), registry(), LoopConfig::default());
        (provider, agent)
    }

    fn working(ctx: &AgentContext) -> Vec<Message> {
        ctx.manager().messages(LogType::Temporary).to_vec()
    }

    #[tokio::test]
    async fn plain_reply_is_logged_with_a_nudge() {
        let (_, agent) = function_loop(vec![make_text_response("Let me think.")]);
        let mut ctx = test_context().await;
        ctx.push_goal("Say hi");

        assert_eq!(agent.step(&mut ctx).await.unwrap(), StepOutcome::Continue);
        let log = working(&ctx);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "Let me think.");
        assert_eq!(log[1].role, Role::System);
        assert_eq!(log[1].content, DECIDE_NUDGE);
    }

    #[tokio::test]
    async fn third_identical_reply_is_replaced_by_correction() {
        let (_, agent) = function_loop(vec![
            make_text_response("same"),
            make_text_response("same"),
            make_text_response("same"),
        ]);
        let mut ctx = test_context().await;
        ctx.push_goal("Do something");
        for _ in 0..3 {
            agent.step(&mut ctx).await.unwrap();
        }

        let log = working(&ctx);
        let replies = log.iter().filter(|m| m.role == Role::Assistant).count();
        assert_eq!(replies, 2);
        assert_eq!(log.last().unwrap().content, REPEAT_NUDGE);
    }

    #[tokio::test]
    async fn small_result_is_logged_inline() {
        let (provider, agent) = function_loop(vec![make_function_call_response("echo", json!({"text": "hi"}))]);
        let mut ctx = test_context().await;
        ctx.push_goal("Echo hi");

        agent.step(&mut ctx).await.unwrap();
        let log = working(&ctx);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].function_call.as_ref().unwrap().name, "echo");
        assert_eq!(log[1].role, Role::Function);
        assert_eq!(log[1].name.as_deref(), Some("echo"));
        assert_eq!(log[1].content, "hi");
        assert!(ctx.variables().is_empty());

        let request = &provider.requests()[0];
        assert_eq!(request.functions.len(), 7);
        assert_eq!(request.messages[0].content, "Echo hi");
    }

    #[tokio::test]
    async fn large_result_is_stored_as_variable() {
        let (_, agent) = function_loop(vec![make_function_call_response("fetch", json!({}))]);
        let mut ctx = test_context().await;
        ctx.push_goal("Fetch the page");

        agent.step(&mut ctx).await.unwrap();
        let log = working(&ctx);
        assert_eq!(log[1].content, "${fetch_1}");
        assert_eq!(ctx.variables().get("fetch_1"), Some(&json!("p".repeat(5000))));
    }

    #[tokio::test]
    async fn forced_storage_externalizes_small_results() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_function_call_response(
            "echo",
            json!({"text": "tiny"}),
        )]));
        let config = LoopConfig {
            force_store_results: true,
            ..LoopConfig::default()
        };
        let agent = FunctionLoop::new(provider, registry(), config);
        let mut ctx = test_context().await;
        ctx.push_goal("Echo");

        agent.step(&mut ctx).await.unwrap();
        assert_eq!(working(&ctx)[1].content, "${echo_1}");
        assert_eq!(ctx.variables().get("echo_1"), Some(&json!("tiny")));
    }

    #[tokio::test]
    async fn placeholders_in_arguments_are_substituted() {
        let (_, agent) = function_loop(vec![make_function_call_response("echo", json!({"text": "${note_1}"}))]);
        let mut ctx = test_context().await;
        ctx.push_goal("Echo the note");
        ctx.variables_mut().store("note", json!("remembered"));

        agent.step(&mut ctx).await.unwrap();
        assert_eq!(working(&ctx)[1].content, "remembered");
    }

    #[tokio::test]
    async fn argument_problems_are_distinct_recoverable_messages() {
        let (_, agent) = function_loop(vec![
            make_raw_call_response("", "{}"),
            make_raw_call_response("echo", "{not json"),
            make_function_call_response("teleport", json!({})),
            make_function_call_response("echo", json!({"text": "${missing_1}"})),
        ]);
        let mut ctx = test_context().await;
        ctx.push_goal("Try things");
        for _ in 0..4 {
            assert_eq!(agent.step(&mut ctx).await.unwrap(), StepOutcome::Continue);
        }

        let notes: Vec<String> = working(&ctx)
            .into_iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content)
            .collect();
        assert_eq!(notes.len(), 4);
        assert!(notes[0].contains("did not name a function"));
        assert!(notes[1].contains("not valid JSON"));
        assert!(notes[2].contains("no function named 'teleport'"));
        assert!(notes[2].contains("echo"));
        assert!(notes[3].contains("missing_1"));
    }

    #[tokio::test]
    async fn failure_and_rejection_are_told_apart() {
        let (_, agent) = function_loop(vec![
            make_function_call_response("broken", json!({})),
            make_function_call_response("echo", json!({})),
        ]);
        let mut ctx = test_context().await;
        ctx.push_goal("Break things");
        agent.step(&mut ctx).await.unwrap();
        agent.step(&mut ctx).await.unwrap();

        let log = working(&ctx);
        assert_eq!(log[1].role, Role::System);
        assert!(log[1].content.contains("Function broken failed"));
        assert!(log[1].content.contains("disk on fire"));
        assert_eq!(log[3].role, Role::Function);
        assert_eq!(log[3].content, "Rejected: nothing to echo");
    }

    #[tokio::test]
    async fn large_rejection_is_stored_as_variable() {
        let (_, agent) = function_loop(vec![make_function_call_response("picky", json!({}))]);
        let mut ctx = test_context().await;
        ctx.push_goal("Ask the picky function");

        agent.step(&mut ctx).await.unwrap();
        let log = working(&ctx);
        assert_eq!(log[1].role, Role::Function);
        assert_eq!(log[1].content, "Rejected: ${picky_1}");
        assert_eq!(ctx.variables().get("picky_1"), Some(&json!("r".repeat(100_000))));
    }

    #[tokio::test]
    async fn large_failure_is_stored_as_variable() {
        let (_, agent) = function_loop(vec![make_function_call_response("verbose", json!({}))]);
        let mut ctx = test_context().await;
        ctx.push_goal("Call the verbose function");

        agent.step(&mut ctx).await.unwrap();
        let log = working(&ctx);
        assert_eq!(log[1].role, Role::System);
        assert_eq!(log[1].content, "Function verbose failed: ${verbose_1}");
        let stored = ctx.variables().get("verbose_1").and_then(Value::as_str).unwrap();
        assert!(stored.contains("frame\nframe"));
    }

    #[tokio::test]
    async fn oversized_outputs_keep_the_log_bounded() {
        let big_arguments = json!({"text": "a".repeat(40_000)});
        let (_, agent) = function_loop(vec![
            make_function_call_response("picky", json!({})),
            make_function_call_response("verbose", json!({})),
            make_function_call_response("echo", big_arguments),
            make_function_call_response("finish", json!({"answer": "done"})),
        ]);
        let mut ctx = test_context().await;
        ctx.push_goal("Survive large outputs");

        let output = agent.run(&mut ctx).await.unwrap();
        assert_eq!(output.iterations, 4);

        let log = working(&ctx);
        let results: Vec<&Message> = log
            .iter()
            .filter(|m| m.function_call.is_none())
            .collect();
        assert!(results.iter().all(|m| m.content.chars().count() < 1250));
        assert_eq!(ctx.variables().get("echo_1"), Some(&json!("a".repeat(40_000))));
        ctx.catch_up().await.unwrap();
        assert_eq!(ctx.manager().pending(LogType::Temporary), 0);
        assert!(
            ctx.manager()
                .chunks(LogType::Temporary)
                .iter()
                .all(|c| c.token_count < 8191)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_notifies_without_preempting() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_function_call_response("slow", json!({}))]));
        let config = LoopConfig {
            function_timeout: Duration::from_secs(5),
            ..LoopConfig::default()
        };
        let agent = FunctionLoop::new(provider, registry(), config);
        let mut ctx = test_context().await;
        ctx.push_goal("Be slow");

        agent.step(&mut ctx).await.unwrap();
        assert_eq!(working(&ctx)[1].content, "stopped early");
    }

    #[tokio::test]
    async fn run_stops_when_predicate_matches() {
        let (provider, agent) = function_loop(vec![
            make_function_call_response("echo", json!({"text": "working"})),
            make_function_call_response("finish", json!({"answer": "done"})),
        ]);
        let mut ctx = test_context().await;
        ctx.push_goal("Finish up");

        let output = agent.run(&mut ctx).await.unwrap();
        assert_eq!(output.function, "finish");
        assert_eq!(output.output, json!("done"));
        assert_eq!(output.iterations, 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn custom_predicate() {
        let (_, agent) = function_loop(vec![make_function_call_response("echo", json!({"text": "x"}))]);
        let agent = agent.with_done_predicate(|name| name == "echo");
        let mut ctx = test_context().await;
        ctx.push_goal("Echo once");

        let output = agent.run(&mut ctx).await.unwrap();
        assert_eq!(output.output, json!("x"));
        assert_eq!(output.iterations, 1);
    }

    #[tokio::test]
    async fn run_hits_iteration_limit() {
        let (_, agent) = function_loop(vec![
            make_text_response("one"),
            make_text_response("two"),
            make_text_response("three"),
        ]);
        let agent = agent.with_max_iterations(3);
        let mut ctx = test_context().await;
        ctx.push_goal("Never finish");

        let err = agent.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::IterationLimit(3))));
        assert!(ctx.storage().read("test/state.json").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_catalog_is_an_error() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let agent = FunctionLoop::new(provider, Arc::new(ToolRegistry::new()), LoopConfig::default());
        let mut ctx = test_context().await;
        let err = agent.step(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::NoFunctionCatalog)));
    }

    #[test]
    fn config_follows_app_config() {
        let mut app = AppConfig::default();
        app.agent.save_threshold_chars = 42;
        app.agent.function_timeout_secs = 7;
        let config = LoopConfig::from_config(&app);
        assert_eq!(config.save_threshold_chars, 42);
        assert_eq!(config.function_timeout, Duration::from_secs(7));
        assert_eq!(config.model, app.provider.model);
    }
}
