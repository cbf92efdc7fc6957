//! Session management and the per-query dialogue.

use std::io::Write;

use serde_json::{Map, Value};

use crate::Result;
use crate::model::{
    Backend, Message, ModelRequest, ModelResponse, Part, ToolCall, ToolOutcome, ToolResult,
    ToolSpec,
};
use crate::tools::{ToolError, ToolHost};

/// Printed when the model answers a tool result without any text.
pub const TOOL_COMPLETED_NOTICE: &str = "Tool execution completed";

/// Where a query is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    AwaitingModel,
    ToolRequested,
    ToolExecuting,
    AwaitingFollowup,
    Done,
}

/// What happened while processing one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// States visited, in order, ending with [`DialogueState::Done`].
    pub transitions: Vec<DialogueState>,
    /// The tool result fed back to the model, if a tool was requested.
    pub tool_result: Option<ToolResult>,
}

/// A conversation bound to one model backend and one tool host.
///
/// Tool declarations are fixed at construction. An empty set means
/// text-only mode: tool calls are never sent to the host.
pub struct Session<B, T> {
    backend: B,
    tools: T,
    declarations: Vec<ToolSpec>,
    messages: Vec<Message>,
}

impl<B: Backend, T: ToolHost> Session<B, T> {
    pub fn new(backend: B, tools: T, declarations: Vec<ToolSpec>) -> Self {
        Self {
            backend,
            tools,
            declarations,
            messages: Vec::new(),
        }
    }

    /// The conversation so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn declarations(&self) -> &[ToolSpec] {
        &self.declarations
    }

    pub fn is_text_only(&self) -> bool {
        self.declarations.is_empty()
    }

    /// End the session, handing back the tool host for shutdown.
    pub fn into_tool_host(self) -> T {
        self.tools
    }

    /// Run one query through the model, handling at most one tool call.
    ///
    /// Model text is written to `out` as it arrives. Tool failures are
    /// folded into the conversation and never fail the query. If the query
    /// does fail (model or output error), the turns it added are removed.
    pub async fn process_query(
        &mut self,
        query: &str,
        out: &mut impl Write,
    ) -> Result<QueryOutcome> {
        let checkpoint = self.messages.len();
        let result = self.run_cycle(query, out).await;
        if result.is_err() {
            self.messages.truncate(checkpoint);
        }
        result
    }

    async fn run_cycle(&mut self, query: &str, out: &mut impl Write) -> Result<QueryOutcome> {
        let mut transitions = vec![DialogueState::AwaitingModel];

        self.messages.push(Message::user(query));
        let response = self.send().await?;
        emit_text(&response.message, out)?;

        let calls = response.message.tool_calls();
        let Some(call) = calls.first().map(|call| (*call).clone()) else {
            self.messages.push(response.message);
            transitions.push(DialogueState::Done);
            return Ok(QueryOutcome {
                transitions,
                tool_result: None,
            });
        };
        if calls.len() > 1 {
            tracing::warn!(
                requested = calls.len(),
                "model requested several tool calls; only the first is run"
            );
        }
        self.messages.push(keep_tool_calls(response.message, 1));
        transitions.push(DialogueState::ToolRequested);

        transitions.push(DialogueState::ToolExecuting);
        let outcome = self.invoke(&call, out).await?;
        let result = ToolResult {
            name: call.name,
            outcome,
        };
        self.messages.push(Message::tool_result(result.clone()));

        transitions.push(DialogueState::AwaitingFollowup);
        let followup = self.send().await?;
        if followup.message.parts.iter().any(|p| matches!(p, Part::Text(_))) {
            emit_text(&followup.message, out)?;
        } else {
            writeln!(out, "{TOOL_COMPLETED_NOTICE}")?;
        }
        if !followup.message.tool_calls().is_empty() {
            tracing::debug!("follow-up requested another tool call; not chained");
        }
        self.messages.push(keep_tool_calls(followup.message, 0));
        transitions.push(DialogueState::Done);

        Ok(QueryOutcome {
            transitions,
            tool_result: Some(result),
        })
    }

    async fn send(&self) -> Result<ModelResponse> {
        let response = self
            .backend
            .call(ModelRequest {
                messages: &self.messages,
                tools: &self.declarations,
            })
            .await?;
        tracing::debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model responded"
        );
        Ok(response)
    }

    /// Execute a requested tool. Only I/O errors on `out` escape.
    async fn invoke(&self, call: &ToolCall, out: &mut impl Write) -> Result<ToolOutcome> {
        let result = if self.declarations.iter().any(|d| d.name == call.name) {
            let arguments = decode_arguments(&call.arguments);
            writeln!(
                out,
                "Calling tool {} with args {}",
                call.name,
                Value::Object(arguments.clone())
            )?;
            self.tools.execute(&call.name, arguments).await
        } else {
            Err(ToolError::NotAvailable(call.name.clone()))
        };

        match result {
            Ok(output) => Ok(ToolOutcome::Success { output }),
            Err(e) => {
                tracing::warn!(tool = %call.name, "tool call failed: {e}");
                writeln!(out, "Error calling tool {}: {e}", call.name)?;
                Ok(ToolOutcome::error(e.to_string()))
            }
        }
    }
}

fn emit_text(message: &Message, out: &mut impl Write) -> std::io::Result<()> {
    for part in &message.parts {
        if let Part::Text(text) = part {
            writeln!(out, "{text}")?;
        }
    }
    out.flush()
}

/// Drop all but the first `limit` tool calls.
///
/// Every call left in the transcript must be answered by the next turn, or
/// the endpoint rejects the whole history.
fn keep_tool_calls(mut message: Message, limit: usize) -> Message {
    let mut kept = 0;
    message.parts.retain(|part| match part {
        Part::ToolCall(_) if kept < limit => {
            kept += 1;
            true
        }
        Part::ToolCall(_) => false,
        Part::Text(_) | Part::ToolResult(_) => true,
    });
    message
}

/// Tool arguments as an object. Anything undecodable becomes `{}`.
fn decode_arguments(arguments: &Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(encoded) => serde_json::from_str(encoded).unwrap_or_else(|e| {
            tracing::warn!("undecodable tool arguments, using none: {e}");
            Map::new()
        }),
        other => {
            tracing::warn!(%other, "tool arguments are not an object, using none");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, Role, Usage};
    use mcp::Tool;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records every transcript it is sent.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<std::result::Result<Message, ModelError>>>,
        requests: Mutex<Vec<(Vec<Message>, usize)>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<std::result::Result<Message, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(Vec<Message>, usize)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Backend for &ScriptedBackend {
        async fn call(
            &self,
            request: ModelRequest<'_>,
        ) -> std::result::Result<ModelResponse, ModelError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.messages.to_vec(), request.tools.len()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left");
            reply.map(|message| ModelResponse {
                message,
                usage: Usage::default(),
            })
        }
    }

    /// Returns one canned result and records every call.
    struct RecordingTools {
        descriptors: Vec<Tool>,
        result: std::result::Result<Value, ToolError>,
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl RecordingTools {
        fn new(result: std::result::Result<Value, ToolError>) -> Self {
            Self {
                descriptors: Vec::new(),
                result,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolHost for &RecordingTools {
        fn descriptors(&self) -> &[Tool] {
            &self.descriptors
        }

        async fn execute(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> std::result::Result<Value, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments));
            self.result.clone()
        }
    }

    fn declarations() -> Vec<ToolSpec> {
        ["search_papers", "extract_info"]
            .into_iter()
            .map(|name| ToolSpec {
                name: name.into(),
                description: String::new(),
                parameters: json!({"type": "object", "properties": {}, "required": []}),
            })
            .collect()
    }

    fn text(s: &str) -> Message {
        Message::model(vec![Part::Text(s.into())])
    }

    fn call(name: &str, arguments: Value) -> Part {
        Part::ToolCall(ToolCall {
            name: name.into(),
            arguments,
        })
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn text_only_response_goes_straight_to_done() {
        let backend = ScriptedBackend::new(vec![Ok(text("Hello!"))]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());
        let mut out = Vec::new();

        let outcome = session.process_query("hi", &mut out).await.unwrap();

        assert_eq!(
            outcome.transitions,
            [DialogueState::AwaitingModel, DialogueState::Done]
        );
        assert_eq!(outcome.tool_result, None);
        assert_eq!(output(out), "Hello!\n");

        let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Model]);
        assert!(tools.calls().is_empty());

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, vec![Message::user("hi")]);
        assert_eq!(requests[0].1, 2);
    }

    #[tokio::test]
    async fn tool_call_runs_once_and_feeds_result_back() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![
                Part::Text("Let me search.".into()),
                call("search_papers", json!({"topic": "x", "max_results": 3})),
            ])),
            Ok(text("Found 3 papers on x.")),
        ]);
        let tools = RecordingTools::new(Ok(json!([{"type": "text", "text": "[\"2401.1\"]"}])));
        let mut session = Session::new(&backend, &tools, declarations());
        let mut out = Vec::new();

        let outcome = session
            .process_query("find papers on x", &mut out)
            .await
            .unwrap();

        assert_eq!(
            outcome.transitions,
            [
                DialogueState::AwaitingModel,
                DialogueState::ToolRequested,
                DialogueState::ToolExecuting,
                DialogueState::AwaitingFollowup,
                DialogueState::Done,
            ]
        );

        let calls = tools.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "search_papers");
        assert_eq!(
            Value::Object(calls[0].1.clone()),
            json!({"topic": "x", "max_results": 3})
        );

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        let followup = requests[1].0.last().unwrap();
        assert_eq!(followup.role, Role::Tool);
        assert_eq!(
            followup.parts,
            vec![Part::ToolResult(ToolResult {
                name: "search_papers".into(),
                outcome: ToolOutcome::Success {
                    output: json!([{"type": "text", "text": "[\"2401.1\"]"}]),
                },
            })]
        );

        assert_eq!(
            output(out),
            "Let me search.\n\
             Calling tool search_papers with args {\"max_results\":3,\"topic\":\"x\"}\n\
             Found 3 papers on x.\n"
        );

        let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Model, Role::Tool, Role::Model]);
    }

    #[tokio::test]
    async fn tool_failure_is_folded_as_error_text() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![call(
                "extract_info",
                json!({"paper_id": "2401.1"}),
            )])),
            Ok(Message::model(Vec::new())),
        ]);
        let tools = RecordingTools::new(Err(ToolError::Remote("paper not found".into())));
        let mut session = Session::new(&backend, &tools, declarations());
        let mut out = Vec::new();

        let outcome = session.process_query("info on 2401.1", &mut out).await.unwrap();

        assert_eq!(outcome.transitions.last(), Some(&DialogueState::Done));
        let result = outcome.tool_result.unwrap();
        assert_eq!(result.outcome.content(), json!("Error: paper not found"));

        let requests = backend.requests();
        let Part::ToolResult(sent) = &requests[1].0.last().unwrap().parts[0] else {
            panic!("follow-up is not a tool result");
        };
        assert_eq!(sent.outcome.content(), json!("Error: paper not found"));

        let printed = output(out);
        assert!(printed.contains("Error calling tool extract_info: paper not found\n"));
        assert!(printed.ends_with("Tool execution completed\n"));
    }

    #[tokio::test]
    async fn string_encoded_arguments_are_decoded() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![call(
                "extract_info",
                json!("{\"paper_id\": \"2401.1\"}"),
            )])),
            Ok(text("done")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());

        session.process_query("q", &mut std::io::sink()).await.unwrap();

        let calls = tools.calls();
        assert_eq!(Value::Object(calls[0].1.clone()), json!({"paper_id": "2401.1"}));
    }

    #[tokio::test]
    async fn undecodable_arguments_become_empty() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![call("search_papers", json!("{not json"))])),
            Ok(text("done")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());

        let outcome = session.process_query("q", &mut std::io::sink()).await.unwrap();

        let calls = tools.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.is_empty());
        assert_eq!(outcome.transitions.last(), Some(&DialogueState::Done));
    }

    #[tokio::test]
    async fn text_only_mode_never_calls_tools() {
        let backend = ScriptedBackend::new(vec![
            Ok(text("Plain answer.")),
            Ok(Message::model(vec![call("search_papers", json!({"topic": "x"}))])),
            Ok(text("I cannot search right now.")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, Vec::new());
        assert!(session.is_text_only());

        let mut out = Vec::new();
        session.process_query("hello", &mut out).await.unwrap();
        assert_eq!(output(out), "Plain answer.\n");

        let mut out = Vec::new();
        let outcome = session.process_query("search x", &mut out).await.unwrap();
        assert!(tools.calls().is_empty());
        assert_eq!(
            outcome.tool_result.unwrap().outcome.content(),
            json!("Error: tool not available: search_papers")
        );
        assert!(output(out).ends_with("I cannot search right now.\n"));

        assert!(backend.requests().iter().all(|(_, tools)| *tools == 0));
    }

    #[tokio::test]
    async fn follow_up_tool_calls_are_not_chained() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![call("search_papers", json!({"topic": "x"}))])),
            Ok(Message::model(vec![call("extract_info", json!({"paper_id": "1"}))])),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());
        let mut out = Vec::new();

        let outcome = session.process_query("q", &mut out).await.unwrap();

        assert_eq!(tools.calls().len(), 1);
        assert_eq!(backend.requests().len(), 2);
        assert_eq!(outcome.transitions.last(), Some(&DialogueState::Done));
        assert!(output(out).ends_with("Tool execution completed\n"));
    }

    #[tokio::test]
    async fn only_the_first_tool_call_runs() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![
                call("search_papers", json!({"topic": "x"})),
                call("extract_info", json!({"paper_id": "1"})),
            ])),
            Ok(text("done")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());

        session.process_query("q", &mut std::io::sink()).await.unwrap();

        let calls = tools.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "search_papers");
    }

    /// Each model turn's tool calls must be answered one-for-one by the turn
    /// after it.
    fn assert_calls_answered(messages: &[Message]) {
        for (i, message) in messages.iter().enumerate() {
            let calls = message.tool_calls().len();
            if calls == 0 {
                continue;
            }
            let results = messages
                .get(i + 1)
                .map(|next| {
                    next.parts
                        .iter()
                        .filter(|p| matches!(p, Part::ToolResult(_)))
                        .count()
                })
                .unwrap_or(0);
            assert_eq!(calls, results, "turn {i} has unanswered tool calls");
        }
    }

    #[tokio::test]
    async fn unrun_tool_calls_stay_out_of_the_transcript() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![
                Part::Text("Let me look.".into()),
                call("search_papers", json!({"topic": "x"})),
                call("extract_info", json!({"paper_id": "1"})),
            ])),
            Ok(Message::model(vec![
                Part::Text("Found one.".into()),
                call("extract_info", json!({"paper_id": "2"})),
            ])),
            Ok(text("Anything else?")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());

        session.process_query("first", &mut std::io::sink()).await.unwrap();
        session.process_query("second", &mut std::io::sink()).await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 3);
        for (messages, _) in &requests {
            assert_calls_answered(messages);
        }

        let history = &requests[2].0;
        assert_eq!(history.len(), 5);
        assert_eq!(history[1].tool_calls().len(), 1);
        assert_eq!(history[1].text(), "Let me look.");
        assert!(history[3].tool_calls().is_empty());
        assert_eq!(history[3].text(), "Found one.");
        assert_calls_answered(session.messages());
    }

    #[tokio::test]
    async fn follow_up_with_only_a_tool_call_keeps_next_query_valid() {
        let backend = ScriptedBackend::new(vec![
            Ok(Message::model(vec![call("search_papers", json!({"topic": "x"}))])),
            Ok(Message::model(vec![call("extract_info", json!({"paper_id": "1"}))])),
            Ok(text("ok")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());

        session.process_query("first", &mut std::io::sink()).await.unwrap();
        session.process_query("second", &mut std::io::sink()).await.unwrap();

        let requests = backend.requests();
        let history = &requests[2].0;
        assert!(history[3].parts.is_empty());
        assert_eq!(history[4], Message::user("second"));
        assert_calls_answered(history);
    }

    #[test]
    fn keep_tool_calls_limits_only_calls() {
        let message = Message::model(vec![
            call("a", json!({})),
            Part::Text("between".into()),
            call("b", json!({})),
        ]);

        let first = keep_tool_calls(message.clone(), 1);
        assert_eq!(first.parts.len(), 2);
        assert_eq!(first.tool_calls()[0].name, "a");

        let none = keep_tool_calls(message, 0);
        assert_eq!(none.parts, vec![Part::Text("between".into())]);
    }

    #[tokio::test]
    async fn failed_query_leaves_no_turns_behind() {
        let backend = ScriptedBackend::new(vec![
            Err(ModelError::Network("connection reset".into())),
            Ok(Message::model(vec![call("search_papers", json!({"topic": "x"}))])),
            Err(ModelError::Api("503 Service Unavailable: overloaded".into())),
            Ok(text("back again")),
        ]);
        let tools = RecordingTools::new(Ok(json!([])));
        let mut session = Session::new(&backend, &tools, declarations());

        let err = session.process_query("first", &mut std::io::sink()).await;
        assert!(matches!(err, Err(crate::Error::Model(ModelError::Network(_)))));
        assert!(session.messages().is_empty());

        let err = session.process_query("second", &mut std::io::sink()).await;
        assert!(err.is_err());
        assert!(session.messages().is_empty());
        assert_eq!(tools.calls().len(), 1);

        session.process_query("third", &mut std::io::sink()).await.unwrap();
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0], Message::user("third"));
    }

    #[test]
    fn decode_arguments_cases() {
        assert_eq!(
            Value::Object(decode_arguments(&json!({"a": 1}))),
            json!({"a": 1})
        );
        assert!(decode_arguments(&Value::Null).is_empty());
        assert!(decode_arguments(&json!([1, 2])).is_empty());
        assert!(decode_arguments(&json!("[1, 2]")).is_empty());
        assert_eq!(
            Value::Object(decode_arguments(&json!("{\"a\": 1}"))),
            json!({"a": 1})
        );
    }
}
