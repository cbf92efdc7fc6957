//! The interactive query loop.

use std::future::Future;
use std::io::{self, BufRead, Write};

use mcp::Tool;
use runtime::{Backend, Session, ToolHost, ToolSpec, build_endpoint_schema};

const PROMPT: &str = "Query: ";

/// Anything that can answer one query, writing its output to `out`.
pub trait QueryHandler {
    fn handle(
        &mut self,
        query: &str,
        out: &mut impl Write,
    ) -> impl Future<Output = runtime::Result<()>>;
}

impl<B: Backend, T: ToolHost> QueryHandler for Session<B, T> {
    async fn handle(&mut self, query: &str, out: &mut impl Write) -> runtime::Result<()> {
        let outcome = self.process_query(query, out).await?;
        tracing::debug!(transitions = ?outcome.transitions, "query finished");
        Ok(())
    }
}

/// Report the server's tools and turn them into model declarations.
///
/// A schema failure is announced on `out` and yields no declarations, which
/// puts the session in text-only mode.
pub fn configure_tools(descriptors: &[Tool], out: &mut impl Write) -> io::Result<Vec<ToolSpec>> {
    let names: Vec<&str> = descriptors.iter().map(|t| t.name.as_str()).collect();
    writeln!(out, "\nConnected to server with tools: {names:?}")?;

    match build_endpoint_schema(descriptors) {
        Ok(declarations) => {
            writeln!(out, "Successfully configured Gemini with tools!")?;
            Ok(declarations)
        }
        Err(e) => {
            tracing::warn!(error = %e, "tool schemas rejected; continuing without tools");
            writeln!(out, "Error configuring Gemini with tools: {e}")?;
            writeln!(out, "Falling back to basic model without tools...")?;
            Ok(Vec::new())
        }
    }
}

/// Read queries from `input` until `quit` or end of input.
///
/// A failed query is reported on `out` and the loop carries on.
pub async fn run(
    handler: &mut impl QueryHandler,
    mut input: impl BufRead,
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(out, "\nMCP Chatbot with Gemini Started!")?;
    writeln!(out, "Type your queries or 'quit' to exit.")?;

    loop {
        write!(out, "\n{PROMPT}")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            break;
        }

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if is_quit(query) {
            break;
        }

        match handler.handle(query, out).await {
            Ok(()) => writeln!(out)?,
            Err(e) => {
                tracing::debug!(error = %e, "query failed");
                writeln!(out, "\nError: {e}")?;
            }
        }
    }

    Ok(())
}

fn is_quit(query: &str) -> bool {
    query.eq_ignore_ascii_case("quit")
}
