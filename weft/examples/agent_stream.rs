//! Stream a run's events as wire-shape JSON.
//!
//! ```sh
//! cargo run --example agent_stream
//! ```

#![allow(clippy::print_stdout, clippy::unwrap_used)]

use futures::StreamExt;
use weft::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let workspace = assert_fs::TempDir::new()?;

    // A scripted provider: one tool call, then an answer.
    let provider = MockProvider::new(vec![
        MockTurn::tool_call(
            "call-1",
            "write_file",
            serde_json::json!({"path": "hello.txt", "content": "hello from weft"}),
        )
        .with_reasoning(["The user wants a file; I will write it."]),
        MockTurn::text("Wrote hello.txt for you.").with_usage(Usage::new(57, 12)),
    ]);

    let agent = Agent::builder()
        .provider(provider)
        .workspace_root(workspace.path())
        .role("file clerk")
        .build()?;

    let mut events = agent.stream("create hello.txt");
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    Ok(())
}
