//! Evaluate an agent against a small suite with the JSON reporter.
//!
//! ```sh
//! cargo run --example eval_suite
//! ```

#![allow(clippy::print_stdout, clippy::unwrap_used)]

use weft::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let workspace = assert_fs::TempDir::new()?;

    let provider = MockProvider::new(vec![
        MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "echo 4"})),
        MockTurn::text("The answer is 4.").with_usage(Usage::new(40, 9)),
    ])
    .repeating();

    let agent = Agent::builder()
        .provider(provider)
        .workspace_root(workspace.path())
        .build()?;

    let runner = EvalRunner::builder()
        .name("arithmetic")
        .agent(agent)
        .max_concurrency(2)
        .case(
            EvalCase::new("uses the shell", "what is 2+2?")
                .assert(Assertion::tool_called("shell"))
                .assert(Assertion::output_contains("4")),
        )
        .case(
            EvalCase::new("stays cheap", "what is 2+2?")
                .assert(Assertion::token_usage(1_000))
                .assert(Assertion::step_count(1, Some(3))),
        )
        .reporter(JsonReporter)
        .build()?;

    runner.run().await;
    Ok(())
}
