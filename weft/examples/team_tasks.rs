//! Run a team over a small task DAG and print the audit snapshot.
//!
//! ```sh
//! cargo run --example team_tasks
//! ```

#![allow(clippy::print_stdout, clippy::unwrap_used)]

use weft::prelude::*;

fn member(workspace: &std::path::Path, id: &str, role: &str, reply: &str) -> Agent {
    Agent::builder()
        .provider(MockProvider::always(reply))
        .workspace_root(workspace)
        .agent_id(id)
        .role(role)
        .build()
        .unwrap()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let workspace = assert_fs::TempDir::new()?;

    let team = Team::builder()
        .name("launch")
        .lead(member(workspace.path(), "lead", "coordinator", "Plan: research, then write."))
        .member(member(workspace.path(), "scout", "researcher", "Research summary."))
        .member(member(workspace.path(), "quill", "writer", "Final article draft."))
        .task(Task::new("research", "Collect background material"))
        .task(Task::new("write", "Write the article").depends_on(["research"]))
        .build()?;

    let result = team.execute("Publish an article about rolling releases").await?;

    println!("plan: {}", result.plan);
    for output in &result.outputs {
        println!("{} ({:?}): {}", output.member, output.task_id, output.text);
    }
    println!("final: {}", result.text);
    println!("snapshot: {}", serde_json::to_string_pretty(&team.snapshot())?);

    Ok(())
}
