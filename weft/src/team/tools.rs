//! Coordination tools exposed to team members.
//!
//! Each tool instance is bound to the owning member's name at
//! construction, so a member cannot forge messages or claims on behalf
//! of another: the sender identity never comes from model input.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ToolError;
use crate::tool::{BoxedTool, Durability, Tool, ToolContext};

use super::TeamShared;
use super::mailbox::BROADCAST;

/// Build the full set of member tools bound to one member.
pub(crate) fn member_tools(shared: &Arc<TeamShared>, member: &str) -> Vec<BoxedTool> {
    vec![
        Box::new(TeamMessageTool::bind(shared, member)),
        Box::new(TeamBroadcastTool::bind(shared, member)),
        Box::new(TeamTasksTool::bind(shared, member)),
        Box::new(TeamClaimTool::bind(shared, member)),
        Box::new(TeamCompleteTool::bind(shared, member)),
        Box::new(TeamStatusTool::bind(shared, member)),
    ]
}

macro_rules! bound_tool {
    ($name:ident) => {
        /// Team tool bound to its owning member.
        #[derive(Debug, Clone)]
        pub struct $name {
            shared: Arc<TeamShared>,
            member: String,
        }

        impl $name {
            pub(crate) fn bind(shared: &Arc<TeamShared>, member: &str) -> Self {
                Self {
                    shared: Arc::clone(shared),
                    member: member.to_owned(),
                }
            }
        }
    };
}

bound_tool!(TeamMessageTool);
bound_tool!(TeamBroadcastTool);
bound_tool!(TeamTasksTool);
bound_tool!(TeamClaimTool);
bound_tool!(TeamCompleteTool);
bound_tool!(TeamStatusTool);

/// Arguments for `team_message`.
#[derive(Debug, Deserialize)]
pub struct MessageArgs {
    /// Recipient member name.
    pub to: String,
    /// Message content.
    pub content: String,
}

#[async_trait]
impl Tool for TeamMessageTool {
    const NAME: &'static str = "team_message";
    type Args = MessageArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Send a message to another team member.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": {"type": "string", "minLength": 1},
                "content": {"type": "string", "minLength": 1}
            },
            "required": ["to", "content"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        if !self.shared.is_member(&args.to) {
            return Err(ToolError::NotFound(format!("member '{}'", args.to)));
        }
        self.shared
            .mailbox
            .push(&self.member, &args.to, &args.content);
        Ok(serde_json::json!({"success": true, "delivered": args.to}))
    }
}

/// Arguments for `team_broadcast`.
#[derive(Debug, Deserialize)]
pub struct BroadcastArgs {
    /// Message content.
    pub content: String,
}

#[async_trait]
impl Tool for TeamBroadcastTool {
    const NAME: &'static str = "team_broadcast";
    type Args = BroadcastArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Broadcast a message to every team member.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "minLength": 1}
            },
            "required": ["content"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        self.shared
            .mailbox
            .push(&self.member, BROADCAST, &args.content);
        Ok(serde_json::json!({"success": true, "delivered": BROADCAST}))
    }
}

/// Arguments for `team_tasks` (none).
#[derive(Debug, Deserialize)]
pub struct NoArgs {}

#[async_trait]
impl Tool for TeamTasksTool {
    const NAME: &'static str = "team_tasks";
    type Args = NoArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "List tasks currently available to claim.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, _args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let available: Vec<Value> = self
            .shared
            .board
            .get_available()
            .into_iter()
            .map(|task| {
                serde_json::json!({
                    "id": task.id,
                    "description": task.description,
                    "dependsOn": task.depends_on,
                })
            })
            .collect();
        Ok(serde_json::json!({"success": true, "available": available}))
    }
}

/// Arguments for `team_claim`.
#[derive(Debug, Deserialize)]
pub struct ClaimArgs {
    /// Id of the task to claim.
    pub task_id: String,
}

#[async_trait]
impl Tool for TeamClaimTool {
    const NAME: &'static str = "team_claim";
    type Args = ClaimArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Atomically claim an available task for yourself.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "string", "minLength": 1}
            },
            "required": ["task_id"]
        })
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        if !self.shared.has_task(&args.task_id) {
            return Err(ToolError::NotFound(format!("task '{}'", args.task_id)));
        }
        let claimed = self.shared.board.claim(&args.task_id, &self.member);
        Ok(serde_json::json!({
            "success": true,
            "taskId": args.task_id,
            "claimed": claimed,
        }))
    }
}

/// Arguments for `team_complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteArgs {
    /// Id of the claimed task.
    pub task_id: String,
    /// Result text to record.
    pub result: String,
}

#[async_trait]
impl Tool for TeamCompleteTool {
    const NAME: &'static str = "team_complete";
    type Args = CompleteArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Mark a task you claimed as completed, recording its result.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "string", "minLength": 1},
                "result": {"type": "string"}
            },
            "required": ["task_id", "result"]
        })
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        if !self.shared.has_task(&args.task_id) {
            return Err(ToolError::NotFound(format!("task '{}'", args.task_id)));
        }
        // Only the claiming member may complete the task.
        let holder = self
            .shared
            .board
            .snapshot()
            .into_iter()
            .find(|state| state.task.id == args.task_id)
            .and_then(|state| state.claimed_by);
        if holder.as_deref() != Some(self.member.as_str()) {
            return Err(ToolError::AccessDenied(format!(
                "task '{}' is not claimed by '{}'",
                args.task_id, self.member
            )));
        }

        let completed = self.shared.board.complete(&args.task_id, &args.result);
        Ok(serde_json::json!({
            "success": true,
            "taskId": args.task_id,
            "completed": completed,
        }))
    }
}

#[async_trait]
impl Tool for TeamStatusTool {
    const NAME: &'static str = "team_status";
    type Args = NoArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Report the team's phase, members, and task progress.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, _args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let snapshot = self.shared.snapshot();
        serde_json::to_value(&snapshot)
            .map(|mut value| {
                if let Some(map) = value.as_object_mut() {
                    map.insert("success".into(), Value::Bool(true));
                }
                value
            })
            .map_err(ToolError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::super::board::Task;
    use super::*;

    fn shared() -> Arc<TeamShared> {
        let shared = TeamShared::new("demo", ["lead", "alice", "bob"]);
        shared.board.add_task(Task::new("t1", "write docs")).unwrap();
        shared
    }

    #[tokio::test]
    async fn message_validates_the_recipient() {
        let shared = shared();
        let tool = TeamMessageTool::bind(&shared, "alice");
        let ctx = ToolContext::detached();

        let ok = tool
            .call(
                MessageArgs {
                    to: "bob".into(),
                    content: "hi".into(),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(shared.mailbox.all()[0].from, "alice");

        let err = tool
            .call(
                MessageArgs {
                    to: "ghost".into(),
                    content: "hi".into(),
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn sender_identity_is_bound_not_forgeable() {
        let shared = shared();
        let ctx = ToolContext::detached();

        TeamBroadcastTool::bind(&shared, "bob")
            .call(
                BroadcastArgs {
                    content: "from bob".into(),
                },
                &ctx,
            )
            .await
            .unwrap();

        let message = &shared.mailbox.all()[0];
        assert_eq!(message.from, "bob");
        assert!(message.is_broadcast());
    }

    #[tokio::test]
    async fn claim_and_complete_enforce_ownership() {
        let shared = shared();
        let ctx = ToolContext::detached();

        let claimed = TeamClaimTool::bind(&shared, "alice")
            .call(
                ClaimArgs {
                    task_id: "t1".into(),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(claimed["claimed"], true);

        // Bob cannot complete Alice's task.
        let err = TeamCompleteTool::bind(&shared, "bob")
            .call(
                CompleteArgs {
                    task_id: "t1".into(),
                    result: "stolen".into(),
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "access-denied");

        let done = TeamCompleteTool::bind(&shared, "alice")
            .call(
                CompleteArgs {
                    task_id: "t1".into(),
                    result: "docs written".into(),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(done["completed"], true);
    }

    #[tokio::test]
    async fn tasks_and_status_report_board_state() {
        let shared = shared();
        let ctx = ToolContext::detached();

        let tasks = TeamTasksTool::bind(&shared, "alice")
            .call(NoArgs {}, &ctx)
            .await
            .unwrap();
        assert_eq!(tasks["available"].as_array().unwrap().len(), 1);

        let status = TeamStatusTool::bind(&shared, "alice")
            .call(NoArgs {}, &ctx)
            .await
            .unwrap();
        assert_eq!(status["success"], true);
        assert_eq!(status["name"], "demo");
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let shared = shared();
        let ctx = ToolContext::detached();
        let err = TeamClaimTool::bind(&shared, "alice")
            .call(
                ClaimArgs {
                    task_id: "ghost".into(),
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not-found");
    }
}
