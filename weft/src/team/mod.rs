//! Multi-member teams coordinating over a shared task board.
//!
//! A team runs in strict phases: the lead plans, members execute (either
//! claiming tasks off the board or answering role prompts in parallel),
//! and the outputs are synthesized into one answer. The board enforces
//! atomic claims and dependency gating; the mailbox carries member
//! messages; a serialisable snapshot captures the whole state for audit.
//!
//! A round that makes no forward progress while tasks remain does not
//! silently give up: it surfaces [`Error::TeamStalled`] with the
//! remaining task ids.

mod board;
mod mailbox;
mod tools;

pub use board::{Task, TaskBoard, TaskState, TaskStatus};
pub use mailbox::{BROADCAST, Mailbox, TeamMessage};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::provider::FinishReason;

/// Default bound on task-dispatch rounds.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Phase of a team run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamPhase {
    /// The lead is producing the plan.
    Planning,
    /// Members are executing.
    Executing,
    /// Outputs are being combined.
    Synthesizing,
    /// The run finished.
    Completed,
    /// The run failed.
    Error,
}

/// Phase of one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberPhase {
    /// Waiting for work.
    Idle,
    /// Executing a task or prompt.
    Working,
    /// The team run finished.
    Completed,
}

/// One member output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamOutput {
    /// The producing member.
    pub member: String,
    /// The task this output completed, for task-based execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// The output text.
    pub text: String,
}

/// Serialisable audit snapshot of a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSnapshot {
    /// Team name.
    pub name: String,
    /// Current phase.
    pub phase: TeamPhase,
    /// Phase per member.
    pub member_phases: HashMap<String, MemberPhase>,
    /// Every task state in insertion order.
    pub tasks: Vec<TaskState>,
    /// Every message in send order.
    pub messages: Vec<TeamMessage>,
    /// Outputs recorded so far.
    pub outputs: Vec<TeamOutput>,
}

/// State shared between the coordinator and the member tools.
#[derive(Debug)]
pub(crate) struct TeamShared {
    name: String,
    pub(crate) board: TaskBoard,
    pub(crate) mailbox: Mailbox,
    member_names: Vec<String>,
    phase: Mutex<TeamPhase>,
    member_phases: Mutex<HashMap<String, MemberPhase>>,
    outputs: Mutex<Vec<TeamOutput>>,
}

impl TeamShared {
    pub(crate) fn new(
        name: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
    ) -> Arc<Self> {
        let member_names: Vec<String> = members.into_iter().map(Into::into).collect();
        let member_phases = member_names
            .iter()
            .map(|n| (n.clone(), MemberPhase::Idle))
            .collect();
        Arc::new(Self {
            name: name.into(),
            board: TaskBoard::new(),
            mailbox: Mailbox::new(),
            member_names,
            phase: Mutex::new(TeamPhase::Planning),
            member_phases: Mutex::new(member_phases),
            outputs: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn is_member(&self, name: &str) -> bool {
        self.member_names.iter().any(|n| n == name)
    }

    pub(crate) fn has_task(&self, id: &str) -> bool {
        self.board.snapshot().iter().any(|state| state.task.id == id)
    }

    fn set_phase(&self, phase: TeamPhase) {
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    fn set_member_phase(&self, member: &str, phase: MemberPhase) {
        self.member_phases
            .lock()
            .expect("member phase lock poisoned")
            .insert(member.to_owned(), phase);
    }

    fn idle_members(&self, exclude: &str) -> Vec<String> {
        let phases = self.member_phases.lock().expect("member phase lock poisoned");
        self.member_names
            .iter()
            .filter(|name| name.as_str() != exclude)
            .filter(|name| phases.get(*name) == Some(&MemberPhase::Idle))
            .cloned()
            .collect()
    }

    fn record_output(&self, output: TeamOutput) {
        self.outputs
            .lock()
            .expect("outputs lock poisoned")
            .push(output);
    }

    pub(crate) fn snapshot(&self) -> TeamSnapshot {
        TeamSnapshot {
            name: self.name.clone(),
            phase: *self.phase.lock().expect("phase lock poisoned"),
            member_phases: self
                .member_phases
                .lock()
                .expect("member phase lock poisoned")
                .clone(),
            tasks: self.board.snapshot(),
            messages: self.mailbox.all(),
            outputs: self.outputs.lock().expect("outputs lock poisoned").clone(),
        }
    }
}

/// Combines member outputs into the final team answer.
pub type TeamSynthesize = Box<dyn Fn(&[TeamOutput]) -> String + Send + Sync>;

/// Result of a team run.
#[derive(Debug, Clone)]
pub struct TeamResult {
    /// The synthesized final text.
    pub text: String,
    /// The lead's plan.
    pub plan: String,
    /// Every member output.
    pub outputs: Vec<TeamOutput>,
}

/// A lead plus members coordinating through a shared board and mailbox.
pub struct Team {
    lead: Agent,
    lead_name: String,
    members: Vec<(String, Agent)>,
    shared: Arc<TeamShared>,
    max_rounds: usize,
    synthesize: Option<TeamSynthesize>,
}

impl Team {
    /// Start building a team.
    #[must_use]
    pub fn builder() -> TeamBuilder {
        TeamBuilder::default()
    }

    /// The team's audit snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TeamSnapshot {
        self.shared.snapshot()
    }

    /// Send a message between members, validating both names.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sender or recipient.
    pub fn send_message(&self, from: &str, to: &str, content: &str) -> Result<()> {
        if !self.shared.is_member(from) {
            return Err(Error::not_found(format!("member '{from}'")));
        }
        if to != BROADCAST && !self.shared.is_member(to) {
            return Err(Error::not_found(format!("member '{to}'")));
        }
        self.shared.mailbox.push(from, to, content);
        Ok(())
    }

    /// Broadcast a message from a member to everyone.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sender.
    pub fn broadcast(&self, from: &str, content: &str) -> Result<()> {
        self.send_message(from, BROADCAST, content)
    }

    /// Run the team: plan, execute, synthesize.
    ///
    /// # Errors
    ///
    /// [`Error::TeamStalled`] when task dispatch stops making progress,
    /// [`Error::Workflow`] when the lead's plan or synthesis run fails.
    pub async fn execute(&self, prompt: &str) -> Result<TeamResult> {
        info!(team = %self.shared.name, "Team run started");
        self.shared.set_phase(TeamPhase::Planning);

        let plan = match self.plan(prompt).await {
            Ok(plan) => plan,
            Err(e) => {
                self.shared.set_phase(TeamPhase::Error);
                return Err(e);
            }
        };

        self.shared.set_phase(TeamPhase::Executing);
        let executed = if self.shared.board.is_empty() {
            self.execute_prompt_based(&plan, prompt).await
        } else {
            self.execute_task_based(&plan, prompt).await
        };
        if let Err(e) = executed {
            self.shared.set_phase(TeamPhase::Error);
            return Err(e);
        }

        self.shared.set_phase(TeamPhase::Synthesizing);
        let outputs = self.shared.snapshot().outputs;
        let text = match &self.synthesize {
            Some(synthesize) => synthesize(&outputs),
            None => self.synthesize_with_lead(prompt, &outputs).await?,
        };

        self.shared.set_phase(TeamPhase::Completed);
        for (name, _) in &self.members {
            self.shared.set_member_phase(name, MemberPhase::Completed);
        }
        self.shared
            .set_member_phase(&self.lead_name, MemberPhase::Completed);

        info!(team = %self.shared.name, outputs = outputs.len(), "Team run completed");
        Ok(TeamResult {
            text,
            plan,
            outputs,
        })
    }

    async fn plan(&self, prompt: &str) -> Result<String> {
        let members: String = self
            .members
            .iter()
            .map(|(name, agent)| format!("- {name} ({})", agent.role()))
            .collect::<Vec<_>>()
            .join("\n");
        let tasks: String = self
            .shared
            .board
            .snapshot()
            .iter()
            .map(|state| {
                if state.task.depends_on.is_empty() {
                    format!("- {}: {}", state.task.id, state.task.description)
                } else {
                    format!(
                        "- {}: {} (depends on: {})",
                        state.task.id,
                        state.task.description,
                        state.task.depends_on.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let plan_prompt = format!(
            "{prompt}\n\nTeam members:\n{members}\n\nTasks:\n{tasks}\n\n\
             Produce a short coordination plan for the team."
        );

        let run = self.lead.generate(plan_prompt).await;
        if run.finish_reason == FinishReason::Error {
            return Err(Error::Workflow("lead planning run failed".to_owned()));
        }
        Ok(run.text)
    }

    /// Bounded round-robin over the task board.
    async fn execute_task_based(&self, plan: &str, prompt: &str) -> Result<()> {
        for round in 1..=self.max_rounds {
            if self.shared.board.is_all_completed() {
                return Ok(());
            }

            let assignments = self.claim_round();
            if assignments.is_empty() {
                // Tasks remain but nothing could be claimed: stalled.
                warn!(team = %self.shared.name, round, "No forward progress");
                return Err(Error::TeamStalled {
                    remaining: self.shared.board.remaining_ids(),
                });
            }
            debug!(team = %self.shared.name, round, claims = assignments.len(), "Dispatch round");

            let runs = assignments.iter().map(|(task, member_name, agent)| {
                let task_prompt = format!(
                    "{plan}\n\nYour task: {}\nContext: {prompt}",
                    task.description
                );
                async move {
                    let run = agent.generate(task_prompt).await;
                    self.shared.board.complete(&task.id, &run.text);
                    self.shared.record_output(TeamOutput {
                        member: member_name.clone(),
                        task_id: Some(task.id.clone()),
                        text: run.text,
                    });
                    self.shared.set_member_phase(member_name, MemberPhase::Idle);
                }
            });
            futures::future::join_all(runs).await;
        }

        if self.shared.board.is_all_completed() {
            Ok(())
        } else {
            Err(Error::TeamStalled {
                remaining: self.shared.board.remaining_ids(),
            })
        }
    }

    /// Pair available tasks with idle members, claiming atomically.
    fn claim_round(&self) -> Vec<(Task, String, &Agent)> {
        let mut assignments = Vec::new();
        let mut idle = self.shared.idle_members(&self.lead_name);

        for task in self.shared.board.get_available() {
            let Some(member_name) = idle.first().cloned() else {
                break;
            };
            if self.shared.board.claim(&task.id, &member_name) {
                idle.remove(0);
                self.shared
                    .set_member_phase(&member_name, MemberPhase::Working);
                if let Some((name, agent)) =
                    self.members.iter().find(|(name, _)| *name == member_name)
                {
                    assignments.push((task, name.clone(), agent));
                }
            }
        }
        assignments
    }

    /// All members answer the same prompt in parallel.
    async fn execute_prompt_based(&self, plan: &str, prompt: &str) -> Result<()> {
        let runs = self.members.iter().map(|(name, agent)| {
            let member_prompt = format!(
                "{plan}\n\nYour role: {}\nTask: {prompt}",
                agent.role()
            );
            async move {
                self.shared.set_member_phase(name, MemberPhase::Working);
                let run = agent.generate(member_prompt).await;
                self.shared.record_output(TeamOutput {
                    member: name.clone(),
                    task_id: None,
                    text: run.text,
                });
                self.shared.set_member_phase(name, MemberPhase::Idle);
            }
        });
        futures::future::join_all(runs).await;
        Ok(())
    }

    async fn synthesize_with_lead(&self, prompt: &str, outputs: &[TeamOutput]) -> Result<String> {
        let assembled: String = outputs
            .iter()
            .map(|output| format!("## {}\n{}", output.member, output.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let synth_prompt = format!(
            "Original request: {prompt}\n\nTeam outputs:\n\n{assembled}\n\n\
             Combine these into a single final answer."
        );

        let run = self.lead.generate(synth_prompt).await;
        if run.finish_reason == FinishReason::Error {
            return Err(Error::Workflow("lead synthesis run failed".to_owned()));
        }
        Ok(run.text)
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("name", &self.shared.name)
            .field("lead", &self.lead_name)
            .field(
                "members",
                &self.members.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Builder for [`Team`].
#[derive(Default)]
pub struct TeamBuilder {
    name: Option<String>,
    lead: Option<Agent>,
    members: Vec<Agent>,
    tasks: Vec<Task>,
    max_rounds: Option<usize>,
    synthesize: Option<TeamSynthesize>,
}

impl TeamBuilder {
    /// Name the team.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the lead agent.
    #[must_use]
    pub fn lead(mut self, lead: Agent) -> Self {
        self.lead = Some(lead);
        self
    }

    /// Add a member agent. Its agent id is its member name.
    #[must_use]
    pub fn member(mut self, member: Agent) -> Self {
        self.members.push(member);
        self
    }

    /// Add a task to the board.
    #[must_use]
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Bound the number of dispatch rounds (default 10).
    #[must_use]
    pub const fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    /// Replace lead synthesis with a custom function.
    #[must_use]
    pub fn synthesize(
        mut self,
        synthesize: impl Fn(&[TeamOutput]) -> String + Send + Sync + 'static,
    ) -> Self {
        self.synthesize = Some(Box::new(synthesize));
        self
    }

    /// Build the team.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] without a lead or members, on duplicate
    /// member names, or on duplicate task ids.
    pub fn build(self) -> Result<Team> {
        let lead = self
            .lead
            .ok_or_else(|| Error::configuration("team requires a lead"))?;
        if self.members.is_empty() {
            return Err(Error::configuration("team requires at least one member"));
        }

        let lead_name = lead.agent_id().to_owned();
        let mut names = vec![lead_name.clone()];
        for member in &self.members {
            let name = member.agent_id().to_owned();
            if names.contains(&name) {
                return Err(Error::configuration(format!(
                    "duplicate member name '{name}'"
                )));
            }
            names.push(name);
        }

        let shared = TeamShared::new(
            self.name.unwrap_or_else(|| "team".to_owned()),
            names.clone(),
        );
        for task in self.tasks {
            shared.board.add_task(task)?;
        }

        // Equip everyone with coordination tools bound to their own name.
        let lead = lead.with_additional_tools(tools::member_tools(&shared, &lead_name));
        let members: Vec<(String, Agent)> = self
            .members
            .into_iter()
            .map(|member| {
                let name = member.agent_id().to_owned();
                let equipped = member.with_additional_tools(tools::member_tools(&shared, &name));
                (name, equipped)
            })
            .collect();

        Ok(Team {
            lead,
            lead_name,
            members,
            shared,
            max_rounds: self.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            synthesize: self.synthesize,
        })
    }
}
