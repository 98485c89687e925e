//! Workflows: named status transition graphs.
//!
//! A ticket follows the workflow named by its single `workflow:<name>`
//! label. Each edge may carry a hook command that runs synchronously before
//! the status change is staged; a failing hook aborts the change.
//!
//! The [`WorkflowStore`] is built once (from the built-in table or the
//! `workflows` config ref) and passed in wherever it is needed.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::id::Id;
use crate::label::Label;
use crate::status::Status;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("ticket has no associated workflow")]
    NoWorkflow,

    #[error("ticket has more than one workflow: {}", join_labels(.0))]
    MultipleWorkflows(Vec<Label>),

    #[error("unknown workflow {0}")]
    UnknownWorkflow(Label),

    #[error("invalid transition {from} -> {to} in {workflow}")]
    Invalid {
        workflow: Label,
        from: Status,
        to: Status,
    },

    #[error("hook `{hook}` exited with {}: {stderr}", exit_code_text(.code))]
    HookFailed {
        hook: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("hook `{hook}` could not be started: {source}")]
    HookSpawn {
        hook: String,
        #[source]
        source: std::io::Error,
    },
}

fn join_labels(labels: &[Label]) -> String {
    labels
        .iter()
        .map(Label::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn exit_code_text(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub start: Status,
    pub end: Status,
    /// Shell command run before the status changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

impl Transition {
    const fn edge(start: Status, end: Status) -> Self {
        Self {
            start,
            end,
            hook: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub label: Label,
    #[serde(default = "default_initial_status")]
    pub initial_status: Status,
    pub transitions: Vec<Transition>,
}

const fn default_initial_status() -> Status {
    Status::Proposed
}

impl Workflow {
    /// Statuses reachable from `from` in one step, in declaration order.
    #[must_use]
    pub fn next_states(&self, from: Status) -> Vec<Status> {
        self.transitions
            .iter()
            .filter(|t| t.start == from)
            .map(|t| t.end)
            .collect()
    }

    /// Find the edge `from -> to`. Multi-step moves are never legal.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] if there is no such edge.
    pub fn validate_transition(
        &self,
        from: Status,
        to: Status,
    ) -> Result<&Transition, TransitionError> {
        self.transitions
            .iter()
            .find(|t| t.start == from && t.end == to)
            .ok_or_else(|| TransitionError::Invalid {
                workflow: self.label.clone(),
                from,
                to,
            })
    }

    /// Validate `from -> to` and run the edge's hook, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the edge does not exist or its hook fails.
    pub fn transition(
        &self,
        ticket: &Id,
        from: Status,
        to: Status,
        runner: &dyn HookRunner,
    ) -> Result<(), TransitionError> {
        let edge = self.validate_transition(from, to)?;
        if let Some(hook) = &edge.hook {
            let ctx = HookContext { ticket, from, to };
            runner.run(hook, &ctx)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WorkflowStore
// ---------------------------------------------------------------------------

/// Immutable registry of workflows keyed by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStore {
    workflows: Vec<Workflow>,
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl WorkflowStore {
    #[must_use]
    pub const fn new(workflows: Vec<Workflow>) -> Self {
        Self { workflows }
    }

    /// The workflows available without any configuration.
    #[must_use]
    pub fn builtin() -> Self {
        use Status::{Accepted, Done, InProgress, InReview, Merged, Proposed, Reviewed, Vetted};

        let default = Workflow {
            label: Label::from("workflow:default"),
            initial_status: Proposed,
            transitions: vec![
                Transition::edge(Proposed, Vetted),
                Transition::edge(Vetted, Proposed),
                Transition::edge(Vetted, InProgress),
                Transition::edge(InProgress, InReview),
                Transition::edge(InReview, InProgress),
                Transition::edge(InReview, Reviewed),
                Transition::edge(Reviewed, Accepted),
                Transition::edge(Accepted, Merged),
            ],
        };
        let eng = Workflow {
            label: Label::from("workflow:eng"),
            initial_status: Proposed,
            transitions: vec![
                Transition::edge(Proposed, Vetted),
                Transition::edge(Vetted, Proposed),
                Transition::edge(Vetted, InProgress),
                Transition::edge(InProgress, InReview),
                Transition::edge(InReview, InProgress),
                Transition::edge(InReview, Reviewed),
                Transition::edge(Reviewed, InProgress),
                Transition::edge(Reviewed, Accepted),
                Transition::edge(Accepted, Merged),
                Transition::edge(Merged, Accepted),
                Transition::edge(Merged, Done),
            ],
        };
        Self::new(vec![default, eng])
    }

    /// Parse the JSON list stored in the `workflows` config ref.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the blob is not a list of workflows.
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        let workflows: Vec<Workflow> =
            serde_json::from_slice(data).map_err(|source| ConfigError::Parse {
                name: "workflows".to_string(),
                source,
            })?;
        Ok(Self::new(workflows))
    }

    #[must_use]
    pub fn get(&self, label: &Label) -> Option<&Workflow> {
        self.workflows.iter().find(|w| &w.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.iter()
    }

    /// The workflow selected by a ticket's labels.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::NoWorkflow`] or
    /// [`TransitionError::MultipleWorkflows`] unless exactly one workflow
    /// label is present, and [`TransitionError::UnknownWorkflow`] if that
    /// label is not in the store.
    pub fn for_labels<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a Label>,
    ) -> Result<&Workflow, TransitionError> {
        let found: Vec<&Label> = labels.into_iter().filter(|l| l.is_workflow()).collect();
        match found.as_slice() {
            [] => Err(TransitionError::NoWorkflow),
            [label] => self
                .get(label)
                .ok_or_else(|| TransitionError::UnknownWorkflow((*label).clone())),
            many => Err(TransitionError::MultipleWorkflows(
                many.iter().map(|l| (*l).clone()).collect(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// What a hook is told about the transition it guards.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub ticket: &'a Id,
    pub from: Status,
    pub to: Status,
}

/// Runs transition hooks. Blocks until the hook finishes.
pub trait HookRunner {
    /// Run `hook` for the transition described by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::HookFailed`] or
    /// [`TransitionError::HookSpawn`] when the hook does not succeed.
    fn run(&self, hook: &str, ctx: &HookContext<'_>) -> Result<(), TransitionError>;
}

/// Runs hooks with `<shell> -c <hook>`, passing `TICKET_ID`, `TICKET_FROM`
/// and `TICKET_TO` in the environment.
#[derive(Debug, Clone)]
pub struct ShellHookRunner {
    shell: String,
}

impl Default for ShellHookRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ShellHookRunner {
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl HookRunner for ShellHookRunner {
    fn run(&self, hook: &str, ctx: &HookContext<'_>) -> Result<(), TransitionError> {
        debug!(hook, ticket = %ctx.ticket.human(), from = %ctx.from, to = %ctx.to, "running hook");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(hook)
            .env("TICKET_ID", ctx.ticket.as_str())
            .env("TICKET_FROM", ctx.from.as_str())
            .env("TICKET_TO", ctx.to.as_str())
            .output()
            .map_err(|source| TransitionError::HookSpawn {
                hook: hook.to_string(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(hook, code = ?output.status.code(), "transition hook failed");
        Err(TransitionError::HookFailed {
            hook: hook.to_string(),
            code: output.status.code(),
            stderr,
        })
    }
}

/// Skips every hook. Used when hooks are disabled in the project config.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl HookRunner for NoHooks {
    fn run(&self, hook: &str, _ctx: &HookContext<'_>) -> Result<(), TransitionError> {
        debug!(hook, "hooks disabled, skipping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        fail: bool,
    }

    impl HookRunner for Recorder {
        fn run(&self, hook: &str, ctx: &HookContext<'_>) -> Result<(), TransitionError> {
            self.calls
                .borrow_mut()
                .push(format!("{hook}:{}->{}", ctx.from, ctx.to));
            if self.fail {
                return Err(TransitionError::HookFailed {
                    hook: hook.to_string(),
                    code: Some(1),
                    stderr: String::new(),
                });
            }
            Ok(())
        }
    }

    fn eng() -> Workflow {
        WorkflowStore::builtin()
            .get(&Label::from("workflow:eng"))
            .cloned()
            .expect("eng workflow")
    }

    #[test]
    fn eng_next_states() {
        let wf = eng();
        assert_eq!(wf.next_states(Status::Proposed), vec![Status::Vetted]);
        assert_eq!(
            wf.next_states(Status::Merged),
            vec![Status::Accepted, Status::Done]
        );
        assert!(wf.next_states(Status::Done).is_empty());
    }

    #[test]
    fn next_states_keep_declaration_order() {
        let wf = Workflow {
            label: Label::from("workflow:x"),
            initial_status: Status::Proposed,
            transitions: vec![
                Transition::edge(Status::Proposed, Status::Done),
                Transition::edge(Status::Proposed, Status::Vetted),
            ],
        };
        assert_eq!(
            wf.next_states(Status::Proposed),
            vec![Status::Done, Status::Vetted]
        );
    }

    #[test]
    fn no_multi_hop_transitions() {
        for wf in WorkflowStore::builtin().iter() {
            assert!(matches!(
                wf.validate_transition(Status::Proposed, Status::Merged),
                Err(TransitionError::Invalid { .. })
            ));
        }
        assert!(eng().validate_transition(Status::Proposed, Status::Vetted).is_ok());
    }

    #[test]
    fn hooks_run_only_on_their_edge() {
        let mut wf = eng();
        wf.transitions[0].hook = Some("check".to_string());
        let id = Id::derive(b"t");

        let rec = Recorder::default();
        wf.transition(&id, Status::Proposed, Status::Vetted, &rec)
            .expect("transition");
        wf.transition(&id, Status::Vetted, Status::InProgress, &rec)
            .expect("transition");
        assert_eq!(*rec.calls.borrow(), vec!["check:proposed->vetted"]);

        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        assert!(matches!(
            wf.transition(&id, Status::Proposed, Status::Vetted, &failing),
            Err(TransitionError::HookFailed { .. })
        ));
    }

    #[test]
    fn store_lookup_by_labels() {
        let store = WorkflowStore::builtin();
        let eng = Label::from("workflow:eng");
        let default = Label::from("workflow:default");
        let bug = Label::from("bug");

        assert_eq!(store.for_labels([&bug, &eng]).expect("wf").label, eng);
        assert!(matches!(
            store.for_labels([&bug]),
            Err(TransitionError::NoWorkflow)
        ));
        assert!(matches!(
            store.for_labels([&eng, &default]),
            Err(TransitionError::MultipleWorkflows(_))
        ));
        assert!(matches!(
            store.for_labels([&Label::from("workflow:nope")]),
            Err(TransitionError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn store_from_json() {
        let json = br#"[{"label":"workflow:qa","transitions":[
            {"start":"proposed","end":"done","hook":"true"}]}]"#;
        let store = WorkflowStore::from_json(json).expect("parse");
        let wf = store.get(&Label::from("workflow:qa")).expect("qa");
        assert_eq!(wf.initial_status, Status::Proposed);
        assert_eq!(wf.transitions[0].hook.as_deref(), Some("true"));
        assert!(WorkflowStore::from_json(b"{").is_err());
    }

    #[test]
    fn shell_runner_reports_exit_status() {
        if std::process::Command::new("sh").arg("-c").arg("true").status().is_err() {
            return;
        }
        let runner = ShellHookRunner::default();
        let id = Id::derive(b"t");
        let ctx = HookContext {
            ticket: &id,
            from: Status::Merged,
            to: Status::Done,
        };
        runner
            .run("test \"$TICKET_FROM-$TICKET_TO\" = merged-done", &ctx)
            .expect("hook sees its environment");
        assert!(matches!(
            runner.run("exit 3", &ctx),
            Err(TransitionError::HookFailed { code: Some(3), .. })
        ));
    }
}
