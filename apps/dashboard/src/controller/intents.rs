//! Parsing of typed user intents and their translation into backend commands.

use shared::{
    domain::{ActionType, InvoiceId, TaskId},
    protocol::PendingTask,
};

use crate::backend_bridge::commands::BackendCommand;

pub const HELP: &str = "\
commands:
  approve [task|#n] [notes...]      approve a pending task
  reject [task|#n] [notes...]       reject a pending task (asks for confirmation)
  suggest-edit <step|-> <notes...>  record a suggested edit for a step
  explain [regen]                   show (or regenerate) the explanation
  open <invoice>                    switch to another invoice
  refresh                           reload tasks and reconnect the stream
  help | quit";

/// Which pending task an action targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    Id(TaskId),
    /// 1-based position in the rendered task list.
    Index(usize),
    /// The single pending task of the open invoice.
    Only,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Act {
        action: ActionType,
        task: TaskRef,
        notes: Option<String>,
    },
    SuggestEdit {
        step_id: Option<String>,
        notes: String,
    },
    Explain {
        regenerate: bool,
    },
    Open(InvoiceId),
    Refresh,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_intent(line: &str) -> Result<Option<Intent>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let intent = match verb.to_ascii_lowercase().as_str() {
        "approve" | "a" => parse_act(ActionType::Approve, &rest),
        "reject" => parse_act(ActionType::Reject, &rest),
        "suggest-edit" | "suggest_edit" | "edit" => {
            let Some((step, notes)) = rest.split_first() else {
                return Err("usage: suggest-edit <step|-> <notes...>".to_string());
            };
            if notes.is_empty() {
                return Err("suggest-edit needs notes describing the edit".to_string());
            }
            Intent::SuggestEdit {
                step_id: (*step != "-").then(|| step.to_string()),
                notes: notes.join(" "),
            }
        }
        "explain" => Intent::Explain {
            regenerate: rest
                .first()
                .is_some_and(|arg| matches!(*arg, "regen" | "regenerate" | "--regenerate")),
        },
        "open" => match rest.as_slice() {
            [invoice] => Intent::Open(InvoiceId::new(*invoice)),
            _ => return Err("usage: open <invoice>".to_string()),
        },
        "refresh" | "r" => Intent::Refresh,
        "help" | "?" => Intent::Help,
        "quit" | "q" | "exit" => Intent::Quit,
        other => return Err(format!("unknown command '{other}'; type help")),
    };
    Ok(Some(intent))
}

fn parse_act(action: ActionType, rest: &[&str]) -> Intent {
    let Some((first, notes)) = rest.split_first() else {
        return Intent::Act {
            action,
            task: TaskRef::Only,
            notes: None,
        };
    };
    let first: &str = first;
    let index = first.strip_prefix('#').unwrap_or(first).parse::<usize>().ok();
    let task = match index {
        Some(index) => TaskRef::Index(index),
        None => TaskRef::Id(TaskId::new(first)),
    };
    Intent::Act {
        action,
        task,
        notes: (!notes.is_empty()).then(|| notes.join(" ")),
    }
}

pub fn resolve_task(
    task: &TaskRef,
    tasks: &[PendingTask],
    invoice_id: Option<&InvoiceId>,
) -> Result<TaskId, String> {
    match task {
        TaskRef::Id(id) => Ok(id.clone()),
        TaskRef::Index(index) => index
            .checked_sub(1)
            .and_then(|index| tasks.get(index))
            .map(|task| task.id.clone())
            .ok_or_else(|| format!("no task #{index}; {} listed", tasks.len())),
        TaskRef::Only => {
            let Some(invoice_id) = invoice_id else {
                return Err("no invoice open; name a task".to_string());
            };
            let mut candidates = tasks.iter().filter(|task| &task.invoice_id == invoice_id);
            match (candidates.next(), candidates.next()) {
                (Some(task), None) => Ok(task.id.clone()),
                (None, _) => Err(format!("no pending task for invoice {invoice_id}")),
                (Some(_), Some(_)) => {
                    Err(format!("several pending tasks for invoice {invoice_id}; name one"))
                }
            }
        }
    }
}

/// Translates a non-local intent into the command for the backend worker.
pub fn to_command(
    intent: Intent,
    tasks: &[PendingTask],
    invoice_id: Option<&InvoiceId>,
) -> Result<BackendCommand, String> {
    match intent {
        Intent::Act {
            action,
            task,
            notes,
        } => Ok(BackendCommand::Act {
            task_id: resolve_task(&task, tasks, invoice_id)?,
            action,
            notes,
        }),
        Intent::SuggestEdit { step_id, notes } => Ok(BackendCommand::SuggestEdit { step_id, notes }),
        Intent::Explain { regenerate } => Ok(BackendCommand::Explain { regenerate }),
        Intent::Open(invoice_id) => Ok(BackendCommand::Open { invoice_id }),
        Intent::Refresh => Ok(BackendCommand::Refresh),
        Intent::Help | Intent::Quit => Err("handled by the view".to_string()),
    }
}

/// Destructive commands must be confirmed at the input boundary before dispatch.
pub fn needs_confirmation(cmd: &BackendCommand) -> bool {
    matches!(cmd, BackendCommand::Act { action, .. } if action.is_destructive())
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
#[path = "../tests/intents_tests.rs"]
mod tests;
