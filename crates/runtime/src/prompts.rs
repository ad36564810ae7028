//! System and task-specification prompts for role-playing sessions.

use crate::session::TerminationMarkers;

/// Names the two sides go by inside the prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleNames {
    pub user: String,
    pub assistant: String,
}

impl Default for RoleNames {
    fn default() -> Self {
        Self {
            user: "user".to_string(),
            assistant: "assistant".to_string(),
        }
    }
}

pub fn user_system_prompt(names: &RoleNames, task: &str, markers: &TerminationMarkers) -> String {
    let RoleNames { user, assistant } = names;
    format!(
        "You are the {user}. You are instructing the {assistant} to complete a task. \
         Never swap roles: you give instructions, the {assistant} carries them out.\n\n\
         Task: {task}\n\n\
         Give one instruction at a time, based on the {assistant}'s previous answer. \
         Check each answer before moving on. When the task is fully complete, reply \
         with {done} only. If the task cannot be completed, reply with {give_up}.",
        done = markers.primary_completion(),
        give_up = markers.primary_give_up(),
    )
}

pub fn assistant_system_prompt(
    names: &RoleNames,
    task: &str,
    markers: &TerminationMarkers,
) -> String {
    let RoleNames { user, assistant } = names;
    format!(
        "You are the {assistant}. The {user} will instruct you to complete a task. \
         Never swap roles: you carry out the {user}'s instructions.\n\n\
         Task: {task}\n\n\
         Answer every instruction with a concrete solution. Use the available tools \
         whenever they help, and base your answers on their results. When the task \
         is complete, give the final answer and end it with {done}.",
        done = markers.primary_completion(),
    )
}

pub fn specify_prompt(names: &RoleNames, task: &str, word_limit: usize) -> String {
    let RoleNames { user, assistant } = names;
    format!(
        "Here is a task that the {assistant} will help the {user} to complete: {task}\n\
         Make it more specific and concrete. Reply with the specified task in \
         {word_limit} words or less. Do not add anything else."
    )
}
