//! AI pipeline tasks: narrative generation, matching, and user modeling.

use hakobi_core::{RegisterError, TaskRegistry};

pub(super) const TASK_NAMES: &[&str] = &[
    "generate_narratives",
    "generate_newsletter",
    "find_matches",
    "process_match_feedback",
    "update_user_embeddings",
    "generate_clarifier_questions",
];

pub fn register(registry: &mut TaskRegistry) -> Result<(), RegisterError> {
    for &name in TASK_NAMES {
        registry.register_task(name, super::stub(name), super::options("ai"))?;
    }
    Ok(())
}
