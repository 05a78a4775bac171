//! Queue routing: task name + optional explicit queue -> effective queue.
//!
//! Pure fallback chain, no state: explicit queue, then the task's declared
//! default, then the global default.

/// Queue used when neither the submission nor the task declares one.
pub const DEFAULT_QUEUE: &str = "default";

/// Resolve the effective queue for a submission.
pub fn route<'a>(explicit: Option<&'a str>, task_default: Option<&'a str>) -> &'a str {
    explicit.or(task_default).unwrap_or(DEFAULT_QUEUE)
}

/// Queue names partition the backlog; an empty or padded name would silently
/// create an unserviced partition, so registration rejects them.
pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty() && name.trim() == name
}
