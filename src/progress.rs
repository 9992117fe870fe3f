// Progress arithmetic shared by enrollments and lab runs.

/// `round(100 * completed / max(1, total))`, clamped to `[0, 100]`.
///
/// Rounds half up, so 1 of 8 is 13 and 1 of 3 is 33.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    let total = total.max(1) as u128;
    let completed = completed as u128;
    let rounded = (200 * completed + total) / (2 * total);
    rounded.min(100) as u8
}

/// Clamps a step index into `[0, total_steps - 1]`; 0 when there are no steps.
pub fn clamp_step_index(index: usize, total_steps: usize) -> usize {
    index.min(total_steps.saturating_sub(1))
}

pub fn composite_key(learner_id: &str, entity_id: &str) -> String {
    format!("{learner_id}:{entity_id}")
}
