use std::collections::BTreeMap;

use remote_gateway::{Task, WorkStatus};

/// Case-insensitive substring match over title and description.
/// The query is used as typed, surrounding spaces included. An empty query
/// matches every task.
pub fn search_tasks<'a>(tasks: &'a [Task], query: &str) -> Vec<&'a Task> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return tasks.iter().collect();
    }
    tasks
        .iter()
        .filter(|task| {
            task.title.to_lowercase().contains(&needle)
                || task.description.to_lowercase().contains(&needle)
        })
        .collect()
}

pub fn tasks_with_status(tasks: &[Task], status: WorkStatus) -> Vec<&Task> {
    tasks.iter().filter(|task| task.status == status).collect()
}

/// Task count per status. Every status is present, possibly with zero.
pub fn count_by_status(tasks: &[Task]) -> BTreeMap<WorkStatus, usize> {
    let mut counts: BTreeMap<WorkStatus, usize> =
        WorkStatus::ALL.iter().map(|status| (*status, 0)).collect();
    for task in tasks {
        *counts.entry(task.status).or_insert(0) += 1;
    }
    counts
}
