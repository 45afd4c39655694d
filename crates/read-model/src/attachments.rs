use std::collections::BTreeMap;

use remote_gateway::TaskAttachment;

/// Attachments keyed by owning task. Snapshot order is kept within a group.
pub fn group_by_parent(attachments: &[TaskAttachment]) -> BTreeMap<&str, Vec<&TaskAttachment>> {
    let mut groups: BTreeMap<&str, Vec<&TaskAttachment>> = BTreeMap::new();
    for attachment in attachments {
        groups
            .entry(attachment.task_id.as_str())
            .or_default()
            .push(attachment);
    }
    groups
}
