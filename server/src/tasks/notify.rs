//! Pushes triggered by task assignment.
//!
//! Delivery is best-effort: an offline assignee simply misses the push and
//! the calling route never fails because of it.

use crate::ws::broadcast::send_event_to_user;
use crate::ws::protocol::{OutboundEvent, TaskAssigned};
use crate::ws::ConnectionRegistry;

pub const MSG_NEW_TASK: &str = "You have been assigned a new task.";
pub const MSG_REASSIGNED: &str = "A task has been assigned to you.";

/// Push `task_assigned` to `assignee` if they have an open channel.
pub fn notify_task_assigned(
    registry: &ConnectionRegistry,
    assignee: &str,
    task_id: &str,
    title: &str,
    message: &str,
) -> bool {
    let event = OutboundEvent::TaskAssigned(TaskAssigned {
        task_id: task_id.to_string(),
        title: title.to_string(),
        message: message.to_string(),
    });

    let delivered = send_event_to_user(registry, assignee, &event);
    if !delivered {
        tracing::debug!(user_id = %assignee, task_id = %task_id, "Assignee offline, task_assigned dropped");
    }
    delivered
}
