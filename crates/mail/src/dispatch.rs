//! Downstream task queue port
//!
//! Submission is fire-and-forget: the engine only learns whether the task
//! was accepted, never whether it was processed.

use anyhow::{Result, anyhow};
use std::sync::Mutex;

use crate::models::task::{DEFAULT_PRIORITY, DEFAULT_QUEUE, PROCESS_SINGLE_EMAIL_TASK};
use crate::models::{DispatchTask, TaskHandle};

/// Trait for submitting dispatch tasks to the downstream queue
pub trait DispatchSink: Send + Sync {
    /// Enqueue a task; errors are reported synchronously
    fn submit(&self, task: DispatchTask) -> Result<TaskHandle>;
}

/// A task as held by a queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub handle: TaskHandle,
    pub task_name: String,
    pub queue: String,
    pub priority: u8,
    pub task: DispatchTask,
}

impl QueuedTask {
    /// Wrap a task with the default routing for incoming mail
    pub fn incoming(handle: TaskHandle, task: DispatchTask) -> Self {
        Self {
            handle,
            task_name: PROCESS_SINGLE_EMAIL_TASK.to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            priority: DEFAULT_PRIORITY,
            task,
        }
    }
}

/// In-memory queue, mainly for tests
#[derive(Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<QueuedTask>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queued tasks, in submission order
    pub fn tasks(&self) -> Vec<QueuedTask> {
        self.tasks
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DispatchSink for InMemoryTaskQueue {
    fn submit(&self, task: DispatchTask) -> Result<TaskHandle> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("task queue lock poisoned"))?;
        let handle = TaskHandle::new(format!("task-{}", tasks.len() + 1));
        tasks.push(QueuedTask::incoming(handle.clone(), task));
        Ok(handle)
    }
}
