use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

/// Identifier assigned to every accepted task, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A queued unit of work.
pub(crate) struct Task {
    id: TaskId,
    job: Job,
}

impl Task {
    pub(crate) fn new(id: TaskId, job: Job) -> Self {
        Self { id, job }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Run the job, turning a panic into its message.
    pub(crate) fn run(self) -> Result<(), String> {
        let job = self.job;
        panic::catch_unwind(AssertUnwindSafe(job))
            .map_err(|payload| crate::panic::message(payload.as_ref()))
    }
}
