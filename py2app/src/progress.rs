// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reporting build progress.

The builder reports what it does through a [Progress] implementation.
[LogProgress] forwards everything to the `log` crate, which is what the
command line tool uses.
*/

use log::{debug, error, info, trace, warn};

/// Handle for a task registered with [Progress::add_task].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TaskId(usize);

/// Sink for build progress.
pub trait Progress {
    fn info(&mut self, message: &str);

    fn trace(&mut self, message: &str);

    fn warning(&mut self, message: &str);

    /// Report an error. Errors don't stop the build by themselves.
    fn error(&mut self, message: &str);

    /// Start a task with an optional number of expected steps.
    fn add_task(&mut self, name: &str, count: Option<usize>) -> TaskId;

    fn step_task(&mut self, task: TaskId);

    /// Record the item a task is currently working on.
    fn update_task(&mut self, task: TaskId, current: &str);

    fn task_done(&mut self, task: TaskId);

    /// Whether [Progress::error] was called.
    fn have_error(&self) -> bool;
}

#[derive(Clone, Debug)]
struct TaskState {
    name: String,
    count: Option<usize>,
    steps: usize,
}

/// A [Progress] that writes to the `log` facade.
#[derive(Debug, Default)]
pub struct LogProgress {
    tasks: Vec<TaskState>,
    have_error: bool,
}

impl LogProgress {
    fn task(&mut self, task: TaskId) -> Option<&mut TaskState> {
        self.tasks.get_mut(task.0)
    }
}

impl Progress for LogProgress {
    fn info(&mut self, message: &str) {
        info!("{}", message);
    }

    fn trace(&mut self, message: &str) {
        trace!("{}", message);
    }

    fn warning(&mut self, message: &str) {
        warn!("{}", message);
    }

    fn error(&mut self, message: &str) {
        self.have_error = true;
        error!("{}", message);
    }

    fn add_task(&mut self, name: &str, count: Option<usize>) -> TaskId {
        debug!("{}...", name);
        self.tasks.push(TaskState {
            name: name.to_string(),
            count,
            steps: 0,
        });

        TaskId(self.tasks.len() - 1)
    }

    fn step_task(&mut self, task: TaskId) {
        if let Some(state) = self.task(task) {
            state.steps += 1;
            match state.count {
                Some(count) => trace!("{}: {}/{}", state.name, state.steps, count),
                None => trace!("{}: {}", state.name, state.steps),
            }
        }
    }

    fn update_task(&mut self, task: TaskId, current: &str) {
        if let Some(state) = self.task(task) {
            trace!("{}: {}", state.name, current);
        }
    }

    fn task_done(&mut self, task: TaskId) {
        if let Some(state) = self.task(task) {
            info!("{} ({} steps)", state.name, state.steps);
        }
    }

    fn have_error(&self) -> bool {
        self.have_error
    }
}

/// Severity of a message kept by [RecordingProgress].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageLevel {
    Info,
    Trace,
    Warning,
    Error,
}

/// A [Progress] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub messages: Vec<(MessageLevel, String)>,
    /// Task names, in creation order.
    pub tasks: Vec<String>,
    /// Steps taken per task.
    pub steps: Vec<usize>,
    pub finished: Vec<String>,
}

impl RecordingProgress {
    /// Messages of the given level.
    pub fn messages(&self, level: MessageLevel) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.as_str())
            .collect()
    }
}

impl Progress for RecordingProgress {
    fn info(&mut self, message: &str) {
        self.messages.push((MessageLevel::Info, message.to_string()));
    }

    fn trace(&mut self, message: &str) {
        self.messages.push((MessageLevel::Trace, message.to_string()));
    }

    fn warning(&mut self, message: &str) {
        self.messages
            .push((MessageLevel::Warning, message.to_string()));
    }

    fn error(&mut self, message: &str) {
        self.messages.push((MessageLevel::Error, message.to_string()));
    }

    fn add_task(&mut self, name: &str, _count: Option<usize>) -> TaskId {
        self.tasks.push(name.to_string());
        self.steps.push(0);
        TaskId(self.tasks.len() - 1)
    }

    fn step_task(&mut self, task: TaskId) {
        if let Some(steps) = self.steps.get_mut(task.0) {
            *steps += 1;
        }
    }

    fn update_task(&mut self, _task: TaskId, _current: &str) {}

    fn task_done(&mut self, task: TaskId) {
        if let Some(name) = self.tasks.get(task.0) {
            self.finished.push(name.clone());
        }
    }

    fn have_error(&self) -> bool {
        self.messages
            .iter()
            .any(|(level, _)| *level == MessageLevel::Error)
    }
}
