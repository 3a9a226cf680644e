// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    event_wait::WaitKind,
    kernel::TaskOutcome,
    model::descriptor::{
        AicpuTaskInfo,
        StreamInfo,
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        StreamId,
    },
};
use ::std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Execution state of a stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    Runnable,
    Suspended,
    Completed,
    Failed,
}

/// Result of executing one task, as seen by the owning model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepResult {
    /// Keep executing this stream.
    Continue,
    /// Continue on another stream.
    Switch(StreamId),
    /// The task waits on a key of the owning model. The cursor already points past it.
    Wait { kind: WaitKind, aux: u32 },
    /// The task completed an iteration of the graph. The cursor already points past it.
    EndGraph,
    /// The stream is suspended.
    Suspended,
    /// The stream has ended.
    StreamEnd,
}

/// A task handed out by [AicpuStream::take_next_task]. Its kernel runs without the stream lock held and the result
/// goes back through [AicpuStream::finish_task].
#[derive(Clone, Debug)]
pub struct ClaimedTask {
    pub index: usize,
    pub task: Arc<AicpuTaskInfo>,
}

/// What a stream has to run next.
#[derive(Clone, Debug)]
pub enum NextTask {
    Run(ClaimedTask),
    /// A task of the stream is already running on another thread.
    Busy,
    /// Nothing to run.
    Idle(StepResult),
}

/// An ordered sequence of tasks executed one at a time.
pub struct AicpuStream {
    stream_id: StreamId,
    tasks: Vec<Arc<AicpuTaskInfo>>,
    cursor: usize,
    state: StreamState,
    running: bool,
    suspended_at: Option<Instant>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AicpuStream {
    pub fn new(info: StreamInfo) -> Self {
        Self {
            stream_id: info.stream_id,
            tasks: info.tasks.into_iter().map(Arc::new).collect(),
            cursor: 0,
            state: StreamState::Runnable,
            running: false,
            suspended_at: None,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Claims the task at the cursor. The stream stays claimed until [AicpuStream::finish_task] is called.
    pub fn take_next_task(&mut self) -> NextTask {
        if self.running {
            return NextTask::Busy;
        }
        match self.state {
            StreamState::Runnable => (),
            StreamState::Suspended => return NextTask::Idle(StepResult::Suspended),
            StreamState::Completed | StreamState::Failed => return NextTask::Idle(StepResult::StreamEnd),
        }
        if self.cursor >= self.tasks.len() {
            self.complete();
            return NextTask::Idle(StepResult::StreamEnd);
        }
        self.running = true;
        NextTask::Run(ClaimedTask {
            index: self.cursor,
            task: self.tasks[self.cursor].clone(),
        })
    }

    /// Applies the result of a claimed task and moves the cursor accordingly.
    pub fn finish_task(
        &mut self,
        claimed: &ClaimedTask,
        result: Result<TaskOutcome, Fail>,
    ) -> Result<StepResult, Fail> {
        self.running = false;
        if self.state != StreamState::Runnable {
            let cause: String = format!(
                "stream stopped while its task ran (stream={}, task_id={}, state={:?})",
                self.stream_id, claimed.task.task_id, self.state
            );
            warn!("finish_task(): {}", cause);
            return Err(Fail::new(ErrorCode::Canceled, &cause));
        }
        let outcome: TaskOutcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "finish_task(): task failed (stream={}, task_id={}, error={:?})",
                    self.stream_id, claimed.task.task_id, e
                );
                self.state = StreamState::Failed;
                return Err(e);
            },
        };

        match outcome {
            TaskOutcome::Next => Ok(self.advance()),
            TaskOutcome::Goto(index) => {
                if index >= self.tasks.len() {
                    let cause: String = format!(
                        "goto target out of range (stream={}, index={}, task_count={})",
                        self.stream_id,
                        index,
                        self.tasks.len()
                    );
                    error!("finish_task(): {}", cause);
                    self.state = StreamState::Failed;
                    return Err(Fail::new(ErrorCode::TaskIndexInvalid, &cause));
                }
                self.cursor = index;
                Ok(StepResult::Continue)
            },
            TaskOutcome::SwitchStream(target) => {
                self.cursor += 1;
                if self.cursor >= self.tasks.len() {
                    self.complete();
                }
                Ok(StepResult::Switch(target))
            },
            TaskOutcome::Suspend => {
                self.cursor += 1;
                self.suspend();
                Ok(StepResult::Suspended)
            },
            TaskOutcome::WaitEvent { kind, aux } => {
                self.cursor += 1;
                Ok(StepResult::Wait { kind, aux })
            },
            TaskOutcome::EndGraph => {
                self.cursor += 1;
                Ok(StepResult::EndGraph)
            },
            TaskOutcome::StreamEnd => {
                self.complete();
                Ok(StepResult::StreamEnd)
            },
        }
    }

    /// Marks the stream as suspended.
    pub fn suspend(&mut self) {
        self.state = StreamState::Suspended;
        self.suspended_at = Some(Instant::now());
    }

    /// Resumes a suspended stream at its cursor. Returns false if the stream was not suspended.
    pub fn resume(&mut self) -> bool {
        if self.state != StreamState::Suspended {
            return false;
        }
        self.state = StreamState::Runnable;
        self.suspended_at = None;
        true
    }

    /// Prepares the stream for a run. A finished stream restarts from its first task; a runnable stream keeps its
    /// cursor. Returns false if the stream is suspended.
    pub fn activate(&mut self) -> bool {
        match self.state {
            StreamState::Suspended => false,
            StreamState::Completed | StreamState::Failed => {
                self.cursor = 0;
                self.state = StreamState::Runnable;
                true
            },
            StreamState::Runnable => true,
        }
    }

    /// Marks the stream as failed, for example when its model is torn down.
    pub fn fail(&mut self) {
        self.state = StreamState::Failed;
        self.suspended_at = None;
    }

    /// How long the stream has been suspended, if it is.
    pub fn suspended_for(&self, now: Instant) -> Option<Duration> {
        self.suspended_at.map(|at| now.saturating_duration_since(at))
    }

    fn advance(&mut self) -> StepResult {
        self.cursor += 1;
        if self.cursor >= self.tasks.len() {
            self.complete();
            return StepResult::StreamEnd;
        }
        StepResult::Continue
    }

    fn complete(&mut self) {
        self.state = StreamState::Completed;
        self.suspended_at = None;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
