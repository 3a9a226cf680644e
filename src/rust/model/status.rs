// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Structures
//======================================================================================================================

/// Model status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModelStatus {
    Uninit,
    Loading,
    Running,
    /// Running, with a completed iteration that has not been reported yet.
    EndGraphPending,
    Aborting,
    Destroying,
    Released,
}

/// Operations gated by the model status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModelOperation {
    Load,
    LoadDone,
    Execute,
    EndGraph,
    TaskReport,
    Abort,
    Destroy,
    Release,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ModelStatus {
    /// Returns the status that results from applying `op` in the current status, or `None` if `op` is not allowed.
    pub fn transition(self, op: ModelOperation) -> Option<ModelStatus> {
        use ModelOperation as Op;
        use ModelStatus::*;
        match (self, op) {
            (Uninit, Op::Load) => Some(Loading),
            (Loading, Op::LoadDone) => Some(Running),
            (Running, Op::Execute) => Some(Running),
            (EndGraphPending, Op::Execute) => Some(EndGraphPending),
            (Running, Op::EndGraph) | (EndGraphPending, Op::EndGraph) => Some(EndGraphPending),
            (Running, Op::TaskReport) | (EndGraphPending, Op::TaskReport) => Some(Running),
            (Loading, Op::Abort) | (Running, Op::Abort) | (EndGraphPending, Op::Abort) => Some(Aborting),
            (Released, Op::Destroy) | (Destroying, Op::Destroy) => None,
            (_, Op::Destroy) => Some(Destroying),
            (Aborting, Op::Release) | (Destroying, Op::Release) => Some(Released),
            _ => None,
        }
    }

    /// Whether streams of a model in this status may run.
    pub fn is_active(self) -> bool {
        matches!(self, ModelStatus::Running | ModelStatus::EndGraphPending)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
