// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    dump::{
        memory::DeviceMemory,
        op_mapping::{
            AddressKind,
            FftsContext,
            MemRange,
            OpMappingInfo,
            OpMappingTask,
            TaskType,
            TensorDesc,
        },
        sink::{
            DumpSink,
            DumpTarget,
            DumpWriter,
            TensorKind,
            TensorRecord,
        },
        step::DumpStep,
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        limits::MAX_DIM_NUM,
        ModelId,
    },
};
use ::arrayvec::ArrayVec;
use ::std::collections::BTreeMap;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Addresses of the step counters. Zero means not configured.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StepAddrs {
    pub step_id: u64,
    pub iterations_per_loop: u64,
    pub loop_cond: u64,
}

/// Dump descriptor of one task.
#[derive(Debug)]
pub struct OpDumpTask {
    target: DumpTarget,
    task_type: TaskType,
    inputs: Vec<TensorDesc>,
    outputs: Vec<TensorDesc>,
    workspaces: Vec<MemRange>,
    contexts: BTreeMap<(u32, u32), FftsContext>,
    step: DumpStep,
    step_addrs: StepAddrs,
}

/// A tensor resolved to the address range that will be copied.
struct PlannedTensor {
    record: TensorRecord,
    address: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl OpDumpTask {
    pub fn new(info: &OpMappingInfo, task: OpMappingTask, step: DumpStep) -> Self {
        let contexts: BTreeMap<(u32, u32), FftsContext> = task
            .contexts
            .into_iter()
            .map(|c| ((c.context_id, c.thread_id), c))
            .collect();
        Self {
            target: DumpTarget {
                model_id: info.model_id,
                model_name: info.model_name.clone(),
                dump_path: info.dump_path.clone(),
                op_name: task.op_name,
                op_type: task.op_type,
                stream_id: task.stream_id,
                task_id: task.task_id,
                context: None,
            },
            task_type: task.task_type,
            inputs: task.inputs,
            outputs: task.outputs,
            workspaces: task.workspaces,
            contexts,
            step,
            step_addrs: StepAddrs {
                step_id: info.step_id_addr,
                iterations_per_loop: info.iterations_per_loop_addr,
                loop_cond: info.loop_cond_addr,
            },
        }
    }

    pub fn model_id(&self) -> ModelId {
        self.target.model_id
    }

    pub fn stream_id(&self) -> u32 {
        self.target.stream_id
    }

    pub fn task_id(&self) -> u32 {
        self.target.task_id
    }

    pub fn op_name(&self) -> &str {
        &self.target.op_name
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Evaluates the dump step gate against the live step counters.
    pub fn should_dump(&self, memory: &dyn DeviceMemory) -> Result<bool, Fail> {
        if self.step.is_empty() {
            return Ok(true);
        }
        if self.step_addrs.step_id == 0 {
            let cause: String = format!(
                "dump step set but step id address missing (stream={}, task={})",
                self.stream_id(),
                self.task_id()
            );
            error!("should_dump(): {}", cause);
            return Err(Fail::new(ErrorCode::DumpFailed, &cause));
        }
        let mut step: u64 = memory.read_u64(self.step_addrs.step_id)?;
        if self.step_addrs.iterations_per_loop != 0 && self.step_addrs.loop_cond != 0 {
            let iterations_per_loop: u64 = memory.read_u64(self.step_addrs.iterations_per_loop)?;
            let loop_cond: u64 = memory.read_u64(self.step_addrs.loop_cond)?;
            step = step.saturating_mul(iterations_per_loop).saturating_add(loop_cond);
        }
        let hit: bool = self.step.contains(step);
        trace!("should_dump(): stream={} task={} step={} hit={}", self.stream_id(), self.task_id(), step, hit);
        Ok(hit)
    }

    /// Copies the task's tensors into `sink`, at most `staging_size` bytes at a time. `context` selects the addresses
    /// of an FFTS-plus sub-context and sub-thread. Returns the number of tensors captured.
    pub fn dump(
        &self,
        context: Option<(u32, u32)>,
        memory: &dyn DeviceMemory,
        sink: &dyn DumpSink,
        staging_size: usize,
    ) -> Result<usize, Fail> {
        if !self.should_dump(memory)? {
            return Ok(0);
        }

        let ffts: Option<&FftsContext> = match (self.task_type, context) {
            (TaskType::FftsPlus, Some(key)) => match self.contexts.get(&key) {
                Some(ffts) => Some(ffts),
                None => {
                    debug!(
                        "dump(): no sub-context (stream={}, task={}, context={:?})",
                        self.stream_id(),
                        self.task_id(),
                        key
                    );
                    return Ok(0);
                },
            },
            _ => None,
        };

        let plan: Vec<PlannedTensor> = self.plan(ffts, memory)?;
        if plan.is_empty() {
            debug!("dump(): nothing to capture (stream={}, task={})", self.stream_id(), self.task_id());
            return Ok(0);
        }

        let mut target: DumpTarget = self.target.clone();
        target.context = ffts.map(|c| (c.context_id, c.thread_id));
        let largest: u64 = plan.iter().map(|t| t.record.size).max().unwrap_or(0);
        let mut staging: Vec<u8> = vec![0; staging_size.max(1).min(largest as usize)];

        let mut writer: Box<dyn DumpWriter> = sink.open(&target)?;
        for tensor in &plan {
            writer.begin_tensor(&tensor.record)?;
            let mut copied: u64 = 0;
            while copied < tensor.record.size {
                let len: usize = staging.len().min((tensor.record.size - copied) as usize);
                memory.read(tensor.address + copied, &mut staging[..len])?;
                writer.write(&staging[..len])?;
                copied += len as u64;
            }
        }
        writer.finish()?;
        debug!(
            "dump(): captured {} tensors (model={}, op={:?}, stream={}, task={})",
            plan.len(),
            self.model_id(),
            self.op_name(),
            self.stream_id(),
            self.task_id()
        );
        Ok(plan.len())
    }

    fn plan(&self, ffts: Option<&FftsContext>, memory: &dyn DeviceMemory) -> Result<Vec<PlannedTensor>, Fail> {
        let mut plan: Vec<PlannedTensor> = Vec::new();
        for (kind, tensors, overrides) in [
            (TensorKind::Input, &self.inputs, ffts.map(|c| &c.inputs)),
            (TensorKind::Output, &self.outputs, ffts.map(|c| &c.outputs)),
        ] {
            for (index, tensor) in tensors.iter().enumerate() {
                let address: Option<u64> = match overrides {
                    // Sub-context ranges are already resolved.
                    Some(ranges) => match ranges.get(index) {
                        Some(range) if range.address != 0 && range.size != 0 => {
                            plan.push(PlannedTensor {
                                record: Self::record(kind, index, tensor, range.size),
                                address: range.address,
                            });
                            continue;
                        },
                        _ => None,
                    },
                    None => self.resolve(tensor, memory)?,
                };
                if let Some(address) = address {
                    plan.push(PlannedTensor {
                        record: Self::record(kind, index, tensor, tensor.size),
                        address,
                    });
                }
            }
        }
        for (index, workspace) in self.workspaces.iter().enumerate() {
            if workspace.address == 0 || workspace.size == 0 {
                continue;
            }
            let mut dims: ArrayVec<i64, MAX_DIM_NUM> = ArrayVec::new();
            dims.push(workspace.size as i64);
            plan.push(PlannedTensor {
                record: TensorRecord {
                    kind: TensorKind::Workspace,
                    index: index as u32,
                    data_type: 0,
                    format: 0,
                    dims,
                    size: workspace.size,
                },
                address: workspace.address,
            });
        }
        Ok(plan)
    }

    /// Resolves the address of the data of `tensor`, or `None` if the tensor is skipped.
    fn resolve(&self, tensor: &TensorDesc, memory: &dyn DeviceMemory) -> Result<Option<u64>, Fail> {
        if tensor.address == 0 || tensor.size == 0 {
            return Ok(None);
        }
        let base: u64 = match tensor.address_kind {
            AddressKind::Direct => tensor.address,
            AddressKind::Indirect => match memory.read_u64(tensor.address)? {
                0 => return Ok(None),
                pointer => pointer,
            },
        };
        match base
            .checked_add(tensor.offset)
            .filter(|start| start.checked_add(tensor.size).is_some())
        {
            Some(address) => Ok(Some(address)),
            None => {
                let cause: String = format!(
                    "tensor range overflows (stream={}, task={}, base={:#x}, offset={}, size={})",
                    self.stream_id(),
                    self.task_id(),
                    base,
                    tensor.offset,
                    tensor.size
                );
                error!("resolve(): {}", cause);
                Err(Fail::new(ErrorCode::DumpFailed, &cause))
            },
        }
    }

    fn record(kind: TensorKind, index: usize, tensor: &TensorDesc, size: u64) -> TensorRecord {
        TensorRecord {
            kind,
            index: index as u32,
            data_type: tensor.data_type,
            format: tensor.format,
            dims: tensor.dims.clone(),
            size,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
