// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Op mapping message codec.
//!
//! The message tells the scheduler which tensors belong to which task so that they can be captured later. All integers
//! are little-endian and strings carry a `u32` length prefix.
//!
//! ```text
//! message : magic flag model_id model_name dump_path dump_step step_id_addr iterations_per_loop_addr
//!           loop_cond_addr task_count task*
//! task    : stream_id task_id task_type op_name op_type
//!           input_count tensor* output_count tensor* workspace_count workspace* context_count context*
//! tensor  : data_type format dim_count dim* address size offset address_kind
//! context : context_id thread_id input_count range* output_count range*
//! range   : address size
//! ```

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        ErrorCode,
        Fail,
    },
    limits::{
        MAX_DIM_NUM,
        MAX_TASK_COUNT_PER_MODEL,
    },
    wire::{
        WireReader,
        WireWriter,
    },
    ModelId,
};
use ::arrayvec::ArrayVec;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const OP_MAPPING_MAGIC: u32 = 0x4F50_4D50;

const MAX_TENSORS_PER_TASK: usize = 1024;
const MAX_CONTEXTS_PER_TASK: usize = 4096;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Whether the message installs or removes the mappings of a model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MappingFlag {
    Unload = 0,
    Load = 1,
}

/// Addressing scheme of a task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskType {
    Normal = 0,
    FftsPlus = 1,
}

/// How a tensor address is interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressKind {
    /// Data lives at `address + offset`.
    Direct = 0,
    /// `address` holds a pointer; data lives at `*address + offset`.
    Indirect = 1,
}

/// Tensor descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TensorDesc {
    pub data_type: u32,
    pub format: u32,
    pub dims: ArrayVec<i64, MAX_DIM_NUM>,
    pub address: u64,
    pub size: u64,
    pub offset: u64,
    pub address_kind: AddressKind,
}

/// Address range.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MemRange {
    pub address: u64,
    pub size: u64,
}

/// Per sub-context, per sub-thread addresses of an FFTS-plus task. Entry `i` overrides the address and size of
/// tensor `i` of the task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FftsContext {
    pub context_id: u32,
    pub thread_id: u32,
    pub inputs: Vec<MemRange>,
    pub outputs: Vec<MemRange>,
}

/// One task of an op mapping message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpMappingTask {
    pub stream_id: u32,
    pub task_id: u32,
    pub task_type: TaskType,
    pub op_name: String,
    pub op_type: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub workspaces: Vec<MemRange>,
    pub contexts: Vec<FftsContext>,
}

/// Decoded op mapping message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpMappingInfo {
    pub flag: MappingFlag,
    pub model_id: ModelId,
    pub model_name: String,
    /// Output directory. Empty means the sink's default.
    pub dump_path: String,
    /// Step expression. Empty means every step.
    pub dump_step: String,
    pub step_id_addr: u64,
    pub iterations_per_loop_addr: u64,
    pub loop_cond_addr: u64,
    pub tasks: Vec<OpMappingTask>,
}

/// Builds serialized op mapping messages.
pub struct OpMappingInfoBuilder {
    info: OpMappingInfo,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TensorDesc {
    /// Direct tensor of `size` bytes at `address` with a flat shape.
    pub fn new(address: u64, size: u64) -> Self {
        let mut dims: ArrayVec<i64, MAX_DIM_NUM> = ArrayVec::new();
        dims.push(size as i64);
        Self {
            data_type: 0,
            format: 0,
            dims,
            address,
            size,
            offset: 0,
            address_kind: AddressKind::Direct,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn indirect(mut self) -> Self {
        self.address_kind = AddressKind::Indirect;
        self
    }

    pub fn with_type(mut self, data_type: u32, format: u32) -> Self {
        self.data_type = data_type;
        self.format = format;
        self
    }

    /// Replaces the shape. Dimensions beyond the supported rank are dropped.
    pub fn with_dims(mut self, dims: &[i64]) -> Self {
        self.dims = dims.iter().copied().take(MAX_DIM_NUM).collect();
        self
    }

    fn decode(reader: &mut WireReader) -> Result<Self, Fail> {
        let data_type: u32 = reader.read_u32()?;
        let format: u32 = reader.read_u32()?;
        let dim_count: usize = reader.read_count(MAX_DIM_NUM)?;
        let mut dims: ArrayVec<i64, MAX_DIM_NUM> = ArrayVec::new();
        for _ in 0..dim_count {
            dims.push(reader.read_i64()?);
        }
        let address: u64 = reader.read_u64()?;
        let size: u64 = reader.read_u64()?;
        let offset: u64 = reader.read_u64()?;
        let address_kind: AddressKind = match reader.read_u32()? {
            0 => AddressKind::Direct,
            1 => AddressKind::Indirect,
            other => return Err(invalid(&format!("unknown address kind {}", other))),
        };
        Ok(Self {
            data_type,
            format,
            dims,
            address,
            size,
            offset,
            address_kind,
        })
    }

    fn encode(&self, out: &mut WireWriter) {
        out.put_u32(self.data_type)
            .put_u32(self.format)
            .put_u32(self.dims.len() as u32);
        for dim in &self.dims {
            out.put_i64(*dim);
        }
        out.put_u64(self.address)
            .put_u64(self.size)
            .put_u64(self.offset)
            .put_u32(self.address_kind as u32);
    }
}

impl MemRange {
    pub fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    fn decode_list(reader: &mut WireReader) -> Result<Vec<Self>, Fail> {
        let count: usize = reader.read_count(MAX_TENSORS_PER_TASK)?;
        let mut ranges: Vec<Self> = Vec::with_capacity(count);
        for _ in 0..count {
            ranges.push(Self {
                address: reader.read_u64()?,
                size: reader.read_u64()?,
            });
        }
        Ok(ranges)
    }

    fn encode_list(ranges: &[Self], out: &mut WireWriter) {
        out.put_u32(ranges.len() as u32);
        for range in ranges {
            out.put_u64(range.address).put_u64(range.size);
        }
    }
}

impl OpMappingTask {
    pub fn new(stream_id: u32, task_id: u32, op_name: &str) -> Self {
        Self {
            stream_id,
            task_id,
            task_type: TaskType::Normal,
            op_name: op_name.to_string(),
            op_type: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            workspaces: Vec::new(),
            contexts: Vec::new(),
        }
    }

    pub fn op_type(mut self, op_type: &str) -> Self {
        self.op_type = op_type.to_string();
        self
    }

    pub fn input(mut self, tensor: TensorDesc) -> Self {
        self.inputs.push(tensor);
        self
    }

    pub fn output(mut self, tensor: TensorDesc) -> Self {
        self.outputs.push(tensor);
        self
    }

    pub fn workspace(mut self, address: u64, size: u64) -> Self {
        self.workspaces.push(MemRange::new(address, size));
        self
    }

    /// Adds an FFTS-plus sub-context and marks the task as FFTS-plus.
    pub fn context(mut self, context: FftsContext) -> Self {
        self.task_type = TaskType::FftsPlus;
        self.contexts.push(context);
        self
    }

    fn decode(reader: &mut WireReader) -> Result<Self, Fail> {
        let stream_id: u32 = reader.read_u32()?;
        let task_id: u32 = reader.read_u32()?;
        let task_type: TaskType = match reader.read_u32()? {
            0 => TaskType::Normal,
            1 => TaskType::FftsPlus,
            other => return Err(invalid(&format!("unknown task type {}", other))),
        };
        let op_name: String = reader.read_string()?;
        let op_type: String = reader.read_string()?;

        let input_count: usize = reader.read_count(MAX_TENSORS_PER_TASK)?;
        let mut inputs: Vec<TensorDesc> = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TensorDesc::decode(reader)?);
        }
        let output_count: usize = reader.read_count(MAX_TENSORS_PER_TASK)?;
        let mut outputs: Vec<TensorDesc> = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TensorDesc::decode(reader)?);
        }
        let workspaces: Vec<MemRange> = MemRange::decode_list(reader)?;

        let context_count: usize = reader.read_count(MAX_CONTEXTS_PER_TASK)?;
        let mut contexts: Vec<FftsContext> = Vec::with_capacity(context_count);
        for _ in 0..context_count {
            let context_id: u32 = reader.read_u32()?;
            let thread_id: u32 = reader.read_u32()?;
            contexts.push(FftsContext {
                context_id,
                thread_id,
                inputs: MemRange::decode_list(reader)?,
                outputs: MemRange::decode_list(reader)?,
            });
        }

        Ok(Self {
            stream_id,
            task_id,
            task_type,
            op_name,
            op_type,
            inputs,
            outputs,
            workspaces,
            contexts,
        })
    }

    fn encode(&self, out: &mut WireWriter) {
        out.put_u32(self.stream_id)
            .put_u32(self.task_id)
            .put_u32(self.task_type as u32)
            .put_string(&self.op_name)
            .put_string(&self.op_type);
        out.put_u32(self.inputs.len() as u32);
        for tensor in &self.inputs {
            tensor.encode(out);
        }
        out.put_u32(self.outputs.len() as u32);
        for tensor in &self.outputs {
            tensor.encode(out);
        }
        MemRange::encode_list(&self.workspaces, out);
        out.put_u32(self.contexts.len() as u32);
        for context in &self.contexts {
            out.put_u32(context.context_id).put_u32(context.thread_id);
            MemRange::encode_list(&context.inputs, out);
            MemRange::encode_list(&context.outputs, out);
        }
    }
}

impl OpMappingInfo {
    pub fn decode(buf: &[u8]) -> Result<Self, Fail> {
        let mut reader: WireReader = WireReader::new(buf);
        let magic: u32 = reader.read_u32()?;
        if magic != OP_MAPPING_MAGIC {
            return Err(invalid(&format!("bad op mapping magic {:#x}", magic)));
        }
        let flag: MappingFlag = match reader.read_u32()? {
            0 => MappingFlag::Unload,
            1 => MappingFlag::Load,
            other => return Err(invalid(&format!("unknown op mapping flag {}", other))),
        };
        let model_id: ModelId = ModelId::from(reader.read_u32()?);
        let model_name: String = reader.read_string()?;
        let dump_path: String = reader.read_string()?;
        let dump_step: String = reader.read_string()?;
        let step_id_addr: u64 = reader.read_u64()?;
        let iterations_per_loop_addr: u64 = reader.read_u64()?;
        let loop_cond_addr: u64 = reader.read_u64()?;

        let task_count: usize = reader.read_count(MAX_TASK_COUNT_PER_MODEL as usize)?;
        let mut tasks: Vec<OpMappingTask> = Vec::with_capacity(task_count);
        for _ in 0..task_count {
            tasks.push(OpMappingTask::decode(&mut reader)?);
        }
        if reader.remaining() != 0 {
            return Err(invalid(&format!("{} trailing bytes", reader.remaining())));
        }

        Ok(Self {
            flag,
            model_id,
            model_name,
            dump_path,
            dump_step,
            step_id_addr,
            iterations_per_loop_addr,
            loop_cond_addr,
            tasks,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out: WireWriter = WireWriter::new();
        out.put_u32(OP_MAPPING_MAGIC)
            .put_u32(self.flag as u32)
            .put_u32(self.model_id.into())
            .put_string(&self.model_name)
            .put_string(&self.dump_path)
            .put_string(&self.dump_step)
            .put_u64(self.step_id_addr)
            .put_u64(self.iterations_per_loop_addr)
            .put_u64(self.loop_cond_addr)
            .put_u32(self.tasks.len() as u32);
        for task in &self.tasks {
            task.encode(&mut out);
        }
        out.into_bytes()
    }
}

impl OpMappingInfoBuilder {
    /// Starts a load message.
    pub fn new(model_id: u32, model_name: &str) -> Self {
        Self {
            info: OpMappingInfo {
                flag: MappingFlag::Load,
                model_id: ModelId::from(model_id),
                model_name: model_name.to_string(),
                dump_path: String::new(),
                dump_step: String::new(),
                step_id_addr: 0,
                iterations_per_loop_addr: 0,
                loop_cond_addr: 0,
                tasks: Vec::new(),
            },
        }
    }

    pub fn unload(mut self) -> Self {
        self.info.flag = MappingFlag::Unload;
        self
    }

    pub fn dump_path(mut self, path: &str) -> Self {
        self.info.dump_path = path.to_string();
        self
    }

    pub fn dump_step(mut self, step: &str) -> Self {
        self.info.dump_step = step.to_string();
        self
    }

    pub fn step_addrs(mut self, step_id: u64, iterations_per_loop: u64, loop_cond: u64) -> Self {
        self.info.step_id_addr = step_id;
        self.info.iterations_per_loop_addr = iterations_per_loop;
        self.info.loop_cond_addr = loop_cond;
        self
    }

    pub fn task(mut self, task: OpMappingTask) -> Self {
        self.info.tasks.push(task);
        self
    }

    pub fn build(self) -> OpMappingInfo {
        self.info
    }

    pub fn encode(&self) -> Vec<u8> {
        self.info.encode()
    }
}

fn invalid(cause: &str) -> Fail {
    error!("decode(): {}", cause);
    Fail::new(ErrorCode::ParameterInvalid, cause)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
