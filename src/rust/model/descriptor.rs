// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Serialized model descriptor.
//!
//! The descriptor is a flat little-endian buffer: a fixed header, three fixed-size tables (streams, tasks, queues) and
//! a blob area holding kernel names and parameter blocks. Every offset is validated against the buffer before it is
//! interpreted, and the result is an owned [ModelInfo] with no references into the original buffer.
//!
//! ```text
//! header : magic model_id ts_id flags stream_count task_count queue_count stream_off task_off queue_off blob_off
//! stream : stream_id flags
//! task   : task_id stream_id kernel_type name_off name_len param_off param_len
//! queue  : queue_id direction flag
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
        MAX_QUEUE_COUNT_PER_MODEL,
        MAX_STREAM_COUNT_PER_MODEL,
        MAX_TASK_COUNT_PER_MODEL,
    },
    wire::{
        WireReader,
        WireWriter,
    },
    ModelId,
    StreamId,
};
use ::std::collections::{
    HashMap,
    HashSet,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const MODEL_INFO_MAGIC: u32 = 0x4D4F_444C;

const HEADER_SIZE: usize = 44;
const STREAM_ENTRY_SIZE: usize = 8;
const TASK_ENTRY_SIZE: usize = 28;
const QUEUE_ENTRY_SIZE: usize = 12;

const MODEL_FLAG_ABNORMAL_HANDLING: u32 = 1 << 0;
const STREAM_FLAG_HEAD: u32 = 1 << 0;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Direction of a queue bound to a model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueDirection {
    Input,
    Output,
}

/// Queue bound to a model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueBinding {
    pub queue_id: u32,
    pub direction: QueueDirection,
    pub flag: u32,
}

/// One task of a stream. Immutable once the model is loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AicpuTaskInfo {
    pub task_id: u32,
    pub stream_id: StreamId,
    pub kernel_type: u32,
    pub kernel_name: String,
    pub params: Vec<u8>,
}

/// Stream with its tasks in declared order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub is_head: bool,
    pub tasks: Vec<AicpuTaskInfo>,
}

/// Decoded model descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModelInfo {
    pub model_id: ModelId,
    pub ts_id: u32,
    pub abnormal_handling: bool,
    pub streams: Vec<StreamInfo>,
    pub queues: Vec<QueueBinding>,
}

/// Builds serialized model descriptors.
pub struct ModelInfoBuilder {
    model_id: u32,
    ts_id: u32,
    flags: u32,
    streams: Vec<(u32, u32)>,
    tasks: Vec<(u32, u32, u32, String, Vec<u8>)>,
    queues: Vec<(u32, u32, u32)>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ModelInfo {
    /// Reads the model id from the header without decoding the rest of the descriptor.
    pub fn peek_model_id(buf: &[u8]) -> Result<ModelId, Fail> {
        let mut reader: WireReader = WireReader::new(buf);
        Self::check_magic(reader.read_u32()?)?;
        Ok(ModelId::from(reader.read_u32()?))
    }

    /// Decodes and validates a model descriptor.
    pub fn decode(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < HEADER_SIZE {
            let cause: String = format!("model descriptor too short (len={})", buf.len());
            error!("decode(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        let mut header: WireReader = WireReader::new(buf);
        Self::check_magic(header.read_u32()?)?;
        let model_id: ModelId = ModelId::from(header.read_u32()?);
        let ts_id: u32 = header.read_u32()?;
        let flags: u32 = header.read_u32()?;
        let stream_count: u32 = header.read_u32()?;
        let task_count: u32 = header.read_u32()?;
        let queue_count: u32 = header.read_u32()?;
        let stream_off: usize = header.read_u32()? as usize;
        let task_off: usize = header.read_u32()? as usize;
        let queue_off: usize = header.read_u32()? as usize;
        let blob_off: usize = header.read_u32()? as usize;

        Self::check_count("stream", stream_count, MAX_STREAM_COUNT_PER_MODEL)?;
        Self::check_count("task", task_count, MAX_TASK_COUNT_PER_MODEL)?;
        Self::check_count("queue", queue_count, MAX_QUEUE_COUNT_PER_MODEL)?;

        // Streams.
        let mut streams: Vec<StreamInfo> = Vec::with_capacity(stream_count as usize);
        let mut stream_index: HashMap<StreamId, usize> = HashMap::with_capacity(stream_count as usize);
        let table: &[u8] = header.slice(stream_off, stream_count as usize * STREAM_ENTRY_SIZE)?;
        let mut reader: WireReader = WireReader::new(table);
        for _ in 0..stream_count {
            let stream_id: StreamId = StreamId::from(reader.read_u32()?);
            let stream_flags: u32 = reader.read_u32()?;
            if stream_index.insert(stream_id, streams.len()).is_some() {
                let cause: String = format!("duplicate stream (model_id={}, stream_id={})", model_id, stream_id);
                error!("decode(): {}", cause);
                return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
            }
            streams.push(StreamInfo {
                stream_id,
                is_head: stream_flags & STREAM_FLAG_HEAD != 0,
                tasks: Vec::new(),
            });
        }

        // Tasks, grouped by stream in declared order.
        let table: &[u8] = header.slice(task_off, task_count as usize * TASK_ENTRY_SIZE)?;
        let mut reader: WireReader = WireReader::new(table);
        for _ in 0..task_count {
            let task_id: u32 = reader.read_u32()?;
            let stream_id: StreamId = StreamId::from(reader.read_u32()?);
            let kernel_type: u32 = reader.read_u32()?;
            let name_off: usize = reader.read_u32()? as usize;
            let name_len: usize = reader.read_u32()? as usize;
            let param_off: usize = reader.read_u32()? as usize;
            let param_len: usize = reader.read_u32()? as usize;

            let name: &[u8] = header.slice(Self::blob_offset(blob_off, name_off)?, name_len)?;
            let kernel_name: String = match ::std::str::from_utf8(name) {
                Ok(name) if !name.is_empty() => name.to_string(),
                _ => {
                    let cause: String = format!("invalid kernel name (model_id={}, task_id={})", model_id, task_id);
                    error!("decode(): {}", cause);
                    return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                },
            };
            let params: Vec<u8> = header.slice(Self::blob_offset(blob_off, param_off)?, param_len)?.to_vec();

            match stream_index.get(&stream_id) {
                Some(ix) => streams[*ix].tasks.push(AicpuTaskInfo {
                    task_id,
                    stream_id,
                    kernel_type,
                    kernel_name,
                    params,
                }),
                None => {
                    let cause: String = format!(
                        "task references undeclared stream (model_id={}, task_id={}, stream_id={})",
                        model_id, task_id, stream_id
                    );
                    error!("decode(): {}", cause);
                    return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                },
            }
        }

        // Queues.
        let mut queues: Vec<QueueBinding> = Vec::with_capacity(queue_count as usize);
        let mut seen: HashSet<u32> = HashSet::with_capacity(queue_count as usize);
        let table: &[u8] = header.slice(queue_off, queue_count as usize * QUEUE_ENTRY_SIZE)?;
        let mut reader: WireReader = WireReader::new(table);
        for _ in 0..queue_count {
            let queue_id: u32 = reader.read_u32()?;
            let direction: QueueDirection = match reader.read_u32()? {
                0 => QueueDirection::Input,
                1 => QueueDirection::Output,
                other => {
                    let cause: String = format!("invalid queue direction (queue_id={}, direction={})", queue_id, other);
                    error!("decode(): {}", cause);
                    return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
                },
            };
            let flag: u32 = reader.read_u32()?;
            if !seen.insert(queue_id) {
                let cause: String = format!("duplicate queue (model_id={}, queue_id={})", model_id, queue_id);
                error!("decode(): {}", cause);
                return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
            }
            queues.push(QueueBinding {
                queue_id,
                direction,
                flag,
            });
        }

        Ok(Self {
            model_id,
            ts_id,
            abnormal_handling: flags & MODEL_FLAG_ABNORMAL_HANDLING != 0,
            streams,
            queues,
        })
    }

    fn check_magic(magic: u32) -> Result<(), Fail> {
        if magic != MODEL_INFO_MAGIC {
            let cause: String = format!("bad model descriptor magic (magic={:#x})", magic);
            error!("check_magic(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(())
    }

    fn check_count(what: &str, count: u32, max: u32) -> Result<(), Fail> {
        if count > max {
            let cause: String = format!("too many {}s (count={}, max={})", what, count, max);
            error!("check_count(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(())
    }

    fn blob_offset(blob_off: usize, off: usize) -> Result<usize, Fail> {
        match blob_off.checked_add(off) {
            Some(offset) => Ok(offset),
            None => Err(Fail::new(ErrorCode::ParameterInvalid, "blob offset overflow")),
        }
    }
}

impl ModelInfoBuilder {
    pub fn new(model_id: u32, ts_id: u32) -> Self {
        Self {
            model_id,
            ts_id,
            flags: 0,
            streams: Vec::new(),
            tasks: Vec::new(),
            queues: Vec::new(),
        }
    }

    pub fn abnormal_handling(mut self, enabled: bool) -> Self {
        if enabled {
            self.flags |= MODEL_FLAG_ABNORMAL_HANDLING;
        } else {
            self.flags &= !MODEL_FLAG_ABNORMAL_HANDLING;
        }
        self
    }

    pub fn stream(mut self, stream_id: u32, is_head: bool) -> Self {
        self.streams
            .push((stream_id, if is_head { STREAM_FLAG_HEAD } else { 0 }));
        self
    }

    pub fn task(mut self, stream_id: u32, task_id: u32, kernel_name: &str, params: &[u8]) -> Self {
        self.tasks
            .push((task_id, stream_id, 0, kernel_name.to_string(), params.to_vec()));
        self
    }

    pub fn queue(mut self, queue_id: u32, direction: QueueDirection, flag: u32) -> Self {
        let direction: u32 = match direction {
            QueueDirection::Input => 0,
            QueueDirection::Output => 1,
        };
        self.queues.push((queue_id, direction, flag));
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let stream_off: usize = HEADER_SIZE;
        let task_off: usize = stream_off + self.streams.len() * STREAM_ENTRY_SIZE;
        let queue_off: usize = task_off + self.tasks.len() * TASK_ENTRY_SIZE;
        let blob_off: usize = queue_off + self.queues.len() * QUEUE_ENTRY_SIZE;

        let mut out: WireWriter = WireWriter::new();
        out.put_u32(MODEL_INFO_MAGIC)
            .put_u32(self.model_id)
            .put_u32(self.ts_id)
            .put_u32(self.flags)
            .put_u32(self.streams.len() as u32)
            .put_u32(self.tasks.len() as u32)
            .put_u32(self.queues.len() as u32)
            .put_u32(stream_off as u32)
            .put_u32(task_off as u32)
            .put_u32(queue_off as u32)
            .put_u32(blob_off as u32);

        for (stream_id, flags) in &self.streams {
            out.put_u32(*stream_id).put_u32(*flags);
        }

        let mut blob: WireWriter = WireWriter::new();
        for (task_id, stream_id, kernel_type, name, params) in &self.tasks {
            let name_off: usize = blob.len();
            blob.put_bytes(name.as_bytes());
            let param_off: usize = blob.len();
            blob.put_bytes(params);
            out.put_u32(*task_id)
                .put_u32(*stream_id)
                .put_u32(*kernel_type)
                .put_u32(name_off as u32)
                .put_u32(name.len() as u32)
                .put_u32(param_off as u32)
                .put_u32(params.len() as u32);
        }

        for (queue_id, direction, flag) in &self.queues {
            out.put_u32(*queue_id).put_u32(*direction).put_u32(*flag);
        }

        out.put_bytes(&blob.into_bytes());
        out.into_bytes()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
