// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Destinations for captured tensors.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::MAX_DIM_NUM,
    wire::WireWriter,
    ModelId,
};
use ::arrayvec::ArrayVec;
use ::parking_lot::Mutex;
use ::std::{
    fs::{
        self,
        File,
    },
    io::{
        BufWriter,
        Write,
    },
    path::PathBuf,
    sync::Arc,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Leads every tensor record in a dump file.
pub const TENSOR_RECORD_MAGIC: u32 = 0x4455_4D50;

//======================================================================================================================
// Structures
//======================================================================================================================

/// What is being dumped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DumpTarget {
    pub model_id: ModelId,
    pub model_name: String,
    pub dump_path: String,
    pub op_name: String,
    pub op_type: String,
    pub stream_id: u32,
    pub task_id: u32,
    /// FFTS-plus context and thread, if any.
    pub context: Option<(u32, u32)>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TensorKind {
    Input = 0,
    Output = 1,
    Workspace = 2,
}

/// Header of one captured tensor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TensorRecord {
    pub kind: TensorKind,
    pub index: u32,
    pub data_type: u32,
    pub format: u32,
    pub dims: ArrayVec<i64, MAX_DIM_NUM>,
    pub size: u64,
}

/// A tensor captured by [MemoryDumpSink].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedTensor {
    pub target: DumpTarget,
    pub record: TensorRecord,
    pub data: Vec<u8>,
}

/// Writes one file per target under the target's dump path, or under a default directory when the op mapping did not
/// name one.
pub struct FileDumpSink {
    default_dump_path: PathBuf,
}

struct FileDumpWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

/// Keeps captured tensors in memory.
#[derive(Clone, Default)]
pub struct MemoryDumpSink {
    captured: Arc<Mutex<Vec<CapturedTensor>>>,
}

struct MemoryDumpWriter {
    target: DumpTarget,
    captured: Arc<Mutex<Vec<CapturedTensor>>>,
    current: Option<CapturedTensor>,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Opens writers for dump targets.
pub trait DumpSink: Send + Sync {
    fn open(&self, target: &DumpTarget) -> Result<Box<dyn DumpWriter>, Fail>;
}

/// Receives the tensors of one target. Tensor data arrives in chunks no larger than the staging buffer.
pub trait DumpWriter {
    fn begin_tensor(&mut self, record: &TensorRecord) -> Result<(), Fail>;
    fn write(&mut self, chunk: &[u8]) -> Result<(), Fail>;
    fn finish(self: Box<Self>) -> Result<(), Fail>;
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DumpTarget {
    /// `<model_name>.<op_name>.<stream>.<task>[.<context>.<thread>].bin`
    pub fn file_name(&self) -> String {
        let op_name: String = self.op_name.replace(|c: char| c == '/' || c == '\\', "_");
        match self.context {
            Some((context_id, thread_id)) => format!(
                "{}.{}.{}.{}.{}.{}.bin",
                self.model_name, op_name, self.stream_id, self.task_id, context_id, thread_id
            ),
            None => format!("{}.{}.{}.{}.bin", self.model_name, op_name, self.stream_id, self.task_id),
        }
    }
}

impl TensorRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out: WireWriter = WireWriter::new();
        out.put_u32(TENSOR_RECORD_MAGIC)
            .put_u32(self.kind as u32)
            .put_u32(self.index)
            .put_u32(self.data_type)
            .put_u32(self.format)
            .put_u32(self.dims.len() as u32);
        for dim in &self.dims {
            out.put_i64(*dim);
        }
        out.put_u64(self.size);
        out.into_bytes()
    }
}

impl FileDumpSink {
    pub fn new(default_dump_path: &str) -> Self {
        Self {
            default_dump_path: PathBuf::from(default_dump_path),
        }
    }

    fn path_of(&self, target: &DumpTarget) -> PathBuf {
        let dir: PathBuf = if target.dump_path.is_empty() {
            self.default_dump_path.clone()
        } else {
            PathBuf::from(&target.dump_path)
        };
        dir.join(target.file_name())
    }
}

impl MemoryDumpSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far.
    pub fn captured(&self) -> Vec<CapturedTensor> {
        self.captured.lock().clone()
    }

    pub fn clear(&self) {
        self.captured.lock().clear();
    }
}

impl MemoryDumpWriter {
    fn flush_current(&mut self) {
        if let Some(tensor) = self.current.take() {
            self.captured.lock().push(tensor);
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl DumpSink for FileDumpSink {
    fn open(&self, target: &DumpTarget) -> Result<Box<dyn DumpWriter>, Fail> {
        let path: PathBuf = self.path_of(target);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file: File = File::create(&path)?;
        debug!("open(): dumping to {:?}", path);
        Ok(Box::new(FileDumpWriter {
            path,
            out: BufWriter::new(file),
        }))
    }
}

impl DumpWriter for FileDumpWriter {
    fn begin_tensor(&mut self, record: &TensorRecord) -> Result<(), Fail> {
        self.out.write_all(&record.encode())?;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Fail> {
        self.out.write_all(chunk)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), Fail> {
        self.out.flush()?;
        trace!("finish(): wrote {:?}", self.path);
        Ok(())
    }
}

impl DumpSink for MemoryDumpSink {
    fn open(&self, target: &DumpTarget) -> Result<Box<dyn DumpWriter>, Fail> {
        Ok(Box::new(MemoryDumpWriter {
            target: target.clone(),
            captured: self.captured.clone(),
            current: None,
        }))
    }
}

impl DumpWriter for MemoryDumpWriter {
    fn begin_tensor(&mut self, record: &TensorRecord) -> Result<(), Fail> {
        self.flush_current();
        self.current = Some(CapturedTensor {
            target: self.target.clone(),
            record: record.clone(),
            data: Vec::with_capacity(record.size as usize),
        });
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Fail> {
        if let Some(tensor) = self.current.as_mut() {
            tensor.data.extend_from_slice(chunk);
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), Fail> {
        self.flush_current();
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
