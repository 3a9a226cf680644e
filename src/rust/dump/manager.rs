// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    dump::{
        memory::DeviceMemory,
        op_mapping::{
            MappingFlag,
            OpMappingInfo,
            OpMappingTask,
        },
        sink::DumpSink,
        step::DumpStep,
        task::OpDumpTask,
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        limits::INVALID_VAL,
        ModelId,
    },
};
use ::parking_lot::{
    RwLock,
    RwLockWriteGuard,
};
use ::std::{
    collections::{
        BTreeMap,
        BTreeSet,
        HashMap,
    },
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

type TaskKey = (u32, u32);

#[derive(Default)]
struct DumpStore {
    tasks: BTreeMap<TaskKey, Arc<OpDumpTask>>,
    by_model: HashMap<ModelId, BTreeSet<TaskKey>>,
}

/// Op Dump Task Manager
pub struct OpDumpTaskManager {
    store: RwLock<DumpStore>,
    memory: Arc<dyn DeviceMemory>,
    sink: Arc<dyn DumpSink>,
    staging_buffer_size: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DumpStore {
    fn remove_model(&mut self, model_id: ModelId) -> usize {
        let keys: BTreeSet<TaskKey> = self.by_model.remove(&model_id).unwrap_or_default();
        for key in &keys {
            self.tasks.remove(key);
        }
        keys.len()
    }
}

impl OpDumpTaskManager {
    pub fn new(memory: Arc<dyn DeviceMemory>, sink: Arc<dyn DumpSink>, staging_buffer_size: usize) -> Self {
        Self {
            store: RwLock::new(DumpStore::default()),
            memory,
            sink,
            staging_buffer_size,
        }
    }

    /// Installs or removes the dump descriptors of a model. A load replaces every descriptor previously loaded for
    /// the same model.
    pub fn load_op_mapping_info(&self, buf: &[u8]) -> Result<(), Fail> {
        if buf.is_empty() {
            let cause: &str = "empty op mapping message";
            error!("load_op_mapping_info(): {}", cause);
            return Err(Fail::new(ErrorCode::DumpFailed, cause));
        }
        let info: OpMappingInfo = match OpMappingInfo::decode(buf) {
            Ok(info) => info,
            Err(e) => {
                let cause: String = format!("failed to parse op mapping ({})", e.cause);
                error!("load_op_mapping_info(): {}", cause);
                return Err(Fail::new(ErrorCode::DumpFailed, &cause));
            },
        };

        match info.flag {
            MappingFlag::Unload => {
                let removed: usize = self.unload_model(info.model_id);
                info!(
                    "load_op_mapping_info(): unloaded (model_id={}, tasks={})",
                    info.model_id, removed
                );
                Ok(())
            },
            MappingFlag::Load => self.load(info),
        }
    }

    fn load(&self, mut info: OpMappingInfo) -> Result<(), Fail> {
        let step: DumpStep = DumpStep::parse(&info.dump_step)?;
        let model_id: ModelId = info.model_id;
        let entries: Vec<OpMappingTask> = ::std::mem::take(&mut info.tasks);
        let tasks: Vec<Arc<OpDumpTask>> = entries
            .into_iter()
            .map(|task| Arc::new(OpDumpTask::new(&info, task, step.clone())))
            .collect();

        let mut store: RwLockWriteGuard<DumpStore> = self.store.write();
        let replaced: usize = store.remove_model(model_id);
        let mut keys: BTreeSet<TaskKey> = BTreeSet::new();
        for task in tasks {
            let key: TaskKey = (task.stream_id(), task.task_id());
            if let Some(previous) = store.tasks.insert(key, task) {
                if previous.model_id() != model_id {
                    warn!(
                        "load_op_mapping_info(): task taken over (stream={}, task={}, from={}, to={})",
                        key.0,
                        key.1,
                        previous.model_id(),
                        model_id
                    );
                    if let Some(owned) = store.by_model.get_mut(&previous.model_id()) {
                        owned.remove(&key);
                    }
                }
            }
            keys.insert(key);
        }
        info!(
            "load_op_mapping_info(): loaded (model_id={}, tasks={}, replaced={})",
            model_id,
            keys.len(),
            replaced
        );
        store.by_model.insert(model_id, keys);
        Ok(())
    }

    /// Dumps the tensors of a task. A task without a descriptor is not an error and produces no dump.
    pub fn dump_op_info(&self, stream_id: u32, task_id: u32) -> Result<(), Fail> {
        self.dump(stream_id, task_id, None)
    }

    /// Dumps one sub-context and sub-thread of an FFTS-plus task. Invalid context or thread ids skip the dump.
    pub fn dump_ffts_plus_op_info(
        &self,
        stream_id: u32,
        task_id: u32,
        context_id: u32,
        thread_id: u32,
    ) -> Result<(), Fail> {
        if context_id == INVALID_VAL || thread_id == INVALID_VAL {
            debug!(
                "dump_ffts_plus_op_info(): skipped (stream={}, task={}, context={}, thread={})",
                stream_id, task_id, context_id, thread_id
            );
            return Ok(());
        }
        self.dump(stream_id, task_id, Some((context_id, thread_id)))
    }

    fn dump(&self, stream_id: u32, task_id: u32, context: Option<(u32, u32)>) -> Result<(), Fail> {
        // Release the store before copying.
        let task: Arc<OpDumpTask> = match self.store.read().tasks.get(&(stream_id, task_id)) {
            Some(task) => task.clone(),
            None => {
                trace!("dump(): no descriptor (stream={}, task={})", stream_id, task_id);
                return Ok(());
            },
        };
        task.dump(
            context,
            self.memory.as_ref(),
            self.sink.as_ref(),
            self.staging_buffer_size,
        )?;
        Ok(())
    }

    /// Removes every descriptor of `model_id`. Returns how many were removed.
    pub fn unload_model(&self, model_id: ModelId) -> usize {
        self.store.write().remove_model(model_id)
    }

    pub fn is_dump_task(&self, stream_id: u32, task_id: u32) -> bool {
        self.store.read().tasks.contains_key(&(stream_id, task_id))
    }

    pub fn task_count(&self) -> usize {
        self.store.read().tasks.len()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
