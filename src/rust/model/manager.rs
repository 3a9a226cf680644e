// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    model::{
        descriptor::ModelInfo,
        model::{
            AicpuModel,
            ModelServices,
        },
    },
    runtime::{
        fail::{
            ErrorCode,
            Fail,
        },
        limits::MAX_MODEL_COUNT,
        ModelId,
        StreamId,
    },
};
use ::parking_lot::{
    Mutex,
    MutexGuard,
};
use ::std::{
    collections::HashMap,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Default)]
struct ModelTable {
    models: HashMap<ModelId, Arc<AicpuModel>>,
    /// Owning model of every live stream.
    stream_owner: HashMap<StreamId, ModelId>,
}

/// Registry of loaded models. The registry is the only owner of model lifetime.
pub struct AicpuModelManager {
    table: Mutex<ModelTable>,
    services: ModelServices,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AicpuModelManager {
    pub fn new(services: ModelServices) -> Self {
        Self {
            table: Mutex::new(ModelTable::default()),
            services,
        }
    }

    pub fn services(&self) -> &ModelServices {
        &self.services
    }

    /// Loads a model from its serialized descriptor.
    pub fn model_load(&self, buf: &[u8]) -> Result<Arc<AicpuModel>, Fail> {
        // Reject out-of-range ids before decoding anything else.
        let model_id: ModelId = ModelInfo::peek_model_id(buf)?;
        Self::check_model_id(model_id)?;
        self.model_load_info(ModelInfo::decode(buf)?)
    }

    /// Loads a model from a decoded descriptor. Fails with [ErrorCode::ModelExists] if the id is live.
    pub fn model_load_info(&self, info: ModelInfo) -> Result<Arc<AicpuModel>, Fail> {
        let model_id: ModelId = info.model_id;
        Self::check_model_id(model_id)?;

        let mut table: MutexGuard<ModelTable> = self.table.lock();
        if table.models.contains_key(&model_id) {
            let cause: String = format!("model already loaded (model_id={})", model_id);
            error!("model_load_info(): {}", cause);
            return Err(Fail::new(ErrorCode::ModelExists, &cause));
        }
        for stream in &info.streams {
            if let Some(owner) = table.stream_owner.get(&stream.stream_id) {
                let cause: String = format!(
                    "stream owned by another model (model_id={}, stream={}, owner={})",
                    model_id, stream.stream_id, owner
                );
                error!("model_load_info(): {}", cause);
                return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
            }
        }

        let model: Arc<AicpuModel> = Arc::new(AicpuModel::load(info, self.services.clone())?);
        for stream_id in model.stream_ids() {
            table.stream_owner.insert(stream_id, model_id);
        }
        table.models.insert(model_id, model.clone());
        Ok(model)
    }

    /// Tears a model down and removes it.
    pub fn model_destroy(&self, model_id: ModelId) -> Result<(), Fail> {
        let model: Arc<AicpuModel> = self.require(model_id, "model_destroy")?;
        model.destroy()?;
        self.remove(&model);
        info!("model_destroy(): model removed (model_id={})", model_id);
        Ok(())
    }

    /// Aborts a model and removes it once its resources are released.
    pub fn model_abort(&self, model_id: ModelId) -> Result<(), Fail> {
        let model: Arc<AicpuModel> = self.require(model_id, "model_abort")?;
        model.abort()?;
        self.remove(&model);
        info!("model_abort(): model removed (model_id={})", model_id);
        Ok(())
    }

    /// Looks a model up. An unknown id is not an error.
    pub fn get_model(&self, model_id: ModelId) -> Option<Arc<AicpuModel>> {
        self.table.lock().models.get(&model_id).cloned()
    }

    /// Like [Self::get_model], but an unknown id fails with [ErrorCode::ModelNotFound].
    pub fn require(&self, model_id: ModelId, op: &str) -> Result<Arc<AicpuModel>, Fail> {
        match self.get_model(model_id) {
            Some(model) => Ok(model),
            None => {
                let cause: String = format!("model not found (model_id={})", model_id);
                error!("{}(): {}", op, cause);
                Err(Fail::new(ErrorCode::ModelNotFound, &cause))
            },
        }
    }

    pub fn get_model_by_stream_id(&self, stream_id: StreamId) -> Option<Arc<AicpuModel>> {
        let table: MutexGuard<ModelTable> = self.table.lock();
        table
            .stream_owner
            .get(&stream_id)
            .and_then(|model_id| table.models.get(model_id))
            .cloned()
    }

    /// Live models that have `queue_id` bound.
    pub fn models_bound_to_queue(&self, queue_id: u32) -> Vec<Arc<AicpuModel>> {
        self.models()
            .into_iter()
            .filter(|model| model.is_bound_to_queue(queue_id))
            .collect()
    }

    /// Snapshot of the live models.
    pub fn models(&self) -> Vec<Arc<AicpuModel>> {
        self.table.lock().models.values().cloned().collect()
    }

    pub fn model_count(&self) -> usize {
        self.table.lock().models.len()
    }

    fn remove(&self, model: &AicpuModel) {
        let mut table: MutexGuard<ModelTable> = self.table.lock();
        table.models.remove(&model.model_id());
        for stream_id in model.stream_ids() {
            table.stream_owner.remove(&stream_id);
        }
    }

    fn check_model_id(model_id: ModelId) -> Result<(), Fail> {
        if u32::from(model_id) >= MAX_MODEL_COUNT {
            let cause: String = format!("model id out of range (model_id={}, max={})", model_id, MAX_MODEL_COUNT);
            error!("check_model_id(): {}", cause);
            return Err(Fail::new(ErrorCode::ParameterInvalid, &cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::AicpuModelManager;
    use crate::{
        event_wait::EventWaitManager,
        kernel::{
            names,
            KernelRegistry,
        },
        model::{
            descriptor::ModelInfoBuilder,
            model::ModelServices,
        },
        runtime::{
            ErrorCode,
            ModelId,
            StreamId,
        },
    };
    use ::anyhow::Result;
    use ::std::sync::Arc;

    fn manager() -> AicpuModelManager {
        let (tx, _rx) = ::crossbeam_channel::unbounded();
        AicpuModelManager::new(ModelServices {
            kernels: Arc::new(KernelRegistry::with_builtins()),
            waits: Arc::new(EventWaitManager::new()),
            activations: tx,
        })
    }

    #[test]
    fn duplicate_load_is_rejected() -> Result<()> {
        let manager: AicpuModelManager = manager();
        let buf: Vec<u8> = ModelInfoBuilder::new(1, 0).stream(1, true).task(1, 0, names::NOP, &[]).encode();
        manager.model_load(&buf)?;
        match manager.model_load(&buf) {
            Err(e) => crate::ensure_eq!(e.code, ErrorCode::ModelExists),
            Ok(_) => anyhow::bail!("second load should have failed"),
        }
        crate::ensure_eq!(manager.model_count(), 1);
        Ok(())
    }

    #[test]
    fn out_of_range_model_id_is_rejected() -> Result<()> {
        let manager: AicpuModelManager = manager();
        let buf: Vec<u8> = ModelInfoBuilder::new(4096, 0).stream(1, true).encode();
        match manager.model_load(&buf) {
            Err(e) => crate::ensure_eq!(e.code, ErrorCode::ParameterInvalid),
            Ok(_) => anyhow::bail!("load should have failed"),
        }
        Ok(())
    }

    #[test]
    fn failed_load_leaves_nothing_registered() -> Result<()> {
        let manager: AicpuModelManager = manager();
        let buf: Vec<u8> = ModelInfoBuilder::new(2, 0).stream(3, true).task(3, 0, "unknown", &[]).encode();
        crate::ensure_eq!(manager.model_load(&buf).is_err(), true);
        crate::ensure_eq!(manager.get_model(ModelId::from(2)).is_none(), true);
        crate::ensure_eq!(manager.get_model_by_stream_id(StreamId::from(3)).is_none(), true);
        Ok(())
    }

    #[test]
    fn stream_cannot_belong_to_two_models() -> Result<()> {
        let manager: AicpuModelManager = manager();
        manager.model_load(&ModelInfoBuilder::new(1, 0).stream(5, true).encode())?;
        match manager.model_load(&ModelInfoBuilder::new(2, 0).stream(5, true).encode()) {
            Err(e) => crate::ensure_eq!(e.code, ErrorCode::ParameterInvalid),
            Ok(_) => anyhow::bail!("load should have failed"),
        }
        let owner: Option<ModelId> = manager
            .get_model_by_stream_id(StreamId::from(5))
            .map(|m| m.model_id());
        crate::ensure_eq!(owner, Some(ModelId::from(1)));
        Ok(())
    }

    #[test]
    fn abort_and_destroy_remove_the_model() -> Result<()> {
        let manager: AicpuModelManager = manager();
        manager.model_load(&ModelInfoBuilder::new(1, 0).stream(1, true).encode())?;
        manager.model_load(&ModelInfoBuilder::new(2, 0).stream(2, true).encode())?;
        manager.model_abort(ModelId::from(1))?;
        manager.model_destroy(ModelId::from(2))?;
        crate::ensure_eq!(manager.model_count(), 0);
        match manager.model_abort(ModelId::from(1)) {
            Err(e) => crate::ensure_eq!(e.code, ErrorCode::ModelNotFound),
            Ok(()) => anyhow::bail!("abort should have failed"),
        }
        // The id is free again.
        manager.model_load(&ModelInfoBuilder::new(1, 0).stream(1, true).encode())?;
        Ok(())
    }
}
