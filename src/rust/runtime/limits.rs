// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Maximum number of models that may be loaded at the same time. Model identifiers must be below this value.
pub const MAX_MODEL_COUNT: u32 = 1024;

/// Maximum number of streams in a single model.
pub const MAX_STREAM_COUNT_PER_MODEL: u32 = 1024;

/// Maximum number of tasks in a single model, across all of its streams.
pub const MAX_TASK_COUNT_PER_MODEL: u32 = 65536;

/// Maximum number of queues bound to a single model.
pub const MAX_QUEUE_COUNT_PER_MODEL: u32 = 256;

/// Upper bound on the number of tasks a stream executes inline before yielding back to the event loop.
pub const MAX_INLINE_TASK_STEPS: usize = 1 << 16;

/// Default size of the staging buffer used to copy tensors out for dumping.
pub const DEFAULT_DUMP_STAGING_BUFFER_SIZE: usize = 1 << 20;

/// Maximum number of `|`-separated segments in a dump step expression.
pub const MAX_DUMP_STEP_SEGMENTS: usize = 100;

/// Maximum number of dimensions in a tensor shape.
pub const MAX_DIM_NUM: usize = 8;

/// Sentinel for context and thread identifiers that do not apply.
pub const INVALID_VAL: u32 = u32::MAX;
