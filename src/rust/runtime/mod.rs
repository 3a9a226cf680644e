// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod fail;
pub mod ids;
pub mod limits;
pub mod logging;
pub mod wire;

pub use self::{
    fail::{
        ErrorCode,
        Fail,
    },
    ids::{
        ModelId,
        StreamId,
    },
};
