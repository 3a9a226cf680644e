// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::fmt;

//==============================================================================
// Structures
//==============================================================================

/// Model Identifier
///
/// This is used to uniquely identify a loaded model in the model registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ModelId(u32);

/// Stream Identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StreamId(u32);

//==============================================================================
// Trait Implementations
//==============================================================================

impl From<u32> for ModelId {
    /// Converts a [u32] to a [ModelId].
    fn from(val: u32) -> Self {
        ModelId(val)
    }
}

impl From<ModelId> for u32 {
    /// Converts a [ModelId] to a [u32].
    fn from(val: ModelId) -> Self {
        val.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    /// Converts a [u32] to a [StreamId].
    fn from(val: u32) -> Self {
        StreamId(val)
    }
}

impl From<StreamId> for u32 {
    /// Converts a [StreamId] to a [u32].
    fn from(val: StreamId) -> Self {
        val.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
