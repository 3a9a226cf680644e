// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        ErrorCode,
        Fail,
    },
    limits::MAX_DUMP_STEP_SEGMENTS,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Set of steps to capture, parsed from an expression such as `"0|5-10|20"`. An empty set captures every step.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DumpStep {
    /// Inclusive ranges.
    ranges: Vec<(u64, u64)>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DumpStep {
    pub fn parse(expr: &str) -> Result<Self, Fail> {
        let expr: &str = expr.trim();
        if expr.is_empty() {
            return Ok(Self::default());
        }

        let segments: Vec<&str> = expr.split('|').collect();
        if segments.len() > MAX_DUMP_STEP_SEGMENTS {
            let cause: String = format!(
                "too many dump step segments (count={}, max={})",
                segments.len(),
                MAX_DUMP_STEP_SEGMENTS
            );
            error!("parse(): {}", cause);
            return Err(Fail::new(ErrorCode::DumpFailed, &cause));
        }

        let mut ranges: Vec<(u64, u64)> = Vec::with_capacity(segments.len());
        for segment in segments {
            let range: (u64, u64) = match segment.split_once('-') {
                Some((lo, hi)) => {
                    let (lo, hi): (u64, u64) = (Self::number(lo)?, Self::number(hi)?);
                    if lo <= hi {
                        (lo, hi)
                    } else {
                        (hi, lo)
                    }
                },
                None => {
                    let step: u64 = Self::number(segment)?;
                    (step, step)
                },
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }

    /// Whether every step is captured.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, step: u64) -> bool {
        self.is_empty() || self.ranges.iter().any(|(lo, hi)| *lo <= step && step <= *hi)
    }

    fn number(text: &str) -> Result<u64, Fail> {
        match text.trim().parse::<u64>() {
            Ok(n) => Ok(n),
            Err(e) => {
                let cause: String = format!("invalid dump step {:?} ({})", text, e);
                error!("parse(): {}", cause);
                Err(Fail::new(ErrorCode::DumpFailed, &cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
