// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    addr_of,
    Harness,
};
use ::aicpu_sched::{
    dump::{
        op_mapping::{
            FftsContext,
            MemRange,
        },
        sink::{
            CapturedTensor,
            TensorKind,
        },
        FileDumpSink,
        HostMemory,
        OpDumpTaskManager,
        OpMappingInfoBuilder,
        OpMappingTask,
        TensorDesc,
    },
    ensure_eq,
    kernel::KernelRegistry,
    runtime::limits::INVALID_VAL,
    ErrorCode,
};
use ::anyhow::Result;
use ::std::{
    fs,
    path::PathBuf,
    sync::Arc,
};

//======================================================================================================================
// Helpers
//======================================================================================================================

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

//======================================================================================================================
// Tests
//======================================================================================================================

#[test]
fn dumps_inputs_and_outputs_until_unloaded() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let input: Vec<u8> = pattern(16, 0x10);
    let output: Vec<u8> = pattern(8, 0x80);
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(5, "resnet")
        .task(
            OpMappingTask::new(1, 10, "conv1")
                .op_type("Conv2D")
                .input(TensorDesc::new(addr_of(&input), 16).with_dims(&[2, 8]))
                .output(TensorDesc::new(addr_of(&output), 8)),
        )
        .encode();
    harness.ctx.dumps().load_op_mapping_info(&mapping)?;
    ensure_eq!(harness.ctx.dumps().is_dump_task(1, 10), true);

    harness.ctx.dumps().dump_op_info(1, 10)?;
    let captured: Vec<CapturedTensor> = harness.sink.captured();
    ensure_eq!(captured.len(), 2);
    ensure_eq!(captured[0].record.kind, TensorKind::Input);
    ensure_eq!(captured[0].record.dims.as_slice(), &[2i64, 8][..]);
    ensure_eq!(captured[0].data, input);
    ensure_eq!(captured[1].record.kind, TensorKind::Output);
    ensure_eq!(captured[1].data, output);
    ensure_eq!(captured[0].target.op_name.as_str(), "conv1");

    // Reloading the same model replaces its descriptors instead of duplicating them.
    harness.ctx.dumps().load_op_mapping_info(&mapping)?;
    ensure_eq!(harness.ctx.dumps().task_count(), 1);

    let unload: Vec<u8> = OpMappingInfoBuilder::new(5, "resnet").unload().encode();
    harness.ctx.dumps().load_op_mapping_info(&unload)?;
    harness.sink.clear();
    harness.ctx.dumps().dump_op_info(1, 10)?;
    ensure_eq!(harness.sink.captured().is_empty(), true);
    ensure_eq!(harness.ctx.dumps().is_dump_task(1, 10), false);
    Ok(())
}

#[test]
fn zero_address_and_size_are_skipped() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let output: Vec<u8> = pattern(4, 1);
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(6, "net")
        .task(
            OpMappingTask::new(2, 20, "relu")
                .input(TensorDesc::new(0, 64))
                .input(TensorDesc::new(addr_of(&output), 0))
                .output(TensorDesc::new(addr_of(&output), 4)),
        )
        .encode();
    harness.ctx.dumps().load_op_mapping_info(&mapping)?;
    harness.ctx.dumps().dump_op_info(2, 20)?;
    let captured: Vec<CapturedTensor> = harness.sink.captured();
    ensure_eq!(captured.len(), 1);
    ensure_eq!(captured[0].record.kind, TensorKind::Output);
    ensure_eq!(captured[0].data, output);
    Ok(())
}

#[test]
fn indirect_tensors_follow_the_pointer() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let data: Vec<u8> = pattern(12, 0x40);
    let pointer: Box<u64> = Box::new(addr_of(&data));
    let pointer_addr: u64 = &*pointer as *const u64 as u64;
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(7, "net")
        .task(OpMappingTask::new(3, 30, "gather").output(TensorDesc::new(pointer_addr, 8).with_offset(4).indirect()))
        .encode();
    harness.ctx.dumps().load_op_mapping_info(&mapping)?;
    harness.ctx.dumps().dump_op_info(3, 30)?;
    let captured: Vec<CapturedTensor> = harness.sink.captured();
    ensure_eq!(captured.len(), 1);
    ensure_eq!(captured[0].data.as_slice(), &data[4..12]);
    Ok(())
}

#[test]
fn dump_step_filters_iterations() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let data: Vec<u8> = pattern(4, 9);
    let mut step: Box<u64> = Box::new(1);
    let step_addr: u64 = &*step as *const u64 as u64;
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(8, "net")
        .dump_step("0|2-3")
        .step_addrs(step_addr, 0, 0)
        .task(OpMappingTask::new(4, 40, "add").output(TensorDesc::new(addr_of(&data), 4)))
        .encode();
    harness.ctx.dumps().load_op_mapping_info(&mapping)?;

    harness.ctx.dumps().dump_op_info(4, 40)?;
    ensure_eq!(harness.sink.captured().is_empty(), true);

    *step = 3;
    harness.ctx.dumps().dump_op_info(4, 40)?;
    ensure_eq!(harness.sink.captured().len(), 1);
    Ok(())
}

#[test]
fn ffts_plus_dumps_one_sub_context() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    let whole: Vec<u8> = pattern(32, 0);
    let slice: Vec<u8> = pattern(4, 0xA0);
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(9, "net")
        .task(
            OpMappingTask::new(5, 50, "fused")
                .output(TensorDesc::new(addr_of(&whole), 32))
                .context(FftsContext {
                    context_id: 0,
                    thread_id: 1,
                    inputs: Vec::new(),
                    outputs: vec![MemRange::new(addr_of(&slice), 4)],
                }),
        )
        .encode();
    harness.ctx.dumps().load_op_mapping_info(&mapping)?;

    harness.ctx.dumps().dump_ffts_plus_op_info(5, 50, 0, 1)?;
    let captured: Vec<CapturedTensor> = harness.sink.captured();
    ensure_eq!(captured.len(), 1);
    ensure_eq!(captured[0].data, slice);
    ensure_eq!(captured[0].target.context, Some((0, 1)));

    harness.sink.clear();
    harness.ctx.dumps().dump_ffts_plus_op_info(5, 50, INVALID_VAL, 1)?;
    harness.ctx.dumps().dump_ffts_plus_op_info(5, 50, 0, 7)?;
    ensure_eq!(harness.sink.captured().is_empty(), true);
    Ok(())
}

#[test]
fn malformed_mappings_are_rejected() -> Result<()> {
    let harness: Harness = Harness::new(KernelRegistry::with_builtins());
    for buf in [Vec::new(), vec![0u8; 7]] {
        match harness.ctx.dumps().load_op_mapping_info(&buf) {
            Err(e) => ensure_eq!(e.code, ErrorCode::DumpFailed),
            Ok(()) => anyhow::bail!("malformed mapping accepted"),
        }
    }
    ensure_eq!(harness.ctx.dumps().task_count(), 0);
    Ok(())
}

#[test]
fn file_sink_writes_one_file_per_op() -> Result<()> {
    let dir: ::tempfile::TempDir = ::tempfile::tempdir()?;
    // SAFETY: the mapping below only describes `data`.
    let memory: HostMemory = unsafe { HostMemory::new() };
    let manager: OpDumpTaskManager = OpDumpTaskManager::new(
        Arc::new(memory),
        Arc::new(FileDumpSink::new(&dir.path().to_string_lossy())),
        4,
    );
    let data: Vec<u8> = pattern(10, 3);
    let mapping: Vec<u8> = OpMappingInfoBuilder::new(11, "bert")
        .task(OpMappingTask::new(6, 60, "layer/matmul").output(TensorDesc::new(addr_of(&data), 10)))
        .encode();
    manager.load_op_mapping_info(&mapping)?;
    manager.dump_op_info(6, 60)?;

    let path: PathBuf = dir.path().join("bert.layer_matmul.6.60.bin");
    let bytes: Vec<u8> = fs::read(path)?;
    ensure_eq!(bytes.ends_with(&data), true);
    Ok(())
}
