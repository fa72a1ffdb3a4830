use std::sync::Arc;

use anyhow::Result;
use graphrt::kernels::{
    has_kernel, kernel_by_name, list_kernels, register_kernel, BIT_EXTRACT_U32, EMPTY_KERNEL,
    VECTOR_ADD_I32,
};
use graphrt::{
    AllocationKind, DeviceBuffer, DevicePtr, ErrorCode, Kernel, KernelArg, KernelContext,
    KernelNodeParams, LaunchConfig, MemcpyKind, MemsetParams, Runtime, RuntimeConfig, RuntimeResult,
};

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default())
}

/// `out[i] = i * scale` for every launched thread; arguments `(out, scale)`.
struct Iota;

impl Kernel for Iota {
    fn name(&self) -> &str {
        "test_iota_u32"
    }

    fn execute(&self, ctx: &KernelContext<'_>, args: &[KernelArg]) -> RuntimeResult<()> {
        let out = ctx.arg_ptr(args, 0)?;
        let scale = ctx.arg_len(args, 1)? as u32;
        let values: Vec<u32> = (0..ctx.total_threads() as u32).map(|i| i * scale).collect();
        ctx.write(out, &values)
    }
}

#[test]
fn registry_resolves_builtins_and_custom_kernels() -> Result<()> {
    assert!(has_kernel(BIT_EXTRACT_U32));
    assert!(has_kernel(EMPTY_KERNEL));
    assert!(list_kernels().iter().any(|name| name == "vector_add_f32"));
    assert!(kernel_by_name("no_such_kernel").is_none());

    register_kernel(Arc::new(Iota))?;
    let err = register_kernel(Arc::new(Iota)).expect_err("duplicate name");
    assert_eq!(err.code(), ErrorCode::InvalidValue);

    let rt = runtime();
    let out = DeviceBuffer::<u32>::new(&rt, AllocationKind::Device, 64)?;
    let iota = kernel_by_name("test_iota_u32").ok_or_else(|| anyhow::anyhow!("registered"))?;
    rt.launch_kernel(&iota, LaunchConfig::new(2, 32), &[out.ptr().into(), KernelArg::U32(3)])?;
    let values = out.read()?;
    assert!(values.iter().enumerate().all(|(i, v)| *v == 3 * i as u32));
    Ok(())
}

#[test]
fn launch_config_is_validated() -> Result<()> {
    let rt = runtime();
    let empty = kernel_by_name(EMPTY_KERNEL).ok_or_else(|| anyhow::anyhow!("builtin"))?;
    for config in [LaunchConfig::new(0, 32), LaunchConfig::new(1, 0), LaunchConfig::new(1, 2048)] {
        let err = rt.launch_kernel(&empty, config, &[]).expect_err("bad launch");
        assert_eq!(err.code(), ErrorCode::InvalidValue);
    }
    assert_eq!(LaunchConfig::for_elements(1000, 256).total_threads(), 1024);
    Ok(())
}

#[test]
fn out_of_bounds_kernel_access_fails_the_launch() -> Result<()> {
    let rt = runtime();
    let out = rt.malloc(16)?;
    let iota = Arc::new(Iota) as Arc<dyn Kernel>;
    let err = rt
        .launch_kernel(&iota, LaunchConfig::new(1, 64), &[out.into(), KernelArg::U32(1)])
        .expect_err("writes past the allocation");
    assert_eq!(err.code(), ErrorCode::LaunchFailure);
    Ok(())
}

#[test]
fn oversized_length_argument_fails_the_launch() -> Result<()> {
    let rt = runtime();
    let a = rt.malloc(64)?;
    let b = rt.malloc(64)?;
    let c = rt.malloc(64)?;
    let add = kernel_by_name(VECTOR_ADD_I32).ok_or_else(|| anyhow::anyhow!("builtin"))?;
    let mut graph = rt.create_graph();
    graph.add_kernel_node(
        &[],
        KernelNodeParams::new(
            add,
            LaunchConfig::new(1, 16),
            vec![a.into(), b.into(), c.into(), KernelArg::Usize(usize::MAX / 2)],
        ),
    )?;
    let exec = graph.instantiate()?;
    let stream = rt.create_stream()?;
    exec.launch(&stream)?;
    let err = stream.synchronize().expect_err("length overflows the read");
    assert_eq!(err.code(), ErrorCode::LaunchFailure);
    Ok(())
}

#[test]
fn pitched_memset_leaves_padding_alone() -> Result<()> {
    let rt = runtime();
    let (width, height, pitch) = (6usize, 4usize, 16usize);
    let dev = rt.malloc(pitch * height)?;
    rt.memset_d8(dev, 0xff, pitch * height)?;

    let stream = rt.create_stream()?;
    stream.memset_2d_async(MemsetParams {
        dst: dev,
        value: 0x0102,
        element_size: 2,
        width,
        height,
        pitch,
    })?;
    stream.synchronize()?;

    let bytes: Vec<u8> = rt.read(dev, pitch * height)?;
    for row in bytes.chunks(pitch) {
        for pair in row[..width * 2].chunks(2) {
            assert_eq!(pair, [0x02, 0x01]);
        }
        assert!(row[width * 2..].iter().all(|b| *b == 0xff));
    }

    let bad = MemsetParams {
        dst: dev,
        value: 0,
        element_size: 1,
        width: 20,
        height: 2,
        pitch: 16,
    };
    assert_eq!(rt.memset(bad).expect_err("pitch too small").code(), ErrorCode::InvalidValue);
    let bad = MemsetParams { element_size: 3, ..bad };
    assert_eq!(rt.memset(bad).expect_err("bad element size").code(), ErrorCode::InvalidValue);
    Ok(())
}

#[test]
fn allocations_report_their_attributes() -> Result<()> {
    let rt = Runtime::with_config(RuntimeConfig::default().with_device_count(2));
    let host = rt.alloc_pageable(8)?;
    let pinned = rt.host_malloc(8)?;
    let managed = rt.malloc_managed(8)?;
    let dev = {
        let _guard = rt.device_scope(1)?;
        assert_eq!(rt.current_device(), 1);
        rt.malloc(8)?
    };
    assert_eq!(rt.current_device(), 0);

    assert_eq!(rt.pointer_attributes(host)?.kind, AllocationKind::Pageable);
    assert_eq!(rt.pointer_attributes(pinned)?.kind, AllocationKind::Pinned);
    assert_eq!(rt.pointer_attributes(managed)?.kind, AllocationKind::Managed);
    let attrs = rt.pointer_attributes(dev.offset(4))?;
    assert_eq!(attrs.kind, AllocationKind::Device);
    assert_eq!(attrs.device, 1);
    assert_eq!(attrs.base, dev);

    assert_eq!(
        rt.pointer_attributes(DevicePtr::NULL).expect_err("null").code(),
        ErrorCode::InvalidValue
    );
    assert_eq!(rt.set_device(2).expect_err("no such device").code(), ErrorCode::InvalidDevice);
    assert_eq!(rt.device_properties(1)?.warp_size, rt.config().warp_size);

    rt.free(dev)?;
    assert_eq!(rt.free(dev).expect_err("double free").code(), ErrorCode::InvalidValue);
    Ok(())
}

#[test]
fn sync_copies_check_direction() -> Result<()> {
    let rt = runtime();
    let host = rt.alloc_pageable(32)?;
    let dev = rt.malloc(32)?;
    let managed = rt.malloc_managed(32)?;
    rt.write(host, &[7u8; 32])?;

    rt.memcpy(dev, host, 32, MemcpyKind::HostToDevice)?;
    rt.memcpy(managed, dev, 32, MemcpyKind::DeviceToHost)?;
    assert_eq!(rt.read::<u8>(managed, 32)?, vec![7; 32]);
    assert_eq!(
        rt.memcpy(dev, host, 32, MemcpyKind::DeviceToDevice)
            .expect_err("host source")
            .code(),
        ErrorCode::InvalidMemcpyDirection
    );
    assert_eq!(
        rt.memcpy(dev, host, 64, MemcpyKind::Default).expect_err("too long").code(),
        ErrorCode::InvalidValue
    );
    Ok(())
}

#[test]
fn symbols_round_trip_through_sync_copies() -> Result<()> {
    let rt = runtime();
    let table = rt.register_symbol("lookup_table", &[10u32, 20, 30, 40], true)?;
    assert_eq!(rt.symbol("lookup_table")?, table);
    assert_eq!(rt.symbol_size(table)?, 16);
    assert_eq!(rt.symbol("missing").expect_err("unknown").code(), ErrorCode::InvalidSymbol);

    let host = rt.alloc_pageable(8)?;
    rt.write(host, &[1u32, 2])?;
    rt.memcpy_to_symbol(table, host, 8, 8, MemcpyKind::HostToDevice)?;

    let out = rt.alloc_pageable(16)?;
    rt.memcpy_from_symbol(out, table, 16, 0, MemcpyKind::Default)?;
    assert_eq!(rt.read::<u32>(out, 4)?, vec![10, 20, 1, 2]);

    let address = rt.symbol_address(table)?;
    assert_eq!(rt.pointer_attributes(address)?.kind, AllocationKind::Device);
    assert_eq!(rt.free(address).expect_err("symbol storage").code(), ErrorCode::InvalidValue);
    Ok(())
}
