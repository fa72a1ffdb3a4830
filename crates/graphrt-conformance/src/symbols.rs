use std::fmt::Debug;
use std::mem::size_of;

use bytemuck::Pod;
use graphrt::{
    AllocationKind, DevicePtr, ErrorCode, Graph, GraphExec, GraphNode, MemcpyFromSymbolParams,
    MemcpyKind, MemcpyToSymbolParams, Runtime, RuntimeResult, Stream, SymbolHandle,
};

use crate::expect_code;

const ARRAY_SIZE: usize = 5;

/// Element types exercised against device symbols.
pub trait SymbolElement: Pod + PartialEq + Debug + Send + Sync {
    const NAME: &'static str;

    fn from_u8(value: u8) -> Self;
}

macro_rules! symbol_element {
    ($ty:ty, $name:literal) => {
        impl SymbolElement for $ty {
            const NAME: &'static str = $name;

            fn from_u8(value: u8) -> Self {
                value as $ty
            }
        }
    };
}

symbol_element!(u8, "char");
symbol_element!(i32, "int");
symbol_element!(f32, "float");
symbol_element!(f64, "double");

/// One symbol window under test: `len` elements starting `offset` elements in.
#[derive(Debug, Clone, Copy)]
struct SymbolCase {
    symbol: SymbolHandle,
    alt: SymbolHandle,
    offset: usize,
    len: usize,
}

impl SymbolCase {
    fn is_array(&self) -> bool {
        self.len > 1
    }

    fn expected<T: SymbolElement>(&self) -> Vec<T> {
        (self.offset..self.offset + self.len)
            .map(|i| T::from_u8(i as u8 + 1))
            .collect()
    }
}

/// Registers scalar and array symbols (plain and constant) plus zeroed alternates.
fn register<T: SymbolElement>(runtime: &Runtime) -> Vec<SymbolCase> {
    let scalar = [T::from_u8(1)];
    let array: Vec<T> = (1..=ARRAY_SIZE as u8).map(T::from_u8).collect();
    let zero = vec![T::from_u8(0); ARRAY_SIZE];
    let register = |name: &str, values: &[T], constant: bool| {
        runtime
            .register_symbol(&format!("{}_{name}", T::NAME), values, constant)
            .expect("register symbol")
    };
    let var = register("device_var", &scalar, false);
    let const_var = register("const_device_var", &scalar, true);
    let arr = register("device_arr", &array, false);
    let const_arr = register("const_device_arr", &array, true);
    let alt_var = register("alt_device_var", &zero[..1], false);
    let alt_const_var = register("alt_const_device_var", &zero[..1], true);
    let alt_arr = register("alt_device_arr", &zero, false);
    let alt_const_arr = register("alt_const_device_arr", &zero, true);

    let mut cases = vec![
        SymbolCase { symbol: var, alt: alt_var, offset: 0, len: 1 },
        SymbolCase { symbol: const_var, alt: alt_const_var, offset: 0, len: 1 },
    ];
    for offset in [0, ARRAY_SIZE / 2] {
        let len = ARRAY_SIZE - offset;
        cases.push(SymbolCase { symbol: arr, alt: alt_arr, offset, len });
        cases.push(SymbolCase { symbol: const_arr, alt: alt_const_arr, offset, len });
    }
    cases
}

const FROM_SYMBOL_TARGETS: [(AllocationKind, MemcpyKind); 4] = [
    (AllocationKind::Device, MemcpyKind::DeviceToDevice),
    (AllocationKind::Device, MemcpyKind::Default),
    (AllocationKind::Pinned, MemcpyKind::DeviceToHost),
    (AllocationKind::Pinned, MemcpyKind::Default),
];

const TO_SYMBOL_SOURCES: [(AllocationKind, MemcpyKind); 4] = [
    (AllocationKind::Device, MemcpyKind::DeviceToDevice),
    (AllocationKind::Device, MemcpyKind::Default),
    (AllocationKind::Pinned, MemcpyKind::HostToDevice),
    (AllocationKind::Pinned, MemcpyKind::Default),
];

/// Copies `case` out of its symbol through `copy` into every target kind and checks the data.
fn from_symbol_shell<T, F>(runtime: &Runtime, mut copy: F)
where
    T: SymbolElement,
    F: FnMut(&SymbolCase, DevicePtr, MemcpyKind) -> RuntimeResult<()>,
{
    for case in register::<T>(runtime) {
        for (alloc, kind) in FROM_SYMBOL_TARGETS {
            let dst = runtime.alloc(alloc, case.len * size_of::<T>()).expect("dst");
            copy(&case, dst, kind).expect("copy from symbol");
            let got: Vec<T> = runtime.read(dst, case.len).expect("read back");
            assert_eq!(got, case.expected::<T>(), "{} {case:?} {alloc:?} {kind:?}", T::NAME);
            runtime.free(dst).expect("free");
        }
    }
}

/// Writes fresh values into `case` through `copy` from every source kind and checks the symbol.
fn to_symbol_shell<T, F>(runtime: &Runtime, mut copy: F)
where
    T: SymbolElement,
    F: FnMut(&SymbolCase, DevicePtr, MemcpyKind) -> RuntimeResult<()>,
{
    for case in register::<T>(runtime) {
        for (round, (alloc, kind)) in TO_SYMBOL_SOURCES.into_iter().enumerate() {
            let values: Vec<T> = (0..case.len)
                .map(|i| T::from_u8((10 * (round + 1) + i) as u8))
                .collect();
            let bytes = case.len * size_of::<T>();
            let src = runtime.alloc(alloc, bytes).expect("src");
            runtime.write(src, &values).expect("stage values");
            copy(&case, src, kind).expect("copy to symbol");

            let host = runtime.alloc_pageable(bytes).expect("host");
            runtime
                .memcpy_from_symbol(host, case.symbol, bytes, case.offset * size_of::<T>(), MemcpyKind::Default)
                .expect("read symbol");
            let got: Vec<T> = runtime.read(host, case.len).expect("read back");
            assert_eq!(got, values, "{} {case:?} {alloc:?} {kind:?}", T::NAME);
            runtime.free(src).expect("free src");
            runtime.free(host).expect("free host");
        }
    }
}

fn run(stream: &Stream, graph: Graph) -> RuntimeResult<()> {
    let exec = graph.instantiate()?;
    exec.launch(stream)?;
    stream.synchronize()
}

fn add_from_symbol_typed<T: SymbolElement>(runtime: &Runtime, stream: &Stream) {
    from_symbol_shell::<T, _>(runtime, |case, dst, kind| {
        let bytes = case.len * size_of::<T>();
        let mut graph = runtime.create_graph();
        graph.add_memcpy_node_from_symbol(
            &[],
            MemcpyFromSymbolParams::new(dst, case.symbol, bytes, case.offset * size_of::<T>(), kind),
        )?;
        run(stream, graph)
    });
}

pub fn add_from_symbol_nodes(runtime: &Runtime) {
    let stream = runtime.create_stream().expect("stream");
    add_from_symbol_typed::<u8>(runtime, &stream);
    add_from_symbol_typed::<i32>(runtime, &stream);
    add_from_symbol_typed::<f32>(runtime, &stream);
    add_from_symbol_typed::<f64>(runtime, &stream);
}

fn add_to_symbol_typed<T: SymbolElement>(runtime: &Runtime, stream: &Stream) {
    to_symbol_shell::<T, _>(runtime, |case, src, kind| {
        let bytes = case.len * size_of::<T>();
        let mut graph = runtime.create_graph();
        graph.add_memcpy_node_to_symbol(
            &[],
            MemcpyToSymbolParams::new(case.symbol, src, bytes, case.offset * size_of::<T>(), kind),
        )?;
        run(stream, graph)
    });
}

pub fn add_to_symbol_nodes(runtime: &Runtime) {
    let stream = runtime.create_stream().expect("stream");
    add_to_symbol_typed::<u8>(runtime, &stream);
    add_to_symbol_typed::<i32>(runtime, &stream);
    add_to_symbol_typed::<f32>(runtime, &stream);
    add_to_symbol_typed::<f64>(runtime, &stream);
}

/// The node starts out pointing at the zeroed alternate symbol (shifted by one element for
/// arrays) and is retargeted on the instance before launch.
fn exec_from_symbol_typed<T: SymbolElement>(runtime: &Runtime, stream: &Stream) {
    from_symbol_shell::<T, _>(runtime, |case, dst, kind| {
        let size = size_of::<T>();
        let bytes = case.len * size;
        let offset = case.offset * size;
        let shift = usize::from(case.is_array());
        let mut graph = runtime.create_graph();
        let node = graph.add_memcpy_node_from_symbol(
            &[],
            MemcpyFromSymbolParams::new(
                dst.element::<T>(shift),
                case.alt,
                bytes - shift * size,
                offset + shift * size,
                kind,
            ),
        )?;
        let mut exec = graph.instantiate()?;
        exec.set_memcpy_node_params_from_symbol(
            node,
            MemcpyFromSymbolParams::new(dst, case.symbol, bytes, offset, kind),
        )?;
        exec.launch(stream)?;
        stream.synchronize()
    });
}

pub fn exec_from_symbol_set_params(runtime: &Runtime) {
    let stream = runtime.create_stream().expect("stream");
    exec_from_symbol_typed::<u8>(runtime, &stream);
    exec_from_symbol_typed::<i32>(runtime, &stream);
    exec_from_symbol_typed::<f32>(runtime, &stream);
    exec_from_symbol_typed::<f64>(runtime, &stream);
}

fn exec_to_symbol_typed<T: SymbolElement>(runtime: &Runtime, stream: &Stream) {
    to_symbol_shell::<T, _>(runtime, |case, src, kind| {
        let size = size_of::<T>();
        let bytes = case.len * size;
        let offset = case.offset * size;
        let shift = usize::from(case.is_array());
        let mut graph = runtime.create_graph();
        let node = graph.add_memcpy_node_to_symbol(
            &[],
            MemcpyToSymbolParams::new(
                case.alt,
                src.element::<T>(shift),
                bytes - shift * size,
                offset + shift * size,
                kind,
            ),
        )?;
        let mut exec = graph.instantiate()?;
        exec.set_memcpy_node_params_to_symbol(
            node,
            MemcpyToSymbolParams::new(case.symbol, src, bytes, offset, kind),
        )?;
        exec.launch(stream)?;
        stream.synchronize()
    });
}

pub fn exec_to_symbol_set_params(runtime: &Runtime) {
    let stream = runtime.create_stream().expect("stream");
    exec_to_symbol_typed::<u8>(runtime, &stream);
    exec_to_symbol_typed::<i32>(runtime, &stream);
    exec_to_symbol_typed::<f32>(runtime, &stream);
    exec_to_symbol_typed::<f64>(runtime, &stream);
}

/// Argument checks shared by every from-symbol entry point.
fn from_symbol_common_negative<F>(mut f: F, dst: DevicePtr, symbol: SymbolHandle, count: usize)
where
    F: FnMut(DevicePtr, SymbolHandle, usize, usize, MemcpyKind) -> RuntimeResult<()>,
{
    let default = MemcpyKind::Default;
    expect_code(f(DevicePtr::NULL, symbol, count, 0, default), ErrorCode::InvalidValue);
    expect_code(f(dst, SymbolHandle::NULL, count, 0, default), ErrorCode::InvalidSymbol);
    expect_code(
        f(dst, SymbolHandle::from_raw(u64::MAX), count, 0, default),
        ErrorCode::InvalidSymbol,
    );
    expect_code(f(dst, symbol, 0, 0, default), ErrorCode::InvalidValue);
    expect_code(f(dst, symbol, count + 1, 0, default), ErrorCode::InvalidValue);
    expect_code(f(dst, symbol, count, 1, default), ErrorCode::InvalidValue);
    expect_code(
        f(dst, symbol, count, 0, MemcpyKind::HostToDevice),
        ErrorCode::InvalidMemcpyDirection,
    );
    expect_code(f(dst, symbol, count, 0, MemcpyKind::HostToHost), ErrorCode::InvalidMemcpyDirection);
}

fn to_symbol_common_negative<F>(mut f: F, symbol: SymbolHandle, src: DevicePtr, count: usize)
where
    F: FnMut(SymbolHandle, DevicePtr, usize, usize, MemcpyKind) -> RuntimeResult<()>,
{
    let default = MemcpyKind::Default;
    expect_code(f(symbol, DevicePtr::NULL, count, 0, default), ErrorCode::InvalidValue);
    expect_code(f(SymbolHandle::NULL, src, count, 0, default), ErrorCode::InvalidSymbol);
    expect_code(f(symbol, src, 0, 0, default), ErrorCode::InvalidValue);
    expect_code(f(symbol, src, count + 1, 0, default), ErrorCode::InvalidValue);
    expect_code(f(symbol, src, count, 1, default), ErrorCode::InvalidValue);
    expect_code(
        f(symbol, src, count, 0, MemcpyKind::DeviceToHost),
        ErrorCode::InvalidMemcpyDirection,
    );
}

pub fn from_symbol_negative(runtime: &Runtime) {
    let symbol = runtime
        .register_symbol("int_device_var", &[1i32], false)
        .expect("symbol");
    let dst = runtime.malloc(size_of::<i32>()).expect("dst");
    let count = size_of::<i32>();

    let mut graph = runtime.create_graph();
    from_symbol_common_negative(
        |dst, symbol, count, offset, kind| {
            graph
                .add_memcpy_node_from_symbol(
                    &[],
                    MemcpyFromSymbolParams::new(dst, symbol, count, offset, kind),
                )
                .map(drop)
        },
        dst,
        symbol,
        count,
    );
    assert!(graph.is_empty());

    from_symbol_common_negative(
        |dst, symbol, count, offset, kind| runtime.memcpy_from_symbol(dst, symbol, count, offset, kind),
        dst,
        symbol,
        count,
    );

    let stream = runtime.create_stream().expect("stream");
    from_symbol_common_negative(
        |dst, symbol, count, offset, kind| {
            stream.memcpy_from_symbol_async(dst, symbol, count, offset, kind)
        },
        dst,
        symbol,
        count,
    );
    stream.synchronize().expect("nothing was enqueued");

    expect_code(MemcpyKind::from_raw(-1), ErrorCode::InvalidMemcpyDirection);
}

pub fn to_symbol_negative(runtime: &Runtime) {
    let symbol = runtime
        .register_symbol("int_device_var", &[1i32], false)
        .expect("symbol");
    let src = runtime.malloc(size_of::<i32>()).expect("src");
    let count = size_of::<i32>();

    let mut graph = runtime.create_graph();
    to_symbol_common_negative(
        |symbol, src, count, offset, kind| {
            graph
                .add_memcpy_node_to_symbol(
                    &[],
                    MemcpyToSymbolParams::new(symbol, src, count, offset, kind),
                )
                .map(drop)
        },
        symbol,
        src,
        count,
    );
    assert!(graph.is_empty());

    to_symbol_common_negative(
        |symbol, src, count, offset, kind| runtime.memcpy_to_symbol(symbol, src, count, offset, kind),
        symbol,
        src,
        count,
    );
    expect_code(MemcpyKind::from_raw(5), ErrorCode::InvalidMemcpyDirection);
}

fn from_symbol_exec(runtime: &Runtime) -> (GraphExec, GraphNode, SymbolHandle, DevicePtr) {
    let symbol = runtime
        .register_symbol("int_device_var", &[1i32], false)
        .expect("symbol");
    let var = runtime.malloc(size_of::<i32>()).expect("var");
    let mut graph = runtime.create_graph();
    let node = graph
        .add_memcpy_node_from_symbol(
            &[],
            MemcpyFromSymbolParams::new(var, symbol, size_of::<i32>(), 0, MemcpyKind::Default),
        )
        .expect("node");
    let exec = graph.instantiate().expect("instantiate");
    (exec, node, symbol, var)
}

pub fn exec_from_symbol_negative(runtime: &Runtime) {
    let (mut exec, node, symbol, var) = from_symbol_exec(runtime);
    from_symbol_common_negative(
        |dst, symbol, count, offset, kind| {
            exec.set_memcpy_node_params_from_symbol(
                node,
                MemcpyFromSymbolParams::new(dst, symbol, count, offset, kind),
            )
        },
        var,
        symbol,
        size_of::<i32>(),
    );
}

pub fn exec_from_symbol_direction_change(runtime: &Runtime) {
    let (mut exec, node, symbol, var) = from_symbol_exec(runtime);
    let count = size_of::<i32>();
    expect_code(
        exec.set_memcpy_node_params_from_symbol(
            node,
            MemcpyFromSymbolParams::new(var, symbol, count, 0, MemcpyKind::DeviceToHost),
        ),
        ErrorCode::InvalidValue,
    );

    if runtime.device_count() < 2 {
        return;
    }
    let elsewhere = {
        let _device = runtime.device_scope(1).expect("device 1");
        runtime.malloc(count).expect("device 1 allocation")
    };
    expect_code(
        exec.set_memcpy_node_params_from_symbol(
            node,
            MemcpyFromSymbolParams::new(elsewhere, symbol, count, 0, MemcpyKind::Default),
        ),
        ErrorCode::InvalidMemcpyDirection,
    );
}
