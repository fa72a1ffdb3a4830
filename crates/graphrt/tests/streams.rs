use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use graphrt::kernels::{kernel_by_name, VECTOR_ADD_I32};
use graphrt::{
    ErrorCode, Event, Kernel, KernelArg, KernelContext, LaunchConfig, MemcpyKind, Runtime,
    RuntimeConfig, RuntimeResult, Stream,
};

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default())
}

#[test]
fn work_runs_in_submission_order() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..32 {
        let seen = Arc::clone(&seen);
        stream.launch_host_func(move || {
            if let Ok(mut seen) = seen.lock() {
                seen.push(i);
            }
        })?;
    }
    stream.synchronize()?;
    let seen = seen.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
    assert_eq!(*seen, (0..32).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn copies_then_kernel_then_copy_back() -> Result<()> {
    let rt = runtime();
    let n = 300usize;
    let bytes = n * 4;
    let a: Vec<i32> = (0..n as i32).collect();
    let b: Vec<i32> = (0..n as i32).map(|x| 100 - x).collect();
    let a_host = rt.host_malloc(bytes)?;
    let b_host = rt.host_malloc(bytes)?;
    let c_host = rt.host_malloc(bytes)?;
    rt.write(a_host, &a)?;
    rt.write(b_host, &b)?;
    let a_dev = rt.malloc(bytes)?;
    let b_dev = rt.malloc(bytes)?;
    let c_dev = rt.malloc(bytes)?;

    let stream = rt.create_stream()?;
    let add = kernel_by_name(VECTOR_ADD_I32).ok_or_else(|| anyhow::anyhow!("missing kernel"))?;
    stream.memcpy_async(a_dev, a_host, bytes, MemcpyKind::HostToDevice)?;
    stream.memcpy_async(b_dev, b_host, bytes, MemcpyKind::HostToDevice)?;
    stream.launch_kernel(
        &add,
        LaunchConfig::for_elements(n, 128),
        &[a_dev.into(), b_dev.into(), c_dev.into(), KernelArg::Usize(n)],
    )?;
    stream.memcpy_async(c_host, c_dev, bytes, MemcpyKind::DeviceToHost)?;
    stream.synchronize()?;
    assert!(rt.read::<i32>(c_host, n)?.iter().all(|v| *v == 100));
    Ok(())
}

#[test]
fn failed_work_is_sticky() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let add = kernel_by_name(VECTOR_ADD_I32).ok_or_else(|| anyhow::anyhow!("missing kernel"))?;
    // Argument 0 must be a pointer.
    stream.launch_kernel(&add, LaunchConfig::new(1, 1), &[KernelArg::I32(3)])?;

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    stream.launch_host_func(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })?;

    let err = stream.synchronize().expect_err("kernel must fail");
    assert_eq!(err.code(), ErrorCode::LaunchFailure);
    assert_eq!(stream.query().expect_err("still failed").code(), ErrorCode::LaunchFailure);
    assert_eq!(
        rt.device_synchronize().expect_err("device sees it").code(),
        ErrorCode::LaunchFailure
    );
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    drop(stream);
    rt.device_synchronize()?;
    Ok(())
}

struct Explodes;

impl Kernel for Explodes {
    fn name(&self) -> &str {
        "test_explodes"
    }

    fn execute(&self, _ctx: &KernelContext<'_>, _args: &[KernelArg]) -> RuntimeResult<()> {
        panic!("kernel body blew up");
    }
}

/// Synchronises on another thread so a stuck stream fails the test instead of hanging it.
fn synchronize_within(stream: Stream, limit: Duration) -> Result<RuntimeResult<()>> {
    let (done, result) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = done.send(stream.synchronize());
    });
    result
        .recv_timeout(limit)
        .map_err(|_| anyhow::anyhow!("synchronize did not return"))
}

#[test]
fn panicking_kernel_is_a_launch_failure() -> Result<()> {
    let rt = runtime();
    let kernel: Arc<dyn Kernel> = Arc::new(Explodes);

    let err = rt
        .launch_kernel(&kernel, LaunchConfig::new(1, 1), &[])
        .expect_err("panics inside the kernel");
    assert_eq!(err.code(), ErrorCode::LaunchFailure);

    let stream = rt.create_stream()?;
    stream.launch_kernel(&kernel, LaunchConfig::new(1, 1), &[])?;
    let outcome = synchronize_within(stream, Duration::from_secs(10))?;
    assert_eq!(outcome.expect_err("sticky").code(), ErrorCode::LaunchFailure);

    // The failed stream is gone; the device is usable again.
    rt.device_synchronize()?;
    let stream = rt.create_stream()?;
    stream.launch_host_func(|| {})?;
    stream.synchronize()?;
    Ok(())
}

#[test]
fn callbacks_cannot_synchronise() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let codes = Arc::new(Mutex::new(Vec::new()));
    let inner_rt = rt.clone();
    let sink = Arc::clone(&codes);
    stream.launch_host_func(move || {
        let code = inner_rt.device_synchronize().err().map(|err| err.code());
        if let Ok(mut sink) = sink.lock() {
            sink.push(code);
        }
    })?;
    stream.synchronize()?;
    let codes = codes.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
    assert_eq!(*codes, vec![Some(ErrorCode::IllegalState)]);
    Ok(())
}

#[test]
fn event_orders_work_across_streams() -> Result<()> {
    let rt = runtime();
    let producer = rt.create_stream()?;
    let consumer = rt.create_stream()?;
    let ready = Event::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
    {
        let gate = Arc::clone(&gate);
        let order = Arc::clone(&order);
        producer.launch_host_func(move || {
            let (lock, cvar) = &*gate;
            if let Ok(mut open) = lock.lock() {
                while !*open {
                    open = match cvar.wait(open) {
                        Ok(open) => open,
                        Err(_) => return,
                    };
                }
            }
            if let Ok(mut order) = order.lock() {
                order.push("producer");
            }
        })?;
    }
    producer.record_event(&ready)?;
    consumer.wait_event(&ready)?;
    {
        let order = Arc::clone(&order);
        consumer.launch_host_func(move || {
            if let Ok(mut order) = order.lock() {
                order.push("consumer");
            }
        })?;
    }
    assert_eq!(ready.query().expect_err("not yet").code(), ErrorCode::NotReady);

    {
        let (lock, cvar) = &*gate;
        *lock.lock().map_err(|_| anyhow::anyhow!("poisoned"))? = true;
        cvar.notify_all();
    }
    consumer.synchronize()?;
    ready.synchronize()?;
    ready.query()?;
    let order = order.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
    assert_eq!(*order, vec!["producer", "consumer"]);
    Ok(())
}

#[test]
fn elapsed_time_between_events() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let start = Event::new();
    let stop = Event::new();
    let never = Event::new();

    assert_eq!(
        Event::elapsed_ms(&start, &stop).expect_err("unrecorded").code(),
        ErrorCode::InvalidResourceHandle
    );
    stream.record_event(&start)?;
    stream.launch_host_func(|| std::thread::sleep(std::time::Duration::from_millis(5)))?;
    stream.record_event(&stop)?;
    stop.synchronize()?;
    assert!(Event::elapsed_ms(&start, &stop)? >= 4.0);
    assert_eq!(
        Event::elapsed_ms(&start, &never).expect_err("unrecorded").code(),
        ErrorCode::InvalidResourceHandle
    );
    // Waiting on a never-recorded event is a no-op.
    stream.wait_event(&never)?;
    stream.synchronize()?;
    Ok(())
}

#[test]
fn sync_copy_waits_for_streams() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let dev = rt.malloc(64)?;
    let host = rt.alloc_pageable(64)?;
    stream.launch_host_func(|| std::thread::sleep(std::time::Duration::from_millis(2)))?;
    stream.memset_async(dev, 0x3c, 64)?;
    rt.memcpy(host, dev, 64, MemcpyKind::DeviceToHost)?;
    assert_eq!(rt.read::<u8>(host, 64)?, vec![0x3c; 64]);
    Ok(())
}
