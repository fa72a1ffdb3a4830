use anyhow::Result;
use graphrt::{
    CaptureMode, CaptureStatus, ErrorCode, Event, MemcpyKind, NodeKind, NodeParams, Runtime,
    RuntimeConfig,
};

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default())
}

#[test]
fn captured_work_does_not_run_until_launched() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let dev = rt.malloc(16)?;
    let host = rt.alloc_pageable(16)?;

    stream.begin_capture(CaptureMode::Global)?;
    assert!(stream.is_capturing());
    assert_eq!(stream.capture_status()?, CaptureStatus::Active);
    stream.memset_async(dev, 9, 16)?;
    stream.memcpy_async(host, dev, 16, MemcpyKind::DeviceToHost)?;
    let graph = stream.end_capture()?;
    assert_eq!(stream.capture_status()?, CaptureStatus::None);

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(rt.read::<u8>(host, 16)?, vec![0; 16]);

    let exec = graph.instantiate()?;
    exec.launch(&stream)?;
    stream.synchronize()?;
    assert_eq!(rt.read::<u8>(host, 16)?, vec![9; 16]);
    Ok(())
}

#[test]
fn synchronising_a_capturing_stream_invalidates_it() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    stream.begin_capture(CaptureMode::Global)?;
    assert_eq!(
        stream.synchronize().expect_err("illegal").code(),
        ErrorCode::StreamCaptureUnsupported
    );
    assert_eq!(stream.capture_status()?, CaptureStatus::Invalidated);
    assert_eq!(
        stream.query().expect_err("illegal").code(),
        ErrorCode::StreamCaptureUnsupported
    );
    assert_eq!(
        stream.end_capture().expect_err("invalidated").code(),
        ErrorCode::StreamCaptureInvalidated
    );
    // The stream is usable again afterwards.
    assert!(!stream.is_capturing());
    stream.synchronize()?;
    Ok(())
}

#[test]
fn capture_must_end_on_its_origin() -> Result<()> {
    let rt = runtime();
    let origin = rt.create_stream()?;
    let side = rt.create_stream()?;
    let fork = Event::new();

    assert_eq!(
        origin.end_capture().expect_err("not capturing").code(),
        ErrorCode::IllegalState
    );
    origin.begin_capture(CaptureMode::Global)?;
    assert_eq!(
        origin.begin_capture(CaptureMode::Global).expect_err("twice").code(),
        ErrorCode::IllegalState
    );
    origin.record_event(&fork)?;
    side.wait_event(&fork)?;
    assert_eq!(
        side.end_capture().expect_err("not the origin").code(),
        ErrorCode::IllegalState
    );
    let graph = origin.end_capture()?;
    assert!(graph.is_empty());
    assert!(!side.is_capturing());
    Ok(())
}

#[test]
fn forked_work_must_be_joined() -> Result<()> {
    let rt = runtime();
    let origin = rt.create_stream()?;
    let side = rt.create_stream()?;
    let dev = rt.malloc(32)?;
    let fork = Event::new();

    origin.begin_capture(CaptureMode::Global)?;
    origin.record_event(&fork)?;
    side.wait_event(&fork)?;
    side.memset_async(dev, 1, 32)?;
    origin.memset_async(dev, 2, 32)?;
    assert_eq!(
        origin.end_capture().expect_err("side work dangles").code(),
        ErrorCode::StreamCaptureUnjoined
    );
    assert!(!side.is_capturing());
    Ok(())
}

#[test]
fn device_sync_respects_capture_mode() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;

    stream.begin_capture(CaptureMode::Relaxed)?;
    rt.device_synchronize()?;
    assert_eq!(stream.capture_status()?, CaptureStatus::Active);
    stream.end_capture()?;

    stream.begin_capture(CaptureMode::Global)?;
    assert_eq!(
        rt.device_synchronize().expect_err("global capture").code(),
        ErrorCode::StreamCaptureUnsupported
    );
    assert_eq!(stream.capture_status()?, CaptureStatus::Invalidated);
    assert_eq!(
        stream.end_capture().expect_err("invalidated").code(),
        ErrorCode::StreamCaptureInvalidated
    );

    // Another thread may synchronise while this one holds a thread-local capture.
    stream.begin_capture(CaptureMode::ThreadLocal)?;
    let other = rt.clone();
    std::thread::spawn(move || other.device_synchronize())
        .join()
        .map_err(|_| anyhow::anyhow!("sync thread panicked"))??;
    assert_eq!(stream.capture_status()?, CaptureStatus::Active);
    stream.end_capture()?;
    Ok(())
}

#[test]
fn invalid_node_invalidates_capture() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    stream.begin_capture(CaptureMode::Global)?;
    assert_eq!(
        stream
            .memset_async(graphrt::DevicePtr::NULL, 0, 8)
            .expect_err("null")
            .code(),
        ErrorCode::InvalidValue
    );
    assert_eq!(stream.capture_status()?, CaptureStatus::Invalidated);
    assert_eq!(
        stream.memset_async(rt.malloc(8)?, 0, 8).expect_err("dead").code(),
        ErrorCode::StreamCaptureInvalidated
    );
    assert_eq!(
        stream.end_capture().expect_err("invalidated").code(),
        ErrorCode::StreamCaptureInvalidated
    );
    Ok(())
}

#[test]
fn launching_an_instance_into_a_capture_nests_it() -> Result<()> {
    let rt = runtime();
    let dev = rt.malloc(8)?;
    let mut inner = rt.create_graph();
    inner.add_memset_node(&[], graphrt::MemsetParams::d8(dev, 4, 8))?;
    let first = inner.add_empty_node(&[])?;
    inner.add_empty_node(&[first])?;
    let inner_exec = inner.instantiate()?;

    let stream = rt.create_stream()?;
    stream.begin_capture(CaptureMode::Global)?;
    inner_exec.launch(&stream)?;
    let outer = stream.end_capture()?;

    assert_eq!(outer.node_count(), 1);
    let node = outer.root_nodes()[0];
    assert_eq!(outer.node_kind(node)?, NodeKind::ChildGraph);
    match outer.node_params(node)? {
        NodeParams::ChildGraph(child) => {
            assert_eq!(child.node_count(), 3);
            assert_eq!(child.edge_count(), 1);
        }
        other => panic!("unexpected params {other:?}"),
    }

    outer.instantiate()?.launch(&stream)?;
    stream.synchronize()?;
    assert_eq!(rt.read::<u8>(dev, 8)?, vec![4; 8]);
    Ok(())
}

#[test]
fn waiting_on_an_outside_event_is_rejected() -> Result<()> {
    let rt = runtime();
    let stream = rt.create_stream()?;
    let other = rt.create_stream()?;
    let outside = Event::new();
    other.record_event(&outside)?;

    stream.begin_capture(CaptureMode::Global)?;
    assert_eq!(
        stream.wait_event(&outside).expect_err("outside").code(),
        ErrorCode::IllegalState
    );
    stream.end_capture()?;
    Ok(())
}
