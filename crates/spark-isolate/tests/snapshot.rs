//! `snapshot` 集成测试：快照生成、预热与为新上下文播种。

mod support;

use spark_isolate::{Context, ErrorClass, IsolateConfig, Snapshot};
use support::{Recorder, factory};

#[test]
fn snapshot_is_created_through_temporary_context() {
    let recorder = Recorder::new();
    let snapshot = Snapshot::new("init()", factory(&recorder)).expect("快照可生成");
    assert_eq!(snapshot.as_bytes(), b"snap[init()]");
    assert_eq!(snapshot.size(), 12);

    let error = Snapshot::new("throw now", factory(&Recorder::new())).expect_err("脚本抛错");
    assert_eq!(error.class(), Some(ErrorClass::Runtime));
}

/// ## 测试：预热失败保留原快照
///
/// - **契约 (What)**：成功时快照被替换；失败时返回错误且字节不变。
#[test]
fn warmup_replaces_blob_only_on_success() {
    let mut snapshot = Snapshot::from_bytes(b"base".to_vec());
    snapshot.warmup("more", factory(&Recorder::new())).expect("预热成功");
    assert_eq!(snapshot.as_bytes(), b"base+more");

    let error = snapshot
        .warmup("throw", factory(&Recorder::new()))
        .expect_err("预热失败");
    assert_eq!(error.class(), Some(ErrorClass::Runtime));
    assert_eq!(snapshot.as_bytes(), b"base+more", "失败后必须保留原快照");
}

/// 非 ASCII 字节经 Latin-1 字符串往返后不变。
#[test]
fn binary_blob_survives_round_trip() {
    let bytes: Vec<u8> = (0..=255).collect();
    let mut snapshot = Snapshot::from_bytes(bytes.clone());
    snapshot.warmup("x", factory(&Recorder::new())).expect("预热成功");
    let mut expected = bytes;
    expected.extend_from_slice(b"+x");
    assert_eq!(snapshot.as_bytes(), expected.as_slice());
}

#[test]
fn snapshot_seeds_new_context() {
    let snapshot = Snapshot::from_bytes(b"seed".to_vec());
    let recorder = Recorder::new();
    let config = IsolateConfig::default().with_snapshot(snapshot.clone());
    let _context = Context::new(config, factory(&recorder)).expect("上下文可创建");
    let options = recorder.options.lock().clone().expect("工厂收到创建参数");
    assert_eq!(options.snapshot.as_deref(), Some(snapshot.as_bytes()));
}
