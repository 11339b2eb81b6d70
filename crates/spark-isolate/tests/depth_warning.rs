//! `depth_warning` 集成测试：深度递归只产生非致命告警。

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use spark_codec_value::ValueGraph;
use spark_isolate::{CallbackError, Context, ExecutionMode, IsolateConfig};
use support::{Recorder, factory, int_graph, root_int};
use tracing_test::traced_test;

/// 回调里再次求值自身，形成 `levels` 层嵌套调用。
fn recurse(warn_every: u32, levels: u32, execution: ExecutionMode) -> i64 {
    let recorder = Recorder::new();
    let config = IsolateConfig {
        callback_depth_warning: warn_every,
        execution: Some(execution),
        ..IsolateConfig::default()
    };
    let context = Arc::new(Context::new(config, factory(&recorder)).expect("上下文可创建"));
    let weak: Weak<Context> = Arc::downgrade(&context);
    let remaining = Arc::new(AtomicU32::new(levels));
    context
        .attach("host.down", move |_graph: &ValueGraph, _args| {
            if remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
                return Ok(int_graph(0));
            }
            let context = weak.upgrade().ok_or_else(|| CallbackError::new("context gone"))?;
            let value = context
                .eval("call:host.down")
                .map_err(|error| CallbackError::new(error.to_string()))?;
            Ok(int_graph(root_int(&value).unwrap_or_default() + 1))
        })
        .expect("挂载成功");
    let value = context.eval("call:host.down").expect("递归调用成功");
    root_int(&value).expect("整数结果")
}

/// ## 测试一：恰好到达阈值不告警
///
/// - **意图 (Why)**：阈值表示允许的嵌套层数，用满阈值仍属正常；
/// - **契约 (What)**：阈值为 3 时 3 层嵌套不产生告警，结果正确。
#[traced_test]
#[test]
fn recursion_at_threshold_stays_quiet() {
    for execution in [ExecutionMode::Threaded, ExecutionMode::SingleThreaded] {
        assert_eq!(recurse(3, 3, execution), 2);
    }
    assert!(!logs_contain("deep host/engine callback recursion"));
}

/// ## 测试二：超过阈值一层即告警
///
/// - **意图 (Why)**：深度递归往往意味着宿主与脚本互相调用失控，需要提示但不能中断业务；
/// - **契约 (What)**：阈值为 3 时第 4 层嵌套产生告警，记录进入前的深度 3，调用结果不受影响。
#[traced_test]
#[test]
fn recursion_past_threshold_emits_warning() {
    for execution in [ExecutionMode::Threaded, ExecutionMode::SingleThreaded] {
        assert_eq!(recurse(3, 4, execution), 3);
    }
    assert!(logs_contain("deep host/engine callback recursion"));
    assert!(logs_contain("depth=3"));
}

/// 阈值为 0 时关闭告警。
#[traced_test]
#[test]
fn zero_threshold_disables_warning() {
    assert_eq!(recurse(0, 5, ExecutionMode::Threaded), 4);
    assert!(!logs_contain("deep host/engine callback recursion"));
}
