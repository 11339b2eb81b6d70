//! 集成测试共用的脚本化引擎。
//!
//! # 教案式说明
//! - **意图（Why）**：通道的行为（串行化、回调、中断、释放）与具体脚本语言无关，
//!   测试只需要一个能按指令执行、能回调宿主、能被打断的最小引擎；
//! - **逻辑（How）**：`eval` 接受一行指令：
//!   - `return:<n>` 返回整数；`throw:<msg>` 抛运行时错误；`syntax` 返回解析错误；
//!   - `sleep:<ms>` 睡眠后返回 undefined；`spin` 忙等直到被中断；
//!   - `call:<path>` 以无参方式调用全局函数；
//!   其余源码原样作为字符串返回。全局函数要么是宿主回调，要么是测试注册的原生闭包；
//! - **契约（What）**：[`Recorder`] 与测试共享，记录执行线程、操作日志、并发度与低内存通知次数。

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use spark_codec_value::{NodeId, ValueGraph};
use spark_isolate::{
    CallbackId, Engine, EngineOptions, EngineScope, ErrorClass, HeapStats, ScriptError, Terminate,
    TerminationFlag,
};

pub type Native = dyn Fn(&mut EngineScope<'_>, &ValueGraph, &[NodeId]) -> Result<ValueGraph, ScriptError>
    + Send
    + Sync;

#[derive(Default)]
pub struct Recorder {
    pub flag: TerminationFlag,
    pub threads: Mutex<Vec<ThreadId>>,
    pub log: Mutex<Vec<String>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub low_memory: AtomicUsize,
    pub options: Mutex<Option<EngineOptions>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn engine_threads(&self) -> Vec<ThreadId> {
        self.threads.lock().clone()
    }

    fn enter(&self, what: String) -> ActiveGuard<'_> {
        self.threads.lock().push(thread::current().id());
        self.log.lock().push(what);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(self)
    }
}

struct ActiveGuard<'p>(&'p Recorder);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
enum Global {
    Callback(CallbackId),
    Native(Arc<Native>),
}

pub struct ScriptedEngine {
    recorder: Arc<Recorder>,
    globals: Mutex<HashMap<String, Global>>,
}

impl ScriptedEngine {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            globals: Mutex::new(HashMap::new()),
        }
    }

    /// 注册原生全局函数。
    pub fn with_native<F>(self, path: &str, native: F) -> Self
    where
        F: Fn(&mut EngineScope<'_>, &ValueGraph, &[NodeId]) -> Result<ValueGraph, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        self.globals
            .lock()
            .insert(path.to_owned(), Global::Native(Arc::new(native)));
        self
    }

    fn spin(&self) -> Result<ValueGraph, ScriptError> {
        while !self.recorder.flag.is_terminating() {
            thread::sleep(Duration::from_millis(1));
        }
        Err(ScriptError::terminated())
    }

    fn invoke(
        &self,
        scope: &mut EngineScope<'_>,
        path: &str,
        graph: &ValueGraph,
        args: &[NodeId],
    ) -> Result<ValueGraph, ScriptError> {
        let global = self.globals.lock().get(path).cloned();
        match global {
            Some(Global::Callback(id)) => scope.invoke_callback(id, graph, args),
            Some(Global::Native(native)) => (*native)(scope, graph, args),
            None => Err(ScriptError::runtime(format!("ReferenceError: {path} is not defined"))),
        }
    }
}

impl Engine for ScriptedEngine {
    fn terminator(&self) -> Arc<dyn Terminate> {
        Arc::new(self.recorder.flag.clone())
    }

    fn attach(
        &self,
        _scope: &mut EngineScope<'_>,
        path: &str,
        id: CallbackId,
    ) -> Result<(), ScriptError> {
        let _active = self.recorder.enter(format!("attach {path}"));
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(ScriptError::runtime(format!("bad path {path:?}")));
        }
        self.globals
            .lock()
            .insert(path.to_owned(), Global::Callback(id));
        Ok(())
    }

    fn call(
        &self,
        scope: &mut EngineScope<'_>,
        path: &str,
        graph: &ValueGraph,
        args: &[NodeId],
    ) -> Result<ValueGraph, ScriptError> {
        let _active = self.recorder.enter(format!("call {path}"));
        self.invoke(scope, path, graph, args)
    }

    fn eval(
        &self,
        scope: &mut EngineScope<'_>,
        _filename: &str,
        source: &str,
    ) -> Result<ValueGraph, ScriptError> {
        let _active = self.recorder.enter(format!("eval {source}"));
        let mut result = ValueGraph::new();
        let (command, argument) = source.split_once(':').unwrap_or((source, ""));
        let root = match command {
            "return" => {
                let value = argument
                    .parse::<i64>()
                    .map_err(|error| ScriptError::new(ErrorClass::Parse, error.to_string()))?;
                result.int(value)
            }
            "throw" => return Err(ScriptError::runtime(argument)),
            "syntax" => return Err(ScriptError::new(ErrorClass::Parse, "SyntaxError")),
            "sleep" => {
                let millis = argument.parse::<u64>().unwrap_or(0);
                thread::sleep(Duration::from_millis(millis));
                result.undefined()
            }
            "spin" => return self.spin(),
            "call" => return self.invoke(scope, argument, &ValueGraph::new(), &[]),
            _ => result.string(source),
        };
        result.set_root(root);
        Ok(result)
    }

    fn heap_stats(&self) -> HeapStats {
        HeapStats {
            total_heap_size: 4096.0,
            used_heap_size: 1024.0,
            heap_size_limit: 65536.0,
            number_of_native_contexts: 1.0,
            ..HeapStats::default()
        }
    }

    fn pump_message_loop(&self, _scope: &mut EngineScope<'_>) -> bool {
        let _active = self.recorder.enter("pump".into());
        false
    }

    fn low_memory_notification(&self) {
        self.recorder.low_memory.fetch_add(1, Ordering::SeqCst);
    }

    fn take_snapshot(&self, code: &str) -> Result<Vec<u8>, ScriptError> {
        if code.starts_with("throw") {
            return Err(ScriptError::runtime("snapshot script threw"));
        }
        Ok(format!("snap[{code}]").into_bytes())
    }

    fn warm_up_snapshot(&self, blob: &[u8], code: &str) -> Result<Vec<u8>, ScriptError> {
        if code.starts_with("throw") {
            return Err(ScriptError::runtime("warm-up script threw"));
        }
        let mut warmed = blob.to_vec();
        warmed.extend_from_slice(b"+");
        warmed.extend_from_slice(code.as_bytes());
        Ok(warmed)
    }

    fn cancel_termination(&self) {
        self.recorder.flag.reset();
    }
}

/// 以 `recorder` 构造脚本化引擎的工厂，同时记下创建参数。
pub fn factory(
    recorder: &Arc<Recorder>,
) -> impl FnOnce(&EngineOptions) -> Result<ScriptedEngine, ScriptError> + Send + 'static {
    let recorder = Arc::clone(recorder);
    move |options| {
        *recorder.options.lock() = Some(options.clone());
        Ok(ScriptedEngine::new(recorder))
    }
}

/// 结果图根节点的整数值。
pub fn root_int(graph: &ValueGraph) -> Option<i64> {
    graph.root().and_then(|root| graph.as_i64(root))
}

/// 只含一个整数的值图。
pub fn int_graph(value: i64) -> ValueGraph {
    let mut graph = ValueGraph::new();
    let root = graph.int(value);
    graph.set_root(root);
    graph
}
