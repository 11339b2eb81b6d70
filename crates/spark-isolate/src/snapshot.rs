//! 启动快照。
//!
//! 快照通过一个临时上下文生成：`T` 请求执行初始化代码并返回快照字节，`W` 请求以现有快照启动、
//! 执行预热代码后再次生成。生成好的快照可以放进 [`IsolateConfig`] 为新上下文播种。

use std::sync::Arc;

use crate::config::IsolateConfig;
use crate::context::Context;
use crate::engine::{Engine, EngineOptions};
use crate::error::{IsolateError, ScriptError};
use crate::protocol::{self, Opcode};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    blob: Arc<[u8]>,
}

impl Snapshot {
    /// 以现成的快照字节构造。
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { blob: bytes.into() }
    }

    /// 在临时上下文中执行 `code` 并生成快照。
    pub fn new<E, F>(code: &str, factory: F) -> Result<Self, IsolateError>
    where
        E: Engine + 'static,
        F: FnOnce(&EngineOptions) -> Result<E, ScriptError> + Send + 'static,
    {
        let context = Context::new(IsolateConfig::default(), factory)?;
        let mut encoder = spark_codec_value::Encoder::request(Opcode::TakeSnapshot.byte());
        encoder.string_utf8(code);
        let response = context.rendezvous(encoder.finish()?)?;
        let blob = protocol::parse_blob_pair(&response)?;
        Ok(Self::from_bytes(blob))
    }

    /// 以当前快照启动、执行 `code` 后替换为新快照；失败时保留原快照。
    pub fn warmup<E, F>(&mut self, code: &str, factory: F) -> Result<(), IsolateError>
    where
        E: Engine + 'static,
        F: FnOnce(&EngineOptions) -> Result<E, ScriptError> + Send + 'static,
    {
        let context = Context::new(IsolateConfig::default(), factory)?;
        let mut encoder = spark_codec_value::Encoder::request(Opcode::WarmUp.byte());
        encoder.array_begin(2);
        encoder.string_latin1(&self.blob);
        encoder.string_utf8(code);
        encoder.array_end(2);
        let response = context.rendezvous(encoder.finish()?)?;
        let blob = protocol::parse_blob_pair(&response)?;
        self.blob = blob.into();
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn size(&self) -> usize {
        self.blob.len()
    }

    pub(crate) fn shared_blob(&self) -> Arc<[u8]> {
        Arc::clone(&self.blob)
    }
}
