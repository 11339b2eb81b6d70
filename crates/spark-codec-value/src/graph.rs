//! 参考宿主表示：arena + 下标的值图。
//!
//! # 教案式说明
//! - **意图（Why）**：线上格式允许共享子结构与自引用环，宿主若用裸指针或引用计数表达，
//!   就必须依赖自身 GC 的语义；以 arena 保存节点、以 [`NodeId`] 互相引用，则环与共享都只是
//!   "两个位置存了同一个下标"，与宿主内存模型无关；
//! - **逻辑（How）**：
//!   - [`GraphBuilder`] 实现 [`Builder`]：维护打开容器的帧栈，`put` 把值放入最内层帧，
//!     容器结束时作为一个完整值放入父帧；另有一张按开标签顺序记录容器的引用表，供回引解析；
//!   - [`GraphWriter`] 反向遍历：容器首次出现时登记编码器分配的回引编号，再次出现直接写回引；
//! - **契约（What）**：
//!   - 同一 [`ValueGraph`] 内的 `NodeId` 才有意义，跨图使用会访问到无关节点；
//!   - 回引编号只对容器（数组、对象、Map、Set、错误）分配，与编码器计数一致；
//!   - 稀疏数组被解码为压缩后的普通数组，下标信息丢失。

use alloc::borrow::Cow;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::buffer::ByteBuffer;
use crate::builder::{ArrayKind, Builder, ErrorPrototype};
use crate::decoder::{MAX_DEPTH, decode};
use crate::encoder::Encoder;
use crate::error::{DecodeError, EncodeError};
use crate::tag;

/// 图内节点下标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 三种线上字符串编码。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JsString {
    /// 线上字节原样保存，不保证是合法 UTF-8。
    Utf8(Vec<u8>),
    Latin1(Vec<u8>),
    Utf16(Vec<u16>),
}

impl JsString {
    /// 转为 Rust 字符串，非法 UTF-8 序列与非法代理对以替换字符代替。
    pub fn to_str(&self) -> Cow<'_, str> {
        match self {
            JsString::Utf8(bytes) => String::from_utf8_lossy(bytes),
            JsString::Latin1(bytes) => Cow::Owned(bytes.iter().map(|b| char::from(*b)).collect()),
            JsString::Utf16(units) => Cow::Owned(String::from_utf16_lossy(units)),
        }
    }
}

/// 符号-幅值形式的大整数，幅值为小端字节且长度是 8 的倍数。
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BigInt {
    pub negative: bool,
    pub magnitude: Vec<u8>,
}

impl BigInt {
    /// 规范化：补齐到 8 字节字、去掉高位全零字；零永远为非负。
    pub fn new(negative: bool, magnitude: &[u8]) -> Self {
        let mut bytes = magnitude.to_vec();
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        while bytes.len() >= 8 && bytes[bytes.len() - 8..].iter().all(|b| *b == 0) {
            bytes.truncate(bytes.len() - 8);
        }
        Self {
            negative: negative && !bytes.is_empty(),
            magnitude: bytes,
        }
    }

    pub fn from_i128(value: i128) -> Self {
        Self::new(value < 0, &value.unsigned_abs().to_le_bytes())
    }

    /// 幅值超过 128 位或结果溢出时返回 `None`。
    pub fn to_i128(&self) -> Option<i128> {
        if self.magnitude.len() > 16 {
            return None;
        }
        let mut raw = [0u8; 16];
        raw[..self.magnitude.len()].copy_from_slice(&self.magnitude);
        let magnitude = u128::from_le_bytes(raw);
        if self.negative {
            0i128.checked_sub_unsigned(magnitude)
        } else {
            i128::try_from(magnitude).ok()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.iter().all(|b| *b == 0)
    }
}

/// 值图中的一个节点。
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Null,
    Undefined,
    Bool(bool),
    /// 宿主整数；超出 int32 的值在线上降级为 double。
    Int(i64),
    Number(f64),
    /// 自 UNIX 纪元起的毫秒数。
    Date(f64),
    BigInt(BigInt),
    String(JsString),
    ArrayBuffer(Vec<u8>),
    /// 函数的不透明标记。
    Function,
    Array {
        elements: Vec<NodeId>,
        properties: Vec<(NodeId, NodeId)>,
    },
    Object(Vec<(NodeId, NodeId)>),
    Map(Vec<(NodeId, NodeId)>),
    Set(Vec<NodeId>),
    Error {
        prototype: Option<ErrorPrototype>,
        message: Option<NodeId>,
        stack: Option<NodeId>,
        cause: Option<NodeId>,
    },
}

impl Node {
    /// 是否参与回引编号。
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Node::Array { .. } | Node::Object(_) | Node::Map(_) | Node::Set(_) | Node::Error { .. }
        )
    }
}

/// 以 arena 保存节点的值图，`root` 为顶层值。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueGraph {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码完整消息（含信封）。
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut builder = GraphBuilder::new();
        decode(bytes, &mut builder)?;
        builder.finish()
    }

    /// 以信封开头编码 `root`；没有根时编码为 undefined。
    pub fn encode(&self) -> Result<ByteBuffer, EncodeError> {
        let mut encoder = Encoder::new();
        self.encode_root_into(&mut encoder);
        encoder.finish()
    }

    /// 把 `root` 写入已有编码器，不额外写信封。
    pub fn encode_root_into(&self, encoder: &mut Encoder) {
        match self.root {
            Some(root) => GraphWriter::new(self).write(encoder, root),
            None => encoder.undefined(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.root.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    /// 追加节点并返回其下标。
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn null(&mut self) -> NodeId {
        self.add(Node::Null)
    }

    pub fn undefined(&mut self) -> NodeId {
        self.add(Node::Undefined)
    }

    pub fn bool(&mut self, value: bool) -> NodeId {
        self.add(Node::Bool(value))
    }

    pub fn int(&mut self, value: i64) -> NodeId {
        self.add(Node::Int(value))
    }

    pub fn number(&mut self, value: f64) -> NodeId {
        self.add(Node::Number(value))
    }

    pub fn date(&mut self, millis: f64) -> NodeId {
        self.add(Node::Date(millis))
    }

    pub fn bigint(&mut self, value: BigInt) -> NodeId {
        self.add(Node::BigInt(value))
    }

    pub fn string(&mut self, value: &str) -> NodeId {
        self.add(Node::String(JsString::Utf8(value.as_bytes().to_vec())))
    }

    pub fn array_buffer(&mut self, bytes: &[u8]) -> NodeId {
        self.add(Node::ArrayBuffer(bytes.to_vec()))
    }

    pub fn function(&mut self) -> NodeId {
        self.add(Node::Function)
    }

    pub fn array(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.add(Node::Array {
            elements,
            properties: Vec::new(),
        })
    }

    pub fn object(&mut self, properties: Vec<(NodeId, NodeId)>) -> NodeId {
        self.add(Node::Object(properties))
    }

    pub fn map(&mut self, entries: Vec<(NodeId, NodeId)>) -> NodeId {
        self.add(Node::Map(entries))
    }

    pub fn set(&mut self, values: Vec<NodeId>) -> NodeId {
        self.add(Node::Set(values))
    }

    /// 以 UTF-8 字符串构造错误对象。
    pub fn error(
        &mut self,
        prototype: Option<ErrorPrototype>,
        message: Option<&str>,
        stack: Option<&str>,
    ) -> NodeId {
        let message = message.map(|m| self.string(m));
        let stack = stack.map(|s| self.string(s));
        self.add(Node::Error {
            prototype,
            message,
            stack,
            cause: None,
        })
    }

    /// 向数组末尾追加元素；`array` 不是数组时返回 `false`。
    pub fn push_element(&mut self, array: NodeId, value: NodeId) -> bool {
        match self.get_mut(array) {
            Some(Node::Array { elements, .. }) | Some(Node::Set(elements)) => {
                elements.push(value);
                true
            }
            _ => false,
        }
    }

    /// 向对象或 Map 追加键值对；目标不是对象/Map 时返回 `false`。
    pub fn insert(&mut self, target: NodeId, key: NodeId, value: NodeId) -> bool {
        match self.get_mut(target) {
            Some(Node::Object(pairs)) | Some(Node::Map(pairs)) => {
                pairs.push((key, value));
                true
            }
            Some(Node::Array { properties, .. }) => {
                properties.push((key, value));
                true
            }
            _ => false,
        }
    }

    /// 读取字符串节点。
    pub fn as_str(&self, id: NodeId) -> Option<Cow<'_, str>> {
        match self.get(id)? {
            Node::String(s) => Some(s.to_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self, id: NodeId) -> Option<bool> {
        match self.get(id)? {
            Node::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// 读取数字，整数与 double 统一为 `f64`。
    pub fn as_f64(&self, id: NodeId) -> Option<f64> {
        match self.get(id)? {
            Node::Int(v) => Some(*v as f64),
            Node::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// 读取整数；double 只有在无小数部分且落在 i64 内时才被接受。
    pub fn as_i64(&self, id: NodeId) -> Option<i64> {
        match self.get(id)? {
            Node::Int(v) => Some(*v),
            Node::Number(v) if v.fract() == 0.0 && v.abs() < 9.2e18 => Some(*v as i64),
            _ => None,
        }
    }

    /// 数组或 Set 的元素。
    pub fn elements(&self, id: NodeId) -> Option<&[NodeId]> {
        match self.get(id)? {
            Node::Array { elements, .. } | Node::Set(elements) => Some(elements),
            _ => None,
        }
    }

    /// 对象、Map 或数组具名属性的键值对。
    pub fn entries(&self, id: NodeId) -> Option<&[(NodeId, NodeId)]> {
        match self.get(id)? {
            Node::Object(pairs) | Node::Map(pairs) => Some(pairs),
            Node::Array { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// 按字符串键查找属性值，返回最后一次出现的值。
    pub fn property(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.entries(id)?
            .iter()
            .rev()
            .find(|(k, _)| self.as_str(*k).is_some_and(|k| k == key))
            .map(|(_, v)| *v)
    }

    /// 把另一张图中以 `id` 为根的子图复制进来，返回新下标；共享与环被保留。
    pub fn import(&mut self, other: &ValueGraph, id: NodeId) -> NodeId {
        let mut mapping = BTreeMap::new();
        self.import_node(other, id, &mut mapping)
    }

    fn import_node(
        &mut self,
        other: &ValueGraph,
        id: NodeId,
        mapping: &mut BTreeMap<NodeId, NodeId>,
    ) -> NodeId {
        if let Some(mapped) = mapping.get(&id) {
            return *mapped;
        }
        let Some(node) = other.get(id) else {
            return self.undefined();
        };
        // 先占位再复制子节点，使环能指回占位节点
        let slot = self.add(Node::Undefined);
        mapping.insert(id, slot);
        let copied = match node {
            Node::Array {
                elements,
                properties,
            } => Node::Array {
                elements: elements
                    .iter()
                    .map(|e| self.import_node(other, *e, mapping))
                    .collect(),
                properties: self.import_pairs(other, properties, mapping),
            },
            Node::Object(pairs) => Node::Object(self.import_pairs(other, pairs, mapping)),
            Node::Map(pairs) => Node::Map(self.import_pairs(other, pairs, mapping)),
            Node::Set(values) => Node::Set(
                values
                    .iter()
                    .map(|v| self.import_node(other, *v, mapping))
                    .collect(),
            ),
            Node::Error {
                prototype,
                message,
                stack,
                cause,
            } => Node::Error {
                prototype: *prototype,
                message: message.map(|m| self.import_node(other, m, mapping)),
                stack: stack.map(|s| self.import_node(other, s, mapping)),
                cause: cause.map(|c| self.import_node(other, c, mapping)),
            },
            leaf => leaf.clone(),
        };
        self.nodes[slot.index()] = copied;
        slot
    }

    fn import_pairs(
        &mut self,
        other: &ValueGraph,
        pairs: &[(NodeId, NodeId)],
        mapping: &mut BTreeMap<NodeId, NodeId>,
    ) -> Vec<(NodeId, NodeId)> {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    self.import_node(other, *k, mapping),
                    self.import_node(other, *v, mapping),
                )
            })
            .collect()
    }

    /// 结构等价：形状相同、叶子相等、共享拓扑一致。
    ///
    /// 整数与数值相等的 double 视为等价，所有 NaN 互相等价。
    pub fn equivalent(&self, a: NodeId, other: &ValueGraph, b: NodeId) -> bool {
        let mut mapping = Pairing::default();
        self.equivalent_node(a, other, b, &mut mapping)
    }

    fn equivalent_node(
        &self,
        a: NodeId,
        other: &ValueGraph,
        b: NodeId,
        mapping: &mut Pairing,
    ) -> bool {
        let (Some(left), Some(right)) = (self.get(a), other.get(b)) else {
            return false;
        };
        if left.is_container() {
            match (mapping.forward.get(&a), mapping.backward.get(&b)) {
                (None, None) => {
                    mapping.forward.insert(a, b);
                    mapping.backward.insert(b, a);
                }
                (Some(mapped_b), Some(mapped_a)) => return *mapped_b == b && *mapped_a == a,
                _ => return false,
            }
        }
        let same_number = |x: f64, y: f64| (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits();
        match (left, right) {
            (Node::Int(x), Node::Int(y)) => x == y,
            (Node::Int(x), Node::Number(y)) | (Node::Number(y), Node::Int(x)) => *x as f64 == *y,
            (Node::Number(x), Node::Number(y)) | (Node::Date(x), Node::Date(y)) => {
                same_number(*x, *y)
            }
            (
                Node::Array {
                    elements: xe,
                    properties: xp,
                },
                Node::Array {
                    elements: ye,
                    properties: yp,
                },
            ) => {
                self.equivalent_list(xe, other, ye, mapping)
                    && self.equivalent_pairs(xp, other, yp, mapping)
            }
            (Node::Set(x), Node::Set(y)) => self.equivalent_list(x, other, y, mapping),
            (Node::Object(x), Node::Object(y)) | (Node::Map(x), Node::Map(y)) => {
                self.equivalent_pairs(x, other, y, mapping)
            }
            (
                Node::Error {
                    prototype: xp,
                    message: xm,
                    stack: xs,
                    cause: xc,
                },
                Node::Error {
                    prototype: yp,
                    message: ym,
                    stack: ys,
                    cause: yc,
                },
            ) => {
                xp == yp
                    && self.equivalent_opt(*xm, other, *ym, mapping)
                    && self.equivalent_opt(*xs, other, *ys, mapping)
                    && self.equivalent_opt(*xc, other, *yc, mapping)
            }
            (x, y) if x.is_container() || y.is_container() => false,
            (x, y) => x == y,
        }
    }

    fn equivalent_opt(
        &self,
        a: Option<NodeId>,
        other: &ValueGraph,
        b: Option<NodeId>,
        mapping: &mut Pairing,
    ) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => self.equivalent_node(a, other, b, mapping),
            (None, None) => true,
            _ => false,
        }
    }

    fn equivalent_list(
        &self,
        a: &[NodeId],
        other: &ValueGraph,
        b: &[NodeId],
        mapping: &mut Pairing,
    ) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(x, y)| self.equivalent_node(*x, other, *y, mapping))
    }

    fn equivalent_pairs(
        &self,
        a: &[(NodeId, NodeId)],
        other: &ValueGraph,
        b: &[(NodeId, NodeId)],
        mapping: &mut Pairing,
    ) -> bool {
        a.len() == b.len()
            && a.iter().zip(b).all(|((xk, xv), (yk, yv))| {
                self.equivalent_node(*xk, other, *yk, mapping)
                    && self.equivalent_node(*xv, other, *yv, mapping)
            })
    }
}

/// 结构比较中已配对的容器，双向记录以保证共享拓扑一致。
#[derive(Default)]
struct Pairing {
    forward: BTreeMap<NodeId, NodeId>,
    backward: BTreeMap<NodeId, NodeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Array,
    Properties,
    Object,
    Map,
    Set,
    Error,
}

#[derive(Debug)]
struct Frame {
    node: NodeId,
    kind: FrameKind,
    pending_key: Option<NodeId>,
}

/// 把解码事件拼装为 [`ValueGraph`] 的构建器。
#[derive(Debug)]
pub struct GraphBuilder {
    graph: ValueGraph,
    frames: Vec<Frame>,
    references: Vec<NodeId>,
    max_frames: usize,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// 帧栈上限：每层容器最多一个额外的具名属性帧。
    pub fn new() -> Self {
        Self::with_max_frames(2 * MAX_DEPTH)
    }

    pub fn with_max_frames(max_frames: usize) -> Self {
        Self {
            graph: ValueGraph::new(),
            frames: Vec::new(),
            references: Vec::new(),
            max_frames,
        }
    }

    /// 取出完成的图；仍有未关闭容器时失败。
    pub fn finish(self) -> Result<ValueGraph, DecodeError> {
        if !self.frames.is_empty() {
            return Err(DecodeError::BadState("unterminated container"));
        }
        Ok(self.graph)
    }

    fn leaf(&mut self, node: Node) -> Result<(), DecodeError> {
        let id = self.graph.add(node);
        self.put(id)
    }

    /// 把完整值放入最内层帧；栈空时成为根。
    fn put(&mut self, id: NodeId) -> Result<(), DecodeError> {
        let Some(frame) = self.frames.last_mut() else {
            self.graph.root = Some(id);
            return Ok(());
        };
        let target = frame.node;
        match frame.kind {
            FrameKind::Array | FrameKind::Set => {
                self.graph.push_element(target, id);
                Ok(())
            }
            FrameKind::Object | FrameKind::Map | FrameKind::Properties => {
                match frame.pending_key.take() {
                    Some(key) => {
                        self.graph.insert(target, key, id);
                    }
                    None => frame.pending_key = Some(id),
                }
                Ok(())
            }
            FrameKind::Error => match frame.pending_key.take() {
                None => {
                    frame.pending_key = Some(id);
                    Ok(())
                }
                Some(key) => self.set_error_field(target, key, id),
            },
        }
    }

    fn set_error_field(&mut self, error: NodeId, key: NodeId, value: NodeId) -> Result<(), DecodeError> {
        let field = match self.graph.as_str(key).as_deref() {
            Some("message") => 0,
            Some("stack") => 1,
            Some("cause") => 2,
            _ => return Err(DecodeError::BadState("unknown error field")),
        };
        match self.graph.get_mut(error) {
            Some(Node::Error {
                message,
                stack,
                cause,
                ..
            }) => {
                let slot = match field {
                    0 => message,
                    1 => stack,
                    _ => cause,
                };
                *slot = Some(value);
                Ok(())
            }
            _ => Err(DecodeError::BadState("error frame without error node")),
        }
    }

    /// 打开容器：登记到引用表并压入新帧。
    fn push(&mut self, node: Node, kind: FrameKind) -> Result<(), DecodeError> {
        if self.frames.len() >= self.max_frames {
            return Err(DecodeError::StackOverflow);
        }
        let id = self.graph.add(node);
        self.references.push(id);
        self.frames.push(Frame {
            node: id,
            kind,
            pending_key: None,
        });
        Ok(())
    }

    /// 关闭最内层帧；除具名属性帧外，关闭的容器作为值放入父帧。
    fn pop(&mut self, kind: FrameKind) -> Result<(), DecodeError> {
        let frame = self.frames.pop().ok_or(DecodeError::StackUnderflow)?;
        if frame.kind != kind {
            return Err(DecodeError::BadState("mismatched container end"));
        }
        if frame.pending_key.is_some() {
            return Err(DecodeError::BadState("key without value"));
        }
        if kind == FrameKind::Properties {
            return Ok(());
        }
        self.put(frame.node)
    }
}

impl Builder for GraphBuilder {
    fn null(&mut self) -> Result<(), DecodeError> {
        self.leaf(Node::Null)
    }

    fn undefined(&mut self) -> Result<(), DecodeError> {
        self.leaf(Node::Undefined)
    }

    fn bool(&mut self, value: bool) -> Result<(), DecodeError> {
        self.leaf(Node::Bool(value))
    }

    fn int(&mut self, value: i64) -> Result<(), DecodeError> {
        self.leaf(Node::Int(value))
    }

    fn num(&mut self, value: f64) -> Result<(), DecodeError> {
        self.leaf(Node::Number(value))
    }

    fn date(&mut self, millis: f64) -> Result<(), DecodeError> {
        self.leaf(Node::Date(millis))
    }

    fn bigint(&mut self, magnitude: &[u8], negative: bool) -> Result<(), DecodeError> {
        self.leaf(Node::BigInt(BigInt {
            negative,
            magnitude: magnitude.to_vec(),
        }))
    }

    fn string_utf8(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.leaf(Node::String(JsString::Utf8(bytes.to_vec())))
    }

    fn string_latin1(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.leaf(Node::String(JsString::Latin1(bytes.to_vec())))
    }

    fn string_utf16(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.leaf(Node::String(JsString::Utf16(units)))
    }

    fn function_marker(&mut self) -> Result<(), DecodeError> {
        self.leaf(Node::Function)
    }

    fn array_buffer(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.leaf(Node::ArrayBuffer(bytes.to_vec()))
    }

    fn array_begin(&mut self, _kind: ArrayKind) -> Result<(), DecodeError> {
        self.push(
            Node::Array {
                elements: Vec::new(),
                properties: Vec::new(),
            },
            FrameKind::Array,
        )
    }

    fn array_end(&mut self) -> Result<(), DecodeError> {
        self.pop(FrameKind::Array)
    }

    fn named_properties_begin(&mut self) -> Result<(), DecodeError> {
        let array = match self.frames.last() {
            Some(frame) if frame.kind == FrameKind::Array => frame.node,
            _ => return Err(DecodeError::BadState("named properties outside array")),
        };
        if self.frames.len() >= self.max_frames {
            return Err(DecodeError::StackOverflow);
        }
        self.frames.push(Frame {
            node: array,
            kind: FrameKind::Properties,
            pending_key: None,
        });
        Ok(())
    }

    fn named_properties_end(&mut self) -> Result<(), DecodeError> {
        self.pop(FrameKind::Properties)
    }

    fn object_begin(&mut self) -> Result<(), DecodeError> {
        self.push(Node::Object(Vec::new()), FrameKind::Object)
    }

    fn object_end(&mut self) -> Result<(), DecodeError> {
        self.pop(FrameKind::Object)
    }

    fn map_begin(&mut self) -> Result<(), DecodeError> {
        self.push(Node::Map(Vec::new()), FrameKind::Map)
    }

    fn map_end(&mut self) -> Result<(), DecodeError> {
        self.pop(FrameKind::Map)
    }

    fn set_begin(&mut self) -> Result<(), DecodeError> {
        self.push(Node::Set(Vec::new()), FrameKind::Set)
    }

    fn set_end(&mut self) -> Result<(), DecodeError> {
        self.pop(FrameKind::Set)
    }

    fn error_begin(&mut self, prototype: Option<ErrorPrototype>) -> Result<(), DecodeError> {
        self.push(
            Node::Error {
                prototype,
                message: None,
                stack: None,
                cause: None,
            },
            FrameKind::Error,
        )
    }

    fn error_end(&mut self) -> Result<(), DecodeError> {
        self.pop(FrameKind::Error)
    }

    fn object_ref(&mut self, id: u64) -> Result<(), DecodeError> {
        let node = usize::try_from(id)
            .ok()
            .and_then(|index| self.references.get(index).copied())
            .ok_or(DecodeError::BadReference(id))?;
        self.put(node)
    }
}

/// 把 [`ValueGraph`] 的子图写入 [`Encoder`]，共享容器写成回引。
///
/// 同一个 `GraphWriter` 可以连续写多个值（例如请求数组中的多个参数），
/// 它们之间的共享结构同样以回引表达。
#[derive(Debug)]
pub struct GraphWriter<'g> {
    graph: &'g ValueGraph,
    ids: BTreeMap<NodeId, u32>,
    depth: usize,
}

impl<'g> GraphWriter<'g> {
    pub fn new(graph: &'g ValueGraph) -> Self {
        Self {
            graph,
            ids: BTreeMap::new(),
            depth: 0,
        }
    }

    pub fn write(&mut self, encoder: &mut Encoder, id: NodeId) {
        if encoder.is_failed() {
            return;
        }
        let graph = self.graph;
        let Some(node) = graph.get(id) else {
            encoder.fail(EncodeError::Unsupported("dangling node id".into()));
            return;
        };
        if node.is_container() {
            if let Some(reference) = self.ids.get(&id) {
                encoder.object_ref(*reference);
                return;
            }
            if self.depth >= MAX_DEPTH {
                encoder.fail(EncodeError::Unsupported("too much recursion".into()));
                return;
            }
            self.ids.insert(id, encoder.next_reference_id());
        }
        self.depth += 1;
        self.write_node(encoder, node);
        self.depth -= 1;
    }

    fn write_node(&mut self, encoder: &mut Encoder, node: &'g Node) {
        match node {
            Node::Null => encoder.null(),
            Node::Undefined => encoder.undefined(),
            Node::Bool(v) => encoder.bool(*v),
            Node::Int(v) => encoder.int(*v),
            Node::Number(v) => encoder.num(*v),
            Node::Date(v) => encoder.date(*v),
            Node::BigInt(v) => encoder.bigint(&v.magnitude, v.negative),
            Node::String(text) => write_string(encoder, text),
            Node::ArrayBuffer(bytes) => encoder.array_buffer(bytes),
            Node::Function => encoder.function_marker(),
            Node::Array {
                elements,
                properties,
            } => {
                let count = count_of(encoder, elements.len());
                let props = count_of(encoder, properties.len());
                encoder.array_begin(count);
                for element in elements {
                    self.write(encoder, *element);
                }
                self.write_pairs(encoder, properties);
                encoder.array_end_with_properties(props, count);
            }
            Node::Object(pairs) => {
                encoder.object_begin();
                self.write_pairs(encoder, pairs);
                let count = count_of(encoder, pairs.len());
                encoder.object_end(count);
            }
            Node::Map(pairs) => {
                encoder.map_begin();
                self.write_pairs(encoder, pairs);
                let count = count_of(encoder, pairs.len());
                encoder.map_end(count);
            }
            Node::Set(values) => {
                encoder.set_begin();
                for value in values {
                    self.write(encoder, *value);
                }
                let count = count_of(encoder, values.len());
                encoder.set_end(count);
            }
            Node::Error {
                prototype,
                message,
                stack,
                cause,
            } => {
                encoder.error_begin(*prototype);
                if let Some(message) = message {
                    self.write_error_text(encoder, tag::error::MESSAGE, *message);
                }
                if let Some(stack) = stack {
                    self.write_error_text(encoder, tag::error::STACK, *stack);
                }
                if let Some(cause) = cause {
                    encoder.error_cause();
                    self.write(encoder, *cause);
                }
                encoder.error_end();
            }
        }
    }

    /// 错误对象的 message/stack 子字段：保留字符串原有的线上编码。
    fn write_error_text(&mut self, encoder: &mut Encoder, field: u8, id: NodeId) {
        match self.graph.get(id) {
            Some(Node::String(text)) => {
                encoder.raw(&[field]);
                write_string(encoder, text);
            }
            _ => encoder.fail(EncodeError::Unsupported(
                "error message or stack is not a string".into(),
            )),
        }
    }

    fn write_pairs(&mut self, encoder: &mut Encoder, pairs: &[(NodeId, NodeId)]) {
        for (key, value) in pairs {
            self.write(encoder, *key);
            self.write(encoder, *value);
        }
    }
}

fn write_string(encoder: &mut Encoder, text: &JsString) {
    match text {
        JsString::Utf8(bytes) => encoder.string_utf8_bytes(bytes),
        JsString::Latin1(bytes) => encoder.string_latin1(bytes),
        JsString::Utf16(units) => {
            let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
            encoder.string_utf16(&bytes);
        }
    }
}

fn count_of(encoder: &mut Encoder, len: usize) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| {
        encoder.fail(EncodeError::Unsupported("too many elements".into()));
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_referential_object_round_trips_as_one_instance() {
        let mut graph = ValueGraph::new();
        let object = graph.object(Vec::new());
        let key = graph.string("self");
        graph.insert(object, key, object);
        graph.set_root(object);

        let bytes = graph.encode().expect("编码自引用对象");
        let decoded = ValueGraph::decode(&bytes).expect("解码自引用对象");
        let root = decoded.root().expect("应有根");
        assert_eq!(decoded.property(root, "self"), Some(root));
        assert!(graph.equivalent(object, &decoded, root));
    }

    #[test]
    fn shared_children_keep_topology() {
        let mut graph = ValueGraph::new();
        let shared = graph.array(Vec::new());
        let outer = graph.array(alloc::vec![shared, shared]);
        graph.set_root(outer);

        let decoded = ValueGraph::decode(&graph.encode().expect("编码")).expect("解码");
        let root = decoded.root().expect("应有根");
        let elements = decoded.elements(root).expect("数组");
        assert_eq!(elements[0], elements[1]);

        // 拓扑不同的两张图不应等价
        let mut duplicated = ValueGraph::new();
        let a = duplicated.array(Vec::new());
        let b = duplicated.array(Vec::new());
        let outer2 = duplicated.array(alloc::vec![a, b]);
        assert!(!decoded.equivalent(root, &duplicated, outer2));
    }

    #[test]
    fn error_fields_round_trip() {
        let mut graph = ValueGraph::new();
        let cause = graph.int(7);
        let error = graph.error(Some(ErrorPrototype::Type), Some("boom"), Some("at x"));
        if let Some(Node::Error { cause: slot, .. }) = graph.get_mut(error) {
            *slot = Some(cause);
        }
        graph.set_root(error);
        let decoded = ValueGraph::decode(&graph.encode().expect("编码")).expect("解码");
        let root = decoded.root().expect("根");
        assert!(graph.equivalent(error, &decoded, root));
    }

    #[test]
    fn container_trailer_counts_match_contents() {
        let mut graph = ValueGraph::new();
        let one = graph.int(1);
        let two = graph.int(2);
        let three = graph.int(3);
        let key = graph.string("k");
        let object = graph.object(alloc::vec![(key, one)]);
        let map = graph.map(alloc::vec![(one, two), (two, three)]);
        let set = graph.set(alloc::vec![one, two, three]);
        let outer = graph.array(alloc::vec![object, map, set]);
        graph.set_root(outer);

        let decoded = ValueGraph::decode(&graph.encode().expect("编码")).expect("解码");
        let root = decoded.root().expect("根");
        let items = decoded.elements(root).expect("外层数组");
        assert_eq!(decoded.entries(items[0]).map(<[_]>::len), Some(1));
        assert_eq!(decoded.entries(items[1]).map(<[_]>::len), Some(2));
        assert_eq!(decoded.elements(items[2]).map(<[_]>::len), Some(3));
        assert!(graph.equivalent(outer, &decoded, root));
    }

    #[test]
    fn builder_detects_underflow_and_overflow() {
        let mut builder = GraphBuilder::with_max_frames(1);
        builder.object_begin().expect("首层容器");
        assert_eq!(builder.object_begin(), Err(DecodeError::StackOverflow));

        let mut builder = GraphBuilder::new();
        assert_eq!(builder.array_end(), Err(DecodeError::StackUnderflow));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let bytes = [0xFF, 0x0F, b'o', b'S', 1, b'x', b'^', 3, b'{', 1];
        assert_eq!(
            ValueGraph::decode(&bytes),
            Err(DecodeError::BadReference(3))
        );
    }

    #[test]
    fn bigint_helpers_normalize() {
        let value = BigInt::from_i128(-(1i128 << 64));
        assert!(value.negative);
        assert_eq!(value.magnitude.len(), 16);
        assert_eq!(value.to_i128(), Some(-(1i128 << 64)));
        assert_eq!(BigInt::new(true, &[0; 8]), BigInt::default());
    }

    #[test]
    fn import_preserves_cycles() {
        let mut source = ValueGraph::new();
        let list = source.array(Vec::new());
        source.push_element(list, list);
        let mut target = ValueGraph::new();
        target.null();
        let copied = target.import(&source, list);
        assert_eq!(target.elements(copied), Some(&[copied][..]));
    }
}
