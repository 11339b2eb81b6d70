#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spark_codec_value::{NodeId, ValueGraph};

/// Fuzz 指令：逐步搭建一张值图。
///
/// - **Why**：共享引用与容器嵌套的组合是编解码最容易出错的地方，逐条指令构图能让 Fuzzer 覆盖
///   "同一节点被多个容器引用"的情形；
/// - **How**：容器只能引用已经存在的节点，下标对当前节点数取模；
/// - **What**：编码成功的值图解码后必须与原图等价。
#[derive(Debug, Arbitrary)]
struct GraphCase {
    ops: Vec<BuildOp>,
}

#[derive(Debug, Arbitrary)]
enum BuildOp {
    Null,
    Bool(bool),
    Int(i32),
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<u8>),
    Object(Vec<(String, u8)>),
    Map(Vec<(u8, u8)>),
    Set(Vec<u8>),
}

fn pick(nodes: &[NodeId], index: u8) -> Option<NodeId> {
    if nodes.is_empty() {
        return None;
    }
    nodes.get(usize::from(index) % nodes.len()).copied()
}

fuzz_target!(|case: GraphCase| {
    let mut graph = ValueGraph::new();
    let mut nodes = Vec::new();
    for op in case.ops {
        let id = match op {
            BuildOp::Null => graph.null(),
            BuildOp::Bool(value) => graph.bool(value),
            BuildOp::Int(value) => graph.int(i64::from(value)),
            BuildOp::Number(value) if value.is_finite() => graph.number(value),
            BuildOp::Number(_) => graph.undefined(),
            BuildOp::Text(text) => graph.string(&text),
            BuildOp::Bytes(bytes) => graph.array_buffer(&bytes),
            BuildOp::Array(items) => {
                let elements = items.iter().filter_map(|&i| pick(&nodes, i)).collect();
                graph.array(elements)
            }
            BuildOp::Object(fields) => {
                let mut properties = Vec::new();
                for (key, index) in fields {
                    if let Some(value) = pick(&nodes, index) {
                        properties.push((graph.string(&key), value));
                    }
                }
                graph.object(properties)
            }
            BuildOp::Map(pairs) => {
                let entries = pairs
                    .iter()
                    .filter_map(|&(k, v)| Some((pick(&nodes, k)?, pick(&nodes, v)?)))
                    .collect();
                graph.map(entries)
            }
            BuildOp::Set(items) => {
                let values = items.iter().filter_map(|&i| pick(&nodes, i)).collect();
                graph.set(values)
            }
        };
        nodes.push(id);
    }
    let Some(&root) = nodes.last() else {
        return;
    };
    graph.set_root(root);

    // 嵌套过深时编码失败是预期行为。
    let Ok(bytes) = graph.encode() else {
        return;
    };
    let decoded = ValueGraph::decode(bytes.as_slice()).expect("编码器产出的消息必须可解码");
    let decoded_root = decoded.root().expect("解码结果必须有根");
    assert!(graph.equivalent(root, &decoded, decoded_root), "往返后值图不等价");
});
