//! `codec_properties` 集成测试：以属性测试覆盖编码、解码的往返与不动点。
//!
//! # 测试总览（Why）
//! - 任意无环值树经 `encode -> decode` 后必须结构等价；
//! - 解码结果再编码一次应得到逐字节相同的输出，证明一次往返即达到不动点；
//! - 被多处引用的同一容器在解码后仍是同一个节点。

use proptest::prelude::*;
use spark_codec_value::{BigInt, NodeId, ValueGraph};

/// 无环值树模型，仅在测试中用于生成输入。
#[derive(Clone, Debug)]
enum Tree {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    Num(f64),
    Date(f64),
    Big(bool, Vec<u64>),
    Str(String),
    Buffer(Vec<u8>),
    Function,
    Array(Vec<Tree>),
    Object(Vec<(String, Tree)>),
    Map(Vec<(Tree, Tree)>),
    Set(Vec<Tree>),
}

fn leaf() -> impl Strategy<Value = Tree> {
    prop_oneof![
        Just(Tree::Null),
        Just(Tree::Undefined),
        Just(Tree::Function),
        any::<bool>().prop_map(Tree::Bool),
        any::<i32>().prop_map(|v| Tree::Int(i64::from(v))),
        (-(1i64 << 52)..(1i64 << 52)).prop_map(Tree::Int),
        any::<f64>().prop_map(Tree::Num),
        (-8.64e15f64..8.64e15).prop_map(Tree::Date),
        (any::<bool>(), prop::collection::vec(any::<u64>(), 0..4))
            .prop_map(|(negative, words)| Tree::Big(negative, words)),
        "\\PC{0,12}".prop_map(Tree::Str),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Tree::Buffer),
    ]
}

fn tree() -> impl Strategy<Value = Tree> {
    leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Tree::Array),
            prop::collection::vec(("[a-z]{0,6}", inner.clone()), 0..5).prop_map(Tree::Object),
            prop::collection::vec((inner.clone(), inner.clone()), 0..4).prop_map(Tree::Map),
            prop::collection::vec(inner, 0..4).prop_map(Tree::Set),
        ]
    })
}

fn build(graph: &mut ValueGraph, tree: &Tree) -> NodeId {
    match tree {
        Tree::Null => graph.null(),
        Tree::Undefined => graph.undefined(),
        Tree::Bool(v) => graph.bool(*v),
        Tree::Int(v) => graph.int(*v),
        Tree::Num(v) => graph.number(*v),
        Tree::Date(v) => graph.date(*v),
        Tree::Big(negative, words) => {
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            graph.bigint(BigInt::new(*negative, &bytes))
        }
        Tree::Str(s) => graph.string(s),
        Tree::Buffer(bytes) => graph.array_buffer(bytes),
        Tree::Function => graph.function(),
        Tree::Array(items) => {
            let ids = items.iter().map(|item| build(graph, item)).collect();
            graph.array(ids)
        }
        Tree::Object(pairs) => {
            let ids = pairs
                .iter()
                .map(|(k, v)| (graph.string(k), build(graph, v)))
                .collect();
            graph.object(ids)
        }
        Tree::Map(pairs) => {
            let ids = pairs
                .iter()
                .map(|(k, v)| (build(graph, k), build(graph, v)))
                .collect();
            graph.map(ids)
        }
        Tree::Set(items) => {
            let ids = items.iter().map(|item| build(graph, item)).collect();
            graph.set(ids)
        }
    }
}

proptest! {
    /// 往返后结构等价。
    #[test]
    fn round_trip_preserves_structure(value in tree()) {
        let mut graph = ValueGraph::new();
        let root = build(&mut graph, &value);
        graph.set_root(root);

        let bytes = graph.encode().expect("合法值树必须可编码");
        let decoded = ValueGraph::decode(&bytes).expect("编码输出必须可解码");
        let decoded_root = decoded.root().expect("解码结果应有根");
        prop_assert!(graph.equivalent(root, &decoded, decoded_root), "往返后结构不等价: {value:?}");
    }

    /// 一次往返之后再编码，字节完全一致。
    #[test]
    fn re_encoding_reaches_fixed_point(value in tree()) {
        let mut graph = ValueGraph::new();
        let root = build(&mut graph, &value);
        graph.set_root(root);

        let first = graph.encode().expect("首次编码");
        let decoded = ValueGraph::decode(&first).expect("首次解码");
        let second = decoded.encode().expect("再次编码");
        prop_assert_eq!(first.as_slice(), second.as_slice());
    }

    /// 同一子树被引用两次时，解码结果保持共享。
    #[test]
    fn shared_subtrees_stay_shared(value in tree()) {
        let mut graph = ValueGraph::new();
        let shared = build(&mut graph, &value);
        let outer = graph.array(vec![shared, shared]);
        graph.set_root(outer);

        let decoded = ValueGraph::decode(&graph.encode().expect("编码")).expect("解码");
        let root = decoded.root().expect("根");
        prop_assert!(graph.equivalent(outer, &decoded, root));
        let elements = decoded.elements(root).expect("外层为数组");
        let first = decoded.get(elements[0]).expect("元素存在");
        if first.is_container() {
            prop_assert_eq!(elements[0], elements[1], "共享容器被复制成了两份");
        }
    }

    /// 任意 NaN 位模式都写成同一个规范模式。
    #[test]
    fn every_nan_is_canonical(payload in 1u64..(1u64 << 52), negative in any::<bool>()) {
        let bits = (u64::from(negative) << 63) | (0x7FFu64 << 52) | payload;
        let nan = f64::from_bits(bits);
        prop_assume!(nan.is_nan());

        let mut graph = ValueGraph::new();
        let id = graph.number(nan);
        graph.set_root(id);
        let bytes = graph.encode().expect("NaN 可编码");
        prop_assert_eq!(&bytes[2..], &[b'N', 0, 0, 0, 0, 0, 0, 0xF8, 0x7F][..]);
    }
}
