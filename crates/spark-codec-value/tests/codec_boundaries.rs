//! `codec_boundaries` 集成测试：深度、BigInt、NaN 与自引用等边界行为。

use spark_codec_value::{
    BigInt, DecodeError, Encoder, GraphBuilder, MAX_DEPTH, Node, ValueGraph, decode,
};

fn nested_arrays(levels: usize) -> Vec<u8> {
    let mut encoder = Encoder::new();
    for _ in 0..levels {
        encoder.array_begin(1);
    }
    encoder.null();
    for _ in 0..levels {
        encoder.array_end(1);
    }
    encoder.finish().expect("嵌套数组可编码").into_vec()
}

/// ## 测试一：嵌套深度的上下界
///
/// - **意图 (Why)**：解码器以固定上限保护原生调用栈；
/// - **逻辑 (How)**：手工编码 96 层与 97 层嵌套数组；
/// - **契约 (What)**：96 层成功，97 层返回 `too much recursion`。
#[test]
fn depth_96_decodes_and_97_fails() {
    let graph = ValueGraph::decode(&nested_arrays(MAX_DEPTH)).expect("96 层嵌套应可解码");
    let mut cursor = graph.root().expect("根");
    let mut levels = 0;
    while let Some(elements) = graph.elements(cursor) {
        levels += 1;
        cursor = elements[0];
    }
    assert_eq!(levels, MAX_DEPTH);
    assert_eq!(graph.get(cursor), Some(&Node::Null));

    let error = ValueGraph::decode(&nested_arrays(MAX_DEPTH + 1)).expect_err("97 层必须失败");
    assert_eq!(error, DecodeError::TooMuchRecursion);
    assert_eq!(error.to_string(), "too much recursion");
}

/// 写入端同样拒绝超过上限的图，避免产出对端无法解码的字节。
#[test]
fn writer_refuses_graphs_deeper_than_decoder_limit() {
    let mut graph = ValueGraph::new();
    let mut inner = graph.null();
    for _ in 0..=MAX_DEPTH {
        inner = graph.array(vec![inner]);
    }
    graph.set_root(inner);
    let error = graph.encode().expect_err("97 层图不可编码");
    assert_eq!(error.to_string(), "unsupported value: too much recursion");
}

/// ## 测试二：BigInt 规范形
///
/// - **契约 (What)**：高位零字被裁掉；`-(2^64)` 往返后符号与幅值不变；负零在解码端被拒绝。
#[test]
fn bigint_boundaries() {
    let mut encoder = Encoder::new();
    encoder.bigint(&[0u8; 32], false);
    let bytes = encoder.finish().expect("零可编码");
    assert_eq!(&bytes[2..], &[b'Z', 0]);

    let mut graph = ValueGraph::new();
    let value = graph.bigint(BigInt::from_i128(-(1i128 << 64)));
    graph.set_root(value);
    let decoded = ValueGraph::decode(&graph.encode().expect("编码")).expect("解码");
    match decoded.root_node() {
        Some(Node::BigInt(big)) => {
            assert!(big.negative);
            assert_eq!(big.magnitude, [0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
            assert_eq!(big.to_i128(), Some(-(1i128 << 64)));
        }
        other => panic!("期望 BigInt，实际为 {other:?}"),
    }

    let mut builder = GraphBuilder::new();
    assert_eq!(
        decode(&[0xFF, 0x0F, b'Z', 1], &mut builder),
        Err(DecodeError::NegativeZeroBigInt)
    );
}

/// ## 测试三：NaN 解码
///
/// 任意 NaN 位模式在解码后都是规范 NaN。
#[test]
fn decoded_nan_is_canonical() {
    let mut bytes = vec![0xFF, 0x0F, b'N'];
    bytes.extend_from_slice(&f64::from_bits(0xFFF0_0000_DEAD_BEEF).to_le_bytes());
    let graph = ValueGraph::decode(&bytes).expect("NaN 可解码");
    match graph.root_node() {
        Some(Node::Number(v)) => {
            assert!(v.is_nan());
            assert_eq!(v.to_le_bytes(), [0, 0, 0, 0, 0, 0, 0xF8, 0x7F]);
        }
        other => panic!("期望数字，实际为 {other:?}"),
    }
}

/// ## 测试四：自引用对象
///
/// `o.self = o` 往返后 `self` 指向同一个实例而不是副本。
#[test]
fn cycle_resolves_to_same_instance() {
    let mut graph = ValueGraph::new();
    let object = graph.object(Vec::new());
    let key = graph.string("self");
    graph.insert(object, key, object);
    graph.set_root(object);

    let bytes = graph.encode().expect("编码");
    // o, "self", ^0, {1
    assert_eq!(
        &bytes[2..],
        &[b'o', b'S', 4, b's', b'e', b'l', b'f', b'^', 0, b'{', 1]
    );
    let decoded = ValueGraph::decode(&bytes).expect("解码");
    let root = decoded.root().expect("根");
    assert_eq!(decoded.property(root, "self"), Some(root));
    assert_eq!(decoded.len(), 2, "只应有对象与键两个节点");
}

/// 截断输入在任意位置都只产生错误，不会 panic。
#[test]
fn every_truncation_fails_cleanly() {
    let mut graph = ValueGraph::new();
    let message = graph.error(None, Some("boom"), None);
    let key = graph.string("k");
    let n = graph.number(1.5);
    let object = graph.object(vec![(key, n)]);
    let root = graph.array(vec![message, object]);
    graph.set_root(root);
    let bytes = graph.encode().expect("编码");
    // 只有信封（2 字节）是合法的空消息
    for cut in (0..2).chain(3..bytes.len()) {
        assert!(
            ValueGraph::decode(&bytes[..cut]).is_err(),
            "截断到 {cut} 字节时应失败"
        );
    }
}

/// ## 测试：非法 UTF-8 字节原样往返
///
/// - **意图 (Why)**：对端可能发来不合法的 UTF-8 串，宿主转发时不能替换或增删字节；
/// - **契约 (What)**：解码再编码得到逐字节相同的消息；读取为 Rust 字符串时才做替换。
#[test]
fn invalid_utf8_bytes_survive_round_trip() {
    let wire = [0xFF, 0x0F, b'S', 2, 0xC3, 0x28];
    let graph = ValueGraph::decode(&wire).expect("非法 UTF-8 仍可解码");
    let root = graph.root().expect("根");
    assert_eq!(graph.as_str(root).as_deref(), Some("\u{FFFD}("));

    let encoded = graph.encode().expect("可重新编码");
    assert_eq!(encoded.as_slice(), &wire[..], "往返后字节必须不变");
}

/// 错误对象的 message 保留原有的字符串编码，不被改写成 UTF-8。
#[test]
fn error_message_keeps_wire_encoding() {
    let wire = [
        0xFF, 0x0F, b'r', b'm', b'"', 2, b'h', 0xE9, b's', b'S', 2, 0xC3, 0x28, b'.',
    ];
    let graph = ValueGraph::decode(&wire).expect("错误对象可解码");
    let encoded = graph.encode().expect("可重新编码");
    assert_eq!(encoded.as_slice(), &wire[..]);
}
