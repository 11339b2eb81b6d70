//! 请求与应答的线上形状。
//!
//! 请求以操作码字节开头，随后是带信封的值；应答是带信封的值或原始字节。
//! 引擎发起的回调请求以 `c` 开头，宿主的回调应答以 `c`（成功）或 `e`（宿主异常）开头。

use std::borrow::Cow;

use spark_codec_value::{ByteBuffer, EncodeError, Encoder, JsString, Node, NodeId, ValueGraph};

use crate::error::{IsolateError, ScriptError};

pub const CALLBACK: u8 = b'c';
pub const EXCEPTION: u8 = b'e';

/// 宿主到引擎的操作码。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Opcode {
    Attach,
    Call,
    Eval,
    HeapSnapshot,
    LowMemory,
    Pump,
    HeapStats,
    TakeSnapshot,
    WarmUp,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        match self {
            Self::Attach => b'A',
            Self::Call => b'C',
            Self::Eval => b'E',
            Self::HeapSnapshot => b'H',
            Self::LowMemory => b'L',
            Self::Pump => b'P',
            Self::HeapStats => b'S',
            Self::TakeSnapshot => b'T',
            Self::WarmUp => b'W',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'A' => Self::Attach,
            b'C' => Self::Call,
            b'E' => Self::Eval,
            b'H' => Self::HeapSnapshot,
            b'L' => Self::LowMemory,
            b'P' => Self::Pump,
            b'S' => Self::HeapStats,
            b'T' => Self::TakeSnapshot,
            b'W' => Self::WarmUp,
            _ => return None,
        })
    }
}

/// 空请求体：只有操作码与信封。
pub(crate) fn empty_request(opcode: Opcode) -> Result<ByteBuffer, EncodeError> {
    Encoder::request(opcode.byte()).finish()
}

/// 以数组承载多个字符串参数的请求体。
pub(crate) fn string_request(opcode: Opcode, items: &[&str]) -> Result<ByteBuffer, EncodeError> {
    let count = u32::try_from(items.len()).map_err(|_| EncodeError::OutOfRange(i64::MAX))?;
    let mut encoder = Encoder::request(opcode.byte());
    encoder.array_begin(count);
    for item in items {
        encoder.string_utf8(item);
    }
    encoder.array_end(count);
    encoder.finish()
}

pub(crate) fn bare_string(value: &str) -> Result<ByteBuffer, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.string_utf8(value);
    encoder.finish()
}

pub(crate) fn bare_bool(value: bool) -> Result<ByteBuffer, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.bool(value);
    encoder.finish()
}

fn encode_pair(value: Option<&ValueGraph>, error: &str) -> Result<ByteBuffer, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.array_begin(2);
    match value {
        Some(graph) => graph.encode_root_into(&mut encoder),
        None => encoder.undefined(),
    }
    encoder.string_utf8(error);
    encoder.array_end(2);
    encoder.finish()
}

/// `[result, err]`：成功时 `err` 为空串，失败时 `result` 为 undefined。
///
/// 结果图本身无法编码（例如嵌套过深）时改为回复内部错误，保证对端总能拿到一个二元组。
pub(crate) fn result_pair(result: Result<ValueGraph, ScriptError>) -> Result<ByteBuffer, EncodeError> {
    match result {
        Ok(graph) => encode_pair(Some(&graph), "").or_else(|error| {
            encode_pair(None, &ScriptError::internal(error.to_string()).to_wire())
        }),
        Err(error) => encode_pair(None, &error.to_wire()),
    }
}

/// `[blob, err]`，blob 以 Latin-1 字符串承载。
pub(crate) fn blob_pair(result: Result<Vec<u8>, ScriptError>) -> Result<ByteBuffer, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.array_begin(2);
    match &result {
        Ok(blob) => {
            encoder.string_latin1(blob);
            encoder.string_utf8("");
        }
        Err(error) => {
            encoder.undefined();
            encoder.string_utf8(&error.to_wire());
        }
    }
    encoder.array_end(2);
    encoder.finish()
}

/// 解码请求体，返回图与根数组的元素。
pub(crate) fn request_items(payload: &[u8]) -> Result<(ValueGraph, Vec<NodeId>), ScriptError> {
    let graph = ValueGraph::decode(payload)
        .map_err(|error| ScriptError::internal(format!("bad request: {error}")))?;
    let items = graph
        .root()
        .and_then(|root| graph.elements(root))
        .map(<[NodeId]>::to_vec)
        .ok_or_else(|| ScriptError::internal("bad request: expected an array"))?;
    Ok((graph, items))
}

/// 字符串或缓冲节点按 Latin-1 解释的字节。
///
/// 含有 U+00FF 以上字符的字符串无法还原为字节，返回协议错误。
pub(crate) fn bytes_of(graph: &ValueGraph, id: NodeId) -> Result<Cow<'_, [u8]>, IsolateError> {
    match graph.get(id) {
        Some(Node::String(JsString::Latin1(bytes)) | Node::ArrayBuffer(bytes)) => {
            Ok(Cow::Borrowed(bytes.as_slice()))
        }
        Some(Node::String(JsString::Utf8(bytes))) if bytes.is_ascii() => {
            Ok(Cow::Borrowed(bytes.as_slice()))
        }
        Some(Node::String(text @ JsString::Utf8(_))) => {
            latin1_bytes(text.to_str().chars().map(u32::from)).map(Cow::Owned)
        }
        Some(Node::String(JsString::Utf16(units))) => {
            latin1_bytes(units.iter().map(|unit| u32::from(*unit))).map(Cow::Owned)
        }
        _ => Err(IsolateError::Protocol("blob is not a string".into())),
    }
}

fn latin1_bytes(chars: impl Iterator<Item = u32>) -> Result<Vec<u8>, IsolateError> {
    chars
        .map(|c| u8::try_from(c).ok())
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| IsolateError::Protocol("blob contains non-latin1 characters".into()))
}

/// 宿主侧：解析 `[result, err]`，成功时返回以 `result` 为根的图。
pub(crate) fn parse_result_pair(response: &[u8]) -> Result<ValueGraph, IsolateError> {
    let mut graph = ValueGraph::decode(response)?;
    let (value, error) = pair_items(&graph)?;
    check_error(&graph, error)?;
    graph.set_root(value);
    Ok(graph)
}

/// 宿主侧：解析 `[blob, err]`。
pub(crate) fn parse_blob_pair(response: &[u8]) -> Result<Vec<u8>, IsolateError> {
    let graph = ValueGraph::decode(response)?;
    let (value, error) = pair_items(&graph)?;
    check_error(&graph, error)?;
    bytes_of(&graph, value).map(Cow::into_owned)
}

/// 宿主侧：解析裸错误串，空串表示成功。
pub(crate) fn parse_error_string(response: &[u8]) -> Result<(), IsolateError> {
    let graph = ValueGraph::decode(response)?;
    let root = graph
        .root()
        .ok_or_else(|| IsolateError::Protocol("empty response".into()))?;
    check_error(&graph, root)
}

fn pair_items(graph: &ValueGraph) -> Result<(NodeId, NodeId), IsolateError> {
    match graph.root().and_then(|root| graph.elements(root)) {
        Some(&[value, error]) => Ok((value, error)),
        _ => Err(IsolateError::Protocol("expected a [result, error] pair".into())),
    }
}

fn check_error(graph: &ValueGraph, id: NodeId) -> Result<(), IsolateError> {
    let wire = graph
        .as_str(id)
        .ok_or_else(|| IsolateError::Protocol("error slot is not a string".into()))?;
    match ScriptError::from_wire(&wire) {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn opcodes_round_trip() {
        for byte in b"ACEHLPSTW" {
            let opcode = Opcode::from_byte(*byte).expect("已知操作码");
            assert_eq!(opcode.byte(), *byte);
        }
        assert_eq!(Opcode::from_byte(b'Z'), None);
    }

    #[test]
    fn result_pair_carries_value_or_error() {
        let mut graph = ValueGraph::new();
        let root = graph.int(42);
        graph.set_root(root);
        let ok = result_pair(Ok(graph)).expect("可编码");
        let value = parse_result_pair(&ok).expect("成功");
        assert_eq!(value.root().and_then(|id| value.as_i64(id)), Some(42));

        let failed = result_pair(Err(ScriptError::runtime("boom"))).expect("可编码");
        let error = parse_result_pair(&failed).expect_err("失败");
        assert_eq!(error.class(), Some(ErrorClass::Runtime));
        assert_eq!(error.to_string(), "runtime error: boom");
    }

    #[test]
    fn unencodable_result_becomes_internal_error() {
        let mut graph = ValueGraph::new();
        let mut inner = graph.null();
        for _ in 0..=spark_codec_value::MAX_DEPTH {
            inner = graph.array(vec![inner]);
        }
        graph.set_root(inner);
        let response = result_pair(Ok(graph)).expect("回退到内部错误");
        let error = parse_result_pair(&response).expect_err("应为内部错误");
        assert_eq!(error.class(), Some(ErrorClass::Internal));
    }

    #[test]
    fn blob_pair_is_latin1() {
        let response = blob_pair(Ok(vec![0, 255, 7])).expect("可编码");
        assert_eq!(parse_blob_pair(&response).expect("成功"), vec![0, 255, 7]);
    }

    #[test]
    fn blob_bytes_reject_wide_characters() {
        let mut graph = ValueGraph::new();
        let narrow = graph.add(Node::String(JsString::Utf16(vec![0x41, 0xE9])));
        let wide = graph.add(Node::String(JsString::Utf16(vec![0x41, 0x263A])));
        let accented = graph.string("h\u{e9}");
        let emoji = graph.string("\u{263A}");
        let number = graph.int(1);

        assert_eq!(&*bytes_of(&graph, narrow).expect("Latin-1 范围内"), &[0x41u8, 0xE9][..]);
        assert_eq!(&*bytes_of(&graph, accented).expect("Latin-1 范围内"), &b"h\xe9"[..]);
        for id in [wide, emoji] {
            let error = bytes_of(&graph, id).expect_err("超出 Latin-1 必须失败");
            assert!(matches!(error, IsolateError::Protocol(_)), "{error:?}");
        }
        assert!(matches!(bytes_of(&graph, number), Err(IsolateError::Protocol(_))));
    }

    #[test]
    fn error_string_empty_means_ok() {
        assert!(parse_error_string(&bare_string("").expect("编码")).is_ok());
        let error = parse_error_string(&bare_string("Pbad").expect("编码")).expect_err("失败");
        assert_eq!(error.class(), Some(ErrorClass::Parse));
    }
}
