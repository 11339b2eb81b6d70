//! 线上标签目录。
//!
//! 所有标签均为单个 ASCII 字节；数值载荷使用小端序，长度与计数使用 LEB128 风格的 varint。

/// 信封第一个字节：格式标记。
pub const FORMAT_MARKER: u8 = 0xFF;
/// 信封第二个字节：格式版本。
pub const FORMAT_VERSION: u8 = 0x0F;
/// 完整信封。
pub const ENVELOPE: [u8; 2] = [FORMAT_MARKER, FORMAT_VERSION];

/// 双字节字符串前的对齐填充，解码时跳过。
pub const PADDING: u8 = 0x00;

pub const NULL: u8 = b'0';
pub const UNDEFINED: u8 = b'_';
pub const TRUE: u8 = b'T';
pub const FALSE: u8 = b'F';
/// `new Boolean(true)`，解码为普通布尔。
pub const TRUE_OBJECT: u8 = b'y';
/// `new Boolean(false)`，解码为普通布尔。
pub const FALSE_OBJECT: u8 = b'x';
pub const INT32: u8 = b'I';
pub const DOUBLE: u8 = b'N';
/// `new Number(..)`，解码为普通数字。
pub const NUMBER_OBJECT: u8 = b'n';
pub const DATE: u8 = b'D';
pub const BIGINT: u8 = b'Z';
pub const LATIN1_STRING: u8 = b'"';
pub const UTF8_STRING: u8 = b'S';
pub const UTF16_STRING: u8 = b'c';
/// `new String(..)`，解码为普通字符串。
pub const STRING_OBJECT: u8 = b's';
/// 正则对象，解码为其 pattern 字符串。
pub const REGEXP: u8 = b'R';

pub const BEGIN_DENSE_ARRAY: u8 = b'A';
pub const END_DENSE_ARRAY: u8 = b'$';
/// 稠密数组中的空洞，解码为 undefined。
pub const THE_HOLE: u8 = b'-';
pub const BEGIN_SPARSE_ARRAY: u8 = b'a';
pub const END_SPARSE_ARRAY: u8 = b'@';
pub const BEGIN_OBJECT: u8 = b'o';
pub const END_OBJECT: u8 = b'{';
pub const BEGIN_MAP: u8 = b';';
pub const END_MAP: u8 = b':';
pub const BEGIN_SET: u8 = b'\'';
pub const END_SET: u8 = b',';
pub const OBJECT_REFERENCE: u8 = b'^';

pub const ARRAY_BUFFER: u8 = b'B';
pub const RESIZABLE_ARRAY_BUFFER: u8 = b'~';
pub const ARRAY_BUFFER_VIEW: u8 = b'V';
/// 视图子标签：DataView 与各类 TypedArray。
pub const ARRAY_BUFFER_VIEW_SUBTAGS: &[u8] = b"?BCDFQWbdfhqw";

pub const ERROR: u8 = b'r';
/// 错误对象内的子标签。
pub mod error {
    pub const EVAL_PROTOTYPE: u8 = b'E';
    pub const REFERENCE_PROTOTYPE: u8 = b'F';
    pub const RANGE_PROTOTYPE: u8 = b'R';
    pub const SYNTAX_PROTOTYPE: u8 = b'S';
    pub const TYPE_PROTOTYPE: u8 = b'T';
    pub const URI_PROTOTYPE: u8 = b'U';
    pub const MESSAGE: u8 = b'm';
    pub const STACK: u8 = b's';
    pub const CAUSE: u8 = b'c';
    pub const END: u8 = b'.';
}

/// NaN 的唯一线上位模式：`00 00 00 00 00 00 F8 7F`。
pub const CANONICAL_NAN: [u8; 8] = [0, 0, 0, 0, 0, 0, 0xF8, 0x7F];

/// 函数的不透明标记：UTF-16LE 字符串 `U+0BFF` + `"JavaScriptFunction"`。
pub const FUNCTION_MARKER_UNITS: [u16; 19] = [
    0x0BFF, 0x4A, 0x61, 0x76, 0x61, 0x53, 0x63, 0x72, 0x69, 0x70, 0x74, 0x46, 0x75, 0x6E, 0x63,
    0x74, 0x69, 0x6F, 0x6E,
];

/// 判断一段 UTF-16LE 载荷是否为函数标记。
pub fn is_function_marker(utf16le: &[u8]) -> bool {
    utf16le.len() == FUNCTION_MARKER_UNITS.len() * 2
        && utf16le
            .chunks_exact(2)
            .zip(FUNCTION_MARKER_UNITS.iter())
            .all(|(pair, unit)| u16::from_le_bytes([pair[0], pair[1]]) == *unit)
}

/// 判断下一个标签是否为三种字符串之一。
pub(crate) fn is_string_tag(tag: u8) -> bool {
    matches!(tag, LATIN1_STRING | UTF8_STRING | UTF16_STRING)
}
