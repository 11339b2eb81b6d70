#![no_main]

use libfuzzer_sys::fuzz_target;
use spark_codec_value::ValueGraph;

// 任意字节只允许返回错误，不允许 panic；能解码的输入重新编码后必须稳定。
fuzz_target!(|data: &[u8]| {
    let Ok(graph) = ValueGraph::decode(data) else {
        return;
    };
    let Ok(first) = graph.encode() else {
        return;
    };
    let again = ValueGraph::decode(first.as_slice()).expect("重新编码的消息必须可解码");
    let second = again.encode().expect("同一值图第二次编码不应失败");
    assert_eq!(first.as_slice(), second.as_slice(), "编码结果不稳定");
});
