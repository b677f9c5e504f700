//! JSON Schema 生成（schemars）
//!
//! 将各结构化输出（模式选择、任务列表、判定结果、报告）的 JSON 结构注入 prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};

/// 任意结构化输出类型的 JSON Schema 字符串
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
