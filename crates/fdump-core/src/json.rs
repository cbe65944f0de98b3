//! JSON parsing for widget trees.
//!
//! Every widget level adds two levels of JSON nesting (the node object and
//! its `children` array), so a real app's tree easily passes serde_json's
//! default limit of 128. [`parse_value`] lifts the limit and grows the stack
//! on the heap as the parser descends.

use serde::Deserialize;
use serde_json::Value;

/// Parse `text` into a [`Value`] with no nesting limit.
///
/// Errors carry the same line/column information as `serde_json::from_str`.
pub fn parse_value(text: &str) -> serde_json::Result<Value> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}
