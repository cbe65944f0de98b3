//! Expression evaluation and large string recovery.
//!
//! `evaluate` answers with an `InstanceRef`. For strings, the VM inlines the
//! value in `valueAsString` but truncates it beyond a size limit (128 chars by
//! default), setting `valueAsStringIsTruncated`. The full value is then only
//! reachable through a follow-up `getObject` on the instance `id`.
//! [`resolve_string`] implements that two-tier lookup and reports through
//! [`ResolvedString::complete`] whether the returned text is known to be whole.

use serde::Deserialize;
use serde_json::{json, Value};

use fdump_core::prelude::*;

use super::client::VmRpc;

/// The subset of a VM Service `InstanceRef`/`Instance` used here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    /// `"@Instance"`, `"Instance"`, `"@Error"`, `"Error"`, ...
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value_as_string: Option<String>,
    #[serde(default)]
    pub value_as_string_is_truncated: Option<bool>,
    /// Exception text for `@Error` results.
    #[serde(default)]
    pub message: Option<String>,
}

impl InstanceRef {
    fn is_truncated(&self) -> bool {
        self.value_as_string_is_truncated == Some(true)
    }

    fn is_error(&self) -> bool {
        matches!(self.type_.as_deref(), Some("@Error") | Some("Error"))
    }
}

/// A string recovered from an evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedString {
    pub value: String,
    /// `false` when the VM still reported the value as truncated after the
    /// follow-up fetch; `value` is then the best available prefix.
    pub complete: bool,
}

impl ResolvedString {
    fn complete(value: String) -> Self {
        Self {
            value,
            complete: true,
        }
    }
}

/// Call `evaluate`, optionally in the context of `target_id` (a library id).
pub async fn evaluate<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    target_id: Option<&str>,
    expression: &str,
) -> Result<Value> {
    let params = match target_id {
        Some(target_id) => json!({
            "isolateId": isolate_id,
            "targetId": target_id,
            "expression": expression,
        }),
        None => json!({
            "isolateId": isolate_id,
            "expression": expression,
        }),
    };
    rpc.request("evaluate", Some(params)).await
}

/// Call `getObject` for `object_id`.
pub async fn get_object<R: VmRpc>(rpc: &R, isolate_id: &str, object_id: &str) -> Result<Value> {
    let params = json!({
        "isolateId": isolate_id,
        "objectId": object_id,
    });
    rpc.request("getObject", Some(params)).await
}

/// Recover the full string behind an evaluation `result`.
///
/// - A bare JSON string is returned unchanged.
/// - An untruncated `valueAsString` is returned without any further call.
/// - Otherwise exactly one `getObject` is issued for the instance `id`; its
///   `valueAsString` is returned even if still truncated (with
///   `complete == false` and a warning).
///
/// # Errors
///
/// - [`Error::EvaluationFailed`] if `result` is an `@Error` instance.
/// - [`Error::UnexpectedResultShape`] if no string can be found, carrying the
///   serialized offending value.
pub async fn resolve_string<R: VmRpc>(
    rpc: &R,
    isolate_id: &str,
    result: &Value,
) -> Result<ResolvedString> {
    let instance = match result {
        Value::String(s) => return Ok(ResolvedString::complete(s.clone())),
        Value::Object(_) => InstanceRef::deserialize(result)
            .map_err(|_| Error::unexpected_shape(result))?,
        _ => return Err(Error::unexpected_shape(result)),
    };

    if instance.is_error() {
        let message = instance
            .message
            .clone()
            .or(instance.value_as_string.clone())
            .unwrap_or_else(|| result.to_string());
        return Err(Error::EvaluationFailed { message });
    }

    if let Some(value) = instance.value_as_string.as_ref() {
        if !instance.is_truncated() {
            return Ok(ResolvedString::complete(value.clone()));
        }
    }

    let Some(object_id) = instance.id.as_deref() else {
        return Err(Error::unexpected_shape(result));
    };

    info!(
        "Evaluation result is truncated, fetching full object {}",
        object_id
    );
    let full = get_object(rpc, isolate_id, object_id).await?;
    let full_instance =
        InstanceRef::deserialize(&full).map_err(|_| Error::unexpected_shape(&full))?;

    match full_instance.value_as_string {
        Some(value) if full_instance.value_as_string_is_truncated == Some(true) => {
            warn!(
                "String is still truncated after getObject ({} chars); using best-effort value",
                value.chars().count()
            );
            Ok(ResolvedString {
                value,
                complete: false,
            })
        }
        Some(value) => Ok(ResolvedString::complete(value)),
        None => Err(Error::unexpected_shape(&full)),
    }
}
