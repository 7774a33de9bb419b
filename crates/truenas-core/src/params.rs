//! Per-method parameter shaping.
//!
//! The middleware takes positional params as a JSON array. Most methods take
//! a single object argument, so callers pass that object and it is wrapped
//! here; a few methods are listed below because they expect something else.

use crate::{ClientError, Result};
use serde_json::Value;

/// How a method's params are sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    /// Send as given.
    Passthrough,
    /// A single integer id; numeric strings are converted.
    IntegerId,
    /// Wrap the value as `[value]`.
    Wrapped,
}

const METHOD_SHAPES: &[(&str, ParamShape)] = &[
    ("vm.update", ParamShape::Passthrough),
    ("vm.stop", ParamShape::Passthrough),
    ("vm.device.update", ParamShape::Passthrough),
    ("pool.dataset.delete", ParamShape::Passthrough),
    ("pool.dataset.update", ParamShape::Passthrough),
    ("pool.snapshot.delete", ParamShape::Passthrough),
    ("core.subscribe", ParamShape::Passthrough),
    ("vm.delete", ParamShape::IntegerId),
    ("vm.get_instance", ParamShape::IntegerId),
];

/// Look up the shape for `method`; unlisted methods are [`ParamShape::Wrapped`].
pub fn shape_for(method: &str) -> ParamShape {
    METHOD_SHAPES
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, shape)| *shape)
        .unwrap_or(ParamShape::Wrapped)
}

/// Reshape `params` for `method`.
///
/// Arrays are always sent as-is and `null` becomes `[]`.
pub fn shape_params(method: &str, params: Value) -> Result<Value> {
    match params {
        Value::Array(_) => return Ok(params),
        Value::Null => return Ok(Value::Array(Vec::new())),
        _ => {}
    }

    match shape_for(method) {
        ParamShape::Passthrough => Ok(params),
        ParamShape::IntegerId => {
            let id = match params {
                Value::String(ref s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| {
                    ClientError::InvalidParams {
                        method: method.to_string(),
                        message: format!("invalid ID format: {}", s),
                    }
                })?,
                other => other,
            };
            Ok(Value::Array(vec![id]))
        }
        ParamShape::Wrapped => Ok(Value::Array(vec![params])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arrays_pass_through() {
        let params = json!([{"name": "tank"}, {"recursive": true}]);
        assert_eq!(shape_params("pool.create", params.clone()).unwrap(), params);
    }

    #[test]
    fn test_objects_wrapped_by_default() {
        assert_eq!(
            shape_params("vm.create", json!({"name": "vm1"})).unwrap(),
            json!([{"name": "vm1"}])
        );
    }

    #[test]
    fn test_null_becomes_empty_array() {
        assert_eq!(shape_params("core.ping", Value::Null).unwrap(), json!([]));
    }

    #[test]
    fn test_passthrough_methods() {
        assert_eq!(shape_for("core.subscribe"), ParamShape::Passthrough);
        assert_eq!(
            shape_params("pool.dataset.delete", json!("tank/data")).unwrap(),
            json!("tank/data")
        );
    }

    #[test]
    fn test_integer_id_conversion() {
        assert_eq!(shape_params("vm.delete", json!("17")).unwrap(), json!([17]));
        assert_eq!(
            shape_params("vm.get_instance", json!(3)).unwrap(),
            json!([3])
        );
    }

    #[test]
    fn test_integer_id_rejects_non_numeric() {
        match shape_params("vm.delete", json!("abc")) {
            Err(ClientError::InvalidParams { method, message }) => {
                assert_eq!(method, "vm.delete");
                assert!(message.contains("abc"));
            }
            other => panic!("Expected InvalidParams, got: {:?}", other),
        }
    }
}
