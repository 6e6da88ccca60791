//! Configuration layer merging
//!
//! Objects merge key by key. Arrays and scalars from the later layer replace
//! the earlier value outright, so `engine_args` or a marker list given in a
//! config file is never concatenated with the defaults.

use serde_json::Value;

/// Merge `overlay` on top of `base`. A `null` in the overlay clears the value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let next = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                merged.insert(key, next);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay,
    }
}

/// Fold layers in precedence order; the last layer wins.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
