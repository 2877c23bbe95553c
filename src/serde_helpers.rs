//! Typed conversion of JSON responses.
//!
//! With the `tracing` feature enabled, fields the target type does not capture are logged so
//! that upstream API changes show up in the logs, and failures report the offending path.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize a JSON value, warning about unknown fields when `tracing` is enabled.
#[cfg(feature = "tracing")]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "deserializing JSON");

    let mut unknown_paths: Vec<String> = Vec::new();

    let result: Result<T, _> = serde_path_to_error::deserialize(serde_ignored::Deserializer::new(
        value,
        &mut |path: serde_ignored::Path<'_>| unknown_paths.push(path.to_string()),
    ));

    match result {
        Ok(parsed) => {
            for field in unknown_paths {
                tracing::warn!(
                    type_name = %type_name::<T>(),
                    field = %field,
                    "unknown field in API response"
                );
            }
            Ok(parsed)
        }
        Err(e) => {
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %e.path(),
                error = %e.inner(),
                "deserialization failed"
            );
            Err(e.into_inner().into())
        }
    }
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}
