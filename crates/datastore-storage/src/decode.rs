//! Typed decoding of stored values.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outcome of reading a value as `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A live value decoded as `T`.
    Typed(T),
    /// A live value that does not decode as `T`, passed through unchanged.
    Raw(Value),
    /// No live value; the caller's default.
    Default(Value),
}

impl<T: DeserializeOwned> Decoded<T> {
    /// Decode a stored value, falling back to [`Decoded::Raw`].
    #[must_use]
    pub fn from_stored(value: Value) -> Self {
        match T::deserialize(&value) {
            Ok(typed) => Self::Typed(typed),
            Err(e) => {
                tracing::warn!(
                    target_type = std::any::type_name::<T>(),
                    error = %e,
                    "Stored value did not decode, returning raw value"
                );
                Self::Raw(value)
            },
        }
    }
}

impl<T> Decoded<T> {
    /// The typed value, if decoding succeeded.
    pub fn typed(self) -> Option<T> {
        match self {
            Self::Typed(t) => Some(t),
            Self::Raw(_) | Self::Default(_) => None,
        }
    }

    /// Whether decoding succeeded.
    pub fn is_typed(&self) -> bool {
        matches!(self, Self::Typed(_))
    }

    /// The untyped value for [`Decoded::Raw`] and [`Decoded::Default`].
    pub fn untyped(&self) -> Option<&Value> {
        match self {
            Self::Typed(_) => None,
            Self::Raw(v) | Self::Default(v) => Some(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[test]
    fn test_decodes_matching_shape() {
        let decoded = Decoded::<Profile>::from_stored(json!({"name": "ada", "age": 36}));
        assert!(decoded.is_typed());
        assert_eq!(
            decoded.typed(),
            Some(Profile {
                name: "ada".into(),
                age: 36
            })
        );
    }

    #[test]
    fn test_falls_back_to_raw() {
        let decoded = Decoded::<Profile>::from_stored(json!("not a profile"));
        assert_eq!(decoded.untyped(), Some(&json!("not a profile")));
        assert_eq!(decoded.typed(), None);
    }
}
