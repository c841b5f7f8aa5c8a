//! Error types for Sluice live queries.

use crate::types::FieldType;
use alloc::string::String;
use thiserror::Error;

/// Result type alias for Sluice operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for live-query registration, fetching and reconciliation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The query executor could not complete the initial fetch.
    #[error("Fetch failed: {message}")]
    FetchFailed { message: String },
    /// The change notification source could not establish a channel.
    #[error("Change channel unavailable for {entity_type}: {message}")]
    ChannelUnavailable { entity_type: String, message: String },
    /// A fetched payload could not be mapped into the expected shape.
    #[error("Ambiguous response shape: {message}")]
    AmbiguousResponseShape { message: String },
    /// Entity type is not declared in the catalog.
    #[error("Entity type not found: {name}")]
    UnknownEntityType { name: String },
    /// Field is not declared on the entity type.
    #[error("Field {field} not found on entity type {entity_type}")]
    UnknownField { entity_type: String, field: String },
    /// Operator cannot be applied to the field's type.
    #[error("Operator {operator} is not supported on field {field} of type {field_type:?}")]
    UnsupportedOperator {
        field: String,
        operator: &'static str,
        field_type: FieldType,
    },
    /// Invalid entity type declaration.
    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },
    /// Invalid query configuration.
    #[error("Invalid query config: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    /// Creates a fetch failure error.
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Error::FetchFailed {
            message: message.into(),
        }
    }

    /// Creates a channel unavailable error.
    pub fn channel_unavailable(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ChannelUnavailable {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Creates an ambiguous response shape error.
    pub fn ambiguous_shape(message: impl Into<String>) -> Self {
        Error::AmbiguousResponseShape {
            message: message.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_entity_type(name: impl Into<String>) -> Self {
        Error::UnknownEntityType { name: name.into() }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(entity_type: impl Into<String>, field: impl Into<String>) -> Self {
        Error::UnknownField {
            entity_type: entity_type.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true for errors that leave a query's cached result usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ChannelUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::fetch_failed("network down");
        assert_eq!(err.to_string(), "Fetch failed: network down");

        let err = Error::channel_unavailable("Todo", "socket closed");
        assert!(err.to_string().contains("Todo"));

        let err = Error::unknown_entity_type("Ghost");
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_error_recoverable() {
        assert!(Error::channel_unavailable("Todo", "x").is_recoverable());
        assert!(!Error::fetch_failed("x").is_recoverable());
        assert!(!Error::ambiguous_shape("x").is_recoverable());
    }

    #[test]
    fn test_unsupported_operator_display() {
        let err = Error::UnsupportedOperator {
            field: "done".into(),
            operator: "beginsWith",
            field_type: FieldType::Boolean,
        };
        let text = err.to_string();
        assert!(text.contains("beginsWith"));
        assert!(text.contains("Boolean"));
    }
}
