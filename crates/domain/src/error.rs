//! Domain error types.

use common::EntityId;
use record_store::{StoreError, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an actor is not allowed to perform a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// The actor does not own the entity.
    #[error("Not authorized")]
    NotOwner,

    /// Another entity holds a claim on the target.
    #[error("{reason}")]
    Locked {
        id: EntityId,
        holder: EntityId,
        reason: String,
    },
}

/// One entry of an error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Response body for a failed operation: `{ "errors": [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<FieldError>,
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No entity with this id is known locally.
    #[error("Not found: {0}")]
    NotFound(EntityId),

    /// The entity changed since it was read.
    #[error("Concurrency conflict for {id}: expected version {expected}, found {actual}")]
    Concurrency {
        id: EntityId,
        expected: Version,
        actual: Version,
    },

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Input failed validation; nothing was written.
    #[error("Invalid request parameters")]
    Validation(Vec<FieldError>),

    /// The entity's current status does not allow the operation.
    #[error("{0}")]
    InvalidState(String),

    /// The payment gateway refused or failed the charge.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Underlying storage failure.
    #[error("Record store error: {0}")]
    Store(StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcurrencyConflict {
                id,
                expected,
                actual,
            } => DomainError::Concurrency {
                id,
                expected,
                actual,
            },
            StoreError::NotFound(id) => DomainError::NotFound(id),
            other => DomainError::Store(other),
        }
    }
}

impl DomainError {
    /// Builds a validation error for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Validation(vec![FieldError::for_field(field, message)])
    }

    /// Returns true if this is an optimistic concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Concurrency { .. })
    }

    /// HTTP status code a transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DomainError::NotFound(_) => 404,
            DomainError::Concurrency { .. } => 409,
            DomainError::Authorization(AuthorizationError::NotOwner) => 401,
            DomainError::Authorization(AuthorizationError::Locked { .. }) => 400,
            DomainError::Validation(_) => 400,
            DomainError::InvalidState(_) => 400,
            DomainError::Gateway(_) | DomainError::Store(_) | DomainError::Serialization(_) => {
                500
            }
        }
    }

    /// Messages for the response body.
    ///
    /// Infrastructure failures are reported generically so internals do not
    /// leak to callers.
    pub fn serialize_errors(&self) -> Vec<FieldError> {
        match self {
            DomainError::NotFound(_) => vec![FieldError::new("Not Found")],
            DomainError::Validation(errors) => errors.clone(),
            DomainError::Gateway(_) | DomainError::Store(_) | DomainError::Serialization(_) => {
                vec![FieldError::new("Something went wrong")]
            }
            other => vec![FieldError::new(other.to_string())],
        }
    }

    /// The full response body.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            errors: self.serialize_errors(),
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let id = EntityId::new();
        assert_eq!(DomainError::NotFound(id).status_code(), 404);
        assert_eq!(
            DomainError::Concurrency {
                id,
                expected: Version::new(0),
                actual: Version::new(1),
            }
            .status_code(),
            409
        );
        assert_eq!(
            DomainError::from(AuthorizationError::NotOwner).status_code(),
            401
        );
        assert_eq!(
            DomainError::from(AuthorizationError::Locked {
                id,
                holder: EntityId::new(),
                reason: "Cannot edit a reserved ticket".into(),
            })
            .status_code(),
            400
        );
        assert_eq!(DomainError::invalid_field("title", "required").status_code(), 400);
        assert_eq!(DomainError::InvalidState("cancelled".into()).status_code(), 400);
        assert_eq!(
            DomainError::Store(StoreError::InvalidRecord("x".into())).status_code(),
            500
        );
    }

    #[test]
    fn store_conflict_becomes_concurrency() {
        let id = EntityId::new();
        let err: DomainError = StoreError::ConcurrencyConflict {
            id,
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();
        assert!(err.is_conflict());

        let err: DomainError = StoreError::NotFound(id).into();
        assert!(matches!(err, DomainError::NotFound(found) if found == id));
    }

    #[test]
    fn response_body_shape() {
        let err = DomainError::Validation(vec![
            FieldError::for_field("title", "Title is required"),
            FieldError::for_field("price", "Price must be greater than 0"),
        ]);
        let body = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(body["errors"][0]["field"], "title");
        assert_eq!(body["errors"][1]["message"], "Price must be greater than 0");

        let body = serde_json::to_value(DomainError::NotFound(EntityId::new()).to_response()).unwrap();
        assert_eq!(body, serde_json::json!({"errors": [{"message": "Not Found"}]}));
    }

    #[test]
    fn infrastructure_errors_are_generic() {
        let err = DomainError::Store(StoreError::InvalidRecord("owner is required".into()));
        assert_eq!(err.serialize_errors(), vec![FieldError::new("Something went wrong")]);
    }
}
