//! Error types for circulation operations.

use crate::types::TitleId;
use std::fmt;
use thiserror::Error;

/// Kind of stored entity, used in error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Catalog title
    Title,
    /// Library member
    Member,
    /// Borrow request
    BorrowRequest,
    /// Borrow record
    BorrowRecord,
    /// Reservation
    Reservation,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Title => "title",
            Self::Member => "member",
            Self::BorrowRequest => "borrow request",
            Self::BorrowRecord => "borrow record",
            Self::Reservation => "reservation",
        };
        f.write_str(name)
    }
}

/// Errors raised by a [`CirculationStore`](crate::store::CirculationStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row changed (or appeared) since it was read; the unit of work was not applied
    #[error("Concurrent modification of {entity} {id}")]
    Conflict {
        /// Kind of the conflicting row
        entity: EntityKind,
        /// Identifier of the conflicting row
        id: String,
    },

    /// A write would break a stored invariant
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// The storage backend failed
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Errors returned by circulation operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CirculationError {
    /// A referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of the missing entity
        entity: EntityKind,
        /// Identifier that was looked up
        id: String,
    },

    /// The entity is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No copy of the title is available
    #[error("No copies available for title {title_id}")]
    CapacityExceeded {
        /// The exhausted title
        title_id: TitleId,
    },

    /// Input or resulting state failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage failure, including conflicts that outlived every retry
    #[error(transparent)]
    Store(StoreError),
}

impl CirculationError {
    /// Shorthand for [`CirculationError::NotFound`].
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the error is a version conflict worth retrying from fresh reads.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }
}

impl From<StoreError> for CirculationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Constraint(message) => Self::Validation(message),
            other => Self::Store(other),
        }
    }
}
