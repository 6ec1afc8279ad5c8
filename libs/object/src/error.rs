//! Value Container Error Types
//!
//! Contract violations of the type-erased container: extraction with the
//! wrong type, mutation of a shared payload, missing conversions and codecs.

use thiserror::Error;

/// Main value container error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// Extraction requested a type other than the stored one
    #[error("Type mismatch: container holds {found}, requested {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Mutable access requested while the payload is shared
    #[error("Not unique: {type_name} is held by {ref_count} references")]
    NotUnique {
        type_name: &'static str,
        ref_count: usize,
    },

    /// No conversion registered between the two types
    #[error("No conversion: {from} -> {to}{detail}")]
    NoConversion {
        from: &'static str,
        to: &'static str,
        detail: String,
    },

    /// Neither side supports ordering and the hash codes differ
    #[error("Not comparable: {lhs} vs {rhs}")]
    NotComparable { lhs: &'static str, rhs: &'static str },

    /// The stored type has no registered codec
    #[error("Not serializable: no codec for {type_name}")]
    NotSerializable { type_name: String },

    /// A codec rejected the wire bytes
    #[error("Decode error: tag {tag}: {message}")]
    Decode { tag: String, message: String },
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, ObjectError>;

impl ObjectError {
    pub fn type_mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch { expected, found }
    }

    pub fn no_conversion(from: &'static str, to: &'static str) -> Self {
        Self::NoConversion {
            from,
            to,
            detail: String::new(),
        }
    }

    pub fn no_conversion_with_detail(
        from: &'static str,
        to: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::NoConversion {
            from,
            to,
            detail: format!(" ({})", detail.into()),
        }
    }

    pub fn not_serializable(type_name: impl Into<String>) -> Self {
        Self::NotSerializable {
            type_name: type_name.into(),
        }
    }

    pub fn decode(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            tag: tag.into(),
            message: message.into(),
        }
    }
}
