use std::error::Error;
use std::fmt::{self, Display};

/// Everything that can go wrong reading a GVariant frame.
///
/// Every fallible operation on [`crate::reader::Reader`] reports failure
/// through this enum and leaves the reader otherwise unchanged: callers may
/// retry with a different extraction or abandon the reader, but there is no
/// partial progress to roll back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GVariantError {
    /// The signature string is not a syntactically valid GVariant type.
    InvalidSignature,
    /// The requested extraction doesn't match the next signature character.
    TypeMismatch,
    /// An offset table, child extent, or string terminator would run past
    /// the end of the frame.
    TruncatedFrame,
    /// A stored framing offset exceeds the frame's length.
    OffsetOutOfRange,
    /// Extraction was attempted past the last child of the container.
    Overrun,
}

impl Display for GVariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            GVariantError::InvalidSignature => "invalid GVariant signature",
            GVariantError::TypeMismatch => "requested type does not match signature",
            GVariantError::TruncatedFrame => "frame is too short for its declared contents",
            GVariantError::OffsetOutOfRange => "framing offset exceeds frame length",
            GVariantError::Overrun => "no more children in this container",
        };
        write!(f, "{}", msg)
    }
}

impl Error for GVariantError {}

pub type Result<T> = std::result::Result<T, GVariantError>;
