//! Literal prescreen patterns.
//!
//! Every signature's first line must pin down a literal byte sequence: the
//! expected string bytes, or the size- and endianness-faithful encoding of
//! the expected integer. The scan loop feeds these patterns to a
//! `memmem::Finder` to discover candidate offsets without evaluating rules.

use crate::{Endian, Expected, SignatureLine};

/// Derive the literal byte pattern for a signature's first line.
/// `None` means the line is not prescreenable (wildcard value).
pub(crate) fn literal_pattern(line: &SignatureLine) -> Option<Vec<u8>> {
    match &line.expected {
        Expected::Bytes(bytes) => Some(bytes.clone()),
        Expected::Int(value) => {
            let raw = *value as u64;
            Some(match line.endian {
                Endian::Little => raw.to_le_bytes()[..line.size].to_vec(),
                Endian::Big => raw.to_be_bytes()[8 - line.size..].to_vec(),
            })
        }
        Expected::Any => None,
    }
}
