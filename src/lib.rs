use memchr::memmem::Finder;
use thiserror::Error;

#[macro_use]
mod macros;
mod api;
mod engine;

pub use api::{Magic, SignatureResult};

use crate::engine::Expr;

/// Errors surfaced while constructing a scanner or loading signature files.
///
/// Matching itself never fails; short reads, render mismatches and tag
/// coercion failures are all recovered locally during a scan.
#[derive(Debug, Error)]
pub enum MagicError {
    #[error("invalid signature line: '{line}'")]
    InvalidLine { line: String },

    #[error("failed to decode string value '{value}' in line '{line}'")]
    StringDecode { value: String, line: String },

    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tag value attached to a match result.
///
/// Tags start out as `{name}` (boolean) or `{name:value}` spans in a
/// signature line's format field. Values that render to something integral
/// are coerced to `Int`; everything else stays in its original form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl TagValue {
    /// Truthiness in the signature-file sense: zero, false and the empty
    /// string all count as unset.
    pub fn truthy(&self) -> bool {
        match self {
            TagValue::Bool(b) => *b,
            TagValue::Int(v) => *v != 0,
            TagValue::Str(s) => !s.is_empty(),
        }
    }

    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Bool(b) => Some(i64::from(*b)),
            TagValue::Int(v) => Some(*v),
            TagValue::Str(_) => None,
        }
    }
}

// --- Internal types ---------------------------------------------------------

/// Field type of a signature line, a small closed set.
///
/// `Date` reads like a 4-byte integer and is only treated specially when the
/// matched value is rendered into the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Byte,
    Short,
    Long,
    Quad,
    String,
    Date,
}

impl FieldKind {
    /// Fixed read width in bytes. Strings derive their size from the expected
    /// value (or a default window) instead.
    pub(crate) fn byte_size(self) -> usize {
        match self {
            FieldKind::Byte => 1,
            FieldKind::Short => 2,
            FieldKind::Long | FieldKind::Date => 4,
            FieldKind::Quad => 8,
            FieldKind::String => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endian {
    Little,
    Big,
}

/// Comparison condition applied between the datum and the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CondOp {
    Equal,
    NotEqual,
    Greater,
    Less,
    BitAnd,
    BitOr,
}

/// Numeric transform operator applied to a datum before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    And,
    Or,
    Mul,
    Add,
    Sub,
    Div,
}

impl ArithOp {
    /// Apply with two's-complement wrapping. Division by zero is `None`,
    /// which the evaluator treats as a line non-match.
    pub(crate) fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        Some(match self {
            ArithOp::And => lhs & rhs,
            ArithOp::Or => lhs | rhs,
            ArithOp::Mul => lhs.wrapping_mul(rhs),
            ArithOp::Add => lhs.wrapping_add(rhs),
            ArithOp::Sub => lhs.wrapping_sub(rhs),
            ArithOp::Div => {
                if rhs == 0 {
                    return None;
                }
                lhs.wrapping_div(rhs)
            }
        })
    }
}

/// An offset or operand: either resolved at parse time or deferred until the
/// buffer is available (e.g. `(4.l+16)`).
#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Immediate(i64),
    Deferred(Expr),
}

/// Expected value of a signature line. `Any` is the `x` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expected {
    Any,
    Int(i64),
    Bytes(Vec<u8>),
}

/// A `{name}` / `{name:value}` keyword parsed out of a format field.
#[derive(Debug, Clone)]
pub(crate) struct SignatureTag {
    pub name: String,
    pub value: TagValue,
}

/// One parsed line of a signature file.
///
/// Field type, size, endianness and sign are fixed here; the offset and
/// operator operand may remain deferred expressions until scan time.
#[derive(Debug, Clone)]
pub(crate) struct SignatureLine {
    /// The source line, kept verbatim for error reporting.
    pub text: String,
    /// Indentation depth: the number of leading `>` markers.
    pub level: usize,
    pub offset: Operand,
    pub kind: FieldKind,
    pub signed: bool,
    pub endian: Endian,
    pub operator: Option<(ArithOp, Operand)>,
    pub condition: CondOp,
    pub expected: Expected,
    /// Printable format template, tags stripped.
    pub format: String,
    pub tags: Vec<SignatureTag>,
    /// Number of bytes this line reads from the buffer.
    pub size: usize,
}

/// A complete signature: one level-0 line plus its indented children.
pub(crate) struct Signature {
    pub id: usize,
    pub lines: Vec<SignatureLine>,
    /// The first line's format template, used for include/exclude filtering.
    pub title: String,
    /// The first line's offset, used to bias prescreen hit positions.
    pub offset: i64,
    /// First line's byte size; larger magic wins when offsets collide.
    pub confidence: usize,
    /// Precompiled literal searcher for the first line's byte pattern.
    pub finder: Finder<'static>,
}

impl Signature {
    /// Build a signature from its first line. Fails if the line cannot be
    /// prescreened: a wildcard value or an expression offset on a top-level
    /// line leaves no literal byte pattern to search for.
    pub(crate) fn new(id: usize, first: SignatureLine) -> Result<Self, MagicError> {
        let offset = match &first.offset {
            Operand::Immediate(value) => *value,
            Operand::Deferred(_) => {
                return Err(MagicError::InvalidLine { line: first.text.clone() });
            }
        };
        let pattern = engine::literal_pattern(&first)
            .ok_or_else(|| MagicError::InvalidLine { line: first.text.clone() })?;

        Ok(Signature {
            id,
            offset,
            title: first.format.clone(),
            confidence: first.size,
            finder: Finder::new(&pattern).into_owned(),
            lines: vec![first],
        })
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("offset", &self.offset)
            .field("confidence", &self.confidence)
            .field("lines", &self.lines.len())
            .finish()
    }
}
