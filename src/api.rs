use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::engine::{self, RawMatch, TitleFilter};
use crate::{MagicError, Signature, TagValue};

/// Scanner for loading signature files and matching blocks of arbitrary
/// data against them.
///
/// Signatures are immutable once loaded; `scan` borrows the buffer read-only
/// and runs to completion, so a `Magic` instance can be reused across any
/// number of buffers.
///
/// # Example
/// ```
/// use sigscan::Magic;
///
/// let mut magic = Magic::new(&[], &[], false).unwrap();
/// magic.parse([r"0 string \x1f\x8b\x08 gzip compressed data"]).unwrap();
///
/// let results = magic.scan(&[0x1F, 0x8B, 0x08, 0x00, 0x00]);
/// assert_eq!(results[0].offset, 0);
/// assert_eq!(results[0].description, "gzip compressed data");
/// ```
#[derive(Debug)]
pub struct Magic {
    signatures: Vec<Signature>,
    filter: TitleFilter,
    show_invalid: bool,
}

impl Magic {
    /// Create a scanner.
    ///
    /// `include` and `exclude` are regex lists applied to lowercased rule
    /// titles at load time; a non-empty include list is exclusive. With
    /// `show_invalid` set, results flagged invalid are retained instead of
    /// being dropped.
    pub fn new(include: &[&str], exclude: &[&str], show_invalid: bool) -> Result<Self, MagicError> {
        Ok(Magic {
            signatures: Vec::new(),
            filter: TitleFilter::new(include, exclude)?,
            show_invalid,
        })
    }

    /// Load signatures from a file. May be called repeatedly; new rules are
    /// appended to the already-loaded set.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), MagicError> {
        let text = fs::read_to_string(path)?;
        self.parse(text.lines())
    }

    /// Parse signature lines from memory.
    ///
    /// `#` starts a comment that runs to end of line; blank lines are
    /// ignored. A malformed line aborts parsing and surfaces the offending
    /// line in the error.
    pub fn parse<I, S>(&mut self, lines: I) -> Result<(), MagicError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current: Option<Signature> = None;

        for raw in lines {
            let line = raw.as_ref().split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let parsed = engine::parse_line(line)?;
            if parsed.level == 0 {
                self.finish(current.take());
                // Surviving-signature count doubles as the next stable id.
                current = Some(Signature::new(self.signatures.len(), parsed)?);
            } else if let Some(signature) = current.as_mut() {
                signature.lines.push(parsed);
            } else {
                // An indented line with no top-level line to attach to.
                return Err(MagicError::InvalidLine { line: line.to_string() });
            }
        }
        self.finish(current.take());

        // Largest magic first, ties in insertion order.
        self.signatures.sort_by(|a, b| b.confidence.cmp(&a.confidence));

        if std::env::var_os("SIGSCAN_DEBUG_RULES").is_some() {
            eprintln!("[parse] {} signatures loaded", self.signatures.len());
        }
        Ok(())
    }

    fn finish(&mut self, signature: Option<Signature>) {
        if let Some(signature) = signature {
            if !self.filter.filtered(&signature.title) {
                self.signatures.push(signature);
            }
        }
    }

    /// Scan a data block for matching signatures, returning results sorted
    /// by buffer offset.
    pub fn scan(&self, data: &[u8]) -> Vec<SignatureResult> {
        self.scan_up_to(data, data.len())
    }

    /// Like [`scan`](Magic::scan), but candidates at offsets larger than
    /// `dlen` are ignored.
    pub fn scan_up_to(&self, data: &[u8], dlen: usize) -> Vec<SignatureResult> {
        engine::run(&self.signatures, data, dlen, self.show_invalid)
            .into_iter()
            .map(SignatureResult::from_raw)
            .collect()
    }
}

/// One signature match.
///
/// Well-known tags are lifted into typed fields; any other tags a rule
/// defines are preserved verbatim in [`extra`](SignatureResult::extra).
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureResult {
    /// Stable id of the matching rule.
    pub id: usize,
    /// Buffer offset the rule matched at.
    pub offset: usize,
    /// Rendered description text.
    pub description: String,
    /// Total size of the matched payload, when the rule can tell.
    pub size: i64,
    /// Scan-resume hint for the caller.
    pub jump: i64,
    /// Name recorded by a `{name:...}` tag.
    pub name: Option<String>,
    /// String length recorded by a `{strlen:...}` tag.
    pub strlen: i64,
    /// The rule expects multiple occurrences.
    pub many: bool,
    /// A `{string}` tag fired during evaluation.
    pub string: bool,
    /// The match was flagged invalid by its rule or by post-processing.
    pub invalid: bool,
    /// The matched payload is worth extracting.
    pub extract: bool,
    /// The inverse of `invalid`.
    pub valid: bool,
    /// Whether the result should be displayed.
    pub display: bool,
    /// Tags with no dedicated field, kept as parsed.
    pub extra: BTreeMap<String, TagValue>,
}

impl SignatureResult {
    fn from_raw(raw: RawMatch) -> Self {
        let mut result = SignatureResult {
            id: raw.id,
            offset: raw.offset,
            description: raw.description,
            size: 0,
            jump: 0,
            name: None,
            strlen: 0,
            many: false,
            string: false,
            invalid: false,
            extract: true,
            valid: true,
            display: true,
            extra: BTreeMap::new(),
        };

        for (name, value) in raw.tags {
            let consumed = match name.as_str() {
                "size" => assign_int(&mut result.size, &value),
                "jump" => assign_int(&mut result.jump, &value),
                "strlen" => assign_int(&mut result.strlen, &value),
                "name" => {
                    if let TagValue::Str(text) = &value {
                        result.name = Some(text.clone());
                        true
                    } else {
                        false
                    }
                }
                "many" => {
                    result.many = value.truthy();
                    true
                }
                "string" => {
                    result.string = value.truthy();
                    true
                }
                "invalid" => {
                    result.invalid = value.truthy();
                    true
                }
                "extract" => {
                    result.extract = value.truthy();
                    true
                }
                "display" => {
                    result.display = value.truthy();
                    true
                }
                _ => false,
            };
            if !consumed {
                result.extra.insert(name, value);
            }
        }

        result.valid = !result.invalid;
        result
    }
}

fn assign_int(slot: &mut i64, value: &TagValue) -> bool {
    match value.as_int() {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}
