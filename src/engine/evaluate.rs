//! Rule evaluation.
//!
//! Given a signature and one candidate offset, walk the signature's lines in
//! order and build up a description plus a tag map. Indentation drives the
//! control flow: a line that fails closes off everything nested deeper than
//! it, while its siblings stay eligible. A failed top-level line aborts the
//! whole rule.
//!
//! Reads never fail: running past the buffer yields 0 for integers and a
//! short byte string for strings, which then simply compares unequal.

use std::collections::BTreeMap;

use super::expr::parse_int;
use super::render::{self, Datum};
use crate::{CondOp, Endian, Expected, FieldKind, Operand, Signature, SignatureLine, TagValue};

/// Raw outcome of evaluating one signature at one offset, before conversion
/// into the public result record.
#[derive(Debug, Clone)]
pub(crate) struct RawMatch {
    pub id: usize,
    pub offset: usize,
    pub description: String,
    pub tags: BTreeMap<String, TagValue>,
}

impl RawMatch {
    pub(crate) fn invalid(&self) -> bool {
        self.tags.get("invalid").is_some_and(TagValue::truthy)
    }
}

/// Evaluates signatures against a shared read-only buffer.
pub(crate) struct Evaluator<'a> {
    pub data: &'a [u8],
    pub show_invalid: bool,
}

impl Evaluator<'_> {
    /// Walk `signature`'s lines at `offset` and collect the rendered
    /// description and tags.
    pub(crate) fn analyze(&self, signature: &Signature, offset: usize) -> RawMatch {
        let mut description: Vec<String> = Vec::new();
        let mut tags: BTreeMap<String, TagValue> = BTreeMap::new();
        tags.insert("invalid".to_string(), TagValue::Bool(false));
        let mut max_level = 0usize;

        for line in &signature.lines {
            // A failed sibling disqualifies everything nested deeper.
            if line.level > max_level {
                continue;
            }

            match self.eval_line(line, offset, &tags) {
                None => {
                    if line.level == 0 {
                        break;
                    }
                    max_level = line.level;
                }
                Some(datum) => {
                    let datum =
                        if line.kind == FieldKind::Date { promote_date(datum) } else { datum };

                    let fragment = if line.format.contains('%') {
                        render::render(&line.format, &datum).unwrap_or_else(|| line.format.clone())
                    } else {
                        line.format.clone()
                    };
                    if !fragment.is_empty() {
                        description.push(fragment);
                    }

                    for tag in &line.tags {
                        tags.insert(tag.name.clone(), resolve_tag(&tag.value, &datum));
                    }

                    // The earlier a rule raises the invalid flag, the less
                    // work a false positive costs.
                    if !self.show_invalid && tags.get("invalid").is_some_and(TagValue::truthy) {
                        break;
                    }

                    max_level = line.level + 1;
                }
            }
        }

        let description = strip_backspaces(&description.join(" "));
        if description.is_empty() {
            tags.insert("display".to_string(), TagValue::Bool(false));
            tags.insert("invalid".to_string(), TagValue::Bool(true));
        }
        if description.bytes().any(|b| !(0x20..=0x7E).contains(&b)) {
            tags.insert("invalid".to_string(), TagValue::Bool(true));
        }

        RawMatch { id: signature.id, offset, description, tags }
    }

    /// Evaluate a single line. `Some(datum)` carries the transformed datum on
    /// a match; `None` is a non-match (including unresolvable offsets and
    /// division by zero).
    fn eval_line(
        &self,
        line: &SignatureLine,
        offset: usize,
        tags: &BTreeMap<String, TagValue>,
    ) -> Option<Datum> {
        let base = offset as i64;
        let line_offset = match &line.offset {
            Operand::Immediate(value) => *value,
            Operand::Deferred(expr) => expr.eval(self.data, base)?,
        };
        let start = base.wrapping_add(line_offset);

        let mut datum = self.read_datum(line, start, tags);

        if let (Some((op, operand)), Datum::Int(value)) = (&line.operator, &datum) {
            let value = *value;
            let opval = match operand {
                Operand::Immediate(imm) => *imm,
                Operand::Deferred(expr) => expr.eval(self.data, base)?,
            };
            datum = Datum::Int(op.apply(value, opval)?);
        }

        compare(line.condition, &datum, &line.expected).then_some(datum)
    }

    fn read_datum(
        &self,
        line: &SignatureLine,
        start: i64,
        tags: &BTreeMap<String, TagValue>,
    ) -> Datum {
        if line.kind == FieldKind::String {
            let bytes = match &line.expected {
                Expected::Bytes(_) => self.slice(start, line.size).to_vec(),
                _ => {
                    // A wildcard string tagged {string} uses the length a
                    // previous line recorded under {strlen:...}.
                    let sized = line.tags.iter().any(|tag| tag.name == "string");
                    match tags.get("strlen") {
                        Some(TagValue::Int(n)) if sized => {
                            self.slice(start, usize::try_from(*n).unwrap_or(0)).to_vec()
                        }
                        _ => {
                            // NUL or CR terminates; LF deliberately does not.
                            let window = self.slice(start, line.size);
                            let end = window
                                .iter()
                                .position(|&b| b == 0 || b == b'\r')
                                .unwrap_or(window.len());
                            window[..end].to_vec()
                        }
                    }
                }
            };
            return Datum::Bytes(bytes);
        }

        let bytes = self.slice(start, line.size);
        if bytes.len() < line.size {
            return Datum::Int(0);
        }
        Datum::Int(decode_int(bytes, line))
    }

    fn slice(&self, start: i64, len: usize) -> &[u8] {
        let Ok(start) = usize::try_from(start) else {
            return &[];
        };
        if start >= self.data.len() {
            return &[];
        }
        let end = start.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }
}

/// Interpret exactly `line.size` bytes with the line's endianness and sign.
fn decode_int(bytes: &[u8], line: &SignatureLine) -> i64 {
    let mut raw = [0u8; 8];
    match line.endian {
        Endian::Little => raw[..line.size].copy_from_slice(bytes),
        Endian::Big => raw[8 - line.size..].copy_from_slice(bytes),
    }
    let unsigned = match line.endian {
        Endian::Little => u64::from_le_bytes(raw),
        Endian::Big => u64::from_be_bytes(raw),
    };
    if line.signed && line.size < 8 {
        let shift = 64 - line.size * 8;
        ((unsigned << shift) as i64) >> shift
    } else {
        unsigned as i64
    }
}

fn compare(condition: CondOp, datum: &Datum, expected: &Expected) -> bool {
    match (datum, expected) {
        (_, Expected::Any) => true,
        (Datum::Int(datum), Expected::Int(expected)) => match condition {
            CondOp::Equal => datum == expected,
            CondOp::NotEqual => datum != expected,
            CondOp::Greater => datum > expected,
            CondOp::Less => datum < expected,
            CondOp::BitAnd => (datum & expected) != 0,
            CondOp::BitOr => (datum | expected) != 0,
        },
        (Datum::Bytes(datum), Expected::Bytes(expected)) => match condition {
            CondOp::Equal => datum == expected,
            CondOp::NotEqual => datum != expected,
            CondOp::Greater => datum.as_slice() > expected.as_slice(),
            CondOp::Less => datum.as_slice() < expected.as_slice(),
            // Bit tests are meaningless on strings.
            CondOp::BitAnd | CondOp::BitOr => false,
        },
        _ => false,
    }
}

/// Matched date fields display as formatted timestamps, not raw integers.
fn promote_date(datum: Datum) -> Datum {
    match datum {
        Datum::Int(secs) => match render::format_timestamp(secs) {
            Some(stamp) => Datum::Bytes(stamp.into_bytes()),
            None => Datum::Int(secs),
        },
        other => other,
    }
}

/// Resolve a line tag against the matched datum: render `%` templates, then
/// coerce integral results. Anything that will not coerce stays a string.
fn resolve_tag(value: &TagValue, datum: &Datum) -> TagValue {
    match value {
        TagValue::Str(template) if template.contains('%') => {
            let rendered =
                render::render(template, datum).unwrap_or_else(|| template.clone());
            match parse_int(&rendered) {
                Some(v) => TagValue::Int(v),
                None => TagValue::Str(rendered),
            }
        }
        TagValue::Str(text) => match parse_int(text) {
            Some(v) => TagValue::Int(v),
            None => TagValue::Str(text.clone()),
        },
        other => other.clone(),
    }
}

/// Delete every character immediately followed by a literal `\b` sequence,
/// along with the `\b` itself.
fn strip_backspaces(text: &str) -> String {
    regex!(r".\\b").replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signature;
    use crate::engine::parse_line;

    fn signature(lines: &[&str]) -> Signature {
        let mut iter = lines.iter();
        let mut sig = Signature::new(0, parse_line(iter.next().unwrap()).unwrap()).unwrap();
        for line in iter {
            sig.lines.push(parse_line(line).unwrap());
        }
        sig
    }

    fn analyze(lines: &[&str], data: &[u8], show_invalid: bool) -> RawMatch {
        let sig = signature(lines);
        Evaluator { data, show_invalid }.analyze(&sig, 0)
    }

    #[test]
    fn failed_sibling_keeps_later_siblings_eligible() {
        let raw = analyze(
            &["0 string AB base", ">2 byte 9 one", ">>3 byte 3 deep", ">2 byte 2 two"],
            b"AB\x02\x03",
            false,
        );
        // "one" fails, so "deep" is skipped; the level-1 sibling still runs.
        assert_eq!(raw.description, "base two");
        assert!(!raw.invalid());
    }

    #[test]
    fn matching_lines_descend_into_children() {
        let raw = analyze(
            &["0 string AB base", ">2 byte 2 two", ">>3 byte 3 three"],
            b"AB\x02\x03",
            false,
        );
        assert_eq!(raw.description, "base two three");
    }

    #[test]
    fn failed_top_level_line_aborts() {
        let raw = analyze(&["0 byte 0x7F elf", ">1 byte x more %d"], b"\x00\x01", false);
        assert_eq!(raw.description, "");
        assert!(raw.invalid());
        assert_eq!(raw.tags.get("display"), Some(&TagValue::Bool(false)));
    }

    #[test]
    fn strlen_tag_sizes_a_wildcard_string() {
        let raw = analyze(
            &["0 string HDR header", ">3 byte x {strlen:%d}", ">4 string x name %s {string}"],
            b"HDR\x03abcXYZ",
            false,
        );
        assert_eq!(raw.description, "header name abc");
        assert_eq!(raw.tags.get("strlen"), Some(&TagValue::Int(3)));
    }

    #[test]
    fn wildcard_strings_terminate_at_nul_or_cr() {
        let raw = analyze(&["0 string AB id", ">2 string x %s"], b"ABname\x00tail", false);
        assert_eq!(raw.description, "id name");

        let raw = analyze(&["0 string AB id", ">2 string x %s"], b"ABname\rtail", false);
        assert_eq!(raw.description, "id name");

        // LF is not a terminator, and the resulting description is flagged.
        let raw = analyze(&["0 string AB id", ">2 string x %s"], b"ABna\nme\x00", true);
        assert!(raw.invalid());
    }

    #[test]
    fn invalid_tag_aborts_unless_requested() {
        let lines = ["0 string AB base", ">2 byte 0 {invalid}", ">3 byte x trailing %d"];
        let raw = analyze(&lines, b"AB\x00\x07", false);
        assert!(raw.invalid());
        assert_eq!(raw.description, "base");

        let raw = analyze(&lines, b"AB\x00\x07", true);
        assert!(raw.invalid());
        assert_eq!(raw.description, "base trailing 7");
    }

    #[test]
    fn operators_transform_before_comparison() {
        let raw = analyze(&["0 string AB base", ">2 byte&0x0F 2 low nibble"], b"AB\xF2", false);
        assert_eq!(raw.description, "base low nibble");

        let raw = analyze(&["0 string AB base", ">2 byte+1 x plus %d"], b"AB\x09", false);
        assert_eq!(raw.description, "base plus 10");
    }

    #[test]
    fn division_by_zero_is_a_non_match() {
        let raw = analyze(&["0 string AB ok", ">2 byte/0 x never"], b"AB\x05", false);
        assert_eq!(raw.description, "ok");
    }

    #[test]
    fn expression_offsets_follow_pointers() {
        // Byte 3 holds 6; (3.b+2) points at offset 8.
        let raw = analyze(
            &["0 string HDR header", ">(3.b+2) byte 0x41 found"],
            b"HDR\x06\x00\x00\x00\x00A",
            false,
        );
        assert_eq!(raw.description, "header found");
    }

    #[test]
    fn date_fields_render_as_timestamps() {
        let raw = analyze(&["0 string TS stamp", ">2 ledate x %s"], b"TS\x00\x00\x00\x00", false);
        assert_eq!(raw.description, "stamp 1970-01-01 00:00:00");
    }

    #[test]
    fn backspace_sequences_elide_the_previous_character() {
        let raw = analyze(&[r"0 string AB gzipX\bY"], b"AB", false);
        assert_eq!(raw.description, "gzipY");
    }

    #[test]
    fn nonprintable_descriptions_are_flagged() {
        let raw = analyze(&["0 string AB id %s", ">2 string x raw %s"], b"AB\x01!", true);
        assert!(raw.invalid());
    }

    #[test]
    fn render_mismatch_falls_back_to_the_template() {
        let raw = analyze(&["0 string AB v=%d"], b"AB", false);
        assert_eq!(raw.description, "v=%d");
    }

    #[test]
    fn short_numeric_reads_become_zero() {
        let raw = analyze(&["0 string AB base", ">2 belong 0 empty tail"], b"AB", false);
        assert_eq!(raw.description, "base empty tail");
    }
}
