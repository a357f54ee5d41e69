//! Signature line parsing.
//!
//! A rule line has four whitespace-separated fields:
//!
//! ```text
//! <INDENT><OFFSET> <TYPE>[&|*+-/<OPERAND>] <COND><VALUE> <FORMAT>
//! ```
//!
//! Backslash-escaped spaces are rewritten to `\x20` before splitting so that
//! string literals stay atomic; the string decoder turns them back into
//! spaces. Offsets and operands that fail to parse as plain integers are
//! compiled into deferred expressions (see `expr.rs`); anything else that is
//! malformed surfaces as a [`MagicError`] quoting the line verbatim.

use super::expr::{Expr, parse_int};
use crate::{
    ArithOp, CondOp, Endian, Expected, FieldKind, MagicError, Operand, SignatureLine, SignatureTag,
    TagValue,
};

/// Parse one non-blank, comment-stripped signature line.
pub(crate) fn parse_line(line: &str) -> Result<SignatureLine, MagicError> {
    let cooked = line.replace("\\ ", "\\x20");
    let parts = split_fields(&cooked, 4);
    if parts.len() < 3 {
        return Err(invalid(line));
    }

    // Field 1: indentation level and offset.
    let level = parts[0].matches('>').count();
    let offset_text = parts[0].replace('>', "");
    let offset = parse_operand(&offset_text).ok_or_else(|| invalid(line))?;

    // Field 2: type token, optionally carrying a transform operator.
    let (type_text, operator) = split_operator(parts[1], line)?;
    let (signed, type_text) = match type_text.strip_prefix('u') {
        Some(rest) => (false, rest),
        None => (true, type_text),
    };
    let (endian, type_text) = if let Some(rest) = type_text.strip_prefix("be") {
        (Endian::Big, rest)
    } else if let Some(rest) = type_text.strip_prefix("le") {
        (Endian::Little, rest)
    } else {
        (Endian::Little, type_text)
    };
    let kind = match type_text {
        "byte" => FieldKind::Byte,
        "short" => FieldKind::Short,
        "long" => FieldKind::Long,
        "quad" => FieldKind::Quad,
        "string" => FieldKind::String,
        "date" => FieldKind::Date,
        _ => return Err(invalid(line)),
    };

    // Field 3: condition and expected value.
    let (condition, value_text) = split_condition(parts[2]);
    let expected = if value_text == "x" {
        Expected::Any
    } else if kind == FieldKind::String {
        let decoded = decode_escapes(value_text).ok_or_else(|| MagicError::StringDecode {
            value: value_text.to_string(),
            line: line.to_string(),
        })?;
        Expected::Bytes(decoded)
    } else {
        Expected::Int(parse_int(value_text).ok_or_else(|| invalid(line))?)
    };

    let size = match (kind, &expected) {
        (FieldKind::String, Expected::Bytes(bytes)) => bytes.len(),
        // Wildcard strings read a bounded window instead.
        (FieldKind::String, _) => 128,
        _ => kind.byte_size(),
    };

    // Field 4: printable format template and embedded tags.
    let (format, tags) = match parts.get(3) {
        Some(raw) => parse_format(raw),
        None => (String::new(), Vec::new()),
    };

    Ok(SignatureLine {
        text: line.to_string(),
        level,
        offset,
        kind,
        signed,
        endian,
        operator,
        condition,
        expected,
        format,
        tags,
        size,
    })
}

/// Split on runs of whitespace into at most `max` fields; the final field
/// keeps its internal whitespace.
fn split_fields(text: &str, max: usize) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if fields.len() + 1 == max {
            fields.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                fields.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                fields.push(rest);
                break;
            }
        }
    }
    fields
}

fn parse_operand(text: &str) -> Option<Operand> {
    if let Some(value) = parse_int(text) {
        return Some(Operand::Immediate(value));
    }
    Expr::parse(text).map(Operand::Deferred)
}

/// Probe the operator set in fixed order and split the type token on the
/// first operator present.
fn split_operator<'a>(
    field: &'a str,
    line: &str,
) -> Result<(&'a str, Option<(ArithOp, Operand)>), MagicError> {
    const OPERATORS: [(char, ArithOp); 6] = [
        ('&', ArithOp::And),
        ('|', ArithOp::Or),
        ('*', ArithOp::Mul),
        ('+', ArithOp::Add),
        ('-', ArithOp::Sub),
        ('/', ArithOp::Div),
    ];
    for (symbol, op) in OPERATORS {
        if let Some((base, operand_text)) = field.split_once(symbol) {
            let operand = parse_operand(operand_text).ok_or_else(|| invalid(line))?;
            return Ok((base, Some((op, operand))));
        }
    }
    Ok((field, None))
}

fn split_condition(field: &str) -> (CondOp, &str) {
    let mut chars = field.chars();
    let condition = match chars.next() {
        Some('=') => CondOp::Equal,
        Some('!') => CondOp::NotEqual,
        Some('>') => CondOp::Greater,
        Some('<') => CondOp::Less,
        Some('&') => CondOp::BitAnd,
        Some('|') => CondOp::BitOr,
        _ => return (CondOp::Equal, field),
    };
    (condition, chars.as_str())
}

/// Extract `{name}` / `{name:value}` tags from a format field and strip them
/// from the printable template. `%ll` directives are normalized to `%l`.
fn parse_format(raw: &str) -> (String, Vec<SignatureTag>) {
    let raw = raw.replace("%ll", "%l");
    let retag = regex!(r"\{.*?\}");

    let mut tags = Vec::new();
    for span in retag.find_iter(&raw) {
        let inner = &span.as_str()[1..span.as_str().len() - 1];
        let (name, value) = match inner.split_once(':') {
            Some((name, value)) => (name, TagValue::Str(value.to_string())),
            None => (inner, TagValue::Bool(true)),
        };
        tags.push(SignatureTag { name: name.to_string(), value });
    }

    let format = retag.replace_all(&raw, "").trim().to_string();
    (format, tags)
}

/// Decode C-style escapes into raw bytes. Unrecognized escapes keep the
/// backslash and the following character; truncated `\x` sequences and a
/// trailing backslash are malformed.
fn decode_escapes(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let &escape = bytes.get(i + 1)?;
        i += 2;
        match escape {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'v' => out.push(0x0B),
            b'f' => out.push(0x0C),
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'x' => {
                let digits = bytes.get(i..i + 2)?;
                let high = hex_value(digits[0])?;
                let low = hex_value(digits[1])?;
                out.push((high << 4) | low);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                let mut taken = 1;
                while taken < 3 {
                    match bytes.get(i) {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            i += 1;
                            taken += 1;
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

fn invalid(line: &str) -> MagicError {
    MagicError::InvalidLine { line: line.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gzip_rule() {
        let line = parse_line(r"0 string \x1f\x8b\x08 gzip compressed data").unwrap();
        assert_eq!(line.level, 0);
        assert!(matches!(line.offset, Operand::Immediate(0)));
        assert_eq!(line.kind, FieldKind::String);
        assert_eq!(line.expected, Expected::Bytes(vec![0x1F, 0x8B, 0x08]));
        assert_eq!(line.size, 3);
        assert_eq!(line.condition, CondOp::Equal);
        assert_eq!(line.format, "gzip compressed data");
        assert!(line.tags.is_empty());
    }

    #[test]
    fn counts_indentation_markers() {
        let line = parse_line(">>0x10 byte 1 nested").unwrap();
        assert_eq!(line.level, 2);
        assert!(matches!(line.offset, Operand::Immediate(0x10)));
    }

    #[test]
    fn expression_offsets_stay_deferred() {
        let line = parse_line(">(4.l+16) byte 0xAB pointed-to marker").unwrap();
        assert!(matches!(line.offset, Operand::Deferred(_)));
    }

    #[test]
    fn sign_and_endianness_prefixes() {
        let line = parse_line("0 ubelong 0x89504E47 PNG image").unwrap();
        assert!(!line.signed);
        assert_eq!(line.endian, Endian::Big);
        assert_eq!(line.kind, FieldKind::Long);
        assert_eq!(line.size, 4);

        let line = parse_line("0 leshort 0x5A4D DOS executable").unwrap();
        assert!(line.signed);
        assert_eq!(line.endian, Endian::Little);
        assert_eq!(line.kind, FieldKind::Short);
    }

    #[test]
    fn operator_splits_the_type_token() {
        let line = parse_line("0 belong&0x0000FFFF 0x1234 masked").unwrap();
        assert_eq!(line.kind, FieldKind::Long);
        let Some((ArithOp::And, Operand::Immediate(0xFFFF))) = line.operator else {
            panic!("expected '&' operator with immediate operand");
        };
    }

    #[test]
    fn conditions_and_wildcards() {
        let line = parse_line(">4 byte !0 nonzero").unwrap();
        assert_eq!(line.condition, CondOp::NotEqual);
        assert_eq!(line.expected, Expected::Int(0));

        let line = parse_line(">4 belong x size %d").unwrap();
        assert_eq!(line.condition, CondOp::Equal);
        assert_eq!(line.expected, Expected::Any);

        let line = parse_line(">8 short >512 big enough").unwrap();
        assert_eq!(line.condition, CondOp::Greater);
        assert_eq!(line.expected, Expected::Int(512));
    }

    #[test]
    fn escaped_spaces_stay_atomic() {
        let line = parse_line(r"0 string on\ disk filesystem image").unwrap();
        assert_eq!(line.expected, Expected::Bytes(b"on disk".to_vec()));
        assert_eq!(line.format, "filesystem image");
    }

    #[test]
    fn tags_are_extracted_and_stripped() {
        let line = parse_line(r">4 belong x size %d {size:%d}{extract}").unwrap();
        assert_eq!(line.format, "size %d");
        assert_eq!(line.tags.len(), 2);
        assert_eq!(line.tags[0].name, "size");
        assert_eq!(line.tags[0].value, TagValue::Str("%d".to_string()));
        assert_eq!(line.tags[1].name, "extract");
        assert_eq!(line.tags[1].value, TagValue::Bool(true));
    }

    #[test]
    fn wildcard_string_window_defaults_to_128() {
        let line = parse_line(">0 string x name: %s").unwrap();
        assert_eq!(line.size, 128);
    }

    #[test]
    fn octal_and_standard_escapes_decode() {
        let line = parse_line(r"0 string \101\x42C\n mixed").unwrap();
        assert_eq!(line.expected, Expected::Bytes(b"ABC\n".to_vec()));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(matches!(parse_line("0 string"), Err(MagicError::InvalidLine { .. })));
        assert!(matches!(parse_line("0 float 1.0 nope"), Err(MagicError::InvalidLine { .. })));
        assert!(matches!(parse_line("0 byte notanumber desc"), Err(MagicError::InvalidLine { .. })));
        assert!(matches!(
            parse_line(r"0 string \x1 truncated escape"),
            Err(MagicError::StringDecode { .. })
        ));
    }

    #[test]
    fn double_l_directives_normalize() {
        let line = parse_line("0 quad 1 value %lld").unwrap();
        assert_eq!(line.format, "value %ld");
    }
}
