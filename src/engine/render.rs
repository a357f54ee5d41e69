//! Description rendering.
//!
//! Format templates use a minimal printf subset (`%d %x %o %c %s` plus
//! flags, width, precision and `l` length modifiers, and `%%`). Rendering
//! is implemented here rather than handed to any host formatting machinery,
//! since templates come straight out of signature files. A directive that
//! does not fit the datum returns `None` and the evaluator falls back to
//! the verbatim template.

use chrono::{DateTime, Utc};

/// A value read from the buffer: an integer field or raw string bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Datum {
    Int(i64),
    Bytes(Vec<u8>),
}

/// Render `template` against `datum`.
pub(crate) fn render(template: &str, datum: &Datum) -> Option<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut left = false;
        let mut zero = false;
        let mut plus = false;
        let mut space = false;
        let mut alt = false;
        loop {
            match chars.peek() {
                Some('-') => left = true,
                Some('0') => zero = true,
                Some('+') => plus = true,
                Some(' ') => space = true,
                Some('#') => alt = true,
                _ => break,
            }
            chars.next();
        }

        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + digit as usize;
            chars.next();
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut value = 0usize;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                value = value * 10 + digit as usize;
                chars.next();
            }
            precision = Some(value);
        }

        while matches!(chars.peek(), Some('l') | Some('h')) {
            chars.next();
        }

        let conversion = chars.next()?;
        let body = convert(conversion, datum, precision, alt, plus, space)?;
        out.push_str(&pad(body, width, left, zero && !left));
    }

    Some(out)
}

/// Render a numeric datum as a UTC timestamp, `YYYY-MM-DD HH:MM:SS`.
/// `None` if the value is outside the representable range.
pub(crate) fn format_timestamp(secs: i64) -> Option<String> {
    let stamp: DateTime<Utc> = DateTime::from_timestamp(secs, 0)?;
    Some(stamp.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn convert(
    conversion: char,
    datum: &Datum,
    precision: Option<usize>,
    alt: bool,
    plus: bool,
    space: bool,
) -> Option<String> {
    match (conversion, datum) {
        ('d' | 'i' | 'u', Datum::Int(v)) => {
            let digits = zero_fill(v.unsigned_abs().to_string(), precision);
            Some(if *v < 0 {
                format!("-{digits}")
            } else if plus {
                format!("+{digits}")
            } else if space {
                format!(" {digits}")
            } else {
                digits
            })
        }
        ('x', Datum::Int(v)) => Some(radix_form(*v, 16, false, alt, precision)),
        ('X', Datum::Int(v)) => Some(radix_form(*v, 16, true, alt, precision)),
        ('o', Datum::Int(v)) => Some(radix_form(*v, 8, false, alt, precision)),
        ('c', Datum::Int(v)) => {
            let code = u32::try_from(*v).ok()?;
            char::from_u32(code).map(String::from)
        }
        ('c', Datum::Bytes(bytes)) if bytes.len() == 1 => Some((bytes[0] as char).to_string()),
        ('s', Datum::Int(v)) => Some(v.to_string()),
        ('s', Datum::Bytes(bytes)) => {
            let mut text = String::from_utf8_lossy(bytes).into_owned();
            if let Some(limit) = precision {
                text = text.chars().take(limit).collect();
            }
            Some(text)
        }
        _ => None,
    }
}

fn radix_form(value: i64, radix: u32, upper: bool, alt: bool, precision: Option<usize>) -> String {
    let magnitude = value.unsigned_abs();
    let mut digits = match radix {
        16 => format!("{magnitude:x}"),
        _ => format!("{magnitude:o}"),
    };
    if upper {
        digits = digits.to_uppercase();
    }
    digits = zero_fill(digits, precision);
    let prefix = match (alt && magnitude != 0, radix, upper) {
        (true, 16, false) => "0x",
        (true, 16, true) => "0X",
        (true, 8, _) => "0",
        _ => "",
    };
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{prefix}{digits}")
}

fn zero_fill(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) if digits.len() < p => "0".repeat(p - digits.len()) + &digits,
        _ => digits,
    }
}

fn pad(body: String, width: usize, left: bool, zero: bool) -> String {
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let fill = width - len;
    if left {
        return body + &" ".repeat(fill);
    }
    if zero {
        let head = if body.starts_with('-') || body.starts_with('+') || body.starts_with(' ') {
            1
        } else if body.starts_with("0x") || body.starts_with("0X") {
            2
        } else {
            0
        };
        return format!("{}{}{}", &body[..head], "0".repeat(fill), &body[head..]);
    }
    " ".repeat(fill) + &body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_directives() {
        assert_eq!(render("size %d", &Datum::Int(16)).unwrap(), "size 16");
        assert_eq!(render("%5d", &Datum::Int(42)).unwrap(), "   42");
        assert_eq!(render("%-5d|", &Datum::Int(42)).unwrap(), "42   |");
        assert_eq!(render("%05d", &Datum::Int(-42)).unwrap(), "-0042");
        assert_eq!(render("%ld", &Datum::Int(-7)).unwrap(), "-7");
    }

    #[test]
    fn hex_and_octal_directives() {
        assert_eq!(render("%x", &Datum::Int(255)).unwrap(), "ff");
        assert_eq!(render("%08X", &Datum::Int(0xBEEF)).unwrap(), "0000BEEF");
        assert_eq!(render("%#x", &Datum::Int(255)).unwrap(), "0xff");
        assert_eq!(render("%o", &Datum::Int(8)).unwrap(), "10");
        assert_eq!(render("%x", &Datum::Int(-1)).unwrap(), "-1");
    }

    #[test]
    fn string_and_char_directives() {
        assert_eq!(render("name: %s", &Datum::Bytes(b"vmlinux".to_vec())).unwrap(), "name: vmlinux");
        assert_eq!(render("%.3s", &Datum::Bytes(b"abcdef".to_vec())).unwrap(), "abc");
        assert_eq!(render("%s", &Datum::Int(99)).unwrap(), "99");
        assert_eq!(render("%c", &Datum::Int(0x41)).unwrap(), "A");
        assert_eq!(render("%c", &Datum::Bytes(b"Z".to_vec())).unwrap(), "Z");
    }

    #[test]
    fn percent_escape() {
        assert_eq!(render("100%% sure", &Datum::Int(1)).unwrap(), "100% sure");
    }

    #[test]
    fn mismatched_directives_fail() {
        assert_eq!(render("%d", &Datum::Bytes(b"abc".to_vec())), None);
        assert_eq!(render("%q", &Datum::Int(1)), None);
        assert_eq!(render("%c", &Datum::Bytes(b"too long".to_vec())), None);
    }

    #[test]
    fn timestamps_render_as_utc() {
        assert_eq!(format_timestamp(0).unwrap(), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_234_567_890).unwrap(), "2009-02-13 23:31:30");
    }
}
