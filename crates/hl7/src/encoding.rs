//! ER7 delimiter escaping and value formatting.

use crate::{Hl7Error, Hl7Result};
use chrono::{DateTime, NaiveDate, Utc};

pub(crate) const FIELD_SEPARATOR: char = '|';
pub(crate) const COMPONENT_SEPARATOR: char = '^';
pub(crate) const REPETITION_SEPARATOR: char = '~';
pub(crate) const ESCAPE_CHARACTER: char = '\\';
pub(crate) const SUBCOMPONENT_SEPARATOR: char = '&';

/// MSH-2 encoding characters, in the order mandated by the standard.
pub(crate) const ENCODING_CHARACTERS: &str = "^~\\&";

/// Escape a text value for inclusion in a field or component.
///
/// Delimiters are replaced with their escape sequences (`\F\`, `\S\`, `\T\`, `\R\`, `\E\`)
/// and line breaks with hex escapes (`\X0D\`, `\X0A\`). Tabs pass through.
///
/// # Errors
///
/// Returns [`Hl7Error::UnescapableCharacter`] for any other control character; `field`
/// names the offending field in the error.
pub fn escape(field: &'static str, value: &str) -> Hl7Result<String> {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ESCAPE_CHARACTER => out.push_str("\\E\\"),
            FIELD_SEPARATOR => out.push_str("\\F\\"),
            COMPONENT_SEPARATOR => out.push_str("\\S\\"),
            SUBCOMPONENT_SEPARATOR => out.push_str("\\T\\"),
            REPETITION_SEPARATOR => out.push_str("\\R\\"),
            '\r' => out.push_str("\\X0D\\"),
            '\n' => out.push_str("\\X0A\\"),
            '\t' => out.push('\t'),
            c if c.is_control() => {
                return Err(Hl7Error::UnescapableCharacter {
                    field,
                    codepoint: c as u32,
                })
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Reverse [`escape`].
///
/// Unknown escape sequences are kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find(ESCAPE_CHARACTER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find(ESCAPE_CHARACTER) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let sequence = &after[..end];
        match sequence {
            "E" => out.push(ESCAPE_CHARACTER),
            "F" => out.push(FIELD_SEPARATOR),
            "S" => out.push(COMPONENT_SEPARATOR),
            "T" => out.push(SUBCOMPONENT_SEPARATOR),
            "R" => out.push(REPETITION_SEPARATOR),
            "X0D" => out.push('\r'),
            "X0A" => out.push('\n'),
            other => {
                out.push(ESCAPE_CHARACTER);
                out.push_str(other);
                out.push(ESCAPE_CHARACTER);
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Format a timestamp as an HL7 DTM with explicit UTC offset, e.g. `20261019143522+0000`.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y%m%d%H%M%S%z").to_string()
}

/// Format a date as an HL7 DT, e.g. `20120304`.
pub fn format_date(value: NaiveDate) -> String {
    value.format("%Y%m%d").to_string()
}

/// Format a measurement without trailing zeros (`36.8`, `37`).
pub(crate) fn format_number(field: &'static str, value: f64) -> Hl7Result<String> {
    if !value.is_finite() {
        return Err(Hl7Error::NonFiniteValue { field });
    }
    Ok(format!("{value}"))
}
