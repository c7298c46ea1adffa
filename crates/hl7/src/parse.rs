//! Reading ER7 text back into segments.
//!
//! This is an inspection aid for operators and tests, not a general HL7 parser: it assumes
//! the standard `|^~\&` delimiters this crate emits.

use crate::encoding::unescape;
use crate::{Hl7Error, Hl7Result};

/// One segment, split into raw (still escaped) fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    id: String,
    raw: Vec<String>,
}

impl Segment {
    /// Segment identifier, e.g. `PID`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns field `n` using HL7 numbering, still escaped. Missing fields are empty.
    ///
    /// For `MSH`, field 1 is the field separator itself and field 2 the encoding characters.
    pub fn field(&self, n: usize) -> &str {
        if self.id == "MSH" {
            return match n {
                0 => &self.id,
                1 => "|",
                n => self.raw.get(n - 1).map(String::as_str).unwrap_or(""),
            };
        }
        self.raw.get(n).map(String::as_str).unwrap_or("")
    }

    /// Returns field `n` with escape sequences decoded.
    pub fn value(&self, n: usize) -> String {
        unescape(self.field(n))
    }
}

/// A message split into segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedMessage {
    segments: Vec<Segment>,
}

impl ParsedMessage {
    /// Splits `text` on segment terminators (`\r`, tolerating `\n`).
    ///
    /// # Errors
    ///
    /// Returns [`Hl7Error::Parse`] if the first segment is not `MSH` or a segment id is not
    /// three uppercase alphanumerics.
    pub fn parse(text: &str) -> Hl7Result<Self> {
        let mut segments = Vec::new();

        for (idx, line) in text
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .enumerate()
        {
            let raw: Vec<String> = line.split('|').map(str::to_owned).collect();
            let id = raw[0].clone();

            if id.len() != 3
                || !id
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
            {
                return Err(Hl7Error::Parse(format!(
                    "segment {} has invalid id '{}'",
                    idx + 1,
                    id
                )));
            }
            if idx == 0 && id != "MSH" {
                return Err(Hl7Error::Parse(format!(
                    "message must start with MSH, found '{id}'"
                )));
            }

            segments.push(Segment { id, raw });
        }

        if segments.is_empty() {
            return Err(Hl7Error::Parse("message is empty".into()));
        }

        Ok(Self { segments })
    }

    /// The `MSH` header segment.
    pub fn header(&self) -> &Segment {
        &self.segments[0]
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segments with the given id, in message order.
    pub fn segments_with_id<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.id == id)
    }

    /// Number of segments with the given id.
    pub fn count(&self, id: &str) -> usize {
        self.segments_with_id(id).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MSH|^~\\&|NHS01|North Hill|HIE_GATEWAY|REGIONAL_HIE|20261019093000+0000||ADT^A08^ADT_A01|2026101909300000000001a3f09c1|T|2.5.1\rPID|1||S-1042^^^NHS01^MR||Okafor^Ada\rPV1|1|O\rNTE|1|L|Knee \\T\\ ankle|CC^Chief complaint^L\r";

    #[test]
    fn splits_segments_and_numbers_msh_fields() {
        let parsed = ParsedMessage::parse(SAMPLE).expect("parse");

        assert_eq!(parsed.segments().len(), 4);
        let msh = parsed.header();
        assert_eq!(msh.field(1), "|");
        assert_eq!(msh.field(2), "^~\\&");
        assert_eq!(msh.field(3), "NHS01");
        assert_eq!(msh.field(10), "2026101909300000000001a3f09c1");
        assert_eq!(msh.field(40), "");
    }

    #[test]
    fn decodes_escaped_values() {
        let parsed = ParsedMessage::parse(SAMPLE).expect("parse");
        let nte = parsed.segments_with_id("NTE").next().expect("NTE");

        assert_eq!(nte.field(3), "Knee \\T\\ ankle");
        assert_eq!(nte.value(3), "Knee & ankle");
    }

    #[test]
    fn tolerates_newline_terminators() {
        let parsed = ParsedMessage::parse(&SAMPLE.replace('\r', "\r\n")).expect("parse");
        assert_eq!(parsed.segments().len(), 4);
        assert_eq!(parsed.count("PID"), 1);
    }

    #[test]
    fn rejects_messages_without_header() {
        let err = ParsedMessage::parse("PID|1\rPV1|1\r").expect_err("no MSH");
        assert!(matches!(err, Hl7Error::Parse(msg) if msg.contains("must start with MSH")));

        assert!(ParsedMessage::parse("").is_err());
        assert!(ParsedMessage::parse("MSH|^~\\&\rpid|1").is_err());
    }
}
