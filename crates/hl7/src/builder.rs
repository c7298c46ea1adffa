//! Message rendering.
//!
//! Segment layout:
//! - `MSH` header
//! - `PID` patient identity
//! - `PV1` visit context
//! - `NTE` one per recorded free-text visit field
//! - `OBX` one per recorded assessment measurement (observation results only)

use crate::encoding::{escape, format_date, format_timestamp, ENCODING_CHARACTERS};
use crate::observation::{observations, Observation};
use crate::{Hl7Result, MessageEnvelope, MessageType, SEGMENT_TERMINATOR};
use chrono::{DateTime, Utc};
use hie_types::{Assessment, Gender, Institution, Student, Visit};
use hie_uuid::ControlId;

/// Everything needed to render one message.
///
/// Rendering is a pure function of these values: the same input always produces the
/// same text.
#[derive(Clone, Debug)]
pub struct BuildInput<'a> {
    pub student: &'a Student,
    pub visit: &'a Visit,
    pub institution: &'a Institution,
    pub assessment: Option<&'a Assessment>,
    pub envelope: &'a MessageEnvelope,
    pub control_id: &'a ControlId,
    pub generated_at: DateTime<Utc>,
}

/// A rendered ER7 message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message_type: MessageType,
    pub text: String,
}

pub(crate) fn render(input: &BuildInput<'_>) -> Hl7Result<RenderedMessage> {
    let message_type = MessageType::for_visit(input.assessment.is_some());

    let mut segments = vec![
        msh(input, message_type)?,
        pid(input.student, input.institution)?,
        pv1(input.visit, input.institution)?,
    ];
    segments.extend(notes(input.visit)?);

    if let Some(assessment) = input.assessment {
        let observed_at = assessment.recorded_at.unwrap_or(input.visit.started_at);
        for (idx, observation) in observations(assessment)?.iter().enumerate() {
            segments.push(obx(idx + 1, observation, observed_at)?);
        }
    }

    let mut text = String::new();
    for segment in &segments {
        text.push_str(segment);
        text.push(SEGMENT_TERMINATOR);
    }

    Ok(RenderedMessage { message_type, text })
}

/// Joins numbered fields (index 0 is the segment id) and drops trailing empty fields.
fn join_segment(mut fields: Vec<String>) -> String {
    while fields.len() > 1 && fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields.join("|")
}

fn msh(input: &BuildInput<'_>, message_type: MessageType) -> Hl7Result<String> {
    let env = input.envelope;
    let fields = [
        escape("sending_application", env.sending_application.as_str())?,
        escape("sending_facility", env.sending_facility.as_str())?,
        escape("receiving_application", env.receiving_application.as_str())?,
        escape("receiving_facility", env.receiving_facility.as_str())?,
        format_timestamp(input.generated_at),
        String::new(),
        message_type.msh_message_type().to_owned(),
        input.control_id.to_string(),
        env.environment.processing_id().to_owned(),
        escape("version", env.version.as_str())?,
    ];

    Ok(format!("MSH|{ENCODING_CHARACTERS}|{}", fields.join("|")))
}

fn administrative_sex(gender: Gender) -> &'static str {
    match gender {
        Gender::Male => "M",
        Gender::Female => "F",
        Gender::Other => "O",
        Gender::Unknown => "U",
    }
}

fn pid(student: &Student, institution: &Institution) -> Hl7Result<String> {
    let identifier = format!(
        "{}^^^{}^MR",
        escape("student.identifier", student.identifier.as_str())?,
        escape("institution.code", institution.code.as_str())?
    );

    let middle = match student.name.middle.as_deref().map(str::trim) {
        Some(middle) if !middle.is_empty() => escape("student.name.middle", middle)?,
        _ => String::new(),
    };
    let mut name = format!(
        "{}^{}",
        escape("student.name.family", student.name.family.as_str())?,
        escape("student.name.given", student.name.given.as_str())?
    );
    if !middle.is_empty() {
        name.push('^');
        name.push_str(&middle);
    }

    Ok(join_segment(vec![
        "PID".into(),
        "1".into(),
        String::new(),
        identifier,
        String::new(),
        name,
        String::new(),
        format_date(student.birth_date),
        administrative_sex(student.gender).into(),
    ]))
}

fn pv1(visit: &Visit, institution: &Institution) -> Hl7Result<String> {
    let mut fields = vec![String::new(); 46];
    fields[0] = "PV1".into();
    fields[1] = "1".into();
    // Outpatient.
    fields[2] = "O".into();
    fields[3] = format!(
        "{}^^^{}",
        escape("institution.code", institution.code.as_str())?,
        escape("institution.name", institution.name.as_str())?
    );
    fields[4] = escape("visit.visit_type", visit.visit_type.as_str())?;
    fields[19] = visit.id.simple().to_string();
    fields[44] = format_timestamp(visit.started_at);
    if let Some(ended_at) = visit.ended_at {
        fields[45] = format_timestamp(ended_at);
    }

    Ok(join_segment(fields))
}

fn notes(visit: &Visit) -> Hl7Result<Vec<String>> {
    let entries = [
        ("visit.chief_complaint", "CC", "Chief complaint", &visit.chief_complaint),
        ("visit.diagnosis", "DX", "Diagnosis", &visit.diagnosis),
        ("visit.treatment", "TX", "Treatment", &visit.treatment),
        ("visit.notes", "RE", "Remark", &visit.notes),
    ];

    let mut segments = Vec::new();
    for (field, code, label, value) in entries {
        let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        let set_id = segments.len() + 1;
        segments.push(join_segment(vec![
            "NTE".into(),
            set_id.to_string(),
            "L".into(),
            escape(field, value)?,
            format!("{code}^{label}^L"),
        ]));
    }

    Ok(segments)
}

fn obx(set_id: usize, observation: &Observation, observed_at: DateTime<Utc>) -> Hl7Result<String> {
    let mut fields = vec![String::new(); 15];
    fields[0] = "OBX".into();
    fields[1] = set_id.to_string();
    fields[2] = observation.value_type.as_str().into();
    fields[3] = format!(
        "{}^{}^{}",
        observation.code,
        escape(observation.field, observation.display)?,
        observation.system
    );
    fields[5] = escape(observation.field, &observation.value)?;
    if let Some(units) = observation.units {
        fields[6] = format!("{units}^{units}^UCUM");
    }
    // Final result.
    fields[11] = "F".into();
    fields[14] = format_timestamp(observed_at);

    Ok(join_segment(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Environment, Hl7, Hl7Error, Segment};
    use chrono::{NaiveDate, TimeZone};
    use hie_types::{NonEmptyText, PersonName};
    use hie_uuid::ControlIdGenerator;
    use uuid::Uuid;

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    fn student() -> Student {
        Student {
            id: Uuid::new_v4(),
            name: PersonName {
                given: text("Ada"),
                middle: Some("May".into()),
                family: text("Okafor"),
            },
            birth_date: NaiveDate::from_ymd_opt(2012, 3, 4).unwrap(),
            identifier: text("S-1042"),
            gender: Gender::Female,
        }
    }

    fn institution() -> Institution {
        Institution {
            id: Uuid::new_v4(),
            code: text("NHS01"),
            name: text("North Hill School"),
        }
    }

    fn visit(student: &Student, institution: &Institution) -> Visit {
        Visit {
            id: Uuid::parse_str("6f1c2a9e-0b7d-4c1e-9a55-3d2f8e7b6a10").unwrap(),
            student_id: student.id,
            institution_id: institution.id,
            visit_type: text("illness"),
            chief_complaint: Some("Headache | dizzy".into()),
            diagnosis: Some("Tension headache".into()),
            treatment: None,
            notes: Some("   ".into()),
            started_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, 15, 0).unwrap(),
            ended_at: None,
        }
    }

    fn envelope() -> MessageEnvelope {
        MessageEnvelope {
            sending_application: text("NHS01"),
            sending_facility: text("North Hill School"),
            receiving_application: text("HIE_GATEWAY"),
            receiving_facility: text("REGIONAL_HIE"),
            environment: Environment::Test,
            version: text("2.5.1"),
        }
    }

    fn assessment() -> Assessment {
        Assessment {
            temperature_c: Some(38.1),
            heart_rate: Some(96),
            oxygen_saturation: Some(97.0),
            vision_left: Some("20/20".into()),
            ..Default::default()
        }
    }

    fn render_with(assessment: Option<&Assessment>) -> (RenderedMessage, ControlId) {
        let student = student();
        let institution = institution();
        let visit = visit(&student, &institution);
        let envelope = envelope();
        let control_id = ControlIdGenerator::new().generate();

        let rendered = Hl7::render(&BuildInput {
            student: &student,
            visit: &visit,
            institution: &institution,
            assessment,
            envelope: &envelope,
            control_id: &control_id,
            generated_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
        })
        .expect("render");
        (rendered, control_id)
    }

    #[test]
    fn admit_update_has_header_patient_and_visit_segments() {
        let (rendered, control_id) = render_with(None);
        assert_eq!(rendered.message_type, MessageType::AdmitUpdate);

        let parsed = Hl7::parse(&rendered.text).expect("parse");
        assert_eq!(parsed.count("MSH"), 1);
        assert_eq!(parsed.count("PID"), 1);
        assert_eq!(parsed.count("PV1"), 1);
        assert_eq!(parsed.count("OBX"), 0);

        let msh = parsed.header();
        assert_eq!(msh.field(9), "ADT^A08^ADT_A01");
        assert_eq!(msh.field(10), control_id.to_string());
        assert_eq!(msh.field(11), "T");
        assert_eq!(msh.field(12), "2.5.1");
        assert_eq!(msh.field(7), "20261019093000+0000");
    }

    #[test]
    fn observation_result_has_one_obx_per_measurement() {
        let assessment = assessment();
        let (rendered, _) = render_with(Some(&assessment));
        assert_eq!(rendered.message_type, MessageType::ObservationResult);

        let parsed = Hl7::parse(&rendered.text).expect("parse");
        assert_eq!(parsed.count("MSH"), 1);
        assert_eq!(parsed.count("PID"), 1);
        assert_eq!(parsed.count("PV1"), 1);
        assert_eq!(parsed.count("OBX"), 4);
        assert_eq!(parsed.count("OBR"), 0);
        assert_eq!(parsed.count("EVN"), 0);
        assert_eq!(parsed.header().field(9), "ORU^R01^ORU_R01");

        let obx: Vec<&Segment> = parsed.segments_with_id("OBX").collect();
        assert_eq!(obx[0].field(3), "8310-5^Body temperature^LN");
        assert_eq!(obx[0].field(5), "38.1");
        assert_eq!(obx[0].field(6), "Cel^Cel^UCUM");
        assert_eq!(obx[0].field(11), "F");
        assert_eq!(obx[3].field(2), "ST");
        assert_eq!(obx[3].field(5), "20/20");
        // Falls back to the visit start when the assessment has no recorded time.
        assert_eq!(obx[3].field(14), "20261019091500+0000");
    }

    #[test]
    fn patient_segment_carries_student_identity() {
        let (rendered, _) = render_with(None);
        let parsed = Hl7::parse(&rendered.text).expect("parse");
        let pid = parsed.segments_with_id("PID").next().expect("PID");

        assert_eq!(pid.field(3), "S-1042^^^NHS01^MR");
        assert_eq!(pid.field(5), "Okafor^Ada^May");
        assert_eq!(pid.field(7), "20120304");
        assert_eq!(pid.field(8), "F");
    }

    #[test]
    fn visit_segment_carries_visit_context() {
        let (rendered, _) = render_with(None);
        let parsed = Hl7::parse(&rendered.text).expect("parse");
        let pv1 = parsed.segments_with_id("PV1").next().expect("PV1");

        assert_eq!(pv1.field(2), "O");
        assert_eq!(pv1.field(3), "NHS01^^^North Hill School");
        assert_eq!(pv1.field(4), "illness");
        assert_eq!(pv1.field(19), "6f1c2a9e0b7d4c1e9a553d2f8e7b6a10");
        assert_eq!(pv1.field(44), "20261019091500+0000");
        assert_eq!(pv1.field(45), "");
    }

    #[test]
    fn free_text_is_escaped_and_blank_notes_are_skipped() {
        let (rendered, _) = render_with(None);
        let parsed = Hl7::parse(&rendered.text).expect("parse");
        let notes: Vec<&Segment> = parsed.segments_with_id("NTE").collect();

        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].field(3), r"Headache \F\ dizzy");
        assert_eq!(notes[0].value(3), "Headache | dizzy");
        assert_eq!(notes[0].field(4), "CC^Chief complaint^L");
        assert_eq!(notes[1].field(1), "2");
        assert_eq!(notes[1].field(4), "DX^Diagnosis^L");
    }

    #[test]
    fn delimiters_in_free_text_do_not_add_segments_or_fields() {
        let student = student();
        let institution = institution();
        let mut visit = visit(&student, &institution);
        visit.notes = Some("line one\rMSH|fake|header\nline ~ three & four ^ \\".into());
        let envelope = envelope();
        let control_id = ControlIdGenerator::new().generate();

        let rendered = Hl7::render(&BuildInput {
            student: &student,
            visit: &visit,
            institution: &institution,
            assessment: None,
            envelope: &envelope,
            control_id: &control_id,
            generated_at: Utc::now(),
        })
        .expect("render");

        let parsed = Hl7::parse(&rendered.text).expect("parse");
        assert_eq!(parsed.count("MSH"), 1);
        let remark = parsed
            .segments_with_id("NTE")
            .find(|s| s.field(4).starts_with("RE^"))
            .expect("remark note");
        assert_eq!(
            remark.value(3),
            "line one\rMSH|fake|header\nline ~ three & four ^ \\"
        );
    }

    #[test]
    fn unescapable_free_text_fails_the_build() {
        let student = student();
        let institution = institution();
        let mut visit = visit(&student, &institution);
        visit.diagnosis = Some("bad\u{0000}byte".into());
        let envelope = envelope();
        let control_id = ControlIdGenerator::new().generate();

        let err = Hl7::render(&BuildInput {
            student: &student,
            visit: &visit,
            institution: &institution,
            assessment: None,
            envelope: &envelope,
            control_id: &control_id,
            generated_at: Utc::now(),
        })
        .expect_err("NUL cannot be escaped");

        assert!(matches!(
            err,
            Hl7Error::UnescapableCharacter {
                field: "visit.diagnosis",
                codepoint: 0
            }
        ));
    }

    #[test]
    fn rendering_is_deterministic() {
        let student = student();
        let institution = institution();
        let visit = visit(&student, &institution);
        let envelope = envelope();
        let assessment = assessment();
        let control_id = ControlIdGenerator::new().generate();
        let input = BuildInput {
            student: &student,
            visit: &visit,
            institution: &institution,
            assessment: Some(&assessment),
            envelope: &envelope,
            control_id: &control_id,
            generated_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap(),
        };

        let first = Hl7::render(&input).expect("render");
        let second = Hl7::render(&input).expect("render");
        assert_eq!(first, second);
    }

    #[test]
    fn segments_are_carriage_return_terminated() {
        let (rendered, _) = render_with(None);
        assert!(rendered.text.starts_with("MSH|^~\\&|NHS01|North Hill School|"));
        assert!(rendered.text.ends_with('\r'));
        assert!(!rendered.text.contains('\n'));
    }
}
