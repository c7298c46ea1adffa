//! Clinic-side records consumed by the messaging pipeline.

use crate::NonEmptyText;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Administrative gender as recorded by the clinic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

/// A student's legal name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonName {
    pub given: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<String>,
    pub family: NonEmptyText,
}

/// Demographic identity of the student seen at the clinic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: PersonName,
    pub birth_date: NaiveDate,
    /// School-issued student number, sent as the patient identifier.
    pub identifier: NonEmptyText,
    pub gender: Gender,
}

/// A school operating a clinic. Each institution owns one messaging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: Uuid,
    pub code: NonEmptyText,
    pub name: NonEmptyText,
}

/// A single clinical encounter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    pub student_id: Uuid,
    pub institution_id: Uuid,
    pub visit_type: NonEmptyText,
    #[serde(default)]
    pub chief_complaint: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Vital signs and measurements recorded during a visit.
///
/// Every measurement is optional; only the ones actually taken are reported.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assessment {
    /// Body temperature in degrees Celsius.
    pub temperature_c: Option<f64>,
    /// Systolic blood pressure in mmHg.
    pub systolic_mmhg: Option<u16>,
    /// Diastolic blood pressure in mmHg.
    pub diastolic_mmhg: Option<u16>,
    /// Beats per minute.
    pub heart_rate: Option<u16>,
    /// Breaths per minute.
    pub respiratory_rate: Option<u16>,
    /// Peripheral oxygen saturation in percent.
    pub oxygen_saturation: Option<f64>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub bmi: Option<f64>,
    /// Snellen fraction for the left eye, e.g. `20/20`.
    pub vision_left: Option<String>,
    /// Snellen fraction for the right eye.
    pub vision_right: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Assessment {
    /// Computes BMI (kg/m², one decimal place) from height and weight.
    ///
    /// Returns `None` unless both are present and height is positive.
    pub fn derived_bmi(&self) -> Option<f64> {
        let height_m = self.height_cm? / 100.0;
        let weight = self.weight_kg?;
        if height_m <= 0.0 {
            return None;
        }
        Some((weight / (height_m * height_m) * 10.0).round() / 10.0)
    }

    /// Fills `bmi` from height and weight when it was not recorded directly.
    pub fn with_derived_bmi(mut self) -> Self {
        if self.bmi.is_none() {
            self.bmi = self.derived_bmi();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_bmi_rounds_to_one_decimal() {
        let assessment = Assessment {
            height_cm: Some(150.0),
            weight_kg: Some(45.0),
            ..Default::default()
        };

        assert_eq!(assessment.derived_bmi(), Some(20.0));

        let assessment = Assessment {
            height_cm: Some(162.0),
            weight_kg: Some(51.3),
            ..Default::default()
        };
        assert_eq!(assessment.derived_bmi(), Some(19.5));
    }

    #[test]
    fn derived_bmi_requires_height_and_weight() {
        let assessment = Assessment {
            weight_kg: Some(40.0),
            ..Default::default()
        };
        assert_eq!(assessment.derived_bmi(), None);

        let zero_height = Assessment {
            height_cm: Some(0.0),
            weight_kg: Some(40.0),
            ..Default::default()
        };
        assert_eq!(zero_height.derived_bmi(), None);
    }

    #[test]
    fn with_derived_bmi_keeps_recorded_value() {
        let assessment = Assessment {
            height_cm: Some(150.0),
            weight_kg: Some(45.0),
            bmi: Some(21.4),
            ..Default::default()
        }
        .with_derived_bmi();

        assert_eq!(assessment.bmi, Some(21.4));
    }

    #[test]
    fn gender_uses_lowercase_wire_names() {
        let gender: Gender = serde_json::from_str("\"female\"").expect("parse gender");
        assert_eq!(gender, Gender::Female);
        assert_eq!(
            serde_json::to_string(&Gender::Unknown).expect("serialise"),
            "\"unknown\""
        );
    }
}
