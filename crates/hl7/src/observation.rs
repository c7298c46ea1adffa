//! Assessment measurements as coded observations.
//!
//! Each recorded measurement becomes one `OBX` segment. Numeric measurements are coded with
//! LOINC and UCUM units; visual acuity has no LOINC code in use here and travels under a
//! local code as a string.

use crate::encoding::format_number;
use crate::Hl7Result;
use hie_types::Assessment;

/// OBX-2 value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    /// Numeric.
    Nm,
    /// String data.
    St,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nm => "NM",
            Self::St => "ST",
        }
    }
}

/// One coded measurement, ready to render as an `OBX` segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// Assessment field the value came from.
    pub field: &'static str,
    pub code: &'static str,
    pub display: &'static str,
    /// Coding system of `code`: `LN` (LOINC) or `L` (local).
    pub system: &'static str,
    pub value_type: ValueType,
    pub value: String,
    /// UCUM unit, if the measurement has one.
    pub units: Option<&'static str>,
}

struct Coding {
    field: &'static str,
    code: &'static str,
    display: &'static str,
    system: &'static str,
    units: Option<&'static str>,
}

const TEMPERATURE: Coding = loinc("temperature_c", "8310-5", "Body temperature", "Cel");
const SYSTOLIC: Coding = loinc("systolic_mmhg", "8480-6", "Systolic blood pressure", "mm[Hg]");
const DIASTOLIC: Coding = loinc(
    "diastolic_mmhg",
    "8462-4",
    "Diastolic blood pressure",
    "mm[Hg]",
);
const HEART_RATE: Coding = loinc("heart_rate", "8867-4", "Heart rate", "/min");
const RESPIRATORY_RATE: Coding = loinc("respiratory_rate", "9279-1", "Respiratory rate", "/min");
const OXYGEN_SATURATION: Coding = loinc(
    "oxygen_saturation",
    "59408-5",
    "Oxygen saturation by pulse oximetry",
    "%",
);
const HEIGHT: Coding = loinc("height_cm", "8302-2", "Body height", "cm");
const WEIGHT: Coding = loinc("weight_kg", "29463-7", "Body weight", "kg");
const BMI: Coding = loinc("bmi", "39156-5", "Body mass index", "kg/m2");
const VISION_LEFT: Coding = local("vision_left", "VA-OS", "Visual acuity left eye");
const VISION_RIGHT: Coding = local("vision_right", "VA-OD", "Visual acuity right eye");

const fn loinc(
    field: &'static str,
    code: &'static str,
    display: &'static str,
    units: &'static str,
) -> Coding {
    Coding {
        field,
        code,
        display,
        system: "LN",
        units: Some(units),
    }
}

const fn local(field: &'static str, code: &'static str, display: &'static str) -> Coding {
    Coding {
        field,
        code,
        display,
        system: "L",
        units: None,
    }
}

impl Coding {
    fn numeric(&self, value: f64) -> Hl7Result<Observation> {
        Ok(self.observation(ValueType::Nm, format_number(self.field, value)?))
    }

    fn text(&self, value: &str) -> Observation {
        self.observation(ValueType::St, value.trim().to_owned())
    }

    fn observation(&self, value_type: ValueType, value: String) -> Observation {
        Observation {
            field: self.field,
            code: self.code,
            display: self.display,
            system: self.system,
            value_type,
            value,
            units: self.units,
        }
    }
}

/// Lists the observations for every measurement present on `assessment`, in a fixed order.
///
/// Blank vision entries count as not recorded.
///
/// # Errors
///
/// Returns [`crate::Hl7Error::NonFiniteValue`] if a decimal measurement is NaN or infinite.
pub fn observations(assessment: &Assessment) -> Hl7Result<Vec<Observation>> {
    let mut out = Vec::new();

    let numeric = [
        (&TEMPERATURE, assessment.temperature_c),
        (&SYSTOLIC, assessment.systolic_mmhg.map(f64::from)),
        (&DIASTOLIC, assessment.diastolic_mmhg.map(f64::from)),
        (&HEART_RATE, assessment.heart_rate.map(f64::from)),
        (&RESPIRATORY_RATE, assessment.respiratory_rate.map(f64::from)),
        (&OXYGEN_SATURATION, assessment.oxygen_saturation),
        (&HEIGHT, assessment.height_cm),
        (&WEIGHT, assessment.weight_kg),
        (&BMI, assessment.bmi),
    ];
    for (coding, value) in numeric {
        if let Some(value) = value {
            out.push(coding.numeric(value)?);
        }
    }

    for (coding, value) in [
        (&VISION_LEFT, assessment.vision_left.as_deref()),
        (&VISION_RIGHT, assessment.vision_right.as_deref()),
    ] {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            out.push(coding.text(value));
        }
    }

    Ok(out)
}
