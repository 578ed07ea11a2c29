use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use validator::{Validate, ValidationError};

use crate::store::{Document, StoreError};

pub const INJURY_REPORTS_COLLECTION: &str = "injuryReports";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    AsRefStr, EnumString, EnumIter,
)]
pub enum CaseSeverity {
    P1,
    P2,
    P3,
}

/// How the patient left first aid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Discharge {
    #[serde(rename = "self")]
    SelfDischarged,
    #[serde(rename_all = "camelCase")]
    Ambulance {
        alpha_no: String,
        hospital: String,
        paramedic: String,
    },
    Other {
        #[serde(default)]
        text: String,
    },
}

impl Discharge {
    /// Sentence used in the rendered report.
    pub fn sentence(&self) -> String {
        match self {
            Discharge::SelfDischarged => "Self-discharged and continued with activity.".to_string(),
            Discharge::Ambulance {
                alpha_no,
                hospital,
                paramedic,
            } => format!(
                "Sent by Alpha {} to {}, handed over to {}.",
                alpha_no.trim(),
                hospital.trim(),
                paramedic.trim()
            ),
            Discharge::Other { text } => {
                let text = text.trim();
                if text.is_empty() || text.ends_with('.') {
                    text.to_string()
                } else {
                    format!("{}.", text)
                }
            }
        }
    }
}

fn validate_discharge(discharge: &Discharge) -> Result<(), ValidationError> {
    if let Discharge::Ambulance {
        alpha_no,
        hospital,
        paramedic,
    } = discharge
    {
        for (field, value) in [
            ("alpha_no", alpha_no),
            ("hospital", hospital),
            ("paramedic", paramedic),
        ] {
            if value.trim().is_empty() {
                let mut err = ValidationError::new("ambulance_details");
                err.message = Some(format!("Ambulance discharge requires {}", field).into());
                return Err(err);
            }
        }
    }
    Ok(())
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Fields captured by the report form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InjuryReportInput {
    #[validate(custom = "validate_not_blank")]
    pub time_in: String,
    #[validate(custom = "validate_not_blank")]
    pub time_out: String,
    #[validate(custom = "validate_not_blank")]
    pub patient_name: String,
    #[serde(default)]
    pub gender: String,
    #[validate(custom = "validate_not_blank")]
    pub age: String,
    #[serde(default)]
    pub contact: String,
    pub case_type: CaseSeverity,
    #[validate(custom = "validate_not_blank")]
    pub location: String,
    #[validate(custom = "validate_not_blank")]
    pub moi: String,
    #[validate(custom = "validate_not_blank")]
    pub treatment: String,
    #[validate(custom = "validate_discharge")]
    pub discharge: Discharge,
}

impl InjuryReportInput {
    /// Plain-text rendering of the report, as pasted into handover messages.
    pub fn render_full_text(&self) -> String {
        format!(
            "Time in: {} hrs\n\
             Time out: {} hrs\n\
             Patient\u{2019}s name: {}\n\
             Gender: {}\n\
             Age: {}\n\
             Contact no.: {}\n\
             \n\
             Case Type: {}\n\
             Location: {}\n\
             \n\
             Mechanism of Injury:\n\
             {}\n\
             \n\
             Treatment:\n\
             {}\n\
             \n\
             Discharge:\n\
             {}",
            self.time_in.trim(),
            self.time_out.trim(),
            self.patient_name.trim(),
            self.gender.trim(),
            self.age.trim(),
            self.contact.trim(),
            self.case_type,
            self.location.trim(),
            self.moi.trim(),
            self.treatment.trim(),
            self.discharge.sentence(),
        )
    }
}

/// Stored injury report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjuryReport {
    /// Document id. Returned to clients, left out of the stored body.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(flatten)]
    pub input: InjuryReportInput,
    pub full_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl InjuryReport {
    pub fn new(input: InjuryReportInput) -> Self {
        let full_text = input.render_full_text();
        Self {
            id: String::new(),
            input,
            full_text,
            created_at: None,
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut report: InjuryReport = doc.decode()?;
        report.id = doc.id.clone();
        report.created_at.get_or_insert(doc.create_time);
        Ok(report)
    }

    /// Case-insensitive keyword match over patient name, location and text.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return true;
        }
        format!(
            "{} {} {}",
            self.input.patient_name, self.input.location, self.full_text
        )
        .to_lowercase()
        .contains(&keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> InjuryReportInput {
        InjuryReportInput {
            time_in: "1405".into(),
            time_out: "1420".into(),
            patient_name: "Jamie Tan".into(),
            gender: "F".into(),
            age: "24".into(),
            contact: "91234567".into(),
            case_type: CaseSeverity::P3,
            location: "Main Stage".into(),
            moi: "Tripped over cable".into(),
            treatment: "Cleaned abrasion, applied plaster".into(),
            discharge: Discharge::SelfDischarged,
        }
    }

    #[test]
    fn renders_handover_layout() {
        let text = sample_input().render_full_text();
        let expected = "Time in: 1405 hrs\n\
                        Time out: 1420 hrs\n\
                        Patient\u{2019}s name: Jamie Tan\n\
                        Gender: F\n\
                        Age: 24\n\
                        Contact no.: 91234567\n\
                        \n\
                        Case Type: P3\n\
                        Location: Main Stage\n\
                        \n\
                        Mechanism of Injury:\n\
                        Tripped over cable\n\
                        \n\
                        Treatment:\n\
                        Cleaned abrasion, applied plaster\n\
                        \n\
                        Discharge:\n\
                        Self-discharged and continued with activity.";
        assert_eq!(text, expected);
    }

    #[test]
    fn discharge_sentences() {
        let ambulance = Discharge::Ambulance {
            alpha_no: "12".into(),
            hospital: "SGH".into(),
            paramedic: "Lee".into(),
        };
        assert_eq!(
            ambulance.sentence(),
            "Sent by Alpha 12 to SGH, handed over to Lee."
        );
        let other = Discharge::Other {
            text: "Picked up by parent".into(),
        };
        assert_eq!(other.sentence(), "Picked up by parent.");
        let dotted = Discharge::Other {
            text: "Went home.".into(),
        };
        assert_eq!(dotted.sentence(), "Went home.");
    }

    #[test]
    fn ambulance_requires_details() {
        let mut input = sample_input();
        input.discharge = Discharge::Ambulance {
            alpha_no: "7".into(),
            hospital: " ".into(),
            paramedic: "Lee".into(),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn blank_required_field_fails() {
        let mut input = sample_input();
        input.moi = "  ".into();
        assert!(input.validate().is_err());
        assert!(sample_input().validate().is_ok());
    }

    #[test]
    fn discharge_is_tagged_by_method() {
        let value = serde_json::to_value(Discharge::Ambulance {
            alpha_no: "3".into(),
            hospital: "NUH".into(),
            paramedic: "Ong".into(),
        })
        .unwrap();
        assert_eq!(value["method"], "ambulance");
        assert_eq!(value["alphaNo"], "3");
        let parsed: Discharge = serde_json::from_value(serde_json::json!({"method": "self"})).unwrap();
        assert_eq!(parsed, Discharge::SelfDischarged);
    }
}
