use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory entry for a doctor who can receive bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialization: String,
    /// Lower-case symptom tokens that route a patient to this doctor.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Doctor {
    pub fn new(id: &str, name: &str, specialization: &str, keywords: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            specialization: specialization.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.specialization)
    }
}

/// One row of the ordered symptom table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub keywords: BTreeSet<String>,
    pub doctor_id: String,
}

impl MatchRule {
    pub fn new<I, S>(doctor_id: &str, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            doctor_id: doctor_id.to_string(),
        }
    }
}

/// Outcome of a symptom lookup, kept for logging why a doctor was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorMatch {
    pub doctor_id: String,
    /// Index of the winning rule, `None` when the default doctor was used.
    pub rule_index: Option<usize>,
    pub matched_keyword: Option<String>,
}

impl DoctorMatch {
    pub fn is_default(&self) -> bool {
        self.rule_index.is_none()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DoctorError {
    #[error("Doctor not found: {0}")]
    NotFound(String),

    #[error("Doctor listed twice in directory: {0}")]
    DuplicateDoctor(String),

    #[error("Doctor directory is empty")]
    EmptyDirectory,
}
