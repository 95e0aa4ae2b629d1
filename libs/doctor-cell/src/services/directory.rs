// libs/doctor-cell/src/services/directory.rs
use std::collections::HashSet;

use tracing::debug;

use crate::models::{Doctor, DoctorError};

pub const DEFAULT_DOCTOR_ID: &str = "dr-smith";

/// Read-only list of bookable doctors. Order is significant: the symptom
/// rule table is derived from it top to bottom.
#[derive(Debug, Clone)]
pub struct DoctorDirectory {
    doctors: Vec<Doctor>,
    default_doctor_id: String,
}

impl DoctorDirectory {
    pub fn new(doctors: Vec<Doctor>, default_doctor_id: &str) -> Result<Self, DoctorError> {
        if doctors.is_empty() {
            return Err(DoctorError::EmptyDirectory);
        }

        let mut seen = HashSet::new();
        for doctor in &doctors {
            if !seen.insert(doctor.id.as_str()) {
                return Err(DoctorError::DuplicateDoctor(doctor.id.clone()));
            }
        }

        if !seen.contains(default_doctor_id) {
            return Err(DoctorError::NotFound(default_doctor_id.to_string()));
        }

        debug!("Doctor directory loaded with {} doctors", doctors.len());

        Ok(Self {
            doctors,
            default_doctor_id: default_doctor_id.to_string(),
        })
    }

    /// The clinic's built-in roster.
    pub fn clinic_default() -> Self {
        Self {
            doctors: vec![
                Doctor::new(
                    "dr-patel",
                    "Dr. Anika Patel",
                    "Neurology",
                    &[
                        "headache", "headaches", "migraine", "migraines", "dizzy", "dizziness",
                        "seizure", "seizures", "numbness", "tingling", "vertigo",
                    ],
                ),
                Doctor::new(
                    "dr-chen",
                    "Dr. Michael Chen",
                    "Cardiology",
                    &[
                        "chest", "heart", "palpitation", "palpitations", "hypertension",
                        "arrhythmia",
                    ],
                ),
                Doctor::new(
                    "dr-garcia",
                    "Dr. Elena Garcia",
                    "Dermatology",
                    &[
                        "rash", "rashes", "skin", "acne", "eczema", "itching", "itchy", "mole",
                        "hives",
                    ],
                ),
                Doctor::new(
                    "dr-okafor",
                    "Dr. James Okafor",
                    "Orthopedics",
                    &[
                        "back", "knee", "knees", "joint", "joints", "fracture", "sprain",
                        "shoulder", "hip",
                    ],
                ),
                Doctor::new(
                    "dr-lee",
                    "Dr. Grace Lee",
                    "ENT",
                    &[
                        "ear", "ears", "earache", "throat", "sinus", "sinuses", "tonsils",
                        "hearing",
                    ],
                ),
                Doctor::new(
                    DEFAULT_DOCTOR_ID,
                    "Dr. Smith",
                    "General Practice",
                    &[
                        "fever", "cough", "cold", "flu", "fatigue", "nausea", "vomiting",
                        "checkup",
                    ],
                ),
            ],
            default_doctor_id: DEFAULT_DOCTOR_ID.to_string(),
        }
    }

    pub fn get(&self, doctor_id: &str) -> Option<&Doctor> {
        self.doctors.iter().find(|d| d.id == doctor_id)
    }

    pub fn contains(&self, doctor_id: &str) -> bool {
        self.get(doctor_id).is_some()
    }

    pub fn default_doctor_id(&self) -> &str {
        &self.default_doctor_id
    }

    pub fn doctors(&self) -> &[Doctor] {
        &self.doctors
    }
}

impl Default for DoctorDirectory {
    fn default() -> Self {
        Self::clinic_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn clinic_default_contains_default_doctor() {
        let directory = DoctorDirectory::clinic_default();
        assert!(directory.contains(DEFAULT_DOCTOR_ID));
        assert_eq!(directory.default_doctor_id(), DEFAULT_DOCTOR_ID);
        assert_eq!(directory.get("dr-patel").map(|d| d.specialization.as_str()), Some("Neurology"));
    }

    #[test]
    fn rejects_unknown_default_and_duplicates() {
        let doctor = Doctor::new("dr-a", "Dr. A", "General Practice", &[]);

        assert_matches!(
            DoctorDirectory::new(vec![doctor.clone()], "dr-b"),
            Err(DoctorError::NotFound(id)) if id == "dr-b"
        );
        assert_matches!(
            DoctorDirectory::new(vec![doctor.clone(), doctor], "dr-a"),
            Err(DoctorError::DuplicateDoctor(_))
        );
        assert_matches!(DoctorDirectory::new(vec![], "dr-a"), Err(DoctorError::EmptyDirectory));
    }
}
