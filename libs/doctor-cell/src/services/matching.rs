// libs/doctor-cell/src/services/matching.rs
use std::collections::HashSet;

use tracing::debug;

use crate::models::{DoctorMatch, MatchRule};
use crate::services::directory::DoctorDirectory;

/// Maps free-text symptoms to a doctor id using an ordered rule table.
///
/// The first rule sharing at least one token with the symptoms wins; when no
/// rule matches, the default doctor is returned. Matching never fails.
#[derive(Debug, Clone)]
pub struct DoctorMatcher {
    rules: Vec<MatchRule>,
    default_doctor_id: String,
}

impl DoctorMatcher {
    pub fn new(rules: Vec<MatchRule>, default_doctor_id: &str) -> Self {
        Self {
            rules,
            default_doctor_id: default_doctor_id.to_string(),
        }
    }

    /// Builds the rule table from the directory, one rule per doctor, in
    /// directory order.
    pub fn from_directory(directory: &DoctorDirectory) -> Self {
        let rules = directory
            .doctors()
            .iter()
            .filter(|doctor| !doctor.keywords.is_empty())
            .map(|doctor| MatchRule::new(&doctor.id, &doctor.keywords))
            .collect();

        Self::new(rules, directory.default_doctor_id())
    }

    pub fn match_symptoms(&self, symptoms: &str) -> String {
        self.find_match(symptoms).doctor_id
    }

    pub fn find_match(&self, symptoms: &str) -> DoctorMatch {
        let tokens = tokenize(symptoms);

        for (index, rule) in self.rules.iter().enumerate() {
            // BTreeSet iteration keeps the reported keyword deterministic.
            if let Some(keyword) = rule.keywords.iter().find(|k| tokens.contains(k.as_str())) {
                debug!(
                    "Symptoms matched rule {} ({}) via '{}'",
                    index, rule.doctor_id, keyword
                );
                return DoctorMatch {
                    doctor_id: rule.doctor_id.clone(),
                    rule_index: Some(index),
                    matched_keyword: Some(keyword.clone()),
                };
            }
        }

        debug!("No symptom rule matched, using default doctor {}", self.default_doctor_id);
        DoctorMatch {
            doctor_id: self.default_doctor_id.clone(),
            rule_index: None,
            matched_keyword: None,
        }
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn default_doctor_id(&self) -> &str {
        &self.default_doctor_id
    }
}

impl Default for DoctorMatcher {
    fn default() -> Self {
        Self::from_directory(&DoctorDirectory::clinic_default())
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_punctuation_and_lowercases() {
        let tokens = tokenize("Headache, FEVER; sore-throat");
        assert!(tokens.contains("headache"));
        assert!(tokens.contains("fever"));
        assert!(tokens.contains("sore"));
        assert!(tokens.contains("throat"));
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn keywords_match_whole_tokens_only() {
        let matcher = DoctorMatcher::new(vec![MatchRule::new("dr-lee", ["ear"])], "dr-smith");
        assert_eq!(matcher.match_symptoms("my heart hurts"), "dr-smith");
        assert_eq!(matcher.match_symptoms("my ear hurts"), "dr-lee");
    }
}
