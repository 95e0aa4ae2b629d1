// libs/conversation-cell/src/services/extractor.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{
    ConfirmationIntent, ControlIntent, ConversationSession, ConversationState, Extracted,
    ExtractionResult, FieldUpdate,
};

static NAME_INTRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:hi|hello|hey|good (?:morning|afternoon|evening))(?:\s+there)?[\s,!.]*)?(?:my name is|my name's|name is|i'm|i am|im|call me|this is|it's|it is)\s+",
    )
    .expect("valid regex")
});

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "hi there", "hello there", "hey there", "good morning",
    "good afternoon", "good evening", "howdy", "greetings",
];

const CANCEL_PHRASES: &[&str] = &["cancel", "never mind", "nevermind", "forget it"];
const CANCEL_WORDS: &[&str] = &["quit", "exit", "stop", "abort", "bye", "goodbye"];
const START_OVER_PHRASES: &[&str] = &["start over", "start again", "restart", "reset"];

/// Lead-ins skipped before a control phrase, as in "actually, let's start over".
const CONTROL_LEAD_INS: &[&str] = &[
    "i would like to", "i'd like to", "i want to", "i wanna", "can we", "can you", "could we",
    "could you", "please", "actually", "let's", "lets", "just", "ok", "okay", "oh", "um", "no",
    "sorry",
];

/// Utterances this short are treated as commands wherever the phrase sits.
const SHORT_COMMAND_WORDS: usize = 3;

const DENY_WORDS: &[&str] = &[
    "no", "nope", "nah", "not", "don't", "dont", "wrong", "incorrect", "change", "different",
    "negative",
];
const AFFIRM_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "confirm", "confirmed",
    "right", "absolutely", "definitely", "perfect", "great", "y",
];
const AFFIRM_PHRASES: &[&str] = &["sounds good", "go ahead", "book it", "that works", "please do"];

const ORDINALS: &[(&str, usize)] = &[
    ("1", 0), ("first", 0), ("one", 0),
    ("2", 1), ("second", 1), ("two", 1),
    ("3", 2), ("third", 2), ("three", 2),
];

/// Reads the one field the session is waiting for out of an utterance,
/// plus cancel and start-over intents in any active state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, utterance: &str, session: &ConversationSession) -> ExtractionResult {
        let trimmed = utterance.trim();
        if trimmed.is_empty() || session.state.is_terminal() {
            return ExtractionResult::empty();
        }

        let normalized = normalize(trimmed);

        if let Some(intent) = control_intent(&normalized) {
            return ExtractionResult::control(intent);
        }

        match session.state {
            ConversationState::AwaitingName => extract_name(trimmed),
            ConversationState::AwaitingSymptoms => {
                let valid = trimmed.chars().any(char::is_alphanumeric);
                let symptoms = if valid {
                    Extracted::valid(trimmed.to_string())
                } else {
                    Extracted::invalid(trimmed.to_string())
                };
                ExtractionResult::update(FieldUpdate::Symptoms(symptoms))
            }
            ConversationState::AwaitingDatetime => {
                if let Some(index) = alternative_choice(&normalized, session.pending_alternatives.len()) {
                    return ExtractionResult::update(FieldUpdate::AlternativeChoice(index));
                }
                ExtractionResult::update(FieldUpdate::TimePhrase(Extracted::valid(trimmed.to_string())))
            }
            ConversationState::AwaitingConfirmation => {
                ExtractionResult::update(FieldUpdate::Confirmation(confirmation_intent(&normalized)))
            }
            ConversationState::Booked | ConversationState::Cancelled | ConversationState::Failed => {
                ExtractionResult::empty()
            }
        }
    }
}

// ==============================================================================
// PRIVATE HELPER METHODS
// ==============================================================================

/// Lower-cased words with surrounding punctuation removed.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let padded = format!(" {} ", normalized);
    padded.contains(&format!(" {} ", phrase))
}

fn starts_with_phrase(normalized: &str, phrase: &str) -> bool {
    normalized == phrase || normalized.starts_with(&format!("{} ", phrase))
}

/// Drops conversational lead-ins so the command itself starts the text.
fn strip_lead_ins(normalized: &str) -> &str {
    let mut rest = normalized;
    while let Some(lead_in) = CONTROL_LEAD_INS.iter().find(|l| starts_with_phrase(rest, l)) {
        rest = rest[lead_in.len()..].trim_start();
    }
    rest
}

/// A control phrase only counts when it opens the utterance or the
/// utterance is a short command; "my pacemaker needed a reset" is a symptom.
fn control_intent(normalized: &str) -> Option<ControlIntent> {
    let command = strip_lead_ins(normalized);
    let short = normalized.split(' ').count() <= SHORT_COMMAND_WORDS;
    let matches = |phrase: &&str| {
        starts_with_phrase(command, phrase) || (short && contains_phrase(normalized, phrase))
    };

    if START_OVER_PHRASES.iter().any(matches) {
        return Some(ControlIntent::StartOver);
    }
    if CANCEL_PHRASES.iter().any(matches) {
        return Some(ControlIntent::Cancel);
    }
    if CANCEL_WORDS.contains(&command) {
        return Some(ControlIntent::Cancel);
    }
    None
}

fn extract_name(trimmed: &str) -> ExtractionResult {
    let without_intro = NAME_INTRO.replace(trimmed, "");
    let name = without_intro
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | ',' | '?'))
        .trim();

    if name.is_empty() || GREETINGS.contains(&normalize(name).as_str()) {
        return ExtractionResult::update(FieldUpdate::Name(Extracted::invalid(name.to_string())));
    }

    ExtractionResult::update(FieldUpdate::Name(Extracted::valid(name.to_string())))
}

fn confirmation_intent(normalized: &str) -> ConfirmationIntent {
    let words: Vec<&str> = normalized.split(' ').collect();

    let deny = words.iter().any(|w| DENY_WORDS.contains(w));
    let affirm = words.iter().any(|w| AFFIRM_WORDS.contains(w))
        || AFFIRM_PHRASES.iter().any(|p| contains_phrase(normalized, p));

    // Mixed signals ("no problem, go ahead") get a re-prompt, not a guess.
    match (deny, affirm) {
        (true, false) => ConfirmationIntent::Deny,
        (false, true) => ConfirmationIntent::Affirm,
        _ => ConfirmationIntent::Unclear,
    }
}

fn alternative_choice(normalized: &str, offered: usize) -> Option<usize> {
    if offered == 0 {
        return None;
    }
    let choice = normalized
        .trim_start_matches("option ")
        .trim_start_matches("the ")
        .trim_end_matches(" one")
        .trim_end_matches(" please");

    ORDINALS
        .iter()
        .find(|(word, _)| *word == choice)
        .map(|(_, index)| *index)
        .filter(|index| *index < offered)
}
