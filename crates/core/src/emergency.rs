//! Deterministic emergency phrase detection.
//!
//! Matching is keyword based so conversational context cannot talk it out of
//! firing. The phrase set is deliberately broad: a false positive costs a
//! transfer, a false negative can cost a life.

use serde::{Deserialize, Serialize};

use crate::text::normalize;

/// Normalized phrases (lowercase, apostrophes dropped, single spaces). The
/// last word of a phrase may keep going, so "cant breath" also covers
/// "cant breathe" and "cant breathing".
pub const EMERGENCY_PHRASES: &[&str] = &[
    "chest pain",
    "chest hurts",
    "chest is tight",
    "pressure in my chest",
    "heart attack",
    "heartattack",
    "cant breath",
    "cannot breath",
    "can not breath",
    "not breath",
    "stopped breath",
    "difficulty breath",
    "trouble breath",
    "hard to breath",
    "short of breath",
    "choking",
    "stroke",
    "face is drooping",
    "slurred speech",
    "bleeding",
    "blood everywhere",
    "unconscious",
    "passed out",
    "passing out",
    "unresponsive",
    "seizure",
    "overdose",
    "overdosed",
    "too many pills",
    "took too many",
    "poisoned",
    "allergic reaction",
    "throat is closing",
    "anaphylaxis",
    "suicide",
    "suicidal",
    "kill myself",
    "killing myself",
    "end my life",
    "want to die",
    "self harm",
    "hurt myself",
    "hurting myself",
    "911",
];

/// Two groups of words that signal an emergency when they occur within
/// `window` words of each other. Cues match whole words; targets match by
/// stem ("breath" covers "breathe", "breathing", "breathless").
#[derive(Clone, Copy, Debug)]
pub struct ProximityRule {
    pub label: &'static str,
    pub cues: &'static [&'static str],
    pub targets: &'static [&'static str],
    pub window: usize,
    /// When set, the cue must come before the target.
    pub ordered: bool,
}

pub const PROXIMITY_RULES: &[ProximityRule] = &[
    ProximityRule {
        label: "breathing difficulty",
        cues: &[
            "cant", "cannot", "not", "isnt", "wasnt", "arent", "werent", "stopped", "stop",
            "no", "unable", "struggling", "hard", "trouble", "difficulty", "short", "barely",
        ],
        targets: &["breath"],
        window: 3,
        ordered: true,
    },
    ProximityRule {
        label: "chest symptoms",
        cues: &["chest"],
        targets: &["tight", "pain", "hurt", "pressur", "crush", "heav", "squeez"],
        window: 4,
        ordered: false,
    },
    ProximityRule {
        label: "possible overdose",
        cues: &["whole"],
        targets: &["pill", "tablet", "bottle", "meds", "medication"],
        window: 3,
        ordered: true,
    },
];

impl ProximityRule {
    fn matches(&self, words: &[&str]) -> bool {
        let target_positions: Vec<usize> = words
            .iter()
            .enumerate()
            .filter_map(|(at, word)| {
                self.targets.iter().any(|stem| word.starts_with(stem)).then_some(at)
            })
            .collect();

        let mut cue_positions = words
            .iter()
            .enumerate()
            .filter_map(|(at, word)| self.cues.contains(word).then_some(at));
        cue_positions.any(|cue| {
            target_positions.iter().any(|&target| {
                if self.ordered {
                    target > cue && target - cue <= self.window
                } else {
                    target != cue && target.abs_diff(cue) <= self.window
                }
            })
        })
    }
}

pub const EMERGENCY_SCRIPT: &str = "This sounds like it could be a medical emergency. \
Please hang up and call 911 right away, or go to your nearest emergency room. \
I'm connecting you to emergency help now.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    None,
    Emergency { matched_phrase: String },
}

impl Classification {
    pub fn is_emergency(&self) -> bool {
        matches!(self, Self::Emergency { .. })
    }
}

#[derive(Clone, Debug)]
pub struct EmergencyClassifier {
    phrases: Vec<String>,
    rules: Vec<ProximityRule>,
}

impl Default for EmergencyClassifier {
    fn default() -> Self {
        Self::with_phrases(EMERGENCY_PHRASES.iter().copied())
    }
}

impl EmergencyClassifier {
    pub fn with_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|phrase| normalize(phrase.as_ref()))
            .filter(|phrase| !phrase.is_empty())
            .collect();
        Self { phrases, rules: PROXIMITY_RULES.to_vec() }
    }

    pub fn classify(&self, utterance: &str) -> Classification {
        let normalized = normalize(utterance);
        if normalized.is_empty() {
            return Classification::None;
        }
        let padded = format!(" {normalized} ");

        if let Some(phrase) = self.phrases.iter().find(|phrase| {
            padded.contains(&format!(" {phrase} ")) || is_prefix_match(&padded, phrase)
        }) {
            return Classification::Emergency { matched_phrase: phrase.clone() };
        }

        let words: Vec<&str> = normalized.split(' ').collect();
        self.rules
            .iter()
            .find(|rule| rule.matches(&words))
            .map(|rule| Classification::Emergency { matched_phrase: rule.label.to_string() })
            .unwrap_or(Classification::None)
    }

    /// Longest phrase in characters; bounds the tail a streaming scanner keeps.
    pub fn longest_phrase_len(&self) -> usize {
        self.phrases.iter().map(String::len).max().unwrap_or(0)
    }
}

/// Phrases also match when their last word keeps going ("chest pains",
/// "strokes"). Numeric phrases must match whole tokens so "911" does not fire
/// on "91150".
fn is_prefix_match(padded: &str, phrase: &str) -> bool {
    let numeric = phrase.chars().all(|ch| ch.is_ascii_digit());
    !numeric && padded.contains(&format!(" {phrase}"))
}

/// Scans partial transcripts for one session. Keeps a short tail of earlier
/// fragments so a phrase split across partials ("chest" / "pain") still fires.
#[derive(Clone, Debug)]
pub struct StreamingScanner {
    classifier: EmergencyClassifier,
    tail: String,
    tail_limit: usize,
}

impl StreamingScanner {
    pub fn new(classifier: EmergencyClassifier) -> Self {
        let tail_limit = classifier.longest_phrase_len().max(16) * 2;
        Self { classifier, tail: String::new(), tail_limit }
    }

    pub fn scan(&mut self, fragment: &str, is_final: bool) -> Classification {
        let combined = format!("{} {}", self.tail, normalize(fragment));
        let classification = self.classifier.classify(&combined);

        if is_final || classification.is_emergency() {
            self.tail.clear();
        } else {
            self.tail = keep_tail(&normalize(&combined), self.tail_limit);
        }
        classification
    }
}

fn keep_tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = text.len() - limit;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    // Start on a word boundary so a partial word does not create a match.
    match text[cut..].find(' ') {
        Some(space) => text[cut + space + 1..].to_string(),
        None => text[cut..].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Classification, EmergencyClassifier, StreamingScanner};

    #[test]
    fn detects_heart_attack_phrase_case_insensitively() {
        let classifier = EmergencyClassifier::default();
        let result = classifier.classify("I think I'm having a HEART ATTACK");

        assert_eq!(
            result,
            Classification::Emergency { matched_phrase: "heart attack".to_string() }
        );
    }

    #[test]
    fn apostrophe_variants_all_match() {
        let classifier = EmergencyClassifier::default();

        assert!(classifier.classify("I can't breathe").is_emergency());
        assert!(classifier.classify("I can\u{2019}t breathe").is_emergency());
        assert!(classifier.classify("i cant breathe").is_emergency());
        assert!(classifier.classify("I cannot breathe well").is_emergency());
    }

    #[test]
    fn negated_breathing_paraphrases_fire() {
        let classifier = EmergencyClassifier::default();

        for utterance in [
            "my son isn't breathing",
            "she wasn't breathing when I found her",
            "he stopped breathing",
            "he's no longer breathing",
            "I can't breath",
            "I'm really short of breath",
            "I can barely catch my breath",
        ] {
            assert!(classifier.classify(utterance).is_emergency(), "{utterance}");
        }
    }

    #[test]
    fn chest_symptoms_fire_in_either_word_order() {
        let classifier = EmergencyClassifier::default();

        for utterance in [
            "my chest is really tight",
            "there's a tightness in my chest",
            "a crushing feeling in the chest",
            "I think it's a heartattack",
        ] {
            assert!(classifier.classify(utterance).is_emergency(), "{utterance}");
        }
    }

    #[test]
    fn pill_overdose_paraphrases_fire() {
        let classifier = EmergencyClassifier::default();

        assert!(classifier.classify("I took too many pills").is_emergency());
        assert!(classifier.classify("she swallowed a whole bottle of pills").is_emergency());
        assert!(classifier.classify("I took too many of my sleeping tablets").is_emergency());
    }

    #[test]
    fn suicidal_ideation_and_self_harm_fire() {
        let classifier = EmergencyClassifier::default();

        assert!(classifier.classify("sometimes I want to die").is_emergency());
        assert!(classifier.classify("I've been thinking about self-harm").is_emergency());
        assert!(classifier.classify("I feel suicidal").is_emergency());
    }

    #[test]
    fn routine_requests_do_not_fire() {
        let classifier = EmergencyClassifier::default();

        assert_eq!(classifier.classify("I need to book a checkup"), Classification::None);
        assert_eq!(classifier.classify("what are your hours"), Classification::None);
        assert_eq!(classifier.classify(""), Classification::None);
        assert_eq!(classifier.classify("my zip is 91150"), Classification::None);
    }

    #[test]
    fn streaming_scanner_catches_phrase_split_across_partials() {
        let mut scanner = StreamingScanner::new(EmergencyClassifier::default());

        assert_eq!(scanner.scan("I have really bad chest", false), Classification::None);
        assert!(scanner.scan("pain since this morning", false).is_emergency());
    }

    #[test]
    fn streaming_scanner_resets_after_final_fragment() {
        let mut scanner = StreamingScanner::new(EmergencyClassifier::default());

        assert_eq!(scanner.scan("my chest", true), Classification::None);
        assert_eq!(scanner.scan("pain reliever refill please", true), Classification::None);
    }
}
