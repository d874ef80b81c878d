use serde::{Deserialize, Serialize};

use crate::text::normalize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub topic: String,
    pub keywords: Vec<String>,
    pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KnowledgeAnswer {
    Found { topic: String, answer: String },
    NotFound { suggestion: String },
}

/// Keyword-scored practice FAQ. Public information only.
#[derive(Clone, Debug)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::practice_faq()
    }
}

impl KnowledgeBase {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    pub fn practice_faq() -> Self {
        let entry = |topic: &str, keywords: &[&str], answer: &str| KnowledgeEntry {
            topic: topic.to_owned(),
            keywords: keywords.iter().map(|keyword| (*keyword).to_owned()).collect(),
            answer: answer.to_owned(),
        };
        Self::new(vec![
            entry(
                "hours",
                &["hours", "open", "close", "closed", "weekend", "saturday", "sunday", "time"],
                "We are open Monday through Friday from 8:00 AM to 5:00 PM. We are closed on weekends.",
            ),
            entry(
                "location",
                &["location", "address", "where", "located", "directions", "building", "suite"],
                "We are located at 123 Valley Blvd, Suite 200, within the Medical Arts Building.",
            ),
            entry(
                "phone",
                &["phone", "number", "call", "fax"],
                "Our phone number is (555) 867-5309.",
            ),
            entry(
                "insurance",
                &["insurance", "accept", "plan", "aetna", "cigna", "medicare", "blue", "united", "coverage"],
                "We accept most major insurance plans including Aetna, Blue Cross, United Healthcare, Cigna, and Medicare.",
            ),
            entry(
                "new_patient",
                &["new", "first", "bring", "paperwork", "early", "id", "card"],
                "New patients should arrive 15 minutes early and bring their photo ID and insurance card.",
            ),
            entry(
                "cancellation",
                &["cancel", "cancellation", "reschedule", "notice", "fee", "missed"],
                "We require 24 hours notice for cancellations to avoid a missed appointment fee.",
            ),
            entry(
                "parking",
                &["parking", "park", "garage", "car"],
                "Free parking is available in the garage behind the building.",
            ),
        ])
    }

    /// Best entry by keyword hits; ties go to the earlier entry.
    pub fn search(&self, query: &str) -> KnowledgeAnswer {
        let normalized = normalize(query);
        let tokens: Vec<&str> = normalized.split(' ').filter(|token| !token.is_empty()).collect();

        let best = self
            .entries
            .iter()
            .map(|entry| {
                let hits = entry
                    .keywords
                    .iter()
                    .filter(|keyword| tokens.iter().any(|token| token_matches(token, keyword)))
                    .count();
                (hits, entry)
            })
            .filter(|(hits, _)| *hits > 0)
            .fold(None::<(usize, &KnowledgeEntry)>, |best, candidate| match best {
                Some((hits, _)) if hits >= candidate.0 => best,
                _ => Some(candidate),
            });

        match best {
            Some((_, entry)) => {
                KnowledgeAnswer::Found { topic: entry.topic.clone(), answer: entry.answer.clone() }
            }
            None => KnowledgeAnswer::NotFound {
                suggestion: "I don't have that information. I can connect you with our staff."
                    .to_owned(),
            },
        }
    }
}

/// Whole-word match, plus simple plurals ("hours" for "hour").
fn token_matches(token: &str, keyword: &str) -> bool {
    token == keyword || token.strip_suffix('s') == Some(keyword) || keyword.strip_suffix('s') == Some(token)
}

#[cfg(test)]
mod tests {
    use super::{KnowledgeAnswer, KnowledgeBase};

    fn topic(answer: KnowledgeAnswer) -> Option<String> {
        match answer {
            KnowledgeAnswer::Found { topic, .. } => Some(topic),
            KnowledgeAnswer::NotFound { .. } => None,
        }
    }

    #[test]
    fn answers_common_questions() {
        let kb = KnowledgeBase::default();

        assert_eq!(topic(kb.search("What are your hours on Saturday?")).as_deref(), Some("hours"));
        assert_eq!(topic(kb.search("Where are you located?")).as_deref(), Some("location"));
        assert_eq!(topic(kb.search("Do you take Aetna insurance?")).as_deref(), Some("insurance"));
        assert_eq!(topic(kb.search("is there parking")).as_deref(), Some("parking"));
    }

    #[test]
    fn unknown_question_offers_transfer() {
        let answer = KnowledgeBase::default().search("should I double my blood pressure pills");

        assert!(matches!(
            answer,
            KnowledgeAnswer::NotFound { ref suggestion } if suggestion.contains("staff")
        ));
    }
}
