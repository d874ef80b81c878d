use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::record::{Coverage, Record, RecordId};
use crate::text::{edit_distance, normalize, similarity_pct};

/// Whole-name similarity at or above this counts as the same name.
pub const NAME_SIMILARITY_THRESHOLD_PCT: u8 = 80;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("record system timed out")]
    Timeout,
    #[error("record system unavailable: {0}")]
    Unavailable(String),
    #[error("record system rejected the request: {0}")]
    Rejected(String),
}

impl LookupError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMatch {
    pub record_id: RecordId,
    pub similarity_pct: u8,
    pub exact_name: bool,
}

/// Record system boundary. Candidates are already filtered on exact date of
/// birth; the gate decides whether the candidate set is confident.
#[async_trait]
pub trait RecordLookup: Send + Sync {
    async fn find_candidates(
        &self,
        claimed_name: &str,
        date_of_birth: NaiveDate,
    ) -> Result<Vec<RecordMatch>, LookupError>;

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, LookupError>;

    async fn coverage(
        &self,
        id: &RecordId,
        plan_id: &str,
    ) -> Result<Option<Coverage>, LookupError>;
}

/// Scores a claimed name against a stored one. `None` means no match.
///
/// A claim must name at least as many words as the stored name, up to two,
/// so a lone surname or a single letter never identifies anyone.
pub fn match_name(claimed: &str, stored: &str) -> Option<(u8, bool)> {
    let claimed = normalize(claimed);
    let stored = normalize(stored);
    if claimed.is_empty() || stored.is_empty() {
        return None;
    }
    if claimed == stored {
        return Some((100, true));
    }

    let claimed_words = claimed.split(' ').count();
    let stored_words = stored.split(' ').count();
    if claimed_words < stored_words.min(2) {
        return None;
    }

    let similarity = similarity_pct(&claimed, &stored);
    if similarity >= NAME_SIMILARITY_THRESHOLD_PCT || tokens_match(&claimed, &stored) {
        return Some((similarity, false));
    }
    None
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TokenMatch {
    Full,
    Initial,
}

fn token_match(token: &str, candidate: &str) -> Option<TokenMatch> {
    let length = token.chars().count();
    if length == 1 {
        return candidate.starts_with(token).then_some(TokenMatch::Initial);
    }
    let full = token == candidate
        || (length >= MIN_FUZZY_TOKEN_LEN && candidate.starts_with(token))
        || (length >= MIN_FUZZY_TOKEN_LEN
            && candidate.chars().count() >= MIN_FUZZY_TOKEN_LEN
            && edit_distance(token, candidate) <= 1);
    full.then_some(TokenMatch::Full)
}

/// Shortest claimed word that may match by prefix or by one edit.
const MIN_FUZZY_TOKEN_LEN: usize = 3;

/// Each claimed word pairs with a distinct stored word as a whole word,
/// a prefix of at least three letters ("Kat" for "Katherine"), one edit, or
/// a first-name initial. The stored surname must pair as a whole word.
fn tokens_match(claimed: &str, stored: &str) -> bool {
    let stored_tokens: Vec<&str> = stored.split(' ').collect();
    let mut used: Vec<Option<TokenMatch>> = vec![None; stored_tokens.len()];

    for token in claimed.split(' ') {
        let paired = stored_tokens
            .iter()
            .enumerate()
            .filter(|(index, _)| used[*index].is_none())
            .find_map(|(index, candidate)| token_match(token, candidate).map(|kind| (index, kind)));
        match paired {
            Some((index, kind)) => used[index] = Some(kind),
            None => return false,
        }
    }

    used.last().copied().flatten() == Some(TokenMatch::Full)
}

#[derive(Default)]
pub struct InMemoryRecordLookup {
    records: RwLock<HashMap<RecordId, Record>>,
    coverages: RwLock<HashMap<RecordId, Coverage>>,
}

impl InMemoryRecordLookup {
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records = records.into_iter().map(|record| (record.id.clone(), record)).collect();
        Self { records: RwLock::new(records), coverages: RwLock::new(HashMap::new()) }
    }

    pub async fn insert(&self, record: Record) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn insert_coverage(&self, coverage: Coverage) {
        self.coverages.write().await.insert(coverage.record_id.clone(), coverage);
    }
}

#[async_trait]
impl RecordLookup for InMemoryRecordLookup {
    async fn find_candidates(
        &self,
        claimed_name: &str,
        date_of_birth: NaiveDate,
    ) -> Result<Vec<RecordMatch>, LookupError> {
        let records = self.records.read().await;
        let mut matches: Vec<RecordMatch> = records
            .values()
            .filter(|record| record.date_of_birth == date_of_birth)
            .filter_map(|record| {
                match_name(claimed_name, &record.full_name).map(|(similarity_pct, exact_name)| {
                    RecordMatch { record_id: record.id.clone(), similarity_pct, exact_name }
                })
            })
            .collect();
        matches.sort_by(|left, right| {
            right.similarity_pct.cmp(&left.similarity_pct).then(left.record_id.cmp(&right.record_id))
        });
        Ok(matches)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, LookupError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn coverage(
        &self,
        id: &RecordId,
        plan_id: &str,
    ) -> Result<Option<Coverage>, LookupError> {
        let coverages = self.coverages.read().await;
        Ok(coverages.get(id).filter(|coverage| coverage.plan_id.eq_ignore_ascii_case(plan_id)).cloned())
    }
}
