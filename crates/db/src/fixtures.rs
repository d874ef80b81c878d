use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Utc, Weekday};

use frontdesk_core::domain::record::{ContactInfo, Coverage, CoverageStatus, Record, RecordId};
use frontdesk_core::domain::slot::{Provider, ProviderId, Slot, SlotId, SlotStatus, VisitType};
use frontdesk_core::scheduling::PracticeClock;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlAvailabilityStore};

const DEMO_PROVIDERS: &[(&str, &str)] = &[
    ("dr-chen", "Dr. Sarah Chen"),
    ("dr-patel", "Dr. Michael Patel"),
    ("dr-okafor", "Dr. Grace Okafor"),
];

const DEMO_RECORDS: &[(&str, &str, &str, &str)] = &[
    ("rec-1001", "Jordan Rivera", "1985-04-12", "+15550101001"),
    ("rec-1002", "Maria Gonzalez", "1972-11-03", "+15550101002"),
    ("rec-1003", "Maria Gonzales", "1990-06-21", "+15550101003"),
    ("rec-1004", "Robert Kim", "1958-01-30", "+15550101004"),
];

const FIRST_HOUR: u32 = 9;
const LAST_HOUR: u32 = 17;
const SLOT_MINUTES: i64 = 30;

/// Deterministic practice data for local runs: three providers, half-hour
/// slots on weekdays between 9 AM and 5 PM practice time, and a handful of
/// caller records.
pub struct DemoPractice;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub providers_seeded: usize,
    pub slots_seeded: usize,
}

impl DemoPractice {
    pub fn providers() -> Vec<Provider> {
        DEMO_PROVIDERS
            .iter()
            .map(|(id, name)| Provider {
                id: ProviderId((*id).to_string()),
                display_name: (*name).to_string(),
            })
            .collect()
    }

    pub fn records() -> Vec<Record> {
        DEMO_RECORDS
            .iter()
            .filter_map(|(id, name, dob, phone)| {
                let date_of_birth = NaiveDate::parse_from_str(dob, "%Y-%m-%d").ok()?;
                Some(Record {
                    id: RecordId((*id).to_string()),
                    full_name: (*name).to_string(),
                    date_of_birth,
                    contact: ContactInfo { phone: Some((*phone).to_string()), email: None },
                    insurance_ref: Some(format!("plan-{id}")),
                })
            })
            .collect()
    }

    pub fn coverages() -> Vec<Coverage> {
        DEMO_RECORDS
            .iter()
            .enumerate()
            .map(|(index, (id, ..))| Coverage {
                record_id: RecordId((*id).to_string()),
                plan_id: format!("plan-{id}"),
                payor: ["Aetna", "Blue Cross", "Cigna", "Medicare"][index % 4].to_string(),
                status: if index == 3 { CoverageStatus::Inactive } else { CoverageStatus::Active },
            })
            .collect()
    }

    /// Slots for `days` calendar days starting at `first_day`. Visit types
    /// rotate so every kind of visit has some capacity.
    pub fn slots(first_day: NaiveDate, days: u32, clock: &PracticeClock) -> Vec<Slot> {
        let visit_types =
            [VisitType::Routine, VisitType::Checkup, VisitType::Urgent, VisitType::Followup];
        let mut slots = Vec::new();

        for (provider_index, (provider_id, _)) in DEMO_PROVIDERS.iter().enumerate() {
            for offset in 0..days {
                let Some(day) = first_day.checked_add_days(Days::new(u64::from(offset)))
                else {
                    continue;
                };
                if matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                    continue;
                }

                let opening = clock.start_of(day) + Duration::hours(i64::from(FIRST_HOUR));
                let per_day = i64::from(LAST_HOUR - FIRST_HOUR) * 60 / SLOT_MINUTES;
                for index in 0..per_day {
                    let start: DateTime<Utc> = opening + Duration::minutes(index * SLOT_MINUTES);
                    let rotation = (provider_index + index as usize) % visit_types.len();
                    slots.push(Slot {
                        id: SlotId(format!(
                            "{provider_id}-{}-{}",
                            day.format("%Y%m%d"),
                            start.with_timezone(&clock.offset).time().format("%H%M")
                        )),
                        provider_id: ProviderId((*provider_id).to_string()),
                        start,
                        end: start + Duration::minutes(SLOT_MINUTES),
                        visit_type: visit_types[rotation],
                        status: SlotStatus::Open,
                        booked_by: None,
                    });
                }
            }
        }
        slots
    }

    /// Writes providers and slots. Re-running is safe: existing slots keep
    /// their booking state.
    pub async fn load(
        pool: &DbPool,
        first_day: NaiveDate,
        days: u32,
        clock: &PracticeClock,
    ) -> Result<SeedResult, RepositoryError> {
        let store = SqlAvailabilityStore::new(pool.clone());
        let providers = Self::providers();
        for provider in &providers {
            store.upsert_provider(provider).await?;
        }

        let mut slots_seeded = 0;
        for slot in Self::slots(first_day, days, clock) {
            if store.insert_slot(&slot).await? {
                slots_seeded += 1;
            }
        }

        Ok(SeedResult { providers_seeded: providers.len(), slots_seeded })
    }
}

/// Today's date on the practice clock.
pub fn practice_today(clock: &PracticeClock) -> NaiveDate {
    Utc::now().with_timezone(&clock.offset).date_naive()
}
