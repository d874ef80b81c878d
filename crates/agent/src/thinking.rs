//! Short filler lines spoken while a tool call is in flight, so the caller
//! does not hear dead air.

use std::collections::HashMap;

use frontdesk_core::ToolKind;

const VERIFY_IDENTITY: &[&str] = &[
    "Let me pull up your records real quick.",
    "One moment while I look you up in our system.",
    "Let me verify that for you.",
    "Pulling up your information now.",
];

const SEARCH_KNOWLEDGE_BASE: &[&str] = &[
    "Let me check on that for you.",
    "One moment, I'm looking that up.",
    "Sure, give me just a second.",
    "Let me look into that.",
];

const LIST_PROVIDERS: &[&str] = &[
    "Let me see who's available.",
    "One moment while I check our providers.",
    "Let me pull up our provider list.",
];

const GET_AVAILABILITY: &[&str] = &[
    "Let me check what we have available.",
    "One moment while I look at the schedule.",
    "Let me see what times are open.",
    "Sure, pulling up the calendar now.",
];

const BOOK_APPOINTMENT: &[&str] = &[
    "Let me get that booked for you.",
    "One moment while I confirm that slot.",
    "Sure, I'm scheduling that right now.",
    "Getting that appointment set up now.",
];

const CHECK_INSURANCE: &[&str] = &[
    "Let me verify your coverage.",
    "One moment while I check your plan.",
    "Pulling up your insurance information.",
];

/// Phrase pool for a tool. Transfers and hang-ups speak their own lines.
pub fn phrase_pool(kind: ToolKind) -> &'static [&'static str] {
    match kind {
        ToolKind::VerifyIdentity => VERIFY_IDENTITY,
        ToolKind::SearchKnowledgeBase => SEARCH_KNOWLEDGE_BASE,
        ToolKind::ListProviders => LIST_PROVIDERS,
        ToolKind::GetAvailability => GET_AVAILABILITY,
        ToolKind::BookAppointment => BOOK_APPOINTMENT,
        ToolKind::CheckInsurance => CHECK_INSURANCE,
        ToolKind::TransferToStaff | ToolKind::EndCall => &[],
    }
}

/// Per-call rotation through each pool, so a phrase does not repeat until the
/// pool for that tool is used up.
#[derive(Debug, Default)]
pub struct ThinkingPhrases {
    next: HashMap<ToolKind, usize>,
}

impl ThinkingPhrases {
    pub fn next(&mut self, kind: ToolKind) -> Option<&'static str> {
        let pool = phrase_pool(kind);
        if pool.is_empty() {
            return None;
        }
        let turn = self.next.entry(kind).or_insert(0);
        let phrase = pool[*turn % pool.len()];
        *turn += 1;
        Some(phrase)
    }
}
