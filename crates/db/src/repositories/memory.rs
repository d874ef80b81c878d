use std::collections::HashMap;

use tokio::sync::RwLock;

use frontdesk_core::domain::session::{Session, SessionId};
use frontdesk_core::outcome::CallOutcome;

use super::{RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.id.0.clone()).or_insert_with(|| session.clone());
        Ok(())
    }

    async fn list_by_outcome(
        &self,
        outcome: CallOutcome,
        limit: u32,
    ) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<Session> =
            sessions.values().filter(|session| session.outcome == Some(outcome)).cloned().collect();
        matching.sort_by(|left, right| right.started_at.cmp(&left.started_at));
        matching.truncate(limit.max(1) as usize);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use frontdesk_core::domain::session::{Session, SessionId};
    use frontdesk_core::domain::slot::ProviderId;
    use frontdesk_core::outcome::CallOutcome;

    use super::InMemorySessionRepository;
    use crate::repositories::SessionRepository;

    #[tokio::test]
    async fn in_memory_repo_keeps_first_write() {
        let repo = InMemorySessionRepository::default();
        let mut session =
            Session::new(SessionId("call-1".to_string()), ProviderId("p".to_string()), Utc::now());
        session.seal(CallOutcome::Answered, Utc::now()).expect("seal");
        repo.save(&session).await.expect("save");

        let mut altered = session.clone();
        altered.outcome = Some(CallOutcome::Abandoned);
        repo.save(&altered).await.expect("save again");

        let loaded = repo.find_by_id(&session.id).await.expect("find").expect("exists");
        assert_eq!(loaded.outcome, Some(CallOutcome::Answered));
        assert_eq!(repo.list_by_outcome(CallOutcome::Answered, 5).await.expect("list").len(), 1);
    }
}
