use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use kcart_core::domain::order::Order;
use kcart_core::domain::user::User;

use crate::lang::LanguageTag;
use crate::llm::{ChatRole, Message};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub role: ChatRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// The multi-turn flow a session is currently inside. A session drives at
/// most one flow at a time; starting another is a conflict the engine
/// reports instead of silently switching.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ActiveFlow {
    #[default]
    Idle,
    Registration,
    Ordering(Order),
    Onboarding,
}

impl ActiveFlow {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Registration => "registration",
            Self::Ordering(_) => "ordering",
            Self::Onboarding => "onboarding",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub user: Option<User>,
    pub language: LanguageTag,
    pub flow: ActiveFlow,
    /// Pending-intent slots gathered across turns (`last_order_id`, ...).
    pub slots: BTreeMap<String, String>,
    history: VecDeque<Turn>,
    history_limit: usize,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, history_limit: usize) -> Self {
        Self {
            id,
            user: None,
            language: LanguageTag::English,
            flow: ActiveFlow::Idle,
            slots: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit: history_limit.max(2),
            last_active: Utc::now(),
        }
    }

    /// Append a turn, evicting the oldest beyond the retention bound.
    pub fn push_turn(&mut self, role: ChatRole, content: impl Into<String>) {
        self.history.push_back(Turn { role, content: content.into(), at: Utc::now() });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Retained history as model messages, oldest first.
    pub fn transcript(&self) -> Vec<Message> {
        self.history
            .iter()
            .map(|turn| Message { role: turn.role, content: turn.content.clone(), tool_name: None })
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// Shared arena of live sessions. Each session carries its own mutex so a
/// slow turn in one conversation never blocks another; the outer map lock
/// is held only for lookup.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    history_limit: usize,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(history_limit: usize, idle_timeout_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit,
            idle_timeout: Duration::seconds(idle_timeout_secs.min(i64::MAX as u64) as i64),
        }
    }

    pub async fn get_or_create(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&id.0) {
                return Arc::clone(session);
            }
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(id.0.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(id.clone(), self.history_limit)))),
        )
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle past the timeout. Sessions currently locked by a
    /// turn are skipped; they are live by definition.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();

        for (key, session) in sessions.iter() {
            if let Ok(session) = session.try_lock() {
                if now - session.last_active > self.idle_timeout {
                    expired.push(key.clone());
                }
            }
        }

        for key in &expired {
            sessions.remove(key);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Session, SessionId, SessionStore};
    use crate::llm::ChatRole;

    #[test]
    fn history_is_bounded_with_oldest_evicted_first() {
        let mut session = Session::new(SessionId("s-1".to_string()), 4);
        for i in 0..10 {
            session.push_turn(ChatRole::User, format!("turn {i}"));
        }

        assert_eq!(session.history_len(), 4);
        let first = session.history().next().expect("non-empty history");
        assert_eq!(first.content, "turn 6");
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_session_handle() {
        let store = SessionStore::new(10, 1800);
        let id = SessionId("chat-1".to_string());

        let a = store.get_or_create(&id).await;
        let b = store.get_or_create(&id).await;
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_active_ones_kept() {
        let store = SessionStore::new(10, 60);
        let stale = store.get_or_create(&SessionId("stale".to_string())).await;
        let fresh = store.get_or_create(&SessionId("fresh".to_string())).await;

        stale.lock().await.last_active = Utc::now() - Duration::seconds(3600);
        fresh.lock().await.touch();

        let evicted = store.evict_idle(Utc::now()).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.len().await, 1);
    }
}
