use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

// Consider the access token expired ahead of the reported expiration time, so
// a request started right at the boundary does not hit the server with a
// token that dies in flight.
const EXPIRATION_TIME_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    pub id: Arc<str>,
    #[serde(default)]
    pub email: Option<Arc<str>>,
}

/// Authenticated identity issued by the backend.  Replaced wholesale on every
/// auth event, never mutated in place.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: UserProfile,
}

impl Session {
    pub fn user_id(&self) -> Arc<str> {
        self.user.id.clone()
    }

    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        self.expires_at.saturating_sub(now) < EXPIRATION_TIME_THRESHOLD.as_secs() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_expiring_at(expires_at: i64) -> Session {
        Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at,
            user: UserProfile {
                id: "user-1".into(),
                email: None,
            },
        }
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn session_expires_ahead_of_deadline() {
        assert!(session_expiring_at(now_secs() + 30).is_expired());
        assert!(session_expiring_at(now_secs() - 10).is_expired());
        assert!(!session_expiring_at(now_secs() + 3600).is_expired());
    }
}
