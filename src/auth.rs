use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{Db, AUTH_KEY};
use crate::error::StoreError;
use crate::models::{AuthSession, TokenPair, UserProfile};

/// The signed-in user and their token pair, persisted as a single cell.
///
/// Learner ids are derived from the lowercased email, so signing in again with
/// the same address maps to the same learner.
#[derive(Clone)]
pub struct AuthStore {
    cells: Db,
    clock: Clock,
}

impl AuthStore {
    pub fn new(cells: Db, clock: Clock) -> Self {
        Self { cells, clock }
    }

    pub fn learner_id_for(email: &str) -> String {
        let normalized = email.trim().to_ascii_lowercase();
        Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized.as_bytes()).to_string()
    }

    /// Replaces any existing session with a fresh one for `email`.
    pub fn sign_in(&self, email: &str, name: Option<&str>) -> Result<AuthSession, StoreError> {
        let email = email.trim();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_owned());
        let session = AuthSession {
            user: UserProfile {
                id: Self::learner_id_for(email),
                email: email.to_owned(),
                name,
            },
            tokens: TokenPair {
                access_token: Uuid::new_v4().to_string(),
                refresh_token: Uuid::new_v4().to_string(),
            },
            signed_in_at: self.clock.now(),
        };
        self.cells.save(AUTH_KEY, &serde_json::to_string(&session)?)?;
        tracing::info!(learner_id = %session.user.id, "signed in");
        Ok(session)
    }

    pub fn session(&self) -> Result<Option<AuthSession>, StoreError> {
        let Some(raw) = self.cells.load(AUTH_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable auth cell, treating as signed out");
                Ok(None)
            }
        }
    }

    /// Resolves a bearer access token to the signed-in user.
    pub fn authenticate(&self, access_token: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .session()?
            .filter(|s| s.tokens.access_token == access_token)
            .map(|s| s.user))
    }

    /// Clears the session and returns the user who was signed in, if any.
    pub fn sign_out(&self) -> Result<Option<UserProfile>, StoreError> {
        let user = self.session()?.map(|s| s.user);
        self.cells.remove(AUTH_KEY)?;
        if let Some(u) = &user {
            tracing::info!(learner_id = %u.id, "signed out");
        }
        Ok(user)
    }
}
