//! Single-use challenge issuance
//!
//! Challenges are random byte strings handed to the client base64-encoded.
//! A challenge validates at most one attestation or assertion and only while
//! it is younger than the configured time-to-live. Consumed entries are kept
//! until their TTL elapses so a replayed value reports `AlreadyUsed` rather
//! than `NotFound`.
//!
//! A challenge issued for a session is bound to it: a caller that names a
//! session can only redeem challenges issued for that same session.

use crate::utils::crypto::generate_random_bytes;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Number of random bytes in an issued challenge
pub const CHALLENGE_LEN: usize = 32;

/// Default lifetime of an issued challenge
pub const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChallengeError {
    #[error("challenge was never issued")]
    NotFound,
    #[error("challenge has expired")]
    Expired,
    #[error("challenge has already been used")]
    AlreadyUsed,
    #[error("challenge was issued for another session")]
    SessionMismatch,
    #[error("random source unavailable")]
    RandomUnavailable,
}

/// A freshly issued challenge
#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub id: String,
    /// Standard base64 of the random challenge bytes
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingChallenge {
    id: String,
    created_at: DateTime<Utc>,
    session_id: Option<String>,
    used: bool,
}

/// Issues challenges and enforces their single-use lifecycle
#[derive(Debug)]
pub struct ChallengeIssuer {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingChallenge>>,
}

impl ChallengeIssuer {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a new challenge, optionally correlated with a client session
    ///
    /// # Errors
    ///
    /// Returns `RandomUnavailable` if the system random source fails
    pub fn issue(&self, session_id: Option<&str>) -> Result<Challenge, ChallengeError> {
        let bytes =
            generate_random_bytes(CHALLENGE_LEN).map_err(|_| ChallengeError::RandomUnavailable)?;
        Ok(self.insert_at(STANDARD.encode(bytes), session_id, Utc::now()))
    }

    /// Register a caller-supplied challenge value, used by fixtures that need
    /// a well-known challenge
    #[cfg(any(test, feature = "testing"))]
    pub fn issue_fixed(&self, value: &str, session_id: Option<&str>) -> Challenge {
        self.insert_at(value.to_string(), session_id, Utc::now())
    }

    fn insert_at(&self, value: String, session_id: Option<&str>, now: DateTime<Utc>) -> Challenge {
        let id = uuid::Uuid::new_v4().to_string();
        let mut pending = self.lock();
        self.purge_expired(&mut pending, now);
        pending.insert(
            value.clone(),
            PendingChallenge {
                id: id.clone(),
                created_at: now,
                session_id: session_id.map(ToString::to_string),
                used: false,
            },
        );
        log::debug!("Issued challenge {id} ({} pending)", pending.len());

        Challenge {
            id,
            value,
            created_at: now,
            expires_at: now + self.ttl,
            session_id: session_id.map(ToString::to_string),
        }
    }

    /// Check that a challenge would currently be accepted, without consuming it
    ///
    /// # Errors
    ///
    /// Returns the reason the challenge would be rejected
    pub fn check(&self, value: &str) -> Result<(), ChallengeError> {
        self.check_entry(value, None, Utc::now())
    }

    /// Check a challenge on behalf of a caller that names its session
    ///
    /// # Errors
    ///
    /// Returns the reason the challenge would be rejected, including
    /// `SessionMismatch`
    pub fn check_in_session(
        &self,
        value: &str,
        session_id: Option<&str>,
    ) -> Result<(), ChallengeError> {
        self.check_entry(value, session_id, Utc::now())
    }

    #[cfg(test)]
    fn check_at(&self, value: &str, now: DateTime<Utc>) -> Result<(), ChallengeError> {
        self.check_entry(value, None, now)
    }

    fn check_entry(
        &self,
        value: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ChallengeError> {
        let pending = self.lock();
        let entry = pending.get(value).ok_or(ChallengeError::NotFound)?;
        self.state_of(entry, session_id, now)
    }

    /// Atomically mark a challenge as used; exactly one concurrent caller succeeds
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Expired` or `AlreadyUsed`
    pub fn consume(&self, value: &str) -> Result<(), ChallengeError> {
        self.consume_entry(value, None, Utc::now())
    }

    /// Consume a challenge on behalf of a caller that names its session
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Expired`, `AlreadyUsed` or `SessionMismatch`
    pub fn consume_in_session(
        &self,
        value: &str,
        session_id: Option<&str>,
    ) -> Result<(), ChallengeError> {
        self.consume_entry(value, session_id, Utc::now())
    }

    #[cfg(test)]
    fn consume_at(&self, value: &str, now: DateTime<Utc>) -> Result<(), ChallengeError> {
        self.consume_entry(value, None, now)
    }

    fn consume_entry(
        &self,
        value: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ChallengeError> {
        let mut pending = self.lock();
        let entry = pending.get_mut(value).ok_or(ChallengeError::NotFound)?;
        match self.state_of(entry, session_id, now) {
            Ok(()) => {
                entry.used = true;
                log::debug!("Consumed challenge {}", entry.id);
                Ok(())
            }
            Err(ChallengeError::Expired) => {
                pending.remove(value);
                Err(ChallengeError::Expired)
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn state_of(
        &self,
        entry: &PendingChallenge,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ChallengeError> {
        if entry.used {
            Err(ChallengeError::AlreadyUsed)
        } else if now - entry.created_at >= self.ttl {
            Err(ChallengeError::Expired)
        } else if session_id.is_some() && session_id != entry.session_id.as_deref() {
            Err(ChallengeError::SessionMismatch)
        } else {
            Ok(())
        }
    }

    fn purge_expired(&self, pending: &mut HashMap<String, PendingChallenge>, now: DateTime<Utc>) {
        let ttl = self.ttl;
        pending.retain(|_, entry| now - entry.created_at < ttl);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingChallenge>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ChallengeIssuer {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_CHALLENGE_TTL_SECONDS))
    }
}
