//! Storage boundaries
//!
//! The engine never talks to a database. It reads observations through
//! [`ObservationSource`] and calibration state through [`CalibrationStore`];
//! the host wires real adapters behind these traits. [`InMemoryStore`]
//! implements both for tests and the simulator.

use crate::calibration::{CalibrationError, UserCalibrationState};
use crate::observation::{Observation, UserId};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Ordered observations for one user
///
/// A user with nothing logged yields an empty list, not an error.
pub trait ObservationSource: Send + Sync {
    fn observations(&self, user: UserId) -> Result<Vec<Observation>, StoreError>;
}

/// Key-value persistence of calibration state
pub trait CalibrationStore: Send + Sync {
    /// `Ok(None)` when the user has no state yet
    fn get(&self, user: UserId) -> Result<Option<UserCalibrationState>, StoreError>;

    fn put(&self, state: &UserCalibrationState) -> Result<(), StoreError>;

    /// Stored state, or fresh defaults for a new user
    fn get_or_default(&self, user: UserId) -> Result<UserCalibrationState, StoreError> {
        Ok(self
            .get(user)?
            .unwrap_or_else(|| UserCalibrationState::new(user)))
    }
}

/// Calibration state is held in its encoded form, as a persistent store would hold it
#[derive(Debug, Default)]
pub struct InMemoryStore {
    observations: RwLock<HashMap<UserId, Vec<Observation>>>,
    calibration: RwLock<HashMap<UserId, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, user: UserId, observation: Observation) -> Result<(), StoreError> {
        let mut guard = self
            .observations
            .write()
            .map_err(|_| StoreError::Backend("observation lock poisoned".to_string()))?;
        guard.entry(user).or_default().push(observation);
        Ok(())
    }

    pub fn extend(
        &self,
        user: UserId,
        observations: impl IntoIterator<Item = Observation>,
    ) -> Result<(), StoreError> {
        let mut guard = self
            .observations
            .write()
            .map_err(|_| StoreError::Backend("observation lock poisoned".to_string()))?;
        guard.entry(user).or_default().extend(observations);
        Ok(())
    }
}

impl ObservationSource for InMemoryStore {
    fn observations(&self, user: UserId) -> Result<Vec<Observation>, StoreError> {
        let guard = self
            .observations
            .read()
            .map_err(|_| StoreError::Backend("observation lock poisoned".to_string()))?;
        let mut observations = guard.get(&user).cloned().unwrap_or_default();
        observations.sort_by_key(|o| (o.date, o.recorded_at));
        Ok(observations)
    }
}

impl CalibrationStore for InMemoryStore {
    fn get(&self, user: UserId) -> Result<Option<UserCalibrationState>, StoreError> {
        let guard = self
            .calibration
            .read()
            .map_err(|_| StoreError::Backend("calibration lock poisoned".to_string()))?;
        match guard.get(&user) {
            Some(bytes) => Ok(Some(UserCalibrationState::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, state: &UserCalibrationState) -> Result<(), StoreError> {
        let bytes = state.to_bytes()?;
        let mut guard = self
            .calibration
            .write()
            .map_err(|_| StoreError::Backend("calibration lock poisoned".to_string()))?;
        guard.insert(state.user_id(), bytes);
        Ok(())
    }
}
