//! Session identifier allocation.
//!
//! The registry is shared between the engine, which reserves ids for new
//! connections, and the dispatcher, which moves them through
//! `Reserved -> Live -> Retiring` and finally frees them. An id is only handed
//! out again once it is free, so a late event for a destroyed session can never
//! be mistaken for a new one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::trace;

use super::session::SessionId;
use super::SessionState;
use crate::error_handling::types::SessionError;

pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

#[derive(Debug)]
pub struct SessionRegistry {
    states: HashMap<SessionId, SessionState>,
    next_id: u32,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            states: HashMap::new(),
            next_id: 1,
            max_sessions,
        }
    }

    pub fn shared(max_sessions: usize) -> SharedRegistry {
        Arc::new(Mutex::new(Self::new(max_sessions)))
    }

    /// Reserves the next free identifier.
    ///
    /// Ids are handed out in increasing order and wrap around, skipping `0`
    /// and every id that is still reserved, live or retiring.
    pub fn allocate(&mut self) -> Result<SessionId, SessionError> {
        if self.active_count() >= self.max_sessions {
            return Err(SessionError::SessionLimitReached(self.max_sessions));
        }

        // at most `states.len()` candidates can be taken
        for _ in 0..=self.states.len() {
            let candidate = SessionId::new(self.next_id);
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };

            if !self.states.contains_key(&candidate) {
                self.states.insert(candidate, SessionState::Reserved);
                trace!("Reserved session id {}", candidate);
                return Ok(candidate);
            }
        }

        Err(SessionError::IdSpaceExhausted)
    }

    /// Marks a session live. Accepts reserved ids and ids the registry never
    /// saw (engines that assign ids on their own).
    pub fn activate(&mut self, id: SessionId) -> Result<(), SessionError> {
        match self.states.get(&id).copied() {
            None | Some(SessionState::Reserved) => {
                self.states.insert(id, SessionState::Live);
                Ok(())
            }
            other => Err(SessionError::InvalidTransition {
                session_id: id,
                from: other,
                to: SessionState::Live,
            }),
        }
    }

    pub fn begin_retire(&mut self, id: SessionId) -> Result<(), SessionError> {
        match self.states.get(&id).copied() {
            Some(SessionState::Live) => {
                self.states.insert(id, SessionState::Retiring);
                Ok(())
            }
            other => Err(SessionError::InvalidTransition {
                session_id: id,
                from: other,
                to: SessionState::Retiring,
            }),
        }
    }

    /// Frees a retiring id once every consumer of its destruction record is done.
    pub fn release(&mut self, id: SessionId) -> Result<(), SessionError> {
        match self.states.get(&id) {
            Some(SessionState::Retiring) => {
                self.states.remove(&id);
                trace!("Released session id {}", id);
                Ok(())
            }
            Some(_) => Err(SessionError::InvalidTransition {
                session_id: id,
                from: self.states.get(&id).copied(),
                to: SessionState::Retiring,
            }),
            None => Err(SessionError::NotFound(id)),
        }
    }

    /// Drops a reservation whose connection never produced a creation record.
    pub fn cancel(&mut self, id: SessionId) -> Result<(), SessionError> {
        match self.states.get(&id) {
            Some(SessionState::Reserved) => {
                self.states.remove(&id);
                Ok(())
            }
            Some(_) => Err(SessionError::InvalidTransition {
                session_id: id,
                from: self.states.get(&id).copied(),
                to: SessionState::Reserved,
            }),
            None => Err(SessionError::NotFound(id)),
        }
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.states.get(&id).copied()
    }

    pub fn is_live(&self, id: SessionId) -> bool {
        self.state(id) == Some(SessionState::Live)
    }

    pub fn live_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .states
            .iter()
            .filter(|(_, state)| **state == SessionState::Live)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Reserved plus live sessions; retiring ids do not count against the limit.
    pub fn active_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s != SessionState::Retiring)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic_from_one() {
        let mut registry = SessionRegistry::new(8);

        assert_eq!(registry.allocate().unwrap(), SessionId::new(1));
        assert_eq!(registry.allocate().unwrap(), SessionId::new(2));
        assert_eq!(registry.state(SessionId::new(2)), Some(SessionState::Reserved));
    }

    #[test]
    fn retiring_id_is_not_reused_until_released() {
        let mut registry = SessionRegistry::new(8);
        registry.next_id = u32::MAX;

        let first = registry.allocate().unwrap();
        assert_eq!(first, SessionId::new(u32::MAX));
        registry.activate(first).unwrap();
        registry.begin_retire(first).unwrap();

        // wraps to 1, never hands out 0
        assert_eq!(registry.allocate().unwrap(), SessionId::new(1));

        registry.next_id = u32::MAX;
        let next = registry.allocate().unwrap();
        assert_ne!(next, first);
        assert_eq!(next, SessionId::new(2));

        registry.release(first).unwrap();
        registry.next_id = u32::MAX;
        assert_eq!(registry.allocate().unwrap(), first);
    }

    #[test]
    fn limit_counts_reserved_and_live_only() {
        let mut registry = SessionRegistry::new(2);
        let a = registry.allocate().unwrap();
        let _b = registry.allocate().unwrap();

        assert_eq!(
            registry.allocate(),
            Err(SessionError::SessionLimitReached(2))
        );

        registry.activate(a).unwrap();
        registry.begin_retire(a).unwrap();
        assert!(registry.allocate().is_ok());
    }

    #[test]
    fn second_activation_is_rejected() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.allocate().unwrap();
        registry.activate(id).unwrap();

        let err = registry.activate(id).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                session_id: id,
                from: Some(SessionState::Live),
                to: SessionState::Live,
            }
        );
    }

    #[test]
    fn unknown_id_can_be_activated_directly() {
        let mut registry = SessionRegistry::new(4);
        registry.activate(SessionId::new(40)).unwrap();

        assert!(registry.is_live(SessionId::new(40)));
        assert_eq!(registry.live_ids(), vec![SessionId::new(40)]);
    }

    #[test]
    fn retire_requires_live_session() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.allocate().unwrap();

        assert!(registry.begin_retire(id).is_err());
        registry.cancel(id).unwrap();
        assert_eq!(registry.state(id), None);
        assert_eq!(registry.release(id), Err(SessionError::NotFound(id)));
    }
}
