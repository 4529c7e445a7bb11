//! Session-scoped advisory lock table.

use crate::error::StoreResult;
use crate::types::SessionId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of an advisory-lock acquire, as reported by the store.
///
/// The numeric codes are what `APPLOCK_ACQUIRE` returns in its result row.
///
/// [`InMemoryStore`](crate::InMemoryStore) never reports `Cancelled`; it
/// is reserved for stores that can cancel a waiting request, and clients
/// must still handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStatus {
    /// Granted without waiting.
    Granted,
    /// Granted after waiting for another holder to release.
    GrantedAfterWait,
    /// The wait budget ran out.
    TimedOut,
    /// The request was cancelled before it could be granted.
    Cancelled,
    /// The request was chosen as a deadlock victim.
    Deadlock,
    /// The call itself was invalid.
    CallError,
}

impl LockStatus {
    /// Returns the status code for this outcome.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            LockStatus::Granted => 0,
            LockStatus::GrantedAfterWait => 1,
            LockStatus::TimedOut => -1,
            LockStatus::Cancelled => -2,
            LockStatus::Deadlock => -3,
            LockStatus::CallError => -999,
        }
    }

    /// Maps a status code back to an outcome.
    ///
    /// Returns `None` for codes the protocol does not define.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(LockStatus::Granted),
            1 => Some(LockStatus::GrantedAfterWait),
            -1 => Some(LockStatus::TimedOut),
            -2 => Some(LockStatus::Cancelled),
            -3 => Some(LockStatus::Deadlock),
            -999 => Some(LockStatus::CallError),
            _ => None,
        }
    }

    /// Returns true if the lock is now held by the caller.
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, LockStatus::Granted | LockStatus::GrantedAfterWait)
    }
}

#[derive(Debug)]
struct Holder {
    session: SessionId,
    depth: u32,
}

#[derive(Debug, Default)]
struct LockState {
    holders: HashMap<String, Holder>,
    /// Resource each blocked session is waiting for.
    waiting: HashMap<SessionId, String>,
}

impl LockState {
    fn grantable(&self, resource: &str, session: SessionId) -> bool {
        self.holders
            .get(resource)
            .map_or(true, |h| h.session == session)
    }

    fn try_grant(&mut self, resource: &str, session: SessionId) -> bool {
        match self.holders.get_mut(resource) {
            Some(holder) if holder.session == session => {
                holder.depth += 1;
                true
            }
            Some(_) => false,
            None => {
                self.holders
                    .insert(resource.to_string(), Holder { session, depth: 1 });
                true
            }
        }
    }

    /// Follows the waits-for chain from `resource` and reports whether it
    /// leads back to `session`.
    fn would_deadlock(&self, resource: &str, session: SessionId) -> bool {
        let mut current = resource;
        for _ in 0..=self.waiting.len() {
            let Some(holder) = self.holders.get(current) else {
                return false;
            };
            if holder.session == session {
                return true;
            }
            match self.waiting.get(&holder.session) {
                Some(next) => current = next.as_str(),
                None => return false,
            }
        }
        false
    }
}

/// Exclusive, re-entrant advisory locks keyed by resource name.
///
/// Locks are owned by sessions. They are never released one by one: the
/// store drops every lock a session holds when that session ends.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    state: Mutex<LockState>,
    released: Condvar,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns true if `session` could take `resource` right now.
    pub(crate) fn is_available(&self, resource: &str, session: SessionId) -> bool {
        self.state.lock().grantable(resource, session)
    }

    /// Takes `resource` for `session`, waiting up to `timeout`.
    ///
    /// `before_attempt` runs before every attempt without the table mutex
    /// held; the store uses it to reclaim expired sessions and to fail the
    /// wait if the caller's own session expired. While waiting, the table
    /// is re-checked at least every `poll` so expiry of a holder is noticed.
    pub(crate) fn acquire<F>(
        &self,
        resource: &str,
        session: SessionId,
        timeout: Duration,
        poll: Option<Duration>,
        mut before_attempt: F,
    ) -> StoreResult<LockStatus>
    where
        F: FnMut() -> StoreResult<()>,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut waited = false;

        loop {
            if let Err(e) = before_attempt() {
                self.state.lock().waiting.remove(&session);
                return Err(e);
            }

            let mut state = self.state.lock();
            if state.try_grant(resource, session) {
                state.waiting.remove(&session);
                return Ok(if waited {
                    LockStatus::GrantedAfterWait
                } else {
                    LockStatus::Granted
                });
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                state.waiting.remove(&session);
                return Ok(LockStatus::TimedOut);
            }
            if state.would_deadlock(resource, session) {
                state.waiting.remove(&session);
                return Ok(LockStatus::Deadlock);
            }

            state.waiting.insert(session, resource.to_string());
            waited = true;

            let slice = match (remaining, poll) {
                (Some(r), Some(p)) => Some(r.min(p)),
                (Some(r), None) => Some(r),
                (None, p) => p,
            };
            match slice {
                Some(d) => {
                    self.released.wait_for(&mut state, d);
                }
                None => self.released.wait(&mut state),
            }
        }
    }

    /// Releases every lock held by `session` and wakes all waiters.
    ///
    /// Returns the number of resources released.
    pub(crate) fn release_all(&self, session: SessionId) -> usize {
        let mut state = self.state.lock();
        let before = state.holders.len();
        state.holders.retain(|_, h| h.session != session);
        state.waiting.remove(&session);
        let released = before - state.holders.len();
        drop(state);

        if released > 0 {
            self.released.notify_all();
        }
        released
    }

    /// Returns the session holding `resource`, if any.
    pub(crate) fn holder(&self, resource: &str) -> Option<SessionId> {
        self.state.lock().holders.get(resource).map(|h| h.session)
    }

    /// Returns how many times `session` has taken `resource`.
    #[cfg(test)]
    pub(crate) fn depth(&self, resource: &str, session: SessionId) -> u32 {
        self.state
            .lock()
            .holders
            .get(resource)
            .filter(|h| h.session == session)
            .map_or(0, |h| h.depth)
    }

    /// Returns the number of held resources.
    pub(crate) fn held_count(&self) -> usize {
        self.state.lock().holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const S1: SessionId = SessionId::new(1);
    const S2: SessionId = SessionId::new(2);

    fn no_op() -> StoreResult<()> {
        Ok(())
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [
            LockStatus::Granted,
            LockStatus::GrantedAfterWait,
            LockStatus::TimedOut,
            LockStatus::Cancelled,
            LockStatus::Deadlock,
            LockStatus::CallError,
        ] {
            assert_eq!(LockStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(LockStatus::from_code(7), None);
    }

    #[test]
    fn free_resource_is_granted_immediately() {
        let table = LockTable::new();
        let status = table.acquire("r", S1, Duration::ZERO, None, no_op).unwrap();
        assert_eq!(status, LockStatus::Granted);
        assert_eq!(table.holder("r"), Some(S1));
    }

    #[test]
    fn lock_is_reentrant_for_holder() {
        let table = LockTable::new();
        table.acquire("r", S1, Duration::ZERO, None, no_op).unwrap();
        let status = table.acquire("r", S1, Duration::ZERO, None, no_op).unwrap();
        assert_eq!(status, LockStatus::Granted);
        assert_eq!(table.depth("r", S1), 2);
        assert!(table.is_available("r", S1));
    }

    #[test]
    fn held_resource_times_out_for_others() {
        let table = LockTable::new();
        table.acquire("r", S1, Duration::ZERO, None, no_op).unwrap();

        assert!(!table.is_available("r", S2));
        let status = table
            .acquire("r", S2, Duration::from_millis(20), None, no_op)
            .unwrap();
        assert_eq!(status, LockStatus::TimedOut);
    }

    #[test]
    fn release_all_frees_every_resource() {
        let table = LockTable::new();
        table.acquire("a", S1, Duration::ZERO, None, no_op).unwrap();
        table.acquire("b", S1, Duration::ZERO, None, no_op).unwrap();
        table.acquire("c", S2, Duration::ZERO, None, no_op).unwrap();

        assert_eq!(table.release_all(S1), 2);
        assert_eq!(table.held_count(), 1);
        assert!(table.is_available("a", S2));
    }

    #[test]
    fn waiter_is_granted_after_release() {
        let table = Arc::new(LockTable::new());
        table.acquire("r", S1, Duration::ZERO, None, no_op).unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.acquire("r", S2, Duration::from_secs(5), None, no_op))
        };

        thread::sleep(Duration::from_millis(50));
        table.release_all(S1);

        let status = waiter.join().unwrap().unwrap();
        assert_eq!(status, LockStatus::GrantedAfterWait);
        assert_eq!(table.holder("r"), Some(S2));
    }

    #[test]
    fn cycle_is_reported_as_deadlock() {
        let table = Arc::new(LockTable::new());
        table.acquire("a", S1, Duration::ZERO, None, no_op).unwrap();
        table.acquire("b", S2, Duration::ZERO, None, no_op).unwrap();

        // S1 blocks on b; then S2 asking for a closes the cycle.
        let blocked = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.acquire("b", S1, Duration::from_secs(5), None, no_op))
        };
        thread::sleep(Duration::from_millis(50));

        let status = table
            .acquire("a", S2, Duration::from_secs(5), None, no_op)
            .unwrap();
        assert_eq!(status, LockStatus::Deadlock);

        table.release_all(S2);
        assert_eq!(blocked.join().unwrap().unwrap(), LockStatus::GrantedAfterWait);
    }

    #[test]
    fn failing_hook_aborts_the_wait() {
        let table = LockTable::new();
        let result = table.acquire("r", S1, Duration::ZERO, None, || {
            Err(crate::StoreError::SessionExpired { session: S1 })
        });
        assert!(result.is_err());
        assert_eq!(table.held_count(), 0);
    }
}
