//! Clearable capability
//!
//! Caches register themselves here at construction so that teardown can wipe
//! all of them without knowing their concrete types.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Anything holding session-scoped data that must be dropped on logout
pub trait Clearable: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Drop all held data
    fn clear(&self);
}

/// Weakly-held set of [`Clearable`] members
///
/// Members that have been dropped are pruned on the next sweep.
#[derive(Default)]
pub struct ClearableSet {
    members: Mutex<Vec<Weak<dyn Clearable>>>,
}

impl ClearableSet {
    /// Create an empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member
    pub fn register<C: Clearable + 'static>(&self, member: &Arc<C>) {
        let weak: Weak<dyn Clearable> = Arc::downgrade(member) as Weak<dyn Clearable>;
        tracing::debug!(member = member.name(), "clearable registered");
        self.members.lock().push(weak);
    }

    /// Clear every live member, returning how many were cleared
    pub fn clear_all(&self) -> usize {
        let live: Vec<Arc<dyn Clearable>> = {
            let mut members = self.members.lock();
            members.retain(|m| m.strong_count() > 0);
            members.iter().filter_map(Weak::upgrade).collect()
        };

        for member in &live {
            tracing::debug!(member = member.name(), "clearing");
            member.clear();
        }
        live.len()
    }

    /// Number of live members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|m| m.strong_count() > 0)
            .count()
    }

    /// Whether no live member is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ClearableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClearableSet")
            .field("live", &self.len())
            .finish()
    }
}
