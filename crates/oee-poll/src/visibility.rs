//! Page visibility and focus signals

use std::sync::Arc;
use tokio::sync::watch;

/// Current visibility flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityState {
    /// Window is hidden (minimised, other tab, screen locked)
    pub hidden: bool,
    /// Window has input focus
    pub focused: bool,
}

impl VisibilityState {
    /// Shown and focused
    #[inline]
    #[must_use]
    pub fn is_visible(self) -> bool {
        !self.hidden && self.focused
    }
}

impl Default for VisibilityState {
    fn default() -> Self {
        Self {
            hidden: false,
            focused: true,
        }
    }
}

/// Shared visibility signal
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone)]
pub struct Visibility {
    state: Arc<watch::Sender<VisibilityState>>,
}

impl Visibility {
    /// Visible and focused
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(VisibilityState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Mark the window hidden or shown
    pub fn set_hidden(&self, hidden: bool) {
        self.update(|state| state.hidden = hidden);
    }

    /// Mark the window focused or blurred
    pub fn set_focused(&self, focused: bool) {
        self.update(|state| state.focused = focused);
    }

    /// Current flags
    #[inline]
    #[must_use]
    pub fn state(&self) -> VisibilityState {
        *self.state.borrow()
    }

    /// Shown and focused
    #[inline]
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.state().is_visible()
    }

    /// Receive every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VisibilityState> {
        self.state.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut VisibilityState)) {
        let changed = self.state.send_if_modified(|state| {
            let before = *state;
            f(state);
            before != *state
        });
        if changed {
            tracing::debug!(state = ?self.state(), "visibility changed");
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_requires_shown_and_focused() {
        let v = Visibility::new();
        assert!(v.is_visible());

        v.set_focused(false);
        assert!(!v.is_visible());

        v.set_focused(true);
        v.set_hidden(true);
        assert!(!v.is_visible());
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let v = Visibility::new();
        let mut rx = v.subscribe();

        v.set_hidden(false);
        assert!(!rx.has_changed().unwrap());

        v.set_hidden(true);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().hidden);
    }

    #[test]
    fn clones_share_state() {
        let a = Visibility::new();
        let b = a.clone();
        a.set_hidden(true);
        assert!(!b.is_visible());
    }
}
