use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Comment overlay state. `post_id` survives a close and is only meaningful
/// while `is_open` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalState {
    pub is_open: bool,
    pub post_id: String,
}

/// Shared handle passed to whatever needs to read or drive the overlay.
#[derive(Clone, Default)]
pub struct ModalContext {
    state: Arc<RwLock<ModalState>>,
}

impl ModalContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ModalState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ModalState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens for `post_id`, replacing any previous target.
    pub fn open_for(&self, post_id: &str) {
        let mut state = self.write();
        state.is_open = true;
        state.post_id = post_id.to_string();
    }

    pub fn close(&self) {
        self.write().is_open = false;
    }

    /// Comment-icon click: flips visibility and retargets to `post_id` either way.
    pub fn toggle_for(&self, post_id: &str) {
        let mut state = self.write();
        state.is_open = !state.is_open;
        state.post_id = post_id.to_string();
    }

    pub fn is_open(&self) -> bool {
        self.read().is_open
    }

    pub fn active_post_id(&self) -> Option<String> {
        let state = self.read();
        state.is_open.then(|| state.post_id.clone())
    }

    pub fn snapshot(&self) -> ModalState {
        self.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_open_wins() {
        let modal = ModalContext::new();
        modal.open_for("p1");
        modal.open_for("p2");
        assert_eq!(modal.active_post_id().as_deref(), Some("p2"));
    }

    #[test]
    fn close_keeps_target_but_hides_it() {
        let modal = ModalContext::new();
        modal.open_for("p1");
        modal.close();
        assert_eq!(modal.active_post_id(), None);
        assert_eq!(modal.snapshot().post_id, "p1");
    }

    #[test]
    fn toggle_retargets_while_flipping() {
        let modal = ModalContext::new();
        modal.toggle_for("p1");
        assert!(modal.is_open());
        modal.toggle_for("p2");
        assert!(!modal.is_open());
        assert_eq!(modal.snapshot().post_id, "p2");
    }

    #[test]
    fn clones_share_state() {
        let modal = ModalContext::new();
        let handle = modal.clone();
        handle.open_for("p9");
        assert_eq!(modal.active_post_id().as_deref(), Some("p9"));
    }
}
