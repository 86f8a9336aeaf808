//! Latest render target shared between the host thread and the decode thread.

use std::fmt;
use std::sync::Arc;

use native_decoder::RenderTarget;
use parking_lot::RwLock;

#[derive(Default)]
struct SurfaceInner {
    target: Option<Arc<dyn RenderTarget>>,
    width: u32,
    height: u32,
}

/// Thread-safe holder of the bound render target and its declared size
#[derive(Default)]
pub struct SurfaceState {
    inner: RwLock<SurfaceInner>,
}

impl SurfaceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the target; non-positive dimensions keep the previous values
    pub fn update(&self, target: Arc<dyn RenderTarget>, width: u32, height: u32) {
        let mut inner = self.inner.write();
        inner.target = Some(target);
        if width > 0 {
            inner.width = width;
        }
        if height > 0 {
            inner.height = height;
        }
    }

    /// Consistent copy of target, dimensions and validity
    pub fn snapshot(&self) -> SurfaceSnapshot {
        let inner = self.inner.read();
        let valid = inner.target.as_ref().is_some_and(|t| t.is_valid());
        SurfaceSnapshot {
            target: inner.target.clone(),
            width: inner.width,
            height: inner.height,
            valid,
        }
    }

    pub fn clear(&self) {
        *self.inner.write() = SurfaceInner::default();
    }
}

#[derive(Clone, Default)]
pub struct SurfaceSnapshot {
    pub target: Option<Arc<dyn RenderTarget>>,
    pub width: u32,
    pub height: u32,
    pub valid: bool,
}

impl SurfaceSnapshot {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Target id for diagnostics, `None` when unset
    pub fn target_id(&self) -> Option<u64> {
        self.target.as_ref().map(|t| t.id())
    }
}

impl fmt::Debug for SurfaceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceSnapshot")
            .field("target", &self.target_id())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Target(u64, AtomicBool);

    impl RenderTarget for Target {
        fn id(&self) -> u64 {
            self.0
        }
        fn is_valid(&self) -> bool {
            self.1.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn empty_state_is_invalid() {
        let state = SurfaceState::new();
        let snap = state.snapshot();
        assert!(!snap.is_valid());
        assert!(snap.target.is_none());
        assert_eq!((snap.width, snap.height), (0, 0));
    }

    #[test]
    fn zero_dimensions_keep_previous() {
        let state = SurfaceState::new();
        state.update(Arc::new(Target(1, AtomicBool::new(true))), 1920, 1080);
        state.update(Arc::new(Target(2, AtomicBool::new(true))), 0, 0);
        let snap = state.snapshot();
        assert_eq!(snap.target_id(), Some(2));
        assert_eq!((snap.width, snap.height), (1920, 1080));
        assert!(snap.is_valid());
    }

    #[test]
    fn validity_follows_target() {
        let target = Arc::new(Target(3, AtomicBool::new(true)));
        let state = SurfaceState::new();
        state.update(target.clone(), 640, 480);
        let before = state.snapshot();
        target.1.store(false, Ordering::SeqCst);
        assert!(before.is_valid());
        assert!(!state.snapshot().is_valid());
    }

    #[test]
    fn clear_resets_everything() {
        let state = SurfaceState::new();
        state.update(Arc::new(Target(4, AtomicBool::new(true))), 640, 480);
        state.clear();
        let snap = state.snapshot();
        assert!(!snap.is_valid());
        assert_eq!((snap.width, snap.height), (0, 0));
    }
}
