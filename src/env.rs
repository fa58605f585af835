//! Runtime environment capabilities.
//!
//! Visibility and connectivity are detected by whatever hosts the cache (a UI
//! shell, a daemon watching the network). The engine only queries them.

use std::sync::atomic::{AtomicBool, Ordering};

/// Environment predicates consulted by retries and periodic refresh.
pub trait Environment: Send + Sync {
  /// Whether the consuming surface is currently visible.
  fn is_visible(&self) -> bool;

  fn is_online(&self) -> bool;

  /// Low-bandwidth or data-saving connection; raises retry and slow-load defaults.
  fn is_slow_connection(&self) -> bool {
    false
  }
}

/// Environment with flags set by the host.
#[derive(Debug)]
pub struct StaticEnvironment {
  visible: AtomicBool,
  online: AtomicBool,
  slow: AtomicBool,
}

impl StaticEnvironment {
  /// Visible, online, normal connection.
  pub fn new() -> Self {
    Self {
      visible: AtomicBool::new(true),
      online: AtomicBool::new(true),
      slow: AtomicBool::new(false),
    }
  }

  pub fn with_slow_connection(self, slow: bool) -> Self {
    self.slow.store(slow, Ordering::SeqCst);
    self
  }

  pub fn set_visible(&self, visible: bool) {
    self.visible.store(visible, Ordering::SeqCst);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

impl Default for StaticEnvironment {
  fn default() -> Self {
    Self::new()
  }
}

impl Environment for StaticEnvironment {
  fn is_visible(&self) -> bool {
    self.visible.load(Ordering::SeqCst)
  }

  fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  fn is_slow_connection(&self) -> bool {
    self.slow.load(Ordering::SeqCst)
  }
}
