//! Transient user notifications ("toasts").
//!
//! The engine never presents anything itself. Every user-visible outcome is
//! handed to a [`Notifier`], which the host renders however it likes.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Severity of a toast, which drives its styling in the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A short-lived message for the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Warning,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: ToastLevel::Error,
            message: message.into(),
        }
    }
}

/// Presentation seam for toasts.
pub trait Notifier {
    fn show(&self, toast: Toast);
}

/// Writes toasts to the log. Used by headless hosts such as the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Info | ToastLevel::Success => {
                tracing::info!(level = ?toast.level, "{}", toast.message);
            }
            ToastLevel::Warning => tracing::warn!("{}", toast.message),
            ToastLevel::Error => tracing::error!("{}", toast.message),
        }
    }
}

/// Buffers toasts until the host drains them for display.
#[derive(Debug, Default)]
pub struct ToastQueue {
    pending: Mutex<Vec<Toast>>,
}

impl ToastQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued toast, oldest first.
    pub fn drain(&self) -> Vec<Toast> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// The most recently queued toast, if any.
    #[must_use]
    pub fn last(&self) -> Option<Toast> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl Notifier for ToastQueue {
    fn show(&self, toast: Toast) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast);
    }
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn show(&self, toast: Toast) {
        (**self).show(toast);
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn show(&self, toast: Toast) {
        (**self).show(toast);
    }
}
