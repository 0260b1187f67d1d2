//! Alert/dialog surfaces observed by `wait_for_alert`.

use serde::{Deserialize, Serialize};

/// Type of browser dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogKind {
    /// Alert dialog (OK button only)
    Alert,
    /// Confirm dialog (OK/Cancel buttons)
    Confirm,
    /// Prompt dialog (text input + OK/Cancel)
    Prompt,
    /// Before unload dialog (Leave/Stay buttons)
    BeforeUnload,
}

impl std::fmt::Display for DialogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alert => write!(f, "alert"),
            Self::Confirm => write!(f, "confirm"),
            Self::Prompt => write!(f, "prompt"),
            Self::BeforeUnload => write!(f, "beforeunload"),
        }
    }
}

/// Handle to an open dialog, handed back by a successful alert wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertHandle {
    /// Type of dialog
    pub kind: DialogKind,
    /// Message displayed in the dialog
    pub message: String,
    /// Default value (for prompt dialogs)
    pub default_value: Option<String>,
}

impl AlertHandle {
    /// Create a new handle
    #[must_use]
    pub fn new(kind: DialogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            default_value: None,
        }
    }

    /// Create an alert handle
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self::new(DialogKind::Alert, message)
    }

    /// Create a prompt handle with a default value
    #[must_use]
    pub fn prompt(message: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            default_value: Some(default_value.into()),
            ..Self::new(DialogKind::Prompt, message)
        }
    }
}
