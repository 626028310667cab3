//! Actions and the patterns that match them.

use core::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle marker an action may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Work started.
    Pending,
    /// Work finished successfully.
    Success,
    /// Work failed.
    Error,
}

/// A typed event dispatched on the action bus.
///
/// The `type` string is the only key used for matching. Serializes as
/// `{"type": ..., "payload": ..., "status": ...}` with absent fields omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Dispatch-matching key.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Optional lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
}

impl Action {
    /// Creates an action with no payload.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: None,
            status: None,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Attaches a status.
    #[must_use]
    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the action type.
    #[must_use]
    pub fn action_type(&self) -> &str {
        &self.action_type
    }
}

impl From<&str> for Action {
    fn from(action_type: &str) -> Self {
        Self::new(action_type)
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), Value::String(action.action_type));
        if let Some(payload) = action.payload {
            map.insert("payload".into(), payload);
        }
        if let Some(status) = action.status {
            let status = match status {
                ActionStatus::Pending => "pending",
                ActionStatus::Success => "success",
                ActionStatus::Error => "error",
            };
            map.insert("status".into(), Value::String(status.into()));
        }
        Self::Object(map)
    }
}

/// Decides which actions a `take` or watcher reacts to.
#[derive(Clone)]
pub enum Pattern {
    /// Matches every action (`"*"`).
    Any,
    /// Matches one action type.
    Type(String),
    /// Matches any of the listed types.
    OneOf(Vec<String>),
    /// Matches when the predicate returns true.
    ///
    /// The predicate runs inside dispatch and must not call back into the runtime.
    Predicate(Rc<dyn Fn(&Action) -> bool>),
}

impl Pattern {
    /// Builds a pattern matching any of `types`.
    #[must_use]
    pub fn one_of<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(types.into_iter().map(Into::into).collect())
    }

    /// Builds a predicate pattern.
    #[must_use]
    pub fn predicate(f: impl Fn(&Action) -> bool + 'static) -> Self {
        Self::Predicate(Rc::new(f))
    }

    /// Returns true if `action` matches.
    #[must_use]
    pub fn matches(&self, action: &Action) -> bool {
        match self {
            Self::Any => true,
            Self::Type(t) => *t == action.action_type,
            Self::OneOf(types) => types.iter().any(|t| *t == action.action_type),
            Self::Predicate(f) => f(action),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Type(t) => f.debug_tuple("Type").field(t).finish(),
            Self::OneOf(types) => f.debug_tuple("OneOf").field(types).finish(),
            Self::Predicate(_) => f.debug_tuple("Predicate").field(&"<fn>").finish(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Type(t) => write!(f, "{t}"),
            Self::OneOf(types) => write!(f, "[{}]", types.join(", ")),
            Self::Predicate(_) => write!(f, "<predicate>"),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        if s == "*" {
            Self::Any
        } else {
            Self::Type(s.to_string())
        }
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        if s == "*" {
            Self::Any
        } else {
            Self::Type(s)
        }
    }
}

impl<const N: usize> From<[&str; N]> for Pattern {
    fn from(types: [&str; N]) -> Self {
        Self::one_of(types)
    }
}
