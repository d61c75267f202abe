use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission names granted to the caller. Each name doubles as a
/// knowledge-store namespace the `context` capability may search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionScope(BTreeSet<String>);

impl PermissionScope {
    pub fn new<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            permissions
                .into_iter()
                .map(Into::into)
                .map(|name: String| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// JSON list form seeded into the conversation after the user query.
    pub fn to_message(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn evaluate(&self, scope: &PermissionScope) -> AccessDecision {
        if scope.is_empty() {
            return AccessDecision::Deny {
                reason_code: "empty_permission_set",
                user_message: "You do not have access to any knowledge sources.".to_string(),
            };
        }
        AccessDecision::Allow
    }
}
