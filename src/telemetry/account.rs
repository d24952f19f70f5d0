//! Acting-account resolution.

use opentelemetry::Context;
use serde_json::Value;

/// Account used when neither the caller nor the transport names one.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Argument key callers use to pick an account.
pub const ACCOUNT_ARGUMENT: &str = "account";

/// Identity established by an upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub email: String,
}

impl AuthenticatedUser {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

/// Attach an authenticated user to a request context.
pub fn with_authenticated_user(cx: &Context, user: AuthenticatedUser) -> Context {
    cx.with_value(user)
}

/// Authenticated user carried by `cx`, if any. An empty email counts as none.
pub fn authenticated_user(cx: &Context) -> Option<&AuthenticatedUser> {
    cx.get::<AuthenticatedUser>()
        .filter(|user| !user.email.is_empty())
}

/// Resolve the account a call acts for.
///
/// An authenticated identity always wins over the `account` argument, so a
/// request body cannot impersonate another user.
pub fn resolve_account(cx: &Context, args: &Value) -> String {
    if let Some(user) = authenticated_user(cx) {
        return user.email.clone();
    }

    match args.get(ACCOUNT_ARGUMENT).and_then(Value::as_str) {
        Some(account) if !account.is_empty() => account.to_string(),
        _ => DEFAULT_ACCOUNT.to_string(),
    }
}
