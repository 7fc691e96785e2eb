//! Route naming and case-insensitive route keys.

use std::fmt;

/// Case-insensitive lookup key for a route.
///
/// Routes are compared ignoring ASCII case, so `Calc/Add` and `calc/add`
/// address the same method. The original spelling is kept on the descriptor;
/// this key only stores the folded form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    #[must_use]
    pub fn new(route: &str) -> Self {
        Self(route.to_ascii_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RouteKey {
    fn from(route: &str) -> Self {
        Self::new(route)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the full route for a method: `{prefix}/{method}`.
///
/// Surrounding slashes on either part are trimmed so `"Calc/"` + `"/Add"`
/// still yields `"Calc/Add"`.
#[must_use]
pub fn join_route(prefix: &str, method: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let method = method.trim_matches('/');
    if prefix.is_empty() {
        method.to_string()
    } else {
        format!("{prefix}/{method}")
    }
}
