//! Endpoint identifiers: the names applications are known by.
//!
//! An [`EndpointId`] is an opaque string (a URL such as `mojo:echo_server`).
//! Two identifiers are equal only if their strings are byte-for-byte equal;
//! the broker never normalises them behind the caller's back.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque name of a logical application instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Wrap a string as an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme part (text before the first `:`), if any.
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.0.split_once(':')?;
        if scheme.is_empty() {
            None
        } else {
            Some(scheme)
        }
    }

    /// The identifier with any `?query` suffix removed.
    ///
    /// Used to recognise an already-running application when it is addressed
    /// with different query arguments.
    pub fn without_query(&self) -> EndpointId {
        match self.0.split_once('?') {
            Some((base, _)) => EndpointId(base.to_string()),
            None => self.clone(),
        }
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EndpointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier of one running application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Create a new random InstanceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_string_equality() {
        assert_eq!(EndpointId::from("mojo:echo"), EndpointId::new("mojo:echo"));
        assert_ne!(EndpointId::from("mojo:echo"), EndpointId::from("mojo:echo/"));
        assert_ne!(EndpointId::from("mojo:Echo"), EndpointId::from("mojo:echo"));
    }

    #[test]
    fn test_scheme() {
        assert_eq!(EndpointId::from("mojo:echo").scheme(), Some("mojo"));
        assert_eq!(
            EndpointId::from("file:///apps/echo.js").scheme(),
            Some("file")
        );
        assert_eq!(EndpointId::from("no-scheme").scheme(), None);
        assert_eq!(EndpointId::from(":empty").scheme(), None);
    }

    #[test]
    fn test_without_query() {
        let id = EndpointId::from("mojo:echo?verbose=1");
        assert_eq!(id.without_query(), EndpointId::from("mojo:echo"));
        let plain = EndpointId::from("mojo:echo");
        assert_eq!(plain.without_query(), plain);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = EndpointId::from("mojo:pingpong");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"mojo:pingpong\"");
        let back: EndpointId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_instance_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }
}
