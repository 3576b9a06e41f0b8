//! Service type descriptors.
//!
//! A service type is a name plus the ordered list of methods it declares.
//! Descriptors are `'static` tables written next to the typed bindings that
//! use them; the call layer consults them to validate outbound calls and to
//! reject inbound calls for methods a handler never declared.

use serde::{Deserialize, Serialize};

/// One method of a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method identifier on the wire.
    pub name: &'static str,
    /// Whether the method produces a reply. `false` marks a notification.
    pub returns: bool,
}

impl MethodDescriptor {
    /// A method that produces a reply.
    pub const fn call(name: &'static str) -> Self {
        Self {
            name,
            returns: true,
        }
    }

    /// A fire-and-forget method.
    pub const fn notify(name: &'static str) -> Self {
        Self {
            name,
            returns: false,
        }
    }
}

/// A service type: its name and declared method set.
///
/// Service types are identified by name; equality compares names only, so a
/// descriptor whose client interface refers back to itself stays comparable.
pub struct ServiceDescriptor {
    /// Service type identifier.
    pub name: &'static str,
    /// Declared methods, in declaration order.
    pub methods: &'static [MethodDescriptor],
    /// Interface the caller may expose back over the same capability
    /// (e.g. the `pong` callback of a ping service).
    pub client: Option<&'static ServiceDescriptor>,
}

/// Descriptor of an interface with no methods.
pub static EMPTY_SERVICE: ServiceDescriptor = ServiceDescriptor {
    name: "relay.Empty",
    methods: &[],
    client: None,
};

impl ServiceDescriptor {
    /// The client interface, or [`EMPTY_SERVICE`] when none is declared.
    pub fn client_descriptor(&self) -> &'static ServiceDescriptor {
        self.client.unwrap_or(&EMPTY_SERVICE)
    }

    /// Look up a declared method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

impl PartialEq for ServiceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ServiceDescriptor {}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("client", &self.client.map(|c| c.name))
            .finish()
    }
}

impl std::fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Application-level failure returned by a handler.
///
/// This travels inside a normal reply. It means "the call completed and the
/// service reported an error", as opposed to a transport failure where the
/// call could not complete at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationError {
    /// Error code (HTTP-like by convention: 400 bad input, 404 unknown method).
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl ApplicationError {
    /// Build an application error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The method is not part of the handler's service type.
    pub fn unknown_method(service: &str, method: &str) -> Self {
        Self::new(404, format!("{service} has no method '{method}'"))
    }

    /// Arguments could not be interpreted by the handler.
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }
}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "application error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApplicationError {}

#[cfg(test)]
mod tests {
    use super::*;

    static ECHO: ServiceDescriptor = ServiceDescriptor {
        name: "test.Echo",
        methods: &[
            MethodDescriptor::call("echoString"),
            MethodDescriptor::notify("quit"),
        ],
        client: Some(&ECHO_CLIENT),
    };

    static ECHO_CLIENT: ServiceDescriptor = ServiceDescriptor {
        name: "test.EchoClient",
        methods: &[MethodDescriptor::notify("echoed")],
        client: None,
    };

    #[test]
    fn test_method_lookup() {
        assert!(ECHO.method("echoString").unwrap().returns);
        assert!(!ECHO.method("quit").unwrap().returns);
        assert!(ECHO.method("missing").is_none());
    }

    #[test]
    fn test_client_descriptor() {
        assert_eq!(ECHO.client_descriptor().name, "test.EchoClient");
        assert_eq!(ECHO_CLIENT.client_descriptor(), &EMPTY_SERVICE);
        assert!(EMPTY_SERVICE.methods.is_empty());
    }

    #[test]
    fn test_application_error_serialization() {
        let err = ApplicationError::unknown_method("test.Echo", "nope");
        assert_eq!(err.code, 404);
        let json = serde_json::to_string(&err).unwrap();
        let back: ApplicationError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(back.to_string().contains("nope"));
    }
}
