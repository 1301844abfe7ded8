//! Authentication hook for the WebSocket handshake.
//!
//! Verifying users is someone else's job. The server only asks an
//! `Authenticator` to turn the upgrade request into an `Identity`, and
//! refuses the handshake when it gets none.

use std::fmt;

use tungstenite::handshake::server::Request;

/// A verified caller, as reported by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub trait Authenticator: Send + Sync {
    /// Returns `None` to reject the upgrade request.
    fn authenticate(&self, request: &Request) -> Option<Identity>;
}

impl<F> Authenticator for F
where
    F: Fn(&Request) -> Option<Identity> + Send + Sync,
{
    fn authenticate(&self, request: &Request) -> Option<Identity> {
        self(request)
    }
}

/// Lets everyone in as `anonymous`; for deployments where a proxy in front
/// of the server already enforces sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymous;

impl Authenticator for AllowAnonymous {
    fn authenticate(&self, _request: &Request) -> Option<Identity> {
        Some(Identity::anonymous())
    }
}
