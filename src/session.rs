//! Session mode and credentials.

use std::fmt;

use zeroize::Zeroize;

use crate::ids::CustomerId;

/// Bearer credential presented to the backend cart API.
///
/// The token value is redacted from `Debug` output and zeroed on drop.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value, for constructing an `Authorization` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(**redacted**)")
    }
}

impl Drop for BearerToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A customer identity plus the credential that proves it.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The authenticated customer.
    pub customer: CustomerId,

    /// Bearer credential for the backend API.
    pub token: BearerToken,
}

/// Which backing store is authoritative for the cart.
///
/// A session is in exactly one mode at a time. Guest is the initial default;
/// the reconciler transitions modes on login and logout.
#[derive(Debug, Clone, Default)]
pub enum Session {
    /// No authenticated identity; the cart lives in local persistence.
    #[default]
    Guest,

    /// Bound to a customer account; the cart is server-resident.
    Authenticated(Credentials),
}

impl Session {
    /// Whether this session is bound to a customer account.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// The session credentials, if authenticated.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            Self::Guest => None,
            Self::Authenticated(credentials) => Some(credentials),
        }
    }
}
