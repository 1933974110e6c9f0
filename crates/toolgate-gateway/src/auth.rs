//! Bearer-token admission with loopback bypass.
//!
//! Loopback peers are trusted without a token. Other peers are admitted
//! only when remote access is enabled and the presented bearer token
//! matches the configured one.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("remote access is disabled")]
    RemoteDisabled,
    #[error("no bearer token configured for remote access")]
    NoTokenConfigured,
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
}

#[derive(Debug, Clone)]
pub struct AuthGuard {
    token: Option<String>,
    remote_enabled: bool,
}

impl AuthGuard {
    pub fn new(token: Option<String>, remote_enabled: bool) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self {
            token,
            remote_enabled,
        }
    }

    /// Admission check for one request. `authorization` is the raw value
    /// of the Authorization header, if present.
    pub fn authorize(
        &self,
        peer: SocketAddr,
        authorization: Option<&str>,
    ) -> Result<(), AuthError> {
        if is_loopback(peer.ip()) {
            return Ok(());
        }
        if !self.remote_enabled {
            return Err(AuthError::RemoteDisabled);
        }
        let Some(expected) = self.token.as_deref() else {
            return Err(AuthError::NoTokenConfigured);
        };
        let Some(raw) = authorization.map(str::trim).filter(|v| !v.is_empty()) else {
            return Err(AuthError::MissingToken);
        };
        let presented = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .unwrap_or(raw)
            .trim();
        if presented == expected {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Loopback check covering both address families.
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> SocketAddr {
        "127.0.0.1:50000".parse().expect("addr")
    }

    fn remote() -> SocketAddr {
        "100.90.80.70:50000".parse().expect("addr")
    }

    // ── 1. loopback_bypasses_auth ───────────────────────────────────

    #[test]
    fn loopback_bypasses_auth() {
        let guard = AuthGuard::new(Some("secret".into()), true);
        assert_eq!(guard.authorize(local(), None), Ok(()));

        let v6_local: SocketAddr = "[::1]:50000".parse().expect("addr");
        assert_eq!(guard.authorize(v6_local, None), Ok(()));

        let mapped: SocketAddr = "[::ffff:127.0.0.1]:50000".parse().expect("addr");
        assert_eq!(guard.authorize(mapped, None), Ok(()));
    }

    // ── 2. remote_disabled_rejects ──────────────────────────────────

    #[test]
    fn remote_disabled_rejects() {
        let guard = AuthGuard::new(Some("secret".into()), false);
        assert_eq!(
            guard.authorize(remote(), Some("Bearer secret")),
            Err(AuthError::RemoteDisabled)
        );
    }

    // ── 3. valid_bearer_token_admitted ──────────────────────────────

    #[test]
    fn valid_bearer_token_admitted() {
        let guard = AuthGuard::new(Some("secret".into()), true);
        assert_eq!(guard.authorize(remote(), Some("Bearer secret")), Ok(()));
        assert_eq!(guard.authorize(remote(), Some("bearer secret")), Ok(()));
        assert_eq!(guard.authorize(remote(), Some("  secret  ")), Ok(()));
    }

    // ── 4. missing_or_wrong_token_rejected ──────────────────────────

    #[test]
    fn missing_or_wrong_token_rejected() {
        let guard = AuthGuard::new(Some("secret".into()), true);
        assert_eq!(guard.authorize(remote(), None), Err(AuthError::MissingToken));
        assert_eq!(guard.authorize(remote(), Some("")), Err(AuthError::MissingToken));
        assert_eq!(
            guard.authorize(remote(), Some("Bearer nope")),
            Err(AuthError::InvalidToken)
        );
    }

    // ── 5. empty_configured_token_counts_as_unconfigured ────────────

    #[test]
    fn empty_configured_token_counts_as_unconfigured() {
        let guard = AuthGuard::new(Some("   ".into()), true);
        assert_eq!(
            guard.authorize(remote(), Some("Bearer anything")),
            Err(AuthError::NoTokenConfigured)
        );
    }
}
