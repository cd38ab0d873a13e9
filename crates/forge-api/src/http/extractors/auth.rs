//! Caller identity extractor.
//!
//! Identity is established by an authenticating reverse proxy in front of
//! the API, which forwards the stable user id and email as trusted headers
//! (names configured in `[auth]`). When a proxy secret is configured, the
//! proxy must also send it, and requests without it are rejected.
//!
//! The resolved principal is mapped to a local user, created on first sight
//! with zero credits.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};

use forge_core::ledger::repository::CreditLedger;
use forge_infra::crypto::signature::constant_time_eq;
use forge_types::config::AuthConfig;
use forge_types::user::{Principal, User};

use crate::http::error::AppError;
use crate::state::AppState;

/// The authenticated caller, as a local user record.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = resolve_principal(
            &parts.headers,
            &state.config.auth,
            state.proxy_secret.as_deref(),
        )?;
        let user = state.ledger.get_or_create_user(&principal).await?;
        Ok(CurrentUser(user))
    }
}

/// Resolve the caller's principal from trusted proxy headers.
pub fn resolve_principal(
    headers: &HeaderMap,
    auth: &AuthConfig,
    proxy_secret: Option<&SecretString>,
) -> Result<Principal, AppError> {
    if let Some(expected) = proxy_secret {
        let presented = header_value(headers, &auth.proxy_secret_header)?.unwrap_or_default();
        if !constant_time_eq(presented.as_bytes(), expected.expose_secret().as_bytes()) {
            return Err(AppError::Unauthorized(
                "Request was not forwarded by the authenticating proxy".to_string(),
            ));
        }
    }

    let external_id = header_value(headers, &auth.user_header)?.ok_or_else(|| {
        AppError::Unauthorized(format!(
            "Missing identity. Expected the '{}' header.",
            auth.user_header
        ))
    })?;

    let principal = Principal::new(external_id);
    Ok(match header_value(headers, &auth.email_header)? {
        Some(email) => principal.with_email(email),
        None => principal,
    })
}

/// Trimmed header value; blank counts as absent.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized(format!("Invalid {name} header encoding")))?
        .trim();
    Ok((!value.is_empty()).then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_resolves_id_and_email() {
        let auth = AuthConfig::default();
        let principal = resolve_principal(
            &headers(&[
                ("x-forge-user-id", " gm-1 "),
                ("x-forge-user-email", "gm@example.com"),
            ]),
            &auth,
            None,
        )
        .unwrap();

        assert_eq!(principal.external_id, "gm-1");
        assert_eq!(principal.email.as_deref(), Some("gm@example.com"));
    }

    #[test]
    fn test_missing_or_blank_id_is_unauthorized() {
        let auth = AuthConfig::default();
        assert!(matches!(
            resolve_principal(&HeaderMap::new(), &auth, None),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            resolve_principal(&headers(&[("x-forge-user-id", "  ")]), &auth, None),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_blank_email_is_ignored() {
        let principal = resolve_principal(
            &headers(&[("x-forge-user-id", "gm-1"), ("x-forge-user-email", "")]),
            &AuthConfig::default(),
            None,
        )
        .unwrap();
        assert!(principal.email.is_none());
    }

    #[test]
    fn test_proxy_secret_required_when_configured() {
        let auth = AuthConfig::default();
        let secret = SecretString::from("s3cret".to_string());

        let missing = resolve_principal(&headers(&[("x-forge-user-id", "gm-1")]), &auth, Some(&secret));
        assert!(matches!(missing, Err(AppError::Unauthorized(_))));

        let wrong = resolve_principal(
            &headers(&[("x-forge-user-id", "gm-1"), ("x-forge-proxy-secret", "guess")]),
            &auth,
            Some(&secret),
        );
        assert!(matches!(wrong, Err(AppError::Unauthorized(_))));

        let ok = resolve_principal(
            &headers(&[("x-forge-user-id", "gm-1"), ("x-forge-proxy-secret", "s3cret")]),
            &auth,
            Some(&secret),
        );
        assert!(ok.is_ok());
    }
}
