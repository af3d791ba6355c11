use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;

use quotar_core::domain::principal::{Principal, Role};

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated principal forwarded by the upstream gateway.
///
/// Credential verification happens before requests reach this service; the
/// gateway attaches `X-User-Id` / `X-User-Role` (and optionally
/// `X-User-Name`) to proxied requests. When `auth.gateway_secret` is
/// configured, the gateway must also present it in `X-Gateway-Secret`,
/// so the identity headers are only trusted on authenticated hops.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(expected) = &state.gateway_secret {
            let presented = header(parts, "x-gateway-secret")
                .ok_or_else(|| ApiError::unauthenticated("missing gateway credential"))?;
            if presented != expected.expose_secret() {
                return Err(ApiError::unauthenticated("invalid gateway credential"));
            }
        }

        let id = header(parts, "x-user-id")
            .ok_or_else(|| ApiError::unauthenticated("missing X-User-Id header"))?;
        let role = header(parts, "x-user-role")
            .ok_or_else(|| ApiError::unauthenticated("missing X-User-Role header"))?;
        let role = Role::parse(&role)
            .map_err(|_| ApiError::unauthenticated(format!("unsupported role `{role}`")))?;
        let name = header(parts, "x-user-name");

        tracing::Span::current().record("user_id", id.as_str());

        Ok(CurrentPrincipal(Principal { id, role, name }))
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Gate for the admin-only endpoints.
pub fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}
