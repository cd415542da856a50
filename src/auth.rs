//! The prewarm endpoint's capability gate.
//!
//! Full authentication is a thin collaborator here; prewarm only needs a
//! single opaque bearer token from configuration. Shaped like `auth.rs`'s
//! `AdminUser` extractor — a `FromRequestParts` impl pulling a typed
//! `Authorization` header out of the request — minus the JWT/user-lookup
//! machinery that full auth would need.

use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::errors::CoreError;
use crate::web::AppState;

/// Proof that the caller presented the configured editor capability token.
pub struct EditorCapability;

impl FromRequestParts<AppState> for EditorCapability {
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.editor_capability_token.as_deref() else {
            return Err(CoreError::PermissionDenied(
                "prewarm is not enabled on this deployment".to_string(),
            ));
        };

        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| CoreError::PermissionDenied("missing bearer token".to_string()))?;

        if bearer.token() != expected {
            return Err(CoreError::PermissionDenied("invalid capability token".to_string()));
        }

        Ok(EditorCapability)
    }
}
