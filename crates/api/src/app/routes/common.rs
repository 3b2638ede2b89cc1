use axum::Json;
use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::Response;
use serde::de::DeserializeOwned;

use verdant_auth::{CommandAuthorization, Permission};
use verdant_core::{AggregateId, DomainError, Money};

use crate::app::errors;
use crate::context::{PrincipalContext, TenantContext};

/// Associates the permissions a command needs with the command itself.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, required: Permission) -> Self {
        Self {
            inner,
            required: vec![required],
        }
    }

    /// Authorize, then hand back the command for dispatch.
    pub fn authorized(
        self,
        tenant: &TenantContext,
        principal: &PrincipalContext,
    ) -> Result<C, Response> {
        crate::authz::authorize_command(tenant, principal, &self).map_err(errors::forbidden)?;
        Ok(self.inner)
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

pub fn parse_id(raw: &str, what: &str) -> Result<AggregateId, Response> {
    raw.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what} id"),
        )
    })
}

/// Amount in cents from a request body; zero and negative values are refused.
pub fn parse_amount(cents: i64, field: &str) -> Result<Money, Response> {
    u64::try_from(cents)
        .ok()
        .filter(|c| *c > 0)
        .map(Money::from_cents)
        .ok_or_else(|| {
            errors::domain_error_to_response(DomainError::validation(format!(
                "{field} must be positive"
            )))
        })
}

/// `Json` whose rejections are reported as JSON errors.
///
/// Malformed or mistyped bodies are validation errors (400); a missing
/// content type keeps its 415.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                let status = match rejection.status() {
                    StatusCode::UNSUPPORTED_MEDIA_TYPE => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    _ => StatusCode::BAD_REQUEST,
                };
                Err(errors::json_error(
                    status,
                    "validation_error",
                    rejection.body_text(),
                ))
            }
        }
    }
}
