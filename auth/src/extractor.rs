//! An axum extractor that turns a bearer header into a verified [`Claim`].
//! Adapted from the teacher's `Key`/`User` extractor pair in its `auth`
//! crate: there, a bearer token is looked up against a `UserManager` held
//! in router state; here, the token is self-contained (a signed JWT) so
//! verification needs only the [`TokenIssuer`] from state, no database
//! round trip.

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    TypedHeader,
};
use platform_common::{claims::Claim, Error};

use crate::TokenIssuer;

/// Extracts and verifies the `Authorization: Bearer <jwt>` header, yielding
/// the caller's [`Claim`]. Handlers that need `Claim` to check scopes take
/// `AuthenticatedClaim` as an argument and read `.0`.
pub struct AuthenticatedClaim(pub Claim);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedClaim
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::Unauthorized)?;

        let issuer = TokenIssuer::from_ref(state);
        let claim = issuer.verify_access_token(bearer.token())?;
        Ok(Self(claim))
    }
}
