//! JWT issuance/verification, org-membership checks, and refresh/OTP
//! rotation. Grounded on the teacher's `auth` crate: its `User`/`Key`
//! bearer-token axum extractors are generalized here into a `Claim`
//! extractor carrying the `platform_common::claims::Claim` the rest of the
//! crate already agrees on, and its `UserManager`/`dal` split into a thin
//! `TokenIssuer` plus the store's own `auth_records` queries.

mod extractor;

use std::time::Duration;

use clap::Args;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use platform_common::{claims::Claim, models::OrgRole, now, Error, Id};
use platform_store::Store;
use rand::{distributions::Alphanumeric, Rng};
use ring::digest;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use zeroize::Zeroizing;

pub use extractor::AuthenticatedClaim;

#[derive(Debug, Clone, Args)]
pub struct AuthArgs {
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    #[arg(long, env = "JWT_ACCESS_EXPIRY", default_value = "900")]
    pub jwt_access_expiry_secs: u64,

    #[arg(long, env = "JWT_REFRESH_EXPIRY", default_value = "2592000")]
    pub jwt_refresh_expiry_secs: u64,
}

/// Encodes/decodes access tokens and rotates refresh tokens. The secret is
/// wrapped in `Zeroizing` so it's scrubbed from memory on drop; nothing
/// about it is ever logged or surfaced in an error message.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Zeroizing<String>,
    access_expiry: Duration,
    refresh_expiry: Duration,
    store: Store,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: Id,
    org: Id,
    scopes: Vec<String>,
    exp: i64,
}

#[derive(Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenIssuer {
    pub fn new(args: AuthArgs, store: Store) -> Self {
        Self {
            secret: Zeroizing::new(args.jwt_secret),
            access_expiry: Duration::from_secs(args.jwt_access_expiry_secs),
            refresh_expiry: Duration::from_secs(args.jwt_refresh_expiry_secs),
            store,
        }
    }

    /// Mints a fresh access token plus a rotated opaque refresh token for
    /// `principal`. The refresh token itself is never stored; only its
    /// SHA-256 hash is, so a leaked database dump can't be replayed.
    #[instrument(skip(self, scopes), fields(%principal, %organization))]
    pub async fn issue(&self, principal: Id, organization: Id, scopes: &[String]) -> Result<IssuedTokens, Error> {
        let claims = AccessClaims {
            sub: principal,
            org: organization,
            scopes: scopes.to_vec(),
            exp: (now() + chrono::Duration::from_std(self.access_expiry).unwrap()).timestamp(),
        };
        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|err| Error::Internal(format!("signing access token: {err}")))?;

        let refresh_token = random_token();
        let expires_at = now() + chrono::Duration::from_std(self.refresh_expiry).unwrap();
        self.store
            .insert_refresh_token(principal, &sha256(refresh_token.as_bytes()), expires_at)
            .await?;

        Ok(IssuedTokens { access_token, refresh_token })
    }

    /// Verifies a presented access token's signature and expiry, returning
    /// the `Claim` the rest of the system checks scopes against.
    pub fn verify_access_token(&self, token: &str) -> Result<Claim, Error> {
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|err| {
            warn!(%err, "rejected access token");
            Error::Unauthorized
        })?;

        Ok(Claim {
            principal: data.claims.sub,
            organization: data.claims.org,
            scopes: data
                .claims
                .scopes
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
        })
    }

    /// Rotates a refresh token: the presented token must hash to an
    /// unexpired row, which is revoked and replaced atomically with the new
    /// pair so a stolen-then-used token can't be replayed twice.
    pub async fn rotate_refresh_token(&self, presented: &str, organization: Id, scopes: &[String]) -> Result<IssuedTokens, Error> {
        let hash = sha256(presented.as_bytes());
        let existing = self.store.find_refresh_token(&hash).await?;
        if existing.expires_at < now() {
            return Err(Error::Unauthorized);
        }

        self.store.revoke_refresh_token(existing.id).await?;
        self.issue(existing.user_id, organization, scopes).await
    }

    /// Issues a one-time code for out-of-band delivery (email/SMS); only
    /// its hash is persisted.
    pub async fn issue_otp(&self, user_id: Id, ttl: Duration) -> Result<String, Error> {
        let code = random_numeric_code();
        let expires_at = now() + chrono::Duration::from_std(ttl).unwrap();
        self.store.insert_otp_code(user_id, &sha256(code.as_bytes()), expires_at).await?;
        Ok(code)
    }

    pub async fn verify_otp(&self, user_id: Id, presented: &str) -> Result<(), Error> {
        self.store.consume_otp_code(user_id, &sha256(presented.as_bytes())).await
    }
}

/// Checks that `claim.principal` belongs to `organization` with at least
/// `required` seniority (`Owner` > `Admin` > `Member`).
pub async fn require_org_role(store: &Store, claim: &Claim, organization: Id, required: OrgRole) -> Result<(), Error> {
    if claim.organization != organization {
        return Err(Error::Forbidden);
    }

    let members = store.list_org_members(organization).await?;
    let membership = members
        .iter()
        .find(|m| m.user_id == claim.principal)
        .ok_or(Error::Forbidden)?;

    if role_rank(membership.role) < role_rank(required) {
        return Err(Error::Forbidden);
    }
    Ok(())
}

fn role_rank(role: OrgRole) -> u8 {
    match role {
        OrgRole::Member => 0,
        OrgRole::Admin => 1,
        OrgRole::Owner => 2,
    }
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, bytes).as_ref().to_vec()
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

fn random_numeric_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_common::models::*;

    fn args() -> AuthArgs {
        AuthArgs {
            jwt_secret: "test-secret-at-least-this-long".to_string(),
            jwt_access_expiry_secs: 900,
            jwt_refresh_expiry_secs: 2_592_000,
        }
    }

    #[tokio::test]
    async fn issued_access_token_verifies_back_to_the_same_claim() {
        let store = Store::in_memory().await;
        let issuer = TokenIssuer::new(args(), store);
        let principal = Id::new();
        let org = Id::new();

        let tokens = issuer.issue(principal, org, &["service_read".to_string()]).await.unwrap();
        let claim = issuer.verify_access_token(&tokens.access_token).unwrap();

        assert_eq!(claim.principal, principal);
        assert_eq!(claim.organization, org);
        assert!(claim.has(platform_common::claims::Scope::ServiceRead));
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let store = Store::in_memory().await;
        let issuer = TokenIssuer::new(args(), store);
        let tokens = issuer.issue(Id::new(), Id::new(), &[]).await.unwrap();

        let mut tampered = tokens.access_token.clone();
        tampered.push('x');
        assert!(matches!(issuer.verify_access_token(&tampered), Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn refresh_rotation_revokes_the_old_token() {
        let store = Store::in_memory().await;
        let issuer = TokenIssuer::new(args(), store);
        let principal = Id::new();
        let org = Id::new();

        let first = issuer.issue(principal, org, &[]).await.unwrap();
        let rotated = issuer.rotate_refresh_token(&first.refresh_token, org, &[]).await.unwrap();
        assert_ne!(first.refresh_token, rotated.refresh_token);

        let err = issuer.rotate_refresh_token(&first.refresh_token, org, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test]
    async fn otp_can_only_be_consumed_once() {
        let store = Store::in_memory().await;
        let issuer = TokenIssuer::new(args(), store.clone());
        let user_id = Id::new();

        let code = issuer.issue_otp(user_id, Duration::from_secs(300)).await.unwrap();
        issuer.verify_otp(user_id, &code).await.unwrap();
        let err = issuer.verify_otp(user_id, &code).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test]
    async fn org_role_check_rejects_insufficient_seniority() {
        let store = Store::in_memory().await;
        let org = store.create_organization("acme").await.unwrap();
        let user_id = Id::new();
        store.add_org_member(org.id, user_id, OrgRole::Member).await.unwrap();

        let claim = Claim { principal: user_id, organization: org.id, scopes: vec![] };
        let err = require_org_role(&store, &claim, org.id, OrgRole::Owner).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        require_org_role(&store, &claim, org.id, OrgRole::Member).await.unwrap();
    }
}
