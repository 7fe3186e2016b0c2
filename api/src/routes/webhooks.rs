//! Public, signature-gated push-event ingestion. The raw body is read
//! first (needed for GitHub's HMAC-over-bytes check) and only parsed into
//! the normalized push shape once the signature has cleared.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use platform_adapters::RuntimeAdapter;
use platform_common::{models::GitProvider, Error};
use platform_webhook::PushEvent;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct IncomingPush {
    owner: String,
    repo: String,
    branch: String,
    commit_sha: String,
    commit_message: String,
    commit_author: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Error> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Invalid(format!("missing {name} header")))
}

pub async fn github<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(), Error> {
    let signature = header_str(&headers, "x-hub-signature-256")?;
    if !platform_webhook::WebhookIngestor::verify_github_signature(&state.webhook_secret, &body, signature) {
        return Err(Error::Unauthorized);
    }

    let push: IncomingPush =
        serde_json::from_slice(&body).map_err(|err| Error::Invalid(format!("malformed push payload: {err}")))?;

    state
        .webhook
        .ingest(PushEvent {
            provider: GitProvider::Github,
            owner: push.owner,
            repo: push.repo,
            branch: push.branch,
            commit_sha: push.commit_sha,
            commit_message: push.commit_message,
            commit_author: push.commit_author,
        })
        .await?;

    Ok(())
}

pub async fn gitlab<A: RuntimeAdapter + 'static>(
    State(state): State<AppState<A>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(), Error> {
    let token = header_str(&headers, "x-gitlab-token")?;
    if !platform_webhook::WebhookIngestor::verify_gitlab_token(&state.gitlab_webhook_secret, token) {
        return Err(Error::Unauthorized);
    }

    let push: IncomingPush =
        serde_json::from_slice(&body).map_err(|err| Error::Invalid(format!("malformed push payload: {err}")))?;

    state
        .webhook
        .ingest(PushEvent {
            provider: GitProvider::Gitlab,
            owner: push.owner,
            repo: push.repo,
            branch: push.branch,
            commit_sha: push.commit_sha,
            commit_message: push.commit_message,
            commit_author: push.commit_author,
        })
        .await?;

    Ok(())
}
