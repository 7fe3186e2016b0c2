//! Issues HTTP calls to configured registry/compute/dns/router endpoints,
//! following the shape of the teacher's `backends::client::permit`: one
//! `reqwest::Client`, a base URL per dependency, and non-2xx responses
//! classified into the shared error enum rather than bubbling up
//! `reqwest::Error` directly.

use std::time::Duration;

use async_trait::async_trait;
use platform_common::Error;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    breaker::Breaker, AddrHandle, BuildArgs, BuildOutcome, CloneAdapter, ImageAdapter, ImageDigest,
    NetworkAdapter, RecordHandle, RouterAdapter, WorkloadAdapter, WorkloadHandle, WorkloadSpec,
    WorkloadStatus,
};

pub struct HttpAdapter {
    client: Client,
    registry_url: String,
    compute_url: String,
    dns_url: String,
    router_url: String,
    registry_breaker: Breaker,
    compute_breaker: Breaker,
    dns_breaker: Breaker,
    router_breaker: Breaker,
}

impl HttpAdapter {
    pub fn new(registry_url: String, compute_url: String, dns_url: String, router_url: String) -> Self {
        Self {
            client: Client::new(),
            registry_url,
            compute_url,
            dns_url,
            router_url,
            registry_breaker: Breaker::new("registry"),
            compute_breaker: Breaker::new("compute"),
            dns_breaker: Breaker::new("dns"),
            router_breaker: Breaker::new("router"),
        }
    }
}

/// Maps a completed HTTP response to the shared error taxonomy: 5xx/network
/// failures are `Transient` (safe to retry), 4xx are `Permanent` (the
/// request itself is wrong).
async fn classify(response: reqwest::Result<reqwest::Response>) -> Result<reqwest::Response, Error> {
    let response = response.map_err(|err| Error::Transient(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Err(Error::Transient(format!("upstream returned {status}")))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(Error::Permanent(format!("upstream returned {status}: {body}")))
    }
}

async fn decode_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, Error> {
    response
        .json::<T>()
        .await
        .map_err(|err| Error::Internal(format!("malformed upstream response: {err}")))
}

#[derive(Deserialize)]
struct BuildResponse {
    digest: String,
    logs: Vec<String>,
}

#[async_trait]
impl ImageAdapter for HttpAdapter {
    async fn build(
        &self,
        src_dir: &str,
        build_args: &BuildArgs,
        destination_ref: &str,
    ) -> Result<BuildOutcome, Error> {
        let client = &self.client;
        let url = format!("{}/build", self.registry_url);
        let resp: BuildResponse = self
            .registry_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({
                        "src_dir": src_dir,
                        "build_args": build_args.0,
                        "destination_ref": destination_ref,
                    }))
                    .timeout(Duration::from_secs(1800))
                    .send()
                    .await;
                decode_json(classify(resp).await?).await
            })
            .await?;
        Ok(BuildOutcome {
            digest: ImageDigest(resp.digest),
            logs: resp.logs,
        })
    }

    async fn push(&self, image_ref: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/push", self.registry_url);
        self.registry_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({ "image_ref": image_ref }))
                    .timeout(Duration::from_secs(600))
                    .send()
                    .await;
                classify(resp).await.map(|_| ())
            })
            .await
    }

    async fn delete(&self, image_ref: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/images/{}", self.registry_url, urlencoding(image_ref));
        self.registry_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }

    async fn tag(&self, src_ref: &str, dst_ref: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/tag", self.registry_url);
        self.registry_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({ "src_ref": src_ref, "dst_ref": dst_ref }))
                    .send()
                    .await;
                classify(resp).await.map(|_| ())
            })
            .await
    }
}

#[derive(Deserialize)]
struct CloneResponse {
    commit_sha: String,
}

#[async_trait]
impl CloneAdapter for HttpAdapter {
    async fn clone_repo(
        &self,
        provider: &str,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
        dst_dir: &str,
    ) -> Result<String, Error> {
        let client = &self.client;
        let url = format!("{}/clone", self.compute_url);
        let resp: CloneResponse = self
            .compute_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .bearer_auth(token)
                    .json(&serde_json::json!({
                        "provider": provider,
                        "owner": owner,
                        "repo": repo,
                        "branch": branch,
                        "dst_dir": dst_dir,
                    }))
                    .timeout(Duration::from_secs(300))
                    .send()
                    .await;
                decode_json(classify(resp).await?).await
            })
            .await?;
        Ok(resp.commit_sha)
    }

    async fn unregister_webhook(&self, handle: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/webhooks/{}", self.compute_url, urlencoding(handle));
        self.compute_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }
}

#[derive(Deserialize)]
struct WorkloadResponse {
    handle: String,
}

#[async_trait]
impl WorkloadAdapter for HttpAdapter {
    async fn create(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, Error> {
        let client = &self.client;
        let url = format!("{}/workloads", self.compute_url);
        let resp: WorkloadResponse = self
            .compute_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(spec)
                    .timeout(Duration::from_secs(120))
                    .send()
                    .await;
                decode_json(classify(resp).await?).await
            })
            .await?;
        Ok(WorkloadHandle(resp.handle))
    }

    async fn get(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, Error> {
        #[derive(Deserialize)]
        struct StatusResponse {
            status: WorkloadStatus,
        }
        let client = &self.client;
        let url = format!("{}/workloads/{}", self.compute_url, handle.0);
        let resp: StatusResponse = self
            .compute_breaker
            .call(|| async { decode_json(classify(client.get(&url).send().await).await?).await })
            .await?;
        Ok(resp.status)
    }

    async fn wait_for(
        &self,
        handle: &WorkloadHandle,
        target: WorkloadStatus,
        deadline: Duration,
    ) -> Result<(), Error> {
        let start = tokio::time::Instant::now();
        loop {
            if self.get(handle).await? == target {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(Error::Transient(format!(
                    "{} did not reach {target:?} within the deadline",
                    handle.0
                )));
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn stop(&self, handle: &WorkloadHandle, graceful_seconds: u32) -> Result<(), Error> {
        let client = &self.client;
        let url = format!(
            "{}/workloads/{}/stop?graceful_seconds={}",
            self.compute_url, handle.0, graceful_seconds
        );
        self.compute_breaker
            .call(|| async { classify(client.post(&url).send().await).await.map(|_| ()) })
            .await
    }

    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/workloads/{}", self.compute_url, handle.0);
        self.compute_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }

    async fn logs(&self, handle: &WorkloadHandle, from: i64, to: i64) -> Result<Vec<String>, Error> {
        #[derive(Deserialize)]
        struct LogsResponse {
            lines: Vec<String>,
        }
        let client = &self.client;
        let url = format!(
            "{}/workloads/{}/logs?from={}&to={}",
            self.compute_url, handle.0, from, to
        );
        let resp: LogsResponse = self
            .compute_breaker
            .call(|| async { decode_json(classify(client.get(&url).send().await).await?).await })
            .await?;
        Ok(resp.lines)
    }
}

#[derive(Deserialize)]
struct AddrResponse {
    handle: String,
}

#[derive(Deserialize)]
struct DnsRecordResponse {
    handle: String,
}

#[async_trait]
impl NetworkAdapter for HttpAdapter {
    async fn allocate_public_addr(&self, tenant: &str) -> Result<AddrHandle, Error> {
        let client = &self.client;
        let url = format!("{}/addresses", self.compute_url);
        let resp: AddrResponse = self
            .compute_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({ "tenant": tenant }))
                    .send()
                    .await;
                decode_json(classify(resp).await?).await
            })
            .await?;
        Ok(AddrHandle(resp.handle))
    }

    async fn attach(&self, addr: &AddrHandle, workload: &WorkloadHandle) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/addresses/{}/attach", self.compute_url, addr.0);
        self.compute_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({ "workload": workload.0 }))
                    .send()
                    .await;
                classify(resp).await.map(|_| ())
            })
            .await
    }

    async fn release_addr(&self, addr: &AddrHandle) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/addresses/{}", self.compute_url, addr.0);
        self.compute_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }

    async fn create_security_group(&self, rules: &serde_json::Value) -> Result<String, Error> {
        #[derive(Deserialize)]
        struct SecurityGroupResponse {
            id: String,
        }
        let client = &self.client;
        let url = format!("{}/security-groups", self.compute_url);
        let resp: SecurityGroupResponse = self
            .compute_breaker
            .call(|| async {
                let resp = client.post(&url).json(rules).send().await;
                decode_json(classify(resp).await?).await
            })
            .await?;
        Ok(resp.id)
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/security-groups/{}", self.compute_url, urlencoding(id));
        self.compute_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }

    async fn create_dns_record(
        &self,
        zone: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<RecordHandle, Error> {
        let client = &self.client;
        let url = format!("{}/zones/{}/records", self.dns_url, zone);
        let resp: DnsRecordResponse = self
            .dns_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({ "name": name, "type": record_type, "value": value }))
                    .timeout(Duration::from_secs(30))
                    .send()
                    .await;
                decode_json(classify(resp).await?).await
            })
            .await?;
        Ok(RecordHandle(resp.handle))
    }

    async fn delete_dns_record(&self, handle: &RecordHandle) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/records/{}", self.dns_url, handle.0);
        self.dns_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }
}

#[async_trait]
impl RouterAdapter for HttpAdapter {
    async fn publish(&self, hostname: &str, upstream: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/routes", self.router_url);
        self.router_breaker
            .call(|| async {
                let resp = client
                    .post(&url)
                    .json(&serde_json::json!({ "hostname": hostname, "upstream": upstream }))
                    .timeout(Duration::from_secs(30))
                    .send()
                    .await;
                classify(resp).await.map(|_| ())
            })
            .await
    }

    async fn unpublish(&self, hostname: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/routes/{}", self.router_url, urlencoding(hostname));
        self.router_breaker
            .call(|| async { classify(client.delete(&url).send().await).await.map(|_| ()) })
            .await
    }

    async fn attach_certificate(&self, hostname: &str) -> Result<(), Error> {
        let client = &self.client;
        let url = format!("{}/routes/{}/certificate", self.router_url, urlencoding(hostname));
        self.router_breaker
            .call(|| async { classify(client.post(&url).send().await).await.map(|_| ()) })
            .await
    }
}

fn urlencoding(value: &str) -> String {
    value.replace('/', "%2F").replace(':', "%3A")
}
