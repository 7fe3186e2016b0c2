//! Uniform interface over the external systems a deployment touches: image
//! registry, git hosting, compute/workload scheduler, network, and router.
//! The pipeline (C5) is written once against this facade; `MockAdapter`
//! drives it deterministically in tests, `HttpAdapter` drives a real
//! control plane over `reqwest`, following the split the teacher keeps
//! between `provisioner`'s trait-based DAL and its concrete RDS/permit HTTP
//! clients.

mod breaker;
mod http;
mod mock;

pub use breaker::{Breaker, BreakerState};
pub use http::HttpAdapter;
pub use mock::MockAdapter;

use async_trait::async_trait;
use platform_common::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArgs(pub serde_json::Value);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDigest(pub String);

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub digest: ImageDigest,
    pub logs: Vec<String>,
}

/// Builds, pushes, and tags workload images.
#[async_trait]
pub trait ImageAdapter: Send + Sync {
    async fn build(
        &self,
        src_dir: &str,
        build_args: &BuildArgs,
        destination_ref: &str,
    ) -> Result<BuildOutcome, Error>;
    async fn push(&self, image_ref: &str) -> Result<(), Error>;
    async fn delete(&self, image_ref: &str) -> Result<(), Error>;
    async fn tag(&self, src_ref: &str, dst_ref: &str) -> Result<(), Error>;
}

/// Fetches a commit from a Git provider into a scratch directory.
#[async_trait]
pub trait CloneAdapter: Send + Sync {
    async fn clone_repo(
        &self,
        provider: &str,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
        dst_dir: &str,
    ) -> Result<String, Error>;
    async fn unregister_webhook(&self, handle: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Creating,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub image_ref: String,
    pub env: Vec<(String, String)>,
    pub cpu_millicores: u32,
    pub mem_mib: u32,
    pub restart_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadHandle(pub String);

/// Creates, watches, and tears down a running instance of an image.
#[async_trait]
pub trait WorkloadAdapter: Send + Sync {
    async fn create(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, Error>;
    async fn get(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, Error>;
    async fn wait_for(
        &self,
        handle: &WorkloadHandle,
        target: WorkloadStatus,
        deadline: std::time::Duration,
    ) -> Result<(), Error>;
    async fn stop(&self, handle: &WorkloadHandle, graceful_seconds: u32) -> Result<(), Error>;
    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), Error>;
    async fn logs(&self, handle: &WorkloadHandle, from: i64, to: i64) -> Result<Vec<String>, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddrHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordHandle(pub String);

/// Public addresses, security groups, and DNS records.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn allocate_public_addr(&self, tenant: &str) -> Result<AddrHandle, Error>;
    async fn attach(&self, addr: &AddrHandle, workload: &WorkloadHandle) -> Result<(), Error>;
    async fn release_addr(&self, addr: &AddrHandle) -> Result<(), Error>;
    async fn create_security_group(&self, rules: &serde_json::Value) -> Result<String, Error>;
    async fn delete_security_group(&self, id: &str) -> Result<(), Error>;
    async fn create_dns_record(
        &self,
        zone: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<RecordHandle, Error>;
    async fn delete_dns_record(&self, handle: &RecordHandle) -> Result<(), Error>;
}

/// Publishes a hostname to an upstream through the edge router/proxy.
#[async_trait]
pub trait RouterAdapter: Send + Sync {
    async fn publish(&self, hostname: &str, upstream: &str) -> Result<(), Error>;
    async fn unpublish(&self, hostname: &str) -> Result<(), Error>;
    async fn attach_certificate(&self, hostname: &str) -> Result<(), Error>;
}

/// The full capability surface the pipeline depends on. Implementors
/// combine the five facets above; both shipped adapters implement all of
/// them over one underlying transport.
pub trait RuntimeAdapter:
    ImageAdapter + CloneAdapter + WorkloadAdapter + NetworkAdapter + RouterAdapter
{
}

impl<T> RuntimeAdapter for T where
    T: ImageAdapter + CloneAdapter + WorkloadAdapter + NetworkAdapter + RouterAdapter
{
}

// Forwarding impls so `Arc<MockAdapter>`/`Arc<HttpAdapter>` also satisfy
// `RuntimeAdapter`: the deployment handler and the cleanup orchestrator each
// own their adapter by value, but both need to observe the same underlying
// workload/DNS/router state, so the binary wires them to the same `Arc`.

#[async_trait]
impl<T: ImageAdapter + ?Sized> ImageAdapter for std::sync::Arc<T> {
    async fn build(
        &self,
        src_dir: &str,
        build_args: &BuildArgs,
        destination_ref: &str,
    ) -> Result<BuildOutcome, Error> {
        (**self).build(src_dir, build_args, destination_ref).await
    }
    async fn push(&self, image_ref: &str) -> Result<(), Error> {
        (**self).push(image_ref).await
    }
    async fn delete(&self, image_ref: &str) -> Result<(), Error> {
        (**self).delete(image_ref).await
    }
    async fn tag(&self, src_ref: &str, dst_ref: &str) -> Result<(), Error> {
        (**self).tag(src_ref, dst_ref).await
    }
}

#[async_trait]
impl<T: CloneAdapter + ?Sized> CloneAdapter for std::sync::Arc<T> {
    async fn clone_repo(
        &self,
        provider: &str,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
        dst_dir: &str,
    ) -> Result<String, Error> {
        (**self).clone_repo(provider, owner, repo, branch, token, dst_dir).await
    }
    async fn unregister_webhook(&self, handle: &str) -> Result<(), Error> {
        (**self).unregister_webhook(handle).await
    }
}

#[async_trait]
impl<T: WorkloadAdapter + ?Sized> WorkloadAdapter for std::sync::Arc<T> {
    async fn create(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle, Error> {
        (**self).create(spec).await
    }
    async fn get(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, Error> {
        (**self).get(handle).await
    }
    async fn wait_for(
        &self,
        handle: &WorkloadHandle,
        target: WorkloadStatus,
        deadline: std::time::Duration,
    ) -> Result<(), Error> {
        (**self).wait_for(handle, target, deadline).await
    }
    async fn stop(&self, handle: &WorkloadHandle, graceful_seconds: u32) -> Result<(), Error> {
        (**self).stop(handle, graceful_seconds).await
    }
    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), Error> {
        (**self).delete(handle).await
    }
    async fn logs(&self, handle: &WorkloadHandle, from: i64, to: i64) -> Result<Vec<String>, Error> {
        (**self).logs(handle, from, to).await
    }
}

#[async_trait]
impl<T: NetworkAdapter + ?Sized> NetworkAdapter for std::sync::Arc<T> {
    async fn allocate_public_addr(&self, tenant: &str) -> Result<AddrHandle, Error> {
        (**self).allocate_public_addr(tenant).await
    }
    async fn attach(&self, addr: &AddrHandle, workload: &WorkloadHandle) -> Result<(), Error> {
        (**self).attach(addr, workload).await
    }
    async fn release_addr(&self, addr: &AddrHandle) -> Result<(), Error> {
        (**self).release_addr(addr).await
    }
    async fn create_security_group(&self, rules: &serde_json::Value) -> Result<String, Error> {
        (**self).create_security_group(rules).await
    }
    async fn delete_security_group(&self, id: &str) -> Result<(), Error> {
        (**self).delete_security_group(id).await
    }
    async fn create_dns_record(
        &self,
        zone: &str,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<RecordHandle, Error> {
        (**self).create_dns_record(zone, name, record_type, value).await
    }
    async fn delete_dns_record(&self, handle: &RecordHandle) -> Result<(), Error> {
        (**self).delete_dns_record(handle).await
    }
}

#[async_trait]
impl<T: RouterAdapter + ?Sized> RouterAdapter for std::sync::Arc<T> {
    async fn publish(&self, hostname: &str, upstream: &str) -> Result<(), Error> {
        (**self).publish(hostname, upstream).await
    }
    async fn unpublish(&self, hostname: &str) -> Result<(), Error> {
        (**self).unpublish(hostname).await
    }
    async fn attach_certificate(&self, hostname: &str) -> Result<(), Error> {
        (**self).attach_certificate(hostname).await
    }
}
