//! A deterministic, in-memory stand-in for every external system, used by
//! the S1-S6 scenario tests the way the teacher's `provisioner` tests drive
//! its DAL against a throwaway local Postgres rather than a real cloud
//! account.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use platform_common::Error;

use crate::{
    AddrHandle, BuildArgs, BuildOutcome, CloneAdapter, ImageAdapter, ImageDigest, NetworkAdapter,
    RecordHandle, RouterAdapter, WorkloadAdapter, WorkloadHandle, WorkloadSpec, WorkloadStatus,
};

#[derive(Default)]
struct State {
    images: HashMap<String, ImageDigest>,
    workloads: HashMap<WorkloadHandle, WorkloadStatus>,
    published: HashMap<String, String>,
    next_id: u64,
}

/// Every call succeeds immediately and deterministically; `fail_next` lets a
/// test inject exactly one `Transient`/`Permanent` failure to exercise the
/// pipeline's failure-policy branches.
pub struct MockAdapter {
    state: Mutex<State>,
    fail_next: Mutex<Option<Error>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next_call(&self, err: Error) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    fn take_injected_failure(&self) -> Option<Error> {
        self.fail_next.lock().unwrap().take()
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl ImageAdapter for MockAdapter {
    async fn build(
        &self,
        _src_dir: &str,
        _build_args: &BuildArgs,
        destination_ref: &str,
    ) -> Result<BuildOutcome, Error> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        let digest = ImageDigest(format!("sha256:{:064x}", self.next_id()));
        self.state
            .lock()
            .unwrap()
            .images
            .insert(destination_ref.to_string(), digest.clone());
        Ok(BuildOutcome {
            digest,
            logs: vec!["mock build succeeded".to_string()],
        })
    }

    async fn push(&self, _image_ref: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn delete(&self, image_ref: &str) -> Result<(), Error> {
        self.state.lock().unwrap().images.remove(image_ref);
        Ok(())
    }

    async fn tag(&self, src_ref: &str, dst_ref: &str) -> Result<(), Error> {
        let digest = self
            .state
            .lock()
            .unwrap()
            .images
            .get(src_ref)
            .cloned()
            .ok_or_else(|| Error::Permanent(format!("no such image {src_ref}")))?;
        self.state
            .lock()
            .unwrap()
            .images
            .insert(dst_ref.to_string(), digest);
        Ok(())
    }
}

#[async_trait]
impl CloneAdapter for MockAdapter {
    async fn clone_repo(
        &self,
        _provider: &str,
        _owner: &str,
        _repo: &str,
        _branch: &str,
        _token: &str,
        _dst_dir: &str,
    ) -> Result<String, Error> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        Ok(format!("{:040x}", self.next_id()))
    }

    async fn unregister_webhook(&self, _handle: &str) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl WorkloadAdapter for MockAdapter {
    async fn create(&self, _spec: &WorkloadSpec) -> Result<WorkloadHandle, Error> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        let handle = WorkloadHandle(format!("workload-{}", self.next_id()));
        self.state
            .lock()
            .unwrap()
            .workloads
            .insert(handle.clone(), WorkloadStatus::Running);
        Ok(handle)
    }

    async fn get(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus, Error> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(handle)
            .copied()
            .ok_or_else(|| Error::NotFound(handle.0.clone()))
    }

    async fn wait_for(
        &self,
        handle: &WorkloadHandle,
        target: WorkloadStatus,
        _deadline: Duration,
    ) -> Result<(), Error> {
        let current = self.get(handle).await?;
        if current == target {
            Ok(())
        } else {
            Err(Error::Transient(format!(
                "{} never reached {target:?}",
                handle.0
            )))
        }
    }

    async fn stop(&self, handle: &WorkloadHandle, _graceful_seconds: u32) -> Result<(), Error> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .insert(handle.clone(), WorkloadStatus::Stopped);
        Ok(())
    }

    async fn delete(&self, handle: &WorkloadHandle) -> Result<(), Error> {
        self.state.lock().unwrap().workloads.remove(handle);
        Ok(())
    }

    async fn logs(&self, _handle: &WorkloadHandle, _from: i64, _to: i64) -> Result<Vec<String>, Error> {
        Ok(vec![])
    }
}

#[async_trait]
impl NetworkAdapter for MockAdapter {
    async fn allocate_public_addr(&self, _tenant: &str) -> Result<AddrHandle, Error> {
        Ok(AddrHandle(format!("addr-{}", self.next_id())))
    }

    async fn attach(&self, _addr: &AddrHandle, _workload: &WorkloadHandle) -> Result<(), Error> {
        Ok(())
    }

    async fn release_addr(&self, _addr: &AddrHandle) -> Result<(), Error> {
        Ok(())
    }

    async fn create_security_group(&self, _rules: &serde_json::Value) -> Result<String, Error> {
        Ok(format!("sg-{}", self.next_id()))
    }

    async fn delete_security_group(&self, _id: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn create_dns_record(
        &self,
        _zone: &str,
        _name: &str,
        _record_type: &str,
        _value: &str,
    ) -> Result<RecordHandle, Error> {
        Ok(RecordHandle(format!("dns-{}", self.next_id())))
    }

    async fn delete_dns_record(&self, _handle: &RecordHandle) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl RouterAdapter for MockAdapter {
    async fn publish(&self, hostname: &str, upstream: &str) -> Result<(), Error> {
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }
        self.state
            .lock()
            .unwrap()
            .published
            .insert(hostname.to_string(), upstream.to_string());
        Ok(())
    }

    async fn unpublish(&self, hostname: &str) -> Result<(), Error> {
        self.state.lock().unwrap().published.remove(hostname);
        Ok(())
    }

    async fn attach_certificate(&self, _hostname: &str) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_then_tag_then_delete_round_trips() {
        let adapter = MockAdapter::new();
        adapter
            .build("/src", &BuildArgs(serde_json::json!({})), "img:dev")
            .await
            .unwrap();
        adapter.tag("img:dev", "img:latest").await.unwrap();
        ImageAdapter::delete(&adapter, "img:dev").await.unwrap();

        let err = adapter.tag("img:dev", "img:other").await.unwrap_err();
        assert!(matches!(err, Error::Permanent(_)));
    }

    #[tokio::test]
    async fn injected_failure_fires_exactly_once() {
        let adapter = MockAdapter::new();
        adapter.fail_next_call(Error::Transient("network blip".into()));

        let first = adapter
            .clone_repo("github", "o", "r", "main", "tok", "/tmp")
            .await;
        assert!(first.is_err());

        let second = adapter
            .clone_repo("github", "o", "r", "main", "tok", "/tmp")
            .await;
        assert!(second.is_ok());
    }
}
