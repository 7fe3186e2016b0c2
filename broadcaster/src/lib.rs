//! Persists every deployment log line and best-effort fans it out to live
//! subscribers. Grounded on the teacher's `DeployerService`, which keeps an
//! `Arc<Mutex<Option<Sender<...>>>>` for project events; here the registry
//! holds one `broadcast::Sender` per deployment instead of a single global
//! channel, since subscribers always scope to one deployment (§4.9).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use platform_common::{models::*, Error, Id};
use platform_store::Store;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    channels: Mutex<HashMap<Id, broadcast::Sender<DeploymentLog>>>,
}

impl Broadcaster {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Replays from the store, then the caller switches to `subscribe` for
    /// anything published after the replay — the durability contract from
    /// §4.9 ("durability is via the store; clients replay then switch to
    /// the live channel").
    pub async fn replay(&self, deployment_id: Id, since_seq: Option<i64>) -> Result<Vec<DeploymentLog>, Error> {
        self.inner.store.list_logs(deployment_id, since_seq).await
    }

    /// Registers interest in a deployment's live log stream. Messages
    /// published before this call are not delivered; callers must `replay`
    /// first to avoid a gap.
    pub fn subscribe(&self, deployment_id: Id) -> broadcast::Receiver<DeploymentLog> {
        let mut channels = self.inner.channels.lock().unwrap();
        channels
            .entry(deployment_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Appends the log row, then publishes it best-effort: a publish
    /// failure (no subscribers, or a lagging channel) never fails the
    /// deployment, per §4.9.
    #[instrument(skip(self, message, metadata))]
    pub async fn log(
        &self,
        deployment_id: Id,
        phase: LogPhase,
        level: LogLevel,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<DeploymentLog, Error> {
        let log = self
            .inner
            .store
            .append_log(deployment_id, phase, level, message, metadata)
            .await?;

        let sender = self.inner.channels.lock().unwrap().get(&deployment_id).cloned();
        if let Some(sender) = sender {
            if sender.send(log.clone()).is_err() {
                debug!(%deployment_id, "no active subscribers for this deployment's log stream");
            }
        }

        Ok(log)
    }

    /// Drops the channel for a deployment once it reaches a terminal state,
    /// so the registry doesn't grow unbounded over the process lifetime.
    pub fn retire(&self, deployment_id: Id) {
        self.inner.channels.lock().unwrap().remove(&deployment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_logs_published_after_they_subscribe() {
        let store = Store::in_memory().await;
        let org = store.create_organization("acme").await.unwrap();
        let project = store
            .create_project(org.id, "proj", "tenant-1")
            .await
            .unwrap();
        let service = store
            .create_service(
                project.id,
                "web",
                ServiceSize::Small,
                8080,
                HealthCheckConfig::default(),
                true,
            )
            .await
            .unwrap();
        let deployment = store
            .create_deployment(service.id, Trigger::Manual, None, None, None)
            .await
            .unwrap();

        let broadcaster = Broadcaster::new(store);
        let mut rx = broadcaster.subscribe(deployment.id);

        broadcaster
            .log(
                deployment.id,
                LogPhase::Build,
                LogLevel::Info,
                "building",
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "building");
    }

    #[tokio::test]
    async fn replay_returns_logs_persisted_before_any_subscriber_existed() {
        let store = Store::in_memory().await;
        let org = store.create_organization("acme").await.unwrap();
        let project = store
            .create_project(org.id, "proj", "tenant-1")
            .await
            .unwrap();
        let service = store
            .create_service(
                project.id,
                "web",
                ServiceSize::Small,
                8080,
                HealthCheckConfig::default(),
                true,
            )
            .await
            .unwrap();
        let deployment = store
            .create_deployment(service.id, Trigger::Manual, None, None, None)
            .await
            .unwrap();

        let broadcaster = Broadcaster::new(store);
        broadcaster
            .log(
                deployment.id,
                LogPhase::Clone,
                LogLevel::Info,
                "cloning",
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let replayed = broadcaster.replay(deployment.id, None).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].message, "cloning");
    }
}
