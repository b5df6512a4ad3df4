//! etcd-backed persisted query store
//!
//! Records are stored as JSON under `<prefix>/<hash>`. Create-if-absent is a
//! transaction guarded by `create_revision == 0`, so concurrent writers of
//! the same hash cannot both succeed.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, Txn, TxnOp, TxnOpResponse};
use log::{debug, info};
use tokio::sync::Mutex;

use super::{InsertOutcome, PersistedQueryRecord, QueryBackend};
use crate::{
    config::Etcd,
    core::{PipelineError, PipelineResult},
};

pub struct EtcdBackend {
    config: Etcd,
    client: Mutex<Option<Client>>,
}

impl EtcdBackend {
    pub fn new(config: Etcd) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}/{}", self.config.prefix.trim_end_matches('/'), id)
    }

    async fn create_client(&self) -> Result<Client, etcd_client::Error> {
        let mut options = ConnectOptions::default();
        if let Some(timeout) = self.config.timeout {
            options = options.with_timeout(Duration::from_secs(timeout as u64));
        };
        if let Some(connect_timeout) = self.config.connect_timeout {
            options = options.with_connect_timeout(Duration::from_secs(connect_timeout as u64));
        };
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            options = options.with_user(user.clone(), password.clone());
        };

        Client::connect(self.config.host.clone(), Some(options)).await
    }

    /// Hand out a client, connecting on first use
    async fn client(&self) -> PipelineResult<Client> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            info!("Creating new etcd client...");
            *guard = Some(self.create_client().await.map_err(unavailable)?);
        }
        guard
            .clone()
            .ok_or_else(|| PipelineError::StoreUnavailable("etcd client is not initialized".to_string()))
    }

    /// Drop the cached client so the next call reconnects
    async fn reset(&self) {
        *self.client.lock().await = None;
    }
}

fn unavailable(err: etcd_client::Error) -> PipelineError {
    PipelineError::StoreUnavailable(format!("etcd: {err}"))
}

fn decode(bytes: &[u8]) -> PipelineResult<PersistedQueryRecord> {
    serde_json::from_slice(bytes)
        .map_err(|e| PipelineError::StoreUnavailable(format!("corrupt persisted query record: {e}")))
}

#[async_trait]
impl QueryBackend for EtcdBackend {
    fn name(&self) -> &str {
        "etcd"
    }

    async fn get(&self, id: &str) -> PipelineResult<Option<PersistedQueryRecord>> {
        let mut client = self.client().await?;
        let response = match client.get(self.key(id), None).await {
            Ok(response) => response,
            Err(e) => {
                self.reset().await;
                return Err(unavailable(e));
            }
        };

        response.kvs().first().map(|kv| decode(kv.value())).transpose()
    }

    async fn insert_if_absent(&self, record: PersistedQueryRecord) -> PipelineResult<InsertOutcome> {
        let key = self.key(&record.id);
        let value = serde_json::to_vec(&record)
            .map_err(|e| crate::internal_error!("encode persisted query: {}", e))?;

        let txn = Txn::new()
            .when(vec![Compare::create_revision(key.clone(), CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key.clone(), value, None)])
            .or_else(vec![TxnOp::get(key.clone(), None)]);

        let mut client = self.client().await?;
        let response = match client.txn(txn).await {
            Ok(response) => response,
            Err(e) => {
                self.reset().await;
                return Err(unavailable(e));
            }
        };

        if response.succeeded() {
            debug!("Inserted persisted query {key}");
            return Ok(InsertOutcome::Inserted);
        }

        for op in response.op_responses() {
            if let TxnOpResponse::Get(get) = op {
                if let Some(kv) = get.kvs().first() {
                    return Ok(InsertOutcome::Existing(decode(kv.value())?));
                }
            }
        }

        Err(PipelineError::StoreUnavailable(format!(
            "etcd transaction on {key} neither wrote nor found a record"
        )))
    }
}
