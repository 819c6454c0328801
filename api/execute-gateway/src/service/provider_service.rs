use crate::module::execute::error::ExecuteError;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

pub type Connection = Arc<dyn RpcConnection>;

#[async_trait]
pub trait RpcConnection: Debug + Send + Sync {
    fn endpoint(&self) -> &str;

    async fn get_code(&self, address: Address) -> Result<Bytes, String>;
}

// Errors from the transport arrive out of band on `errors`; the sender is
// dropped once the connector has nothing more to report. `handshake` is the
// background task feeding `errors`, cancelled once the probe has decided.
pub struct OpenedConnection {
    pub connection: Connection,
    pub errors: mpsc::UnboundedReceiver<String>,
    pub handshake: Option<AbortHandle>,
}

#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<OpenedConnection, String>;
}

#[derive(Debug)]
pub enum ProbeOutcome {
    Reachable(Connection),
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn into_result(self) -> Result<Connection, ExecuteError> {
        match self {
            Self::Reachable(connection) => Ok(connection),
            Self::Unreachable(_) => Err(ExecuteError::InvalidEndpoint),
        }
    }
}

#[derive(Debug)]
pub struct EthersConnection {
    endpoint: String,
    provider: Provider<Http>,
}

#[async_trait]
impl RpcConnection for EthersConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, String> {
        self.provider
            .get_code(address, None)
            .await
            .map_err(|e| format!("eth_getCode failed: {e}"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EthersConnector;

#[async_trait]
impl RpcConnector for EthersConnector {
    async fn open(&self, endpoint: &str) -> Result<OpenedConnection, String> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| format!("provider init failed: {e}"))?;

        let (tx, errors) = mpsc::unbounded_channel();
        let handshake = provider.clone();
        let target = endpoint.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = handshake.get_chainid().await {
                debug!(endpoint = %target, error = %e, "rpc handshake failed");
                let _ = tx.send(format!("eth_chainId failed: {e}"));
            }
        });

        Ok(OpenedConnection {
            connection: Arc::new(EthersConnection {
                endpoint: endpoint.to_string(),
                provider,
            }),
            errors,
            handshake: Some(task.abort_handle()),
        })
    }
}

pub async fn probe(connector: &dyn RpcConnector, endpoint: &str, window: Duration) -> ProbeOutcome {
    let OpenedConnection {
        connection,
        mut errors,
        handshake,
    } = match connector.open(endpoint).await {
        Ok(opened) => opened,
        Err(reason) => return ProbeOutcome::Unreachable(reason),
    };

    let timer = sleep(window);
    tokio::pin!(timer);

    let outcome = tokio::select! {
        biased;
        reported = errors.recv() => match reported {
            Some(reason) => ProbeOutcome::Unreachable(reason),
            None => ProbeOutcome::Reachable(connection),
        },
        _ = &mut timer => ProbeOutcome::Reachable(connection),
    };

    // The handshake must not outlive the probe.
    if let Some(handshake) = handshake {
        handshake.abort();
    }
    outcome
}

pub async fn connect_endpoint(
    connector: &dyn RpcConnector,
    endpoint: &str,
    window: Duration,
) -> Result<Connection, ExecuteError> {
    let outcome = probe(connector, endpoint, window).await;
    if let ProbeOutcome::Unreachable(reason) = &outcome {
        warn!(endpoint = %endpoint, reason = %reason, "rpc endpoint unreachable");
    }
    outcome.into_result()
}
