use crate::app::AppState;
use crate::module::execute::error::ExecuteError;
use crate::module::execute::model::{EXECUTOR_INTERFACE, ResolvedExecutionTask, TracingOptions};
use crate::module::execute::schema::{ExecuteRequest, SubmitExecutionResponse};
use crate::service::contract_service;
use crate::service::metrics_service;
use crate::service::provider_service::{self, RpcConnector};
use crate::service::queue_service;
use crate::service::wallet_service;
use chrono::Utc;
use std::time::Duration;
use tracing::{Instrument, info_span, warn};

pub struct ValidationContext<'a> {
    pub connector: &'a dyn RpcConnector,
    pub private_key: Option<&'a str>,
    pub probe_window: Duration,
}

impl<'a> ValidationContext<'a> {
    pub fn from_state(state: &'a AppState) -> Self {
        Self {
            connector: state.connector.as_ref(),
            private_key: state.config.private_key.as_deref(),
            probe_window: Duration::from_millis(state.config.probe_window_ms),
        }
    }
}

// Order is fixed: endpoint, then signer, then contract code.
pub async fn validate(
    ctx: &ValidationContext<'_>,
    req: &ExecuteRequest,
) -> Result<ResolvedExecutionTask, ExecuteError> {
    let msg = &req.cross_subnet_message;

    let connection = provider_service::connect_endpoint(
        ctx.connector,
        &msg.receiving_subnet_endpoint,
        ctx.probe_window,
    )
    .await?;
    let signer = wallet_service::resolve_signer(ctx.private_key)?;
    let contract = contract_service::resolve_contract(
        &connection,
        &msg.contract_address,
        EXECUTOR_INTERFACE,
        signer,
    )
    .await?;

    Ok(ResolvedExecutionTask::new(
        req.cert_id.clone(),
        msg.id.clone(),
        req.inclusion_proof.clone(),
        contract,
    ))
}

pub async fn execute(
    state: &AppState,
    req: ExecuteRequest,
    tracing_opts: TracingOptions,
) -> Result<SubmitExecutionResponse, ExecuteError> {
    let span = info_span!(
        "execute",
        cert_id = %req.cert_id,
        cross_subnet_message_id = %req.cross_subnet_message.id,
        traceparent = tracing_opts.traceparent.as_deref().unwrap_or_default(),
    );

    async move {
        let ctx = ValidationContext::from_state(state);
        let task = validate(&ctx, &req).await.map_err(|e| {
            metrics_service::inc_validation_failures();
            metrics_service::set_last_error_ts(Utc::now().timestamp());
            warn!(error_code = e.code(), error = %e, "execution request rejected");
            e
        })?;

        queue_service::submit_execution_job(state.infra.queue.as_ref(), &task, &tracing_opts).await
    }
    .instrument(span)
    .await
}
