use super::schema::JobStatus;
use crate::service::provider_service::Connection;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EXECUTE_JOB_NAME: &str = "execute";
pub const EXECUTOR_INTERFACE: &str = "CrossSubnetExecutor";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TracingOptions {
    pub traceparent: Option<String>,
}

impl TracingOptions {
    pub fn new(traceparent: Option<String>) -> Self {
        Self {
            traceparent: traceparent.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContractHandle {
    pub connection: Connection,
    pub address: Address,
    pub interface: &'static str,
    pub signer: LocalWallet,
}

impl ContractHandle {
    pub fn binding(&self) -> ContractBinding {
        ContractBinding {
            address: format!("{:#x}", self.address),
            endpoint: self.connection.endpoint().to_string(),
            interface: self.interface.to_string(),
            signer: format!("{:#x}", self.signer.address()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractBinding {
    pub address: String,
    pub endpoint: String,
    pub interface: String,
    pub signer: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedExecutionTask {
    cert_id: String,
    cross_subnet_message_id: String,
    inclusion_proof: Value,
    contract: ContractHandle,
}

impl ResolvedExecutionTask {
    pub(crate) fn new(
        cert_id: String,
        cross_subnet_message_id: String,
        inclusion_proof: Value,
        contract: ContractHandle,
    ) -> Self {
        Self {
            cert_id,
            cross_subnet_message_id,
            inclusion_proof,
            contract,
        }
    }

    pub fn cert_id(&self) -> &str {
        &self.cert_id
    }

    pub fn cross_subnet_message_id(&self) -> &str {
        &self.cross_subnet_message_id
    }

    pub fn contract(&self) -> &ContractHandle {
        &self.contract
    }

    pub fn to_job_data(&self) -> ExecuteJobData {
        ExecuteJobData {
            cert_id: self.cert_id.clone(),
            contract: self.contract.binding(),
            cross_subnet_message_id: self.cross_subnet_message_id.clone(),
            inclusion_proof: self.inclusion_proof.clone(),
        }
    }
}

// Payload consumed by the processor; never carries the signing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteJobData {
    pub cert_id: String,
    pub contract: ContractBinding,
    pub cross_subnet_message_id: String,
    pub inclusion_proof: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub data: Value,
    pub timestamp: i64,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    pub return_value: Option<Value>,
    pub failed_reason: Option<String>,
    pub traceparent: Option<String>,
}
