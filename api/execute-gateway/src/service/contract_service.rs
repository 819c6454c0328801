use crate::module::execute::error::ExecuteError;
use crate::module::execute::model::ContractHandle;
use crate::service::provider_service::Connection;
use ethers::signers::LocalWallet;
use ethers::types::Address;
use std::str::FromStr;
use tracing::warn;

pub async fn resolve_contract(
    connection: &Connection,
    contract_address: &str,
    interface: &'static str,
    signer: LocalWallet,
) -> Result<ContractHandle, ExecuteError> {
    let address = Address::from_str(contract_address.trim()).map_err(|e| {
        warn!(contract_address = %contract_address, error = %e, "contract address does not parse");
        ExecuteError::InvalidContract
    })?;

    let code = connection.get_code(address).await.map_err(|e| {
        warn!(contract_address = %contract_address, error = %e, "code lookup failed");
        ExecuteError::InvalidContract
    })?;
    if code.as_ref().is_empty() {
        warn!(contract_address = %contract_address, endpoint = %connection.endpoint(), "no code deployed at address");
        return Err(ExecuteError::InvalidContract);
    }

    Ok(ContractHandle {
        connection: connection.clone(),
        address,
        interface,
        signer,
    })
}
