use crate::module::execute::error::ExecuteError;
use ethers::signers::{LocalWallet, Signer};
use tracing::info;

pub fn resolve_signer(secret: Option<&str>) -> Result<LocalWallet, ExecuteError> {
    let secret = secret
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ExecuteError::InvalidPrivateKey)?;

    secret
        .parse::<LocalWallet>()
        .map_err(|_| ExecuteError::InvalidPrivateKey)
}

pub fn verify_private_key(secret: Option<&str>) -> Result<(), ExecuteError> {
    let wallet = resolve_signer(secret)?;
    info!(signer = %format!("{:#x}", wallet.address()), "signing key loaded");
    Ok(())
}
