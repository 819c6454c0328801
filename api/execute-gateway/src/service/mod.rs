pub mod contract_service;
pub mod execute_service;
pub mod health_service;
pub mod metrics_service;
pub mod provider_service;
pub mod queue_service;
pub mod wallet_service;
