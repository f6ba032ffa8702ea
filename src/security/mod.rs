pub mod audit_log;
pub mod bootstrap;
pub mod policy;
pub mod token;
pub mod vault_client;
