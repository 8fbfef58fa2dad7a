pub mod audit;
pub mod audit_log;
pub mod blob_store;
pub mod catalog;
pub mod cipher;
