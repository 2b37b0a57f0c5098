pub mod acl;
pub mod config;
pub mod error;
pub mod events;
pub mod persistence;
pub mod storage;
