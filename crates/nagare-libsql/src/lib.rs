#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

mod config;
mod read;
mod store;

pub use config::{ConfigError, LibSqlConfig, LibSqlConfigBuilder, TableNames};
pub use read::{
    ConnectionConfig, ConnectionManager, EmbeddedReplicaConfig, LocalConfig, RemoteConfig,
};
pub use store::{LibSqlStore, LibSqlStoreError, LibSqlTransaction};
