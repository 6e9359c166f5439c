use crate::config::LibSqlConfig;
use bytes::Bytes;
use libsql::{Builder, Cipher, Connection, Database, EncryptionConfig};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub auth_token: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddedReplicaConfig {
    pub local_path: String,
    pub sync_url: String,
    pub auth_token: String,
    pub sync_interval: Option<Duration>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    Local(LocalConfig),
    Remote(RemoteConfig),
    EmbeddedReplica(EmbeddedReplicaConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatabaseKind {
    Local,
    Remote,
    EmbeddedReplica,
}

/// Owns the database handle and hands out one connection per caller.
///
/// Transaction state lives on a connection, so every append transaction gets
/// its own connection; contending writers then queue on the busy timeout
/// instead of tripping over each other's open transactions.
#[derive(Debug)]
pub struct ConnectionManager {
    database: Database,
    kind: DatabaseKind,
    busy_timeout: Duration,
}

impl ConnectionManager {
    pub async fn new(config: ConnectionConfig) -> Result<Self, libsql::Error> {
        match config {
            ConnectionConfig::Local(local_config) => Self::new_local(local_config).await,
            ConnectionConfig::Remote(remote_config) => Self::new_remote(remote_config).await,
            ConnectionConfig::EmbeddedReplica(replica_config) => Self::new_embedded_replica(replica_config).await,
        }
    }

    pub async fn from_config(config: LibSqlConfig) -> Result<Self, libsql::Error> {
        Self::new(config.connection).await
    }

    pub async fn new_local(config: LocalConfig) -> Result<Self, libsql::Error> {
        let database = Builder::new_local(config.path).build().await?;
        Ok(Self {
            database,
            kind: DatabaseKind::Local,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub async fn new_remote(config: RemoteConfig) -> Result<Self, libsql::Error> {
        let database = Builder::new_remote(config.url, config.auth_token).build().await?;
        Ok(Self {
            database,
            kind: DatabaseKind::Remote,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub async fn new_embedded_replica(config: EmbeddedReplicaConfig) -> Result<Self, libsql::Error> {
        let mut builder = Builder::new_remote_replica(config.local_path, config.sync_url, config.auth_token);

        if let Some(sync_interval) = config.sync_interval {
            builder = builder.sync_interval(sync_interval);
        }

        if let Some(encryption_key) = config.encryption_key {
            let key_bytes = if encryption_key.len() == 64 {
                // Hex encoded key (64 chars = 32 bytes)
                hex::decode(&encryption_key)
                    .map_err(|e| libsql::Error::ConnectionFailed(format!("Invalid hex in encryption key: {}", e)))?
            } else {
                // Raw string key (should be 32 bytes)
                encryption_key.into_bytes()
            };

            if key_bytes.len() != 32 {
                return Err(libsql::Error::ConnectionFailed(
                    "Encryption key must be exactly 32 bytes (256 bits) for AES-256-CBC".to_string(),
                ));
            }

            let encryption_config = EncryptionConfig::new(Cipher::Aes256Cbc, Bytes::from(key_bytes));
            builder = builder.encryption_config(encryption_config);
        }

        let database = builder.build().await?;

        Ok(Self {
            database,
            kind: DatabaseKind::EmbeddedReplica,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub async fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = LibSqlConfig::from_env()?;
        Ok(Self::from_config(config).await?)
    }

    /// How long a new connection waits for another writer's lock before
    /// giving up with a busy error.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Open a fresh connection to the managed database.
    pub fn connect(&self) -> Result<Connection, libsql::Error> {
        let connection = self.database.connect()?;
        if self.kind != DatabaseKind::Remote {
            connection.busy_timeout(self.busy_timeout)?;
        }
        Ok(connection)
    }

    pub async fn sync(&self) -> Result<(), libsql::Error> {
        match self.kind {
            DatabaseKind::Local | DatabaseKind::Remote => Ok(()),
            DatabaseKind::EmbeddedReplica => {
                self.database.sync().await?;
                Ok(())
            }
        }
    }

    pub fn is_embedded_replica(&self) -> bool {
        self.kind == DatabaseKind::EmbeddedReplica
    }
}
