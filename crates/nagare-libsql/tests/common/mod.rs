use nagare_libsql::{LibSqlConfig, LibSqlStore, TableNames};
use tempfile::TempDir;

/// A store over a throwaway file-backed database. The temp dir must outlive
/// the store, so it rides along.
pub struct LocalDbSetup {
    pub store: LibSqlStore,
    pub path: String,
    #[allow(dead_code)]
    dir: TempDir,
}

impl LocalDbSetup {
    pub async fn new() -> Self {
        Self::with_tables(TableNames::default()).await
    }

    pub async fn with_tables(tables: TableNames) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir
            .path()
            .join("nagare.db")
            .to_str()
            .expect("utf-8 path")
            .to_string();
        let config = LibSqlConfig::from_local(path.as_str()).with_tables(tables);
        let store = LibSqlStore::connect(config).await.expect("connect store");
        Self { store, path, dir }
    }
}
