use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::encoding::Compression;
use crate::domain::value_objects::{ColumnName, ExcludedColumns, Schema, TableName};

/// Prefix for environment overrides, e.g.
/// `CUTOVER_VERIFIER__VERIFIER__BATCH_SIZE=500`.
const ENV_PREFIX: &str = "CUTOVER_VERIFIER";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: DbConfig,
    pub target: DbConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Database driver: "mysql" (default), "mariadb" or "postgres".
    #[serde(default = "default_driver")]
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Schema holding the migrated tables. Defaults to `dbname`, which is
    /// what MySQL means by a schema anyway.
    #[serde(default)]
    pub schema: Option<String>,
}

fn default_driver() -> String {
    "mysql".to_string()
}

/// Which verifier runs. `none` lets cutover proceed unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierKind {
    #[default]
    Inline,
    None,
}

/// Which keys a pass re-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckScope {
    /// Only the keys named by the signal (or recorded from signals).
    TouchedRows,
    /// Every key present on either side.
    FullTable,
}

/// What to do when a replicated change fails verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMismatchPolicy {
    /// Record the keys; the cutover pass re-checks them and fails if they
    /// still differ.
    #[default]
    Defer,
    /// Halt the migration immediately.
    HardStop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub kind: VerifierKind,
    /// Decompress columns listed in `compressed_columns` before comparing.
    #[serde(default)]
    pub decompress: bool,
    #[serde(default = "default_incremental_scope")]
    pub incremental_scope: CheckScope,
    #[serde(default = "default_cutover_scope")]
    pub cutover_scope: CheckScope,
    #[serde(default)]
    pub replication_mismatch: ReplicationMismatchPolicy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_incremental_scope() -> CheckScope {
    CheckScope::TouchedRows
}

fn default_cutover_scope() -> CheckScope {
    CheckScope::FullTable
}

fn default_batch_size() -> usize {
    200
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            kind: VerifierKind::default(),
            decompress: false,
            incremental_scope: default_incremental_scope(),
            cutover_scope: default_cutover_scope(),
            replication_mismatch: ReplicationMismatchPolicy::default(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TableConfig {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub excluded_columns: ExcludedColumns,
    /// column → compression, e.g. `{ data = "snappy" }`
    #[serde(default)]
    pub compressed_columns: BTreeMap<String, Compression>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl TableConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: default_primary_key(),
            excluded_columns: ExcludedColumns::default(),
            compressed_columns: BTreeMap::new(),
        }
    }

    pub fn table_name(&self) -> TableName {
        TableName(self.name.clone())
    }

    pub fn pk_column(&self) -> ColumnName {
        ColumnName(self.primary_key.clone())
    }

    pub fn compressed(mut self, column: &str, compression: Compression) -> Self {
        self.compressed_columns.insert(column.to_string(), compression);
        self
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "verification-reports".to_string(),
        }
    }
}

impl DbConfig {
    /// Build a sqlx-compatible connection URL from this config.
    pub fn url(&self) -> String {
        match self.driver.as_str() {
            "postgres" => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.dbname
            ),
            _ => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.dbname
            ),
        }
    }

    pub fn schema(&self) -> Schema {
        Schema(self.schema.clone().unwrap_or_else(|| self.dbname.clone()))
    }
}

impl AppConfig {
    /// Load a TOML file, apply `CUTOVER_VERIFIER__*` environment overrides,
    /// and validate.
    pub fn load(path: &str) -> Result<Self> {
        let built = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::finish(built)
    }

    /// Parse configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let built = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .with_context(|| "Failed to parse config TOML")?;
        Self::finish(built)
    }

    fn finish(built: Config) -> Result<Self> {
        let cfg: AppConfig = built
            .try_deserialize()
            .with_context(|| "Failed to deserialize config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            bail!("at least one table must be configured");
        }
        if self.verifier.batch_size == 0 {
            bail!("verifier.batch_size must be greater than zero");
        }
        for db in [&self.source, &self.target] {
            if !matches!(db.driver.as_str(), "mysql" | "mariadb" | "postgres") {
                bail!("unsupported driver: {}", db.driver);
            }
        }

        let mut seen = BTreeSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                bail!("table {} is configured twice", table.name);
            }
            if table.primary_key.is_empty() {
                bail!("table {} has an empty primary_key", table.name);
            }
            if table.compressed_columns.contains_key(&table.primary_key) {
                bail!(
                    "table {}: primary key {} cannot be a compressed column",
                    table.name,
                    table.primary_key
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [source]
        host = "127.0.0.1"
        port = 29291
        dbname = "gftest"
        user = "root"
        password = ""

        [target]
        host = "127.0.0.1"
        port = 29292
        dbname = "gftest"
        user = "root"
        password = ""

        [[tables]]
        name = "test_table_1"
    "#;

    #[test]
    fn defaults_apply_to_minimal_config() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.verifier.kind, VerifierKind::Inline);
        assert!(!cfg.verifier.decompress);
        assert_eq!(cfg.verifier.incremental_scope, CheckScope::TouchedRows);
        assert_eq!(cfg.verifier.cutover_scope, CheckScope::FullTable);
        assert_eq!(cfg.verifier.replication_mismatch, ReplicationMismatchPolicy::Defer);
        assert_eq!(cfg.verifier.batch_size, 200);
        assert_eq!(cfg.tables[0].primary_key, "id");
        assert_eq!(cfg.source.schema(), Schema("gftest".into()));
        assert_eq!(cfg.source.url(), "mysql://root:@127.0.0.1:29291/gftest");
    }

    #[test]
    fn verifier_section_and_compressed_columns_parse() {
        let toml = format!(
            "{}\n{}",
            MINIMAL.replace("name = \"test_table_1\"", "name = \"test_table_1\"\ncompressed_columns = { data = \"snappy\" }"),
            r#"
            [verifier]
            kind = "inline"
            decompress = true
            incremental_scope = "full_table"
            replication_mismatch = "hard_stop"
            batch_size = 50
            "#
        );
        let cfg = AppConfig::from_toml_str(&toml).unwrap();
        assert!(cfg.verifier.decompress);
        assert_eq!(cfg.verifier.incremental_scope, CheckScope::FullTable);
        assert_eq!(cfg.verifier.replication_mismatch, ReplicationMismatchPolicy::HardStop);
        assert_eq!(cfg.verifier.batch_size, 50);
        assert_eq!(
            cfg.tables[0].compressed_columns.get("data"),
            Some(&Compression::Snappy)
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let toml = format!("{}\n[verifier]\nbatch_size = 0\n", MINIMAL);
        assert!(AppConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let toml = format!("{}\n[[tables]]\nname = \"test_table_1\"\n", MINIMAL);
        let err = AppConfig::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("configured twice"), "{}", err);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = AppConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.tables.len(), 1);
        assert_eq!(cfg.target.port, 29292);
    }
}
