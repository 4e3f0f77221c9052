//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::core::ExportTarget;
use crate::error::{ExportError, Result};

/// Environment variable holding the ADO.NET connection string when the
/// config file has no `source` section.
pub const CONNECTION_ENV_VAR: &str = "SQL_TO_PARQUET_DB";

/// Where the source connection comes from.
#[derive(Clone)]
pub enum SourceSpec {
    /// Explicit `source` section.
    Fields(SourceConfig),
    /// ADO.NET connection string from the environment.
    ConnectionString(String),
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Fields(source) => f.debug_tuple("Fields").field(source).finish(),
            SourceSpec::ConnectionString(_) => f
                .debug_tuple("ConnectionString")
                .field(&"[REDACTED]")
                .finish(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A relative `data_dir` is resolved against the directory containing
    /// the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;

        if config.sql_to_parquet.data_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.sql_to_parquet.data_dir = base.join(&config.sql_to_parquet.data_dir);
            }
        }
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Effective logging level: the tool section, then `sql_tools`, then
    /// the default.
    pub fn logging_level(&self) -> LoggingLevel {
        self.sql_to_parquet
            .logging_level
            .or(self.sql_tools.logging_level)
            .unwrap_or_default()
    }

    /// Configured objects as export targets, in order.
    pub fn targets(&self) -> Vec<ExportTarget> {
        self.sql_to_parquet.objects.iter().map(ExportTarget::from).collect()
    }

    /// Settings for one run.
    pub fn run_settings(&self) -> RunSettings {
        let section = &self.sql_to_parquet;
        let mut settings = RunSettings::new(section.data_dir.clone(), section.batch_size)
            .with_workers(section.workers)
            .with_default_schema(section.default_schema.clone())
            .with_max_retries(section.max_retries);
        settings.output_extension = section.output_extension.clone();
        settings.force_nullable = section.force_nullable;
        settings.writer.compression = section.compression;
        settings.writer.row_group_size = Some(section.batch_size);
        settings
    }

    /// Resolve the source connection, falling back to [`CONNECTION_ENV_VAR`].
    pub fn source_spec(&self) -> Result<SourceSpec> {
        self.source_spec_with(std::env::var(CONNECTION_ENV_VAR).ok())
    }

    fn source_spec_with(&self, env_value: Option<String>) -> Result<SourceSpec> {
        if let Some(source) = &self.source {
            return Ok(SourceSpec::Fields(source.clone()));
        }
        match env_value.filter(|v| !v.trim().is_empty()) {
            Some(conn) => Ok(SourceSpec::ConnectionString(conn)),
            None => Err(ExportError::Config(format!(
                "no source configured: add a 'source' section or set {}",
                CONNECTION_ENV_VAR
            ))),
        }
    }
}

impl SourceConfig {
    /// `host:port/database`, for logs.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ParquetCompression;

    const SAMPLE: &str = r#"
sql_tools:
  logging_level: debug
sql_to_parquet:
  data_dir: ./out/
  batch_size: 500
  compression: zstd
  objects:
    - name: employees
      object: Employees
    - name: order_details
      object: sales.vw_OrderDetails
      filter: "OrderDate >= '2024-01-01'"
"#;

    #[test]
    fn test_from_yaml_defaults() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let section = &config.sql_to_parquet;
        assert_eq!(section.batch_size, 500);
        assert_eq!(section.default_schema, "dbo");
        assert_eq!(section.output_extension, "parquet");
        assert_eq!(section.workers, 1);
        assert_eq!(section.max_retries, 0);
        assert_eq!(section.compression, ParquetCompression::Zstd);
        assert!(config.source.is_none());
    }

    #[test]
    fn test_logging_level_falls_back_to_global() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.logging_level(), LoggingLevel::Debug);

        let yaml = SAMPLE.replace("  batch_size: 500", "  batch_size: 500\n  logging_level: errors_only");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.logging_level(), LoggingLevel::ErrorsOnly);
    }

    #[test]
    fn test_targets_preserve_order_and_filter() {
        let targets = Config::from_yaml(SAMPLE).unwrap().targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "employees");
        assert_eq!(targets[0].filter, None);
        assert_eq!(targets[1].object_ref, "sales.vw_OrderDetails");
        assert_eq!(
            targets[1].filter.as_deref(),
            Some("OrderDate >= '2024-01-01'")
        );
    }

    #[test]
    fn test_run_settings() {
        let settings = Config::from_yaml(SAMPLE).unwrap().run_settings();
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.writer.row_group_size, Some(500));
        assert!(settings
            .output_path("employees")
            .ends_with("out/employees.parquet"));
    }

    #[test]
    fn test_load_resolves_data_dir_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sql_to_parquet.data_dir, dir.path().join("./out/"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
    }

    #[test]
    fn test_source_spec_prefers_section_then_env() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(config.source_spec_with(None).is_err());
        assert!(config.source_spec_with(Some("  ".into())).is_err());
        assert!(matches!(
            config.source_spec_with(Some("server=tcp:db,1433".into())).unwrap(),
            SourceSpec::ConnectionString(_)
        ));

        let yaml = format!(
            "source:\n  host: db\n  database: Sales\n  user: sa\n  password: pw\n{}",
            SAMPLE
        );
        let config = Config::from_yaml(&yaml).unwrap();
        match config.source_spec_with(Some("ignored".into())).unwrap() {
            SourceSpec::Fields(s) => {
                assert_eq!(s.port, 1433);
                assert!(s.encrypt);
                assert_eq!(s.address(), "db:1433/Sales");
            }
            other => panic!("expected Fields, got {:?}", other),
        }
    }
}
