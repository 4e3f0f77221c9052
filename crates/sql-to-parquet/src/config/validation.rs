//! Configuration validation.
//!
//! Only settings that would break the whole run are checked here. Object
//! references and duplicate output names are left to the orchestrator so
//! that one bad object fails alone.

use super::Config;
use crate::core::validate_identifier;
use crate::error::{ExportError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(source) = &config.source {
        if source.host.is_empty() {
            return Err(ExportError::Config("source.host is required".into()));
        }
        if source.database.is_empty() {
            return Err(ExportError::Config("source.database is required".into()));
        }
        if source.user.is_empty() {
            return Err(ExportError::Config("source.user is required".into()));
        }
    }

    let section = &config.sql_to_parquet;

    if section.batch_size == 0 {
        return Err(ExportError::Config(
            "sql_to_parquet.batch_size must be at least 1".into(),
        ));
    }
    if section.workers == 0 {
        return Err(ExportError::Config(
            "sql_to_parquet.workers must be at least 1".into(),
        ));
    }
    if section.data_dir.as_os_str().is_empty() {
        return Err(ExportError::Config(
            "sql_to_parquet.data_dir is required".into(),
        ));
    }

    let ext = &section.output_extension;
    if ext.is_empty() || ext.contains(['.', '/', '\\', '\0']) {
        return Err(ExportError::Config(format!(
            "sql_to_parquet.output_extension {:?} must be a bare extension like 'parquet'",
            ext
        )));
    }

    validate_identifier(&section.default_schema).map_err(|e| {
        ExportError::Config(format!("sql_to_parquet.default_schema: {}", e))
    })?;

    for (idx, obj) in section.objects.iter().enumerate() {
        if !is_file_stem(&obj.name) {
            return Err(ExportError::Config(format!(
                "sql_to_parquet.objects[{}].name {:?} is not a valid file name",
                idx, obj.name
            )));
        }
    }

    Ok(())
}

fn is_file_stem(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportObject, SourceConfig};

    fn valid_config() -> Config {
        Config::from_yaml(
            r#"
sql_to_parquet:
  objects:
    - name: employees
      object: Employees
"#,
        )
        .unwrap()
    }

    fn source() -> SourceConfig {
        SourceConfig {
            host: "localhost".to_string(),
            port: 1433,
            database: "Sales".to_string(),
            user: "sa".to_string(),
            password: "password".to_string(),
            encrypt: false,
            trust_server_cert: true,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.sql_to_parquet.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = valid_config();
        config.sql_to_parquet.workers = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_extension() {
        let mut config = valid_config();
        config.sql_to_parquet.output_extension = ".parquet".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_object_name_must_be_file_stem() {
        for bad in ["", "  ", "..", "a/b", "a\\b"] {
            let mut config = valid_config();
            config.sql_to_parquet.objects.push(ExportObject {
                name: bad.to_string(),
                object: "T".to_string(),
                filter: None,
            });
            assert!(validate(&config).is_err(), "name {:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_empty_object_reference_is_not_fatal() {
        let mut config = valid_config();
        config.sql_to_parquet.objects.push(ExportObject {
            name: "broken".to_string(),
            object: String::new(),
            filter: None,
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        let mut s = source();
        s.host = "".to_string();
        config.source = Some(s);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut s = source();
        s.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", s);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
