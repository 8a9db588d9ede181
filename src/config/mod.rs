use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use toml::Value;

/// Built-in defaults; a config file, when present, must spell out every
/// section. CLI overrides apply on top of either.
const DEFAULT_CONFIG_TOML: &str = r#"
[logging]
level = "info"
human_friendly = false

[server]
host = "0.0.0.0"
port = 9000
backlog = 10
daemon = false

[heartbeat]
interval_ms = 10000

[journal]
path = "/var/tmp/sockline.journal"
"#;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub heartbeat: HeartbeatConfig,
    pub journal: JournalConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub daemon: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct JournalConfig {
    pub path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        DEFAULT_CONFIG_TOML
            .parse::<Value>()
            .and_then(Value::try_into)
            .expect("built-in default config must parse")
    }
}

impl AppConfig {
    /// Resolves the config source and CLI arguments in one pass:
    /// `--config <path>` selects an explicit file, `-d` is shorthand for
    /// `--server.daemon true`, and any `--section.key value` pair overrides
    /// the matching config entry.
    pub fn load_with_discovery(
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let parsed_args = parse_cli_args(args)?;

        match parsed_args.config_path {
            Some(path) => Self::load_from_toml_with_overrides(path, parsed_args.overrides),
            None => Self::from_defaults_with_overrides(parsed_args.overrides),
        }
    }

    pub fn load_from_toml_with_overrides(
        path: impl AsRef<Path>,
        overrides: Vec<(String, String)>,
    ) -> Result<Self, ConfigError> {
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source,
        })?;

        let root_value: Value = toml_content
            .parse()
            .map_err(|source| ConfigError::TomlParse {
                path: path.as_ref().to_string_lossy().to_string(),
                source,
            })?;

        Self::apply_and_deserialize(root_value, overrides)
    }

    fn from_defaults_with_overrides(
        overrides: Vec<(String, String)>,
    ) -> Result<Self, ConfigError> {
        let root_value: Value = DEFAULT_CONFIG_TOML
            .parse()
            .expect("built-in default config must parse");
        Self::apply_and_deserialize(root_value, overrides)
    }

    fn apply_and_deserialize(
        mut root_value: Value,
        overrides: Vec<(String, String)>,
    ) -> Result<Self, ConfigError> {
        for (key_path, raw_value) in overrides {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        root_value.try_into().map_err(ConfigError::Deserialize)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI override '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument '{arg}', expected '-d', '--config <path>', or '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

struct ParsedArgs {
    config_path: Option<String>,
    overrides: Vec<(String, String)>,
}

fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<ParsedArgs, ConfigError> {
    let mut config_path = None;
    let mut overrides = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == "-d" {
            overrides.push(("server.daemon".to_owned(), "true".to_owned()));
            continue;
        }

        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        if stripped == "config" {
            config_path = Some(value);
        } else {
            overrides.push((stripped.to_owned(), value));
        }
    }

    Ok(ParsedArgs {
        config_path,
        overrides,
    })
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.is_empty() || parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }

    let mut current = root;
    for section in &parts[..parts.len() - 1] {
        let table = current
            .as_table_mut()
            .ok_or_else(|| ConfigError::UnknownPath {
                key: key_path.to_owned(),
            })?;
        current = table
            .get_mut(*section)
            .ok_or_else(|| ConfigError::UnknownPath {
                key: key_path.to_owned(),
            })?;
    }

    let final_key = parts[parts.len() - 1];
    let table = current
        .as_table_mut()
        .ok_or_else(|| ConfigError::UnknownPath {
            key: key_path.to_owned(),
        })?;
    let current_value = table
        .get_mut(final_key)
        .ok_or_else(|| ConfigError::UnknownPath {
            key: key_path.to_owned(),
        })?;

    let parsed_value = parse_value_using_current_type(key_path, raw_value, current_value)?;
    *current_value = parsed_value;

    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => {
            let parsed = raw_value
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidValueForType {
                    key: key_path.to_owned(),
                    expected: "integer",
                    value: raw_value.to_owned(),
                })?;
            Ok(Value::Integer(parsed))
        }
        Value::Float(_) => {
            let parsed = raw_value
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidValueForType {
                    key: key_path.to_owned(),
                    expected: "float",
                    value: raw_value.to_owned(),
                })?;
            Ok(Value::Float(parsed))
        }
        Value::Boolean(_) => {
            let parsed = raw_value
                .parse::<bool>()
                .map_err(|_| ConfigError::InvalidValueForType {
                    key: key_path.to_owned(),
                    expected: "boolean",
                    value: raw_value.to_owned(),
                })?;
            Ok(Value::Boolean(parsed))
        }
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{AppConfig, ConfigError};

    fn write_temp_config(content: &str, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sockline-config-test-{suffix}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, content).expect("failed to write temp config");
        path
    }

    const FULL_CONFIG: &str = r#"
[logging]
level = "debug"
human_friendly = false

[server]
host = "127.0.0.1"
port = 9000
backlog = 10
daemon = false

[heartbeat]
interval_ms = 10000

[journal]
path = "/var/tmp/sockline-test.journal"
"#;

    #[test]
    fn defaults_match_the_original_service_surface() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.backlog, 10);
        assert!(!config.server.daemon);
        assert_eq!(config.heartbeat.interval_ms, 10_000);
        assert_eq!(config.journal.path, "/var/tmp/sockline.journal");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn discovery_without_args_yields_defaults() {
        let config =
            AppConfig::load_with_discovery(Vec::<String>::new()).expect("defaults should load");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn loads_explicit_config_file() {
        let path = write_temp_config(FULL_CONFIG, "explicit");

        let config = AppConfig::load_with_discovery(vec![
            "--config".to_owned(),
            path.to_string_lossy().to_string(),
        ])
        .expect("config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.journal.path, "/var/tmp/sockline-test.journal");
    }

    #[test]
    fn argv_overrides_matching_toml_paths() {
        let config = AppConfig::load_with_discovery(vec![
            "--logging.level".to_owned(),
            "warn".to_owned(),
            "--server.port".to_owned(),
            "9100".to_owned(),
            "--heartbeat.interval_ms".to_owned(),
            "250".to_owned(),
        ])
        .expect("config with overrides should load");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.heartbeat.interval_ms, 250);
    }

    #[test]
    fn dash_d_shorthand_enables_daemon_mode() {
        let config = AppConfig::load_with_discovery(vec!["-d".to_owned()])
            .expect("daemon shorthand should load");
        assert!(config.server.daemon);
    }

    #[test]
    fn rejects_unknown_override_path() {
        let err = AppConfig::load_with_discovery(vec![
            "--server.nonexistent".to_owned(),
            "x".to_owned(),
        ])
        .expect_err("unknown override key should fail");

        assert!(matches!(err, ConfigError::UnknownPath { .. }));
    }

    #[test]
    fn rejects_non_integer_port_override() {
        let err = AppConfig::load_with_discovery(vec![
            "--server.port".to_owned(),
            "not-a-port".to_owned(),
        ])
        .expect_err("non-integer port should fail");

        assert!(matches!(err, ConfigError::InvalidValueForType { .. }));
    }

    #[test]
    fn rejects_positional_arguments() {
        let err = AppConfig::load_with_discovery(vec!["daemon".to_owned()])
            .expect_err("bare positional arg should fail");

        assert!(matches!(err, ConfigError::InvalidArgFormat { .. }));
    }
}
