use std::fs;
use std::path::Path;

use super::schema::{ConfigError, Settings};

/// Loads the classic conf format: one `key=value` per line, `#` comments.
///
/// Required keys: `rpcserverip`, `rpcserverport`, `zookeeperip`,
/// `zookeeperport`. Unknown keys are logged and ignored so the format can
/// grow without breaking older binaries.
pub fn load_conf(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut settings = parse_conf(&contents)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

pub fn parse_conf(contents: &str) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();
    let mut seen_server_ip = false;
    let mut seen_server_port = false;
    let mut seen_store_ip = false;
    let mut seen_store_port = false;

    for (idx, raw) in contents.lines().enumerate() {
        let line = match raw.split_once('#') {
            Some((before, _)) => before.trim(),
            None => raw.trim(),
        };
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or(ConfigError::Malformed {
            line: idx + 1,
            got: raw.trim().to_string(),
        })?;
        let key = key.trim();
        let value = value.trim();

        match key {
            "rpcserverip" => {
                settings.provider.host = value.to_string();
                seen_server_ip = true;
            }
            "rpcserverport" => {
                settings.provider.port = parse_port(key, value)?;
                seen_server_port = true;
            }
            "zookeeperip" => {
                settings.store.host = value.to_string();
                seen_store_ip = true;
            }
            "zookeeperport" => {
                settings.store.port = parse_port(key, value)?;
                seen_store_port = true;
            }
            other => {
                tracing::warn!(key = other, "ignoring unknown conf key");
            }
        }
    }

    if !seen_server_ip {
        return Err(ConfigError::MissingKey("rpcserverip"));
    }
    if !seen_server_port {
        return Err(ConfigError::MissingKey("rpcserverport"));
    }
    if !seen_store_ip {
        return Err(ConfigError::MissingKey("zookeeperip"));
    }
    if !seen_store_port {
        return Err(ConfigError::MissingKey("zookeeperport"));
    }
    Ok(settings)
}

/// Loads the full TOML settings file (ambient sections included).
pub fn load_toml(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut settings: Settings = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Environment overrides, applied after any file source.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(filter) = std::env::var("TETHER_LOG") {
        if !filter.is_empty() {
            settings.logging.filter = Some(filter);
        }
    }
    if let Ok(workers) = std::env::var("TETHER_WORKERS") {
        match workers.parse::<usize>() {
            Ok(n) => settings.provider.workers = n,
            Err(_) => tracing::warn!(value = %workers, "ignoring invalid TETHER_WORKERS"),
        }
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("{value:?} is not a port number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# provider endpoint
rpcserverip=127.0.0.1
rpcserverport=8000
zookeeperip=127.0.0.1   # store host
zookeeperport=2181
";

    #[test]
    fn conf_parses_with_comments_and_whitespace() {
        let settings = parse_conf(SAMPLE).unwrap();
        assert_eq!(settings.provider.host, "127.0.0.1");
        assert_eq!(settings.provider.port, 8000);
        assert_eq!(settings.store.host, "127.0.0.1");
        assert_eq!(settings.store.port, 2181);
        assert_eq!(settings.store.endpoint(), "127.0.0.1:2181");
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let err = parse_conf("rpcserverip=1.2.3.4\nrpcserverport=1\nzookeeperip=1.2.3.4\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("zookeeperport")));
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_conf("rpcserverip 127.0.0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 1, .. }));
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = parse_conf(
            "rpcserverip=1.2.3.4\nrpcserverport=eighty\nzookeeperip=1.2.3.4\nzookeeperport=1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn load_conf_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let settings = load_conf(file.path()).unwrap();
        assert_eq!(settings.provider.port, 8000);
    }

    #[test]
    fn load_toml_reads_ambient_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[provider]
host = "0.0.0.0"
port = 9000
workers = 8

[store]
host = "10.0.0.5"
port = 2181
session_timeout_ms = 10000

[wire]
endian = "big"

[logging]
format = "json"
"#,
        )
        .unwrap();
        let settings = load_toml(file.path()).unwrap();
        assert_eq!(settings.provider.workers, 8);
        assert_eq!(settings.store.session_timeout_ms, 10_000);
        assert_eq!(settings.wire.endian, crate::wire::Endian::Big);
        assert_eq!(settings.logging.format, super::super::LogFormat::Json);
    }

    #[test]
    fn worker_floor_is_enforced_by_validate() {
        let mut settings = Settings::default();
        settings.provider.workers = 1;
        assert!(settings.validate().is_err());
        assert_eq!(settings.provider.effective_workers(), 2);
    }
}
