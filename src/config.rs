//! Ambient server configuration: bind address/port, host-key file paths,
//! and log verbosity, loaded from a flat `key = value` file the way the
//! reference engine's `sshd.conf` is (one directive per line, `#` comments,
//! blank lines ignored).

use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;

use crate::error::{Result, SshError};
use crate::hostkey::HostKeyKind;

const DEFAULT_CONFIG_BODY: &str = "\
# anchorssh server configuration
bind_addr = 0.0.0.0
port = 22
log_level = info
blocking = true
# host_key_rsa = /etc/anchorssh/ssh_host_rsa_key
# host_key_dsa = /etc/anchorssh/ssh_host_dsa_key
# host_key_ed25519 = /etc/anchorssh/ssh_host_ed25519_key
";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub host_key_paths: Vec<(HostKeyKind, PathBuf)>,
    pub log_level: LevelFilter,
    pub blocking: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 22,
            host_key_paths: Vec::new(),
            log_level: LevelFilter::Info,
            blocking: true,
        }
    }
}

/// Split one `key = value` line, skipping comments and blank lines.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

fn parse_level(value: &str) -> Result<LevelFilter> {
    value
        .parse()
        .map_err(|_| SshError::config(format!("unrecognized log_level: {value}")))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(SshError::config(format!("expected a boolean, got {other}"))),
    }
}

pub fn load_config(path: &Path) -> Result<ServerConfig> {
    let contents = fs::read_to_string(path)?;
    let mut config = ServerConfig::default();

    for line in contents.lines() {
        let Some((key, value)) = parse_line(line) else {
            continue;
        };
        match key {
            "bind_addr" => config.bind_addr = value.to_string(),
            "port" => {
                config.port = value
                    .parse()
                    .map_err(|_| SshError::config(format!("invalid port: {value}")))?;
            }
            "log_level" => config.log_level = parse_level(value)?,
            "blocking" => config.blocking = parse_bool(value)?,
            "host_key_rsa" => config.host_key_paths.push((HostKeyKind::Rsa, PathBuf::from(value))),
            "host_key_dsa" => config.host_key_paths.push((HostKeyKind::Dsa, PathBuf::from(value))),
            "host_key_ed25519" => config
                .host_key_paths
                .push((HostKeyKind::Ed25519, PathBuf::from(value))),
            other => {
                log::warn!("ignoring unknown configuration key: {other}");
            }
        }
    }

    Ok(config)
}

/// Write a commented-out default configuration if none exists yet. Never
/// overwrites an existing file.
pub fn ensure_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_BODY)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_skips_comments_and_blanks() {
        assert_eq!(parse_line("# a comment"), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("port = 2222"), Some(("port", "2222")));
    }

    #[test]
    fn load_config_reads_every_directive() {
        let dir = std::env::temp_dir().join(format!("anchorssh-config-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sshd.conf");
        fs::write(
            &path,
            "bind_addr = 127.0.0.1\nport = 2222\nlog_level = debug\nblocking = false\nhost_key_rsa = /tmp/host_rsa\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.port, 2222);
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert!(!config.blocking);
        assert_eq!(config.host_key_paths, vec![(HostKeyKind::Rsa, PathBuf::from("/tmp/host_rsa"))]);

        fs::remove_dir_all(&dir).ok();
    }
}
