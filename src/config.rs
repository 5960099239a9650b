//! Harness configuration.
//!
//! Values come from the defaults below, then an optional TOML file, then
//! the environment (`MNEMONIC`, `MODEL`, `SPECULOS_HOST`, `APDU_PORT`,
//! `API_PORT`, `PLUGIN_NAME`).

use crate::error::{Result, SigningError};
use crate::model::Model;
use core::str::FromStr;
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Seed phrase loaded on the emulator.
pub const DEFAULT_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub mnemonic: String,
    /// Plugin Makefile, read for `APPNAME` when no name is configured
    pub makefile: PathBuf,
    pub plugin_name: Option<String>,
    pub model: Model,
    pub host: String,
    pub apdu_port: u16,
    pub api_port: u16,
    pub timeout_ms: u64,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mnemonic: DEFAULT_MNEMONIC.to_string(),
            makefile: PathBuf::from("Makefile"),
            plugin_name: None,
            model: Model::NanoSP,
            host: "127.0.0.1".to_string(),
            apdu_port: 9999,
            api_port: 5000,
            timeout_ms: 10_000,
            snapshot_dir: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading harness configuration from {}", path.display());

        let s = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&s)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults with environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mnemonic) = var("MNEMONIC") {
            self.mnemonic = mnemonic;
        }
        if let Some(model) = var("MODEL") {
            self.model = Model::from_str(&model).map_err(|_| SigningError::UnknownModel(model))?;
        }
        if let Some(host) = var("SPECULOS_HOST") {
            self.host = host;
        }
        if let Some(port) = var("APDU_PORT") {
            self.apdu_port = parse_port("APDU_PORT", &port)?;
        }
        if let Some(port) = var("API_PORT") {
            self.api_port = parse_port("API_PORT", &port)?;
        }
        if let Some(name) = var("PLUGIN_NAME") {
            self.plugin_name = Some(name);
        }
        Ok(())
    }

    /// Configured plugin name, or `APPNAME` from the plugin Makefile.
    pub fn plugin_name(&self) -> Result<String> {
        match &self.plugin_name {
            Some(name) => Ok(name.clone()),
            None => appname_from_makefile(&self.makefile),
        }
    }

    pub fn apdu_addr(&self) -> String {
        format!("{}:{}", self.host, self.apdu_port)
    }

    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.host, self.api_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| SigningError::Config(format!("{key}: invalid port '{value}'")))
}

pub fn appname_from_makefile(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let makefile = std::fs::read_to_string(path)?;

    parse_appname(&makefile)
        .ok_or_else(|| SigningError::Config(format!("no APPNAME in {}", path.display())))
}

/// Value of the last `APPNAME = ...` assignment, unquoted.
pub fn parse_appname(makefile: &str) -> Option<String> {
    makefile
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().trim_end_matches(|c: char| matches!(c, ':' | '?' | '+'));
            (key.trim() == "APPNAME").then(|| value.trim().trim_matches('"').to_string())
        })
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_appname() {
        let makefile = r#"
# Application name
APPNAME = "TronPlugin"
APPVERSION_M = 1
"#;
        assert_eq!(Some("TronPlugin".to_string()), parse_appname(makefile));

        assert_eq!(Some("Tron".to_string()), parse_appname("APPNAME ?= Tron\n"));
        assert_eq!(None, parse_appname("# APPNAME is set below\nVARIANT_PARAM = COIN\n"));
    }

    #[test]
    fn test_from_toml() {
        let config = HarnessConfig::from_toml_str(
            r#"
model = "stax"
apdu_port = 40000
plugin_name = "TronPlugin"
"#,
        )
        .unwrap();

        assert_eq!(Model::Stax, config.model);
        assert_eq!(40000, config.apdu_port);
        assert_eq!(5000, config.api_port);
        assert_eq!(DEFAULT_MNEMONIC, config.mnemonic);
        assert_eq!("TronPlugin", config.plugin_name().unwrap());
        assert_eq!("127.0.0.1:40000", config.apdu_addr());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("MODEL", "flex"), ("API_PORT", "5001"), ("SPECULOS_HOST", "speculos")]
            .into_iter()
            .collect();

        let mut config = HarnessConfig::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(Model::Flex, config.model);
        assert_eq!("http://speculos:5001", config.api_url());
        assert_eq!(Duration::from_secs(10), config.timeout());
    }

    #[test]
    fn test_env_invalid_values() {
        let mut config = HarnessConfig::default();
        assert!(matches!(
            config.apply_vars(|k| (k == "MODEL").then(|| "nano".to_string())),
            Err(SigningError::UnknownModel(_))
        ));
        assert!(matches!(
            config.apply_vars(|k| (k == "APDU_PORT").then(|| "99999".to_string())),
            Err(SigningError::Config(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("harness-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
makefile = "plugin/Makefile"
timeout_ms = 2500
snapshot_dir = "snapshots"
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        assert_eq!(PathBuf::from("plugin/Makefile"), config.makefile);
        assert_eq!(Duration::from_millis(2500), config.timeout());
        assert_eq!(Some(PathBuf::from("snapshots")), config.snapshot_dir);

        assert!(matches!(
            HarnessConfig::load(path.with_extension("missing")),
            Err(SigningError::Io(_))
        ));
    }

    #[test]
    fn test_load_invalid_file() {
        let path = std::env::temp_dir().join(format!("harness-config-invalid-{}.toml", std::process::id()));
        std::fs::write(&path, "timeout_ms = \"soon\"\n").unwrap();

        let result = HarnessConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(SigningError::Toml(_))));
    }
}
