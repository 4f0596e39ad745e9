//! Adapter configuration management

use crate::device::SessionOptions;
use crate::firmware::DirectoryFirmware;
use crate::identity::{IdentityTable, MAX_EXTRA_IDS, parse_hex_id, parse_id_pair};
use crate::port::DEFAULT_CLOSING_WAIT;
use crate::termios::LineSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub firmware: FirmwareSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    /// Line settings applied when a port is opened
    #[serde(default)]
    pub line: LineSettings,
    #[serde(default)]
    pub port: PortSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSettings {
    pub log_level: String,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareSettings {
    /// Directories searched for firmware images, in order
    pub search_paths: Vec<String>,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            search_paths: vec![
                "/lib/firmware/updates".to_string(),
                "/lib/firmware".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Additional 3410-family identities ("0xVVVV:0xPPPP")
    #[serde(default)]
    pub extra_3410_ids: Vec<String>,
    /// Additional 5052-family identities ("0xVVVV:0xPPPP")
    #[serde(default)]
    pub extra_5052_ids: Vec<String>,
    /// Device filters (VID:PID, either side may be "*")
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    /// How long close waits for pending output; 0 does not wait
    pub closing_wait_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            closing_wait_ms: DEFAULT_CLOSING_WAIT.as_millis() as u64,
        }
    }
}

impl PortSettings {
    pub fn closing_wait(&self) -> Option<Duration> {
        (self.closing_wait_ms > 0).then(|| Duration::from_millis(self.closing_wait_ms))
    }
}

impl AdapterConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/ti-usb-serial/adapter.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AdapterConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ti-usb-serial").join("adapter.toml")
        } else {
            PathBuf::from(".config/ti-usb-serial/adapter.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.adapter.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.adapter.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        for (name, ids) in [
            ("extra_3410_ids", &self.usb.extra_3410_ids),
            ("extra_5052_ids", &self.usb.extra_5052_ids),
        ] {
            if ids.len() > MAX_EXTRA_IDS {
                return Err(anyhow!(
                    "Too many entries in {}: {} (max: {})",
                    name,
                    ids.len(),
                    MAX_EXTRA_IDS
                ));
            }
            for id in ids {
                if parse_id_pair(id).is_none() {
                    return Err(anyhow!(
                        "Invalid identity '{}' in {}, expected 0xVVVV:0xPPPP",
                        id,
                        name
                    ));
                }
            }
        }

        if !(5..=8).contains(&self.line.data_bits) {
            return Err(anyhow!(
                "Invalid data_bits {}, must be 5 to 8",
                self.line.data_bits
            ));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x0451:0x3410' or '0x0451:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);

        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }

        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    /// Validate a hex ID (VID or PID)
    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        parse_hex_id(id).map(|_| ()).ok_or_else(|| {
            anyhow!(
                "Invalid {} '{}', expected 0x followed by 1-4 hex digits (e.g., '0x0451')",
                name,
                id
            )
        })
    }

    /// Identity table including the configured extra identities
    pub fn identity_table(&self) -> Result<IdentityTable> {
        let parse = |ids: &[String]| -> Result<Vec<(u16, u16)>> {
            ids.iter()
                .map(|id| parse_id_pair(id).ok_or_else(|| anyhow!("Invalid identity '{}'", id)))
                .collect()
        };

        let table = IdentityTable::with_extra_ids(
            &parse(&self.usb.extra_3410_ids)?,
            &parse(&self.usb.extra_5052_ids)?,
        )?;
        Ok(table)
    }

    /// Firmware source over the configured search paths, `~` expanded
    pub fn firmware_source(&self) -> DirectoryFirmware {
        DirectoryFirmware::new(
            self.firmware
                .search_paths
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .collect(),
        )
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            closing_wait: self.port.closing_wait(),
            ..SessionOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Family;
    use crate::termios::LineParity;

    #[test]
    fn test_default_config() {
        let config = AdapterConfig::default();
        assert_eq!(config.adapter.log_level, "info");
        assert!(config.usb.filters.is_empty());
        assert_eq!(config.line, LineSettings::default());
        assert_eq!(config.port.closing_wait(), Some(Duration::from_secs(40)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_filter_valid() {
        assert!(AdapterConfig::validate_filter("0x0451:0x3410").is_ok());
        assert!(AdapterConfig::validate_filter("0x0451:*").is_ok());
        assert!(AdapterConfig::validate_filter("*:0x5052").is_ok());
        assert!(AdapterConfig::validate_filter("*:*").is_ok());
    }

    #[test]
    fn test_validate_filter_invalid() {
        assert!(AdapterConfig::validate_filter("0451:3410").is_err());
        assert!(AdapterConfig::validate_filter("0x0451").is_err());
        assert!(AdapterConfig::validate_filter("0x0451:0x3410:0x1").is_err());
        assert!(AdapterConfig::validate_filter("0xGHIJ:0x3410").is_err());
        assert!(AdapterConfig::validate_filter("0x12345:0x3410").is_err());
    }

    #[test]
    fn test_accepted_filters_match_their_ids() {
        for filter in ["0x0451:0x3410", "0X0451:0X3410", "0x451:*", "*:0x3410"] {
            assert!(AdapterConfig::validate_filter(filter).is_ok(), "{}", filter);
            assert!(
                crate::usb::check_filter(0x0451, 0x3410, &[filter.to_string()]),
                "{}",
                filter
            );
        }
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = AdapterConfig::default();
        config.adapter.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_extra_ids() {
        let mut config = AdapterConfig::default();
        config.usb.extra_3410_ids = vec!["0x1234:0x0001".to_string()];
        assert!(config.validate().is_ok());

        config.usb.extra_3410_ids.push("1234:0001".to_string());
        assert!(config.validate().is_err());

        config.usb.extra_3410_ids = (0..6).map(|i| format!("0x1234:0x{:04x}", i)).collect();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identity_table_includes_extras() {
        let mut config = AdapterConfig::default();
        config.usb.extra_5052_ids = vec!["0xabcd:0x0002".to_string()];

        let table = config.identity_table().unwrap();
        assert_eq!(table.lookup(0xabcd, 0x0002).unwrap().family, Family::Ti5052);
        assert!(table.lookup(0xabcd, 0x0003).is_none());
    }

    #[test]
    fn test_zero_closing_wait_disables() {
        let mut config = AdapterConfig::default();
        config.port.closing_wait_ms = 0;
        assert_eq!(config.session_options().closing_wait, None);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.toml");
        fs::write(
            &path,
            r#"
[line]
baud = 115200
parity = "even"
crtscts = true

[port]
closing_wait_ms = 500
"#,
        )
        .unwrap();

        let config = AdapterConfig::load(Some(path)).unwrap();
        assert_eq!(config.adapter.log_level, "info");
        assert_eq!(config.line.baud, 115200);
        assert_eq!(config.line.parity, LineParity::Even);
        assert_eq!(config.line.data_bits, 8);
        assert!(config.line.crtscts);
        assert_eq!(config.port.closing_wait(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.toml");
        fs::write(&path, "[usb]\nfilters = [\"0451:3410\"]\n").unwrap();
        assert!(AdapterConfig::load(Some(path)).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("adapter.toml");

        let mut config = AdapterConfig::default();
        config.usb.filters = vec!["0x0451:*".to_string()];
        config.line.baud = 19200;
        config.save(&path).unwrap();

        let loaded = AdapterConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.usb.filters, config.usb.filters);
        assert_eq!(loaded.line, config.line);
    }

    #[test]
    fn test_firmware_source_expands_tilde() {
        let mut config = AdapterConfig::default();
        config.firmware.search_paths = vec!["~/fw".to_string()];
        let source = config.firmware_source();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(source.search_paths()[0], home.join("fw"));
        }
    }
}
