use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};

/// Bridge Roku devices on the local network to HomeKit
#[derive(Debug, Default, Parser)]
#[command(name = "roku-homekitd", version)]
pub struct Cli {
    /// Storage path for information about the HomeKit accessories
    #[arg(long, env = "ROKU_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// HomeKit pairing PIN
    #[arg(long, env = "ROKU_HOMEKIT_PIN")]
    pub homekit_pin: Option<String>,

    /// Enable debug logging. `--debug=false` overrides the config file.
    #[arg(
        long,
        env = "ROKU_DEBUG",
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub debug: Option<bool>,

    /// Config file with the same keys as the long flags
    #[arg(long, env = "ROKU_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Contents of the `--config` file: one `key value` pair per line, keys
/// named like the long flags, `#` starting a comment. A bare key sets a
/// boolean to true.
///
/// ```text
/// # living room bridge
/// storage-path /var/lib/roku-homekit
/// homekit-pin 12344321
/// debug
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub storage_path: Option<PathBuf>,
    pub homekit_pin: Option<String>,
    pub debug: Option<bool>,
}

impl FileConfig {
    /// Load configuration from a plain key-value file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut config = FileConfig::default();

        for (number, line) in contents.lines().enumerate() {
            let line = match line.find(" #") {
                Some(comment) => &line[..comment],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (line, ""),
            };

            match key.trim_start_matches('-') {
                "storage-path" => config.storage_path = Some(PathBuf::from(required(number, key, value)?)),
                "homekit-pin" => config.homekit_pin = Some(required(number, key, value)?.to_string()),
                "debug" => config.debug = Some(parse_bool(number, value)?),
                other => bail!("line {}: unknown key {:?}", number + 1, other),
            }
        }

        Ok(config)
    }
}

fn required<'a>(number: usize, key: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        bail!("line {}: {} needs a value", number + 1, key);
    }
    Ok(value)
}

fn parse_bool(number: usize, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("line {}: {:?} is not a boolean", number + 1, other),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub storage_path: PathBuf,
    pub homekit_pin: String,
    pub debug: bool,
}

fn default_storage_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".homecontrol")
        .join("roku")
}

fn default_homekit_pin() -> String {
    "00102003".to_string()
}

impl Config {
    /// Resolve flags and environment (already merged by clap), then the
    /// config file, then defaults.
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self> {
        let config = Self {
            storage_path: cli
                .storage_path
                .or(file.storage_path)
                .unwrap_or_else(default_storage_path),
            homekit_pin: cli
                .homekit_pin
                .or(file.homekit_pin)
                .unwrap_or_else(default_homekit_pin),
            debug: cli.debug.or(file.debug).unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.homekit_pin.len() != 8 || !self.homekit_pin.bytes().all(|b| b.is_ascii_digit()) {
            bail!("HomeKit PIN must be exactly 8 digits, got {:?}", self.homekit_pin);
        }
        if self.storage_path.as_os_str().is_empty() {
            bail!("Storage path must not be empty");
        }
        Ok(())
    }

    /// Storage directory for one device's pairing state
    pub fn device_storage(&self, serial_number: &str) -> PathBuf {
        self.storage_path.join(serial_number)
    }
}
