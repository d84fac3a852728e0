use anyhow::anyhow;
use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::{self, File},
    io::{Read, Write},
    path::PathBuf,
};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the settings file holding configuration options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level to run the service with (default: info)
    #[arg(short, long)]
    pub level: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    pub config: Option<String>,
    pub level: Option<String>,
    pub db: DbSettings,
    pub lottery: LotterySettings,
    pub lightning: LightningSettings,
    pub api: ApiSettings,
    pub server: ServerSettings,
    pub notifier: NotifierSettings,
}

impl ConfigurableSettings for Settings {
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings) {
        if let Some(level) = &cli_settings.level {
            self.level = Some(level.clone());
        }
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/blotto.toml")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbSettings {
    pub data_folder: String,
    pub read_max_connections: u32,
    pub write_max_connections: u32,
    pub busy_timeout_ms: u32,
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for DbSettings {
    fn default() -> Self {
        DbSettings {
            data_folder: String::from("./data"),
            read_max_connections: 8,
            write_max_connections: 2,
            busy_timeout_ms: 5000,
            idle_timeout_secs: 600,
            acquire_timeout_secs: 15,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LotterySettings {
    /// Number of blocks between draws.
    ///
    /// Reasonable values are:
    ///
    /// - `144`: ~24 hours
    /// - `1008`: ~1 week
    pub duration: u32,
}

impl Default for LotterySettings {
    fn default() -> Self {
        LotterySettings { duration: 144 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightningSettings {
    /// Url to find the lnd lightning node's REST api
    pub base_url: String,
    /// File path to the lnd macaroon that has the needed permissions
    pub macaroon_file_path: String,
    /// Optional file path to the lnd tls cert (typically only used in local development, with self signed certs)
    pub tls_cert_path: Option<String>,
    /// Maximum routing fee in parts per million used when paying invoices
    pub max_fee_ppm: u64,
}

impl Default for LightningSettings {
    fn default() -> Self {
        LightningSettings {
            base_url: String::from("https://localhost:8080"),
            macaroon_file_path: String::from("./creds/admin.macaroon"),
            tls_cert_path: Some(String::from("./creds/tls.cert")),
            max_fee_ppm: 1500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiSettings {
    pub origins: Vec<String>,
    pub sse: SseSettings,
    pub rate_limiter: RateLimiterSettings,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            origins: vec![String::from("http://localhost:9890")],
            sse: SseSettings::default(),
            rate_limiter: RateLimiterSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SseSettings {
    /// Maximum lifetime of an idle events connection, in seconds.
    /// Keep this long, per-write timeouts would close idle streams early.
    pub deadline_secs: u64,
}

impl Default for SseSettings {
    fn default() -> Self {
        SseSettings {
            deadline_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    /// Requests allowed per interval, per client address
    pub tokens: u32,
    pub interval_secs: u64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        RateLimiterSettings {
            tokens: 20,
            interval_secs: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSettings {
    pub address: String,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            address: String::from("127.0.0.1:9890"),
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NotifierSettings {
    pub enabled: bool,
    pub telegram: TelegramSettings,
    pub tor: TorSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TelegramSettings {
    pub bot_api_token: String,
    pub bot_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TorSettings {
    /// SOCKS5 proxy address used for outbound notifier requests, e.g. "socks5h://127.0.0.1:9050"
    pub address: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TorSettings {
    fn default() -> Self {
        TorSettings {
            address: None,
            timeout_secs: 30,
        }
    }
}

pub fn get_settings() -> Result<Settings, anyhow::Error> {
    get_settings_with_cli(Cli::parse().into())
}

pub struct CliSettings {
    pub config: Option<String>,
    pub level: Option<String>,
}

impl From<Cli> for CliSettings {
    fn from(cli: Cli) -> Self {
        Self {
            config: cli.config,
            level: cli.level,
        }
    }
}

pub trait ConfigurableSettings: Serialize + for<'de> Deserialize<'de> + Default {
    /// Apply CLI settings after loading from file
    fn apply_cli_overrides(&mut self, cli_settings: &CliSettings);

    /// Get the default config file path
    fn default_config_path() -> PathBuf {
        PathBuf::from("./config/settings.toml")
    }

    /// Get the config directory path
    fn config_directory() -> PathBuf {
        PathBuf::from("./config")
    }
}

pub fn get_settings_with_cli<T: ConfigurableSettings>(
    cli_settings: CliSettings,
) -> Result<T, anyhow::Error> {
    let mut settings = if let Some(config_path) = cli_settings.config.clone() {
        let path = PathBuf::from(config_path);

        let absolute_path = if path.is_absolute() {
            path
        } else {
            env::current_dir()?.join(path)
        };

        match File::open(absolute_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to map config to settings: {}", e))?
            }
            Err(err) => return Err(anyhow!("Failed to find file: {}", err)),
        }
    } else {
        let default_path = T::default_config_path();
        match File::open(&default_path) {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)
                    .map_err(|e| anyhow!("Failed to read default config: {}", e))?;
                toml::from_str(&content)
                    .map_err(|e| anyhow!("Failed to parse default config: {}", e))?
            }
            Err(_) => {
                let default_settings = T::default();

                fs::create_dir_all(T::config_directory())
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;

                let toml_content = toml::to_string(&default_settings)
                    .map_err(|e| anyhow!("Failed to serialize default settings: {}", e))?;

                let mut file = fs::File::create(&default_path)
                    .map_err(|e| anyhow!("Failed to create config file: {}", e))?;
                file.write_all(toml_content.as_bytes())
                    .map_err(|e| anyhow!("Failed to write default config: {}", e))?;

                default_settings
            }
        }
    };

    settings.apply_cli_overrides(&cli_settings);

    Ok(settings)
}

pub fn setup_logger(
    level: Option<String>,
    filter_targets: Vec<String>,
) -> Result<(), fern::InitError> {
    let rust_log = get_log_level(level);
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}: {}",
                OffsetDateTime::now_utc().format(&Iso8601::DEFAULT).unwrap(),
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .level(rust_log)
        .filter(move |metadata| {
            !filter_targets
                .iter()
                .any(|filter| metadata.target().starts_with(filter))
        })
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

pub fn get_log_level(level: Option<String>) -> LevelFilter {
    if let Some(level) = &level {
        match level.as_ref() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    } else {
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| String::from(""));
        match rust_log.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings::default();
        let serialized = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&serialized).unwrap();

        assert_eq!(parsed.lottery.duration, 144);
        assert_eq!(parsed.lightning.max_fee_ppm, 1500);
        assert_eq!(parsed.api.rate_limiter.tokens, 20);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: LotterySettings = toml::from_str("duration = 1008").unwrap();
        assert_eq!(parsed.duration, 1008);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(
            get_log_level(Some(String::from("debug"))),
            LevelFilter::Debug
        );
        assert_eq!(
            get_log_level(Some(String::from("bogus"))),
            LevelFilter::Info
        );
    }
}
