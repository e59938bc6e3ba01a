use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use crate::errors::ConfigError;
use crate::printers::{PaperSize, PrintQuality};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub storage: StorageConfig,
    pub printer: PrinterConfig,
    pub template: TemplateConfig,
    pub session: SessionConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub use_mock: bool,
    /// Deadline around a single frame fetch. `None` waits forever.
    pub capture_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
}

impl StorageConfig {
    pub fn photos_path(&self) -> PathBuf {
        self.base_path.join("photos")
    }

    pub fn output_path(&self) -> PathBuf {
        self.base_path.join("output")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrinterConfig {
    pub name: String,
    pub fallback_names: Vec<String>,
    pub use_mock: bool,
    pub auto_print: bool,
    pub copies: u32,
    pub paper_size: PaperSize,
    pub quality: PrintQuality,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub templates_path: PathBuf,
    pub fonts_path: PathBuf,
    pub default_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub timer_seconds: u32,
    pub pre_shot_delay: Duration,
    pub settle_delay: Duration,
    pub print_grace: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

/// Upper bound on copies per print run.
pub const MAX_PRINT_COPIES: u32 = 10;

/// Longest countdown the kiosk accepts per shot.
pub const MAX_TIMER_SECONDS: u32 = 30;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, falling back to
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server = ServerConfig {
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "8080")
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
        };

        let timeout_ms: u64 = parse_value("CAPTURE_TIMEOUT_MS", &var("CAPTURE_TIMEOUT_MS", "5000"))?;
        let camera = CameraConfig {
            device: var("VIDEO_DEVICE", "/dev/video0"),
            width: parse_value("VIDEO_WIDTH", &var("VIDEO_WIDTH", "1280"))?,
            height: parse_value("VIDEO_HEIGHT", &var("VIDEO_HEIGHT", "720"))?,
            use_mock: parse_value("USE_MOCK_CAMERA", &var("USE_MOCK_CAMERA", "false"))?,
            capture_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        };

        let base_path = var("STORAGE_PATH", "./booth_data");
        let storage = StorageConfig {
            base_path: PathBuf::from(&base_path),
        };

        let printer = PrinterConfig {
            name: var("PRINTER_NAME", ""),
            fallback_names: var("PRINTER_FALLBACK", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            use_mock: parse_value("USE_MOCK_PRINTER", &var("USE_MOCK_PRINTER", "false"))?,
            auto_print: parse_value("AUTO_PRINT", &var("AUTO_PRINT", "false"))?,
            copies: parse_value("PRINT_COPIES", &var("PRINT_COPIES", "1"))?,
            paper_size: parse_value("PAPER_SIZE", &var("PAPER_SIZE", "4x6"))?,
            quality: parse_value("PRINT_QUALITY", &var("PRINT_QUALITY", "normal"))?,
        };

        let template = TemplateConfig {
            templates_path: var("TEMPLATES_PATH", "./templates").into(),
            fonts_path: var("FONTS_PATH", "/usr/share/fonts/truetype").into(),
            default_template: var("DEFAULT_TEMPLATE", "classic_strip"),
        };

        let session = SessionConfig {
            timer_seconds: parse_value("TIMER_SECONDS", &var("TIMER_SECONDS", "3"))?,
            pre_shot_delay: millis("PRE_SHOT_DELAY_MS", &var("PRE_SHOT_DELAY_MS", "1500"))?,
            settle_delay: millis("SETTLE_DELAY_MS", &var("SETTLE_DELAY_MS", "500"))?,
            print_grace: millis("PRINT_GRACE_MS", &var("PRINT_GRACE_MS", "1000"))?,
        };

        let database = DatabaseConfig {
            path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&base_path).join("booth.db")),
        };

        let config = Config {
            server,
            camera,
            storage,
            printer,
            template,
            session,
            database,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.printer.copies == 0 || self.printer.copies > MAX_PRINT_COPIES {
            return Err(ConfigError::InvalidValue {
                key: "PRINT_COPIES",
                value: self.printer.copies.to_string(),
            });
        }

        if self.session.timer_seconds > MAX_TIMER_SECONDS {
            return Err(ConfigError::InvalidValue {
                key: "TIMER_SECONDS",
                value: self.session.timer_seconds.to_string(),
            });
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "VIDEO_WIDTH/VIDEO_HEIGHT",
                value: format!("{}x{}", self.camera.width, self.camera.height),
            });
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "HOST",
                value: self.server.host.clone(),
            })
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_value::<u64>(key, raw).map(Duration::from_millis)
}
