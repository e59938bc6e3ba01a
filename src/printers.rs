use async_trait::async_trait;
#[cfg(feature = "printer-cups")]
use printers::{common::base::job::PrinterJobOptions, get_printers};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::PrinterConfig;
use crate::errors::{ConfigError, PrinterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    #[serde(rename = "letter")]
    Letter,
    #[serde(rename = "a4")]
    A4,
    #[serde(rename = "4x6")]
    Photo4x6,
    #[serde(rename = "5x7")]
    Photo5x7,
}

impl FromStr for PaperSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "letter" => Ok(PaperSize::Letter),
            "a4" => Ok(PaperSize::A4),
            "4x6" => Ok(PaperSize::Photo4x6),
            "5x7" => Ok(PaperSize::Photo5x7),
            other => Err(ConfigError::InvalidValue {
                key: "PAPER_SIZE",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintQuality {
    Draft,
    Normal,
    High,
}

impl FromStr for PrintQuality {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(PrintQuality::Draft),
            "normal" => Ok(PrintQuality::Normal),
            "high" => Ok(PrintQuality::High),
            other => Err(ConfigError::InvalidValue {
                key: "PRINT_QUALITY",
                value: other.to_string(),
            }),
        }
    }
}

/// One copy of one file on one printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub file_path: PathBuf,
    pub printer_name: String,
    pub paper_size: PaperSize,
    pub quality: PrintQuality,
}

/// Read-only view of an installed printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterDescriptor {
    pub name: String,
    pub status_text: String,
    pub is_default: bool,
}

impl fmt::Display for PrinterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        write!(f, " - {}", self.status_text)
    }
}

// Printer Service capability
#[async_trait]
pub trait PrinterService: Send + Sync {
    async fn list_printers(&self) -> Result<Vec<PrinterDescriptor>, PrinterError>;
    /// Submits a single copy. Returns the spooler's job id.
    async fn print(&self, job: &PrintJob) -> Result<String, PrinterError>;
    fn type_name(&self) -> &'static str;
}

// CUPS printer implementation
#[cfg(feature = "printer-cups")]
pub struct CupsPrinterService;

#[cfg(feature = "printer-cups")]
impl CupsPrinterService {
    fn paper_properties(paper_size: PaperSize) -> Vec<(&'static str, String)> {
        let page_size = match paper_size {
            PaperSize::Photo4x6 => "Borderless4x6in",
            PaperSize::Photo5x7 => "Borderless5x7in",
            PaperSize::A4 => "A4",
            PaperSize::Letter => "Letter",
        };
        let mut properties = vec![("PageSize", page_size.to_string())];

        if matches!(paper_size, PaperSize::Photo4x6 | PaperSize::Photo5x7) {
            properties.push(("MediaType", "PhotoGlossy".to_string()));
        }
        properties
    }

    fn quality_property(quality: PrintQuality) -> (&'static str, String) {
        // IPP print-quality enum values
        let value = match quality {
            PrintQuality::Draft => "3",
            PrintQuality::Normal => "4",
            PrintQuality::High => "5",
        };
        ("print-quality", value.to_string())
    }
}

#[cfg(feature = "printer-cups")]
#[async_trait]
impl PrinterService for CupsPrinterService {
    async fn list_printers(&self) -> Result<Vec<PrinterDescriptor>, PrinterError> {
        Ok(get_printers()
            .into_iter()
            .map(|p| PrinterDescriptor {
                status_text: format!("{:?}", p.state),
                is_default: p.is_default,
                name: p.name,
            })
            .collect())
    }

    async fn print(&self, job: &PrintJob) -> Result<String, PrinterError> {
        let printer = get_printers()
            .into_iter()
            .find(|p| p.name == job.printer_name || p.system_name == job.printer_name)
            .ok_or_else(|| PrinterError::NotFound {
                name: job.printer_name.clone(),
            })?;

        let file_path = job.file_path.to_string_lossy().to_string();
        if !job.file_path.exists() {
            return Err(PrinterError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", file_path),
            )));
        }

        // Validate image file
        let file_bytes = tokio::fs::read(&job.file_path).await?;
        if let Err(e) = image::load_from_memory(&file_bytes) {
            return Err(PrinterError::PrintFailed(format!(
                "Image file validation failed: {}",
                e
            )));
        }

        // CUPS runs as its own user and must be able to read the file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(mut perms) = std::fs::metadata(&job.file_path).map(|m| m.permissions()) {
                perms.set_mode(0o644);
                let _ = std::fs::set_permissions(&job.file_path, perms);
            }
        }

        let mut raw_properties = Self::paper_properties(job.paper_size);
        raw_properties.push(Self::quality_property(job.quality));
        raw_properties.push(("copies", "1".to_string()));

        let job_name = format!("PhotoStrip-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
        raw_properties.push(("job-name", job_name.clone()));

        let raw_props: Vec<(&str, &str)> = raw_properties
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .collect();

        let options = PrinterJobOptions {
            name: Some(&job_name),
            raw_properties: &raw_props,
        };

        info!(
            "Submitting {} to {} (paper: {:?}, quality: {:?})",
            file_path, printer.name, job.paper_size, job.quality
        );

        // Success only means CUPS accepted the job, not that it printed
        match printer.print_file(&file_path, options) {
            Ok(job_id) => {
                info!("Print job submitted successfully with ID: {}", job_id);
                Ok(job_id.to_string())
            }
            Err(e) => {
                warn!("Print job failed: {}", e);
                Err(PrinterError::PrintFailed(format!(
                    "CUPS print error: {}",
                    e
                )))
            }
        }
    }

    fn type_name(&self) -> &'static str {
        "CUPS"
    }
}

// Mock printer implementation for testing or when no real printer is available
#[derive(Default)]
pub struct MockPrinter {
    delay: Duration,
    jobs: Mutex<Vec<PrintJob>>,
}

impl MockPrinter {
    pub const NAME: &'static str = "Mock Printer";

    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates spooling time on every job.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn jobs(&self) -> Vec<PrintJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PrinterService for MockPrinter {
    async fn list_printers(&self) -> Result<Vec<PrinterDescriptor>, PrinterError> {
        Ok(vec![PrinterDescriptor {
            name: Self::NAME.to_string(),
            status_text: "OK".to_string(),
            is_default: true,
        }])
    }

    async fn print(&self, job: &PrintJob) -> Result<String, PrinterError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.push(job.clone());
        Ok(format!("mock-job-{}", jobs.len()))
    }

    fn type_name(&self) -> &'static str {
        "Mock Printer"
    }
}

/// Picks the printer to use: the primary name, then each fallback, then a
/// printer whose name contains the primary, then the system default.
pub fn select_printer(
    available: &[PrinterDescriptor],
    primary: &str,
    fallback_names: &[String],
) -> Option<String> {
    let exact = |wanted: &str| {
        available
            .iter()
            .find(|p| !wanted.is_empty() && p.name == wanted)
            .map(|p| p.name.clone())
    };

    exact(primary)
        .or_else(|| fallback_names.iter().find_map(|name| exact(name)))
        .or_else(|| {
            available
                .iter()
                .find(|p| !primary.is_empty() && p.name.contains(primary))
                .map(|p| p.name.clone())
        })
        .or_else(|| {
            available
                .iter()
                .find(|p| p.is_default)
                .map(|p| p.name.clone())
        })
}

pub struct PrinterSetup {
    pub service: Arc<dyn PrinterService>,
    pub selected: Option<String>,
}

// Factory function to create appropriate printer instance
pub async fn new_printer(config: &PrinterConfig) -> PrinterSetup {
    info!("Initializing printer system...");

    if config.use_mock {
        info!("Using mock printer (USE_MOCK_PRINTER)");
        return mock_setup();
    }

    #[cfg(feature = "printer-cups")]
    {
        let service = CupsPrinterService;
        match service.list_printers().await {
            Ok(available) if !available.is_empty() => {
                for printer in &available {
                    info!("  - {}", printer);
                }
                let selected = select_printer(&available, &config.name, &config.fallback_names);
                match &selected {
                    Some(name) => info!("Selected printer: '{}'", name),
                    None => warn!(
                        "Printer '{}' not found and no default printer is set",
                        config.name
                    ),
                }
                return PrinterSetup {
                    service: Arc::new(service),
                    selected,
                };
            }
            Ok(_) => warn!("CUPS reports no printers"),
            Err(e) => warn!("Failed to list CUPS printers: {}", e),
        }
    }

    warn!("No physical printer found, using mock printer for testing");
    mock_setup()
}

fn mock_setup() -> PrinterSetup {
    PrinterSetup {
        service: Arc::new(MockPrinter::with_delay(Duration::from_millis(500))),
        selected: Some(MockPrinter::NAME.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer(name: &str, is_default: bool) -> PrinterDescriptor {
        PrinterDescriptor {
            name: name.to_string(),
            status_text: "OK".to_string(),
            is_default,
        }
    }

    #[test]
    fn test_parse_paper_and_quality() {
        assert_eq!("4x6".parse::<PaperSize>().unwrap(), PaperSize::Photo4x6);
        assert_eq!("A4".parse::<PaperSize>().unwrap(), PaperSize::A4);
        assert!("tabloid".parse::<PaperSize>().is_err());
        assert_eq!("High".parse::<PrintQuality>().unwrap(), PrintQuality::High);
        assert!("ultra".parse::<PrintQuality>().is_err());
    }

    #[test]
    fn test_paper_size_json_names() {
        assert_eq!(
            serde_json::to_value(PaperSize::Photo5x7).unwrap(),
            serde_json::json!("5x7")
        );
        let parsed: PaperSize = serde_json::from_value(serde_json::json!("letter")).unwrap();
        assert_eq!(parsed, PaperSize::Letter);
    }

    #[test]
    fn test_select_printer_order() {
        let available = vec![
            printer("Office", true),
            printer("XP8700series-TurboPrint", false),
            printer("Backup", false),
        ];
        let fallbacks = vec!["Backup".to_string()];

        assert_eq!(
            select_printer(&available, "XP8700series-TurboPrint", &fallbacks).as_deref(),
            Some("XP8700series-TurboPrint")
        );
        assert_eq!(
            select_printer(&available, "Missing", &fallbacks).as_deref(),
            Some("Backup")
        );
        assert_eq!(
            select_printer(&available, "XP8700", &[]).as_deref(),
            Some("XP8700series-TurboPrint")
        );
        assert_eq!(
            select_printer(&available, "", &[]).as_deref(),
            Some("Office")
        );
        assert_eq!(select_printer(&[printer("A", false)], "", &[]), None);
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(printer("Office", true).to_string(), "Office (default) - OK");
    }

    #[tokio::test]
    async fn test_mock_printer_records_jobs() {
        let mock = MockPrinter::new();
        let job = PrintJob {
            file_path: PathBuf::from("/tmp/strip.png"),
            printer_name: MockPrinter::NAME.to_string(),
            paper_size: PaperSize::Photo4x6,
            quality: PrintQuality::Normal,
        };

        assert_eq!(mock.print(&job).await.unwrap(), "mock-job-1");
        assert_eq!(mock.print(&job).await.unwrap(), "mock-job-2");
        assert_eq!(mock.jobs(), vec![job.clone(), job]);
        assert!(mock.list_printers().await.unwrap()[0].is_default);
    }

    #[tokio::test]
    async fn test_new_printer_uses_mock_when_configured() {
        let config = PrinterConfig {
            name: String::new(),
            fallback_names: vec![],
            use_mock: true,
            auto_print: false,
            copies: 1,
            paper_size: PaperSize::Photo4x6,
            quality: PrintQuality::Normal,
        };
        let setup = new_printer(&config).await;
        assert_eq!(setup.service.type_name(), "Mock Printer");
        assert_eq!(setup.selected.as_deref(), Some(MockPrinter::NAME));
    }
}
