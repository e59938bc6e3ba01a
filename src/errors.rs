use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoothError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Failed to {operation}: {source}")]
    Template {
        operation: &'static str,
        #[source]
        source: TemplateError,
    },

    #[error("Composition error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Printer error: {0}")]
    Printer(#[from] PrinterError),

    #[error("Printed {completed} of {requested} copies: {source}")]
    PartialPrint {
        completed: u32,
        requested: u32,
        #[source]
        source: PrinterError,
    },

    #[error("There is no photo to print")]
    NothingToPrint,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("A capture session is already running")]
    AlreadyRunning,

    #[error("Capture cancelled")]
    Cancelled,

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Camera did not deliver a frame within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {name}")]
    NotFound { name: String },

    #[error("Template {name} is malformed: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Template {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },

    #[error("Invalid color value: {0}")]
    InvalidColor(String),

    #[error("Template I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Invalid canvas dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Compositing task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create directory: {path}")]
    CreateDirectoryFailed { path: String },

    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Printer not found: {name}")]
    NotFound { name: String },

    #[error("Printer not ready: {reason}")]
    NotReady { reason: String },

    #[error("No printer selected")]
    NoPrinterSelected,

    #[error("Print job failed: {0}")]
    PrintFailed(String),

    #[error("Printer I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type BoothResult<T> = Result<T, BoothError>;

impl BoothError {
    pub(crate) fn template(operation: &'static str, source: TemplateError) -> Self {
        BoothError::Template { operation, source }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            BoothError::Initialization(_) => 500,
            BoothError::Capture(CaptureError::AlreadyRunning) => 409, // Conflict
            BoothError::Capture(_) => 503,
            BoothError::Template {
                source: TemplateError::NotFound { .. },
                ..
            } => 404,
            BoothError::Template { .. } => 500,
            BoothError::Compose(_) => 500,
            BoothError::Storage(_) => 500,
            BoothError::Printer(PrinterError::NoPrinterSelected) => 400,
            BoothError::Printer(_) => 503,
            BoothError::PartialPrint { .. } => 503,
            BoothError::NothingToPrint => 409,
            BoothError::Config(_) => 400,
            BoothError::History(_) => 503,
        }
    }

    pub fn error_response(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "error_type": self.error_type()
        })
    }

    fn error_type(&self) -> &'static str {
        match self {
            BoothError::Initialization(_) => "initialization_error",
            BoothError::Capture(_) => "capture_error",
            BoothError::Template { .. } => "template_error",
            BoothError::Compose(_) => "compose_error",
            BoothError::Storage(_) => "storage_error",
            BoothError::Printer(_) | BoothError::PartialPrint { .. } => "printer_error",
            BoothError::NothingToPrint => "nothing_to_print",
            BoothError::Config(_) => "config_error",
            BoothError::History(_) => "history_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_error_names_operation() {
        let err = BoothError::template(
            "load template",
            TemplateError::NotFound {
                name: "classic_strip".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Failed to load template: Template not found: classic_strip"
        );
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_status_codes() {
        let err = BoothError::Capture(CaptureError::AlreadyRunning);
        assert_eq!(err.status_code(), 409);

        let err = BoothError::Capture(CaptureError::DeviceUnavailable("no feed".into()));
        assert_eq!(err.status_code(), 503);

        let err = BoothError::Printer(PrinterError::NoPrinterSelected);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_partial_print_message() {
        let err = BoothError::PartialPrint {
            completed: 1,
            requested: 3,
            source: PrinterError::PrintFailed("paper jam".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Printed 1 of 3 copies: Print job failed: paper jam"
        );
    }

    #[test]
    fn test_error_response_json() {
        let err = BoothError::Printer(PrinterError::NotFound {
            name: "TestPrinter".to_string(),
        });
        let json = err.error_response();

        assert_eq!(json["ok"], false);
        assert_eq!(
            json["error"],
            "Printer error: Printer not found: TestPrinter"
        );
        assert_eq!(json["error_type"], "printer_error");
    }
}
