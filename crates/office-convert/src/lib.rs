//! office-convert - headless office document conversion
//!
//! Converts Word, Excel, PowerPoint, plain text and image files to PDF, ODT,
//! HTML and friends by driving LibreOffice in headless mode:
//!
//! ```text
//! source.docx → validate extension → libreoffice --headless --convert-to pdf → rename → out.pdf
//! ```
//!
//! # Example
//! ```no_run
//! use office_convert::{ConverterConfig, OfficeConverter};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConverterConfig::default()
//!     .with_binary("soffice")
//!     .with_working_dir("/srv/converted")
//!     .with_timeout(Duration::from_secs(60));
//!
//! let mut converter = OfficeConverter::with_config("contracts/lease.docx", config)?;
//! converter.set_filter("writer_pdf_Export");
//! let result = converter.convert_to("lease-signed.pdf")?;
//! assert!(result.path().exists());
//! # Ok(())
//! # }
//! ```
//!
//! Extensions are matched case-insensitively against a fixed table (see
//! [`formats`]). The converter is killed if it runs past the configured
//! timeout, and each run gets its own throwaway LibreOffice profile so
//! parallel conversions do not fight over the profile lock.

pub mod command;
pub mod config;
pub mod converter;
pub mod error;
pub mod formats;
pub mod process;

pub use command::{is_binary_available, ConvertCommand};
pub use config::{default_config_path, load_config, ConverterConfig};
pub use converter::{ConversionRequest, ConversionResult, OfficeConverter};
pub use error::{ConvertError, Result};
pub use formats::{allowed_outputs, can_convert, is_supported_input};
pub use process::ConverterOutput;
