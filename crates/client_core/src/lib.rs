//! Client side of the OCR gateway: HTTP access, upload validation and the
//! upload-and-poll lifecycle that front ends drive.

pub mod controller;
pub mod gateway;
pub mod preview;
pub mod types;
pub mod validation;

pub use controller::{PollPolicy, UploadController, UploadSnapshot, UploadState};
pub use gateway::{medical_records, receipt_results, GatewayError, HttpGateway, OcrGateway};
pub use types::UploadFile;
