use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{OcrStatus, RequestId};

/// Body returned by the upload endpoints once the gateway accepts a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub request_id: RequestId,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub s3_file_path: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub request_id: RequestId,
    pub status: OcrStatus,
    #[serde(default)]
    pub message: String,
}

/// Every listing endpoint wraps its rows in `{ "items": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchasedItem {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    pub transaction_id: String,
    pub created_at: String,
    pub total_amount: String,
    pub purchased_items: Vec<PurchasedItem>,
    pub transaction_date: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimalInfo {
    pub species: String,
    pub weight: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabResults {
    #[serde(rename = "BUN")]
    pub bun: String,
    #[serde(rename = "CA")]
    pub ca: String,
    #[serde(rename = "CRE")]
    pub cre: String,
    #[serde(rename = "GPT")]
    pub gpt: String,
    #[serde(rename = "USG")]
    pub usg: String,
    #[serde(rename = "WBC")]
    pub wbc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalExam {
    pub abdomen: String,
    pub heart: String,
    pub temperature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Imaging {
    #[serde(rename = "ECG")]
    pub ecg: String,
    #[serde(rename = "Echo")]
    pub echo: String,
    #[serde(rename = "X-ray")]
    pub x_ray: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Findings {
    pub imaging: Imaging,
    pub lab_results: LabResults,
    pub physical_exam: PhysicalExam,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prescription {
    pub dosage: String,
    pub frequency: String,
    pub name: String,
    pub route: String,
}

/// Structured fields extracted from a veterinary consultation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentOcrData {
    pub animal_info: AnimalInfo,
    pub chief_complaint: String,
    pub consultation_date: String,
    pub diagnosis: Vec<String>,
    pub findings: Findings,
    pub follow_up: String,
    pub history: String,
    pub prescriptions: Vec<Prescription>,
    pub treatment: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub request_id: RequestId,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_data: Option<Transaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ocr_data: Option<DocumentOcrData>,
}

impl OcrResult {
    pub fn is_medical_record(&self) -> bool {
        self.document_ocr_data.is_some()
    }

    pub fn is_receipt(&self) -> bool {
        self.receipt_data.is_some()
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_gateway_timestamp(&self.created_at)
    }
}

/// Row of the receipt request history. `ocr_result` is the raw text the
/// OCR engine produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptRequest {
    pub request_id: String,
    pub created_at: String,
    pub ocr_result: String,
    pub s3_file_path: String,
    pub status: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub vendor: String,
    pub amount: String,
}

const UNKNOWN_VENDOR: &str = "Unknown Vendor";
const UNKNOWN_AMOUNT: &str = "N/A";
const YEN_SIGN: char = '円';

impl ReceiptRequest {
    /// Best-effort vendor/amount extraction from the raw OCR text: the
    /// vendor is the second non-blank line, the amount the first line
    /// carrying a yen sign.
    pub fn summary(&self) -> ReceiptSummary {
        let lines: Vec<&str> = self
            .ocr_result
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let vendor = lines
            .get(1)
            .map(|line| line.to_string())
            .unwrap_or_else(|| UNKNOWN_VENDOR.to_string());
        let amount = lines
            .iter()
            .find(|line| line.contains(YEN_SIGN))
            .map(|line| line.to_string())
            .unwrap_or_else(|| UNKNOWN_AMOUNT.to_string());

        ReceiptSummary { vendor, amount }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_gateway_timestamp(&self.created_at)
    }
}

impl Transaction {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_gateway_timestamp(&self.created_at)
    }
}

/// Gateway timestamps come either as RFC 3339 or as naive ISO-8601 (UTC).
pub fn parse_gateway_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
