//! Plain-text rendering of gateway listings and upload progress.

use std::fmt::Write as _;

use chrono::Local;
use client_core::{UploadSnapshot, UploadState};
use shared::protocol::{
    parse_gateway_timestamp, DocumentOcrData, OcrResult, ReceiptRequest, Transaction,
};

const EMPTY_CELL: &str = "-";

pub fn human_readable_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes < KB {
        return format!("{bytes} B");
    }
    if bytes < MB {
        return format_scaled_unit(bytes, KB, "KB");
    }
    format_scaled_unit(bytes, MB, "MB")
}

fn format_scaled_unit(bytes: u64, unit_size: u64, unit_label: &str) -> String {
    let value = bytes as f64 / unit_size as f64;
    let value_text = format!("{value:.2}");
    let compact_value = value_text
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string();
    format!("{compact_value} {unit_label}")
}

/// Gateway timestamps in local time; unparseable values are shown as-is.
pub fn format_timestamp(raw: &str) -> String {
    match parse_gateway_timestamp(raw) {
        Some(parsed) => parsed
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        None if raw.trim().is_empty() => EMPTY_CELL.to_string(),
        None => raw.to_string(),
    }
}

fn cell(value: &str) -> &str {
    if value.trim().is_empty() {
        EMPTY_CELL
    } else {
        value
    }
}

/// One line per observable change of an upload.
pub fn describe_snapshot(snapshot: &UploadSnapshot) -> String {
    let file = snapshot.file_name.as_deref().unwrap_or(EMPTY_CELL);
    match snapshot.state {
        UploadState::Idle => match snapshot.error_message() {
            Some(message) => format!("rejected: {message}"),
            None => "idle".to_string(),
        },
        UploadState::Selected => format!(
            "selected {file} ({}, {})",
            snapshot.media_type.as_deref().unwrap_or(EMPTY_CELL),
            human_readable_bytes(snapshot.file_size.unwrap_or_default())
        ),
        UploadState::Uploading => format!("uploading {file}... {}%", snapshot.progress),
        UploadState::Processing => {
            let request_id = snapshot
                .request_id
                .as_ref()
                .map(|id| id.as_str())
                .unwrap_or(EMPTY_CELL);
            let status = snapshot
                .gateway_status
                .map(|status| status.as_str())
                .unwrap_or("submitted");
            format!(
                "processing request {request_id}: {status} (poll {})",
                snapshot.poll_attempts
            )
        }
        UploadState::Completed => format!(
            "completed request {}",
            snapshot
                .request_id
                .as_ref()
                .map(|id| id.as_str())
                .unwrap_or(EMPTY_CELL)
        ),
        UploadState::Error => format!(
            "error: {}",
            snapshot.error_message().unwrap_or("unknown failure")
        ),
    }
}

pub fn render_requests(requests: &[ReceiptRequest]) -> String {
    if requests.is_empty() {
        return "No receipt requests found.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16}  {:<28}  {:<20}  {:<12}  REQUEST",
        "DATE", "VENDOR", "AMOUNT", "STATUS"
    );
    for request in requests {
        let summary = request.summary();
        let _ = writeln!(
            out,
            "{:<16}  {:<28}  {:<20}  {:<12}  {}",
            format_timestamp(&request.created_at),
            summary.vendor,
            summary.amount,
            cell(&request.status),
            cell(&request.request_id)
        );
    }
    out
}

pub fn render_transactions(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions found.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12}  {:<14}  {:>6}  {:<12}  TRANSACTION",
        "DATE", "TOTAL", "ITEMS", "STATUS"
    );
    for transaction in transactions {
        let _ = writeln!(
            out,
            "{:<12}  {:<14}  {:>6}  {:<12}  {}",
            cell(&transaction.transaction_date),
            cell(&transaction.total_amount),
            transaction.purchased_items.len(),
            cell(&transaction.status),
            cell(&transaction.transaction_id)
        );
        for item in &transaction.purchased_items {
            let _ = writeln!(
                out,
                "    - {} {}",
                cell(&item.name),
                item.price.as_deref().unwrap_or("")
            );
        }
    }
    out
}

pub fn render_medical_records(records: &[OcrResult]) -> String {
    let rows: Vec<(&OcrResult, &DocumentOcrData)> = records
        .iter()
        .filter_map(|record| record.document_ocr_data.as_ref().map(|data| (record, data)))
        .collect();
    if rows.is_empty() {
        return "No medical records found.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16}  {:<12}  {:<24}  {:<24}  REQUEST",
        "PROCESSED", "SPECIES", "COMPLAINT", "DIAGNOSIS"
    );
    for (record, data) in rows {
        let _ = writeln!(
            out,
            "{:<16}  {:<12}  {:<24}  {:<24}  {}",
            format_timestamp(&record.created_at),
            cell(&data.animal_info.species),
            cell(&data.chief_complaint),
            cell(&data.diagnosis.join(", ")),
            record.request_id
        );
    }
    out
}

pub fn render_medical_record(record: &OcrResult) -> String {
    let Some(data) = record.document_ocr_data.as_ref() else {
        return "Medical record not found.\n".to_string();
    };
    let findings = &data.findings;

    let mut out = String::new();
    let _ = writeln!(out, "Medical record {}", record.request_id);
    let _ = writeln!(out, "Processed:          {}", format_timestamp(&record.created_at));
    let _ = writeln!(out, "Consultation date:  {}", cell(&data.consultation_date));
    let _ = writeln!(
        out,
        "Patient:            {} ({})",
        cell(&data.animal_info.species),
        cell(&data.animal_info.weight)
    );
    let _ = writeln!(out, "Chief complaint:    {}", cell(&data.chief_complaint));
    let _ = writeln!(out, "History:            {}", cell(&data.history));

    let _ = writeln!(out, "\nFindings");
    let exam = &findings.physical_exam;
    let _ = writeln!(
        out,
        "  Physical exam:    temperature {}, heart {}, abdomen {}",
        cell(&exam.temperature),
        cell(&exam.heart),
        cell(&exam.abdomen)
    );
    let labs = &findings.lab_results;
    let _ = writeln!(
        out,
        "  Lab results:      BUN {}, CA {}, CRE {}, GPT {}, USG {}, WBC {}",
        cell(&labs.bun),
        cell(&labs.ca),
        cell(&labs.cre),
        cell(&labs.gpt),
        cell(&labs.usg),
        cell(&labs.wbc)
    );
    let imaging = &findings.imaging;
    let _ = writeln!(
        out,
        "  Imaging:          ECG {}, Echo {}, X-ray {}",
        cell(&imaging.ecg),
        cell(&imaging.echo),
        cell(&imaging.x_ray)
    );

    write_list(&mut out, "Diagnosis", &data.diagnosis);
    write_list(&mut out, "Treatment", &data.treatment);

    let _ = writeln!(out, "\nPrescriptions");
    if data.prescriptions.is_empty() {
        let _ = writeln!(out, "  {EMPTY_CELL}");
    }
    for prescription in &data.prescriptions {
        let _ = writeln!(
            out,
            "  - {} {} {} ({})",
            cell(&prescription.name),
            cell(&prescription.dosage),
            cell(&prescription.frequency),
            cell(&prescription.route)
        );
    }

    let _ = writeln!(out, "\nFollow-up:          {}", cell(&data.follow_up));
    out
}

fn write_list(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "\n{title}");
    if items.is_empty() {
        let _ = writeln!(out, "  {EMPTY_CELL}");
    }
    for item in items {
        let _ = writeln!(out, "  - {item}");
    }
}
