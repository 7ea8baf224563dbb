//! Referral export to interchange formats.
//!
//! Column order is fixed and part of the external contract:
//! id, referrer_id, referred_id, service_id, level, registered_at,
//! referral_code_id.

use crate::error::{Error, Result};
use crate::models::Referral;
use serde::Serialize;
use std::str::FromStr;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::InvalidInput(format!(
                "invalid export format: {}",
                other
            ))),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

/// One exported row. Field order here IS the CSV column order.
#[derive(Debug, Serialize)]
struct ExportRow {
    id: String,
    referrer_id: String,
    referred_id: String,
    service_id: String,
    level: u32,
    registered_at: String,
    referral_code_id: Option<String>,
}

impl ExportRow {
    fn from_referral(referral: &Referral) -> Self {
        Self {
            id: referral.id.to_string(),
            referrer_id: referral.referrer_id.to_string(),
            referred_id: referral.referred_id.to_string(),
            service_id: referral.service_id.to_string(),
            level: referral.level,
            registered_at: referral.registered_at.to_rfc3339(),
            referral_code_id: referral.referral_code_id.map(|id| id.to_string()),
        }
    }
}

/// Serialize referrals into the requested format.
pub fn export_referrals(referrals: &[Referral], format: ExportFormat) -> Result<String> {
    let rows: Vec<ExportRow> = referrals.iter().map(ExportRow::from_referral).collect();

    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for row in &rows {
                writer.serialize(row)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| Error::Storage(e.to_string()))?;
            String::from_utf8(bytes)
                .map_err(|e| Error::InvalidInput(format!("export produced invalid utf-8: {}", e)))
        }
    }
}
