//! Reading helpers for generated reports. The pipeline returns the model text
//! untouched; these are for callers that want to summarise it.

use crate::prompt::NO_DISCREPANCIES;
use regex::Regex;
use serde::{Deserialize, Serialize};

const DISCREPANCY_LINE: &str = r"(?m)^\s*(?:[-*•]|\d+[.)])\s*\[?([^\]:\n]+?)\]?\s*:\s*\[?(.+?)\]?\s+vs\.?\s+\[?(.+?)\]?\s*\.?\s*$";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discrepancy {
    pub category: String,
    pub reference_value: String,
    pub suspect_value: String,
}

pub fn parse_discrepancies(report: &str) -> Result<Vec<Discrepancy>, regex::Error> {
    let line = Regex::new(DISCREPANCY_LINE)?;
    Ok(line
        .captures_iter(report)
        .map(|capture| Discrepancy {
            category: capture[1].trim().to_string(),
            reference_value: capture[2].trim().to_string(),
            suspect_value: capture[3].trim().to_string(),
        })
        .collect())
}

pub fn reports_no_discrepancies(report: &str) -> bool {
    report.trim().trim_matches('\'') == NO_DISCREPANCIES
}
