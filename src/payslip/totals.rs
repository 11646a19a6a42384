// src/payslip/totals.rs

use super::amount::resolve_amount;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Which document-level total a label designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalKind {
    Gross,
    Deduction,
    Net,
}

/// Gross / deduction / net as found on the document. Each is set at most once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub gross: Option<i64>,
    pub deduction: Option<i64>,
    pub net: Option<i64>,
}

impl Totals {
    /// Record a total. The first value wins; later duplicates are ignored
    /// and reported as `false`.
    pub fn assign(&mut self, kind: TotalKind, value: i64) -> bool {
        let slot = match kind {
            TotalKind::Gross => &mut self.gross,
            TotalKind::Deduction => &mut self.deduction,
            TotalKind::Net => &mut self.net,
        };
        if slot.is_some() {
            debug!(?kind, value, "Duplicate total ignored");
            return false;
        }
        *slot = Some(value);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.gross.is_some() && self.deduction.is_some() && self.net.is_some()
    }
}

const EXCLUSION_MARKERS: &[&str] = &["累計", "対象額", "非課税"];

/// Classify a label as a total line. Whitespace inside the label is ignored
/// so that OCR splits like `支給 合計` still match.
pub fn classify_label(label: &str) -> Option<TotalKind> {
    let label: String = label.chars().filter(|c| !c.is_whitespace()).collect();
    let label = label.trim_end_matches(':');

    if EXCLUSION_MARKERS.iter().any(|m| label.contains(m)) {
        return None;
    }
    if label.contains("差引支給額")
        || label.contains("手取り")
        || label.contains("手取額")
        || label == "口座振込額"
    {
        return Some(TotalKind::Net);
    }
    if (label.contains("支給") && label.contains("合計")) || label.contains("総支給") {
        return Some(TotalKind::Gross);
    }
    if label.contains("控除") && label.contains("合計") && !label.contains("差引") {
        return Some(TotalKind::Deduction);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TotalsError {
    #[error("totals not found: {0}")]
    MissingTotals(String),
}

fn totals_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(支給合計|控除合計|差引支給額)[^\d\-(]*([\-\d,()]+)").expect("totals regex")
    })
}

/// Totals-only extraction: look for the three canonical total labels
/// anywhere in the text, ignoring line items entirely. A missing gross is
/// recovered as net + deduction; anything else missing is an error.
pub fn extract_totals_only(text: &str) -> Result<Totals, TotalsError> {
    let mut totals = Totals::default();
    for caps in totals_line_re().captures_iter(text) {
        let Ok(value) = resolve_amount(&caps[2]) else {
            continue;
        };
        match &caps[1] {
            "支給合計" => totals.assign(TotalKind::Gross, value),
            "控除合計" => totals.assign(TotalKind::Deduction, value),
            _ => totals.assign(TotalKind::Net, value),
        };
    }

    if totals.gross.is_none() {
        if let (Some(net), Some(deduction)) = (totals.net, totals.deduction) {
            totals.gross = Some(net + deduction);
        }
    }

    let missing: Vec<&str> = [
        ("gross", totals.gross),
        ("deduction", totals.deduction),
        ("net", totals.net),
    ]
    .iter()
    .filter(|(_, v)| v.is_none())
    .map(|(name, _)| *name)
    .collect();

    if missing.is_empty() {
        Ok(totals)
    } else {
        Err(TotalsError::MissingTotals(missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_labels() {
        assert_eq!(classify_label("支給合計"), Some(TotalKind::Gross));
        assert_eq!(classify_label("総支給額"), Some(TotalKind::Gross));
        assert_eq!(classify_label("支給 合計"), Some(TotalKind::Gross));
        assert_eq!(classify_label("控除合計"), Some(TotalKind::Deduction));
        assert_eq!(classify_label("控除額合計"), Some(TotalKind::Deduction));
        assert_eq!(classify_label("差引支給額"), Some(TotalKind::Net));
        assert_eq!(classify_label("手取り"), Some(TotalKind::Net));
        assert_eq!(classify_label("口座振込額"), Some(TotalKind::Net));
        assert_eq!(classify_label("口座振込額1"), None);
        assert_eq!(classify_label("基本給"), None);
    }

    #[test]
    fn test_exclusion_markers() {
        assert_eq!(classify_label("支給合計累計"), None);
        assert_eq!(classify_label("課税対象額支給合計"), None);
        assert_eq!(classify_label("非課税支給合計"), None);
    }

    #[test]
    fn test_first_assignment_wins() {
        let mut totals = Totals::default();
        assert!(totals.assign(TotalKind::Gross, 300_000));
        assert!(!totals.assign(TotalKind::Gross, 1));
        assert_eq!(totals.gross, Some(300_000));
        assert!(!totals.is_complete());
    }

    #[test]
    fn test_totals_only() {
        let totals = extract_totals_only("支給合計 200\n控除合計 50\n差引支給額 150").unwrap();
        assert_eq!(
            totals,
            Totals {
                gross: Some(200),
                deduction: Some(50),
                net: Some(150)
            }
        );
    }

    #[test]
    fn test_totals_only_recovers_gross() {
        let totals = extract_totals_only("控除合計 20\n差引支給額 80").unwrap();
        assert_eq!(totals.gross, Some(100));
        assert_eq!(totals.deduction, Some(20));
        assert_eq!(totals.net, Some(80));
    }

    #[test]
    fn test_totals_only_parenthesized() {
        let totals = extract_totals_only("支給合計 1,000\n控除合計 (200)\n差引支給額 1,200").unwrap();
        assert_eq!(totals.deduction, Some(-200));
    }

    #[test]
    fn test_totals_only_missing() {
        let err = extract_totals_only("支給合計 200").unwrap_err();
        assert_eq!(err, TotalsError::MissingTotals("deduction, net".to_string()));
    }
}
