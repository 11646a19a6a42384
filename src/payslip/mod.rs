// src/payslip/mod.rs

pub mod amount;
pub mod categorize;
pub mod consistency;
pub mod labels;
pub mod lines;
pub mod normalize;
pub mod totals;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use time::{Date, Month};
use tracing::debug;

pub use amount::{AmountError, MAX_AMOUNT, check_range, resolve_amount};
pub use categorize::CustomCategories;
pub use normalize::normalize;
pub use totals::{Totals, TotalsError};

/// What a monetary line is, once categorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Payment,
    Deduction,
    Net,
    Attendance,
    Skip,
    Unknown,
}

impl Category {
    pub fn from_section(section: Section) -> Self {
        match section {
            Section::Payment => Category::Payment,
            Section::Deduction => Category::Deduction,
            Section::Attendance => Category::Attendance,
            Section::Other => Category::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Payment => "payment",
            Category::Deduction => "deduction",
            Category::Net => "net",
            Category::Attendance => "attendance",
            Category::Skip => "skip",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the English names as well as the Japanese section words
    /// (`支給`, `控除`, ...) that extraction models tend to answer with.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "payment" | "支給" => Ok(Category::Payment),
            "deduction" | "控除" => Ok(Category::Deduction),
            "net" | "差引" | "手取り" => Ok(Category::Net),
            "attendance" | "勤怠" => Ok(Category::Attendance),
            "skip" => Ok(Category::Skip),
            "unknown" | "" => Ok(Category::Unknown),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Document grouping a line appears under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Payment,
    Deduction,
    Attendance,
    Other,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Payment => "payment",
            Section::Deduction => "deduction",
            Section::Attendance => "attendance",
            Section::Other => "other",
        }
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(Section::Payment),
            "deduction" => Ok(Section::Deduction),
            "attendance" => Ok(Section::Attendance),
            "other" => Ok(Section::Other),
            other => Err(format!("unknown section: {other}")),
        }
    }
}

/// A single monetary line of the payslip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub amount: i64,
    pub category: Category,
    pub section: Option<Section>,
}

/// Everything we could extract from one payslip text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub items: Vec<LineItem>,
    pub attendance: BTreeMap<String, i64>,
    pub gross_amount: Option<i64>,
    pub deduction_amount: Option<i64>,
    pub net_amount: Option<i64>,
    pub warnings: Vec<String>,
    pub raw_text: String,
}

impl ParseResult {
    pub fn totals(&self) -> Totals {
        Totals {
            gross: self.gross_amount,
            deduction: self.deduction_amount,
            net: self.net_amount,
        }
    }

    /// Items of one category, in document order.
    pub fn items_in(&self, category: Category) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(move |i| i.category == category)
    }
}

/// Tunables of the line parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Amounts below this magnitude are treated as OCR noise outside
    /// attendance context.
    pub min_amount: i64,
    /// User category rules, consulted before the built-in table.
    pub custom_categories: CustomCategories,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_amount: 10,
            custom_categories: CustomCategories::new(),
        }
    }
}

/// Parse raw OCR text into items, attendance figures and totals.
pub fn parse_payslip(text: &str, config: &ParserConfig) -> ParseResult {
    let normalized = normalize(text);
    let scan = lines::scan(&normalized, config);
    assemble(scan.items, scan.attendance, scan.totals, text, config)
}

/// Totals-only parse: no items, and an error if a total cannot be found.
pub fn parse_totals_only(text: &str) -> Result<ParseResult, TotalsError> {
    let totals = totals::extract_totals_only(&normalize(text))?;
    Ok(ParseResult {
        gross_amount: totals.gross,
        deduction_amount: totals.deduction,
        net_amount: totals.net,
        warnings: consistency::check(&totals).into_iter().collect(),
        raw_text: text.to_string(),
        ..ParseResult::default()
    })
}

/// Categorize items, fill missing totals and check them. Shared by the
/// line parser and by callers that already hold name/amount/category
/// triples from a structured extraction.
pub fn assemble(
    items: Vec<LineItem>,
    attendance: BTreeMap<String, i64>,
    parsed: Totals,
    raw_text: &str,
    config: &ParserConfig,
) -> ParseResult {
    let items = categorize::categorize(&items, &config.custom_categories);
    let totals = categorize::derive_totals(&items, parsed);
    let warnings: Vec<String> = consistency::check(&totals).into_iter().collect();

    debug!(
        items = items.len(),
        attendance = attendance.len(),
        gross = ?totals.gross,
        deduction = ?totals.deduction,
        net = ?totals.net,
        warnings = warnings.len(),
        "Payslip assembled"
    );

    ParseResult {
        items,
        attendance,
        gross_amount: totals.gross,
        deduction_amount: totals.deduction,
        net_amount: totals.net,
        warnings,
        raw_text: raw_text.to_string(),
    }
}

/// Salary slip or bonus slip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayslipKind {
    Salary,
    Bonus,
}

impl PayslipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayslipKind::Salary => "salary",
            PayslipKind::Bonus => "bonus",
        }
    }
}

impl FromStr for PayslipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "salary" => Ok(PayslipKind::Salary),
            "bonus" => Ok(PayslipKind::Bonus),
            other => Err(format!("unknown payslip kind: {other}")),
        }
    }
}

/// Bonus slips say so in their header.
pub fn infer_kind(text: &str) -> PayslipKind {
    if text.contains("賞与") {
        PayslipKind::Bonus
    } else {
        PayslipKind::Salary
    }
}

fn period_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(令和\s*)?(\d{1,4})\s*年\s*(\d{1,2})\s*月").expect("period regex")
    })
}

/// First `YYYY年M月` (or `令和N年M月`) in the text, as the first of that month.
pub fn extract_period(text: &str) -> Option<Date> {
    let normalized = normalize(text);
    period_re().captures_iter(&normalized).find_map(|caps| {
        let year: i32 = caps[2].parse().ok()?;
        let year = if caps.get(1).is_some() { 2018 + year } else { year };
        if year < 1900 {
            return None;
        }
        let month = Month::try_from(caps[3].parse::<u8>().ok()?).ok()?;
        Date::from_calendar_date(year, month, 1).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParseResult {
        parse_payslip(text, &ParserConfig::default())
    }

    fn summary(result: &ParseResult) -> Vec<(&str, Category, i64)> {
        result
            .items
            .iter()
            .map(|i| (i.name.as_str(), i.category, i.amount))
            .collect()
    }

    #[test]
    fn test_sectioned_multi_pair_document() {
        let result = parse("支給項目\n本給 269000 通勤費補助 12860\n控除項目\n東友会費 300 共済会費 200");
        assert_eq!(
            summary(&result),
            vec![
                ("本給", Category::Payment, 269000),
                ("通勤費補助", Category::Payment, 12860),
                ("東友会費", Category::Deduction, 300),
                ("共済会費", Category::Deduction, 200),
            ]
        );
        assert_eq!(result.gross_amount, Some(281860));
        assert_eq!(result.deduction_amount, Some(500));
        assert_eq!(result.net_amount, Some(281360));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_explicit_totals() {
        let result = parse("基本給 100000\n支給合計 100000\n控除合計 0\n差引支給額 100000");
        assert_eq!(summary(&result), vec![("基本給", Category::Payment, 100000)]);
        assert_eq!(result.gross_amount, Some(100000));
        assert_eq!(result.deduction_amount, Some(0));
        assert_eq!(result.net_amount, Some(100000));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_attendance_kept_apart() {
        let result = parse("所定労働日数\n21日\n基本給 100000");
        assert_eq!(result.attendance.get("所定労働日数"), Some(&21));
        assert!(result.items.iter().any(|i| i.name == "基本給"));
        assert!(!result.items.iter().any(|i| i.name == "所定労働日数"));
    }

    #[test]
    fn test_index_stripped_and_noise_dropped() {
        let result = parse("口座振込額1 123\n手当2\n5");
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "口座振込額");
        assert_eq!(result.items[0].amount, 123);
        assert!(!result.items.iter().any(|i| i.amount == 5));
    }

    #[test]
    fn test_glued_metadata_is_not_an_item() {
        let result = parse("氏名山田太郎\n250000\n所属営業部\n役職手当 30000");
        assert_eq!(summary(&result), vec![("役職手当", Category::Payment, 30000)]);
        assert!(!result.items.iter().any(|i| i.name.starts_with("氏名")));
    }

    #[test]
    fn test_negative_amount_first() {
        let result = parse("-12345 雇用保険料");
        assert_eq!(
            summary(&result),
            vec![("雇用保険料", Category::Deduction, -12345)]
        );
    }

    #[test]
    fn test_full_width_document() {
        let result = parse("基本給　２５０，０００\n健康保険料　（１２，０００）\n支給合計　２５０，０００");
        assert_eq!(
            summary(&result),
            vec![
                ("基本給", Category::Payment, 250000),
                ("健康保険料", Category::Deduction, -12000),
            ]
        );
        assert_eq!(result.gross_amount, Some(250000));
        assert_eq!(result.deduction_amount, Some(-12000));
    }

    #[test]
    fn test_consistent_totals_produce_no_warning() {
        let text = "支給項目\n基本給 300000\n通勤手当 10000\n支給合計 310000\n\
                    控除項目\n健康保険 15000\n所得税 8000\n控除合計 23000\n差引支給額 287000";
        let result = parse(text);
        assert_eq!(result.gross_amount, Some(310000));
        assert_eq!(result.deduction_amount, Some(23000));
        assert_eq!(result.net_amount, Some(287000));
        assert_eq!(
            result.gross_amount.unwrap() - result.deduction_amount.unwrap(),
            result.net_amount.unwrap()
        );
        assert!(result.warnings.is_empty());
        assert_eq!(result.items.len(), 4);
    }

    #[test]
    fn test_inconsistent_totals_warn() {
        let result = parse("支給合計 300000\n控除合計 50000\n差引支給額 200000");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.net_amount, Some(200000));
    }

    #[test]
    fn test_empty_and_garbage_input() {
        for text in ["", "\n\n", "????"] {
            let result = parse(text);
            assert!(result.items.is_empty());
            assert_eq!(result.totals(), Totals::default());
            assert!(result.warnings.is_empty());
        }
    }

    #[test]
    fn test_raw_text_preserved() {
        let text = "基本給　１００，０００";
        assert_eq!(parse(text).raw_text, text);
    }

    #[test]
    fn test_structured_items_through_assemble() {
        let items = vec![
            LineItem {
                name: "基本給".to_string(),
                amount: 200000,
                category: "支給".parse().unwrap(),
                section: None,
            },
            LineItem {
                name: "社宅費".to_string(),
                amount: 20000,
                category: "控除".parse().unwrap(),
                section: None,
            },
            LineItem {
                name: "出勤日数".to_string(),
                amount: 20,
                category: Category::Unknown,
                section: None,
            },
        ];
        let result = assemble(
            items,
            BTreeMap::new(),
            Totals::default(),
            "",
            &ParserConfig::default(),
        );
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.net_amount, Some(180000));
        assert_eq!(result.items_in(Category::Deduction).count(), 1);
    }

    #[test]
    fn test_totals_only_mode() {
        let result = parse_totals_only("支給合計 200\n控除合計 50\n差引支給額 150").unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.net_amount, Some(150));
        assert!(parse_totals_only("基本給 100").is_err());
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("支給".parse::<Category>(), Ok(Category::Payment));
        assert_eq!("deduction".parse::<Category>(), Ok(Category::Deduction));
        assert!("bogus".parse::<Category>().is_err());
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(infer_kind("2024年 夏季賞与明細書"), PayslipKind::Bonus);
        assert_eq!(infer_kind("給与明細書"), PayslipKind::Salary);
    }

    #[test]
    fn test_extract_period() {
        assert_eq!(
            extract_period("給与明細書 2024年4月分"),
            Some(Date::from_calendar_date(2024, Month::April, 1).unwrap())
        );
        assert_eq!(
            extract_period("令和6年１２月分"),
            Some(Date::from_calendar_date(2024, Month::December, 1).unwrap())
        );
        assert_eq!(extract_period("出勤日数 20日"), None);
    }
}
