// src/payslip/categorize.rs

use super::labels::{DEDUCTION_KEYWORDS, is_attendance_name};
use super::totals::Totals;
use super::{Category, LineItem};
use std::collections::BTreeMap;
use tracing::debug;

/// Built-in name lookup, consulted after user rules.
const KNOWN_CATEGORIES: &[(&str, Category)] = &[
    ("基本給", Category::Payment),
    ("本給", Category::Payment),
    ("給料", Category::Payment),
    ("役職手当", Category::Payment),
    ("職務手当", Category::Payment),
    ("資格手当", Category::Payment),
    ("家族手当", Category::Payment),
    ("住宅手当", Category::Payment),
    ("通勤手当", Category::Payment),
    ("通勤費", Category::Payment),
    ("非課税通勤費", Category::Payment),
    ("非課税通勤手当", Category::Payment),
    ("時間外手当", Category::Payment),
    ("残業手当", Category::Payment),
    ("深夜手当", Category::Payment),
    ("休日手当", Category::Payment),
    ("賞与", Category::Payment),
    ("健康保険", Category::Deduction),
    ("健康保険料", Category::Deduction),
    ("介護保険", Category::Deduction),
    ("介護保険料", Category::Deduction),
    ("厚生年金", Category::Deduction),
    ("厚生年金保険", Category::Deduction),
    ("厚生年金保険料", Category::Deduction),
    ("雇用保険", Category::Deduction),
    ("雇用保険料", Category::Deduction),
    ("所得税", Category::Deduction),
    ("住民税", Category::Deduction),
    ("組合費", Category::Deduction),
    ("財形貯蓄", Category::Deduction),
    ("差引支給額", Category::Net),
    ("口座振込額", Category::Net),
    ("振込支給額", Category::Net),
    ("前月繰越", Category::Skip),
    ("端数調整", Category::Skip),
];

const SUBTOTAL_MARKERS: &[&str] = &["合計", "小計", "累計"];

/// Category rules supplied by the user, keyed by exact item name.
pub type CustomCategories = BTreeMap<String, Category>;

/// Decide the category of a single item.
pub fn categorize_item(item: &LineItem, custom: &CustomCategories) -> Category {
    if item.category != Category::Unknown {
        return item.category;
    }
    if let Some(category) = custom.get(&item.name) {
        return *category;
    }
    if let Some((_, category)) = KNOWN_CATEGORIES.iter().find(|(name, _)| *name == item.name) {
        return *category;
    }
    if SUBTOTAL_MARKERS.iter().any(|m| item.name.contains(m)) {
        return Category::Skip;
    }
    if item.amount < 0 {
        return Category::Deduction;
    }
    if is_attendance_name(&item.name) {
        return Category::Attendance;
    }
    if DEDUCTION_KEYWORDS.iter().any(|k| item.name.contains(k)) {
        return Category::Deduction;
    }
    Category::Payment
}

/// Categorize a list of items into new copies, dropping anything that is
/// not a monetary line (skip / attendance).
pub fn categorize(items: &[LineItem], custom: &CustomCategories) -> Vec<LineItem> {
    items
        .iter()
        .map(|item| LineItem {
            category: categorize_item(item, custom),
            ..item.clone()
        })
        .filter(|item| !matches!(item.category, Category::Skip | Category::Attendance))
        .collect()
}

/// Fill totals the document did not state. Parsed totals are never
/// overwritten; sums are taken only over categories that actually occur.
pub fn derive_totals(items: &[LineItem], parsed: Totals) -> Totals {
    let sum_of = |category: Category| {
        let mut matched = items.iter().filter(|i| i.category == category).peekable();
        matched.peek()?;
        let sum = matched.try_fold(0i64, |acc, i| acc.checked_add(i.amount));
        if sum.is_none() {
            debug!(?category, "Item sum out of range, total left unset");
        }
        sum
    };

    let mut totals = parsed;
    if totals.gross.is_none() {
        totals.gross = sum_of(Category::Payment);
    }
    if totals.deduction.is_none() {
        totals.deduction = sum_of(Category::Deduction);
    }

    match (totals.gross, totals.deduction, totals.net) {
        (Some(gross), Some(deduction), None) => totals.net = gross.checked_sub(deduction),
        (None, Some(deduction), Some(net)) => totals.gross = net.checked_add(deduction),
        (Some(gross), None, Some(net)) => totals.deduction = gross.checked_sub(net),
        _ => {}
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payslip::Section;

    fn item(name: &str, amount: i64) -> LineItem {
        LineItem {
            name: name.to_string(),
            amount,
            category: Category::Unknown,
            section: None,
        }
    }

    #[test]
    fn test_section_category_is_kept() {
        let mut it = item("東友会費", 300);
        it.category = Category::Deduction;
        it.section = Some(Section::Deduction);
        assert_eq!(categorize_item(&it, &CustomCategories::new()), Category::Deduction);
    }

    #[test]
    fn test_rule_order() {
        let custom = CustomCategories::new();
        assert_eq!(categorize_item(&item("基本給", 200_000), &custom), Category::Payment);
        assert_eq!(categorize_item(&item("健康保険料", 12_000), &custom), Category::Deduction);
        assert_eq!(categorize_item(&item("調整額", -500), &custom), Category::Deduction);
        assert_eq!(categorize_item(&item("出勤日数", 20), &custom), Category::Attendance);
        assert_eq!(categorize_item(&item("互助会控除", 1_000), &custom), Category::Deduction);
        assert_eq!(categorize_item(&item("皆勤手当", 5_000), &custom), Category::Payment);
        assert_eq!(categorize_item(&item("課税支給合計", 5_000), &custom), Category::Skip);
    }

    #[test]
    fn test_custom_rules_precede_builtin() {
        let mut custom = CustomCategories::new();
        custom.insert("基本給".to_string(), Category::Skip);
        custom.insert("社宅料".to_string(), Category::Payment);
        assert_eq!(categorize_item(&item("基本給", 1_000), &custom), Category::Skip);
        assert_eq!(categorize_item(&item("社宅料", 1_000), &custom), Category::Payment);
    }

    #[test]
    fn test_categorize_filters_non_monetary() {
        let items = vec![
            item("基本給", 200_000),
            item("出勤日数", 20),
            item("前月繰越", 15),
            item("所得税", 4_000),
        ];
        let out = categorize(&items, &CustomCategories::new());
        let names: Vec<&str> = out.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["基本給", "所得税"]);
        // Input list is untouched.
        assert!(items.iter().all(|i| i.category == Category::Unknown));
    }

    #[test]
    fn test_derive_from_items() {
        let items = categorize(
            &[item("基本給", 200_000), item("通勤手当", 10_000), item("所得税", 5_000)],
            &CustomCategories::new(),
        );
        let totals = derive_totals(&items, Totals::default());
        assert_eq!(totals.gross, Some(210_000));
        assert_eq!(totals.deduction, Some(5_000));
        assert_eq!(totals.net, Some(205_000));
    }

    #[test]
    fn test_derive_never_overwrites() {
        let items = categorize(&[item("基本給", 200_000)], &CustomCategories::new());
        let parsed = Totals {
            gross: Some(250_000),
            deduction: None,
            net: Some(230_000),
        };
        let totals = derive_totals(&items, parsed);
        assert_eq!(totals.gross, Some(250_000));
        assert_eq!(totals.deduction, Some(20_000));
        assert_eq!(totals.net, Some(230_000));
    }

    #[test]
    fn test_derive_leaves_unknown_unset() {
        let totals = derive_totals(&[], Totals::default());
        assert_eq!(totals, Totals::default());

        let items = categorize(&[item("基本給", 100_000)], &CustomCategories::new());
        let totals = derive_totals(&items, Totals::default());
        assert_eq!(totals.gross, Some(100_000));
        assert_eq!(totals.deduction, None);
        assert_eq!(totals.net, None);
    }

    #[test]
    fn test_derive_out_of_range_sum() {
        let items = categorize(
            &[item("基本給", i64::MAX), item("役職手当", 30_000), item("健康保険", 12_000)],
            &CustomCategories::new(),
        );
        let totals = derive_totals(&items, Totals::default());
        assert_eq!(totals.gross, None);
        assert_eq!(totals.deduction, Some(12_000));
        assert_eq!(totals.net, None);

        let parsed = Totals {
            gross: Some(i64::MIN),
            deduction: Some(1),
            net: None,
        };
        assert_eq!(derive_totals(&[], parsed).net, None);
    }
}
