// src/payslip/labels.rs
//
// Label tables and compiled line patterns shared by the line classifier,
// the total extractor and the categorizer.

use super::Section;
use regex::Regex;
use std::sync::OnceLock;

/// Labels that open a section, with the label that closes it again.
pub const SECTION_BEGIN: &[(&str, Section, Option<&str>)] = &[
    ("支給項目", Section::Payment, Some("支給合計")),
    ("控除項目", Section::Deduction, Some("控除合計")),
    ("勤怠項目", Section::Attendance, None),
];

/// Column and block headers. A line consisting solely of one of these only
/// hints at the section of what follows.
pub const HEADER_LABELS: &[(&str, Option<Section>)] = &[
    ("支給", Some(Section::Payment)),
    ("支給額", Some(Section::Payment)),
    ("支給の部", Some(Section::Payment)),
    ("控除", Some(Section::Deduction)),
    ("控除額", Some(Section::Deduction)),
    ("控除の部", Some(Section::Deduction)),
    ("勤怠", Some(Section::Attendance)),
    ("勤怠の部", Some(Section::Attendance)),
    ("その他", Some(Section::Other)),
    ("記事", Some(Section::Other)),
    ("項目", None),
    ("金額", None),
    ("内訳", None),
    ("明細", None),
    ("給与明細", None),
    ("給与明細書", None),
    ("給与支給明細書", None),
    ("賞与明細", None),
    ("賞与明細書", None),
];

/// Document metadata that must never be mistaken for an item name.
pub const METADATA_LABELS: &[&str] = &[
    "社員番号",
    "社員No",
    "社員NO",
    "社員コード",
    "従業員番号",
    "従業員コード",
    "個人コード",
    "氏名",
    "名前",
    "所属",
    "部署",
    "部門",
    "役職",
    "会社名",
    "事業所",
    "支給日",
    "支給年月日",
    "対象期間",
    "計算期間",
    "締日",
    "等級",
    "号俸",
    "振込先",
    "振込口座",
    "口座番号",
    "銀行",
];

pub const DEDUCTION_KEYWORDS: &[&str] = &["税", "保険", "控除", "料", "差引"];

/// Lines carrying cumulative or reference figures rather than items.
pub fn noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"累計|標準報酬|算定基礎|課税対象|対象額|社会保険対象").expect("noise regex")
    })
}

pub fn attendance_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(日数|時間|時数|回数|出勤|欠勤|遅刻|早退|有休|有給|休日|休暇)$")
            .expect("attendance suffix regex")
    })
}

/// `name amount unit` or `name: amount unit`, e.g. `出勤日数 21日`.
pub fn quantity_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[^\d]*?[^\d\s:,])\s*:?\s*(?P<qty>\d[\d,]*\s*(?:時間|回数|日|人|回|週))$")
            .expect("quantity line regex")
    })
}

/// `name amount` or `name: amount` where the amount is the whole remainder.
pub fn name_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.*?[^\s:])(?:\s*:\s*|\s+)(?P<amount>\(?[-+−△▲]?\d[\d,]*\)?円?)$")
            .expect("name amount regex")
    })
}

/// `amount name`, e.g. `-12345 雇用保険料`.
pub fn amount_first_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<amount>\(?[-+−△▲]?\d[\d,]*\)?円?)\s+(?P<name>\S.*)$")
            .expect("amount first regex")
    })
}

/// A name glued to its digits, e.g. `基本給100000` or `手当2`.
pub fn glued_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.*[^\d,\s])(?P<digits>\d[\d,]*)$").expect("glued token regex")
    })
}

/// Section opened by a line starting with `label` (optionally `label:`),
/// with the rest of the line.
pub fn section_begin(line: &str) -> Option<(Section, Option<&'static str>, &str)> {
    SECTION_BEGIN.iter().find_map(|(label, section, closing)| {
        let rest = line.strip_prefix(label)?;
        Some((*section, *closing, strip_separator(rest)))
    })
}

/// Section hinted by a line that is exactly a header label, allowing a
/// trailing index such as `支給1`.
pub fn header_label(line: &str) -> Option<Option<Section>> {
    let line = line.trim().trim_end_matches(':');
    let label = match line.trim_end_matches(|c: char| c.is_ascii_digit()) {
        l if !l.is_empty() && !l.ends_with(char::is_whitespace) => l,
        _ => line,
    };
    HEADER_LABELS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, section)| *section)
        .or_else(|| {
            SECTION_BEGIN
                .iter()
                .find(|(l, _, _)| *l == label)
                .map(|(_, section, _)| Some(*section))
        })
}

/// Endings that make a word an item name even when it starts with a
/// metadata label, e.g. `役職手当` or `銀行振込額`.
const ITEM_SUFFIXES: &[&str] = &["手当", "給", "費", "料", "金", "額"];

/// True when the line starts with a metadata label, glued or not
/// (`氏名山田太郎`). A leading word that is really an attendance figure or
/// an item (`支給日数`, `役職手当`) does not count.
pub fn is_metadata_line(line: &str) -> bool {
    let head = line
        .split_whitespace()
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .trim_end_matches(|c: char| c.is_ascii_digit() || c == ',');
    METADATA_LABELS.iter().any(|label| {
        line.starts_with(label)
            && !(head.len() > label.len()
                && (is_attendance_name(head)
                    || head[label.len()..].starts_with('数')
                    || ITEM_SUFFIXES.iter().any(|s| head.ends_with(s))))
    })
}

/// Names that belong to the document structure rather than to an item.
pub fn is_structural_label(name: &str) -> bool {
    let name = name.trim().trim_end_matches(':');
    METADATA_LABELS.contains(&name) || header_label(name).is_some()
}

pub fn is_noise(line: &str) -> bool {
    noise_re().is_match(line)
}

pub fn is_attendance_name(name: &str) -> bool {
    attendance_suffix_re().is_match(name) || super::amount::QUANTITY_UNITS.contains(&name)
}

/// Strip a trailing index (`口座振込額1` -> `口座振込額`). Purely numeric
/// strings are left alone.
pub fn strip_index(name: &str) -> &str {
    let stripped = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stripped.trim().is_empty() {
        name
    } else {
        stripped.trim_end()
    }
}

fn strip_separator(rest: &str) -> &str {
    rest.trim_start().trim_start_matches(':').trim_start()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_begin_with_and_without_colon() {
        let (section, closing, rest) = section_begin("支給項目").unwrap();
        assert_eq!(section, Section::Payment);
        assert_eq!(closing, Some("支給合計"));
        assert_eq!(rest, "");

        let (section, _, rest) = section_begin("控除項目: 健康保険 12000").unwrap();
        assert_eq!(section, Section::Deduction);
        assert_eq!(rest, "健康保険 12000");

        assert!(section_begin("基本給 1000").is_none());
    }

    #[test]
    fn test_header_label_with_index() {
        assert_eq!(header_label("支給"), Some(Some(Section::Payment)));
        assert_eq!(header_label("控除2"), Some(Some(Section::Deduction)));
        assert_eq!(header_label("金額"), Some(None));
        assert_eq!(header_label("基本給"), None);
        assert_eq!(header_label("控除 12000"), None);
    }

    #[test]
    fn test_metadata_boundary() {
        assert!(is_metadata_line("社員番号 12345"));
        assert!(is_metadata_line("氏名"));
        assert!(is_metadata_line("支給日 2024/04/25"));
        assert!(!is_metadata_line("支給日数 20日"));
        assert!(!is_metadata_line("支給日数20日"));
        assert!(!is_metadata_line("基本給 1000"));
    }

    #[test]
    fn test_metadata_glued_to_value() {
        assert!(is_metadata_line("氏名山田太郎"));
        assert!(is_metadata_line("所属営業部"));
        assert!(is_metadata_line("社員番号:00123"));
        assert!(!is_metadata_line("役職手当 30000"));
        assert!(!is_metadata_line("役職手当30,000"));
        assert!(!is_metadata_line("銀行振込額 250000"));
    }

    #[test]
    fn test_strip_index() {
        assert_eq!(strip_index("口座振込額1"), "口座振込額");
        assert_eq!(strip_index("手当"), "手当");
        assert_eq!(strip_index("123"), "123");
    }

    #[test]
    fn test_line_patterns() {
        let caps = name_amount_re().captures("基本給 100000").unwrap();
        assert_eq!(&caps["name"], "基本給");
        assert_eq!(&caps["amount"], "100000");

        let caps = name_amount_re().captures("健康保険: (1,200)").unwrap();
        assert_eq!(&caps["name"], "健康保険");
        assert_eq!(&caps["amount"], "(1,200)");

        let caps = quantity_line_re().captures("出勤日数 21日").unwrap();
        assert_eq!(&caps["name"], "出勤日数");
        assert_eq!(&caps["qty"], "21日");

        let caps = amount_first_re().captures("-12345 雇用保険料").unwrap();
        assert_eq!(&caps["amount"], "-12345");
        assert_eq!(&caps["name"], "雇用保険料");

        let caps = glued_re().captures("基本給100,000").unwrap();
        assert_eq!(&caps["name"], "基本給");
        assert_eq!(&caps["digits"], "100,000");
    }

    #[test]
    fn test_attendance_names() {
        assert!(is_attendance_name("所定労働日数"));
        assert!(is_attendance_name("残業時間"));
        assert!(is_attendance_name("日"));
        assert!(!is_attendance_name("残業手当"));
    }
}
