// src/payslip/lines.rs
//
// Single-pass, line-oriented scanner. Each physical line is classified by a
// fixed precedence of rules; names and amounts that arrive on different
// lines are joined through a FIFO queue of pending names.

use super::amount::{self, Resolved};
use super::labels::{self, glued_re, name_amount_re, amount_first_re, quantity_line_re};
use super::totals::{self, Totals};
use super::{Category, LineItem, ParserConfig, Section};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

/// Cross-line context. Lives for one scan only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserState {
    pub current_section: Option<Section>,
    pub pending_section: Option<Section>,
    pub pending_names: VecDeque<String>,
    pub until_marker: Option<&'static str>,
}

impl ParserState {
    /// A header hint seen after the section opened takes precedence.
    pub fn effective_section(&self) -> Option<Section> {
        self.pending_section.or(self.current_section)
    }
}

/// Everything collected by a scan, before categorization.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub items: Vec<LineItem>,
    pub attendance: BTreeMap<String, i64>,
    pub totals: Totals,
    pub orphans: usize,
}

/// One step of a multi-pair plan. Plans are applied only when they
/// resolve at least one pair.
enum Action<'t> {
    Section(Section),
    Pair(&'t str, Resolved),
    Queue(&'t str),
    Bare(Resolved),
}

pub struct Scanner<'c> {
    config: &'c ParserConfig,
    state: ParserState,
    scan: Scan,
}

/// Scan normalized text line by line, threading the state through a fold.
pub fn scan(text: &str, config: &ParserConfig) -> Scan {
    text.lines()
        .fold(Scanner::new(config), |mut scanner, line| {
            scanner.step(line);
            scanner
        })
        .finish()
}

impl<'c> Scanner<'c> {
    pub fn new(config: &'c ParserConfig) -> Self {
        Self {
            config,
            state: ParserState::default(),
            scan: Scan::default(),
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn finish(self) -> Scan {
        if !self.state.pending_names.is_empty() {
            debug!(
                names = ?self.state.pending_names,
                "Names left without an amount"
            );
        }
        debug!(
            items = self.scan.items.len(),
            attendance = self.scan.attendance.len(),
            orphans = self.scan.orphans,
            "Scan complete"
        );
        self.scan
    }

    /// Process one physical line.
    pub fn step(&mut self, line: &str) {
        let mut line = line.trim();
        loop {
            if line.is_empty() {
                return;
            }
            if let Some((section, closing, rest)) = labels::section_begin(line) {
                trace!(?section, "Section opened");
                self.state.current_section = Some(section);
                self.state.pending_section = None;
                self.state.until_marker = closing;
                line = rest;
                continue;
            }
            if let Some(marker) = self.state.until_marker {
                if let Some(rest) = line.strip_prefix(marker) {
                    trace!(marker, "Section closed");
                    self.state.current_section = None;
                    self.state.pending_section = None;
                    self.state.until_marker = None;
                    self.state.pending_names.clear();
                    let rest = rest.trim_start().trim_start_matches(':').trim_start();
                    // The closing label is itself a total.
                    if let Ok(value) = amount::resolve_amount(rest) {
                        self.assign_total(marker, value);
                        return;
                    }
                    line = rest;
                    continue;
                }
            }
            break;
        }
        self.classify(line);
    }

    fn classify(&mut self, line: &str) {
        if labels::is_noise(line) {
            trace!(line, "Noise line skipped");
            return;
        }

        if let Some(hint) = labels::header_label(line) {
            if let Some(section) = hint {
                self.state.pending_section = Some(section);
            }
            self.state.pending_names.clear();
            return;
        }

        if labels::is_metadata_line(line) {
            self.state.pending_names.clear();
            return;
        }

        if self.quantity(line) {
            self.state.pending_names.clear();
            return;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
        if tokens.len() >= 3 && digits >= 2 && self.multi_pair(&tokens) {
            return;
        }

        if self.name_amount(line) {
            return;
        }

        if let Ok(resolved) = amount::resolve(line) {
            self.bare_amount(resolved);
            return;
        }

        if let Some(caps) = amount_first_re().captures(line) {
            let name = labels::strip_index(caps.name("name").map_or("", |m| m.as_str()));
            if is_plain_name(name) {
                if let Ok(resolved) = amount::resolve(&caps["amount"]) {
                    match self.state.pending_names.pop_front() {
                        Some(queued) => {
                            self.route(&queued, resolved);
                            self.enqueue(name);
                        }
                        None => self.route(name, resolved),
                    }
                    return;
                }
            }
        }

        // A digit-free line is one name, spaces included (`通勤 手当`).
        let name = labels::strip_index(line);
        if is_plain_name(name) {
            self.enqueue(name);
            return;
        }

        if self.fallback(&tokens) {
            return;
        }

        trace!(line, "Unmatched line, pending names reset");
        self.state.pending_names.clear();
    }

    /// `出勤日数 21日` style lines.
    fn quantity(&mut self, text: &str) -> bool {
        let Some(caps) = quantity_line_re().captures(text) else {
            return false;
        };
        let Ok(resolved) = amount::resolve(&caps["qty"]) else {
            return false;
        };
        let name = labels::strip_index(caps["name"].trim());
        self.record_attendance(name, resolved.value);
        true
    }

    /// `name amount` / `name: amount`.
    fn name_amount(&mut self, text: &str) -> bool {
        let Some(caps) = name_amount_re().captures(text) else {
            return false;
        };
        let name = caps.name("name").map_or("", |m| m.as_str());
        if !has_name_chars(name) {
            return false;
        }
        match amount::resolve(&caps["amount"]) {
            Ok(resolved) => {
                self.route(name, resolved);
                true
            }
            Err(e) => {
                trace!(error = %e, "Amount skipped");
                false
            }
        }
    }

    /// Walk tokens pairwise: a name followed by a clean amount forms a pair.
    fn multi_pair(&mut self, tokens: &[&str]) -> bool {
        let mut plan = Vec::new();
        let mut pairs = 0;
        let mut i = 0;

        while i < tokens.len() {
            let token = tokens[i];
            if let Some(hint) = labels::header_label(token) {
                if let Some(section) = hint {
                    plan.push(Action::Section(section));
                }
                i += 1;
                continue;
            }
            if has_name_chars(token) {
                if let Some(next) = tokens.get(i + 1) {
                    if let Ok(resolved) = amount::resolve(next) {
                        plan.push(Action::Pair(token, resolved));
                        pairs += 1;
                        i += 2;
                        continue;
                    }
                }
                match split_glued(token) {
                    Some(Glued::Pair(name, resolved)) => {
                        plan.push(Action::Pair(name, resolved));
                        pairs += 1;
                    }
                    Some(Glued::Name(name)) => plan.push(Action::Queue(name)),
                    None => plan.push(Action::Queue(token)),
                }
            } else if let Ok(resolved) = amount::resolve(token) {
                plan.push(Action::Bare(resolved));
            }
            i += 1;
        }

        if pairs == 0 {
            return false;
        }
        for action in plan {
            match action {
                Action::Section(section) => self.state.pending_section = Some(section),
                Action::Pair(name, resolved) => self.route(name, resolved),
                Action::Queue(name) => self.enqueue(name),
                Action::Bare(resolved) => self.bare_amount(resolved),
            }
        }
        true
    }

    /// Token-by-token retry of the quantity, name/amount, bare-amount and
    /// name rules, keeping queue order.
    fn fallback(&mut self, tokens: &[&str]) -> bool {
        let mut matched = false;
        for token in tokens {
            matched |= self.fallback_token(token);
        }
        matched
    }

    fn fallback_token(&mut self, token: &str) -> bool {
        if let Ok(resolved) = amount::resolve(token) {
            self.bare_amount(resolved);
            return true;
        }
        if self.quantity(token) || self.name_amount(token) {
            return true;
        }
        match split_glued(token) {
            Some(Glued::Pair(name, resolved)) => {
                self.route(name, resolved);
                true
            }
            Some(Glued::Name(name)) => {
                self.enqueue(name);
                true
            }
            None if is_plain_name(token) => {
                self.enqueue(token);
                true
            }
            None => false,
        }
    }

    /// An amount standing alone pairs with the oldest pending name.
    fn bare_amount(&mut self, resolved: Resolved) {
        if let Some(name) = self.state.pending_names.pop_front() {
            self.route(&name, resolved);
        } else if resolved.value.abs() >= self.config.min_amount {
            self.scan.orphans += 1;
            debug!(value = resolved.value, "Orphan amount without a name");
        } else {
            trace!(value = resolved.value, "Small bare amount dropped");
        }
    }

    fn enqueue(&mut self, name: &str) {
        let name = name.trim().trim_end_matches(':');
        if name.is_empty() || labels::is_structural_label(name) {
            return;
        }
        self.state.pending_names.push_back(name.to_string());
    }

    /// Send a resolved name/amount pair to totals, attendance or items.
    fn route(&mut self, raw_name: &str, resolved: Resolved) {
        let raw_name = raw_name.trim().trim_end_matches(':').trim_end();
        if totals::classify_label(raw_name).is_some() {
            self.assign_total(raw_name, resolved.value);
            return;
        }

        let name = labels::strip_index(raw_name);
        if name.is_empty() || labels::is_structural_label(name) {
            trace!(name, "Structural label is not an item");
            return;
        }

        let section = self.state.effective_section();
        if resolved.is_quantity()
            || section == Some(Section::Attendance)
            || labels::is_attendance_name(name)
        {
            self.record_attendance(name, resolved.value);
            return;
        }

        if resolved.value.abs() < self.config.min_amount {
            trace!(name, value = resolved.value, "Amount below threshold dropped");
            return;
        }

        self.scan.items.push(LineItem {
            name: name.to_string(),
            amount: resolved.value,
            category: section.map_or(Category::Unknown, Category::from_section),
            section,
        });
    }

    fn assign_total(&mut self, label: &str, value: i64) {
        if let Some(kind) = totals::classify_label(label) {
            self.scan.totals.assign(kind, value);
        }
    }

    fn record_attendance(&mut self, name: &str, value: i64) {
        self.scan
            .attendance
            .entry(name.to_string())
            .or_insert(value);
    }
}

enum Glued<'t> {
    Pair(&'t str, Resolved),
    Name(&'t str),
}

/// Split `基本給100000` into a pair. A single trailing digit is an index,
/// not an amount.
fn split_glued(token: &str) -> Option<Glued<'_>> {
    let caps = glued_re().captures(token)?;
    let name = caps.name("name")?.as_str();
    let digits = caps.name("digits")?.as_str();
    if digits.len() >= 2 || digits.contains(',') {
        amount::resolve(digits)
            .ok()
            .map(|resolved| Glued::Pair(name, resolved))
    } else {
        Some(Glued::Name(name))
    }
}

/// Has at least one character that cannot be part of an amount.
fn has_name_chars(text: &str) -> bool {
    text.chars().any(|c| {
        !c.is_ascii_digit()
            && !c.is_whitespace()
            && !matches!(c, ',' | '(' | ')' | '+' | '-' | '−' | '△' | '▲' | '円')
    })
}

/// Contains no digits at all.
fn is_plain_name(text: &str) -> bool {
    !text.trim().is_empty() && !text.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> Scan {
        scan(text, &ParserConfig::default())
    }

    fn pairs(scan: &Scan) -> Vec<(&str, i64)> {
        scan.items
            .iter()
            .map(|i| (i.name.as_str(), i.amount))
            .collect()
    }

    #[test]
    fn test_sections_and_multi_pair() {
        let scan = run("支給項目\n本給 269000 通勤費補助 12860\n控除項目\n東友会費 300 共済会費 200");
        assert_eq!(
            pairs(&scan),
            vec![
                ("本給", 269000),
                ("通勤費補助", 12860),
                ("東友会費", 300),
                ("共済会費", 200)
            ]
        );
        assert_eq!(scan.items[0].category, Category::Payment);
        assert_eq!(scan.items[3].category, Category::Deduction);
        assert_eq!(scan.items[3].section, Some(Section::Deduction));
    }

    #[test]
    fn test_total_lines_are_not_items() {
        let scan = run("基本給 100000\n支給合計 100000\n控除合計 0\n差引支給額 100000");
        assert_eq!(pairs(&scan), vec![("基本給", 100000)]);
        assert_eq!(scan.totals.gross, Some(100000));
        assert_eq!(scan.totals.deduction, Some(0));
        assert_eq!(scan.totals.net, Some(100000));
    }

    #[test]
    fn test_name_then_quantity_on_next_line() {
        let scan = run("所定労働日数\n21日\n基本給 100000");
        assert_eq!(scan.attendance.get("所定労働日数"), Some(&21));
        assert_eq!(pairs(&scan), vec![("基本給", 100000)]);
    }

    #[test]
    fn test_trailing_index_and_small_noise() {
        let scan = run("口座振込額1 123\n手当2\n5");
        assert_eq!(pairs(&scan), vec![("口座振込額", 123)]);
        assert_eq!(scan.totals.net, None);
        assert!(scan.attendance.is_empty());
    }

    #[test]
    fn test_amount_first() {
        let scan = run("-12345 雇用保険料");
        assert_eq!(pairs(&scan), vec![("雇用保険料", -12345)]);
    }

    #[test]
    fn test_amount_first_drains_queue() {
        let scan = run("基本給\n200000 役職手当\n30000");
        assert_eq!(pairs(&scan), vec![("基本給", 200000), ("役職手当", 30000)]);
    }

    #[test]
    fn test_spaced_name_stays_whole() {
        let scan = run("通勤 手当\n12000");
        assert_eq!(pairs(&scan), vec![("通勤 手当", 12000)]);
        assert_eq!(scan.orphans, 0);
    }

    #[test]
    fn test_unpaired_amount_in_multi_pair_line() {
        let scan = run("通勤手当\n基本給 200000 12000");
        assert_eq!(pairs(&scan), vec![("基本給", 200000), ("通勤手当", 12000)]);

        let scan = run("基本給 200000 30000");
        assert_eq!(pairs(&scan), vec![("基本給", 200000)]);
        assert_eq!(scan.orphans, 1);
    }

    #[test]
    fn test_glued_metadata_clears_queue() {
        let scan = run("基本給\n氏名山田太郎\n250000");
        assert!(scan.items.is_empty());
        assert_eq!(scan.orphans, 1);

        let scan = run("役職手当 30000");
        assert_eq!(pairs(&scan), vec![("役職手当", 30000)]);
    }

    #[test]
    fn test_glued_tokens() {
        let scan = run("基本給200,000");
        assert_eq!(pairs(&scan), vec![("基本給", 200000)]);
    }

    #[test]
    fn test_closing_marker_assigns_total() {
        let scan = run("支給項目\n基本給 250000\n支給合計 250000\n健康保険 12000");
        assert_eq!(scan.totals.gross, Some(250000));
        assert_eq!(scan.items[0].section, Some(Section::Payment));
        assert_eq!(scan.items[1].section, None);
        assert_eq!(scan.items[1].category, Category::Unknown);
    }

    #[test]
    fn test_quantity_pairs_in_one_line() {
        let scan = run("出勤 20日 欠勤 0日 有休 1日");
        assert_eq!(scan.attendance.get("出勤"), Some(&20));
        assert_eq!(scan.attendance.get("欠勤"), Some(&0));
        assert_eq!(scan.attendance.get("有休"), Some(&1));
        assert!(scan.items.is_empty());
    }

    #[test]
    fn test_attendance_section_keeps_small_values() {
        let scan = run("勤怠項目\n出勤日数 20\n遅刻回数 2");
        assert_eq!(scan.attendance.get("出勤日数"), Some(&20));
        assert_eq!(scan.attendance.get("遅刻回数"), Some(&2));
        assert!(scan.items.is_empty());
    }

    #[test]
    fn test_metadata_and_noise_skipped() {
        let scan = run("社員番号 12345\n氏名 山田太郎\n課税対象額 250000\n健保累計 80000\n基本給 250000");
        assert_eq!(pairs(&scan), vec![("基本給", 250000)]);
    }

    #[test]
    fn test_header_hint_sets_section() {
        let scan = run("控除\n互助会 1500");
        assert_eq!(scan.items[0].section, Some(Section::Deduction));
        assert_eq!(scan.items[0].category, Category::Deduction);
    }

    #[test]
    fn test_header_clears_pending_names() {
        let config = ParserConfig::default();
        let mut scanner = Scanner::new(&config);
        scanner.step("基本給");
        assert_eq!(scanner.state().pending_names.len(), 1);
        scanner.step("金額");
        assert!(scanner.state().pending_names.is_empty());
    }

    #[test]
    fn test_orphan_amount() {
        let scan = run("123456");
        assert!(scan.items.is_empty());
        assert_eq!(scan.orphans, 1);
    }

    #[test]
    fn test_configurable_threshold() {
        let config = ParserConfig {
            min_amount: 1000,
            ..ParserConfig::default()
        };
        let scan = scan("基本給 200000\n互助会 500", &config);
        assert_eq!(pairs(&scan), vec![("基本給", 200000)]);
    }

    #[test]
    fn test_overflow_token_is_skipped() {
        let scan = run("基本給 12345678901\n役職手当 5000");
        assert_eq!(pairs(&scan), vec![("役職手当", 5000)]);
    }

    #[test]
    fn test_empty_input() {
        let scan = run("");
        assert!(scan.items.is_empty());
        assert!(scan.attendance.is_empty());
        assert_eq!(scan.totals, Totals::default());
    }
}
