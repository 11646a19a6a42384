// src/payslip/normalize.rs

/// Canonicalize full-width digits, signs and punctuation to their ASCII
/// counterparts and drop yen glyphs. Applying it twice is a no-op.
pub fn normalize(text: &str) -> String {
    text.chars().filter_map(normalize_char).collect()
}

fn normalize_char(c: char) -> Option<char> {
    match c {
        '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
        '－' | '‐' | '‑' | '‒' => Some('-'),
        '＋' => Some('+'),
        '（' => Some('('),
        '）' => Some(')'),
        '，' => Some(','),
        '．' => Some('.'),
        '：' => Some(':'),
        '　' => Some(' '),
        '¥' | '￥' => None,
        _ => Some(c),
    }
}
