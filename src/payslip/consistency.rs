// src/payslip/consistency.rs

use super::totals::Totals;
use tracing::warn;

/// Rounding slack tolerated between gross − deduction and net.
const TOLERANCE: i64 = 1;

/// Check gross − deduction against net. Returns a warning when they
/// disagree; incomplete totals are not checked.
pub fn check(totals: &Totals) -> Option<String> {
    let (Some(gross), Some(deduction), Some(net)) = (totals.gross, totals.deduction, totals.net)
    else {
        return None;
    };

    let Some((expected, difference)) = gross
        .checked_sub(deduction)
        .and_then(|expected| Some((expected, net.checked_sub(expected)?)))
    else {
        warn!(gross, deduction, net, "Totals out of range");
        return Some(format!(
            "gross {gross}, deduction {deduction} and net {net} are out of range"
        ));
    };
    if difference.unsigned_abs() <= TOLERANCE as u64 {
        return None;
    }

    warn!(gross, deduction, net, expected, "Totals are inconsistent");
    Some(format!(
        "gross {gross} - deduction {deduction} = {expected}, but net is {net} (difference {difference})"
    ))
}
