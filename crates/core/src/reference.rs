use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Quotation reference numbers are month-partitioned:
/// `QT-{YY}{MM}-{NNNN}`, where NNNN is a 1-based, zero-padded sequence over
/// quotations created in that calendar month. The sequence is always
/// derived from surviving records, so gaps left by deletions persist.
pub fn format_reference(at: DateTime<Utc>, sequence: u32) -> String {
    format!("QT-{:02}{:02}-{:04}", at.year() % 100, at.month(), sequence)
}

/// The `QT-YYMM-` prefix shared by every reference in a month bucket; used
/// by the repository to find the highest surviving sequence.
pub fn month_prefix(at: DateTime<Utc>) -> String {
    format!("QT-{:02}{:02}-", at.year() % 100, at.month())
}

/// Half-open UTC window `[first-of-month, first-of-next-month)` used to
/// count the month bucket a new reference belongs to.
pub fn month_window(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = month_start(at.year(), at.month());
    let end = if at.month() == 12 {
        month_start(at.year() + 1, 1)
    } else {
        month_start(at.year(), at.month() + 1)
    };
    (start, end)
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // Day 1 of a known-good month never fails to construct.
    match Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0) {
        chrono::LocalResult::Single(start) => start,
        _ => unreachable!("first of month is a unique UTC timestamp"),
    }
}
