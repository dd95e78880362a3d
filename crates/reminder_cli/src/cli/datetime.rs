use reminder_core::error::AppError;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const MS_PER_MINUTE: i64 = 60_000;

/// Parses an RFC3339 timestamp into epoch milliseconds.
pub fn parse_datetime(raw: &str) -> Result<i64, AppError> {
    let trimmed = raw.trim();
    let parsed = OffsetDateTime::parse(trimmed, &Rfc3339).map_err(|_| {
        AppError::invalid_input(format!(
            "invalid datetime '{trimmed}', expected RFC3339 like 2026-01-05T09:00:00Z"
        ))
    })?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000)
        .map_err(|_| AppError::invalid_input("datetime out of range"))
}

pub fn minutes_from(now: i64, minutes: i64) -> Result<i64, AppError> {
    if minutes <= 0 {
        return Err(AppError::invalid_input("--in-minutes must be positive"));
    }
    minutes
        .checked_mul(MS_PER_MINUTE)
        .and_then(|delta| now.checked_add(delta))
        .ok_or_else(|| AppError::invalid_input("--in-minutes is too large"))
}

/// UTC RFC3339 rendering; falls back to the raw number when out of range.
pub fn format_timestamp(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|value| value.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
