pub mod drugs;
pub mod forecasts;
pub mod insights;
pub mod sales;

/// Longest trailing window any analytics endpoint accepts, in days.
pub const MAX_WINDOW_DAYS: u32 = 365;

/// Validate a `days` window parameter against `1..=MAX_WINDOW_DAYS`.
pub(crate) fn validate_window(days: u32) -> Result<u32, crate::errors::ServiceError> {
    if (1..=MAX_WINDOW_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(crate::errors::ServiceError::ValidationError(format!(
            "days must be between 1 and {}",
            MAX_WINDOW_DAYS
        )))
    }
}
