pub mod forecasting;
pub mod insights;
pub mod metrics;
