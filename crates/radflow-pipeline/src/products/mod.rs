//! Built-in product renderers.

pub mod log_fields;
pub mod save_json;

pub use log_fields::LogFieldsProduct;
pub use save_json::SaveJsonProduct;

use crate::config::VOL_FORMAT;
use crate::stages::time_avg::TIMESERIES_FORMAT;

/// Formats every built-in product accepts.
pub(crate) const ANY_FORMAT: &[&str] = &[VOL_FORMAT, TIMESERIES_FORMAT];
