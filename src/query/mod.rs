//! Capability-aware SQL construction.
//!
//! [`Options::configure`] turns detected server capabilities into a
//! configuration bag; [`format`] renders the templates in [`templates`]
//! with it.

mod options;
mod template;
pub mod templates;

pub use options::{
    DEFAULT_AGE_THRESHOLD, DEFAULT_QUERY_LEN, DisplayMode, MODERN_WAL_VERSION, Options,
    is_valid_age_threshold, parse_recovery,
};
pub use template::{TemplateContext, TemplateError, Value, format};
