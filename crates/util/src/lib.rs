//! Small helpers shared by the registry, engine and server crates.

pub mod date_handling;
pub mod path_processing;
pub mod template_vars;

pub use date_handling::{format_history_datetime, history_delta_label, humanize, pprint_timestamp, pprint_timestamp_at};
pub use path_processing::{expand_tilde, resolve_against};
pub use template_vars::{extract_expression_variables, extract_template_variables};
