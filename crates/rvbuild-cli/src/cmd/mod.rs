//! Command implementations

pub mod fetch;
pub mod latest;
pub mod resolve;

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{ContentArrangement, Table};
use rvbuild_core::Attempt;

pub(crate) fn table<const N: usize>(header: [&str; N]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Backends that failed before a result was found, one row each.
pub(crate) fn attempts_table(attempts: &[Attempt]) -> Table {
    let mut out = table(["backend", "outcome"]);
    for attempt in attempts {
        out.add_row(vec![attempt.backend.clone(), attempt.failure.to_string()]);
    }
    out
}
