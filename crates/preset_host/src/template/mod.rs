//! Template expansion: mirror `templates/` into `presets/` with placeholder substitution

mod expander;
mod rewriter;

pub use expander::{ExpansionOptions, ExpansionReport, TemplateError, TemplateExpander};
pub use rewriter::{
    contains_placeholder, FileReport, PlaceholderRewriter, RewrittenLine, UnresolvedPlaceholder,
    LINE_ENDING,
};
