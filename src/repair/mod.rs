//! C6 — the post-generation repair loop: for every invalid equation span or
//! visual block a section contains, ask the model for a fix, revalidate,
//! and fall back to a safe edit if repair never produces a valid candidate.
//!
//! Equation and visual-block repair are independent passes with distinct
//! (deliberately asymmetric) crash fallbacks — see `equation_repair` and
//! `visual_repair`. Tier-2 validation (rendering a block for real in a
//! browser) is not implemented here; every validation call below is
//! Tier-1-only, structural and synchronous under the hood.

pub mod equation_repair;
pub mod visual_repair;

pub use equation_repair::{repair_section_equations, resolve_equation_repair_task};
pub use visual_repair::{drop_invalid_visualizations, repair_section_visualizations, resolve_repair_task};

pub use crate::config::RepairConfig;

pub(crate) fn repair_visual_block_prompt(block_type: &str, block_content: &str, invalid_reason: &str) -> String {
    format!(
        "The following {block_type} block failed validation: {invalid_reason}\n\n\
         Return a corrected {block_type} body only, with no surrounding markdown fence.\n\n{block_content}"
    )
}

pub(crate) fn repair_equation_prompt(delimiter_style: &str, expression: &str, invalid_reason: &str) -> String {
    format!(
        "The following LaTeX equation (delimiter style: {delimiter_style}) failed validation: {invalid_reason}\n\n\
         Return the corrected expression only, with no surrounding delimiters.\n\n{expression}"
    )
}
