//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// Step decision prompt (generate vs. refine)
pub const CHOOSE_STEP: &str = include_str!("../../prompts/choose-step.pmt");

/// Page generation prompt
pub const GENERATE_PAGE: &str = include_str!("../../prompts/generate-page.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "choose-step" => Some(CHOOSE_STEP),
        "generate-page" => Some(GENERATE_PAGE),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
