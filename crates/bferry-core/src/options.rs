//! Per-item option preparation

use bferry_types::UploadOptions;

/// Copy of `options` with the create-only precondition applied when `skip`
/// is set. Other precondition fields are kept as given.
pub fn merge_skip_if_exists(options: &UploadOptions, skip: bool) -> UploadOptions {
    let mut merged = options.clone();
    if skip {
        merged
            .preconditions
            .get_or_insert_with(Default::default)
            .if_generation_match = Some(0);
    }
    merged
}
