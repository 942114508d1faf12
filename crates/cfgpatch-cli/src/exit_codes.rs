//! Process exit codes

/// Success - the update can be applied (or nothing was checked)
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// The update cannot be applied as requested
pub const PATCH_NOT_ALLOWED: i32 = 2;

/// Input error - unreadable file, invalid schema, configuration not matching the schema
pub const INPUT_ERROR: i32 = 3;
