//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Codes
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success; for `run`, every item is matched or ignored |
//! | 1    | General error (unspecified)                          |
//! | 2    | CLI usage error (bad args)                           |
//! | 3    | Invalid config (TOML or column mapping)              |
//! | 4    | Runtime error (unreadable file, broken CSV)          |
//! | 5    | Run finished with unmatched items left               |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
/// clap exits with this code on its own parse failures.
pub const EXIT_USAGE: u8 = 2;

/// Config could not be parsed or failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Extract or output file could not be read/written, or the CSV is broken.
pub const EXIT_RUNTIME: u8 = 4;

/// Reconciliation ran but unmatched bank or books lines remain.
/// Like `diff(1)`, this is a result, not a failure of the tool.
pub const EXIT_UNMATCHED: u8 = 5;

/// Short name for an exit code, for `--help` output and logs.
pub fn exit_code_name(code: u8) -> &'static str {
    match code {
        EXIT_SUCCESS => "success",
        EXIT_ERROR => "error",
        EXIT_USAGE => "usage",
        EXIT_INVALID_CONFIG => "invalid_config",
        EXIT_RUNTIME => "runtime",
        EXIT_UNMATCHED => "unmatched",
        _ => "unknown",
    }
}
