//! CLI exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0    | Success                                             |
//! | 1    | Model error (alignment, shape, empty data, ...)     |
//! | 2    | Usage or configuration error                        |
//! | 3    | I/O or data file error                              |

use forecast_consensus::config::ConfigError;
use forecast_consensus::ModelError;

/// Success - every requested city was processed.
pub const EXIT_SUCCESS: u8 = 0;

/// The core rejected the data (see `ModelError`).
pub const EXIT_MODEL: u8 = 1;

/// Bad arguments, unreadable or invalid config.
pub const EXIT_USAGE: u8 = 2;

/// Reading sources or writing collections failed.
pub const EXIT_IO: u8 = 3;

/// Classify an error by the first typed cause in its chain.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.is::<ModelError>() {
            return EXIT_MODEL;
        }
        if cause.is::<ConfigError>() {
            return EXIT_USAGE;
        }
    }
    EXIT_IO
}
