//! Random sentinels that delimit handshakes and command completions.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of every marker written to a remote shell.
pub const MARKER_LENGTH: usize = 20;

/// Returns `length` random ASCII alphanumeric characters.
#[must_use]
pub fn generate_marker(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
