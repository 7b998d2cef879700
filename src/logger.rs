//! Log output for the demo binaries.

use tracing::Level;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Installs a stderr formatter that shows thread names.
///
/// Fails if a global subscriber is already installed.
pub fn init(level: Level) -> Result<(), TryInitError> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .finish()
        .try_init()
}
