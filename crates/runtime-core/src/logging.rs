//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str =
    "trainer=info,metrics=info,checkpoint=info,policy=info,runtime_core=info";

/// Install a global fmt subscriber. `RUST_LOG` overrides `default_directive`.
///
/// Returns false if a subscriber was already installed, which makes it safe
/// to call from every test.
pub fn init(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
