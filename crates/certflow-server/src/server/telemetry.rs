//! Log output for the server.
//!
//! Events from the server and the `certflow` library go to stdout, filtered by
//! `RUST_LOG` (default `info`). Classified failures of high or critical
//! severity are additionally logged on the `certflow::alert` target, so an
//! alerting pipeline can select them with e.g.
//!
//! ```bash
//! RUST_LOG=warn,certflow::alert=error certflow-server --log-format json
//! ```

use crate::server::config::LogFormat;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let pretty = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });

    // Structured output keeps the target so alert lines stay selectable.
    let json = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(true)
            .with_timer(ChronoLocal::rfc_3339())
            .with_file(true)
            .json()
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json)
        .try_init()?;

    Ok(())
}
