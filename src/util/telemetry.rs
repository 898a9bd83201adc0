use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Registry wiring for the service's tracing output.
///
/// The subscriber is installed once; repeated registration (tests) is a no-op.
pub struct Telemetry;

impl Telemetry {
    pub fn register() -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("prop_board=debug,tower_http=debug,axum=debug,info")
        });

        _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init();

        Self
    }
}
