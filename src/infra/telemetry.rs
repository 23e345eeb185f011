use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "usericon_index_hit_total",
            Unit::Count,
            "Single fetches answered from the hash index."
        );
        describe_counter!(
            "usericon_index_miss_total",
            Unit::Count,
            "Single fetches with no hash index entry."
        );
        describe_counter!(
            "usericon_blob_hit_total",
            Unit::Count,
            "Icons served from the on-disk blob cache."
        );
        describe_counter!(
            "usericon_store_read_total",
            Unit::Count,
            "Icon reads that reached the durable store, batched reads counted once."
        );
        describe_counter!(
            "usericon_fallback_total",
            Unit::Count,
            "Icons resolved to the fallback image."
        );
        describe_counter!(
            "usericon_not_modified_total",
            Unit::Count,
            "Conditional icon requests answered with 304."
        );
        describe_counter!(
            "usericon_blob_write_failed_total",
            Unit::Count,
            "Blob cache writes that failed and were skipped."
        );
        describe_counter!(
            "usericon_blob_stale_total",
            Unit::Count,
            "Blobs whose digest disagreed with the hash index and were evicted."
        );
        describe_histogram!(
            "usericon_bulk_fill_batch_size",
            Unit::Count,
            "Number of user ids sent to the durable store per bulk fill."
        );
    });
}
