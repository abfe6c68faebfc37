use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_ingested_total",
        "Total readings persisted through the single and bulk endpoints"
    ))
    .unwrap();
    pub static ref REJECTED_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_rejected_requests_total",
        "Total requests rejected by validation"
    ))
    .unwrap();
    pub static ref AUTH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_auth_failures_total",
        "Total requests rejected for a missing or wrong API key"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total database insert failures"
    ))
    .unwrap();
    pub static ref READINGS_PURGED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_readings_purged_total",
        "Total readings removed by range deletes"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time taken to persist a single reading or a batch"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref BULK_BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_bulk_batch_size",
            "Number of readings per bulk request"
        )
        .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_INGESTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AUTH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_PURGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(BULK_BATCH_SIZE.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
