//! ## netran-telemetry::metrics
//! **Prometheus exporter for pipeline throughput and backpressure**

use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub batches_queued: Counter,
    pub batches_discarded: Counter,
    pub batches_accounted: Counter,
    pub queue_saturation: Counter,
    pub worker_failures: Counter,
    pub queue_depth: Gauge,
    pub batch_blocks: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let batches_queued = Counter::new(
            "netran_batches_queued_total",
            "Capture batches handed to accounting",
        )?;
        let batches_discarded = Counter::new(
            "netran_batches_discarded_total",
            "Capture batches dropped while accounting was inactive",
        )?;
        let batches_accounted = Counter::new(
            "netran_batches_accounted_total",
            "Capture batches consumed by accounting",
        )?;
        let queue_saturation = Counter::new(
            "netran_queue_saturation_total",
            "Bounded waits spent on a full batch queue",
        )?;
        let worker_failures = Counter::new(
            "netran_worker_failures_total",
            "Worker loops terminated by a primitive failure",
        )?;
        let queue_depth = Gauge::new("netran_queue_depth", "Batches waiting in the queue")?;
        let batch_blocks = Histogram::with_opts(
            HistogramOpts::new("netran_batch_blocks", "Blocks per accounted batch")
                .buckets(vec![1.0, 16.0, 128.0, 512.0, 1024.0, 4096.0]),
        )?;

        registry.register(Box::new(batches_queued.clone()))?;
        registry.register(Box::new(batches_discarded.clone()))?;
        registry.register(Box::new(batches_accounted.clone()))?;
        registry.register(Box::new(queue_saturation.clone()))?;
        registry.register(Box::new(worker_failures.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(batch_blocks.clone()))?;

        Ok(Self {
            registry,
            batches_queued,
            batches_discarded,
            batches_accounted,
            queue_saturation,
            worker_failures,
            queue_depth,
            batch_blocks,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_queued(&self, depth: usize) {
        self.batches_queued.inc();
        self.queue_depth.set(depth as f64);
    }

    pub fn record_discarded(&self) {
        self.batches_discarded.inc();
    }

    pub fn record_accounted(&self, blocks: u32, depth: usize) {
        self.batches_accounted.inc();
        self.batch_blocks.observe(f64::from(blocks));
        self.queue_depth.set(depth as f64);
    }

    pub fn record_saturation(&self) {
        self.queue_saturation.inc();
    }

    pub fn record_worker_failure(&self) {
        self.worker_failures.inc();
    }
}
