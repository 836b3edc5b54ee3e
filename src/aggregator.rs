use std::sync::Mutex;

// ============================================================================
// Running Average Aggregator
// ============================================================================
//
// Thread-safe running statistic over successfully processed order amounts.
// All monetary math happens in integer minor units (cents); floating point
// appears only at the input/output boundary, rounded half-up.
//
// The (total, count) pair lives behind a single mutex so the two fields are
// always observed together. Two independent atomics would allow a reader to
// pair an incremented count with a stale total.
//
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct Snapshot {
    total_minor_units: i64,
    order_count: u64,
}

impl Snapshot {
    fn average(&self) -> f64 {
        if self.order_count == 0 {
            0.0
        } else {
            self.total_minor_units as f64 / (self.order_count * 100) as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct RunningAverage {
    inner: Mutex<Snapshot>,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed order amount and return the new running average.
    ///
    /// The amount is converted to minor units with round-half-up, then both
    /// fields are updated under one lock so the pair commits as a single
    /// logical step.
    pub fn record(&self, amount: f64) -> f64 {
        let minor_units = to_minor_units(amount);

        let mut inner = self.inner.lock().unwrap();
        inner.total_minor_units += minor_units;
        inner.order_count += 1;
        let average = inner.average();

        tracing::debug!(
            amount = amount,
            running_average = average,
            order_count = inner.order_count,
            "Recorded order amount"
        );

        average
    }

    /// Current average, or 0.0 before the first record.
    pub fn current_average(&self) -> f64 {
        self.inner.lock().unwrap().average()
    }

    pub fn order_count(&self) -> u64 {
        self.inner.lock().unwrap().order_count
    }

    /// Total amount in currency units.
    pub fn total_amount(&self) -> f64 {
        self.inner.lock().unwrap().total_minor_units as f64 / 100.0
    }

    /// Administrative reset. Serialized against `record` by the same lock.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Snapshot::default();
        tracing::info!("Running average aggregator has been reset");
    }

    /// One-line operator summary.
    pub fn summary(&self) -> String {
        let inner = self.inner.lock().unwrap();
        format!(
            "Orders Processed: {} | Total Amount: ${:.2} | Running Average: ${:.2}",
            inner.order_count,
            inner.total_minor_units as f64 / 100.0,
            inner.average(),
        )
    }
}

/// Round-half-up conversion to integer minor units. Amounts are non-negative,
/// so `f64::round` (half away from zero) is half-up here.
fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

// ============================================================================
// Unit Tests
// ============================================================================
