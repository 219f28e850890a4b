//! Running statistics the graph derives its thresholds from.
//!
//! Everything adaptive in the engine (hierarchy formation, category fan-out,
//! eviction, decode window) reads from a [`GraphStats`] owned by the graph and
//! passed by reference. There are no process-wide statistics.

/// Welford online mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStat {
    pub fn from_parts(count: u64, mean: f64, m2: f64) -> Self {
        Self { count, mean, m2 }
    }

    pub fn parts(&self) -> (u64, f64, f64) {
        (self.count, self.mean, self.m2)
    }

    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0 with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// `mean + k·σ`, or `fallback` before any sample arrives.
    pub fn upper(&self, k: f64, fallback: f64) -> f64 {
        if self.count == 0 {
            fallback
        } else {
            self.mean + k * self.std_dev()
        }
    }
}

/// Mean and population variance of a slice, for local (per-node) distributions.
pub fn mean_variance(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var)
}

/// Graph-wide learning statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphStats {
    /// Sequential out-degree of a source node, sampled whenever it gains an edge.
    pub out_degree: RunningStat,
    /// Units per learned chunk.
    pub chunk_length: RunningStat,
    /// Bytes emitted per decode.
    pub output_length: RunningStat,
    /// Bloat scores of nodes examined by the eviction sweep.
    pub bloat: RunningStat,
    /// Largest edge weight ever reached, in weight units.
    pub max_edge_weight: f32,
}

/// Smallest recent-node window decode will use, whatever the statistics say.
pub const MIN_CYCLE_WINDOW: usize = 8;

impl GraphStats {
    pub fn observe_weight(&mut self, weight: f32) {
        if weight > self.max_edge_weight {
            self.max_edge_weight = weight;
        }
    }

    /// Out-degree above which a node's successors are folded into a category.
    pub fn category_fanout(&self) -> usize {
        let bound = self.out_degree.upper(2.0, f64::INFINITY);
        if bound.is_finite() {
            (bound.ceil() as usize).max(4)
        } else {
            usize::MAX
        }
    }

    /// Longest chain the hierarchy compressor will walk.
    pub fn chain_bound(&self) -> usize {
        let bound = self.chunk_length.upper(1.0, 8.0).ceil() as usize;
        bound.max(2)
    }

    /// Size of the recent-node window decode watches for cycles.
    pub fn cycle_window(&self, min_window: usize) -> usize {
        let bound = self.output_length.upper(2.0, 0.0).ceil() as usize;
        bound.max(min_window).max(MIN_CYCLE_WINDOW)
    }

    /// Bloat score above which a node may be evicted.
    pub fn bloat_threshold(&self) -> f32 {
        // Too few samples to call anything an outlier.
        if self.bloat.count() < 16 {
            return f32::INFINITY;
        }
        self.bloat.upper(2.0, f64::INFINITY) as f32
    }
}
