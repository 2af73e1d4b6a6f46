use crate::error::BuildError;
use crate::hash::HashPair;
use crate::sketch_row::{CounterWidth, SketchRow};

/// Count-Min sketch: `depth` independently-hashed rows driven in lock-step.
///
/// Inserts and query requests broadcast the same key to every row; the
/// reported estimate is the minimum across rows, so a count is never
/// underestimated. All rows share one control schedule and therefore one
/// response latency.
pub struct CMSketch {
    rows: Vec<SketchRow>,
}

impl CMSketch {
    /// `hash_params` must hold exactly `depth` pairs when given; rows default
    /// to `(row + 1, 0)` otherwise.
    pub fn new(
        depth: usize,
        width: usize,
        counter_width: CounterWidth,
        hash_params: Option<&[HashPair]>,
    ) -> Result<Self, BuildError> {
        if depth < 1 {
            return Err(BuildError::ZeroDepth);
        }
        if let Some(params) = hash_params {
            if params.len() != depth {
                return Err(BuildError::HashParamCount {
                    expected: depth,
                    got: params.len(),
                });
            }
        }
        let rows = (0..depth)
            .map(|i| {
                let pair = hash_params.map_or_else(|| HashPair::for_row(i), |p| p[i]);
                SketchRow::new(width, counter_width, pair)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    pub fn depth(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows[0].width()
    }

    pub fn ready(&self) -> bool {
        self.rows.iter().all(SketchRow::ready)
    }

    pub fn clear_ready(&self) -> bool {
        self.rows.iter().all(SketchRow::clear_ready)
    }

    pub fn is_clearing(&self) -> bool {
        self.rows.iter().any(SketchRow::is_clearing)
    }

    pub fn insert(&mut self, key: u64) -> bool {
        if !self.ready() {
            return false;
        }
        for row in &mut self.rows {
            row.insert(key);
        }
        true
    }

    pub fn query_req(&mut self, key: u64) -> bool {
        if !self.ready() {
            return false;
        }
        for row in &mut self.rows {
            row.query_req(key);
        }
        true
    }

    /// Minimum of the per-row counts; rows answer on the same cycle, so this
    /// is all-or-nothing.
    pub fn query_resp(&mut self) -> Option<u32> {
        let mut min = None;
        for row in &mut self.rows {
            let count = row.query_resp()?;
            min = Some(match min {
                Some(m) if m < count => m,
                _ => count,
            });
        }
        min
    }

    /// Clear every row in parallel; the sketch is unavailable until the
    /// slowest (identical) sweep finishes.
    pub fn clear(&mut self) -> bool {
        if !self.clear_ready() {
            return false;
        }
        for row in &mut self.rows {
            row.clear();
        }
        true
    }

    pub fn tick(&mut self) {
        for row in &mut self.rows {
            row.tick();
        }
    }
}
