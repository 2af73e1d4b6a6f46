use tracing::debug;

use crate::cm_sketch::CMSketch;
use crate::error::BuildError;
use crate::hash::HashPair;
use crate::sketch_row::CounterWidth;

/// What the active sketch is doing with incoming keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Update,
    Query,
}

/// Ring of identical [`CMSketch`] instances with rotating roles.
///
/// With two instances the structure is the classic ping-pong: one instance is
/// active (taking inserts in `Update` mode, answering queries in `Query`
/// mode) while the stand-by is zeroed in the background. With three, the
/// roles are held by distinct instances: one learns the current window, one
/// answers queries for the last rotated-in window, and one is being swept
/// clean for its next learning term.
///
/// `change_roles` rotates the assignment forward and starts a background
/// clear on the instance that just gave up serving queries; it is refused
/// until a previous sweep has fully finished, which is what guarantees that
/// an instance never starts a learning term with stale counts.
pub struct RollingCMSketch {
    sketches: Vec<CMSketch>,
    update_idx: usize,
    query_idx: usize,
    clear_idx: usize,
    mode: Mode,
    clear_pending: bool,
    clear_busy: bool,
    query_outstanding: bool,
}

impl RollingCMSketch {
    pub fn new(
        instances: usize,
        depth: usize,
        width: usize,
        counter_width: CounterWidth,
        hash_params: Option<&[HashPair]>,
    ) -> Result<Self, BuildError> {
        if !(2..=3).contains(&instances) {
            return Err(BuildError::BadRingSize(instances));
        }
        let sketches = (0..instances)
            .map(|_| CMSketch::new(depth, width, counter_width, hash_params))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sketches,
            update_idx: 0,
            query_idx: if instances == 2 { 0 } else { 1 },
            clear_idx: instances - 1,
            mode: Mode::Update,
            clear_pending: false,
            clear_busy: false,
            query_outstanding: false,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn width(&self) -> usize {
        self.sketches[0].width()
    }

    pub fn insert_ready(&self) -> bool {
        self.mode == Mode::Update && self.sketches[self.update_idx].ready()
    }

    /// One query in flight at a time; the next request is refused until the
    /// previous response has been consumed.
    pub fn query_ready(&self) -> bool {
        self.mode == Mode::Query
            && !self.query_outstanding
            && self.sketches[self.query_idx].ready()
    }

    pub fn set_mode_ready(&self) -> bool {
        !self.clear_busy
    }

    pub fn change_roles_ready(&self) -> bool {
        self.mode == Mode::Update && self.clear_idle()
    }

    /// No background sweep scheduled or running.
    pub fn clear_idle(&self) -> bool {
        !self.clear_busy && !self.clear_pending
    }

    pub fn insert(&mut self, key: u64) -> bool {
        if !self.insert_ready() {
            return false;
        }
        self.sketches[self.update_idx].insert(key)
    }

    pub fn query_req(&mut self, key: u64) -> bool {
        if !self.query_ready() {
            return false;
        }
        self.query_outstanding = true;
        self.sketches[self.query_idx].query_req(key)
    }

    pub fn query_resp(&mut self) -> Option<u32> {
        let resp = self.sketches[self.query_idx].query_resp();
        if resp.is_some() {
            self.query_outstanding = false;
        }
        resp
    }

    /// Flip between learning and answering. Refused while a background sweep
    /// runs, so a role change can never race an unfinished clear.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if !self.set_mode_ready() {
            return false;
        }
        if mode != self.mode {
            debug!(?mode, "rolling sketch mode change");
        }
        self.mode = mode;
        true
    }

    /// Rotate roles forward by one position and schedule the vacated query
    /// instance for its background sweep.
    pub fn change_roles(&mut self) -> bool {
        if !self.change_roles_ready() {
            return false;
        }
        if self.sketches.len() == 2 {
            let vacated = self.update_idx;
            self.update_idx = self.clear_idx;
            self.query_idx = self.update_idx;
            self.clear_idx = vacated;
        } else {
            let vacated = self.query_idx;
            self.query_idx = self.update_idx;
            self.update_idx = self.clear_idx;
            self.clear_idx = vacated;
        }
        self.clear_pending = true;
        debug!(
            update = self.update_idx,
            query = self.query_idx,
            clearing = self.clear_idx,
            "rolling sketch roles rotated"
        );
        true
    }

    /// Advance one cycle: launch a scheduled sweep as soon as the target
    /// instance has drained, clock every instance, and note sweep completion.
    pub fn tick(&mut self) {
        if self.clear_pending && !self.clear_busy && self.sketches[self.clear_idx].clear_ready() {
            self.sketches[self.clear_idx].clear();
            self.clear_pending = false;
            self.clear_busy = true;
        }
        for sketch in &mut self.sketches {
            sketch.tick();
        }
        if self.clear_busy && !self.sketches[self.clear_idx].is_clearing() {
            self.clear_busy = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: usize = 16;

    fn ring(instances: usize) -> RollingCMSketch {
        RollingCMSketch::new(instances, 2, WIDTH, CounterWidth::W32, None).unwrap()
    }

    fn drain(r: &mut RollingCMSketch, cycles: usize) {
        for _ in 0..cycles {
            r.tick();
        }
    }

    fn insert_n(r: &mut RollingCMSketch, key: u64, n: usize) {
        for _ in 0..n {
            assert!(r.insert(key));
            r.tick();
        }
    }

    fn estimate(r: &mut RollingCMSketch, key: u64) -> u32 {
        assert!(r.query_req(key));
        r.tick();
        assert!(r.query_resp().is_none());
        r.tick();
        r.query_resp().expect("response due")
    }

    #[test]
    fn mode_gates_operations() {
        let mut r = ring(2);
        assert!(!r.query_req(1), "no queries in update mode");
        assert!(r.set_mode(Mode::Query));
        assert!(!r.insert(1), "no inserts in query mode");
        assert!(!r.change_roles(), "no rotation in query mode");
        assert!(r.query_req(1));
    }

    #[test]
    fn ping_pong_discards_learned_window() {
        let mut r = ring(2);
        insert_n(&mut r, 9, 4);
        drain(&mut r, 3);
        // Stay in update mode and rotate: the fresh stand-by takes over and
        // the old active is swept.
        assert!(r.change_roles());
        drain(&mut r, WIDTH + 2);
        assert!(r.set_mode(Mode::Query));
        assert_eq!(estimate(&mut r, 9), 0);
    }

    #[test]
    fn ping_pong_serves_last_window_without_rotation() {
        let mut r = ring(2);
        insert_n(&mut r, 9, 4);
        drain(&mut r, 3);
        assert!(r.set_mode(Mode::Query));
        assert_eq!(estimate(&mut r, 9), 4);
    }

    #[test]
    fn window_isolation_with_three_instances() {
        let mut r = ring(3);
        insert_n(&mut r, 5, 5);
        drain(&mut r, 3);
        assert!(r.change_roles());
        // Window W data now answers queries; W+1 inserts go elsewhere.
        insert_n(&mut r, 5, 2);
        drain(&mut r, WIDTH + 2);
        assert!(r.set_mode(Mode::Query));
        assert_eq!(estimate(&mut r, 5), 5);

        // Next rotation promotes the W+1 instance to answering.
        assert!(r.set_mode(Mode::Update));
        assert!(r.change_roles());
        drain(&mut r, WIDTH + 2);
        assert!(r.set_mode(Mode::Query));
        assert_eq!(estimate(&mut r, 5), 2);
    }

    #[test]
    fn rotation_refused_until_sweep_finishes() {
        let mut r = ring(2);
        insert_n(&mut r, 1, 3);
        drain(&mut r, 3);
        assert!(r.change_roles());
        assert!(!r.change_roles_ready(), "sweep pending");
        r.tick();
        assert!(!r.change_roles_ready(), "sweep running");
        assert!(!r.set_mode_ready());
        drain(&mut r, WIDTH + 1);
        assert!(r.change_roles_ready());
        assert!(r.set_mode_ready());
    }

    #[test]
    fn fresh_role_always_reads_zero() {
        let mut r = ring(3);
        for round in 0..5u64 {
            insert_n(&mut r, round, 3);
            drain(&mut r, 3);
            assert!(r.change_roles());
            drain(&mut r, WIDTH + 2);
            assert!(r.set_mode(Mode::Query));
            assert_eq!(estimate(&mut r, round), 3, "rotated-in window answers");
            // Each instance re-learns every third round; the key it counted
            // on its previous term must have been swept in between.
            if round >= 3 {
                assert_eq!(estimate(&mut r, round - 3), 0);
            }
            assert!(r.set_mode(Mode::Update));
        }
    }

    #[test]
    fn single_query_outstanding() {
        let mut r = ring(2);
        assert!(r.set_mode(Mode::Query));
        assert!(r.query_req(1));
        r.tick();
        assert!(!r.query_req(2), "previous response not yet consumed");
        r.tick();
        assert!(r.query_resp().is_some());
        assert!(r.query_req(2));
    }

    #[test]
    fn rejects_bad_ring_size() {
        for n in [0, 1, 4] {
            assert!(matches!(
                RollingCMSketch::new(n, 2, WIDTH, CounterWidth::W32, None),
                Err(BuildError::BadRingSize(_))
            ));
        }
    }
}
