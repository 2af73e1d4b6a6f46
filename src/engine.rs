use std::collections::VecDeque;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::BuildError;
use crate::packet_info::PacketInfo;
use crate::rolling_sketch::{Mode, RollingCMSketch};
use crate::vol_counter::VolCounter;

/// Key projections per observed record: (src, dst), (dst, dst port),
/// (src, length).
pub const SKETCH_COUNT: usize = 3;

/// Packet-level admit/drop decision engine.
///
/// Three rolling sketches count independent key projections of every
/// observed record while a volume gate watches the total traffic volume per
/// window. Calm windows keep the engine learning; a window whose volume
/// exceeds the threshold switches it to enforcement, where each record is
/// looked up in the previously learned counts and judged against the discard
/// threshold.
///
/// Records enter through four bounded ingress queues (one per header field)
/// and leave as run-length decision credits on a bounded egress queue: `0`
/// drops exactly the next downstream packet, `n > 0` admits the next `n`.
/// Every queue refuses work when full; callers retry. [`tick`](Self::tick)
/// advances the whole engine by one cycle.
pub struct FilterEngine {
    sketches: Vec<RollingCMSketch>,
    gate: VolCounter,
    src_q: VecDeque<u32>,
    dst_q: VecDeque<u32>,
    port_q: VecDeque<u16>,
    len_q: VecDeque<u16>,
    decisions: VecDeque<u32>,
    fifo_depth: usize,
    discard_threshold: u64,
    /// Learning-phase records admitted but not yet credited downstream.
    admit_credits: u32,
    /// Estimates gathered for the one query record in flight.
    inflight: Option<[Option<u32>; SKETCH_COUNT]>,
    /// Window verdict waiting for in-flight work to drain before it is
    /// applied; ingest is held meanwhile so windows never bleed together.
    pending_verdict: Option<bool>,
}

impl FilterEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let counter_width = config.counter_width()?;
        let hash_params = config.resolved_hash_params();
        let sketches = (0..SKETCH_COUNT)
            .map(|_| {
                RollingCMSketch::new(
                    config.instances,
                    config.depth,
                    config.width,
                    counter_width,
                    hash_params.as_deref(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            sketches,
            gate: VolCounter::new(config.window, config.volume_threshold)?,
            src_q: VecDeque::new(),
            dst_q: VecDeque::new(),
            port_q: VecDeque::new(),
            len_q: VecDeque::new(),
            decisions: VecDeque::new(),
            fifo_depth: config.fifo_depth,
            discard_threshold: config.discard_threshold,
            admit_credits: 0,
            inflight: None,
            pending_verdict: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.sketches[0].mode()
    }

    pub fn width(&self) -> usize {
        self.sketches[0].width()
    }

    pub fn push_src(&mut self, word: u32) -> bool {
        push_bounded(&mut self.src_q, word, self.fifo_depth)
    }

    pub fn push_dst(&mut self, word: u32) -> bool {
        push_bounded(&mut self.dst_q, word, self.fifo_depth)
    }

    pub fn push_port(&mut self, word: u16) -> bool {
        push_bounded(&mut self.port_q, word, self.fifo_depth)
    }

    pub fn push_len(&mut self, word: u16) -> bool {
        push_bounded(&mut self.len_q, word, self.fifo_depth)
    }

    /// Enqueue all four words of one record, or none of them.
    pub fn push_record(&mut self, packet: &PacketInfo) -> bool {
        if self.src_q.len() == self.fifo_depth
            || self.dst_q.len() == self.fifo_depth
            || self.port_q.len() == self.fifo_depth
            || self.len_q.len() == self.fifo_depth
        {
            return false;
        }
        self.push_src(packet.src_ip);
        self.push_dst(packet.dst_ip);
        self.push_port(packet.dst_port);
        self.push_len(packet.total_len);
        true
    }

    pub fn pop_decision(&mut self) -> Option<u32> {
        self.decisions.pop_front()
    }

    /// Advance one cycle: finish the in-flight query, apply a drained window
    /// verdict, flush admit credits, ingest at most one record, and clock
    /// every sketch.
    pub fn tick(&mut self) {
        self.gather_query();
        self.apply_verdict();
        self.flush_credits();
        self.ingest();
        for sketch in &mut self.sketches {
            sketch.tick();
        }
    }

    /// Collect the per-sketch estimates of the query record in flight; once
    /// all have answered, reduce them to a single decision.
    fn gather_query(&mut self) {
        let mut finished = false;
        if let Some(gather) = &mut self.inflight {
            for (i, slot) in gather.iter_mut().enumerate() {
                if slot.is_none() {
                    *slot = self.sketches[i].query_resp();
                }
            }
            if gather.iter().all(Option::is_some) && self.decisions.len() < self.fifo_depth {
                let sum: u64 = gather.iter().flatten().map(|&c| c as u64).sum();
                let decision = u32::from(sum <= self.discard_threshold);
                debug!(sum, decision, "record judged");
                self.decisions.push_back(decision);
                finished = true;
            }
        }
        if finished {
            self.inflight = None;
        }
    }

    /// Switch between learning and enforcement once the gate has spoken and
    /// all in-flight work has drained. Switching back to learning also
    /// rotates every ring so the next window starts on swept counters.
    fn apply_verdict(&mut self) {
        let Some(over) = self.pending_verdict else {
            return;
        };
        if self.inflight.is_some() {
            return;
        }
        let mode = if over { Mode::Query } else { Mode::Update };
        let ready = self
            .sketches
            .iter()
            .all(|s| s.set_mode_ready() && (mode == Mode::Query || s.clear_idle()));
        if !ready {
            return;
        }
        for sketch in &mut self.sketches {
            sketch.set_mode(mode);
        }
        if mode == Mode::Update {
            for sketch in &mut self.sketches {
                sketch.change_roles();
            }
        }
        debug!(?mode, "window verdict applied");
        self.pending_verdict = None;
    }

    /// Emit accumulated learning-phase admits as one run-length credit.
    /// With a free egress queue this fires every cycle, so each record gets
    /// its own credit; batching only appears under back-pressure.
    fn flush_credits(&mut self) {
        if self.admit_credits > 0
            && self.inflight.is_none()
            && self.decisions.len() < self.fifo_depth
        {
            self.decisions.push_back(self.admit_credits);
            self.admit_credits = 0;
        }
    }

    /// Pop one record from the four ingress queues (all or nothing) and route
    /// it by mode: learning inserts its key projections, enforcement issues
    /// the lookups.
    fn ingest(&mut self) {
        if self.pending_verdict.is_some() {
            return;
        }
        if self.src_q.is_empty()
            || self.dst_q.is_empty()
            || self.port_q.is_empty()
            || self.len_q.is_empty()
        {
            return;
        }
        match self.mode() {
            Mode::Update => {
                if !self.sketches.iter().all(RollingCMSketch::insert_ready) {
                    return;
                }
                let packet = self.pop_record();
                for (sketch, key) in self.sketches.iter_mut().zip(keys_of(&packet)) {
                    sketch.insert(key);
                }
                self.admit_credits = self.admit_credits.saturating_add(1);
                self.sample(&packet);
            }
            Mode::Query => {
                if self.inflight.is_some()
                    || !self.sketches.iter().all(RollingCMSketch::query_ready)
                {
                    return;
                }
                let packet = self.pop_record();
                for (sketch, key) in self.sketches.iter_mut().zip(keys_of(&packet)) {
                    sketch.query_req(key);
                }
                self.inflight = Some([None; SKETCH_COUNT]);
                self.sample(&packet);
            }
        }
    }

    fn pop_record(&mut self) -> PacketInfo {
        // Callers checked all four queues; an empty one here would mean the
        // ingress channels went out of step.
        PacketInfo {
            src_ip: self.src_q.pop_front().unwrap_or_default(),
            dst_ip: self.dst_q.pop_front().unwrap_or_default(),
            dst_port: self.port_q.pop_front().unwrap_or_default(),
            total_len: self.len_q.pop_front().unwrap_or_default(),
        }
    }

    fn sample(&mut self, packet: &PacketInfo) {
        self.gate.add_sample(packet.total_len as u64);
        if let Some(over) = self.gate.result() {
            debug!(over, "volume window closed");
            self.pending_verdict = Some(over);
        }
    }
}

fn keys_of(packet: &PacketInfo) -> [u64; SKETCH_COUNT] {
    [packet.flow_key(), packet.service_key(), packet.size_key()]
}

fn push_bounded<T>(queue: &mut VecDeque<T>, word: T, depth: usize) -> bool {
    if queue.len() == depth {
        return false;
    }
    queue.push_back(word);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            depth: 2,
            width: 16,
            window: 4,
            volume_threshold: 100,
            discard_threshold: 2,
            instances: 3,
            fifo_depth: 8,
            ..EngineConfig::default()
        }
    }

    fn run(engine: &mut FilterEngine, ticks: usize, out: &mut Vec<u32>) {
        for _ in 0..ticks {
            engine.tick();
            while let Some(d) = engine.pop_decision() {
                out.push(d);
            }
        }
    }

    const HEAVY: PacketInfo = PacketInfo {
        src_ip: 1,
        dst_ip: 2,
        dst_port: 80,
        total_len: 10,
    };

    #[test]
    fn learning_windows_admit_everything() {
        let mut engine = FilterEngine::new(&config()).unwrap();
        let mut out = Vec::new();
        for _ in 0..4 {
            assert!(engine.push_record(&HEAVY));
        }
        run(&mut engine, 10, &mut out);
        assert_eq!(out.iter().sum::<u32>(), 4, "every record credited");
        assert!(out.iter().all(|&d| d > 0));
        assert_eq!(engine.mode(), Mode::Update);
    }

    #[test]
    fn heavy_window_switches_to_enforcement() {
        let mut engine = FilterEngine::new(&config()).unwrap();
        let mut out = Vec::new();

        // Calm window: learn the heavy flow, stay in update mode and rotate,
        // making that window's counts the queryable ones.
        for _ in 0..4 {
            assert!(engine.push_record(&HEAVY));
        }
        run(&mut engine, 12, &mut out);
        assert_eq!(engine.mode(), Mode::Update);

        // Loud window: volume 200 > 100 flips the engine to enforcement once
        // the background sweep has finished.
        let loud = PacketInfo {
            src_ip: 7,
            dst_ip: 8,
            dst_port: 53,
            total_len: 50,
        };
        for _ in 0..4 {
            assert!(engine.push_record(&loud));
        }
        run(&mut engine, 40, &mut out);
        assert_eq!(engine.mode(), Mode::Query);
        assert_eq!(out.iter().sum::<u32>(), 8, "both learning windows admitted");

        // The flow counted 4 times in the queryable window is over the
        // discard threshold; a never-seen flow is not.
        let fresh = PacketInfo {
            src_ip: 100,
            dst_ip: 200,
            dst_port: 9000,
            total_len: 33,
        };
        let judged = out.len();
        assert!(engine.push_record(&HEAVY));
        run(&mut engine, 10, &mut out);
        assert_eq!(&out[judged..], &[0], "heavy flow dropped");
        assert!(engine.push_record(&fresh));
        run(&mut engine, 10, &mut out);
        assert_eq!(&out[judged..], &[0, 1], "unknown flow admitted");
    }

    #[test]
    fn exactly_one_decision_per_query_record() {
        let mut engine = FilterEngine::new(&config()).unwrap();
        let mut out = Vec::new();
        for _ in 0..4 {
            assert!(engine.push_record(&HEAVY));
        }
        run(&mut engine, 12, &mut out);
        let loud = PacketInfo {
            total_len: 50,
            ..HEAVY
        };
        for _ in 0..4 {
            assert!(engine.push_record(&loud));
        }
        run(&mut engine, 40, &mut out);
        assert_eq!(engine.mode(), Mode::Query);

        let judged = out.len();
        for _ in 0..3 {
            assert!(engine.push_record(&HEAVY));
        }
        run(&mut engine, 30, &mut out);
        assert_eq!(out.len() - judged, 3, "one decision per record");
        assert!(out[judged..].iter().all(|&d| d == 0));
    }

    #[test]
    fn ingress_backpressure() {
        let mut engine = FilterEngine::new(&config()).unwrap();
        for _ in 0..8 {
            assert!(engine.push_record(&HEAVY));
        }
        assert!(!engine.push_record(&HEAVY), "ingress full");
        engine.tick();
        assert!(engine.push_record(&HEAVY), "one slot drained per cycle");
    }

    #[test]
    fn per_field_channels_fill_independently() {
        let mut engine = FilterEngine::new(&config()).unwrap();
        for _ in 0..8 {
            assert!(engine.push_port(443));
        }
        assert!(!engine.push_port(443));
        // A record needs room on every channel.
        assert!(!engine.push_record(&HEAVY));
        assert!(engine.push_src(1));
    }
}
