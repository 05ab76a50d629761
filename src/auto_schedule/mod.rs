//! # Auto-Schedule
//!
//! Evolutionary search over sketches:
//!
//! ```text
//! population ──rules.gen_part──► expanded candidates
//!            ──mutate────────► perturbed annotations
//!            ──crossover─────► recombined annotations
//!                 │
//!        predictor callback ranks by estimated score
//!                 │
//!        top-k ──measure──► times ──updater callback──► better predictor
//! ```
//!
//! Feature extraction over candidates fans out with rayon; results merge
//! only at the end of a round. A candidate whose parts turn out illegal
//! (`InvalidSchedule`) is silently skipped; a malformed program aborts the
//! search.

mod rules;
mod sketch;

pub use rules::{default_rules, Rule, RuleStatus};
pub use sketch::{Sketch, SketchPart, SketchPartType};

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ir::visit::walk_expr_pre;
use crate::ir::{Expr, Func, Stmt, StmtKind};
use crate::lower::lower;
use crate::schedule::Schedule;
use crate::target::{Device, Target};

/// Feature vectors of a batch of candidates.
pub type Features = Vec<Vec<f64>>;
/// Predicted scores of a batch (higher is better).
pub type Predicts = Vec<f64>;

/// Predictor callback: features in, scores out. Must be resolved before the
/// next search iteration begins.
pub type PredictFn = Box<dyn Fn(&Features) -> Predicts + Send>;
/// Updater callback: observed times improve the predictor.
pub type UpdateFn = Box<dyn FnMut(&Features, &[f64]) + Send>;

/// Measurement back-end seam; the runtime executing compiled artifacts is
/// an external collaborator.
pub trait Measurer {
    /// Execution time in seconds for each lowered function on `device`.
    fn measure(&mut self, funcs: &[Func], device: &Device) -> Vec<f64>;
}

/// Evolutionary auto-scheduler over one kernel.
pub struct AutoSchedule {
    base: Schedule,
    target: Target,
    device: Device,
    measured_size: usize,
    predict: PredictFn,
    update: UpdateFn,
    tag: String,
    rules: Vec<Box<dyn Rule>>,
    population: Vec<Sketch>,
    /// Best measured sketches, fastest first, at most `measured_size`
    measured: Vec<Sketch>,
    params: HashMap<String, serde_json::Value>,
    rng: StdRng,
    flop: f64,
}

/// Search knobs; mutation/crossover shares follow the original driver.
const MUTATION_RATIO: f64 = 0.6;
const CROSSOVER_RATIO: f64 = 0.3;

impl AutoSchedule {
    pub fn new(
        schedule: Schedule,
        target: Target,
        device: Device,
        measured_size: usize,
        predict: PredictFn,
        update: UpdateFn,
        tag: impl Into<String>,
    ) -> Self {
        let flop = estimate_flop(schedule.ast());
        AutoSchedule {
            base: schedule,
            target,
            device,
            measured_size,
            predict,
            update,
            tag: tag.into(),
            rules: default_rules(),
            population: vec![Sketch::default()],
            measured: Vec::new(),
            params: HashMap::new(),
            rng: StdRng::from_entropy(),
            flop,
        }
    }

    /// Runtime parameters forwarded to the measurement back-end.
    pub fn set_params(&mut self, params: HashMap<String, serde_json::Value>) {
        self.params = params;
    }

    pub fn params(&self) -> &HashMap<String, serde_json::Value> {
        &self.params
    }

    pub fn measured_size(&self) -> usize {
        self.measured_size
    }

    pub fn get_tag(&self) -> &str {
        &self.tag
    }

    /// Estimated floating-point work of the kernel, for throughput reports.
    pub fn get_flop(&self) -> f64 {
        self.flop
    }

    /// Expand the population by the rule catalog, one part per sketch per
    /// step, honoring `ApplyAndSkipRest`.
    fn expand(&mut self) -> Vec<Sketch> {
        let mut out = Vec::new();
        for sketch in &self.population {
            for rule in &self.rules {
                match rule.analyze(sketch, &self.target) {
                    RuleStatus::Skip => {}
                    RuleStatus::Apply => {
                        out.extend(rule.gen_part(sketch, &self.target, &mut self.rng));
                    }
                    RuleStatus::ApplyAndSkipRest => {
                        out.extend(rule.gen_part(sketch, &self.target, &mut self.rng));
                        break;
                    }
                }
            }
        }
        out
    }

    fn mutated(&mut self, count: usize) -> Vec<Sketch> {
        let mut out = Vec::new();
        for _ in 0..count {
            if self.population.is_empty() {
                break;
            }
            let idx = self.rng.gen_range(0..self.population.len());
            let mut candidate = self.population[idx].clone();
            if candidate.parts.is_empty() {
                continue;
            }
            let part_idx = self.rng.gen_range(0..candidate.parts.len());
            if candidate.parts[part_idx].mutate(&self.target, &mut self.rng) {
                candidate.time = None;
                candidate.features.clear();
                out.push(candidate);
            }
        }
        out
    }

    fn crossed_over(&mut self, count: usize) -> Vec<Sketch> {
        let mut out = Vec::new();
        for _ in 0..count {
            if self.population.len() < 2 {
                break;
            }
            let a = self.rng.gen_range(0..self.population.len());
            let b = self.rng.gen_range(0..self.population.len());
            if a == b {
                continue;
            }
            let mut child = self.population[a].clone();
            let donor = &self.population[b];
            if child.parts.is_empty() || donor.parts.is_empty() {
                continue;
            }
            let part_idx = self.rng.gen_range(0..child.parts.len());
            let t = child.parts[part_idx].part_type();
            if let Some(donor_part) = donor.parts.iter().find(|p| p.part_type() == t) {
                if child.parts[part_idx].crossover(donor_part) {
                    child.time = None;
                    child.features.clear();
                    out.push(child);
                }
            }
        }
        out
    }

    /// Feature vectors for a batch, extracted candidate-parallel. A sketch
    /// whose parts no longer apply gets an empty vector.
    pub fn gen_features(&self, sketches: &mut [Sketch]) -> Features {
        let base = &self.base;
        let target = &self.target;
        let features: Features = sketches
            .par_iter()
            .map(|sketch| match sketch.gen_schedule(base, target) {
                Ok(schedule) => featurize(schedule.ast()),
                Err(_) => Vec::new(),
            })
            .collect();
        for (sketch, f) in sketches.iter_mut().zip(&features) {
            sketch.features.clone_from(f);
        }
        features
    }

    /// One round of evolutionary search: generate candidates, rank with the
    /// predictor, measure the `n` most promising, feed the observations back.
    /// Returns the times observed this round.
    pub fn search_one_round(&mut self, n: usize, measurer: &mut dyn Measurer) -> Result<Vec<f64>> {
        let mut candidates = self.expand();
        let mutation_count = (n as f64 * MUTATION_RATIO) as usize;
        let crossover_count = (n as f64 * CROSSOVER_RATIO) as usize;
        candidates.extend(self.mutated(mutation_count));
        candidates.extend(self.crossed_over(crossover_count));
        debug!(
            candidates = candidates.len(),
            tag = %self.tag,
            "search round generated"
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let features = self.gen_features(&mut candidates);
        let scores = (self.predict)(&features);
        if scores.len() != candidates.len() {
            return Err(Error::internal(format!(
                "predictor returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }

        let mut ranked: Vec<(f64, Sketch)> = scores.into_iter().zip(candidates).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        let pool: Vec<Sketch> = ranked
            .into_iter()
            .filter(|(_, s)| !s.features.is_empty())
            .take(n)
            .map(|(_, s)| s)
            .collect();

        let times = self.test_and_add(pool, measurer)?;

        // Survivors of this round seed the next one
        self.population = self.measured.clone();
        if self.population.is_empty() {
            self.population.push(Sketch::default());
        }
        Ok(times)
    }

    /// Measure a batch of sketches, update the predictor, and keep the best
    /// in the reservoir. Illegal sketches are skipped; times align with the
    /// sketches actually measured.
    pub fn test_and_add(
        &mut self,
        sketches: Vec<Sketch>,
        measurer: &mut dyn Measurer,
    ) -> Result<Vec<f64>> {
        let mut funcs = Vec::new();
        let mut valid = Vec::new();
        for sketch in sketches {
            match sketch.gen_schedule(&self.base, &self.target) {
                Ok(schedule) => match lower(schedule.ast().clone(), Some(&self.target)) {
                    Ok(func) => {
                        funcs.push(func);
                        valid.push(sketch);
                    }
                    Err(Error::InvalidSchedule { op, cause }) => {
                        debug!(%op, %cause, "skipping unlowerable candidate");
                    }
                    Err(e @ Error::InvalidProgram { .. }) => return Err(e),
                    Err(e) => return Err(e),
                },
                Err(Error::InvalidSchedule { op, cause }) => {
                    debug!(%op, %cause, "skipping illegal candidate");
                }
                Err(e @ Error::InvalidProgram { .. }) => return Err(e),
                Err(e) => return Err(e),
            }
        }
        if valid.is_empty() {
            warn!(tag = %self.tag, "no measurable candidate this round");
            return Ok(Vec::new());
        }

        let times = measurer.measure(&funcs, &self.device);
        if times.len() != valid.len() {
            return Err(Error::internal(format!(
                "measurer returned {} times for {} candidates",
                times.len(),
                valid.len()
            )));
        }

        let features: Features = valid.iter().map(|s| s.features.clone()).collect();
        (self.update)(&features, &times);

        for (mut sketch, time) in valid.into_iter().zip(times.iter()) {
            sketch.time = Some(*time);
            self.measured.push(sketch);
        }
        self.measured
            .sort_by(|a, b| a.time.unwrap_or(f64::INFINITY).total_cmp(&b.time.unwrap_or(f64::INFINITY)));
        self.measured.truncate(self.measured_size);
        info!(
            tag = %self.tag,
            best = self.get_best_time(),
            measured = self.measured.len(),
            "round measured"
        );
        Ok(times)
    }

    /// The schedule with the lowest observed time.
    pub fn get_best_schedule(&self) -> Result<Schedule> {
        let best = self
            .measured
            .first()
            .ok_or_else(|| Error::query("no schedule has been measured yet"))?;
        best.gen_schedule(&self.base, &self.target)
    }

    /// Best observed time, `+inf` before any measurement.
    pub fn get_best_time(&self) -> f64 {
        self.measured
            .first()
            .and_then(|s| s.time)
            .unwrap_or(f64::INFINITY)
    }
}

/// Structural feature vector of a function: loop counts and depths, access
/// counts, parallel structure, arithmetic intensity. Deliberately cheap;
/// the predictor callback owns any learned representation.
fn featurize(func: &Func) -> Vec<f64> {
    let mut n_loops = 0f64;
    let mut max_depth = 0f64;
    let mut n_parallel = 0f64;
    let mut n_unroll = 0f64;
    let mut n_vectorize = 0f64;
    let mut n_stores = 0f64;
    let mut n_reduces = 0f64;
    let mut n_loads = 0f64;
    let mut depth = 0f64;

    fn walk(
        stmt: &Stmt,
        depth: &mut f64,
        max_depth: &mut f64,
        n_loops: &mut f64,
        n_parallel: &mut f64,
        n_unroll: &mut f64,
        n_vectorize: &mut f64,
        n_stores: &mut f64,
        n_reduces: &mut f64,
        n_loads: &mut f64,
    ) {
        match &stmt.kind {
            StmtKind::For { property, body, .. } => {
                *n_loops += 1.0;
                if property.parallel.is_parallel() {
                    *n_parallel += 1.0;
                }
                if property.unroll {
                    *n_unroll += 1.0;
                }
                if property.vectorize {
                    *n_vectorize += 1.0;
                }
                *depth += 1.0;
                *max_depth = max_depth.max(*depth);
                walk(
                    body, depth, max_depth, n_loops, n_parallel, n_unroll, n_vectorize, n_stores,
                    n_reduces, n_loads,
                );
                *depth -= 1.0;
            }
            StmtKind::Store { indices, expr, .. } => {
                *n_stores += 1.0;
                for e in indices.iter().chain(std::iter::once(expr)) {
                    walk_expr_pre(e, &mut |e| {
                        if matches!(e, Expr::Load { .. }) {
                            *n_loads += 1.0;
                        }
                    });
                }
            }
            StmtKind::ReduceTo { indices, expr, .. } => {
                *n_reduces += 1.0;
                for e in indices.iter().chain(std::iter::once(expr)) {
                    walk_expr_pre(e, &mut |e| {
                        if matches!(e, Expr::Load { .. }) {
                            *n_loads += 1.0;
                        }
                    });
                }
            }
            _ => {
                let mut kids = Vec::new();
                crate::analyze::find::collect_children(stmt, &mut kids);
                for k in kids {
                    walk(
                        k, depth, max_depth, n_loops, n_parallel, n_unroll, n_vectorize, n_stores,
                        n_reduces, n_loads,
                    );
                }
            }
        }
    }
    walk(
        &func.body,
        &mut depth,
        &mut max_depth,
        &mut n_loops,
        &mut n_parallel,
        &mut n_unroll,
        &mut n_vectorize,
        &mut n_stores,
        &mut n_reduces,
        &mut n_loads,
    );
    vec![
        n_loops,
        max_depth,
        n_parallel,
        n_unroll,
        n_vectorize,
        n_stores,
        n_reduces,
        n_loads,
        estimate_flop(func),
    ]
}

/// Rough floating-point operation count: arithmetic nodes weighted by the
/// constant trip counts of their enclosing loops.
fn estimate_flop(func: &Func) -> f64 {
    fn ops_in(expr: &Expr) -> f64 {
        let mut n = 0f64;
        walk_expr_pre(expr, &mut |e| {
            if matches!(e, Expr::Binary { .. } | Expr::Unary { .. }) {
                n += 1.0;
            }
        });
        n
    }
    fn walk(stmt: &Stmt, scale: f64) -> f64 {
        match &stmt.kind {
            StmtKind::For { len, body, .. } => {
                let trip = len.as_int().map_or(1.0, |n| n.max(0) as f64);
                walk(body, scale * trip)
            }
            StmtKind::Store { expr, .. } => scale * ops_in(expr),
            StmtKind::ReduceTo { expr, .. } => scale * (ops_in(expr) + 1.0),
            _ => {
                let mut kids = Vec::new();
                crate::analyze::find::collect_children(stmt, &mut kids);
                kids.into_iter().map(|k| walk(k, scale)).sum()
            }
        }
    }
    walk(&func.body, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, DataType, MemType, ReduceOp, Tensor};

    struct FakeMeasurer {
        calls: usize,
    }

    impl Measurer for FakeMeasurer {
        fn measure(&mut self, funcs: &[Func], _device: &Device) -> Vec<f64> {
            self.calls += 1;
            // Deterministic fake: fewer loops run "faster"
            funcs
                .iter()
                .map(|f| 1.0 + featurize(f)[0] * 0.01)
                .collect()
        }
    }

    fn base_schedule() -> Schedule {
        let body = Stmt::reduce_to(
            "c",
            vec![Expr::var("i")],
            ReduceOp::Add,
            Expr::mul(
                Expr::load("a", vec![Expr::var("i")]),
                Expr::load("b", vec![Expr::var("i")]),
            ),
        );
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(256), body);
        let buf = |atype| {
            Buffer::new(
                Tensor::new(vec![Expr::int(256)], DataType::Float32),
                atype,
                MemType::Cpu,
            )
        };
        Schedule::new(Func::with_params(
            "mul",
            vec![
                ("a".to_string(), buf(AccessType::Input)),
                ("b".to_string(), buf(AccessType::Input)),
                ("c".to_string(), buf(AccessType::InOut)),
            ],
            l,
        ))
    }

    fn auto(measured_size: usize) -> AutoSchedule {
        AutoSchedule::new(
            base_schedule(),
            Target::Cpu,
            Device::new(Target::Cpu, 0),
            measured_size,
            Box::new(|features: &Features| {
                features
                    .iter()
                    .map(|f| f.first().map_or(f64::MIN, |v| -v))
                    .collect()
            }),
            Box::new(|_: &Features, _: &[f64]| {}),
            "test",
        )
    }

    #[test]
    fn test_search_round_measures_and_keeps_reservoir() {
        let mut auto = auto(4);
        let mut measurer = FakeMeasurer { calls: 0 };
        let times = auto
            .search_one_round(4, &mut measurer)
            .expect("search round");
        assert!(!times.is_empty());
        assert_eq!(measurer.calls, 1);
        assert!(auto.get_best_time().is_finite());
        assert!(auto.get_best_schedule().is_ok());
    }

    #[test]
    fn test_reservoir_bounded_by_measured_size() {
        let mut auto = auto(2);
        let mut measurer = FakeMeasurer { calls: 0 };
        for _ in 0..3 {
            auto.search_one_round(4, &mut measurer).expect("round");
        }
        assert!(auto.measured.len() <= 2);
    }

    #[test]
    fn test_best_schedule_before_measurement_is_query_error() {
        let auto = auto(4);
        assert!(matches!(
            auto.get_best_schedule(),
            Err(Error::UnexpectedQuery { .. })
        ));
        assert!(auto.get_best_time().is_infinite());
    }

    #[test]
    fn test_flop_estimate_scales_with_loops() {
        let auto = auto(4);
        // 256 iterations x (1 mul + 1 reduce-add)
        assert_eq!(auto.get_flop(), 512.0);
    }

    #[test]
    fn test_updater_sees_measurements() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let mut auto = AutoSchedule::new(
            base_schedule(),
            Target::Cpu,
            Device::new(Target::Cpu, 0),
            4,
            Box::new(|features: &Features| vec![0.0; features.len()]),
            Box::new(move |_: &Features, times: &[f64]| {
                seen2.fetch_add(times.len(), Ordering::SeqCst);
            }),
            "test",
        );
        let mut measurer = FakeMeasurer { calls: 0 };
        auto.search_one_round(3, &mut measurer).expect("round");
        assert!(seen.load(Ordering::SeqCst) > 0);
    }
}
