//! Sketches: partial schedule recipes.
//!
//! A sketch is a list of typed parts, each one transformation-with-
//! annotations. Parts know how to apply themselves to a schedule, how to
//! mutate their annotations, and how to cross over with a peer, which is
//! all the evolutionary loop needs.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ir::{CudaDim, ParallelScope, Stmt, StmtId, StmtKind};
use crate::schedule::Schedule;
use crate::target::Target;

/// Discriminant of a sketch part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SketchPartType {
    MultiLevelTilingWithFusion,
    CacheWrite,
    CacheRead,
    ThreadBind,
    Parallelize,
    Unroll,
}

/// Unroll budgets sampled per target, smallest first.
pub const UNROLL_CONFIGS_CPU: [i64; 4] = [0, 16, 64, 512];
pub const UNROLL_CONFIGS_GPU: [i64; 5] = [0, 16, 64, 512, 1024];

/// One transformation-with-annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SketchPart {
    /// Tile the outermost serial nest with the given factors, outer first
    MultiLevelTilingWithFusion { tiles: Vec<i64> },
    /// Stage the first written tensor through a scratch buffer
    CacheWrite,
    /// Stage the first read-only tensor through a scratch buffer
    CacheRead,
    /// Bind the two outermost loops to blockIdx.x / threadIdx.x
    ThreadBind { vthread_size: i64 },
    /// Worksharing on the outermost loop
    Parallelize,
    /// Unroll small constant loops up to a total size budget
    Unroll { max_size: i64 },
}

/// Sample `n` factors whose product is about `total`, by random log2
/// partitioning.
pub fn random_fill_array(total: i64, n: usize, rng: &mut impl Rng) -> Vec<i64> {
    let log_total = (total.max(1) as f64).log2() as usize;
    let mut data = vec![1i64; n];
    for _ in 0..log_total {
        data[rng.gen_range(0..n)] *= 2;
    }
    data
}

fn outermost_serial_loop(schedule: &Schedule) -> Option<StmtId> {
    schedule
        .find_all(&|s| {
            matches!(&s.kind, StmtKind::For { property, .. } if property.parallel.is_serial())
        })
        .first()
        .map(|s| s.id.clone())
}

fn innermost_loop(schedule: &Schedule) -> Option<StmtId> {
    schedule.find_all(&Stmt::is_for).last().map(|s| s.id.clone())
}

impl SketchPart {
    pub fn part_type(&self) -> SketchPartType {
        match self {
            SketchPart::MultiLevelTilingWithFusion { .. } => {
                SketchPartType::MultiLevelTilingWithFusion
            }
            SketchPart::CacheWrite => SketchPartType::CacheWrite,
            SketchPart::CacheRead => SketchPartType::CacheRead,
            SketchPart::ThreadBind { .. } => SketchPartType::ThreadBind,
            SketchPart::Parallelize => SketchPartType::Parallelize,
            SketchPart::Unroll { .. } => SketchPartType::Unroll,
        }
    }

    /// Apply this part to `schedule`. A legality rejection surfaces as
    /// `InvalidSchedule`, which the search loop treats as candidate-skip.
    pub fn apply(&self, schedule: &mut Schedule, target: &Target) -> Result<()> {
        match self {
            SketchPart::MultiLevelTilingWithFusion { tiles } => {
                let Some(mut cursor) = outermost_serial_loop(schedule) else {
                    return Err(crate::error::Error::schedule("no loop to tile"));
                };
                for factor in tiles {
                    if *factor <= 1 {
                        continue;
                    }
                    let (outer, _) = schedule.split(&cursor, Some(*factor), None, 0)?;
                    cursor = outer;
                }
                Ok(())
            }
            SketchPart::CacheWrite => {
                let Some(loop_id) = innermost_loop(schedule) else {
                    return Err(crate::error::Error::schedule("no loop to cache around"));
                };
                let written = written_tensor(schedule, &loop_id)
                    .ok_or_else(|| crate::error::Error::schedule("no written tensor"))?;
                let mtype = cache_mtype(target);
                schedule.cache(&loop_id, &written, mtype)?;
                Ok(())
            }
            SketchPart::CacheRead => {
                let Some(loop_id) = innermost_loop(schedule) else {
                    return Err(crate::error::Error::schedule("no loop to cache around"));
                };
                let read = read_only_tensor(schedule, &loop_id)
                    .ok_or_else(|| crate::error::Error::schedule("no read-only tensor"))?;
                let mtype = cache_mtype(target);
                schedule.cache(&loop_id, &read, mtype)?;
                Ok(())
            }
            SketchPart::ThreadBind { vthread_size } => {
                let loops = schedule.find_all(&Stmt::is_for);
                let mut ids = loops.iter().map(|s| s.id.clone());
                let Some(block_loop) = ids.next() else {
                    return Err(crate::error::Error::schedule("no loop to bind"));
                };
                schedule.parallelize(&block_loop, ParallelScope::CudaBlock(CudaDim::X))?;
                if let Some(thread_loop) = ids.next() {
                    let thread_loop = if *vthread_size > 1 {
                        let (outer, inner) =
                            schedule.split(&thread_loop, Some(*vthread_size), None, 0)?;
                        schedule.parallelize(&inner, ParallelScope::VirtualThread)?;
                        outer
                    } else {
                        thread_loop
                    };
                    schedule.parallelize(&thread_loop, ParallelScope::CudaThread(CudaDim::X))?;
                }
                Ok(())
            }
            SketchPart::Parallelize => {
                let Some(loop_id) = outermost_serial_loop(schedule) else {
                    return Err(crate::error::Error::schedule("no loop to parallelize"));
                };
                schedule.parallelize(&loop_id, ParallelScope::OpenMp)
            }
            SketchPart::Unroll { max_size } => {
                if *max_size == 0 {
                    return Ok(());
                }
                let mut budget = *max_size;
                // Innermost first: unrolling outward multiplies code size
                let loops: Vec<Stmt> = schedule.find_all(&Stmt::is_for);
                for l in loops.iter().rev() {
                    let StmtKind::For { property, len, .. } = &l.kind else {
                        continue;
                    };
                    let Some(n) = len.as_int() else { continue };
                    if property.parallel.is_serial()
                        && !property.unroll
                        && !property.vectorize
                        && n > 0
                        && n <= budget
                    {
                        schedule.unroll(&l.id, false)?;
                        budget /= n.max(1);
                        if budget <= 1 {
                            break;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Resample this part's annotation. Returns false when the part has
    /// nothing to mutate.
    pub fn mutate(&mut self, target: &Target, rng: &mut impl Rng) -> bool {
        match self {
            SketchPart::MultiLevelTilingWithFusion { tiles } => {
                if tiles.is_empty() {
                    return false;
                }
                let total: i64 = tiles.iter().product::<i64>().max(2);
                *tiles = random_fill_array(total, tiles.len(), rng);
                true
            }
            SketchPart::ThreadBind { vthread_size } => {
                *vthread_size = [1, 2, 4, 8][rng.gen_range(0..4)];
                true
            }
            SketchPart::Unroll { max_size } => {
                *max_size = match target {
                    Target::Gpu(_) => UNROLL_CONFIGS_GPU[rng.gen_range(0..UNROLL_CONFIGS_GPU.len())],
                    Target::Cpu => UNROLL_CONFIGS_CPU[rng.gen_range(0..UNROLL_CONFIGS_CPU.len())],
                };
                true
            }
            SketchPart::CacheWrite | SketchPart::CacheRead | SketchPart::Parallelize => false,
        }
    }

    /// Copy the annotation from a peer of the same type. Returns false on a
    /// type mismatch.
    pub fn crossover(&mut self, other: &SketchPart) -> bool {
        if self.part_type() != other.part_type() {
            return false;
        }
        *self = other.clone();
        true
    }
}

fn cache_mtype(target: &Target) -> crate::ir::MemType {
    match target {
        Target::Gpu(_) => crate::ir::MemType::GpuShared,
        Target::Cpu => crate::ir::MemType::Cpu,
    }
}

fn written_tensor(schedule: &Schedule, loop_id: &StmtId) -> Option<String> {
    let loop_stmt = schedule.find_id(loop_id).ok()?;
    let writes = crate::analyze::access::writes(&loop_stmt);
    writes.into_iter().min()
}

fn read_only_tensor(schedule: &Schedule, loop_id: &StmtId) -> Option<String> {
    let loop_stmt = schedule.find_id(loop_id).ok()?;
    let (reads, writes) = crate::analyze::access::read_write_sets(&loop_stmt);
    reads.into_iter().filter(|r| !writes.contains(r)).min()
}

/// A partial schedule recipe: applied parts plus cached evaluation state.
#[derive(Debug, Clone, Default)]
pub struct Sketch {
    pub parts: Vec<SketchPart>,
    pub features: Vec<f64>,
    /// Measured execution time in seconds, when this sketch has been run
    pub time: Option<f64>,
}

impl Sketch {
    pub fn has_part(&self, t: SketchPartType) -> bool {
        self.parts.iter().any(|p| p.part_type() == t)
    }

    pub fn part_mut(&mut self, t: SketchPartType) -> Option<&mut SketchPart> {
        self.parts.iter_mut().find(|p| p.part_type() == t)
    }

    /// Materialize: apply every part to a fresh copy of the base schedule.
    pub fn gen_schedule(&self, base: &Schedule, target: &Target) -> Result<Schedule> {
        let mut schedule = base.clone();
        for part in &self.parts {
            part.apply(&mut schedule, target)?;
        }
        Ok(schedule)
    }

    /// Annotation export, for logging and replay.
    pub fn get_annotation(&self) -> Result<String> {
        serde_json::to_string(&self.parts)
            .map_err(|e| crate::error::Error::internal(e.to_string()))
    }
}
