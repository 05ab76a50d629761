//! Rule catalog for sketch generation.
//!
//! Each rule inspects a sketch and declares whether it applies through a
//! tri-valued [`RuleStatus`]; `ApplyAndSkipRest` prunes the remaining rules
//! at the current expansion step. Applying a rule appends a part with a
//! freshly sampled annotation.

use rand::rngs::StdRng;
use rand::Rng;

use crate::target::Target;

use super::sketch::{
    random_fill_array, Sketch, SketchPart, SketchPartType, UNROLL_CONFIGS_CPU, UNROLL_CONFIGS_GPU,
};

/// Applicability of a rule to a sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStatus {
    Skip,
    Apply,
    /// Apply, and do not consider further rules for this sketch this step
    ApplyAndSkipRest,
}

/// One generation rule of the catalog.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn analyze(&self, sketch: &Sketch, target: &Target) -> RuleStatus;
    fn gen_part(&self, sketch: &Sketch, target: &Target, rng: &mut StdRng) -> Vec<Sketch>;
}

/// The default catalog, in priority order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(MultiLevelTilingWithFusionRule { n_level: 3 }),
        Box::new(CacheWriteRule),
        Box::new(CacheReadRule),
        Box::new(ThreadBindRule),
        Box::new(ParallelizeRule),
        Box::new(UnrollRule),
    ]
}

fn with_part(sketch: &Sketch, part: SketchPart) -> Sketch {
    let mut out = sketch.clone();
    out.parts.push(part);
    out.time = None;
    out.features.clear();
    out
}

pub struct MultiLevelTilingWithFusionRule {
    pub n_level: usize,
}

impl Rule for MultiLevelTilingWithFusionRule {
    fn name(&self) -> &'static str {
        "multi_level_tiling_with_fusion"
    }

    fn analyze(&self, sketch: &Sketch, _target: &Target) -> RuleStatus {
        if sketch.has_part(SketchPartType::MultiLevelTilingWithFusion) {
            RuleStatus::Skip
        } else {
            RuleStatus::Apply
        }
    }

    fn gen_part(&self, sketch: &Sketch, _target: &Target, rng: &mut StdRng) -> Vec<Sketch> {
        // Two independent samples widen the population
        (0..2)
            .map(|_| {
                let total = 1 << rng.gen_range(4..9);
                with_part(
                    sketch,
                    SketchPart::MultiLevelTilingWithFusion {
                        tiles: random_fill_array(total, self.n_level, rng),
                    },
                )
            })
            .collect()
    }
}

pub struct CacheWriteRule;

impl Rule for CacheWriteRule {
    fn name(&self) -> &'static str {
        "cache_write"
    }

    fn analyze(&self, sketch: &Sketch, _target: &Target) -> RuleStatus {
        if sketch.has_part(SketchPartType::CacheWrite)
            || !sketch.has_part(SketchPartType::MultiLevelTilingWithFusion)
        {
            RuleStatus::Skip
        } else {
            RuleStatus::Apply
        }
    }

    fn gen_part(&self, sketch: &Sketch, _target: &Target, _rng: &mut StdRng) -> Vec<Sketch> {
        vec![with_part(sketch, SketchPart::CacheWrite)]
    }
}

pub struct CacheReadRule;

impl Rule for CacheReadRule {
    fn name(&self) -> &'static str {
        "cache_read"
    }

    fn analyze(&self, sketch: &Sketch, _target: &Target) -> RuleStatus {
        if sketch.has_part(SketchPartType::CacheRead)
            || !sketch.has_part(SketchPartType::MultiLevelTilingWithFusion)
        {
            RuleStatus::Skip
        } else {
            RuleStatus::Apply
        }
    }

    fn gen_part(&self, sketch: &Sketch, _target: &Target, _rng: &mut StdRng) -> Vec<Sketch> {
        vec![with_part(sketch, SketchPart::CacheRead)]
    }
}

pub struct ThreadBindRule;

impl Rule for ThreadBindRule {
    fn name(&self) -> &'static str {
        "thread_bind"
    }

    fn analyze(&self, sketch: &Sketch, target: &Target) -> RuleStatus {
        if !target.is_gpu() || sketch.has_part(SketchPartType::ThreadBind) {
            RuleStatus::Skip
        } else {
            RuleStatus::Apply
        }
    }

    fn gen_part(&self, sketch: &Sketch, _target: &Target, rng: &mut StdRng) -> Vec<Sketch> {
        let vthread_size = [1, 2, 4, 8][rng.gen_range(0..4)];
        vec![with_part(sketch, SketchPart::ThreadBind { vthread_size })]
    }
}

pub struct ParallelizeRule;

impl Rule for ParallelizeRule {
    fn name(&self) -> &'static str {
        "parallelize"
    }

    fn analyze(&self, sketch: &Sketch, target: &Target) -> RuleStatus {
        if target.is_gpu() || sketch.has_part(SketchPartType::Parallelize) {
            RuleStatus::Skip
        } else {
            RuleStatus::Apply
        }
    }

    fn gen_part(&self, sketch: &Sketch, _target: &Target, _rng: &mut StdRng) -> Vec<Sketch> {
        vec![with_part(sketch, SketchPart::Parallelize)]
    }
}

pub struct UnrollRule;

impl Rule for UnrollRule {
    fn name(&self) -> &'static str {
        "unroll"
    }

    fn analyze(&self, sketch: &Sketch, _target: &Target) -> RuleStatus {
        if sketch.has_part(SketchPartType::Unroll) {
            return RuleStatus::Skip;
        }
        if sketch.has_part(SketchPartType::MultiLevelTilingWithFusion) {
            // Unrolling is the last structural decision
            return RuleStatus::ApplyAndSkipRest;
        }
        RuleStatus::Skip
    }

    fn gen_part(&self, sketch: &Sketch, target: &Target, rng: &mut StdRng) -> Vec<Sketch> {
        let max_size = match target {
            Target::Gpu(_) => UNROLL_CONFIGS_GPU[rng.gen_range(0..UNROLL_CONFIGS_GPU.len())],
            Target::Cpu => UNROLL_CONFIGS_CPU[rng.gen_range(0..UNROLL_CONFIGS_CPU.len())],
        };
        vec![with_part(sketch, SketchPart::Unroll { max_size })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_rules_respect_existing_parts() {
        let target = Target::Cpu;
        let mut sketch = Sketch::default();
        let tiling = MultiLevelTilingWithFusionRule { n_level: 3 };
        assert_eq!(tiling.analyze(&sketch, &target), RuleStatus::Apply);

        let mut rng = StdRng::seed_from_u64(1);
        sketch = tiling
            .gen_part(&sketch, &target, &mut rng)
            .into_iter()
            .next()
            .expect("generated");
        assert_eq!(tiling.analyze(&sketch, &target), RuleStatus::Skip);
        assert_eq!(
            UnrollRule.analyze(&sketch, &target),
            RuleStatus::ApplyAndSkipRest
        );
    }

    #[test]
    fn test_target_gating() {
        let sketch = Sketch::default();
        assert_eq!(
            ThreadBindRule.analyze(&sketch, &Target::Cpu),
            RuleStatus::Skip
        );
        assert_eq!(
            ParallelizeRule.analyze(&sketch, &Target::Cpu),
            RuleStatus::Apply
        );
        let gpu = Target::Gpu(crate::target::GpuArch::default());
        assert_eq!(ParallelizeRule.analyze(&sketch, &gpu), RuleStatus::Skip);
        assert_eq!(ThreadBindRule.analyze(&sketch, &gpu), RuleStatus::Apply);
    }
}
