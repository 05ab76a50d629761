//! # Lowering Driver
//!
//! The fixed composition of passes run between scheduling and code
//! emission. The sequence and its ordering obligations:
//!
//! ```text
//! scalar_prop_const
//! remove_dead_var
//! prop_one_time_use
//! float_simplify            (after prop_one_time_use)
//! simplify
//! move_out_first_or_last_iter
//! sink_var
//! shrink_var
//! merge_and_hoist_if
//! tensor_prop_const
//! remove_writes
//! remove_cyclic_assign      (after remove_writes)
//! remove_dead_var           (after remove_writes and prop_const)
//! make_parallel_reduction
//! shrink_for                (after remove_writes and make_parallel_reduction)
//! --- GPU ---               --- CPU ---
//! gpu::lower_parallel_reduction     cpu::lower_parallel_reduction
//! gpu::multiplex_buffers
//! gpu::simplex_buffers
//! make_const_shape {GpuShared, GpuLocal}
//! gpu::normalize_threads    (after multiplex_buffers)
//! gpu::make_sync            (after normalize_threads)
//! make_1d_var
//! gpu::lower_vector         (after make_1d_var)
//! ---
//! use_builtin_div           (after the target-specific passes)
//! ```
//!
//! Any failing pass aborts the whole lowering; the input function is left
//! with the caller.

use tracing::info;

use crate::error::Result;
use crate::ir::{Func, MemType};
use crate::pass;
use crate::target::Target;

/// Lower a function for the given target. `None` runs only the
/// target-independent pipeline.
pub fn lower(func: Func, target: Option<&Target>) -> Result<Func> {
    info!(func = %func.name, ?target, "lowering");

    let func = pass::scalar_prop_const(func)?;
    let func = pass::remove_dead_var(func)?;
    let func = pass::prop_one_time_use(func)?;
    let func = pass::float_simplify(func)?;
    let func = pass::simplify(func)?;
    let func = pass::move_out_first_or_last_iter(func)?;
    let func = pass::sink_var(func)?;
    let func = pass::shrink_var(func)?;
    let func = pass::merge_and_hoist_if(func)?;
    let func = pass::tensor_prop_const(func)?;
    let func = pass::remove_writes(func)?;
    let func = pass::remove_cyclic_assign(func)?;
    let func = pass::remove_dead_var(func)?;
    let func = pass::make_parallel_reduction(func)?;
    let func = pass::shrink_for(func)?;

    let func = match target {
        Some(Target::Gpu(_)) => {
            let func = pass::gpu::lower_parallel_reduction(func)?;
            let func = pass::gpu::multiplex_buffers(func)?;
            let func = pass::gpu::simplex_buffers(func)?;
            let func =
                pass::make_const_shape(func, &[MemType::GpuShared, MemType::GpuLocal])?;
            let func = pass::gpu::normalize_threads(func)?;
            let func = pass::gpu::make_sync(func)?;
            let func = pass::make_1d_var(func)?;
            pass::gpu::lower_vector(func)?
        }
        Some(Target::Cpu) => pass::cpu::lower_parallel_reduction(func)?,
        None => func,
    };

    pass::use_builtin_div(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::check::check_invariants;
    use crate::ir::{
        AccessType, Buffer, DataType, Expr, MemType, Stmt, Tensor,
    };

    fn sample_func() -> Func {
        // out[i] = in[i] * 2 via a temporary, with some dead weight
        let t_def = Stmt::var_def(
            "t",
            Buffer::new(
                Tensor::new(vec![], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::load("in", vec![Expr::var("i")])),
                Stmt::store(
                    "out",
                    vec![Expr::var("i")],
                    Expr::mul(Expr::load("t", vec![]), Expr::FloatConst(2.0)),
                ),
                Stmt::store("dead", vec![], Expr::int(1)),
            ]),
        );
        let dead_def = Stmt::var_def(
            "dead",
            Buffer::new(
                Tensor::new(vec![], DataType::Int32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            t_def,
        );
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(64), dead_def);
        let buf = |atype| {
            Buffer::new(
                Tensor::new(vec![Expr::int(64)], DataType::Float32),
                atype,
                MemType::Cpu,
            )
        };
        Func::with_params(
            "sample",
            vec![
                ("in".to_string(), buf(AccessType::Input)),
                ("out".to_string(), buf(AccessType::Output)),
            ],
            l,
        )
    }

    #[test]
    fn test_lower_cleans_dead_weight_and_keeps_invariants() {
        let out = lower(sample_func(), None).expect("lower");
        check_invariants(&out).expect("invariants hold");
        let text = out.body.pretty_print(0);
        assert!(!text.contains("dead"), "dead var removed: {text}");
        assert!(
            text.contains("out[i] = (in[i] * 2)"),
            "temporary propagated: {text}"
        );
    }

    #[test]
    fn test_lower_cpu_and_gpu_run_end_to_end() {
        check_invariants(&lower(sample_func(), Some(&Target::Cpu)).expect("cpu")).expect("ok");
        let gpu = crate::target::GpuArch::default();
        check_invariants(&lower(sample_func(), Some(&Target::Gpu(gpu))).expect("gpu"))
            .expect("ok");
    }

    #[test]
    fn test_lower_is_idempotent() {
        let once = lower(sample_func(), Some(&Target::Cpu)).expect("first");
        let twice = lower(once.clone(), Some(&Target::Cpu)).expect("second");
        assert_eq!(
            crate::ir::hash::hash_stmt(&once.body),
            crate::ir::hash::hash_stmt(&twice.body)
        );
    }
}
