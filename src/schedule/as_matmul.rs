//! Matrix-multiplication recognition.
//!
//! Matches a perfectly nested loop pattern computing `C = α·A·B + β·C` and
//! replaces the whole nest by one `matmul` intrinsic carrying the inferred
//! geometry, so the emitter can hand it to a vendor library.
//!
//! The legality checks are strict: every index of every operand must be a
//! plain nest iterator (coefficient ±1 is accepted only as the bare
//! iterator) or a nest-invariant expression, and each iterator must range
//! exactly over the tensor dimension it indexes. The set of loops indexing
//! each operand decides whether a loop is an M, N, K or batch dimension.

use std::collections::HashMap;

use crate::analyze::access::expr_uses_name;
use crate::analyze::find::{find_all, find_loop};
use crate::analyze::linear::analyze_linear;
use crate::error::{Error, Result};
use crate::ir::hash::struct_eq_expr;
use crate::ir::{BinaryOp, DataType, Expr, Func, ReduceOp, Stmt, StmtId, StmtKind};

use super::util::rewrite_at;

/// Storage order inferred for one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatmulLayout {
    RowMajor,
    ColMajor,
}

struct NestLoop {
    iter: String,
    len: Expr,
}

/// Role of each nest loop, by position in the collected chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    M,
    N,
    K,
    Batch,
}

struct Operand {
    var: String,
    /// For each dimension: the nest loop indexing it, or the invariant expr
    dims: Vec<Option<usize>>,
    shape: Vec<Expr>,
}

fn classify_operand(
    var: &str,
    indices: &[Expr],
    loops: &[NestLoop],
    shapes: &HashMap<String, Vec<Expr>>,
) -> Result<Operand> {
    let shape = shapes
        .get(var)
        .ok_or_else(|| Error::schedule(format!("no definition found for \"{var}\"")))?
        .clone();
    if shape.len() != indices.len() {
        return Err(Error::internal(format!("rank mismatch on \"{var}\"")));
    }
    let mut dims = Vec::with_capacity(indices.len());
    for (d, idx) in indices.iter().enumerate() {
        match idx {
            Expr::Var(name) => {
                if let Some(pos) = loops.iter().position(|l| l.iter == *name) {
                    // The iterator must sweep the whole dimension
                    if !struct_eq_expr(&loops[pos].len, &shape[d]) {
                        return Err(Error::schedule(format!(
                            "iterator \"{name}\" of \"{var}\" should range over the entire \
                             dimension {} instead of {}",
                            shape[d], loops[pos].len
                        )));
                    }
                    dims.push(Some(pos));
                } else {
                    dims.push(None);
                }
            }
            other => {
                if loops.iter().any(|l| expr_uses_name(other, &l.iter)) {
                    return Err(Error::schedule(format!(
                        "indices of \"{var}\" should be plain loop iterators, got {other}"
                    )));
                }
                dims.push(None);
            }
        }
    }
    Ok(Operand {
        var: var.to_string(),
        dims,
        shape,
    })
}

impl Operand {
    fn uses(&self, loop_pos: usize) -> bool {
        self.dims.contains(&Some(loop_pos))
    }

    /// Base address: the access with every nest-iterator index zeroed.
    fn base(&self, indices: &[Expr]) -> Expr {
        let indices: Vec<Expr> = indices
            .iter()
            .zip(&self.dims)
            .map(|(idx, dim)| {
                if dim.is_some() {
                    Expr::int(0)
                } else {
                    idx.clone()
                }
            })
            .collect();
        Expr::load(self.var.clone(), indices)
    }

    /// Split dims into `(batch positions, trailing two matmul positions)`.
    fn layout_dims(&self, roles: &[Role]) -> Result<(Vec<usize>, [usize; 2])> {
        let mut matmul_dims = Vec::new();
        let mut batch_dims = Vec::new();
        for (d, dim) in self.dims.iter().enumerate() {
            if let Some(pos) = dim {
                if roles[*pos] == Role::Batch {
                    batch_dims.push(d);
                } else {
                    matmul_dims.push(d);
                }
            }
        }
        if matmul_dims.len() != 2 {
            return Err(Error::schedule(format!(
                "\"{}\" should be indexed by exactly two non-batch iterators",
                self.var
            )));
        }
        if batch_dims.iter().any(|d| matmul_dims.iter().any(|m| m < d)) {
            return Err(Error::schedule(format!(
                "batch dimensions of \"{}\" must lead its matmul dimensions",
                self.var
            )));
        }
        Ok((batch_dims, [matmul_dims[0], matmul_dims[1]]))
    }
}

/// Chain the nest: loops, optional `C = 0` initialization, and the single
/// reduction update at the innermost position.
struct NestShape {
    loops: Vec<NestLoop>,
    init: Option<(String, Vec<Expr>)>,
    update_var: String,
    update_indices: Vec<Expr>,
    a_access: (String, Vec<Expr>),
    b_access: (String, Vec<Expr>),
}

fn parse_nest(nest: &Stmt) -> Result<NestShape> {
    let mut loops = Vec::new();
    let mut init = None;
    let mut cursor = nest;
    loop {
        match &cursor.kind {
            StmtKind::For {
                iter, begin, len, body, ..
            } => {
                if begin.as_int() != Some(0) {
                    return Err(Error::schedule(format!(
                        "loop \"{iter}\" must start at 0 to match a tensor dimension"
                    )));
                }
                loops.push(NestLoop {
                    iter: iter.clone(),
                    len: analyze_linear(len).to_expr(),
                });
                cursor = body.as_ref();
            }
            StmtKind::StmtSeq { stmts } => match stmts.as_slice() {
                [one] => cursor = one,
                [first, second] => {
                    let StmtKind::Store { var, indices, expr } = &first.kind else {
                        return Err(Error::schedule(
                            "only an initialization may precede the reduction loop",
                        ));
                    };
                    let zero = matches!(expr, Expr::IntConst(0))
                        || matches!(expr, Expr::FloatConst(v) if *v == 0.0);
                    if !zero {
                        return Err(Error::schedule(
                            "initialization must store the additive zero",
                        ));
                    }
                    if init.is_some() {
                        return Err(Error::schedule("multiple initializations found"));
                    }
                    init = Some((var.clone(), indices.clone()));
                    cursor = second;
                }
                _ => {
                    return Err(Error::schedule(
                        "loop body has statements beyond init + update",
                    ))
                }
            },
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                ..
            } => {
                if *op != ReduceOp::Add {
                    return Err(Error::schedule("the update must be an additive reduction"));
                }
                let Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs,
                    rhs,
                } = expr
                else {
                    return Err(Error::schedule(
                        "the update must accumulate a two-operand product",
                    ));
                };
                let (Expr::Load {
                    var: av,
                    indices: ai,
                }, Expr::Load {
                    var: bv,
                    indices: bi,
                }) = (lhs.as_ref(), rhs.as_ref())
                else {
                    return Err(Error::schedule(
                        "the accumulated product must multiply two loads",
                    ));
                };
                return Ok(NestShape {
                    loops,
                    init,
                    update_var: var.clone(),
                    update_indices: indices.clone(),
                    a_access: (av.clone(), ai.clone()),
                    b_access: (bv.clone(), bi.clone()),
                });
            }
            _ => {
                return Err(Error::schedule(
                    "loop nest does not end in a recognizable update",
                ))
            }
        }
    }
}

fn product(exprs: impl IntoIterator<Item = Expr>) -> Expr {
    let folded = exprs.into_iter().reduce(Expr::mul).unwrap_or(Expr::int(1));
    analyze_linear(&folded).to_expr()
}

pub(super) fn as_matmul(func: Func, loop_id: &StmtId) -> Result<(Func, ())> {
    find_loop(&func.body, loop_id)?;

    // Shapes of every variable in scope
    let mut shapes: HashMap<String, Vec<Expr>> = HashMap::new();
    for def in find_all(&func.body, &Stmt::is_var_def) {
        if let StmtKind::VarDef { name, buffer, .. } = &def.kind {
            shapes.insert(name.clone(), buffer.tensor.shape.clone());
        }
    }

    let func = func.map_body(|body| {
        rewrite_at(body, loop_id, |nest| {
            // Canonicalize `C = C + A*B` stores into reductions first
            let nest = crate::pass::make_reduction_stmt(nest)?;
            let shape = parse_nest(&nest)?;

            let c = classify_operand(
                &shape.update_var,
                &shape.update_indices,
                &shape.loops,
                &shapes,
            )?;
            let a = classify_operand(&shape.a_access.0, &shape.a_access.1, &shape.loops, &shapes)?;
            let b = classify_operand(&shape.b_access.0, &shape.b_access.1, &shape.loops, &shapes)?;

            // Role of every nest loop from who uses it
            let mut roles = Vec::with_capacity(shape.loops.len());
            for pos in 0..shape.loops.len() {
                let role = match (a.uses(pos), b.uses(pos), c.uses(pos)) {
                    (true, false, true) => Role::M,
                    (false, true, true) => Role::N,
                    (true, true, false) => Role::K,
                    (true, true, true) => Role::Batch,
                    _ => {
                        return Err(Error::schedule(format!(
                            "loop \"{}\" indexes no operand pair and fits no matmul role",
                            shape.loops[pos].iter
                        )))
                    }
                };
                roles.push(role);
            }
            for required in [Role::M, Role::N, Role::K] {
                if roles.iter().filter(|r| **r == required).count() != 1 {
                    return Err(Error::schedule(format!(
                        "expected exactly one {required:?} loop in the nest"
                    )));
                }
            }
            let pos_of = |role: Role| {
                roles
                    .iter()
                    .position(|r| *r == role)
                    .unwrap_or(usize::MAX)
            };
            let (m_pos, n_pos, k_pos) = (pos_of(Role::M), pos_of(Role::N), pos_of(Role::K));
            let m = shape.loops[m_pos].len.clone();
            let n = shape.loops[n_pos].len.clone();
            let k = shape.loops[k_pos].len.clone();

            // β from the initialization
            let beta = match &shape.init {
                Some((var, indices)) => {
                    if *var != shape.update_var
                        || indices.len() != shape.update_indices.len()
                        || !indices
                            .iter()
                            .zip(&shape.update_indices)
                            .all(|(x, y)| struct_eq_expr(x, y))
                    {
                        return Err(Error::schedule(
                            "initialization does not cover the reduction target",
                        ));
                    }
                    0
                }
                None => 1,
            };

            // Layouts and leading dimensions: operands are batch dims plus
            // two matmul dims; the leading dimension is the trailing extent
            let layout_of = |op: &Operand, first: usize, second: usize| -> Result<(MatmulLayout, Expr)> {
                let (_, [d0, d1]) = op.layout_dims(&roles)?;
                let ld = op.shape[d1].clone();
                if op.dims[d0] == Some(first) && op.dims[d1] == Some(second) {
                    Ok((MatmulLayout::RowMajor, ld))
                } else if op.dims[d0] == Some(second) && op.dims[d1] == Some(first) {
                    Ok((MatmulLayout::ColMajor, ld))
                } else {
                    Err(Error::schedule(format!(
                        "\"{}\" is not indexed by the expected iterator pair",
                        op.var
                    )))
                }
            };
            let (a_layout, lda) = layout_of(&a, m_pos, k_pos)?;
            let (b_layout, ldb) = layout_of(&b, k_pos, n_pos)?;
            let (c_layout, ldc) = layout_of(&c, m_pos, n_pos)?;

            let batch = product(
                roles
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| **r == Role::Batch)
                    .map(|(pos, _)| shape.loops[pos].len.clone()),
            );
            let stride_a = product([m.clone(), k.clone()]);
            let stride_b = product([k.clone(), n.clone()]);
            let stride_c = product([m.clone(), n.clone()]);

            let args = vec![
                a.base(&shape.a_access.1),
                b.base(&shape.b_access.1),
                c.base(&shape.update_indices),
                m,
                n,
                k,
                lda,
                ldb,
                ldc,
                stride_a,
                stride_b,
                stride_c,
                batch,
                Expr::int(beta),
                Expr::BoolConst(a_layout == MatmulLayout::RowMajor),
                Expr::BoolConst(b_layout == MatmulLayout::RowMajor),
                Expr::BoolConst(c_layout == MatmulLayout::RowMajor),
            ];
            Ok(Stmt::new(
                nest.id,
                StmtKind::Eval {
                    expr: Expr::intrinsic(
                        "matmul(%, %, %, %, %, %, %, %, %, %, %, %, %, %, %, %, %)",
                        args,
                        DataType::Custom("void".to_string()),
                    ),
                },
            ))
        })
    })?;
    Ok((func, ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, MemType, Tensor};

    fn matmul_func(with_init: bool) -> Func {
        // for i in 0..M(4): for j in 0..N(8): { C[i,j] = 0; for p in
        // 0..K(16): C[i,j] += A[i,p] * B[p,j] }
        let update = Stmt::store(
            "C",
            vec![Expr::var("i"), Expr::var("j")],
            Expr::add(
                Expr::load("C", vec![Expr::var("i"), Expr::var("j")]),
                Expr::mul(
                    Expr::load("A", vec![Expr::var("i"), Expr::var("p")]),
                    Expr::load("B", vec![Expr::var("p"), Expr::var("j")]),
                ),
            ),
        );
        let k_loop = Stmt::for_range("p", Expr::int(0), Expr::int(16), update);
        let j_body = if with_init {
            Stmt::seq(vec![
                Stmt::store("C", vec![Expr::var("i"), Expr::var("j")], Expr::int(0)),
                k_loop,
            ])
        } else {
            k_loop
        };
        let j_loop = Stmt::for_range("j", Expr::int(0), Expr::int(8), j_body);
        let i_loop = Stmt::for_range("i", Expr::int(0), Expr::int(4), j_loop).with_id("L".into());
        let buf = |d0: i64, d1: i64, atype| {
            Buffer::new(
                Tensor::new(vec![Expr::int(d0), Expr::int(d1)], DataType::Float32),
                atype,
                MemType::Cpu,
            )
        };
        Func::with_params(
            "mm",
            vec![
                ("A".to_string(), buf(4, 16, AccessType::Input)),
                ("B".to_string(), buf(16, 8, AccessType::Input)),
                ("C".to_string(), buf(4, 8, AccessType::Output)),
            ],
            i_loop,
        )
    }

    fn intrinsic_args(func: &Func) -> Vec<Expr> {
        let mut args = None;
        crate::ir::visit::walk_stmt_pre(&func.body, &mut |s| {
            if let StmtKind::Eval {
                expr: Expr::Intrinsic { args: a, .. },
            } = &s.kind
            {
                args = Some(a.clone());
            }
        });
        args.expect("matmul intrinsic present")
    }

    #[test]
    fn test_canonical_matmul_recognized() {
        let (func, ()) = as_matmul(matmul_func(true), &"L".into()).expect("as_matmul");
        let args = intrinsic_args(&func);
        // m, n, k
        assert_eq!(args[3], Expr::int(4));
        assert_eq!(args[4], Expr::int(8));
        assert_eq!(args[5], Expr::int(16));
        // lda = K, ldb = N, ldc = N
        assert_eq!(args[6], Expr::int(16));
        assert_eq!(args[7], Expr::int(8));
        assert_eq!(args[8], Expr::int(8));
        // beta = 0, all row-major
        assert_eq!(args[13], Expr::int(0));
        assert_eq!(args[14], Expr::BoolConst(true));
        assert_eq!(args[15], Expr::BoolConst(true));
        assert_eq!(args[16], Expr::BoolConst(true));
    }

    #[test]
    fn test_missing_init_means_beta_one() {
        let (func, ()) = as_matmul(matmul_func(false), &"L".into()).expect("as_matmul");
        let args = intrinsic_args(&func);
        assert_eq!(args[13], Expr::int(1));
    }

    #[test]
    fn test_partial_range_rejected() {
        // K loop covers half the shared dimension
        let update = Stmt::reduce_to(
            "C",
            vec![Expr::var("i"), Expr::var("j")],
            ReduceOp::Add,
            Expr::mul(
                Expr::load("A", vec![Expr::var("i"), Expr::var("p")]),
                Expr::load("B", vec![Expr::var("p"), Expr::var("j")]),
            ),
        );
        let k_loop = Stmt::for_range("p", Expr::int(0), Expr::int(8), update);
        let j_loop = Stmt::for_range("j", Expr::int(0), Expr::int(8), k_loop);
        let i_loop = Stmt::for_range("i", Expr::int(0), Expr::int(4), j_loop).with_id("L".into());
        let buf = |d0: i64, d1: i64| {
            Buffer::new(
                Tensor::new(vec![Expr::int(d0), Expr::int(d1)], DataType::Float32),
                AccessType::Input,
                MemType::Cpu,
            )
        };
        let func = Func::with_params(
            "mm",
            vec![
                ("A".to_string(), buf(4, 16)),
                ("B".to_string(), buf(16, 8)),
                ("C".to_string(), buf(4, 8)),
            ],
            i_loop,
        );
        let err = as_matmul(func, &"L".into()).expect_err("partial range");
        assert!(matches!(err, Error::InvalidSchedule { .. }));
    }

    #[test]
    fn test_strided_index_rejected() {
        let update = Stmt::reduce_to(
            "C",
            vec![Expr::var("i"), Expr::var("j")],
            ReduceOp::Add,
            Expr::mul(
                Expr::load(
                    "A",
                    vec![Expr::mul(Expr::int(2), Expr::var("i")), Expr::var("p")],
                ),
                Expr::load("B", vec![Expr::var("p"), Expr::var("j")]),
            ),
        );
        let k_loop = Stmt::for_range("p", Expr::int(0), Expr::int(16), update);
        let j_loop = Stmt::for_range("j", Expr::int(0), Expr::int(8), k_loop);
        let i_loop = Stmt::for_range("i", Expr::int(0), Expr::int(4), j_loop).with_id("L".into());
        let buf = |d0: i64, d1: i64| {
            Buffer::new(
                Tensor::new(vec![Expr::int(d0), Expr::int(d1)], DataType::Float32),
                AccessType::InOut,
                MemType::Cpu,
            )
        };
        let func = Func::with_params(
            "mm",
            vec![
                ("A".to_string(), buf(4, 16)),
                ("B".to_string(), buf(16, 8)),
                ("C".to_string(), buf(4, 8)),
            ],
            i_loop,
        );
        assert!(as_matmul(func, &"L".into()).is_err());
    }

    #[test]
    fn test_transposed_operand_detected() {
        // A accessed as A[p, i]: col-major from the matmul's point of view
        let update = Stmt::reduce_to(
            "C",
            vec![Expr::var("i"), Expr::var("j")],
            ReduceOp::Add,
            Expr::mul(
                Expr::load("A", vec![Expr::var("p"), Expr::var("i")]),
                Expr::load("B", vec![Expr::var("p"), Expr::var("j")]),
            ),
        );
        let k_loop = Stmt::for_range("p", Expr::int(0), Expr::int(16), update);
        let j_loop = Stmt::for_range("j", Expr::int(0), Expr::int(8), k_loop);
        let i_loop = Stmt::for_range("i", Expr::int(0), Expr::int(4), j_loop).with_id("L".into());
        let buf = |d0: i64, d1: i64| {
            Buffer::new(
                Tensor::new(vec![Expr::int(d0), Expr::int(d1)], DataType::Float32),
                AccessType::InOut,
                MemType::Cpu,
            )
        };
        let func = Func::with_params(
            "mm",
            vec![
                ("A".to_string(), buf(16, 4)),
                ("B".to_string(), buf(16, 8)),
                ("C".to_string(), buf(4, 8)),
            ],
            i_loop,
        );
        let (func, ()) = as_matmul(func, &"L".into()).expect("as_matmul");
        let args = intrinsic_args(&func);
        assert_eq!(args[14], Expr::BoolConst(false), "A is col-major");
        assert_eq!(args[15], Expr::BoolConst(true));
    }
}
