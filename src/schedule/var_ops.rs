//! Variable layout transformations: memory placement, axis splitting,
//! merging and permutation. Each rewrites the `VarDef`'s shape and every
//! access's indices in one step, so the tree never holds a half-changed
//! layout.

use crate::analyze::find::find_stmt;
use crate::analyze::linear::analyze_linear;
use crate::error::{Error, Result};
use crate::ir::visit::{rebuild_expr, rebuild_stmt, Mutator};
use crate::ir::{AccessType, Expr, Func, MemType, Stmt, StmtId, StmtKind};

use super::util::rewrite_at;

/// Axis-splitting contract: `FixedSize` keeps the two new extents constant
/// and pads when the split does not divide; `RelaxedSize` adapts the outer
/// extent instead, which changes the variable's footprint and is therefore
/// refused on I/O variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSplitMode {
    FixedSize,
    RelaxedSize,
}

/// Rewrite every access to `var` through `f` on its index vector.
struct MapIndices<'a, F> {
    var: &'a str,
    f: F,
}

impl<F: Fn(Vec<Expr>) -> Vec<Expr>> Mutator for MapIndices<'_, F> {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::Store { var, indices, expr } if var == self.var => StmtKind::Store {
                indices: (self.f)(indices),
                var,
                expr,
            },
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } if var == self.var => StmtKind::ReduceTo {
                indices: (self.f)(indices),
                var,
                op,
                expr,
                atomic,
            },
            other => other,
        };
        Ok(Stmt::new(id, kind))
    }

    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let expr = rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Load { var, indices } if var == self.var => Expr::Load {
                indices: (self.f)(indices),
                var,
            },
            other => other,
        })
    }
}

/// Fetch `(name, atype, shape)` of the `VarDef` with ID `def`.
fn def_header(func: &Func, def: &StmtId) -> Result<(String, AccessType, Vec<Expr>)> {
    let stmt = find_stmt(&func.body, def)?;
    match &stmt.kind {
        StmtKind::VarDef { name, buffer, .. } => Ok((
            name.clone(),
            buffer.atype,
            buffer.tensor.shape.clone(),
        )),
        _ => Err(Error::query(format!("{def} is not a VarDef"))),
    }
}

fn rewrite_def(
    func: Func,
    def: &StmtId,
    new_shape: Vec<Expr>,
    map: impl Fn(Vec<Expr>) -> Vec<Expr>,
    name: &str,
) -> Result<Func> {
    func.map_body(|body| {
        rewrite_at(body, def, |stmt| {
            let StmtKind::VarDef {
                name: def_name,
                mut buffer,
                pinned,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("def_header checked a non-VarDef"));
            };
            buffer.tensor.shape = new_shape;
            let body = MapIndices { var: name, f: map }.mutate_stmt(*body)?;
            Ok(Stmt::new(
                stmt.id,
                StmtKind::VarDef {
                    name: def_name,
                    buffer,
                    pinned,
                    body: Box::new(body),
                },
            ))
        })
    })
}

/// Point a cache variable at different memory.
pub(super) fn set_mem_type(func: Func, def: &StmtId, mtype: MemType) -> Result<(Func, ())> {
    let (_, atype, _) = def_header(&func, def)?;
    if atype.is_io() {
        return Err(Error::schedule(
            "memory type of an I/O variable belongs to the caller",
        ));
    }
    let func = func.map_body(|body| {
        rewrite_at(body, def, |stmt| {
            let StmtKind::VarDef {
                name,
                mut buffer,
                pinned,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("def_header checked a non-VarDef"));
            };
            buffer.mtype = mtype;
            Ok(Stmt::new(
                stmt.id,
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                },
            ))
        })
    })?;
    Ok((func, ()))
}

/// Split axis `dim` into `[outer, inner]`.
pub(super) fn var_split(
    func: Func,
    def: &StmtId,
    dim: usize,
    mode: VarSplitMode,
    factor: Option<i64>,
    nparts: Option<i64>,
) -> Result<(Func, ())> {
    let (name, atype, shape) = def_header(&func, def)?;
    if dim >= shape.len() {
        return Err(Error::schedule(format!(
            "dimension {dim} out of range for \"{name}\""
        )));
    }
    if factor.is_none() && nparts.is_none() {
        return Err(Error::schedule("neither factor nor nparts is specified"));
    }
    if mode == VarSplitMode::RelaxedSize && atype.is_io() {
        return Err(Error::schedule(
            "RelaxedSize split would change the shape of an I/O variable",
        ));
    }

    let n = shape[dim].as_int();
    let (outer, inner) = match (factor, nparts) {
        (Some(f), _) => {
            let outer = match n {
                Some(n) => Expr::int((n + f - 1).div_euclid(f)),
                None => Expr::ceil_div(shape[dim].clone(), Expr::int(f)),
            };
            (outer, Expr::int(f))
        }
        (None, Some(np)) => {
            let inner = match n {
                Some(n) => Expr::int((n + np - 1).div_euclid(np)),
                None => Expr::ceil_div(shape[dim].clone(), Expr::int(np)),
            };
            (Expr::int(np), inner)
        }
        (None, None) => unreachable!("checked above"),
    };
    // Padding changes the variable's total size
    if atype.is_io() {
        let exact = matches!(
            (n, outer.as_int(), inner.as_int()),
            (Some(n), Some(o), Some(i)) if o * i == n
        );
        if !exact {
            return Err(Error::schedule(
                "splitting an I/O variable requires an exact division",
            ));
        }
    }

    let mut new_shape = shape;
    new_shape.splice(dim..=dim, [outer, inner.clone()]);
    let func = rewrite_def(
        func,
        def,
        new_shape,
        move |mut indices| {
            if dim < indices.len() {
                let idx = indices.remove(dim);
                let o = analyze_linear(&Expr::floor_div(idx.clone(), inner.clone())).to_expr();
                let i = analyze_linear(&Expr::modulo(idx, inner.clone())).to_expr();
                indices.splice(dim..dim, [o, i]);
            }
            indices
        },
        &name,
    )?;
    Ok((func, ()))
}

/// Merge axes `dim` and `dim + 1`.
pub(super) fn var_merge(func: Func, def: &StmtId, dim: usize) -> Result<(Func, ())> {
    let (name, _, shape) = def_header(&func, def)?;
    if dim + 1 >= shape.len() {
        return Err(Error::schedule(format!(
            "cannot merge dimensions {dim} and {} of \"{name}\"",
            dim + 1
        )));
    }
    let inner = shape[dim + 1].clone();
    let merged = analyze_linear(&Expr::mul(shape[dim].clone(), inner.clone())).to_expr();
    let mut new_shape = shape;
    new_shape.splice(dim..=dim + 1, [merged]);
    let func = rewrite_def(
        func,
        def,
        new_shape,
        move |mut indices| {
            if dim + 1 < indices.len() {
                let hi = indices.remove(dim);
                let lo = indices.remove(dim);
                let flat = analyze_linear(&Expr::add(Expr::mul(hi, inner.clone()), lo)).to_expr();
                indices.insert(dim, flat);
            }
            indices
        },
        &name,
    )?;
    Ok((func, ()))
}

/// Permute the axes of a variable.
pub(super) fn var_reorder(func: Func, def: &StmtId, order: &[usize]) -> Result<(Func, ())> {
    let (name, atype, shape) = def_header(&func, def)?;
    if atype.is_io() {
        return Err(Error::schedule(
            "reordering the axes of an I/O variable changes its external layout",
        ));
    }
    let mut check: Vec<usize> = order.to_vec();
    check.sort_unstable();
    if check != (0..shape.len()).collect::<Vec<_>>() {
        return Err(Error::schedule(format!(
            "{order:?} is not a permutation of the {} dimensions of \"{name}\"",
            shape.len()
        )));
    }
    let new_shape: Vec<Expr> = order.iter().map(|&d| shape[d].clone()).collect();
    let order: Vec<usize> = order.to_vec();
    let func = rewrite_def(
        func,
        def,
        new_shape,
        move |indices| order.iter().map(|&d| indices[d].clone()).collect(),
        &name,
    )?;
    Ok((func, ()))
}
