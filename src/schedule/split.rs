//! Loop splitting.

use crate::analyze::find::find_loop;
use crate::error::{Error, Result};
use crate::ir::visit::subst_var;
use crate::ir::{Expr, ForProperty, Func, Stmt, StmtId, StmtKind};

use super::util::rewrite_at;

/// Replace loop `id` with two nested loops whose lengths multiply to cover
/// the original range. `factor` fixes the inner length, `nparts` the outer;
/// `shift` offsets the reconstructed iterator, for aligning tiles.
pub(super) fn split(
    func: Func,
    id: &StmtId,
    factor: Option<i64>,
    nparts: Option<i64>,
    shift: i64,
) -> Result<(Func, (StmtId, StmtId))> {
    find_loop(&func.body, id)?;
    if factor.is_none() && nparts.is_none() {
        return Err(Error::schedule("neither factor nor nparts is specified"));
    }

    let outer_id = id.derived(".0");
    let inner_id = id.derived(".1");
    let (outer_ret, inner_ret) = (outer_id.clone(), inner_id.clone());

    let func = func.map_body(|body| {
        rewrite_at(body, id, |stmt| {
            let StmtKind::For {
                iter,
                begin,
                end: _,
                step,
                len,
                property,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("find_loop returned a non-For"));
            };

            let (outer_len, inner_len) = match (factor, nparts) {
                (Some(f), _) => {
                    let outer = match len.as_int() {
                        Some(n) => Expr::int((n + f - 1).div_euclid(f)),
                        None => Expr::ceil_div(len.clone(), Expr::int(f)),
                    };
                    (outer, Expr::int(f))
                }
                (None, Some(np)) => {
                    let inner = match len.as_int() {
                        Some(n) => Expr::int((n + np - 1).div_euclid(np)),
                        None => Expr::ceil_div(len.clone(), Expr::int(np)),
                    };
                    (Expr::int(np), inner)
                }
                (None, None) => unreachable!("checked above"),
            };

            let outer_iter = format!("{iter}.0");
            let inner_iter = format!("{iter}.1");

            // flat = outer * inner_len + inner - shift
            let flat = Expr::sub(
                Expr::add(
                    Expr::mul(Expr::var(outer_iter.clone()), inner_len.clone()),
                    Expr::var(inner_iter.clone()),
                ),
                Expr::int(shift),
            );
            let value = Expr::add(
                begin.clone(),
                Expr::mul(flat.clone(), step.clone()),
            );
            let value = crate::analyze::linear::analyze_linear(&value).to_expr();

            let exact = shift == 0
                && matches!(
                    (len.as_int(), inner_len.as_int()),
                    (Some(n), Some(il)) if il > 0 && n % il == 0
                );

            let mut inner_body = subst_var(*body, &iter, &value)?;
            if !exact {
                let flat = crate::analyze::linear::analyze_linear(&flat).to_expr();
                inner_body = Stmt::if_then(
                    Expr::land(
                        Expr::ge(flat.clone(), Expr::int(0)),
                        Expr::lt(flat, len.clone()),
                    ),
                    inner_body,
                );
            }

            let inner = Stmt::new(
                inner_id.clone(),
                StmtKind::For {
                    iter: inner_iter,
                    begin: Expr::int(0),
                    end: inner_len.clone(),
                    step: Expr::int(1),
                    len: inner_len,
                    property: ForProperty::new(),
                    body: Box::new(inner_body),
                },
            );
            Ok(Stmt::new(
                outer_id.clone(),
                StmtKind::For {
                    iter: outer_iter,
                    begin: Expr::int(0),
                    end: outer_len.clone(),
                    step: Expr::int(1),
                    len: outer_len,
                    property,
                    body: Box::new(inner),
                },
            ))
        })
    })?;
    Ok((func, (outer_ret, inner_ret)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, DataType, MemType, Tensor};

    fn loop_func(n: i64) -> Func {
        let body = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(n),
            Stmt::store("a", vec![Expr::var("i")], Expr::int(1)),
        )
        .with_id("L".into());
        Func::with_params(
            "f",
            vec![(
                "a".to_string(),
                Buffer::new(
                    Tensor::new(vec![Expr::int(n)], DataType::Float32),
                    AccessType::Output,
                    MemType::Cpu,
                ),
            )],
            body,
        )
    }

    #[test]
    fn test_exact_split_has_no_guard() {
        let (func, (outer, inner)) =
            split(loop_func(1024), &"L".into(), Some(32), None, 0).expect("split");
        assert_eq!(outer.as_str(), "L.0");
        assert_eq!(inner.as_str(), "L.1");
        let text = func.body.pretty_print(0);
        assert!(text.contains("for i.0 in 0..32"), "outer range: {text}");
        assert!(text.contains("for i.1 in 0..32"), "inner range: {text}");
        assert!(!text.contains("if"), "no guard for exact split: {text}");
        // Term order inside the rebuilt index follows atom hashes
        assert!(text.contains("32 * i.0"), "scaled outer term: {text}");
        assert!(text.contains("i.1"), "inner term: {text}");
    }

    #[test]
    fn test_inexact_split_guarded() {
        let (func, _) = split(loop_func(100), &"L".into(), Some(32), None, 0).expect("split");
        let text = func.body.pretty_print(0);
        assert!(text.contains("if"), "guard required: {text}");
    }

    #[test]
    fn test_nparts_fixes_outer() {
        let (func, _) = split(loop_func(1024), &"L".into(), None, Some(4), 0).expect("split");
        let text = func.body.pretty_print(0);
        assert!(text.contains("for i.0 in 0..4"), "outer = nparts: {text}");
        assert!(text.contains("for i.1 in 0..256"), "inner: {text}");
    }

    #[test]
    fn test_missing_arguments_rejected() {
        assert!(split(loop_func(16), &"L".into(), None, None, 0).is_err());
    }
}
