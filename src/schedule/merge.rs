//! Loop merging.

use crate::analyze::find::{find_loop, find_stmt};
use crate::analyze::linear::analyze_linear;
use crate::error::{Error, Result};
use crate::ir::visit::subst_var;
use crate::ir::{Expr, Func, Stmt, StmtId, StmtKind};

use super::util::rewrite_at;

/// Merge two perfectly nested loops into one loop over the product range.
/// Iterators are remapped by division and modulo against the inner length.
pub(super) fn merge(func: Func, loop1: &StmtId, loop2: &StmtId) -> Result<(Func, StmtId)> {
    find_loop(&func.body, loop1)?;
    find_loop(&func.body, loop2)?;
    let merged_id = StmtId::named(format!("merged.{loop1}.{loop2}"));
    let ret = merged_id.clone();

    let func = func.map_body(|body| {
        rewrite_at(body, loop1, |outer| {
            let StmtKind::For {
                iter: iter0,
                begin: begin0,
                step: step0,
                len: len0,
                property: property0,
                body: outer_body,
                ..
            } = outer.kind
            else {
                return Err(Error::internal("find_loop returned a non-For"));
            };

            // The inner loop must be the whole body of the outer
            let direct: Stmt = match outer_body.kind {
                StmtKind::StmtSeq { mut stmts } if stmts.len() == 1 => stmts.remove(0),
                other => Stmt::new(outer_body.id, other),
            };
            if direct.id != *loop2 {
                return Err(Error::schedule(format!(
                    "{loop2} is not perfectly nested inside {loop1}"
                )));
            }
            let StmtKind::For {
                iter: iter1,
                begin: begin1,
                step: step1,
                len: len1,
                body: inner_body,
                ..
            } = direct.kind
            else {
                return Err(Error::internal("inner statement is not a For"));
            };

            let merged_iter = format!("{iter0}.{iter1}");
            let m = Expr::var(merged_iter.clone());
            let value0 = Expr::add(
                begin0,
                Expr::mul(Expr::floor_div(m.clone(), len1.clone()), step0),
            );
            let value1 = Expr::add(
                begin1,
                Expr::mul(Expr::modulo(m, len1.clone()), step1),
            );

            let body = subst_var(*inner_body, &iter0, &value0)?;
            let body = subst_var(body, &iter1, &value1)?;

            let merged_len = analyze_linear(&Expr::mul(len0, len1)).to_expr();
            Ok(Stmt::new(
                merged_id.clone(),
                StmtKind::For {
                    iter: merged_iter,
                    begin: Expr::int(0),
                    end: merged_len.clone(),
                    step: Expr::int(1),
                    len: merged_len,
                    property: property0,
                    body: Box::new(body),
                },
            ))
        })
    })?;

    // loop2 is consumed by the rewrite; double-check it did not survive
    // somewhere else (it would mean the IDs were not actually nested).
    if find_stmt(&func.body, loop2).is_ok() {
        return Err(Error::internal(format!(
            "loop {loop2} survived its own merge"
        )));
    }
    Ok((func, ret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, DataType, MemType, Tensor};

    fn nest_func() -> Func {
        let store = Stmt::store(
            "a",
            vec![Expr::var("i"), Expr::var("j")],
            Expr::int(1),
        );
        let inner = Stmt::for_range("j", Expr::int(0), Expr::int(8), store).with_id("Lj".into());
        let outer = Stmt::for_range("i", Expr::int(0), Expr::int(4), inner).with_id("Li".into());
        Func::with_params(
            "f",
            vec![(
                "a".to_string(),
                Buffer::new(
                    Tensor::new(vec![Expr::int(4), Expr::int(8)], DataType::Float32),
                    AccessType::Output,
                    MemType::Cpu,
                ),
            )],
            outer,
        )
    }

    #[test]
    fn test_merge_remaps_iterators() {
        let (func, merged) = merge(nest_func(), &"Li".into(), &"Lj".into()).expect("merge");
        assert_eq!(merged.as_str(), "merged.Li.Lj");
        let text = func.body.pretty_print(0);
        assert!(text.contains("for i.j in 0..32"), "product range: {text}");
        assert!(text.contains("(i.j // 8)"), "outer remap: {text}");
        assert!(text.contains("(i.j % 8)"), "inner remap: {text}");
    }

    #[test]
    fn test_non_nested_rejected() {
        let store = Stmt::store("a", vec![Expr::var("i"), Expr::int(0)], Expr::int(1));
        let lone = Stmt::for_range("i", Expr::int(0), Expr::int(4), store).with_id("Li".into());
        let func = Func::with_params(
            "f",
            vec![(
                "a".to_string(),
                Buffer::new(
                    Tensor::new(vec![Expr::int(4), Expr::int(8)], DataType::Float32),
                    AccessType::Output,
                    MemType::Cpu,
                ),
            )],
            lone,
        );
        assert!(merge(func, &"Li".into(), &"Lj".into()).is_err());
    }
}
