//! Structural queries over a tree: lookup by ID, filtered search, and the
//! definition roster.

use crate::error::{Error, Result};
use crate::ir::{Stmt, StmtId, StmtKind};

/// All statements satisfying `pred`, in pre-order.
///
/// The visitor trait cannot lend references out of the walk, so this is a
/// plain recursion over [`collect_children`].
pub fn find_all<'a>(root: &'a Stmt, pred: &dyn Fn(&Stmt) -> bool) -> Vec<&'a Stmt> {
    fn rec<'a>(stmt: &'a Stmt, pred: &dyn Fn(&Stmt) -> bool, out: &mut Vec<&'a Stmt>) {
        if pred(stmt) {
            out.push(stmt);
        }
        let mut kids = Vec::new();
        collect_children(stmt, &mut kids);
        for k in kids {
            rec(k, pred, out);
        }
    }
    let mut out = Vec::new();
    rec(root, pred, &mut out);
    out
}

/// Direct child statements of `stmt`.
pub fn collect_children<'a>(stmt: &'a Stmt, out: &mut Vec<&'a Stmt>) {
    match &stmt.kind {
        StmtKind::StmtSeq { stmts } => out.extend(stmts.iter()),
        StmtKind::VarDef { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Assert { body, .. }
        | StmtKind::Assume { body, .. } => out.push(body),
        StmtKind::If {
            then_case,
            else_case,
            ..
        } => {
            out.push(then_case);
            if let Some(e) = else_case {
                out.push(e);
            }
        }
        _ => {}
    }
}

/// The unique statement satisfying `pred`; zero or several matches is an
/// [`Error::UnexpectedQuery`].
pub fn find_one<'a>(root: &'a Stmt, pred: &dyn Fn(&Stmt) -> bool) -> Result<&'a Stmt> {
    let matches = find_all(root, pred);
    match matches.as_slice() {
        [one] => Ok(one),
        [] => Err(Error::query("find: no statement matches")),
        many => Err(Error::query(format!(
            "find: {} statements match, expected exactly 1",
            many.len()
        ))),
    }
}

/// Statement with the given ID.
pub fn find_stmt<'a>(root: &'a Stmt, id: &StmtId) -> Result<&'a Stmt> {
    find_all(root, &|s| s.id == *id)
        .into_iter()
        .next()
        .ok_or_else(|| Error::query(format!("statement {id} not found")))
}

/// The `For` with the given ID, or a query error naming what was there.
pub fn find_loop<'a>(root: &'a Stmt, id: &StmtId) -> Result<&'a Stmt> {
    let stmt = find_stmt(root, id)?;
    if stmt.is_for() {
        Ok(stmt)
    } else {
        Err(Error::query(format!("statement {id} is not a For loop")))
    }
}

/// IDs of ancestors of `id`, outermost first, excluding `id` itself.
pub fn ancestors(root: &Stmt, id: &StmtId) -> Result<Vec<StmtId>> {
    fn rec(stmt: &Stmt, target: &StmtId, path: &mut Vec<StmtId>) -> bool {
        if stmt.id == *target {
            return true;
        }
        path.push(stmt.id.clone());
        let mut kids = Vec::new();
        collect_children(stmt, &mut kids);
        for k in kids {
            if rec(k, target, path) {
                return true;
            }
        }
        path.pop();
        false
    }
    let mut path = Vec::new();
    if rec(root, id, &mut path) {
        Ok(path)
    } else {
        Err(Error::query(format!("statement {id} not found")))
    }
}

/// Whether `anc` encloses `desc` (strictly).
pub fn is_ancestor(root: &Stmt, anc: &StmtId, desc: &StmtId) -> bool {
    ancestors(root, desc).map_or(false, |path| path.contains(anc))
}

/// Every `VarDef` in the tree as `(id, name)`, in pre-order.
pub fn all_defs(root: &Stmt) -> Vec<(StmtId, String)> {
    find_all(root, &|s| s.is_var_def())
        .into_iter()
        .map(|s| match &s.kind {
            StmtKind::VarDef { name, .. } => (s.id.clone(), name.clone()),
            _ => unreachable!("filtered to VarDef"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, DataType, Expr, MemType, Tensor};

    fn sample() -> (Stmt, StmtId, StmtId) {
        let store = Stmt::store("a", vec![Expr::var("i")], Expr::int(0));
        let store_id = store.id.clone();
        let inner = Stmt::for_range("i", Expr::int(0), Expr::int(4), store);
        let def = Stmt::var_def(
            "a",
            Buffer::new(
                Tensor::new(vec![Expr::int(4)], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            inner,
        );
        let def_id = def.id.clone();
        (def, def_id, store_id)
    }

    #[test]
    fn test_find_stmt_and_ancestors() {
        let (root, def_id, store_id) = sample();
        assert!(find_stmt(&root, &store_id).is_ok());
        let path = ancestors(&root, &store_id).expect("path");
        assert_eq!(path.first(), Some(&def_id));
        assert!(is_ancestor(&root, &def_id, &store_id));
        assert!(!is_ancestor(&root, &store_id, &def_id));
    }

    #[test]
    fn test_find_one_rejects_ambiguity() {
        let (root, ..) = sample();
        assert!(matches!(
            find_one(&root, &|s| s.is_for() || s.is_var_def()),
            Err(Error::UnexpectedQuery { .. })
        ));
        assert!(find_one(&root, &Stmt::is_for).is_ok());
    }

    #[test]
    fn test_all_defs_lists_names() {
        let (root, def_id, _) = sample();
        let defs = all_defs(&root);
        assert_eq!(defs, vec![(def_id, "a".to_string())]);
    }

    #[test]
    fn test_find_loop_type_checks() {
        let (root, def_id, _) = sample();
        assert!(matches!(
            find_loop(&root, &def_id),
            Err(Error::UnexpectedQuery { .. })
        ));
    }
}
