//! Scope environment threaded through traversals.
//!
//! Replaces the classic symbol-table mixin with composition: a pass that
//! needs name resolution owns a `ScopeEnv`, pushes on entering a `VarDef` or
//! `For` and pops on the way out. Pushing rejects shadowing, which enforces
//! the unique-names-per-scope invariant at the point of violation.
//!
//! `VarDef` and `For` snapshots are stored by value (minus bodies they would
//! duplicate), so lookups stay valid while the tree is being rebuilt.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::ir::{Buffer, Expr, ForProperty, Stmt, StmtId, StmtKind};

/// Snapshot of a `VarDef` header.
#[derive(Debug, Clone)]
pub struct DefInfo {
    pub id: StmtId,
    pub name: String,
    pub buffer: Buffer,
    pub pinned: bool,
}

/// Snapshot of a `For` header.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub id: StmtId,
    pub iter: String,
    pub begin: Expr,
    pub end: Expr,
    pub step: Expr,
    pub len: Expr,
    pub property: ForProperty,
}

/// Name-to-definition environment for one walk of the tree.
#[derive(Debug, Clone, Default)]
pub struct ScopeEnv {
    defs: HashMap<String, DefInfo>,
    loops: HashMap<String, LoopInfo>,
    /// Loop iterators in nesting order, outermost first
    loop_stack: Vec<String>,
    names: HashSet<String>,
}

impl ScopeEnv {
    pub fn new() -> Self {
        ScopeEnv::default()
    }

    /// All names currently in scope (variables and iterators).
    pub fn names(&self) -> &HashSet<String> {
        &self.names
    }

    pub fn has_def(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn def(&self, name: &str) -> Result<&DefInfo> {
        self.defs
            .get(name)
            .ok_or_else(|| Error::program(format!("Variable \"{name}\" is not defined here")))
    }

    pub fn buffer(&self, name: &str) -> Result<&Buffer> {
        Ok(&self.def(name)?.buffer)
    }

    pub fn has_loop(&self, iter: &str) -> bool {
        self.loops.contains_key(iter)
    }

    pub fn loop_(&self, iter: &str) -> Result<&LoopInfo> {
        self.loops
            .get(iter)
            .ok_or_else(|| Error::program(format!("Iterator \"{iter}\" is not defined here")))
    }

    /// Enclosing loop iterators, outermost first.
    pub fn loop_stack(&self) -> &[String] {
        &self.loop_stack
    }

    pub fn push_def(&mut self, stmt: &Stmt) -> Result<()> {
        let StmtKind::VarDef {
            name,
            buffer,
            pinned,
            ..
        } = &stmt.kind
        else {
            return Err(Error::internal("push_def on a non-VarDef statement"));
        };
        if self.names.contains(name) {
            return Err(Error::program(format!(
                "Nested VarDef with the same name \"{name}\" is not allowed"
            )));
        }
        self.names.insert(name.clone());
        self.defs.insert(
            name.clone(),
            DefInfo {
                id: stmt.id.clone(),
                name: name.clone(),
                buffer: buffer.clone(),
                pinned: *pinned,
            },
        );
        Ok(())
    }

    pub fn pop_def(&mut self, name: &str) {
        self.defs.remove(name);
        self.names.remove(name);
    }

    pub fn push_for(&mut self, stmt: &Stmt) -> Result<()> {
        let StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            property,
            ..
        } = &stmt.kind
        else {
            return Err(Error::internal("push_for on a non-For statement"));
        };
        if self.names.contains(iter) {
            return Err(Error::program(format!(
                "Nested For with the same iterator \"{iter}\" is not allowed"
            )));
        }
        self.names.insert(iter.clone());
        self.loop_stack.push(iter.clone());
        self.loops.insert(
            iter.clone(),
            LoopInfo {
                id: stmt.id.clone(),
                iter: iter.clone(),
                begin: begin.clone(),
                end: end.clone(),
                step: step.clone(),
                len: len.clone(),
                property: property.clone(),
            },
        );
        Ok(())
    }

    pub fn pop_for(&mut self, iter: &str) {
        self.loops.remove(iter);
        self.names.remove(iter);
        if self.loop_stack.last().map(String::as_str) == Some(iter) {
            self.loop_stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, DataType, MemType, Tensor};

    fn var_def(name: &str) -> Stmt {
        Stmt::var_def(
            name,
            Buffer::new(
                Tensor::new(vec![Expr::int(8)], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            Stmt::seq(vec![]),
        )
    }

    fn for_loop(iter: &str) -> Stmt {
        Stmt::for_range(iter, Expr::int(0), Expr::int(4), Stmt::seq(vec![]))
    }

    #[test]
    fn test_def_lookup() {
        let mut env = ScopeEnv::new();
        let d = var_def("t");
        env.push_def(&d).expect("push");
        assert!(env.has_def("t"));
        assert_eq!(env.buffer("t").expect("buffer").tensor.ndim(), 1);
        env.pop_def("t");
        assert!(!env.has_def("t"));
    }

    #[test]
    fn test_nested_same_name_def_rejected() {
        let mut env = ScopeEnv::new();
        env.push_def(&var_def("t")).expect("first push");
        let err = env.push_def(&var_def("t")).expect_err("second push");
        assert!(matches!(err, Error::InvalidProgram { .. }));
    }

    #[test]
    fn test_iterator_shadowing_rejected() {
        let mut env = ScopeEnv::new();
        env.push_for(&for_loop("i")).expect("first push");
        let err = env.push_for(&for_loop("i")).expect_err("second push");
        assert!(matches!(err, Error::InvalidProgram { .. }));
        env.pop_for("i");
        env.push_for(&for_loop("i")).expect("push after pop");
    }

    #[test]
    fn test_var_and_iter_share_namespace() {
        let mut env = ScopeEnv::new();
        env.push_def(&var_def("x")).expect("push def");
        let err = env.push_for(&for_loop("x")).expect_err("push for");
        assert!(matches!(err, Error::InvalidProgram { .. }));
    }

    #[test]
    fn test_loop_stack_order() {
        let mut env = ScopeEnv::new();
        env.push_for(&for_loop("i")).expect("push i");
        env.push_for(&for_loop("j")).expect("push j");
        assert_eq!(env.loop_stack(), ["i".to_string(), "j".to_string()]);
        env.pop_for("j");
        assert_eq!(env.loop_stack(), ["i".to_string()]);
    }
}
