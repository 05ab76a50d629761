//! Structural hashing and equality.
//!
//! Produces a 64-bit digest of a tree that ignores statement IDs. By default
//! names matter; [`HashOptions::modulo_iter_names`] hashes bound loop
//! iterators by their de Bruijn position instead, so alpha-equivalent nests
//! collide.
//!
//! The digest is a fast filter, not a proof: [`struct_eq_stmt`] compares
//! digests first and falls back to full structural comparison.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::ir::{Expr, Stmt, StmtKind};

/// Hashing behavior knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashOptions {
    /// Hash bound `For` iterators by nesting depth rather than by name.
    pub modulo_iter_names: bool,
}

struct StructHasher {
    opts: HashOptions,
    /// Innermost-last stack of bound iterator names
    iter_stack: Vec<String>,
}

impl StructHasher {
    fn new(opts: HashOptions) -> Self {
        StructHasher {
            opts,
            iter_stack: Vec::new(),
        }
    }

    fn hash_name(&self, name: &str, state: &mut DefaultHasher) {
        if self.opts.modulo_iter_names {
            if let Some(pos) = self.iter_stack.iter().rposition(|n| n == name) {
                state.write_u8(0xB1);
                state.write_usize(self.iter_stack.len() - pos);
                return;
            }
        }
        state.write_u8(0xB0);
        name.hash(state);
    }

    fn hash_exprs(&mut self, exprs: &[Expr], state: &mut DefaultHasher) {
        state.write_usize(exprs.len());
        for e in exprs {
            state.write_u64(self.expr(e));
        }
    }

    fn expr(&mut self, expr: &Expr) -> u64 {
        let mut state = DefaultHasher::new();
        match expr {
            Expr::Var(name) => {
                state.write_u8(1);
                self.hash_name(name, &mut state);
            }
            Expr::Load { var, indices } => {
                state.write_u8(2);
                var.hash(&mut state);
                self.hash_exprs(indices, &mut state);
            }
            Expr::IntConst(v) => {
                state.write_u8(3);
                v.hash(&mut state);
            }
            Expr::FloatConst(v) => {
                state.write_u8(4);
                v.to_bits().hash(&mut state);
            }
            Expr::BoolConst(v) => {
                state.write_u8(5);
                v.hash(&mut state);
            }
            Expr::Binary { op, lhs, rhs } => {
                state.write_u8(6);
                op.hash(&mut state);
                state.write_u64(self.expr(lhs));
                state.write_u64(self.expr(rhs));
            }
            Expr::Unary { op, operand } => {
                state.write_u8(7);
                op.hash(&mut state);
                state.write_u64(self.expr(operand));
            }
            Expr::IfExpr {
                cond,
                then_case,
                else_case,
            } => {
                state.write_u8(8);
                state.write_u64(self.expr(cond));
                state.write_u64(self.expr(then_case));
                state.write_u64(self.expr(else_case));
            }
            Expr::Cast { dtype, operand } => {
                state.write_u8(9);
                dtype.hash(&mut state);
                state.write_u64(self.expr(operand));
            }
            Expr::Intrinsic {
                format,
                args,
                ret_type,
            } => {
                state.write_u8(10);
                format.hash(&mut state);
                ret_type.hash(&mut state);
                self.hash_exprs(args, &mut state);
            }
            Expr::Any => state.write_u8(11),
        }
        state.finish()
    }

    fn stmt(&mut self, stmt: &Stmt) -> u64 {
        let mut state = DefaultHasher::new();
        match &stmt.kind {
            StmtKind::StmtSeq { stmts } => {
                state.write_u8(20);
                state.write_usize(stmts.len());
                for s in stmts {
                    state.write_u64(self.stmt(s));
                }
            }
            StmtKind::VarDef {
                name,
                buffer,
                pinned,
                body,
            } => {
                state.write_u8(21);
                name.hash(&mut state);
                buffer.atype.hash(&mut state);
                buffer.mtype.hash(&mut state);
                buffer.tensor.dtype.hash(&mut state);
                pinned.hash(&mut state);
                self.hash_exprs(&buffer.tensor.shape, &mut state);
                state.write_u64(self.stmt(body));
            }
            StmtKind::Store { var, indices, expr } => {
                state.write_u8(22);
                var.hash(&mut state);
                self.hash_exprs(indices, &mut state);
                state.write_u64(self.expr(expr));
            }
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => {
                state.write_u8(23);
                var.hash(&mut state);
                op.hash(&mut state);
                atomic.hash(&mut state);
                self.hash_exprs(indices, &mut state);
                state.write_u64(self.expr(expr));
            }
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                property,
                body,
            } => {
                state.write_u8(24);
                state.write_u64(self.expr(begin));
                state.write_u64(self.expr(end));
                state.write_u64(self.expr(step));
                state.write_u64(self.expr(len));
                property.parallel.hash(&mut state);
                property.unroll.hash(&mut state);
                property.vectorize.hash(&mut state);
                self.iter_stack.push(iter.clone());
                if !self.opts.modulo_iter_names {
                    iter.hash(&mut state);
                }
                state.write_u64(self.stmt(body));
                self.iter_stack.pop();
            }
            StmtKind::If {
                cond,
                then_case,
                else_case,
            } => {
                state.write_u8(25);
                state.write_u64(self.expr(cond));
                state.write_u64(self.stmt(then_case));
                if let Some(e) = else_case {
                    state.write_u64(self.stmt(e));
                }
            }
            StmtKind::Assert { cond, body } => {
                state.write_u8(26);
                state.write_u64(self.expr(cond));
                state.write_u64(self.stmt(body));
            }
            StmtKind::Assume { cond, body } => {
                state.write_u8(27);
                state.write_u64(self.expr(cond));
                state.write_u64(self.stmt(body));
            }
            StmtKind::Eval { expr } => {
                state.write_u8(28);
                state.write_u64(self.expr(expr));
            }
            StmtKind::Any => state.write_u8(29),
        }
        state.finish()
    }
}

/// Structural hash of an expression, names included.
pub fn hash_expr(expr: &Expr) -> u64 {
    StructHasher::new(HashOptions::default()).expr(expr)
}

/// Structural hash of a statement tree, names included, IDs ignored.
pub fn hash_stmt(stmt: &Stmt) -> u64 {
    StructHasher::new(HashOptions::default()).stmt(stmt)
}

/// Structural hash with explicit options.
pub fn hash_stmt_with(stmt: &Stmt, opts: HashOptions) -> u64 {
    StructHasher::new(opts).stmt(stmt)
}

/// Digest-then-structure equality of expressions.
pub fn struct_eq_expr(a: &Expr, b: &Expr) -> bool {
    hash_expr(a) == hash_expr(b) && a == b
}

/// Digest-then-structure equality of statements (IDs ignored).
pub fn struct_eq_stmt(a: &Stmt, b: &Stmt) -> bool {
    hash_stmt(a) == hash_stmt(b) && a == b
}
