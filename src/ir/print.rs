//! Human-readable rendering of IR trees, used by error messages, schedule
//! logs and tests. Not a code emitter.

use std::fmt;

use crate::ir::{BinaryOp, Expr, Stmt, StmtKind, UnaryOp};

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::RealDiv => "/.",
            BinaryOp::FloorDiv => "//",
            BinaryOp::CeilDiv => "/^",
            BinaryOp::RoundTowards0Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Remainder => "%%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::LAnd => "&&",
            BinaryOp::LOr => "||",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::LNot => "!",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Square => "square",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Abs => "abs",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
        };
        write!(f, "{s}")
    }
}

fn fmt_indices(f: &mut fmt::Formatter<'_>, indices: &[Expr]) -> fmt::Result {
    write!(f, "[")?;
    for (i, idx) in indices.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{idx}")?;
    }
    write!(f, "]")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Load { var, indices } => {
                write!(f, "{var}")?;
                fmt_indices(f, indices)
            }
            Expr::IntConst(v) => write!(f, "{v}"),
            Expr::FloatConst(v) => write!(f, "{v}"),
            Expr::BoolConst(v) => write!(f, "{v}"),
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::Min | BinaryOp::Max => write!(f, "{op}({lhs}, {rhs})"),
                _ => write!(f, "({lhs} {op} {rhs})"),
            },
            Expr::Unary { op, operand } => match op {
                UnaryOp::LNot => write!(f, "!({operand})"),
                _ => write!(f, "{op}({operand})"),
            },
            Expr::IfExpr {
                cond,
                then_case,
                else_case,
            } => write!(f, "({cond} ? {then_case} : {else_case})"),
            Expr::Cast { dtype, operand } => write!(f, "{dtype:?}({operand})"),
            Expr::Intrinsic { format, args, .. } => {
                write!(f, "intrinsic(\"{format}\"")?;
                for a in args {
                    write!(f, ", {a}")?;
                }
                write!(f, ")")
            }
            Expr::Any => write!(f, "<anything>"),
        }
    }
}

impl Stmt {
    /// Render the statement with `indent` levels of two-space indentation.
    pub fn pretty_print(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        match &self.kind {
            StmtKind::StmtSeq { stmts } => {
                let mut out = format!("{pad}{{  # {}\n", self.id);
                for s in stmts {
                    out.push_str(&s.pretty_print(indent + 1));
                }
                out.push_str(&format!("{pad}}}\n"));
                out
            }
            StmtKind::VarDef { name, buffer, .. } => {
                let shape: Vec<String> =
                    buffer.tensor.shape.iter().map(ToString::to_string).collect();
                let mut out = format!(
                    "{pad}{:?} {name}[{}] @{:?}  # {}\n",
                    buffer.tensor.dtype,
                    shape.join(", "),
                    buffer.mtype,
                    self.id
                );
                if let StmtKind::VarDef { body, .. } = &self.kind {
                    out.push_str(&body.pretty_print(indent + 1));
                }
                out
            }
            StmtKind::Store { var, indices, expr } => {
                let idx: Vec<String> = indices.iter().map(ToString::to_string).collect();
                format!("{pad}{var}[{}] = {expr}  # {}\n", idx.join(", "), self.id)
            }
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => {
                let idx: Vec<String> = indices.iter().map(ToString::to_string).collect();
                let marker = if *atomic { " (atomic)" } else { "" };
                format!(
                    "{pad}{var}[{}] {:?}= {expr}{marker}  # {}\n",
                    idx.join(", "),
                    op,
                    self.id
                )
            }
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                property,
                body,
                ..
            } => {
                let mut tags = String::new();
                if property.parallel.is_parallel() {
                    tags.push_str(&format!(" {:?}", property.parallel));
                }
                if property.unroll {
                    tags.push_str(" unroll");
                }
                if property.vectorize {
                    tags.push_str(" vectorize");
                }
                let mut out = format!(
                    "{pad}for {iter} in {begin}..{end} step {step}{tags}  # {}\n",
                    self.id
                );
                out.push_str(&body.pretty_print(indent + 1));
                out
            }
            StmtKind::If {
                cond,
                then_case,
                else_case,
            } => {
                let mut out = format!("{pad}if {cond}  # {}\n", self.id);
                out.push_str(&then_case.pretty_print(indent + 1));
                if let Some(e) = else_case {
                    out.push_str(&format!("{pad}else\n"));
                    out.push_str(&e.pretty_print(indent + 1));
                }
                out
            }
            StmtKind::Assert { cond, body } => {
                let mut out = format!("{pad}assert {cond}  # {}\n", self.id);
                out.push_str(&body.pretty_print(indent + 1));
                out
            }
            StmtKind::Assume { cond, body } => {
                let mut out = format!("{pad}assume {cond}  # {}\n", self.id);
                out.push_str(&body.pretty_print(indent + 1));
                out
            }
            StmtKind::Eval { expr } => format!("{pad}eval {expr}  # {}\n", self.id),
            StmtKind::Any => format!("{pad}<anything>\n"),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty_print(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_display_infix() {
        let e = Expr::add(Expr::mul(Expr::var("i"), Expr::int(4)), Expr::int(1));
        assert_eq!(e.to_string(), "((i * 4) + 1)");
    }

    #[test]
    fn test_load_display() {
        let e = Expr::load("a", vec![Expr::var("i"), Expr::int(0)]);
        assert_eq!(e.to_string(), "a[i, 0]");
    }

    #[test]
    fn test_pretty_print_indents_loop_body() {
        let s = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(4),
            Stmt::store("a", vec![Expr::var("i")], Expr::int(0)),
        );
        let text = s.pretty_print(0);
        assert!(text.contains("for i in 0..4"));
        assert!(text.contains("  a[i] = 0"));
    }
}
