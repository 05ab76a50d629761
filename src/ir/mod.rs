//! # Tensor Program IR
//!
//! The typed Statement/Expression tree every other stage operates on.
//!
//! ```text
//! Func (name, params, buffer table)
//!   └── Stmt  (StmtSeq | VarDef | Store | ReduceTo | For | If | ...)
//!         └── Expr (Var | Load | constants | Binary | Unary | ...)
//! ```
//!
//! The tree is plain owned data: passes consume a tree and return a new one,
//! and no node stores a parent pointer. Ancestry, scoping and bounds are
//! recomputed by traversal (see [`visit`] and [`crate::scope`]).
//!
//! Statement identity lives in [`StmtId`]: stable across rewrites unless a
//! transformation explicitly renames (splitting appends `.0`/`.1`, fission
//! appends suffixes chosen by the caller). Structural equality and hashing
//! deliberately ignore IDs; see [`hash`].

pub mod hash;
pub mod id;
mod print;
pub mod visit;

pub use id::StmtId;

use serde::{Deserialize, Serialize};

// ============================================================================
// Scalars, buffers, tensors
// ============================================================================

/// Scalar element type of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int32,
    Float32,
    Float64,
    Bool,
    /// An opaque target-defined type, carried by name.
    Custom(String),
}

impl DataType {
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, DataType::Int32)
    }
}

/// How a variable is used externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// Read-only argument
    Input,
    /// Write-only result
    Output,
    /// Read-write argument
    InOut,
    /// Local to the function
    Cache,
}

impl AccessType {
    /// Input/Output/InOut variables belong to the caller: their shape and
    /// layout must not be changed by any pass or schedule.
    pub fn is_io(self) -> bool {
        !matches!(self, AccessType::Cache)
    }
}

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemType {
    /// Scalar passed by value
    ByValue,
    /// Main memory
    Cpu,
    /// GPU global memory
    GpuGlobal,
    /// GPU shared memory, per thread block
    GpuShared,
    /// GPU registers or local memory, per thread
    GpuLocal,
}

impl MemType {
    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            MemType::GpuGlobal | MemType::GpuShared | MemType::GpuLocal
        )
    }
}

/// A shape (per-dimension length expressions) plus a scalar type.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<Expr>,
    pub dtype: DataType,
}

impl Tensor {
    pub fn new(shape: Vec<Expr>, dtype: DataType) -> Self {
        Tensor { shape, dtype }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

/// A tensor plus how and where it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub tensor: Tensor,
    pub atype: AccessType,
    pub mtype: MemType,
}

impl Buffer {
    pub fn new(tensor: Tensor, atype: AccessType, mtype: MemType) -> Self {
        Buffer {
            tensor,
            atype,
            mtype,
        }
    }
}

// ============================================================================
// Loop properties
// ============================================================================

/// GPU grid/block axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CudaDim {
    X,
    Y,
    Z,
}

/// Execution model of a `For` loop. These tags are data in the IR; the
/// compiler itself stays single-threaded (the emitter realizes them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ParallelScope {
    #[default]
    Serial,
    /// CPU worksharing loop
    OpenMp,
    /// `blockIdx.{x,y,z}`
    CudaBlock(CudaDim),
    /// `threadIdx.{x,y,z}`
    CudaThread(CudaDim),
    /// Logical thread unrolled over registers
    VirtualThread,
}

impl ParallelScope {
    pub fn is_serial(self) -> bool {
        matches!(self, ParallelScope::Serial)
    }

    pub fn is_parallel(self) -> bool {
        !self.is_serial()
    }

    pub fn is_cuda_block(self) -> bool {
        matches!(self, ParallelScope::CudaBlock(_))
    }

    pub fn is_cuda_thread(self) -> bool {
        matches!(self, ParallelScope::CudaThread(_))
    }

    pub fn is_gpu(self) -> bool {
        self.is_cuda_block() || self.is_cuda_thread()
    }
}

/// Associative operator of a `ReduceTo` update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Add,
    Mul,
    Min,
    Max,
    LAnd,
    LOr,
}

impl ReduceOp {
    /// Identity element of the operator, typed for `dtype`.
    pub fn neutral(self, dtype: &DataType) -> Expr {
        match self {
            ReduceOp::Add => {
                if dtype.is_float() {
                    Expr::FloatConst(0.0)
                } else {
                    Expr::IntConst(0)
                }
            }
            ReduceOp::Mul => {
                if dtype.is_float() {
                    Expr::FloatConst(1.0)
                } else {
                    Expr::IntConst(1)
                }
            }
            ReduceOp::Min => {
                if dtype.is_float() {
                    Expr::FloatConst(f64::INFINITY)
                } else {
                    Expr::IntConst(i64::from(i32::MAX))
                }
            }
            ReduceOp::Max => {
                if dtype.is_float() {
                    Expr::FloatConst(f64::NEG_INFINITY)
                } else {
                    Expr::IntConst(i64::from(i32::MIN))
                }
            }
            ReduceOp::LAnd => Expr::BoolConst(true),
            ReduceOp::LOr => Expr::BoolConst(false),
        }
    }

    /// The binary operator that folds one more value into the accumulator.
    pub fn to_binary(self) -> BinaryOp {
        match self {
            ReduceOp::Add => BinaryOp::Add,
            ReduceOp::Mul => BinaryOp::Mul,
            ReduceOp::Min => BinaryOp::Min,
            ReduceOp::Max => BinaryOp::Max,
            ReduceOp::LAnd => BinaryOp::LAnd,
            ReduceOp::LOr => BinaryOp::LOr,
        }
    }
}

/// A reduction carried by a parallel loop: operator, target variable and the
/// per-dimension index ranges the loop reduces into.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionItem {
    pub op: ReduceOp,
    pub var: String,
    pub begins: Vec<Expr>,
    pub ends: Vec<Expr>,
}

/// Property bag of a `For` loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForProperty {
    pub parallel: ParallelScope,
    pub unroll: bool,
    pub vectorize: bool,
    /// Aggressively transform to external library calls in auto-schedule
    pub prefer_libs: bool,
    pub reductions: Vec<ReductionItem>,
    /// Variables explicitly declared independent across iterations
    pub no_deps: Vec<String>,
}

impl ForProperty {
    pub fn new() -> Self {
        ForProperty::default()
    }

    pub fn with_parallel(mut self, parallel: ParallelScope) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_unroll(mut self) -> Self {
        self.unroll = true;
        self
    }

    pub fn with_vectorize(mut self) -> Self {
        self.vectorize = true;
        self
    }

    pub fn with_no_deps(mut self, no_deps: Vec<String>) -> Self {
        self.no_deps = no_deps;
        self
    }

    pub fn with_prefer_libs(mut self) -> Self {
        self.prefer_libs = true;
        self
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Exact division, floating point
    RealDiv,
    /// Integer division rounding towards negative infinity
    FloorDiv,
    /// Integer division rounding towards positive infinity
    CeilDiv,
    /// Integer division rounding towards zero (native `/` on most targets)
    RoundTowards0Div,
    /// Modulo paired with `FloorDiv` (result has the divisor's sign)
    Mod,
    /// Remainder paired with `RoundTowards0Div`
    Remainder,
    Min,
    Max,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    LAnd,
    LOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_div(self) -> bool {
        matches!(
            self,
            BinaryOp::RealDiv | BinaryOp::FloorDiv | BinaryOp::CeilDiv | BinaryOp::RoundTowards0Div
        )
    }
}

/// Unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    LNot,
    Sqrt,
    Exp,
    Square,
    Sigmoid,
    Tanh,
    Abs,
    Floor,
    Ceil,
}

/// Expression node.
///
/// Derived analysis attributes (hashes, linear forms, bounds) are not stored
/// on the node; they are recomputed by the analyses in [`crate::analyze`],
/// which keeps every rewrite trivially cache-coherent.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to a loop iterator or scalar parameter
    Var(String),
    /// Memory read `var[indices...]`
    Load { var: String, indices: Vec<Expr> },
    IntConst(i64),
    FloatConst(f64),
    BoolConst(bool),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Ternary `cond ? then_case : else_case`
    IfExpr {
        cond: Box<Expr>,
        then_case: Box<Expr>,
        else_case: Box<Expr>,
    },
    Cast {
        dtype: DataType,
        operand: Box<Expr>,
    },
    /// Target-specific builtin: a format template (`%` placeholders filled
    /// with the rendered arguments, in order) plus the result type.
    Intrinsic {
        format: String,
        args: Vec<Expr>,
        ret_type: DataType,
    },
    /// Wildcard matching any expression, used by pattern queries
    Any,
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn load(var: impl Into<String>, indices: Vec<Expr>) -> Expr {
        Expr::Load {
            var: var.into(),
            indices,
        }
    }

    pub fn int(val: i64) -> Expr {
        Expr::IntConst(val)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn floor_div(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::FloorDiv, lhs, rhs)
    }

    pub fn ceil_div(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::CeilDiv, lhs, rhs)
    }

    pub fn modulo(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mod, lhs, rhs)
    }

    pub fn min(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Min, lhs, rhs)
    }

    pub fn max(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Max, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, lhs, rhs)
    }

    pub fn le(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Le, lhs, rhs)
    }

    pub fn ge(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Ge, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn land(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::LAnd, lhs, rhs)
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn if_expr(cond: Expr, then_case: Expr, else_case: Expr) -> Expr {
        Expr::IfExpr {
            cond: Box::new(cond),
            then_case: Box::new(then_case),
            else_case: Box::new(else_case),
        }
    }

    pub fn cast(dtype: DataType, operand: Expr) -> Expr {
        Expr::Cast {
            dtype,
            operand: Box::new(operand),
        }
    }

    pub fn intrinsic(format: impl Into<String>, args: Vec<Expr>, ret_type: DataType) -> Expr {
        Expr::Intrinsic {
            format: format.into(),
            args,
            ret_type,
        }
    }

    /// The constant value if this is an `IntConst`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::IntConst(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Expr::IntConst(_) | Expr::FloatConst(_) | Expr::BoolConst(_)
        )
    }

    /// Number of nodes in this expression, used to rank "simplest".
    pub fn size(&self) -> usize {
        let mut count = 0usize;
        visit::walk_expr_pre(self, &mut |_| count += 1);
        count
    }
}

// ============================================================================
// Statements
// ============================================================================

/// A statement node: stable [`StmtId`] plus the kind payload.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: StmtId,
    pub kind: StmtKind,
}

/// Statement kind payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Ordered sequence of statements
    StmtSeq { stmts: Vec<Stmt> },

    /// Variable definition; the buffer lives exactly as long as `body`
    VarDef {
        name: String,
        buffer: Buffer,
        /// Pinned variables keep their shape through shrinking passes
        pinned: bool,
        body: Box<Stmt>,
    },

    /// `var[indices...] = expr`
    Store {
        var: String,
        indices: Vec<Expr>,
        expr: Expr,
    },

    /// Associative in-place update `var[indices...] ⊕= expr`
    ReduceTo {
        var: String,
        indices: Vec<Expr>,
        op: ReduceOp,
        expr: Expr,
        /// Lowered to an atomic RMW when a race-free loop-carried reduction
        /// cannot be formed
        atomic: bool,
    },

    /// Counted loop; `len` caches `(end - begin) / step`
    For {
        iter: String,
        begin: Expr,
        end: Expr,
        step: Expr,
        len: Expr,
        property: ForProperty,
        body: Box<Stmt>,
    },

    If {
        cond: Expr,
        then_case: Box<Stmt>,
        else_case: Option<Box<Stmt>>,
    },

    /// Checked predicate: must hold, and may be assumed below
    Assert { cond: Expr, body: Box<Stmt> },

    /// Unchecked predicate: assumed to hold below
    Assume { cond: Expr, body: Box<Stmt> },

    /// Evaluate an expression for its side effects (intrinsics)
    Eval { expr: Expr },

    /// Wildcard matching any statement, used by pattern queries
    Any,
}

// Statement equality is structural: IDs are identity, not content. Deriving
// PartialEq on StmtKind recurses through this impl, so nested IDs are
// ignored as well.
impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Stmt {
    pub fn new(id: StmtId, kind: StmtKind) -> Self {
        Stmt { id, kind }
    }

    /// Build a node with a fresh synthetic ID.
    pub fn fresh(kind: StmtKind) -> Self {
        Stmt {
            id: StmtId::fresh(),
            kind,
        }
    }

    pub fn seq(stmts: Vec<Stmt>) -> Self {
        Stmt::fresh(StmtKind::StmtSeq { stmts })
    }

    pub fn var_def(name: impl Into<String>, buffer: Buffer, body: Stmt) -> Self {
        Stmt::fresh(StmtKind::VarDef {
            name: name.into(),
            buffer,
            pinned: false,
            body: Box::new(body),
        })
    }

    pub fn store(var: impl Into<String>, indices: Vec<Expr>, expr: Expr) -> Self {
        Stmt::fresh(StmtKind::Store {
            var: var.into(),
            indices,
            expr,
        })
    }

    pub fn reduce_to(var: impl Into<String>, indices: Vec<Expr>, op: ReduceOp, expr: Expr) -> Self {
        Stmt::fresh(StmtKind::ReduceTo {
            var: var.into(),
            indices,
            op,
            expr,
            atomic: false,
        })
    }

    /// Build a unit-step loop over `begin..end`.
    pub fn for_range(iter: impl Into<String>, begin: Expr, end: Expr, body: Stmt) -> Self {
        let len = match (begin.as_int(), end.as_int()) {
            (Some(b), Some(e)) => Expr::int(e - b),
            _ => Expr::sub(end.clone(), begin.clone()),
        };
        Stmt::fresh(StmtKind::For {
            iter: iter.into(),
            begin,
            end,
            step: Expr::int(1),
            len,
            property: ForProperty::new(),
            body: Box::new(body),
        })
    }

    pub fn if_then(cond: Expr, then_case: Stmt) -> Self {
        Stmt::fresh(StmtKind::If {
            cond,
            then_case: Box::new(then_case),
            else_case: None,
        })
    }

    pub fn if_then_else(cond: Expr, then_case: Stmt, else_case: Stmt) -> Self {
        Stmt::fresh(StmtKind::If {
            cond,
            then_case: Box::new(then_case),
            else_case: Some(Box::new(else_case)),
        })
    }

    pub fn assert_(cond: Expr, body: Stmt) -> Self {
        Stmt::fresh(StmtKind::Assert {
            cond,
            body: Box::new(body),
        })
    }

    pub fn assume(cond: Expr, body: Stmt) -> Self {
        Stmt::fresh(StmtKind::Assume {
            cond,
            body: Box::new(body),
        })
    }

    pub fn eval(expr: Expr) -> Self {
        Stmt::fresh(StmtKind::Eval { expr })
    }

    /// Attach a different ID, consuming the node.
    pub fn with_id(mut self, id: StmtId) -> Self {
        self.id = id;
        self
    }

    pub fn is_seq(&self) -> bool {
        matches!(self.kind, StmtKind::StmtSeq { .. })
    }

    pub fn is_for(&self) -> bool {
        matches!(self.kind, StmtKind::For { .. })
    }

    pub fn is_var_def(&self) -> bool {
        matches!(self.kind, StmtKind::VarDef { .. })
    }

    /// Flatten one level: a `StmtSeq` yields its children, anything else
    /// yields itself. Used when splicing rewritten bodies back in.
    pub fn into_stmts(self) -> Vec<Stmt> {
        match self.kind {
            StmtKind::StmtSeq { stmts } => stmts,
            _ => vec![self],
        }
    }
}

/// Deep copy of a statement tree.
///
/// The tree is owned data with no interior mutability, so `Clone` already
/// yields a copy sharing no mutable node with the source; the structural
/// hash is preserved because IDs do not participate in it.
pub fn deep_copy(stmt: &Stmt) -> Stmt {
    stmt.clone()
}

// ============================================================================
// Function root
// ============================================================================

/// Root object handed over by the front-end: a name, the ordered I/O
/// parameter names, their buffer table, and the body.
///
/// The body contains a `VarDef` for every parameter (the buffer table is the
/// front-end's declaration of the same information), so the "every access has
/// an enclosing `VarDef`" invariant holds uniformly for locals and I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub params: Vec<String>,
    pub buffers: std::collections::HashMap<String, Buffer>,
    pub body: Stmt,
}

impl Func {
    pub fn new(
        name: impl Into<String>,
        params: Vec<String>,
        buffers: std::collections::HashMap<String, Buffer>,
        body: Stmt,
    ) -> Self {
        Func {
            name: name.into(),
            params,
            buffers,
            body,
        }
    }

    /// Build a `Func` whose body is `body` wrapped in one `VarDef` per
    /// parameter, first parameter outermost.
    pub fn with_params(name: impl Into<String>, params: Vec<(String, Buffer)>, body: Stmt) -> Self {
        let mut wrapped = body;
        for (param, buffer) in params.iter().rev() {
            wrapped = Stmt::var_def(param.clone(), buffer.clone(), wrapped);
        }
        Func {
            name: name.into(),
            params: params.iter().map(|(n, _)| n.clone()).collect(),
            buffers: params.into_iter().collect(),
            body: wrapped,
        }
    }

    /// Rebuild the function around a transformed body. This is the seam
    /// every pass goes through.
    pub fn map_body<F>(self, f: F) -> crate::error::Result<Func>
    where
        F: FnOnce(Stmt) -> crate::error::Result<Stmt>,
    {
        let Func {
            name,
            params,
            buffers,
            body,
        } = self;
        Ok(Func {
            name,
            params,
            buffers,
            body: f(body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_buffer(dtype: DataType) -> Buffer {
        Buffer::new(Tensor::new(vec![], dtype), AccessType::Cache, MemType::Cpu)
    }

    #[test]
    fn test_structural_eq_ignores_ids() {
        let a = Stmt::store("x", vec![], Expr::int(1));
        let b = Stmt::store("x", vec![], Expr::int(1));
        assert_ne!(a.id, b.id);
        assert_eq!(a, b);
    }

    #[test]
    fn test_deep_copy_shares_nothing_and_compares_equal() {
        let body = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(8),
            Stmt::store("x", vec![], Expr::var("i")),
        );
        let copy = deep_copy(&body);
        assert_eq!(body, copy);
        assert_eq!(hash::hash_stmt(&body), hash::hash_stmt(&copy));
    }

    #[test]
    fn test_reduce_op_neutral_elements() {
        assert_eq!(ReduceOp::Add.neutral(&DataType::Int32), Expr::IntConst(0));
        assert_eq!(ReduceOp::Mul.neutral(&DataType::Int32), Expr::IntConst(1));
        assert_eq!(
            ReduceOp::Min.neutral(&DataType::Float32),
            Expr::FloatConst(f64::INFINITY)
        );
        assert_eq!(
            ReduceOp::LAnd.neutral(&DataType::Bool),
            Expr::BoolConst(true)
        );
    }

    #[test]
    fn test_with_params_wraps_in_order() {
        let func = Func::with_params(
            "f",
            vec![
                ("a".to_string(), scalar_buffer(DataType::Float32)),
                ("b".to_string(), scalar_buffer(DataType::Float32)),
            ],
            Stmt::store("b", vec![], Expr::load("a", vec![])),
        );
        match &func.body.kind {
            StmtKind::VarDef { name, body, .. } => {
                assert_eq!(name, "a");
                assert!(matches!(
                    &body.kind,
                    StmtKind::VarDef { name, .. } if name == "b"
                ));
            }
            other => panic!("expected VarDef, got {other:?}"),
        }
        assert_eq!(func.params, vec!["a", "b"]);
    }

    #[test]
    fn test_expr_size_counts_nodes() {
        let e = Expr::add(Expr::mul(Expr::var("x"), Expr::int(2)), Expr::int(0));
        assert_eq!(e.size(), 5);
    }
}
