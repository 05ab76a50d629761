//! End-to-end schedule transformation tests.

use tensorloom::analyze::check::check_invariants;
use tensorloom::schedule::{FissionSide, Schedule};
use tensorloom::{
    AccessType, Buffer, DataType, Error, Expr, Func, MemType, ParallelScope, Stmt, StmtKind,
    Tensor,
};

fn vec_buf(n: i64, atype: AccessType) -> Buffer {
    Buffer::new(
        Tensor::new(vec![Expr::int(n)], DataType::Float32),
        atype,
        MemType::Cpu,
    )
}

fn mat_buf(rows: i64, cols: i64, atype: AccessType) -> Buffer {
    Buffer::new(
        Tensor::new(vec![Expr::int(rows), Expr::int(cols)], DataType::Float32),
        atype,
        MemType::Cpu,
    )
}

/// `for i in 0..1024: a[i] = a[i] + 1`
fn elementwise_func() -> Func {
    let body = Stmt::store(
        "a",
        vec![Expr::var("i")],
        Expr::add(Expr::load("a", vec![Expr::var("i")]), Expr::int(1)),
    );
    let l = Stmt::for_range("i", Expr::int(0), Expr::int(1024), body).with_id("L".into());
    Func::with_params(
        "incr",
        vec![("a".to_string(), vec_buf(1024, AccessType::InOut))],
        l,
    )
}

#[test]
fn test_split_then_parallelize() {
    let mut s = Schedule::new(elementwise_func());
    let (outer, inner) = s.split(&"L".into(), Some(32), None, 0).expect("split");
    s.parallelize(&outer, ParallelScope::OpenMp).expect("parallelize");
    check_invariants(s.ast()).expect("invariants");

    let outer_stmt = s.find_id(&outer).expect("outer loop");
    let StmtKind::For { len, property, .. } = &outer_stmt.kind else {
        panic!("outer is not a loop");
    };
    assert_eq!(len.as_int(), Some(32));
    assert_eq!(property.parallel, ParallelScope::OpenMp);

    let inner_stmt = s.find_id(&inner).expect("inner loop");
    let StmtKind::For { len, property, .. } = &inner_stmt.kind else {
        panic!("inner is not a loop");
    };
    assert_eq!(len.as_int(), Some(32));
    assert!(property.parallel.is_serial());

    // The store is still a store on the same variable
    let text = s.ast().body.pretty_print(0);
    assert!(text.contains("a["), "store survives: {text}");
    assert_eq!(s.logs().len(), 2);
}

#[test]
fn test_merge_undoes_split() {
    let mut s = Schedule::new(elementwise_func());
    let (outer, inner) = s.split(&"L".into(), Some(32), None, 0).expect("split");
    s.merge(&outer, &inner).expect("merge");
    check_invariants(s.ast()).expect("invariants");

    // Simplification cancels the divide/modulo remapping, leaving the
    // original loop modulo iterator naming and IDs
    let round_trip = tensorloom::pass::simplify(s.into_func()).expect("simplify");
    let reference = tensorloom::pass::simplify(elementwise_func()).expect("simplify");
    let opts = tensorloom::ir::hash::HashOptions {
        modulo_iter_names: true,
    };
    assert_eq!(
        tensorloom::ir::hash::hash_stmt_with(&round_trip.body, opts),
        tensorloom::ir::hash::hash_stmt_with(&reference.body, opts),
        "merge(split(L)) != L:\n{}\nvs\n{}",
        round_trip.body.pretty_print(0),
        reference.body.pretty_print(0)
    );
}

#[test]
fn test_fission_with_shared_var_def() {
    // for i: { VarDef t: t = A[i]; B[i] = t; C[i] = t }
    let t_def = Stmt::var_def(
        "t",
        Buffer::new(
            Tensor::new(vec![], DataType::Float32),
            AccessType::Cache,
            MemType::Cpu,
        ),
        Stmt::seq(vec![
            Stmt::store("t", vec![], Expr::load("A", vec![Expr::var("i")])),
            Stmt::store("B", vec![Expr::var("i")], Expr::load("t", vec![])).with_id("storeB".into()),
            Stmt::store("C", vec![Expr::var("i")], Expr::load("t", vec![])),
        ]),
    );
    let l = Stmt::for_range("i", Expr::int(0), Expr::int(64), t_def).with_id("L".into());
    let func = Func::with_params(
        "f",
        vec![
            ("A".to_string(), vec_buf(64, AccessType::Input)),
            ("B".to_string(), vec_buf(64, AccessType::Output)),
            ("C".to_string(), vec_buf(64, AccessType::Output)),
        ],
        l,
    );

    let mut s = Schedule::new(func);
    let (first, second) = s
        .fission(&"L".into(), FissionSide::After, &"storeB".into(), ".a", ".b")
        .expect("fission");
    check_invariants(s.ast()).expect("invariants");

    assert_eq!(first.expect("first half").as_str(), "L.a");
    assert_eq!(second.expect("second half").as_str(), "L.b");
    let text = s.ast().body.pretty_print(0);
    // t hoisted above both loops with one extra dimension
    assert!(text.contains("t[64]"), "hoisted def: {text}");
    assert!(text.contains("t[i] = A[i]"), "first loop writes t[i]: {text}");
    assert!(text.contains("C[i] = t[i]"), "second loop reads t[i]: {text}");
    let hoist_pos = text.find("t[64]").expect("def");
    let loop_pos = text.find("for i").expect("loop");
    assert!(hoist_pos < loop_pos, "def encloses both loops: {text}");
}

#[test]
fn test_fuse_undoes_fission() {
    let func = {
        let body = Stmt::seq(vec![
            Stmt::store("B", vec![Expr::var("i")], Expr::load("A", vec![Expr::var("i")]))
                .with_id("sB".into()),
            Stmt::store("C", vec![Expr::var("i")], Expr::load("A", vec![Expr::var("i")])),
        ]);
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(64), body).with_id("L".into());
        Func::with_params(
            "f",
            vec![
                ("A".to_string(), vec_buf(64, AccessType::Input)),
                ("B".to_string(), vec_buf(64, AccessType::Output)),
                ("C".to_string(), vec_buf(64, AccessType::Output)),
            ],
            l,
        )
    };

    let mut s = Schedule::new(func);
    let (a, b) = s
        .fission(&"L".into(), FissionSide::After, &"sB".into(), ".a", ".b")
        .expect("fission");
    let (a, b) = (a.expect("half a"), b.expect("half b"));
    let fused = s.fuse(&a, &b, true).expect("fuse");
    check_invariants(s.ast()).expect("invariants");

    // One loop again, running both stores
    let loops = s.find_all(&Stmt::is_for);
    assert_eq!(loops.len(), 1);
    assert_eq!(loops[0].id, fused);
    let text = s.ast().body.pretty_print(0);
    assert!(text.contains("B["), "{text}");
    assert!(text.contains("C["), "{text}");
}

#[test]
fn test_reorder_rejects_loop_carried_dependency() {
    // for i: for j: A[i, j] = A[i-1, j+1] + 1
    let body = Stmt::store(
        "A",
        vec![Expr::var("i"), Expr::var("j")],
        Expr::add(
            Expr::load(
                "A",
                vec![
                    Expr::sub(Expr::var("i"), Expr::int(1)),
                    Expr::add(Expr::var("j"), Expr::int(1)),
                ],
            ),
            Expr::int(1),
        ),
    );
    let lj = Stmt::for_range("j", Expr::int(0), Expr::int(32), body).with_id("Lj".into());
    let li = Stmt::for_range("i", Expr::int(0), Expr::int(32), lj).with_id("Li".into());
    let func = Func::with_params(
        "stencil",
        vec![("A".to_string(), mat_buf(32, 32, AccessType::InOut))],
        li,
    );

    let mut s = Schedule::new(func);
    let before = s.ast().clone();
    let err = s
        .reorder(&["Lj".into(), "Li".into()])
        .expect_err("must reject");
    match err {
        Error::InvalidSchedule { cause, .. } => {
            assert!(cause.contains("dependency"), "cause: {cause}");
        }
        other => panic!("expected InvalidSchedule, got {other:?}"),
    }
    assert_eq!(*s.ast(), before, "AST untouched after rejection");
}

#[test]
fn test_as_matmul_recognition() {
    // for i 0..M: for j 0..N: { C[i,j] = 0; for p 0..K: C[i,j] += A[i,p]*B[p,j] }
    let (m, n, k) = (16, 24, 32);
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
    let kp = Stmt::for_range("p", Expr::int(0), Expr::int(k), update);
    let init = Stmt::store("C", vec![Expr::var("i"), Expr::var("j")], Expr::int(0));
    let lj = Stmt::for_range("j", Expr::int(0), Expr::int(n), Stmt::seq(vec![init, kp]));
    let li = Stmt::for_range("i", Expr::int(0), Expr::int(m), lj).with_id("L".into());
    let func = Func::with_params(
        "mm",
        vec![
            ("A".to_string(), mat_buf(m, k, AccessType::Input)),
            ("B".to_string(), mat_buf(k, n, AccessType::Input)),
            ("C".to_string(), mat_buf(m, n, AccessType::Output)),
        ],
        li,
    );

    let mut s = Schedule::new(func);
    s.as_matmul(&"L".into()).expect("as_matmul");

    // A single matmul intrinsic, no loops left
    assert!(s.find_all(&Stmt::is_for).is_empty());
    let evals = s.find_all(&|st| matches!(st.kind, StmtKind::Eval { .. }));
    assert_eq!(evals.len(), 1);
    let StmtKind::Eval {
        expr: Expr::Intrinsic { format, args, .. },
    } = &evals[0].kind
    else {
        panic!("expected matmul intrinsic");
    };
    assert!(format.starts_with("matmul("));
    assert_eq!(args[3], Expr::int(m), "m");
    assert_eq!(args[4], Expr::int(n), "n");
    assert_eq!(args[5], Expr::int(k), "k");
    assert_eq!(args[6], Expr::int(k), "lda = K");
    assert_eq!(args[7], Expr::int(n), "ldb = N");
    assert_eq!(args[8], Expr::int(n), "ldc = N");
    assert_eq!(args[13], Expr::int(0), "beta = 0");
    assert_eq!(args[14], Expr::BoolConst(true), "A row-major");
    assert_eq!(args[15], Expr::BoolConst(true), "B row-major");
    assert_eq!(args[16], Expr::BoolConst(true), "C row-major");
}

#[test]
fn test_as_matmul_rejects_elementwise() {
    let mut s = Schedule::new(elementwise_func());
    assert!(matches!(
        s.as_matmul(&"L".into()),
        Err(Error::InvalidSchedule { .. })
    ));
}

#[test]
fn test_vectorize_requires_divisible_length() {
    let body = Stmt::store("a", vec![Expr::var("i")], Expr::int(0));
    let l = Stmt::for_range("i", Expr::int(0), Expr::int(100), body).with_id("L".into());
    let func = Func::with_params(
        "f",
        vec![("a".to_string(), vec_buf(100, AccessType::Output))],
        l,
    );
    let mut s = Schedule::new(func);
    // 100 = 4 * 25: provably divisible
    s.vectorize(&"L".into()).expect("vectorize");

    let body = Stmt::store("b", vec![Expr::var("i")], Expr::int(0));
    let l = Stmt::for_range("i", Expr::int(0), Expr::int(101), body).with_id("L".into());
    let func = Func::with_params(
        "g",
        vec![("b".to_string(), vec_buf(101, AccessType::Output))],
        l,
    );
    let mut s = Schedule::new(func);
    assert!(s.vectorize(&"L".into()).is_err());
}

#[test]
fn test_cache_inserts_staging_buffer() {
    let mut s = Schedule::new(elementwise_func());
    let (fill, flush, cache_var, cache_def) = s
        .cache(&"L".into(), "a", MemType::GpuShared)
        .expect("cache");
    check_invariants(s.ast()).expect("invariants");
    assert_eq!(cache_var, "a.c");
    assert!(s.find_id(&fill).is_ok());
    assert!(s.find_id(&flush).is_ok());
    assert!(s.find_id(&cache_def).is_ok());
    let text = s.ast().body.pretty_print(0);
    assert!(text.contains("a.c[i] ="), "loop redirected: {text}");
}

#[test]
fn test_parallelize_succeeds_implies_no_carried_deps() {
    let mut s = Schedule::new(elementwise_func());
    s.parallelize(&"L".into(), ParallelScope::OpenMp)
        .expect("parallelize");
    let deps = tensorloom::analyze::deps::loop_carried_deps(&s.ast().body, &"L".into());
    assert!(deps.is_empty(), "spec: no cross-iteration RAW/WAW/WAR");
}
