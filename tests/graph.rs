use rustc_hash::FxHashSet;
use toygrad::Value;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(a: f64, b: f64, c: f64) -> (Vec<Value>, Value) {
    let a = Value::new(a);
    let b = Value::new(b);
    let c = Value::new(c);
    let e = &a * &b;
    let d = &e + &c;
    let f = Value::new(-2.);
    let l = (&d * &f).tanh() + d.exp() / &c;
    (vec![a, b, c], l)
}

#[test]
fn repeated_differentiation() {
    init();
    let (leaves, l) = build(0.2, -0.4, 1.1);
    l.differentiate();
    let first: Vec<f64> = leaves.iter().map(Value::grad).collect();
    l.differentiate();
    let second: Vec<f64> = leaves.iter().map(Value::grad).collect();
    assert_eq!(first, second);
    assert_eq!(l.grad(), 1.);
}

#[test]
fn differentiate_intermediate_then_root() {
    init();
    let x = Value::new(3.);
    let y = &x * 2.;
    let z = &y * &y;

    y.differentiate();
    assert_eq!(x.grad(), 2.);

    // `y` is reached from `z` again; its earlier seed must not leak in.
    z.differentiate();
    assert_eq!(y.grad(), 12.);
    assert_eq!(x.grad(), 24.);
}

#[test]
fn unreachable_nodes_untouched() {
    init();
    let x = Value::new(3.);
    let w = Value::new(5.);
    let y1 = &x * &w;
    y1.differentiate();
    assert_eq!(w.grad(), 3.);

    let y2 = &x * 2.;
    y2.differentiate();
    assert_eq!(x.grad(), 2.);
    assert_eq!(w.grad(), 3.);
}

#[test]
fn deterministic_forward() {
    let (leaves1, l1) = build(0.7, 1.3, -0.2);
    let (leaves2, l2) = build(0.7, 1.3, -0.2);
    assert_eq!(l1.data(), l2.data());
    assert!(!l1.ptr_eq(&l2));
    assert!(leaves1
        .iter()
        .zip(&leaves2)
        .all(|(a, b)| !a.ptr_eq(b)));
}

/// Every node strictly below `node`, once per path.
fn descendants(node: &Value) -> Vec<Value> {
    let mut stack = node.operands();
    let mut out = vec![];
    while let Some(next) = stack.pop() {
        stack.extend(next.operands());
        out.push(next);
    }
    out
}

#[test]
fn acyclic() {
    let (_, l) = build(1., 2., 3.);
    let order = l.topological_order();
    for node in &order {
        assert!(descendants(node).iter().all(|d| !d.ptr_eq(node)));
    }
    for (i, node) in order.iter().enumerate() {
        for operand in node.operands() {
            let pos = order.iter().position(|n| n.ptr_eq(&operand)).unwrap();
            assert!(pos < i);
        }
    }
}

#[test]
fn leaves_and_labels() {
    let (leaves, l) = build(1., 2., 3.);
    assert!(leaves.iter().all(Value::is_leaf));
    assert!(leaves.iter().all(|v| v.operands().is_empty()));
    assert!(!l.is_leaf());
    assert_eq!(l.op_label(), "+");
    let order = l.topological_order();
    let labels: FxHashSet<String> = order.iter().map(Value::op_label).collect();
    for label in ["", "+", "*", "tanh", "exp", "**-1"] {
        assert!(labels.contains(label), "missing {label:?}");
    }
}

#[test]
fn deep_chain() {
    init();
    const DEPTH: usize = 2_000;
    let x = Value::new(0.5);
    let mut y = x.clone();
    for _ in 0..DEPTH {
        y = &y + &x;
    }
    y.differentiate();
    assert_eq!(y.topological_order().len(), DEPTH + 1);
    assert_eq!(x.grad(), (DEPTH + 1) as f64);
}

#[test]
fn drop_deep_chain() {
    init();
    const DEPTH: usize = 200_000;
    let x = Value::new(1.);
    let mut y = x.clone();
    for _ in 0..DEPTH {
        y = &y + 1.;
    }
    assert_eq!(y.data(), (DEPTH + 1) as f64);
    y.differentiate();
    assert_eq!(x.grad(), 1.);
    drop(y);
    // The leaf outlives the chain that referenced it.
    assert!(x.is_leaf());
    assert_eq!(x.data(), 1.);
}

#[test]
fn display() {
    let v = Value::new(2.) * 1.5;
    assert_eq!(format!("{v}"), "Value=(3)");
}
