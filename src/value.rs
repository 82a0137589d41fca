use std::{
    cell::Cell,
    fmt::Display,
    ops::{Add, Div, Mul, Neg, Sub},
    rc::Rc,
};

use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};

#[derive(Debug)]
enum Op {
    Leaf(f64),
    Add(Value, Value),
    Mul(Value, Value),
    Pow(Value, f64),
    Exp(Value),
    Tanh(Value),
    Relu(Value),
}

impl Op {
    fn eval(&self) -> f64 {
        use Op::*;
        match self {
            Leaf(val) => *val,
            Add(lhs, rhs) => lhs.data() + rhs.data(),
            Mul(lhs, rhs) => lhs.data() * rhs.data(),
            Pow(base, exponent) => base.data().powf(*exponent),
            Exp(term) => term.data().exp(),
            Tanh(term) => term.data().tanh(),
            Relu(term) => term.data().max(0.),
        }
    }

    fn operands(&self) -> Vec<&Value> {
        use Op::*;
        match self {
            Leaf(_) => vec![],
            Add(lhs, rhs) | Mul(lhs, rhs) => vec![lhs, rhs],
            Pow(term, _) | Exp(term) | Tanh(term) | Relu(term) => vec![term],
        }
    }

    fn into_operands(self) -> Vec<Value> {
        use Op::*;
        match self {
            Leaf(_) => vec![],
            Add(lhs, rhs) | Mul(lhs, rhs) => vec![lhs, rhs],
            Pow(term, _) | Exp(term) | Tanh(term) | Relu(term) => vec![term],
        }
    }

    fn label(&self) -> String {
        use Op::*;
        match self {
            Leaf(_) => String::new(),
            Add(..) => "+".to_string(),
            Mul(..) => "*".to_string(),
            Pow(_, exponent) => format!("**{exponent}"),
            Exp(_) => "exp".to_string(),
            Tanh(_) => "tanh".to_string(),
            Relu(_) => "ReLU".to_string(),
        }
    }

    /// Local gradient rule: adds this node's contribution to each operand,
    /// scaled by the gradient accumulated on `out` so far.
    /// Both slots are visited even when they hold the same node, so `x * x`
    /// accumulates twice into `x`.
    fn propagate(&self, out: &ValuePayload) {
        use Op::*;
        let grad = out.grad.get();
        match self {
            Leaf(_) => (),
            Add(lhs, rhs) => {
                lhs.accumulate(grad);
                rhs.accumulate(grad);
            }
            Mul(lhs, rhs) => {
                lhs.accumulate(rhs.data() * grad);
                rhs.accumulate(lhs.data() * grad);
            }
            Pow(base, exponent) => {
                base.accumulate(exponent * base.data().powf(exponent - 1.) * grad)
            }
            Exp(term) => term.accumulate(out.data * grad),
            Tanh(term) => term.accumulate((1. - out.data * out.data) * grad),
            Relu(term) => term.accumulate(if out.data > 0. { grad } else { 0. }),
        }
    }
}

#[derive(Debug)]
struct ValuePayload {
    op: Op,
    data: f64,
    grad: Cell<f64>,
}

impl ValuePayload {
    fn new(op: Op) -> ValuePayload {
        let data = op.eval();
        Self {
            op,
            data,
            grad: Cell::new(0.),
        }
    }

    fn take_operands(&mut self) -> Vec<Value> {
        std::mem::replace(&mut self.op, Op::Leaf(0.)).into_operands()
    }
}

/// Releases operands with an explicit stack instead of letting `Rc` drops
/// recurse once per node, so long chains can be freed.
impl Drop for ValuePayload {
    fn drop(&mut self) {
        let mut stack = self.take_operands();
        while let Some(value) = stack.pop() {
            if let Ok(mut payload) = Rc::try_unwrap(value.0) {
                stack.extend(payload.take_operands());
            }
        }
    }
}

/// A scalar node in the computation graph.
///
/// Cloning a `Value` is cheap and yields a handle to the same node, so a node
/// can be used as an operand by any number of downstream nodes. Every
/// operation returns a new node; nothing rewires an existing one, which keeps
/// the graph acyclic.
#[derive(Clone, Debug)]
pub struct Value(Rc<ValuePayload>);

impl Value {
    /// Creates a leaf node holding a constant.
    pub fn new(data: f64) -> Value {
        Self::new_op(Op::Leaf(data))
    }

    fn new_op(op: Op) -> Value {
        Self(Rc::new(ValuePayload::new(op)))
    }

    /// Forward value computed when the node was built.
    pub fn data(&self) -> f64 {
        self.0.data
    }

    /// Accumulated derivative of the last differentiated root with respect to
    /// this node.
    pub fn grad(&self) -> f64 {
        self.0.grad.get()
    }

    fn accumulate(&self, grad: f64) {
        self.0.grad.set(self.0.grad.get() + grad);
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.0.op, Op::Leaf(_))
    }

    /// Direct predecessors in operand order. A node used in both slots of a
    /// binary operation appears twice.
    pub fn operands(&self) -> Vec<Value> {
        self.0.op.operands().into_iter().cloned().collect()
    }

    /// Diagnostic tag of the operation that produced this node, empty for
    /// leaves.
    pub fn op_label(&self) -> String {
        self.0.op.label()
    }

    /// Whether both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn id(&self) -> usize {
        let payload = &*self.0;
        payload as *const _ as usize
    }

    /// Raises to an integer power.
    pub fn powi(&self, exponent: i32) -> Value {
        Self::new_op(Op::Pow(self.clone(), exponent as f64))
    }

    /// Raises to a constant power. The exponent is not part of the graph, so
    /// no gradient flows into it.
    pub fn powf(&self, exponent: f64) -> Result<Value> {
        if !exponent.is_finite() {
            return Err(Error::InvalidExponent { exponent });
        }
        Ok(Self::new_op(Op::Pow(self.clone(), exponent)))
    }

    /// `e` raised to this value.
    pub fn exp(&self) -> Value {
        Self::new_op(Op::Exp(self.clone()))
    }

    /// Hyperbolic tangent.
    pub fn tanh(&self) -> Value {
        Self::new_op(Op::Tanh(self.clone()))
    }

    /// `max(0, x)`; the gradient at 0 is 0.
    pub fn relu(&self) -> Value {
        Self::new_op(Op::Relu(self.clone()))
    }

    /// Every node reachable from this one, each exactly once, with every node
    /// placed after all of its operands. This node comes last.
    pub fn topological_order(&self) -> Vec<Value> {
        let mut visited = FxHashSet::default();
        let mut order = vec![];
        // (node, operands already pushed)
        let mut stack = vec![(self.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !visited.insert(node.id()) {
                continue;
            }
            let operands: Vec<Value> = node
                .0
                .op
                .operands()
                .into_iter()
                .rev()
                .filter(|operand| !visited.contains(&operand.id()))
                .cloned()
                .collect();
            stack.push((node, true));
            stack.extend(operands.into_iter().map(|operand| (operand, false)));
        }
        order
    }

    /// The entry point to backpropagation.
    ///
    /// Resets the gradient of every node reachable from `self` to zero, seeds
    /// `self` with 1, then runs each node's local rule from the root towards
    /// the leaves. A node's rule runs only after all of its consumers have
    /// contributed, and exactly once, so shared sub-expressions sum their
    /// contributions. Differentiating the same graph again yields the same
    /// gradients.
    pub fn differentiate(&self) {
        let order = self.topological_order();
        debug!(
            "differentiate: root data {}, {} reachable nodes",
            self.data(),
            order.len()
        );
        for node in &order {
            node.0.grad.set(0.);
        }
        self.0.grad.set(1.);
        for node in order.iter().rev() {
            trace!(
                "propagate a{:x} {:?} grad {}",
                node.id(),
                node.op_label(),
                node.grad()
            );
            node.0.op.propagate(&node.0);
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Value=({})", self.0.data)
    }
}

impl From<f64> for Value {
    fn from(data: f64) -> Self {
        Value::new(data)
    }
}

impl From<f32> for Value {
    fn from(data: f32) -> Self {
        Value::new(data as f64)
    }
}

impl From<i32> for Value {
    fn from(data: i32) -> Self {
        Value::new(data as f64)
    }
}

impl Add for &Value {
    type Output = Value;
    fn add(self, rhs: Self) -> Self::Output {
        Value::new_op(Op::Add(self.clone(), rhs.clone()))
    }
}

impl Mul for &Value {
    type Output = Value;
    fn mul(self, rhs: Self) -> Self::Output {
        Value::new_op(Op::Mul(self.clone(), rhs.clone()))
    }
}

impl Neg for &Value {
    type Output = Value;
    fn neg(self) -> Self::Output {
        self * -1.
    }
}

impl Neg for Value {
    type Output = Value;
    fn neg(self) -> Self::Output {
        -&self
    }
}

impl Sub for &Value {
    type Output = Value;
    fn sub(self, rhs: Self) -> Self::Output {
        self + &(-rhs)
    }
}

impl Div for &Value {
    type Output = Value;
    fn div(self, rhs: Self) -> Self::Output {
        self * &rhs.powi(-1)
    }
}

/// Derives the owned and `f64` operand combinations from the `&Value op &Value`
/// impl. A bare `f64` becomes a fresh leaf.
macro_rules! forward_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<Value> for Value {
            type Output = Value;
            fn $method(self, rhs: Value) -> Value {
                &self $op &rhs
            }
        }

        impl $trait<&Value> for Value {
            type Output = Value;
            fn $method(self, rhs: &Value) -> Value {
                &self $op rhs
            }
        }

        impl $trait<Value> for &Value {
            type Output = Value;
            fn $method(self, rhs: Value) -> Value {
                self $op &rhs
            }
        }

        impl $trait<f64> for &Value {
            type Output = Value;
            fn $method(self, rhs: f64) -> Value {
                self $op &Value::new(rhs)
            }
        }

        impl $trait<f64> for Value {
            type Output = Value;
            fn $method(self, rhs: f64) -> Value {
                &self $op &Value::new(rhs)
            }
        }

        impl $trait<&Value> for f64 {
            type Output = Value;
            fn $method(self, rhs: &Value) -> Value {
                &Value::new(self) $op rhs
            }
        }

        impl $trait<Value> for f64 {
            type Output = Value;
            fn $method(self, rhs: Value) -> Value {
                &Value::new(self) $op &rhs
            }
        }
    };
}

forward_binop!(Add, add, +);
forward_binop!(Sub, sub, -);
forward_binop!(Mul, mul, *);
forward_binop!(Div, div, /);

#[test]
fn test_forward() {
    let a = Value::new(2.);
    let b = Value::new(-3.);
    let c = Value::new(10.);
    let l = (&a * &b + &c).powi(2);
    assert_eq!(l.data(), 16.);
    assert_eq!((&a - &b).data(), 5.);
    assert_eq!((&a / 4.).data(), 0.5);
    assert_eq!((1. - &a).data(), -1.);
    assert_eq!((-&a).data(), -2.);
    assert_eq!(a.relu().data(), 2.);
    assert_eq!(b.relu().data(), 0.);
}

#[test]
fn test_labels() {
    let a = Value::new(2.);
    assert_eq!(a.op_label(), "");
    assert_eq!((&a + 1.).op_label(), "+");
    assert_eq!((&a * 1.).op_label(), "*");
    assert_eq!(a.powi(2).op_label(), "**2");
    assert_eq!((1. / &a).op_label(), "*");
    assert_eq!(a.powi(-1).op_label(), "**-1");
    assert_eq!(a.exp().op_label(), "exp");
    assert_eq!(a.tanh().op_label(), "tanh");
    assert_eq!(a.relu().op_label(), "ReLU");
}

#[test]
fn test_composed_ops() {
    let a = Value::new(3.);
    let b = Value::new(4.);

    // a - b == a + (b * -1)
    let sub = &a - &b;
    let operands = sub.operands();
    let [lhs, neg] = &operands[..] else {
        panic!("subtraction must have two operands");
    };
    assert!(lhs.ptr_eq(&a));
    assert_eq!(neg.op_label(), "*");
    assert!(neg.operands()[0].ptr_eq(&b));
    assert_eq!(neg.operands()[1].data(), -1.);

    // a / b == a * b**-1
    let div = &a / &b;
    assert_eq!(div.op_label(), "*");
    assert_eq!(div.operands()[1].op_label(), "**-1");
    assert!(div.operands()[1].operands()[0].ptr_eq(&b));
}

#[test]
fn test_self_operand() {
    let x = Value::new(3.);
    let xx = &x * &x;
    let operands = xx.operands();
    assert_eq!(operands.len(), 2);
    assert!(operands[0].ptr_eq(&x) && operands[1].ptr_eq(&x));
    xx.differentiate();
    assert_eq!(x.grad(), 6.);
}

#[test]
fn test_topological_order() {
    let a = Value::new(1.);
    let b = Value::new(2.);
    let ab = &a * &b;
    let aab = &a + &ab;
    let root = &aab * &ab;
    let order = root.topological_order();
    assert_eq!(order.len(), 5);
    assert!(order.last().unwrap().ptr_eq(&root));
    let pos = |v: &Value| order.iter().position(|n| n.ptr_eq(v)).unwrap();
    for node in &order {
        for operand in node.operands() {
            assert!(pos(&operand) < pos(node));
        }
    }
}

#[test]
fn test_powf_rejects_non_finite() {
    let a = Value::new(2.);
    assert!(matches!(
        a.powf(f64::NAN),
        Err(Error::InvalidExponent { .. })
    ));
    assert_eq!(
        a.powf(f64::INFINITY).unwrap_err(),
        Error::InvalidExponent {
            exponent: f64::INFINITY
        }
    );
    approx::assert_relative_eq!(a.powf(0.5).unwrap().data(), 2f64.sqrt());
}

#[test]
fn test_display() {
    assert_eq!(Value::new(1.5).to_string(), "Value=(1.5)");
    assert_eq!(Value::from(2).data(), 2.);
}
