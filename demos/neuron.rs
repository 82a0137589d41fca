//! A single tanh neuron with two inputs. Prints the output and the gradient
//! of the output with respect to every input and parameter.

use toygrad::Value;

fn main() {
    env_logger::init();

    let x1 = Value::new(2.);
    let x2 = Value::new(0.);
    let w1 = Value::new(-3.);
    let w2 = Value::new(1.);
    let b = Value::new(6.881_373_587_019_543);

    let n = &x1 * &w1 + &x2 * &w2 + &b;
    let o = n.tanh();
    o.differentiate();

    println!("o = {o}");
    for (name, v) in [("x1", &x1), ("x2", &x2), ("w1", &w1), ("w2", &w2), ("b", &b)] {
        println!("d(o)/d({name}) = {}", v.grad());
    }

    // Same neuron with tanh spelled out through exp.
    let e = (2. * &n).exp();
    let o2 = (&e - 1.) / (&e + 1.);
    o2.differentiate();
    println!("o2 = {o2}, d(o2)/d(x1) = {}", x1.grad());
}
