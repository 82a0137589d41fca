use toygrad_macro::toygrad;

fn main() {
    toygrad! {{
        let x = 123.;
        let result = 2. * x + 321.;
    }};
    println!("f(x): {}", result.data());
    result.differentiate();
    println!("df/dx: {}", x.grad());
    for node in result.topological_order() {
        println!("{node} {:?} grad: {}", node.op_label(), node.grad());
    }
}
