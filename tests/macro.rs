use approx::assert_abs_diff_eq;
use toygrad_macro::toygrad;

#[test]
fn polynomial() {
    toygrad! {{
        let x = 123.;
        let result = 2. * x + 321.;
    }}
    assert_eq!(result.data(), 567.);
    result.differentiate();
    assert_eq!(x.grad(), 2.);
}

#[test]
fn chain_rule() {
    toygrad! {{
        let a = 2.;
        let b = -3.;
        let c = 10;
        let l = (a * b + c).powi(2);
    }}
    l.differentiate();
    assert_eq!(l.data(), 16.);
    assert_eq!(a.grad(), -24.);
    assert_eq!(b.grad(), 16.);
    assert_eq!(c.grad(), 8.);
}

#[test]
fn functions() {
    toygrad! {{
        let x = 0.5;
        let y = tanh(x * x) - exp(-x) / 2. + relu(x - 1.);
    }}
    let t = (0.25f64).tanh();
    assert_abs_diff_eq!(y.data(), t - (-0.5f64).exp() / 2., epsilon = 1e-12);
    y.differentiate();
    let expected = (1. - t * t) * 2. * 0.5 + (-0.5f64).exp() / 2.;
    assert_abs_diff_eq!(x.grad(), expected, epsilon = 1e-12);
}

#[test]
fn alias() {
    toygrad! {{
        let x = 3.;
        let y = x;
        let z = y * x;
    }}
    z.differentiate();
    assert!(x.ptr_eq(&y));
    assert_eq!(x.grad(), 6.);
}
