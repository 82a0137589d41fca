use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, spanned::Spanned, BinOp, Block, Expr, ExprLit, Ident, Pat, Stmt, UnOp,
};

/// Builds a `toygrad::Value` graph from plain arithmetic.
///
/// Each `let` in the block binds a `Value`. Numeric literals become leaves,
/// `+ - * /` and unary `-` use the operator impls, `exp(e)`, `tanh(e)` and
/// `relu(e)` (or the method forms) call the matching methods, and
/// `e.powi(n)` is forwarded as is.
///
/// ```ignore
/// toygrad! {{
///     let x = 2.;
///     let y = tanh(x * x + 1.);
/// }}
/// y.differentiate();
/// ```
#[proc_macro]
pub fn toygrad(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as Block);

    let mut objs = vec![];

    for stmt in &input.stmts {
        traverse_stmt(stmt, &mut objs);
    }

    let expanded = quote! {
        #(#objs)*
    };

    TokenStream::from(expanded)
}

fn traverse_stmt(input: &Stmt, terms: &mut Vec<TokenStream2>) {
    match input {
        Stmt::Local(local) => {
            if let (Pat::Ident(id), Some(init)) = (&local.pat, &local.init) {
                let name = id.ident.clone();
                let ex = &init.expr;
                let ts = match ex as &Expr {
                    Expr::Lit(lit) => quote! {
                        let #name = ::toygrad::Value::from(#lit);
                    },
                    Expr::Path(path) => quote! {
                        let #name = ::core::clone::Clone::clone(&#path);
                    },
                    _ => match traverse_expr(ex, terms) {
                        Some(res) => quote! {
                            let #name = #res;
                        },
                        None => unsupported(ex),
                    },
                };
                terms.push(ts);
            }
        }
        Stmt::Expr(ex, _) => {
            if traverse_expr(ex, terms).is_none() {
                terms.push(unsupported(ex));
            }
        }
        _ => (),
    }
}

fn unsupported(ex: &Expr) -> TokenStream2 {
    syn::Error::new(ex.span(), "unsupported expression in toygrad! block").to_compile_error()
}

fn var_name(terms: &[TokenStream2]) -> String {
    format!("_a{}", terms.len())
}

fn format_term(ex: &ExprLit, terms: &mut Vec<TokenStream2>) -> Ident {
    let name = Ident::new(&var_name(terms), ex.span());
    let ts = quote! {
        let #name = ::toygrad::Value::from(#ex);
    };
    terms.push(ts);
    name
}

fn is_unary_fn(ident: &Ident) -> bool {
    matches!(ident.to_string().as_str(), "exp" | "tanh" | "relu")
}

fn traverse_expr(input: &Expr, terms: &mut Vec<TokenStream2>) -> Option<Ident> {
    match input {
        Expr::Binary(ex) => {
            let lhs = traverse_expr(&ex.left, terms)?;
            let rhs = traverse_expr(&ex.right, terms)?;
            let name = Ident::new(&var_name(terms), ex.span());
            let binop = match ex.op {
                BinOp::Add(_) => quote! { &#lhs + &#rhs },
                BinOp::Sub(_) => quote! { &#lhs - &#rhs },
                BinOp::Mul(_) => quote! { &#lhs * &#rhs },
                BinOp::Div(_) => quote! { &#lhs / &#rhs },
                _ => return None,
            };
            let ts = quote! {
                let #name = #binop;
            };
            terms.push(ts);
            Some(name)
        }
        Expr::Unary(ex) if matches!(ex.op, UnOp::Neg(_)) => {
            if let Expr::Lit(lit) = &*ex.expr {
                // Negative literals stay a single leaf.
                let name = Ident::new(&var_name(terms), ex.span());
                terms.push(quote! {
                    let #name = ::toygrad::Value::from(-#lit);
                });
                return Some(name);
            }
            let term = traverse_expr(&ex.expr, terms)?;
            let name = Ident::new(&var_name(terms), ex.span());
            terms.push(quote! {
                let #name = -&#term;
            });
            Some(name)
        }
        Expr::Paren(ex) => traverse_expr(&ex.expr, terms),
        Expr::Lit(lit) => {
            let name = format_term(lit, terms);
            Some(name)
        }
        Expr::Path(path) => path.path.get_ident().cloned(),
        Expr::Call(call) => {
            let Expr::Path(func) = &*call.func else {
                return None;
            };
            let func = func.path.get_ident()?;
            if call.args.len() != 1 || !is_unary_fn(func) {
                return None;
            }
            let arg = traverse_expr(call.args.first()?, terms)?;
            let name = Ident::new(&var_name(terms), call.span());
            let ts = quote! {
                let #name = #arg.#func();
            };
            terms.push(ts);
            Some(name)
        }
        Expr::MethodCall(call) => {
            let method = &call.method;
            let args = &call.args;
            let known = (*method == "powi" && args.len() == 1)
                || (is_unary_fn(method) && args.is_empty());
            if !known {
                return None;
            }
            let receiver = traverse_expr(&call.receiver, terms)?;
            let name = Ident::new(&var_name(terms), call.span());
            let ts = quote! {
                let #name = #receiver.#method(#args);
            };
            terms.push(ts);
            Some(name)
        }
        _ => None,
    }
}
