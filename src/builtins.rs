// Baseline bindings installed into the root environment.
//
// A builtin sees the frame under application: operand 0 is the builtin
// itself, the arguments sit above it. It leaves its results on the stack
// and reports how many of the topmost values to hand to the caller.

use crate::error::Result;
use crate::heap::FrameRef;
use crate::interp::Interp;
use crate::value::Builtin;

pub const BASELINE: &[(&str, Builtin)] = &[
    ("car", car),
    ("cdr", cdr),
    ("lambda", lambda),
    ("def", def),
    ("if", branch),
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", div),
    (">", gt),
    ("<", lt),
    ("=", eq),
];

pub fn car(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let v = it.pop_sexpr(f)?;
    let p = it.pair(v).expect("typed pop returned a pair");
    match p.head {
        Some(head) => it.stack_push(f, head)?,
        None => return it.fail("cannot take the head of an empty s-expression".to_string()),
    }
    Ok(1)
}

pub fn cdr(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let v = it.pop_sexpr(f)?;
    let p = it.pair(v).expect("typed pop returned a pair");
    match p.tail {
        Some(tail) => it.stack_push(f, tail)?,
        None => it.push_sexpr(f, None, None)?,
    }
    Ok(1)
}

pub fn lambda(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let body = it.pop_sexpr(f)?;
    let params = it.pop_sexpr(f)?;
    it.push_lambda(f, Some(params), Some(body))?;
    Ok(1)
}

// (def {a b} 1 2) binds a and b in the environment in effect, pairwise
// until either list runs out, and yields ().
pub fn def(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let n = it.stack_size(f);
    if n < 2 {
        return it.fail("def expects a list of symbols and one value per symbol".to_string());
    }
    let names = it.get_sexpr(f, 1)?;
    let mut values = Vec::new();
    for i in 2..n {
        values.push(it.stack_get(f, i)?);
    }

    let env = it.frame_env(f);
    let mut cursor = it.pair(names);
    for v in values {
        let cell = match cursor {
            Some(c) => c,
            None => break,
        };
        let key = match cell.head {
            Some(k) => k,
            None => break,
        };
        it.env_put(env, key, v)?;
        cursor = cell.tail.and_then(|t| it.pair(t));
    }

    it.push_sexpr(f, None, None)?;
    Ok(1)
}

// (if c t e) selects t when c is non-zero, e otherwise. The branches are
// plain values; wrap them in zero-parameter closures and apply the
// selection to defer evaluation.
pub fn branch(it: &mut Interp, f: FrameRef) -> Result<usize> {
    if it.stack_size(f) != 4 {
        return it.fail("if expects a condition and two branches".to_string());
    }
    let alternative = it.stack_pop(f)?;
    let consequent = it.stack_pop(f)?;
    let condition = it.pop_number(f)?;
    it.stack_push(f, if condition != 0 { consequent } else { alternative })?;
    Ok(1)
}

// Pop every argument above the builtin as a number, restoring the
// left-to-right order.
fn numeric_args(it: &mut Interp, f: FrameRef) -> Result<Vec<i32>> {
    let n = it.stack_size(f);
    let mut args = Vec::with_capacity(n.saturating_sub(1));
    for _ in 1..n {
        args.push(it.pop_number(f)?);
    }
    args.reverse();
    Ok(args)
}

pub fn add(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let args = numeric_args(it, f)?;
    let sum = args.iter().fold(0i32, |a, b| a.wrapping_add(*b));
    it.push_number(f, sum)?;
    Ok(1)
}

pub fn sub(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let args = numeric_args(it, f)?;
    let result = match args.split_first() {
        None => return it.fail("- expects at least one argument".to_string()),
        Some((first, [])) => first.wrapping_neg(),
        Some((first, rest)) => rest.iter().fold(*first, |a, b| a.wrapping_sub(*b)),
    };
    it.push_number(f, result)?;
    Ok(1)
}

pub fn mul(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let args = numeric_args(it, f)?;
    let product = args.iter().fold(1i32, |a, b| a.wrapping_mul(*b));
    it.push_number(f, product)?;
    Ok(1)
}

pub fn div(it: &mut Interp, f: FrameRef) -> Result<usize> {
    let args = numeric_args(it, f)?;
    let (first, rest) = match args.split_first() {
        Some(split) => split,
        None => return it.fail("/ expects at least one argument".to_string()),
    };
    let mut result = *first;
    for d in rest {
        if *d == 0 {
            return it.fail("division by zero".to_string());
        }
        result = result.wrapping_div(*d);
    }
    it.push_number(f, result)?;
    Ok(1)
}

fn compare(it: &mut Interp, f: FrameRef, name: &str, test: fn(i32, i32) -> bool) -> Result<usize> {
    let args = numeric_args(it, f)?;
    if args.len() != 2 {
        return it.fail(format!("{} expects exactly 2 arguments", name));
    }
    it.push_number(f, if test(args[0], args[1]) { 1 } else { 0 })?;
    Ok(1)
}

pub fn gt(it: &mut Interp, f: FrameRef) -> Result<usize> {
    compare(it, f, ">", |a, b| a > b)
}

pub fn lt(it: &mut Interp, f: FrameRef) -> Result<usize> {
    compare(it, f, "<", |a, b| a < b)
}

pub fn eq(it: &mut Interp, f: FrameRef) -> Result<usize> {
    compare(it, f, "=", |a, b| a == b)
}
