use std::cmp::Ordering;

use super::{
    error::{wrong_contract, ScmResult},
    number::{self, ArithOp, Number},
    subr_core::{PrimitiveTable, Subr},
    value::Value,
};

fn number_arg<'a>(name: &str, args: &'a [Value], position: usize) -> ScmResult<&'a Number> {
    match &args[position] {
        Value::Number(n) => Ok(n),
        _ => wrong_contract(name, "number?", position, args),
    }
}

fn fold(name: &str, op: ArithOp, identity: i64, args: &[Value]) -> ScmResult {
    match args.len() {
        0 => Ok(Value::fixnum(identity)),
        1 if matches!(op, ArithOp::Sub | ArithOp::Div) => {
            let x = number_arg(name, args, 0)?;
            Ok(number::binary(op, &Number::Fixnum(identity), x)?.into())
        }
        _ => {
            let mut acc = number_arg(name, args, 0)?.clone();
            for i in 1..args.len() {
                acc = number::binary(op, &acc, number_arg(name, args, i)?)?;
            }
            Ok(acc.into())
        }
    }
}

fn plus(args: &[Value]) -> ScmResult {
    fold("+", ArithOp::Add, 0, args)
}

fn minus(args: &[Value]) -> ScmResult {
    fold("-", ArithOp::Sub, 0, args)
}

fn times(args: &[Value]) -> ScmResult {
    fold("*", ArithOp::Mul, 1, args)
}

fn divide(args: &[Value]) -> ScmResult {
    fold("/", ArithOp::Div, 1, args)
}

/// Checks that every adjacent pair of arguments satisfies `ok`.
fn compare_chain(name: &str, args: &[Value], ok: fn(Ordering) -> bool) -> ScmResult {
    let mut result = true;
    for i in 0..args.len() {
        let x = number_arg(name, args, i)?;
        if matches!(x, Number::Complex(_)) && name != "=" {
            return wrong_contract(name, "real?", i, args);
        }
        if i == 0 {
            continue;
        }
        let prev = number_arg(name, args, i - 1)?;
        // NaN compares false but does not stop argument checking
        result &= number::compare(prev, x).map_or(false, ok);
    }
    Ok(result.into())
}

fn num_eq(args: &[Value]) -> ScmResult {
    compare_chain("=", args, |o| o == Ordering::Equal)
}

fn num_lt(args: &[Value]) -> ScmResult {
    compare_chain("<", args, |o| o == Ordering::Less)
}

fn num_gt(args: &[Value]) -> ScmResult {
    compare_chain(">", args, |o| o == Ordering::Greater)
}

fn num_le(args: &[Value]) -> ScmResult {
    compare_chain("<=", args, |o| o != Ordering::Greater)
}

fn num_ge(args: &[Value]) -> ScmResult {
    compare_chain(">=", args, |o| o != Ordering::Less)
}

fn add1(args: &[Value]) -> ScmResult {
    let x = number_arg("add1", args, 0)?;
    Ok(number::binary(ArithOp::Add, x, &number::one())?.into())
}

fn sub1(args: &[Value]) -> ScmResult {
    let x = number_arg("sub1", args, 0)?;
    Ok(number::binary(ArithOp::Sub, x, &number::one())?.into())
}

fn zero_p(args: &[Value]) -> ScmResult {
    Ok(number_arg("zero?", args, 0)?.is_zero().into())
}

fn quotient(args: &[Value]) -> ScmResult {
    let x = number_arg("quotient", args, 0)?;
    let y = number_arg("quotient", args, 1)?;
    Ok(number::quotient(x, y, false)?.into())
}

fn remainder(args: &[Value]) -> ScmResult {
    let x = number_arg("remainder", args, 0)?;
    let y = number_arg("remainder", args, 1)?;
    Ok(number::quotient(x, y, true)?.into())
}

fn abs(args: &[Value]) -> ScmResult {
    Ok(number::abs(number_arg("abs", args, 0)?)?.into())
}

fn number_p(args: &[Value]) -> ScmResult {
    Ok(matches!(args[0], Value::Number(_)).into())
}

fn integer_p(args: &[Value]) -> ScmResult {
    Ok(args[0].as_number().map_or(false, Number::is_integer).into())
}

fn exact_p(args: &[Value]) -> ScmResult {
    Ok(number_arg("exact?", args, 0)?.is_exact().into())
}

fn inexact_p(args: &[Value]) -> ScmResult {
    Ok((!number_arg("inexact?", args, 0)?.is_exact()).into())
}

pub(crate) fn init(table: &mut PrimitiveTable) {
    table.define_subr("+", 0, 0, true, Subr::Simple(plus));
    table.define_subr("-", 1, 0, true, Subr::Simple(minus));
    table.define_subr("*", 0, 0, true, Subr::Simple(times));
    table.define_subr("/", 1, 0, true, Subr::Simple(divide));
    table.define_subr("=", 1, 0, true, Subr::Simple(num_eq));
    table.define_subr("<", 1, 0, true, Subr::Simple(num_lt));
    table.define_subr(">", 1, 0, true, Subr::Simple(num_gt));
    table.define_subr("<=", 1, 0, true, Subr::Simple(num_le));
    table.define_subr(">=", 1, 0, true, Subr::Simple(num_ge));
    table.define_subr("add1", 1, 0, false, Subr::Simple(add1));
    table.define_subr("sub1", 1, 0, false, Subr::Simple(sub1));
    table.define_subr("zero?", 1, 0, false, Subr::Simple(zero_p));
    table.define_subr("quotient", 2, 0, false, Subr::Simple(quotient));
    table.define_subr("remainder", 2, 0, false, Subr::Simple(remainder));
    table.define_subr("abs", 1, 0, false, Subr::Simple(abs));
    table.define_subr("number?", 1, 0, false, Subr::Simple(number_p));
    table.define_subr("integer?", 1, 0, false, Subr::Simple(integer_p));
    table.define_subr("exact?", 1, 0, false, Subr::Simple(exact_p));
    table.define_subr("inexact?", 1, 0, false, Subr::Simple(inexact_p));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(xs: &[i64]) -> Vec<Value> {
        xs.iter().map(|x| Value::fixnum(*x)).collect()
    }

    #[test]
    fn folds() {
        assert_eq!(plus(&nums(&[1, 2, 3])).unwrap().to_string(), "6");
        assert_eq!(plus(&[]).unwrap().to_string(), "0");
        assert_eq!(minus(&nums(&[5])).unwrap().to_string(), "-5");
        assert_eq!(divide(&nums(&[1, 3])).unwrap().to_string(), "1/3");
        assert_eq!(divide(&nums(&[6, 3])).unwrap().to_string(), "2");
        assert!(divide(&nums(&[1, 0])).is_err());
        assert!(plus(&[Value::Null]).is_err());
    }

    #[test]
    fn comparisons_chain() {
        assert!(num_lt(&nums(&[1, 2, 3])).unwrap().is_true());
        assert!(!num_lt(&nums(&[1, 3, 2])).unwrap().is_true());
        assert!(num_le(&nums(&[1, 1, 2])).unwrap().is_true());
        assert!(!num_eq(&[Value::flonum(f64::NAN), Value::flonum(f64::NAN)])
            .unwrap()
            .is_true());
        assert!(num_eq(&[Value::fixnum(2), Value::flonum(2.0)]).unwrap().is_true());
    }
}
