use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use crate::errors::CalcError;
use crate::tokenizer::{BinOp, Token};

/// Wraps a token sequence in a single top-level bracket pair, closing any
/// brackets the user left open. A sequence that is already fully enclosed is
/// returned unchanged, so re-normalizing is a no-op.
pub fn normalize(mut tokens: Vec<Token>) -> Vec<Token> {
    if fully_enclosed(&tokens) {
        return tokens;
    }
    tokens.insert(0, Token::Open);
    let opens = tokens.iter().filter(|t| matches!(t, Token::Open)).count();
    let closes = tokens.iter().filter(|t| matches!(t, Token::Close)).count();
    for _ in closes..opens {
        tokens.push(Token::Close);
    }
    tokens
}

fn fully_enclosed(tokens: &[Token]) -> bool {
    if tokens.first() != Some(&Token::Open) {
        return false;
    }
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => depth += 1,
            Token::Close => match depth {
                0 | 1 => return depth == 1 && i == tokens.len() - 1,
                _ => depth -= 1,
            },
            _ => {}
        }
    }
    false
}

/// Reduces a normalized token sequence to a single exact value, innermost and
/// rightmost bracket group first.
pub fn evaluate(mut tokens: Vec<Token>) -> Result<BigRational, CalcError> {
    let operands = tokens.iter().filter(|t| matches!(t, Token::Num(_))).count();
    let operators = tokens.iter().filter(|t| matches!(t, Token::Op(_))).count();
    if operands < 2 || operators == 0 {
        return Err(CalcError::IncompleteExpression);
    }

    while let Some(open) = tokens.iter().rposition(|t| matches!(t, Token::Open)) {
        let close = tokens[open + 1..]
            .iter()
            .position(|t| matches!(t, Token::Close))
            .map(|i| open + 1 + i)
            .ok_or(CalcError::IncompleteExpression)?;
        let mut group: Vec<Token> = tokens.drain(open..=close).collect();
        group.pop();
        group.remove(0);
        let value = reduce_group(group)?;
        tokens.insert(open, Token::Num(value));
    }

    match tokens.pop() {
        Some(Token::Num(value)) if tokens.is_empty() => Ok(value),
        _ => Err(CalcError::IncompleteExpression),
    }
}

/// Collapses one bracket-free group to a value: first `^`/`root` left to
/// right, then `*`/`/` left to right, then the `+`/`-` chain.
fn reduce_group(mut items: Vec<Token>) -> Result<BigRational, CalcError> {
    while let Some(i) = items
        .iter()
        .position(|t| matches!(t, Token::Op(BinOp::Pow | BinOp::Root)))
    {
        let (left, right) = operands(&items, i)?;
        let value = match &items[i] {
            Token::Op(BinOp::Root) => {
                // a root b is the a-th root of b, i.e. b ^ (1/a)
                if left.is_zero() {
                    return Err(CalcError::DivisionByZero);
                }
                pow_rational(right, &left.recip())?
            }
            _ => pow_rational(left, right)?,
        };
        items[i - 1] = Token::Num(value);
        items.drain(i..=i + 1);
    }

    while let Some(i) = items
        .iter()
        .position(|t| matches!(t, Token::Op(BinOp::Mul | BinOp::Div)))
    {
        let (left, right) = operands(&items, i)?;
        let value = match &items[i] {
            Token::Op(BinOp::Div) => {
                if right.is_zero() {
                    return Err(CalcError::DivisionByZero);
                }
                left / right
            }
            _ => left * right,
        };
        items[i - 1] = Token::Num(value);
        items.drain(i..=i + 1);
    }

    let mut iter = items.into_iter();
    let mut acc = match iter.next() {
        Some(Token::Num(value)) => value,
        _ => return Err(CalcError::IncompleteExpression),
    };
    while let Some(op) = iter.next() {
        let rhs = match iter.next() {
            Some(Token::Num(value)) => value,
            _ => return Err(CalcError::IncompleteExpression),
        };
        match op {
            Token::Op(BinOp::Add) => acc += rhs,
            Token::Op(BinOp::Sub) => acc -= rhs,
            _ => return Err(CalcError::IncompleteExpression),
        }
    }
    Ok(acc)
}

fn operands(items: &[Token], i: usize) -> Result<(&BigRational, &BigRational), CalcError> {
    let left = match i.checked_sub(1).map(|j| &items[j]) {
        Some(Token::Num(value)) => value,
        _ => return Err(CalcError::IncompleteExpression),
    };
    let right = match items.get(i + 1) {
        Some(Token::Num(value)) => value,
        _ => return Err(CalcError::IncompleteExpression),
    };
    Ok((left, right))
}

// Largest integer exponent expanded exactly. Past this the result could not
// be displayed anyway.
const MAX_EXACT_EXPONENT: i64 = 100_000;

/// Raises `base` to a rational power, guarding the reductions that have no
/// real or representable result.
pub fn pow_rational(base: &BigRational, exp: &BigRational) -> Result<BigRational, CalcError> {
    if base.is_zero() && exp.is_negative() {
        return Err(CalcError::DivisionByZero);
    }
    if exp.is_integer() {
        let e = exp
            .to_integer()
            .to_i64()
            .filter(|e| e.abs() <= MAX_EXACT_EXPONENT)
            .ok_or(CalcError::Overflow)?;
        return Ok(base.pow(e as i32));
    }
    if base.is_negative() {
        // Odd roots of negatives stay real, even roots do not.
        if (exp.denom() % BigInt::from(2)).is_zero() {
            return Err(CalcError::ComplexResult);
        }
        return Ok(-pow_rational(&-base, exp)?);
    }
    let value = ratio_to_f64(base)?.powf(ratio_to_f64(exp)?);
    if !value.is_finite() {
        return Err(CalcError::Overflow);
    }
    BigRational::from_float(value).ok_or(CalcError::Overflow)
}

/// Converts an exact value to the nearest double. The quotient is scaled into
/// 64-bit range before dividing so that ratios with long numerators and
/// denominators neither overflow the intermediate division nor lose the bits
/// the display needs.
pub fn ratio_to_f64(r: &BigRational) -> Result<f64, CalcError> {
    if r.is_zero() {
        return Ok(0.0);
    }
    let mut num = r.numer().abs();
    let mut den = r.denom().clone();
    let shift = num.bits() as i64 - den.bits() as i64 - 64;
    if shift >= 0 {
        den <<= shift as usize;
    } else {
        num <<= (-shift) as usize;
    }
    let q = (num / den).to_f64().ok_or(CalcError::Overflow)?;
    let value = scale_by_pow2(q, shift);
    if r.is_negative() {
        Ok(-value)
    } else {
        Ok(value)
    }
}

// Multiplies by 2^exp in steps so gradual underflow and the overflow
// threshold behave the same as one exact scaling would.
fn scale_by_pow2(mut value: f64, mut exp: i64) -> f64 {
    while exp > 0 {
        let step = exp.min(1000);
        value *= 2f64.powi(step as i32);
        if !value.is_finite() {
            break;
        }
        exp -= step;
    }
    while exp < 0 {
        let step = (-exp).min(1000);
        value /= 2f64.powi(step as i32);
        if value == 0.0 {
            break;
        }
        exp += step;
    }
    value
}

/// Final conversion of an exact result to its display form. This is the one
/// place where exact arithmetic meets floating point.
pub fn to_display(value: &BigRational) -> Result<String, CalcError> {
    let f = ratio_to_f64(value)?;
    if !f.is_finite() {
        return Err(CalcError::Overflow);
    }
    Ok(format_display(f))
}

fn format_display(f: f64) -> String {
    if f == 0.0 {
        "0".to_string()
    } else if f.abs() >= 1e16 || f.abs() < 1e-5 {
        format!("{:e}", f)
    } else {
        f.to_string()
    }
}
