use compact_str::ToCompactString;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Pow, Zero};

use crate::errors::CalcError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(BigRational),
    Op(BinOp),
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Root,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
            BinOp::Root => "root",
        }
    }

    pub fn from_symbol(word: &str) -> Option<BinOp> {
        match word {
            "+" => Some(BinOp::Add),
            "-" => Some(BinOp::Sub),
            "*" => Some(BinOp::Mul),
            "/" => Some(BinOp::Div),
            "^" => Some(BinOp::Pow),
            "root" => Some(BinOp::Root),
            _ => None,
        }
    }
}

/// Splits a space-separated expression into tokens. Words that are neither
/// operators nor brackets must parse as numeric literals.
pub fn tokenize(expr: &str) -> Result<Vec<Token>, CalcError> {
    expr.split_whitespace()
        .map(|word| match word {
            "(" => Ok(Token::Open),
            ")" => Ok(Token::Close),
            _ => match BinOp::from_symbol(word) {
                Some(op) => Ok(Token::Op(op)),
                None => parse_number(word).map(Token::Num),
            },
        })
        .collect()
}

// Decimal magnitudes a double cannot hold. Anything provably above the upper
// bound is rejected up front, anything provably below the lower bound would
// round to zero on display anyway and parses as exact zero.
const MAX_MAGNITUDE: i64 = 309;
const MIN_MAGNITUDE: i64 = -324;

/// Parses a numeric literal (optional sign, optional decimal point, optional
/// `e`-exponent) into an exact rational. No float round-trip is involved, so
/// `0.1` really is one tenth.
pub fn parse_number(word: &str) -> Result<BigRational, CalcError> {
    let malformed = || CalcError::MalformedToken(word.to_compact_string());

    let (mantissa, exp) = match word.find(['e', 'E']) {
        Some(pos) => {
            let etxt = &word[pos + 1..];
            let digits = etxt.strip_prefix(['+', '-']).unwrap_or(etxt);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            // An exponent with more digits than fit in an i64 is far past
            // anything the display range can hold.
            let exp: i64 = etxt.parse().map_err(|_| CalcError::Overflow)?;
            (&word[..pos], exp)
        }
        None => (word, 0),
    };

    let (neg, digits) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(malformed());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }

    // Upper bound on the literal's decimal magnitude.
    let significant = int_part.trim_start_matches('0');
    let magnitude = if !significant.is_empty() {
        exp.saturating_add(significant.len() as i64)
    } else {
        match frac_part.bytes().position(|b| b != b'0') {
            Some(zeros) => exp.saturating_sub(zeros as i64),
            None => return Ok(BigRational::zero()),
        }
    };
    if magnitude > MAX_MAGNITUDE {
        return Err(CalcError::Overflow);
    }
    if magnitude < MIN_MAGNITUDE {
        return Ok(BigRational::zero());
    }

    let mut numer: BigInt = format!("{int_part}{frac_part}")
        .parse()
        .map_err(|_| malformed())?;
    if neg {
        numer = -numer;
    }
    let scale = exp - frac_part.len() as i64;
    let value = if scale >= 0 {
        BigRational::from_integer(numer * BigInt::from(10).pow(scale as u32))
    } else {
        BigRational::new(numer, BigInt::from(10).pow(-scale as u32))
    };
    Ok(value)
}
