use num_rational::BigRational;
use num_traits::Zero;

use crate::errors::CalcError;
use crate::evaluator::{self, pow_rational};
use crate::tokenizer::{parse_number, tokenize, BinOp, Token};

/// One calculator button press. `Digit` carries a value in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    Decimal,
    Sign,
    Exponent,
    Op(BinOp),
    Open,
    Close,
    Delete,
    Clear,
    MemStore,
    MemRecall,
    Recip,
    Sqrt,
    Square,
    Cube,
    CubeRoot,
}

/// Calculator session: the expression buffer being built key by key, the
/// bracket depth, the just-computed flag and the one-slot memory register.
///
/// The buffer lives in two parts, like the two lines of a desk calculator:
/// `entry` is the operand currently being edited and `ops` the committed
/// expression, kept as space-separated words that the tokenizer consumes at
/// evaluation time.
#[derive(Debug, Default)]
pub struct Session {
    entry: String,
    ops: String,
    open_brackets: u32,
    just_computed: bool,
    memory: Option<String>,
}

impl Session {
    /// The operand being edited, or the last result right after a computation.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The committed part of the pending expression.
    pub fn expression(&self) -> &str {
        self.ops.trim_end()
    }

    /// Number of bracket groups still open.
    pub fn open_brackets(&self) -> u32 {
        self.open_brackets
    }

    /// Whether the memory register holds a value.
    pub fn memory_active(&self) -> bool {
        self.memory.is_some()
    }

    /// Applies one key press. Editing keys never fail; contextually invalid
    /// presses are ignored, as on a physical calculator. The immediate math
    /// keys surface domain errors and clear the buffer when they do.
    pub fn press(&mut self, key: Key) -> Result<(), CalcError> {
        match key {
            Key::Digit(d) => self.digit(d),
            Key::Decimal => self.decimal(),
            Key::Sign => self.sign(),
            Key::Exponent => self.exponent(),
            Key::Op(op) => self.operator(op),
            Key::Open => self.open_bracket(),
            Key::Close => self.close_bracket(),
            Key::Delete => self.delete(),
            Key::Clear => self.clear(),
            Key::MemStore => self.memory_store(),
            Key::MemRecall => self.memory_recall(),
            Key::Recip => return self.reciprocal(),
            Key::Sqrt => return self.apply_root(2),
            Key::Square => return self.apply_power(2),
            Key::Cube => return self.apply_power(3),
            Key::CubeRoot => return self.apply_root(3),
        }
        Ok(())
    }

    /// Replaces the entry with an externally supplied operand after checking
    /// that it parses as a number. Rejection leaves the session untouched.
    pub fn paste_operand(&mut self, text: &str) -> Result<(), CalcError> {
        parse_number(text)?;
        self.entry.clear();
        self.entry.push_str(text);
        Ok(())
    }

    /// Evaluates the pending expression. Success replaces the buffer with the
    /// result so the next operator chains on it; failure clears the buffer,
    /// except an incomplete expression, which leaves it untouched.
    pub fn evaluate(&mut self) -> Result<String, CalcError> {
        match self.run_evaluation() {
            Ok(shown) => {
                self.clear();
                self.entry.push_str(&shown);
                self.just_computed = true;
                Ok(shown)
            }
            Err(CalcError::IncompleteExpression) => Err(CalcError::IncompleteExpression),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn run_evaluation(&self) -> Result<String, CalcError> {
        let mut tokens = tokenize(&self.ops)?;
        if self.entry.is_empty() {
            // drop a dangling operator or open bracket left by the last press
            if matches!(tokens.last(), Some(Token::Op(_) | Token::Open)) {
                tokens.pop();
            }
        } else {
            tokens.push(Token::Num(parse_number(&self.entry)?));
        }
        let value = evaluator::evaluate(evaluator::normalize(tokens))?;
        evaluator::to_display(&value)
    }

    fn digit(&mut self, d: u8) {
        if self.just_computed {
            self.entry.clear();
            self.just_computed = false;
        }
        if let Some(epos) = self.entry.find('e') {
            // digits edit the exponent; a leading zero is replaced, not extended
            let leading_zero = &self.entry[epos + 2..] == "0";
            if leading_zero && d != 0 {
                self.entry.truncate(epos + 2);
                self.entry.push(digit_char(d));
            } else if !leading_zero {
                self.entry.push(digit_char(d));
            }
            return;
        }
        if d == 0 {
            // no leading-zero runs
            if self.entry.contains('.') || self.entry.is_empty() || !self.entry.starts_with('0') {
                self.entry.push('0');
            }
            return;
        }
        self.entry.push(digit_char(d));
    }

    fn decimal(&mut self) {
        if self.just_computed {
            self.entry.clear();
            self.entry.push_str("0.");
            self.just_computed = false;
            return;
        }
        if self.entry.contains('.') || self.entry.contains('e') {
            return;
        }
        if self.entry.is_empty() {
            self.entry.push_str("0.");
        } else {
            self.entry.push('.');
        }
    }

    fn sign(&mut self) {
        if self.entry.is_empty() {
            return;
        }
        if let Some(epos) = self.entry.find('e') {
            let flipped = if self.entry.as_bytes()[epos + 1] == b'-' {
                "+"
            } else {
                "-"
            };
            self.entry.replace_range(epos + 1..epos + 2, flipped);
        } else if let Some(rest) = self.entry.strip_prefix('-') {
            self.entry = rest.to_string();
        } else {
            self.entry.insert(0, '-');
        }
    }

    fn exponent(&mut self) {
        // only a plain non-zero operand without a trailing point converts
        if self.entry.is_empty()
            || self.entry.contains('e')
            || self.entry.ends_with('.')
            || self.just_computed
        {
            return;
        }
        if parse_number(&self.entry).map_or(true, |v| v.is_zero()) {
            return;
        }
        self.entry.push_str("e+0");
    }

    fn operator(&mut self, op: BinOp) {
        if !self.entry.is_empty() && !self.ops.ends_with(") ") {
            let operand = self.entry.strip_suffix('.').unwrap_or(&self.entry);
            self.ops.push_str(operand);
            self.ops.push(' ');
            self.ops.push_str(op.symbol());
            self.ops.push(' ');
            self.entry.clear();
            self.just_computed = false;
        } else if self.entry.is_empty() && self.ops.ends_with(") ") {
            self.ops.push_str(op.symbol());
            self.ops.push(' ');
            self.just_computed = false;
        }
    }

    fn open_bracket(&mut self) {
        let empty = self.entry.is_empty();
        if (empty && self.ops.is_empty())
            || (empty && self.ops.ends_with("( "))
            || self.ends_with_operator()
        {
            self.ops.push_str("( ");
            self.open_brackets += 1;
        }
    }

    fn close_bracket(&mut self) {
        if self.open_brackets == 0 {
            return;
        }
        if !self.entry.is_empty() && self.ends_with_operator() {
            self.ops.push_str(&self.entry);
            self.ops.push(' ');
            self.ops.push_str(") ");
            self.entry.clear();
            self.open_brackets -= 1;
        } else if self.ops.ends_with(") ") {
            self.ops.push_str(") ");
            self.open_brackets -= 1;
        }
    }

    fn delete(&mut self) {
        if self.entry.is_empty() || self.just_computed {
            return;
        }
        if let Some(epos) = self.entry.find('e') {
            let digits = self.entry.len() - (epos + 2);
            if digits >= 2 {
                self.entry.pop();
            } else if digits == 1 && &self.entry[epos + 2..] != "0" {
                self.entry.replace_range(epos + 2.., "0");
            } else {
                self.entry.truncate(epos);
            }
        } else {
            self.entry.pop();
        }
    }

    /// Clears the pending expression and bracket state. The memory register
    /// survives.
    fn clear(&mut self) {
        self.entry.clear();
        self.ops.clear();
        self.open_brackets = 0;
        self.just_computed = false;
    }

    fn memory_store(&mut self) {
        if !self.entry.is_empty() {
            self.memory = Some(self.entry.clone());
        }
    }

    fn memory_recall(&mut self) {
        if let Some(stored) = &self.memory {
            self.entry = stored.clone();
        }
    }

    fn reciprocal(&mut self) -> Result<(), CalcError> {
        let Some(value) = self.entry_value()? else {
            return Ok(());
        };
        if value.is_zero() {
            self.clear();
            return Err(CalcError::DivisionByZero);
        }
        self.show_result(&value.recip())
    }

    fn apply_power(&mut self, n: i64) -> Result<(), CalcError> {
        let Some(value) = self.entry_value()? else {
            return Ok(());
        };
        let exp = BigRational::from_integer(n.into());
        match pow_rational(&value, &exp) {
            Ok(result) => self.show_result(&result),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn apply_root(&mut self, n: i64) -> Result<(), CalcError> {
        let Some(value) = self.entry_value()? else {
            return Ok(());
        };
        let exp = BigRational::new(1.into(), n.into());
        match pow_rational(&value, &exp) {
            Ok(result) => self.show_result(&result),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn entry_value(&mut self) -> Result<Option<BigRational>, CalcError> {
        if self.entry.is_empty() {
            return Ok(None);
        }
        match parse_number(&self.entry) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn show_result(&mut self, value: &BigRational) -> Result<(), CalcError> {
        match evaluator::to_display(value) {
            Ok(shown) => {
                self.entry = shown;
                self.just_computed = true;
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    fn ends_with_operator(&self) -> bool {
        self.ops
            .split_whitespace()
            .next_back()
            .map_or(false, |word| BinOp::from_symbol(word).is_some())
    }
}

fn digit_char(d: u8) -> char {
    (b'0' + d) as char
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn press_all(session: &mut Session, text: &str) {
        for c in text.chars() {
            let key = match c {
                '0'..='9' => Key::Digit(c as u8 - b'0'),
                '.' => Key::Decimal,
                _ => panic!("unexpected key char {c:?}"),
            };
            session.press(key).unwrap();
        }
    }

    #[test]
    fn test_builds_expression_and_computes() {
        let mut session = Session::default();
        press_all(&mut session, "12");
        session.press(Key::Op(BinOp::Add)).unwrap();
        press_all(&mut session, "3");
        assert_eq!(session.expression(), "12 +");
        assert_eq!(session.evaluate().unwrap(), "15");
        assert_eq!(session.entry(), "15");
        assert_eq!(session.expression(), "");
    }

    #[test]
    fn test_result_chains_into_next_expression() {
        let mut session = Session::default();
        press_all(&mut session, "12");
        session.press(Key::Op(BinOp::Add)).unwrap();
        press_all(&mut session, "3");
        session.evaluate().unwrap();
        session.press(Key::Op(BinOp::Mul)).unwrap();
        press_all(&mut session, "2");
        assert_eq!(session.evaluate().unwrap(), "30");
    }

    #[test]
    fn test_digit_after_result_starts_fresh() {
        let mut session = Session::default();
        press_all(&mut session, "6");
        session.press(Key::Op(BinOp::Mul)).unwrap();
        press_all(&mut session, "7");
        session.evaluate().unwrap();
        press_all(&mut session, "9");
        assert_eq!(session.entry(), "9");
    }

    #[test]
    fn test_decimal_rules() {
        let mut session = Session::default();
        session.press(Key::Decimal).unwrap();
        assert_eq!(session.entry(), "0.");
        press_all(&mut session, "5");
        session.press(Key::Decimal).unwrap();
        assert_eq!(session.entry(), "0.5");
    }

    #[test]
    fn test_zero_does_not_repeat_in_the_lead() {
        let mut session = Session::default();
        press_all(&mut session, "0");
        press_all(&mut session, "0");
        assert_eq!(session.entry(), "0");
        press_all(&mut session, "5");
        assert_eq!(session.entry(), "05");
    }

    #[test]
    fn test_sign_toggle() {
        let mut session = Session::default();
        session.press(Key::Sign).unwrap();
        assert_eq!(session.entry(), "");
        press_all(&mut session, "42");
        session.press(Key::Sign).unwrap();
        assert_eq!(session.entry(), "-42");
        session.press(Key::Sign).unwrap();
        assert_eq!(session.entry(), "42");
    }

    #[test]
    fn test_exponent_editing() {
        let mut session = Session::default();
        press_all(&mut session, "5");
        session.press(Key::Exponent).unwrap();
        assert_eq!(session.entry(), "5e+0");
        press_all(&mut session, "3");
        assert_eq!(session.entry(), "5e+3");
        press_all(&mut session, "0");
        assert_eq!(session.entry(), "5e+30");
        session.press(Key::Sign).unwrap();
        assert_eq!(session.entry(), "5e-30");
        session.press(Key::Delete).unwrap();
        assert_eq!(session.entry(), "5e-3");
        session.press(Key::Delete).unwrap();
        assert_eq!(session.entry(), "5e-0");
        session.press(Key::Delete).unwrap();
        assert_eq!(session.entry(), "5");
    }

    #[test]
    fn test_exponent_rejected_when_invalid() {
        let mut session = Session::default();
        session.press(Key::Exponent).unwrap();
        assert_eq!(session.entry(), "");
        press_all(&mut session, "0");
        session.press(Key::Exponent).unwrap();
        assert_eq!(session.entry(), "0");
        session.press(Key::Clear).unwrap();
        press_all(&mut session, "3.");
        session.press(Key::Exponent).unwrap();
        assert_eq!(session.entry(), "3.");
    }

    #[test]
    fn test_operator_needs_an_operand() {
        let mut session = Session::default();
        session.press(Key::Op(BinOp::Add)).unwrap();
        assert_eq!(session.expression(), "");
        press_all(&mut session, "3");
        session.press(Key::Op(BinOp::Add)).unwrap();
        session.press(Key::Op(BinOp::Mul)).unwrap();
        assert_eq!(session.expression(), "3 +");
    }

    #[test]
    fn test_trailing_decimal_dropped_on_commit() {
        let mut session = Session::default();
        press_all(&mut session, "3.");
        session.press(Key::Op(BinOp::Add)).unwrap();
        assert_eq!(session.expression(), "3 +");
    }

    #[test]
    fn test_bracketed_expression() {
        let mut session = Session::default();
        session.press(Key::Open).unwrap();
        press_all(&mut session, "2");
        session.press(Key::Op(BinOp::Add)).unwrap();
        press_all(&mut session, "3");
        session.press(Key::Close).unwrap();
        assert_eq!(session.open_brackets(), 0);
        assert_eq!(session.expression(), "( 2 + 3 )");
        session.press(Key::Op(BinOp::Mul)).unwrap();
        press_all(&mut session, "4");
        assert_eq!(session.evaluate().unwrap(), "20");
    }

    #[test]
    fn test_unmatched_open_bracket_is_closed_at_evaluate() {
        let mut session = Session::default();
        session.press(Key::Open).unwrap();
        press_all(&mut session, "2");
        session.press(Key::Op(BinOp::Add)).unwrap();
        press_all(&mut session, "3");
        assert_eq!(session.open_brackets(), 1);
        assert_eq!(session.evaluate().unwrap(), "5");
        assert_eq!(session.open_brackets(), 0);
    }

    #[test]
    fn test_close_without_open_is_ignored() {
        let mut session = Session::default();
        press_all(&mut session, "3");
        session.press(Key::Close).unwrap();
        assert_eq!(session.expression(), "");
        assert_eq!(session.entry(), "3");
    }

    #[test]
    fn test_incomplete_expression_is_kept() {
        let mut session = Session::default();
        press_all(&mut session, "3");
        session.press(Key::Op(BinOp::Add)).unwrap();
        assert_matches!(session.evaluate(), Err(CalcError::IncompleteExpression));
        assert_eq!(session.expression(), "3 +");
    }

    #[test]
    fn test_errors_clear_the_buffer() {
        let mut session = Session::default();
        press_all(&mut session, "5");
        session.press(Key::Op(BinOp::Div)).unwrap();
        press_all(&mut session, "0");
        assert_matches!(session.evaluate(), Err(CalcError::DivisionByZero));
        assert_eq!(session.expression(), "");
        assert_eq!(session.entry(), "");
    }

    #[test]
    fn test_nth_root_key_sequence() {
        let mut session = Session::default();
        press_all(&mut session, "4");
        session.press(Key::Op(BinOp::Root)).unwrap();
        press_all(&mut session, "16");
        assert_eq!(session.evaluate().unwrap(), "2");
    }

    #[test]
    fn test_memory_survives_clear() {
        let mut session = Session::default();
        press_all(&mut session, "7");
        session.press(Key::MemStore).unwrap();
        session.press(Key::Clear).unwrap();
        assert_eq!(session.entry(), "");
        assert!(session.memory_active());
        session.press(Key::MemRecall).unwrap();
        assert_eq!(session.entry(), "7");
    }

    #[test]
    fn test_reciprocal() {
        let mut session = Session::default();
        press_all(&mut session, "4");
        session.press(Key::Recip).unwrap();
        assert_eq!(session.entry(), "0.25");
        session.press(Key::Clear).unwrap();
        press_all(&mut session, "0");
        assert_matches!(session.press(Key::Recip), Err(CalcError::DivisionByZero));
        assert_eq!(session.entry(), "");
    }

    #[test]
    fn test_square_root_of_negative_fails() {
        let mut session = Session::default();
        press_all(&mut session, "9");
        session.press(Key::Sqrt).unwrap();
        assert_eq!(session.entry(), "3");
        press_all(&mut session, "4");
        session.press(Key::Sign).unwrap();
        assert_matches!(session.press(Key::Sqrt), Err(CalcError::ComplexResult));
        assert_eq!(session.entry(), "");
    }

    #[test]
    fn test_cube_root_keeps_sign() {
        let mut session = Session::default();
        press_all(&mut session, "8");
        session.press(Key::Sign).unwrap();
        session.press(Key::CubeRoot).unwrap();
        assert_eq!(session.entry(), "-2");
    }

    #[test]
    fn test_square_and_cube() {
        let mut session = Session::default();
        press_all(&mut session, "12");
        session.press(Key::Square).unwrap();
        assert_eq!(session.entry(), "144");
        session.press(Key::Clear).unwrap();
        press_all(&mut session, "3");
        session.press(Key::Cube).unwrap();
        assert_eq!(session.entry(), "27");
    }

    #[test]
    fn test_paste_validates() {
        let mut session = Session::default();
        session.paste_operand("2.5e3").unwrap();
        assert_eq!(session.entry(), "2.5e3");
        assert_matches!(
            session.paste_operand("abc"),
            Err(CalcError::MalformedToken(_))
        );
        assert_eq!(session.entry(), "2.5e3");
    }

    #[test]
    fn test_over_range_literal_overflows() {
        let mut session = Session::default();
        press_all(&mut session, "9");
        session.press(Key::Exponent).unwrap();
        press_all(&mut session, "400");
        session.press(Key::Op(BinOp::Add)).unwrap();
        press_all(&mut session, "1");
        assert_matches!(session.evaluate(), Err(CalcError::Overflow));
        assert_eq!(session.expression(), "");
    }

    #[test]
    fn test_delete_edits_the_entry() {
        let mut session = Session::default();
        press_all(&mut session, "123");
        session.press(Key::Delete).unwrap();
        assert_eq!(session.entry(), "12");
        session.press(Key::Op(BinOp::Add)).unwrap();
        press_all(&mut session, "1");
        session.evaluate().unwrap();
        session.press(Key::Delete).unwrap();
        assert_eq!(session.entry(), "13");
    }
}
