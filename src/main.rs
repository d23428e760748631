use anyhow::{bail, Error};
use std::io::BufRead;
use std::io::Write;

mod errors;
mod evaluator;
mod session;
mod tokenizer;

use errors::CalcError;
use session::{Key, Session};
use tokenizer::BinOp;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let mut session = Session::default();

    let args = std::env::args_os().skip(1);
    let stdout = std::io::stdout();
    let lock = stdout.lock();
    let mut w = std::io::BufWriter::new(lock);

    if args.len() > 0 {
        let mut expr = String::new();
        for arg in args {
            let Some(utf8_arg) = arg.to_str() else {
                bail!("Arguments contain invalid UTF-8 string");
            };
            expr.push_str(utf8_arg);
            expr.push(' ');
        }

        match eval_line(&mut session, &expr) {
            Ok(Some(result)) => writeln!(&mut w, "{}", result)?,
            Ok(None) => return Err(CalcError::IncompleteExpression.into()),
            Err(e) => return Err(e.into()),
        }
    } else {
        let stdin = std::io::stdin();
        let reader = std::io::BufReader::new(stdin);
        let is_interactive = atty::is(atty::Stream::Stdin);

        if is_interactive {
            write!(&mut w, ">>> ")?;
            w.flush()?;
        }

        for line in reader.lines() {
            match eval_line(&mut session, &line?) {
                Ok(Some(result)) => writeln!(&mut w, "{}", result)?,
                Ok(None) => {
                    // incomplete: the buffer carries over into the next line
                    let pending = format!("{} {}", session.expression(), session.entry());
                    let pending = pending.trim();
                    if is_interactive && !pending.is_empty() {
                        if session.open_brackets() > 0 {
                            writeln!(&mut w, ".. {} ( = {}", pending, session.open_brackets())?;
                        } else {
                            writeln!(&mut w, ".. {}", pending)?;
                        }
                    }
                }
                Err(e) => {
                    writeln!(&mut w, "error: {}", e)?;
                    session.press(Key::Clear)?;
                }
            }

            if is_interactive {
                let prompt = if session.memory_active() { "M>> " } else { ">>> " };
                write!(&mut w, "{}", prompt)?;
                w.flush()?;
            }
        }
    }
    w.flush()?;

    Ok(())
}

/// Feeds one line of words into the session and evaluates it. Returns the
/// displayed result, or `None` when the expression is still incomplete and
/// stays pending.
fn eval_line(session: &mut Session, line: &str) -> Result<Option<String>, CalcError> {
    let mut last = None;
    for word in line.split_whitespace() {
        match word {
            "=" => match session.evaluate() {
                Ok(shown) => last = Some(shown),
                Err(CalcError::IncompleteExpression) => {}
                Err(e) => return Err(e),
            },
            "(" => session.press(Key::Open)?,
            ")" => session.press(Key::Close)?,
            "c" | "C" => session.press(Key::Clear)?,
            "ms" | "MS" => session.press(Key::MemStore)?,
            "mr" | "MR" => session.press(Key::MemRecall)?,
            _ => match BinOp::from_symbol(word) {
                Some(op) => session.press(Key::Op(op))?,
                None => session.paste_operand(word)?,
            },
        }
    }

    match session.evaluate() {
        Ok(shown) => Ok(Some(shown)),
        Err(CalcError::IncompleteExpression) => Ok(last),
        Err(e) => Err(e),
    }
}
