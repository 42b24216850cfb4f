//! Viewport expressions for **lumen** compositor graphs.
//!
//! Graph descriptions size their render targets with values such as
//! `"expr(width * 0.5)"`. This crate compiles such strings once into a small
//! arithmetic tree that is re-evaluated each frame against the current
//! viewport. There is no general code execution: the grammar is limited to
//! numbers, `+ - * /`, parentheses and the identifiers `width`, `height` and
//! `dpr`.
//!
//! # Structure
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ast`] | `Expr`, `Var`, `Vars` |
//! | [`error`] | `ExprError` |
//! | [`lexer`] | `Lexer`, `Token` |
//! | [`parser`] | `parse_expr` entry point |
//! | [`value`] | `ParamValue`, `CompiledExpr` |
//!
//! # Quick start
//!
//! ```rust
//! use lumen_expr::{parse_expr, Vars};
//!
//! let e = parse_expr("(width - 20) / dpr").unwrap();
//! assert_eq!(e.eval(&Vars::new(820.0, 600.0, 2.0)), 400.0);
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{Expr, Var, Vars};
pub use error::ExprError;
pub use parser::parse_expr;
pub use value::{CompiledExpr, ParamValue};

#[cfg(test)]
mod eval_tests {
    use super::*;

    fn eval(src: &str, w: f64, h: f64, dpr: f64) -> f64 {
        parse_expr(src).unwrap().eval(&Vars::new(w, h, dpr))
    }
    fn err(src: &str) -> ExprError { parse_expr(src).unwrap_err() }

    #[test] fn literal() { assert_eq!(eval("42", 0.0, 0.0, 1.0), 42.0); }
    #[test] fn identifiers() {
        assert_eq!(eval("width", 800.0, 600.0, 2.0), 800.0);
        assert_eq!(eval("height", 800.0, 600.0, 2.0), 600.0);
        assert_eq!(eval("dpr", 800.0, 600.0, 2.0), 2.0);
    }
    #[test] fn precedence() { assert_eq!(eval("1 + 2 * 3", 0.0, 0.0, 1.0), 7.0); }
    #[test] fn left_associative() {
        assert_eq!(eval("10 - 4 - 3", 0.0, 0.0, 1.0), 3.0);
        assert_eq!(eval("64 / 4 / 2", 0.0, 0.0, 1.0), 8.0);
    }
    #[test] fn parentheses() { assert_eq!(eval("(1 + 2) * 3", 0.0, 0.0, 1.0), 9.0); }
    #[test] fn unary_minus() {
        assert_eq!(eval("-width + 10", 4.0, 0.0, 1.0), 6.0);
        assert_eq!(eval("--2", 0.0, 0.0, 1.0), 2.0);
        assert_eq!(eval("+3", 0.0, 0.0, 1.0), 3.0);
    }
    #[test] fn half_width_follows_resize() {
        let half = ParamValue::parse("expr(width*0.5)").unwrap();
        assert_eq!(half.eval(&Vars::new(800.0, 600.0, 1.0)), 400.0);
        assert_eq!(half.eval(&Vars::new(640.0, 480.0, 1.0)), 320.0);
    }
    #[test] fn physical_size() {
        assert_eq!(eval("width * dpr", 400.0, 300.0, 2.0), 800.0);
    }
    #[test] fn divide_by_zero_is_infinite() {
        assert!(eval("width / 0", 1.0, 0.0, 1.0).is_infinite());
    }
    #[test] fn constant_detection() {
        assert!(parse_expr("2 * (3 + 4)").unwrap().is_constant());
        assert!(!parse_expr("2 * height").unwrap().is_constant());
    }

    #[test] fn err_unknown_identifier() {
        let e = err("width * scale");
        assert_eq!(e.col, 9);
        assert!(e.message.contains("scale"));
    }
    #[test] fn err_unclosed_paren() { err("(width * 2"); }
    #[test] fn err_trailing_operator() { err("width *"); }
    #[test] fn err_dangling_token() { err("width 2"); }
    #[test] fn err_empty() { err("   "); }
    #[test] fn err_code_injection() { err("alert(1)"); }
    #[test] fn err_member_access() { err("window.innerWidth"); }
}
