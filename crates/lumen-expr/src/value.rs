//! Declarative numeric parameters: a literal or a compiled `expr(...)`.

use std::fmt;

use crate::ast::{Expr, Vars};
use crate::error::ExprError;
use crate::parser::parse_expr;

/// An expression compiled once and re-evaluated every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    expr: Expr,
}

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let expr = parse_expr(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The expression text inside `expr(...)`.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.expr
    }

    #[inline]
    pub fn eval(&self, vars: &Vars) -> f64 {
        self.expr.eval(vars)
    }
}

/// A parameter that is either fixed or viewport-relative.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(f64),
    Expr(CompiledExpr),
}

impl ParamValue {
    #[inline]
    pub const fn literal(value: f64) -> Self {
        ParamValue::Literal(value)
    }

    /// Parses `expr(<expression>)` or a plain numeric string.
    ///
    /// ```rust
    /// use lumen_expr::{ParamValue, Vars};
    ///
    /// let half = ParamValue::parse("expr(width * 0.5)").unwrap();
    /// assert_eq!(half.eval(&Vars::new(800.0, 600.0, 1.0)), 400.0);
    /// ```
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let trimmed = text.trim();
        if let Some(inner) = strip_expr_wrapper(trimmed) {
            return CompiledExpr::compile(inner).map(ParamValue::Expr);
        }
        trimmed.parse::<f64>().map(ParamValue::Literal).map_err(|_| {
            ExprError::new(
                "expected a number or expr(<expression>)",
                text,
                1,
            )
        })
    }

    pub fn eval(&self, vars: &Vars) -> f64 {
        match self {
            ParamValue::Literal(v) => *v,
            ParamValue::Expr(e) => e.eval(vars),
        }
    }

    pub fn is_expr(&self) -> bool {
        matches!(self, ParamValue::Expr(_))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Literal(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Literal(v) => write!(f, "{v}"),
            ParamValue::Expr(e) => write!(f, "expr({})", e.source()),
        }
    }
}

/// Returns the text between `expr(` and the final `)`, if `text` has that shape.
fn strip_expr_wrapper(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("expr")?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner)
}
