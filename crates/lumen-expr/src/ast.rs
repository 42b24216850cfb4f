//! Expression tree and evaluation.

/// Viewport variables an expression may reference.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Var {
    Width,
    Height,
    Dpr,
}

impl Var {
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "width" => Some(Var::Width),
            "height" => Some(Var::Height),
            "dpr" => Some(Var::Dpr),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Var::Width => "width",
            Var::Height => "height",
            Var::Dpr => "dpr",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(Var),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Values bound to [`Var`] for one evaluation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Vars {
    pub width: f64,
    pub height: f64,
    pub dpr: f64,
}

impl Vars {
    #[inline]
    pub const fn new(width: f64, height: f64, dpr: f64) -> Self {
        Self { width, height, dpr }
    }

    #[inline]
    pub fn get(&self, var: Var) -> f64 {
        match var {
            Var::Width => self.width,
            Var::Height => self.height,
            Var::Dpr => self.dpr,
        }
    }
}

impl Expr {
    /// Evaluates the tree. Division by zero follows IEEE rules; callers decide
    /// whether a non-finite result is acceptable.
    pub fn eval(&self, vars: &Vars) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Var(v) => vars.get(*v),
            Expr::Neg(e) => -e.eval(vars),
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.eval(vars);
                let b = rhs.eval(vars);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                }
            }
        }
    }

    /// Returns `true` if the tree references no viewport variable.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Number(_) => true,
            Expr::Var(_) => false,
            Expr::Neg(e) => e.is_constant(),
            Expr::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
        }
    }
}
