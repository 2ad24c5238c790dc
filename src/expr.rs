
use crate::token::Token;

/// Identity of a variable‑reference node, assigned by the parser.
///
/// The resolver keys its distance table on this, so two textually identical
/// references (`a` and `a`) in different places resolve independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// Value of a literal expression, converted from its token at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LiteralValue),

    // Parenthesized expression
    Grouping(Box<Expr>),

    // `!x` or `-x`
    Unary {
        operator: Token,
        right: Box<Expr>,
    },

    // Arithmetic, comparison and equality operators
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },

    // Short-circuiting `and` / `or`
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },

    Variable {
        id: ExprId,
        name: Token,
    },

    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expr>,
    },

    Call {
        callee: Box<Expr>,
        // Closing ')' kept for runtime error locations
        paren: Token,
        arguments: Vec<Expr>,
    },
}
