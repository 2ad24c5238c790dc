use std::rc::Rc;

use crate::expr::Expr;
use crate::token::Token;

/// A `fun` declaration. Shared between the AST and every closure created
/// from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Stmt>,
}

/// Statements. `for` loops have no node of their own: the parser desugars
/// them into `Block`/`While`.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Expr),

    Print {
        // Locates output failures
        keyword: Token,
        value: Expr,
    },

    Var {
        name: Token,
        initializer: Option<Expr>,
    },

    Block(Vec<Stmt>),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    Function(Rc<FunctionDecl>),

    Return {
        keyword: Token,
        value: Option<Expr>,
    },
}
