use crate::expr::{Expr, LiteralValue};
use crate::stack::ensure_sufficient_stack;
use crate::value::format_number;

/// Prints an expression in fully parenthesized prefix form, e.g.
/// `1 + 2 * 3` → `(+ 1 (* 2 3))`.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print(&self, expr: &Expr) -> String {
        ensure_sufficient_stack(|| self.print_node(expr))
    }

    fn print_node(&self, expr: &Expr) -> String {
        match expr {
            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => self.parenthesize(&operator.lexeme, &[&**left, &**right]),

            Expr::Unary { operator, right } => self.parenthesize(&operator.lexeme, &[&**right]),

            Expr::Literal(value) => literal(value),

            Expr::Grouping(inner) => self.parenthesize("group", &[&**inner]),

            Expr::Variable { name, .. } => name.lexeme.clone(),

            Expr::Assign { name, value, .. } => {
                format!("(= {} {})", name.lexeme, self.print(value))
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                let mut out = format!("(call {}", self.print(callee));
                for arg in arguments {
                    out.push(' ');
                    out.push_str(&self.print(arg));
                }
                out.push(')');
                out
            }
        }
    }

    fn parenthesize(&self, name: &str, exprs: &[&Expr]) -> String {
        let mut out = format!("({}", name);
        for expr in exprs {
            out.push(' ');
            out.push_str(&self.print(expr));
        }
        out.push(')');
        out
    }
}

/// Prints an expression in reverse Polish notation, e.g.
/// `(1 + 2) * (4 - 3)` → `1 2 + 4 3 - *`. Groupings add nothing of their own.
pub struct RpnPrinter;

impl RpnPrinter {
    pub fn print(&self, expr: &Expr) -> String {
        ensure_sufficient_stack(|| self.print_node(expr))
    }

    fn print_node(&self, expr: &Expr) -> String {
        match expr {
            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => format!("{} {} {}", self.print(left), self.print(right), operator.lexeme),

            Expr::Unary { operator, right } => format!("{} {}", self.print(right), operator.lexeme),

            Expr::Literal(value) => literal(value),

            Expr::Grouping(inner) => self.print(inner),

            Expr::Variable { name, .. } => name.lexeme.clone(),

            Expr::Assign { name, value, .. } => {
                format!("{} {} =", name.lexeme, self.print(value))
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                let mut out = self.print(callee);
                for arg in arguments {
                    out.push(' ');
                    out.push_str(&self.print(arg));
                }
                out.push_str(" call");
                out
            }
        }
    }
}

fn literal(value: &LiteralValue) -> String {
    match value {
        LiteralValue::Number(n) => format_number(*n),

        LiteralValue::Str(s) => s.clone(),

        LiteralValue::Bool(b) => b.to_string(),

        LiteralValue::Nil => "nil".to_string(),
    }
}
