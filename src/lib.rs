pub mod ast_printer;
pub mod environment;
pub mod error;
pub mod expr;
pub mod interpreter;
mod native;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod session;
mod stack;
pub mod stmt;
pub mod token;
pub mod value;
