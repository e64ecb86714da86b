pub mod call;
pub mod env;
pub mod error;
pub mod eval;
pub mod expr;
pub mod factory;
pub mod lvalue;
pub mod value;
pub mod var;
