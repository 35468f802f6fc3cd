//! Syntax tree produced by the parser and consumed once by code generation.

use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary {
        op: char,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn binary(op: char, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

/// A function's name and parameter names, without a body.
#[derive(Debug, PartialEq, Clone)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
}

impl Prototype {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Nullary prototype with an empty name, used to wrap top-level expressions.
    pub fn anonymous() -> Self {
        Self::new("", Vec::new())
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub prototype: Prototype,
    pub body: Expr,
}

impl Function {
    pub fn new(prototype: Prototype, body: Expr) -> Self {
        Self { prototype, body }
    }
}

/// One complete top-level unit.
#[derive(Debug, PartialEq, Clone)]
pub enum Item {
    Definition(Function),
    Extern(Prototype),
    /// A bare expression wrapped in an anonymous function.
    Expression(Function),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(value) => write!(f, "{value}"),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            Expr::Call { callee, args } => {
                write!(f, "(call {callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(" "))
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Definition(function) => {
                write!(f, "(def {} {})", function.prototype, function.body)
            }
            Item::Extern(prototype) => write!(f, "(extern {prototype})"),
            Item::Expression(function) => write!(f, "{}", function.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_s_expressions() {
        let expr = Expr::binary(
            '+',
            Expr::Number(1.0),
            Expr::Call {
                callee: "f".to_string(),
                args: vec![Expr::Variable("x".to_string()), Expr::Number(2.5)],
            },
        );
        assert_eq!(expr.to_string(), "(+ 1 (call f x 2.5))");

        let item = Item::Definition(Function::new(
            Prototype::new("id", vec!["a".to_string()]),
            Expr::Variable("a".to_string()),
        ));
        assert_eq!(item.to_string(), "(def id(a) a)");
    }

    #[test]
    fn anonymous_prototype_is_nullary_and_unnamed() {
        let proto = Prototype::anonymous();
        assert!(proto.is_anonymous());
        assert_eq!(proto.arity(), 0);
    }
}
