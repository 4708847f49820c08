use std::fmt;
use std::rc::Rc;

use crate::token::{Literal, Token};

/// Identity of a name-bearing expression, used as the key of the resolver's
/// side table. Ids are handed out by the parser and never reused within one
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Assign {
        id: NodeId,
        name: Token,
        value: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        paren: Token,
        arguments: Vec<Expr>,
    },
    Get {
        object: Box<Expr>,
        name: Token,
    },
    Grouping {
        expression: Box<Expr>,
    },
    Lambda {
        function: Rc<FunctionDecl>,
    },
    Literal {
        value: Literal,
    },
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Set {
        object: Box<Expr>,
        name: Token,
        value: Box<Expr>,
    },
    Super {
        id: NodeId,
        keyword: Token,
        method: Token,
    },
    This {
        id: NodeId,
        keyword: Token,
    },
    Unary {
        operator: Token,
        right: Box<Expr>,
    },
    Variable {
        id: NodeId,
        name: Token,
    },
}

/// A function body shared between the declaring statement and every closure
/// created from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// `None` for function literals.
    pub name: Option<Token>,
    pub params: Vec<Token>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block {
        statements: Vec<Stmt>,
    },
    Class {
        name: Token,
        superclass: Option<Expr>,
        methods: Vec<Rc<FunctionDecl>>,
        class_methods: Vec<Rc<FunctionDecl>>,
    },
    Expression {
        expression: Expr,
    },
    Function {
        function: Rc<FunctionDecl>,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    Print {
        keyword: Token,
        expression: Expr,
    },
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
    Var {
        name: Token,
        initializer: Option<Expr>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Assign { name, value, .. } => write!(f, "(= {} {})", name.lexeme, value),
            Expr::Binary {
                left,
                operator,
                right,
            }
            | Expr::Logical {
                left,
                operator,
                right,
            } => write!(f, "({} {} {})", operator.lexeme, left, right),
            Expr::Call {
                callee, arguments, ..
            } => {
                write!(f, "(call {}", callee)?;
                for arg in arguments {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Get { object, name } => write!(f, "(. {} {})", object, name.lexeme),
            Expr::Grouping { expression } => write!(f, "(group {})", expression),
            Expr::Lambda { function } => {
                let params: Vec<&str> = function.params.iter().map(|p| p.lexeme.as_str()).collect();
                write!(f, "(fun ({}))", params.join(" "))
            }
            Expr::Literal { value } => match value {
                Literal::String(s) => write!(f, "\"{}\"", s),
                other => write!(f, "{}", other),
            },
            Expr::Set {
                object,
                name,
                value,
            } => write!(f, "(.= {} {} {})", object, name.lexeme, value),
            Expr::Super { method, .. } => write!(f, "(super {})", method.lexeme),
            Expr::This { .. } => write!(f, "this"),
            Expr::Unary { operator, right } => write!(f, "({} {})", operator.lexeme, right),
            Expr::Variable { name, .. } => write!(f, "{}", name.lexeme),
        }
    }
}
