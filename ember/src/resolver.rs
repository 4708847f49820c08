use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::INITIALIZER_NAME;
use crate::ast::{Expr, FunctionDecl, NodeId, Stmt};
use crate::error::EmberError;
use crate::token::Token;

/// Maps each resolved variable-like node to the number of scopes to walk up.
/// Nodes without an entry are globals.
pub type Resolutions = HashMap<NodeId, usize>;

/// Output of a successful resolution pass.
#[derive(Debug, Default)]
pub struct Resolved {
    pub resolutions: Resolutions,
    pub warnings: Vec<EmberError>,
}

/// Tracks function context for validation (return statements)
#[derive(Clone, Copy, PartialEq, Debug)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
    StaticMethod,
}

/// Tracks class context for validation (this and super usage)
#[derive(Clone, Copy, PartialEq, Debug)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// Only plain `var` locals are reported when unused.
#[derive(Clone, Copy, PartialEq, Debug)]
enum VarKind {
    Variable,
    Parameter,
    Declaration,
    Implicit,
}

#[derive(Clone, Debug)]
struct VarInfo {
    defined: bool,
    used: bool,
    token: Token,
    kind: VarKind,
}

pub struct Resolver {
    scopes: Vec<HashMap<String, VarInfo>>,
    resolutions: Resolutions,
    current_function: FunctionType,
    current_class: ClassType,
    /// Errors and warnings, in the order they were found.
    diagnostics: Vec<EmberError>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            resolutions: HashMap::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            diagnostics: Vec::new(),
        }
    }

    /// Resolves a whole program. Fails if any error (not warning) was found;
    /// the error list then carries the warnings too.
    pub fn resolve(mut self, statements: &[Stmt]) -> Result<Resolved, Vec<EmberError>> {
        for stmt in statements {
            self.resolve_stmt(stmt);
        }

        debug!(
            "resolved {} node(s), {} diagnostic(s)",
            self.resolutions.len(),
            self.diagnostics.len()
        );

        if self.diagnostics.iter().any(|d| !d.is_warning()) {
            Err(self.diagnostics)
        } else {
            Ok(Resolved {
                resolutions: self.resolutions,
                warnings: self.diagnostics,
            })
        }
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.diagnostics.push(EmberError::resolution(token, message));
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };

        let mut unused: Vec<Token> = scope
            .into_iter()
            .filter(|(name, info)| {
                info.kind == VarKind::Variable && !info.used && !name.starts_with('_')
            })
            .map(|(_, info)| info.token)
            .collect();
        unused.sort_by_key(|token| token.span.start);

        for token in unused {
            self.diagnostics
                .push(EmberError::warning(&token, "Local variable is never used."));
        }
    }

    fn declare(&mut self, name: &Token, kind: VarKind) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };

        if scope.contains_key(&name.lexeme) {
            self.diagnostics.push(EmberError::resolution(
                name,
                "Already a variable with this name in this scope.",
            ));
            return;
        }

        scope.insert(
            name.lexeme.clone(),
            VarInfo {
                defined: false,
                used: false,
                token: name.clone(),
                kind,
            },
        );
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut()
            && let Some(info) = scope.get_mut(&name.lexeme)
        {
            info.defined = true;
        }
    }

    /// Binds a name the interpreter creates on its own (`this`, `super`).
    fn define_implicit(&mut self, keyword: &str, at: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            let mut token = at.clone();
            token.lexeme = keyword.to_string();
            scope.insert(
                keyword.to_string(),
                VarInfo {
                    defined: true,
                    used: true,
                    token,
                    kind: VarKind::Implicit,
                },
            );
        }
    }

    fn resolve_local(&mut self, id: NodeId, name: &Token) {
        for (distance, scope) in self.scopes.iter_mut().rev().enumerate() {
            if let Some(info) = scope.get_mut(&name.lexeme) {
                info.used = true;
                self.resolutions.insert(id, distance);
                return;
            }
        }
        // Not found: global, looked up dynamically at runtime
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements } => {
                self.begin_scope();
                for s in statements {
                    self.resolve_stmt(s);
                }
                self.end_scope();
            }
            Stmt::Var { name, initializer } => {
                self.declare(name, VarKind::Variable);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                self.define(name);
            }
            Stmt::Function { function } => {
                if let Some(name) = &function.name {
                    self.declare(name, VarKind::Declaration);
                    self.define(name);
                }
                self.resolve_function(function, FunctionType::Function);
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                class_methods,
            } => self.resolve_class(name, superclass.as_ref(), methods, class_methods),
            Stmt::Expression { expression } | Stmt::Print { expression, .. } => {
                self.resolve_expr(expression);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(eb) = else_branch {
                    self.resolve_stmt(eb);
                }
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code.");
                }
                if let Some(v) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(v);
                }
            }
        }
    }

    fn resolve_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
        class_methods: &[Rc<FunctionDecl>],
    ) {
        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        self.declare(name, VarKind::Declaration);
        self.define(name);

        if let Some(superclass_expr) = superclass {
            if let Expr::Variable {
                name: superclass_name,
                ..
            } = superclass_expr
                && superclass_name.lexeme == name.lexeme
            {
                self.error(superclass_name, "A class can't inherit from itself.");
            }

            self.current_class = ClassType::Subclass;
            self.resolve_expr(superclass_expr);

            // `super` wraps the `this` scope, which wraps every method
            self.begin_scope();
            self.define_implicit("super", name);
        }

        self.begin_scope();
        self.define_implicit("this", name);

        for method in methods {
            let fn_type = match &method.name {
                Some(n) if n.lexeme == INITIALIZER_NAME => FunctionType::Initializer,
                _ => FunctionType::Method,
            };
            self.resolve_function(method, fn_type);
        }

        for method in class_methods {
            self.resolve_function(method, FunctionType::StaticMethod);
        }

        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_function(&mut self, function: &FunctionDecl, fn_type: FunctionType) {
        let enclosing_function = self.current_function;
        self.current_function = fn_type;

        self.begin_scope();
        for param in &function.params {
            self.declare(param, VarKind::Parameter);
            self.define(param);
        }
        for stmt in &function.body {
            self.resolve_stmt(stmt);
        }
        self.end_scope();

        self.current_function = enclosing_function;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Variable { id, name } => {
                if self
                    .scopes
                    .last()
                    .and_then(|scope| scope.get(&name.lexeme))
                    .is_some_and(|info| !info.defined)
                {
                    self.error(name, "Can't read local variable in its own initializer.");
                }
                self.resolve_local(*id, name);
            }
            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Unary { right, .. } => self.resolve_expr(right),
            Expr::Grouping { expression } => self.resolve_expr(expression),
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }
            Expr::Lambda { function } => self.resolve_function(function, FunctionType::Function),
            Expr::Literal { .. } => {}
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");
                    return;
                }
                self.resolve_local(*id, keyword);
            }
            Expr::Super { id, keyword, .. } => {
                match self.current_class {
                    ClassType::None => {
                        self.error(keyword, "Can't use 'super' outside of a class.");
                        return;
                    }
                    ClassType::Class => {
                        self.error(keyword, "Can't use 'super' in a class with no superclass.");
                        return;
                    }
                    ClassType::Subclass => {}
                }
                self.resolve_local(*id, keyword);
            }
        }
    }
}
