use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;

use crate::INITIALIZER_NAME;
use crate::ast::{Expr, FunctionDecl, NodeId, Stmt};
use crate::environment::{EnvRef, Environment};
use crate::error::EmberError;
use crate::resolver::Resolutions;
use crate::token::{Token, TokenType};
use crate::value::{Class, Function, Instance, NativeFunction, UserFunction, Value};

/// Outcome of executing a statement. `return` unwinds as a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Normal,
    Return(Value),
}

/// Deepest chain of nested calls before a program is stopped.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Stack kept free before entering a call, and the size of each extra segment.
const RED_ZONE: usize = 128 * 1024;
const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    resolutions: Resolutions,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn clock(_args: &[Value]) -> Result<Value, EmberError> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(seconds))
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Environment::new().into_ref();
        globals.borrow_mut().define(
            "clock",
            Value::Function(Rc::new(Function::Native(NativeFunction {
                name: "clock",
                arity: 0,
                func: clock,
            }))),
        );

        Self {
            environment: Rc::clone(&globals),
            globals,
            resolutions: HashMap::new(),
            call_depth: 0,
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.environment.borrow().variable_names()
    }

    /// Adds the binding distances of a freshly resolved program. Earlier
    /// entries stay valid because node ids are never reused.
    pub fn add_resolutions(&mut self, resolutions: Resolutions) {
        self.resolutions.extend(resolutions);
    }

    pub fn execute(
        &mut self,
        stmt: &Stmt,
        output: &mut dyn Write,
    ) -> Result<ControlFlow, EmberError> {
        match stmt {
            Stmt::Print {
                keyword,
                expression,
            } => {
                let value = self.evaluate(expression, output)?;
                writeln!(output, "{}", value).map_err(|e| {
                    EmberError::runtime(keyword, format!("Could not write output: {}.", e))
                })?;
                Ok(ControlFlow::Normal)
            }
            Stmt::Expression { expression } => {
                self.evaluate(expression, output)?;
                Ok(ControlFlow::Normal)
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr, output)?,
                    None => Value::Nil,
                };
                self.environment
                    .borrow_mut()
                    .define(name.lexeme.clone(), value);
                Ok(ControlFlow::Normal)
            }
            Stmt::Block { statements } => {
                let env = Environment::with_enclosing(Rc::clone(&self.environment)).into_ref();
                self.execute_block(statements, env, output)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, output)?.is_truthy() {
                    self.execute(then_branch, output)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt, output)
                } else {
                    Ok(ControlFlow::Normal)
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition, output)?.is_truthy() {
                    if let ControlFlow::Return(value) = self.execute(body, output)? {
                        return Ok(ControlFlow::Return(value));
                    }
                }
                Ok(ControlFlow::Normal)
            }
            Stmt::Function { function } => {
                let value = self.make_function(function);
                if let Some(name) = &function.name {
                    self.environment
                        .borrow_mut()
                        .define(name.lexeme.clone(), value);
                }
                Ok(ControlFlow::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr, output)?,
                    None => Value::Nil,
                };
                Ok(ControlFlow::Return(value))
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                class_methods,
            } => {
                self.declare_class(name, superclass.as_ref(), methods, class_methods, output)?;
                Ok(ControlFlow::Normal)
            }
        }
    }

    /// Runs `statements` inside `env`, restoring the current scope afterwards
    /// whatever the outcome.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        env: EnvRef,
        output: &mut dyn Write,
    ) -> Result<ControlFlow, EmberError> {
        let previous = std::mem::replace(&mut self.environment, env);

        let mut result = Ok(ControlFlow::Normal);
        for stmt in statements {
            result = self.execute(stmt, output);
            if !matches!(result, Ok(ControlFlow::Normal)) {
                break;
            }
        }

        self.environment = previous;
        result
    }

    fn closure_over(&self, declaration: &Rc<FunctionDecl>, is_initializer: bool) -> Rc<Function> {
        Rc::new(Function::User(UserFunction {
            declaration: Rc::clone(declaration),
            closure: Rc::clone(&self.environment),
            is_initializer,
        }))
    }

    fn make_function(&self, declaration: &Rc<FunctionDecl>) -> Value {
        Value::Function(self.closure_over(declaration, false))
    }

    fn method_table(
        &self,
        declarations: &[Rc<FunctionDecl>],
        with_initializer: bool,
    ) -> HashMap<String, Rc<Function>> {
        declarations
            .iter()
            .filter_map(|decl| {
                let name = decl.name.as_ref()?.lexeme.clone();
                let is_initializer = with_initializer && name == INITIALIZER_NAME;
                Some((name, self.closure_over(decl, is_initializer)))
            })
            .collect()
    }

    fn declare_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
        class_methods: &[Rc<FunctionDecl>],
        output: &mut dyn Write,
    ) -> Result<(), EmberError> {
        let superclass = match superclass {
            Some(expr) => match self.evaluate(expr, output)? {
                Value::Class(class) => Some(class),
                _ => {
                    let at = match expr {
                        Expr::Variable { name, .. } => name,
                        _ => name,
                    };
                    return Err(EmberError::runtime(at, "Superclass must be a class."));
                }
            },
            None => None,
        };

        trace!(
            "declaring class {} (superclass: {:?})",
            name.lexeme,
            superclass.as_ref().map(|sc| sc.name.as_str())
        );

        self.environment
            .borrow_mut()
            .define(name.lexeme.clone(), Value::Nil);

        let previous = superclass.as_ref().map(|sc| {
            let mut env = Environment::with_enclosing(Rc::clone(&self.environment));
            env.define("super", Value::Class(Rc::clone(sc)));
            std::mem::replace(&mut self.environment, env.into_ref())
        });

        let metaclass = Class::new(
            format!("{} metaclass", name.lexeme),
            superclass.as_ref().and_then(|sc| sc.metaclass.clone()),
            self.method_table(class_methods, false),
            None,
        );
        let class = Class::new(
            name.lexeme.clone(),
            superclass,
            self.method_table(methods, true),
            Some(Rc::new(metaclass)),
        );

        if let Some(previous) = previous {
            self.environment = previous;
        }

        self.environment
            .borrow_mut()
            .define(name.lexeme.clone(), Value::Class(Rc::new(class)));
        Ok(())
    }

    pub fn evaluate(&mut self, expr: &Expr, output: &mut dyn Write) -> Result<Value, EmberError> {
        match expr {
            Expr::Literal { value } => Ok(Value::from(value)),
            Expr::Grouping { expression } => self.evaluate(expression, output),
            Expr::Unary { operator, right } => {
                let right = self.evaluate(right, output)?;
                match operator.token_type {
                    TokenType::Minus => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(EmberError::runtime(
                            operator,
                            format!(
                                "Operand of '-' must be a number, got {}.",
                                other.type_name()
                            ),
                        )),
                    },
                    _ => Ok(Value::Bool(!right.is_truthy())),
                }
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, output)?;
                let right = self.evaluate(right, output)?;
                binary(operator, left, right)
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left, output)?;

                let short_circuits = if operator.token_type == TokenType::Or {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };

                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right, output)
                }
            }
            Expr::Variable { id, name } => self.look_up_variable(*id, name),
            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value, output)?;
                match self.resolutions.get(id) {
                    Some(&distance) => {
                        let assigned = self.environment.borrow_mut().assign_at(
                            distance,
                            &name.lexeme,
                            value.clone(),
                        );
                        if !assigned {
                            return Err(undefined_variable(name));
                        }
                    }
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }
                Ok(value)
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee, output)?;
                let arguments = arguments
                    .iter()
                    .map(|arg| self.evaluate(arg, output))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_value(callee, arguments, paren, output)
            }
            Expr::Lambda { function } => Ok(self.make_function(function)),
            Expr::Get { object, name } => {
                let object = self.evaluate(object, output)?;
                self.get_property(object, name)
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object, output)?;
                let value = self.evaluate(value, output)?;
                self.set_property(&object, name, value.clone())?;
                Ok(value)
            }
            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),
            Expr::Super {
                id,
                keyword,
                method,
            } => self.look_up_super(*id, keyword, method),
        }
    }

    fn look_up_variable(&self, id: NodeId, name: &Token) -> Result<Value, EmberError> {
        match self.resolutions.get(&id) {
            Some(&distance) => self
                .environment
                .borrow()
                .get_at(distance, &name.lexeme)
                .ok_or_else(|| undefined_variable(name)),
            None => self.globals.borrow().get(name),
        }
    }

    fn look_up_super(
        &self,
        id: NodeId,
        keyword: &Token,
        method: &Token,
    ) -> Result<Value, EmberError> {
        let distance = self
            .resolutions
            .get(&id)
            .copied()
            .ok_or_else(|| undefined_variable(keyword))?;

        let env = self.environment.borrow();
        let superclass = env.get_at(distance, "super");
        // `this` always sits in the scope just inside `super`
        let receiver = distance
            .checked_sub(1)
            .and_then(|inner| env.get_at(inner, "this"));

        let (Some(Value::Class(superclass)), Some(receiver)) = (superclass, receiver) else {
            return Err(undefined_variable(keyword));
        };

        let found = match receiver {
            Value::Class(_) => superclass.find_static_method(&method.lexeme),
            _ => superclass.find_method(&method.lexeme),
        };

        found
            .map(|m| Value::Function(Rc::new(m.bind(receiver))))
            .ok_or_else(|| undefined_property(method))
    }

    /// Property read shared by instances and classes. Classes consult their
    /// metaclass first, then class-level fields, then the intrinsic `name`.
    pub fn get_property(&self, object: Value, name: &Token) -> Result<Value, EmberError> {
        match &object {
            Value::Instance(instance) => {
                if let Some(value) = instance.fields.borrow().get(&name.lexeme) {
                    return Ok(value.clone());
                }
                instance
                    .class
                    .find_method(&name.lexeme)
                    .map(|m| Value::Function(Rc::new(m.bind(object.clone()))))
                    .ok_or_else(|| undefined_property(name))
            }
            Value::Class(class) => {
                if let Some(method) = class.find_static_method(&name.lexeme) {
                    return Ok(Value::Function(Rc::new(method.bind(object.clone()))));
                }
                if let Some(value) = class.fields.borrow().get(&name.lexeme) {
                    return Ok(value.clone());
                }
                if name.lexeme == "name" {
                    return Ok(Value::from(class.name.as_str()));
                }
                Err(undefined_property(name))
            }
            _ => Err(EmberError::runtime(name, "Only instances have properties.")),
        }
    }

    pub fn set_property(&self, object: &Value, name: &Token, value: Value) -> Result<(), EmberError> {
        let fields = match object {
            Value::Instance(instance) => &instance.fields,
            Value::Class(class) => &class.fields,
            _ => return Err(EmberError::runtime(name, "Only instances have fields.")),
        };
        fields.borrow_mut().insert(name.lexeme.clone(), value);
        Ok(())
    }

    pub fn call_value(
        &mut self,
        callee: Value,
        arguments: Vec<Value>,
        paren: &Token,
        output: &mut dyn Write,
    ) -> Result<Value, EmberError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(EmberError::runtime(paren, "Stack overflow."));
        }

        self.call_depth += 1;
        let result = stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || {
            self.dispatch_call(callee, arguments, paren, output)
        });
        self.call_depth -= 1;
        result
    }

    fn dispatch_call(
        &mut self,
        callee: Value,
        arguments: Vec<Value>,
        paren: &Token,
        output: &mut dyn Write,
    ) -> Result<Value, EmberError> {
        match callee {
            Value::Function(function) => {
                check_arity(function.arity(), arguments.len(), paren)?;
                self.call_function(&function, arguments, output)
            }
            Value::Class(class) => {
                check_arity(class.arity(), arguments.len(), paren)?;
                self.instantiate(&class, arguments, output)
            }
            _ => Err(EmberError::runtime(
                paren,
                "Can only call functions and classes.",
            )),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        arguments: Vec<Value>,
        output: &mut dyn Write,
    ) -> Result<Value, EmberError> {
        let user = match function {
            Function::Native(native) => {
                trace!("calling native {}", native.name);
                return (native.func)(&arguments);
            }
            Function::User(user) => user,
        };

        trace!("calling {}", function);

        let mut env = Environment::with_enclosing(Rc::clone(&user.closure));
        for (param, argument) in user.declaration.params.iter().zip(arguments) {
            env.define(param.lexeme.clone(), argument);
        }

        let flow = self.execute_block(&user.declaration.body, env.into_ref(), output)?;

        if user.is_initializer {
            return Ok(user.closure.borrow().get_at(0, "this").unwrap_or(Value::Nil));
        }

        match flow {
            ControlFlow::Return(value) => Ok(value),
            ControlFlow::Normal => Ok(Value::Nil),
        }
    }

    fn instantiate(
        &mut self,
        class: &Rc<Class>,
        arguments: Vec<Value>,
        output: &mut dyn Write,
    ) -> Result<Value, EmberError> {
        let instance = Value::Instance(Rc::new(Instance::new(Rc::clone(class))));
        if let Some(initializer) = class.find_method(INITIALIZER_NAME) {
            let bound = initializer.bind(instance.clone());
            self.call_function(&bound, arguments, output)?;
        }
        Ok(instance)
    }
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value, EmberError> {
    let op = operator.token_type;
    match (op, &left, &right) {
        (TokenType::EqualEqual, _, _) => Ok(Value::Bool(left == right)),
        (TokenType::BangEqual, _, _) => Ok(Value::Bool(left != right)),
        (TokenType::Plus, Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (TokenType::Plus, Value::String(a), Value::String(b)) => {
            Ok(Value::String(Rc::from(format!("{}{}", a, b))))
        }
        (TokenType::Plus, _, _) => Err(EmberError::runtime(
            operator,
            format!(
                "Operands of '+' must be two numbers or two strings, got {} and {}.",
                left.type_name(),
                right.type_name()
            ),
        )),
        (_, Value::Number(a), Value::Number(b)) => Ok(match op {
            TokenType::Minus => Value::Number(a - b),
            TokenType::Star => Value::Number(a * b),
            TokenType::Slash => Value::Number(a / b),
            TokenType::Greater => Value::Bool(a > b),
            TokenType::GreaterEqual => Value::Bool(a >= b),
            TokenType::Less => Value::Bool(a < b),
            _ => Value::Bool(a <= b),
        }),
        _ => Err(EmberError::runtime(
            operator,
            format!(
                "Operands of '{}' must be numbers, got {} and {}.",
                operator.lexeme,
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn check_arity(expected: usize, got: usize, paren: &Token) -> Result<(), EmberError> {
    if expected == got {
        Ok(())
    } else {
        Err(EmberError::runtime(
            paren,
            format!("Expected {} arguments but got {}.", expected, got),
        ))
    }
}

fn undefined_variable(name: &Token) -> EmberError {
    EmberError::runtime(name, format!("Undefined variable '{}'.", name.lexeme))
}

fn undefined_property(name: &Token) -> EmberError {
    EmberError::runtime(name, format!("Undefined property '{}'.", name.lexeme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::Scanner;
    use crate::token::Literal;

    fn make_token(token_type: TokenType, lexeme: &str) -> Token {
        Token::synthetic(token_type, lexeme, 1)
    }

    fn literal(value: Literal) -> Box<Expr> {
        Box::new(Expr::Literal { value })
    }

    fn evaluate(expr: &Expr) -> Result<Value, EmberError> {
        Interpreter::new().evaluate(expr, &mut Vec::new())
    }

    /// Scans, parses, resolves and runs `source`, returning what it printed.
    fn run(source: &str) -> Result<String, EmberError> {
        let tokens: Vec<Token> = Scanner::new(source)
            .collect::<Result<_, _>>()
            .expect("source should scan");
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        assert!(parser.take_errors().is_empty(), "source should parse");
        let resolved = Resolver::new()
            .resolve(&statements)
            .expect("source should resolve");

        let mut interpreter = Interpreter::new();
        interpreter.add_resolutions(resolved.resolutions);

        let mut output = Vec::new();
        for stmt in &statements {
            interpreter.execute(stmt, &mut output)?;
        }
        Ok(String::from_utf8(output).expect("output is utf-8"))
    }

    fn runtime_message(source: &str) -> String {
        run(source).expect_err("should fail at runtime").message()
    }

    // === expressions ===

    #[test]
    fn evaluates_literals() {
        assert_eq!(evaluate(&literal(Literal::Number(42.0))).unwrap(), Value::Number(42.0));
        assert_eq!(evaluate(&literal(Literal::Nil)).unwrap(), Value::Nil);
        assert_eq!(
            evaluate(&literal(Literal::String("ember".to_string()))).unwrap(),
            Value::from("ember")
        );
    }

    #[test]
    fn evaluates_unary_minus() {
        let expr = Expr::Unary {
            operator: make_token(TokenType::Minus, "-"),
            right: literal(Literal::Number(5.0)),
        };
        assert_eq!(evaluate(&expr).unwrap(), Value::Number(-5.0));
    }

    #[test]
    fn unary_minus_reports_operand_type() {
        let expr = Expr::Unary {
            operator: make_token(TokenType::Minus, "-"),
            right: literal(Literal::String("x".to_string())),
        };
        assert_eq!(
            evaluate(&expr).unwrap_err().message(),
            "Operand of '-' must be a number, got string."
        );
    }

    #[test]
    fn bang_uses_truthiness() {
        let not = |value| Expr::Unary {
            operator: make_token(TokenType::Bang, "!"),
            right: literal(value),
        };
        assert_eq!(evaluate(&not(Literal::Nil)).unwrap(), Value::Bool(true));
        assert_eq!(evaluate(&not(Literal::Number(0.0))).unwrap(), Value::Bool(false));
    }

    #[test]
    fn evaluates_arithmetic_and_comparison() {
        assert_eq!(run("print 1 + 2 * 3 - 4 / 2;").unwrap(), "5\n");
        assert_eq!(run("print 7 / 2;").unwrap(), "3.5\n");
        assert_eq!(run("print 1 < 2; print 2 <= 1; print 3 >= 3; print 1 > 0;").unwrap(),
            "true\nfalse\ntrue\ntrue\n");
    }

    #[test]
    fn division_by_zero_follows_ieee() {
        assert_eq!(run("print 1 / 0; print -1 / 0; print 0 / 0;").unwrap(), "inf\n-inf\nNaN\n");
    }

    #[test]
    fn concatenates_strings() {
        assert_eq!(run("print \"em\" + \"ber\";").unwrap(), "ember\n");
    }

    #[test]
    fn plus_reports_both_operand_types() {
        assert_eq!(
            runtime_message("print \"a\" + 1;"),
            "Operands of '+' must be two numbers or two strings, got string and number."
        );
    }

    #[test]
    fn comparison_reports_operand_types() {
        assert_eq!(
            runtime_message("print nil < true;"),
            "Operands of '<' must be numbers, got nil and boolean."
        );
    }

    #[test]
    fn equality_rules() {
        let source = "print nil == nil; print 1 == \"1\"; print \"a\" == \"a\"; print 0/0 == 0/0;";
        assert_eq!(run(source).unwrap(), "true\nfalse\ntrue\nfalse\n");
    }

    #[test]
    fn logical_operators_return_operands() {
        let source = "print nil or \"default\"; print 1 and 2; print false and missing;";
        assert_eq!(run(source).unwrap(), "default\n2\nfalse\n");
    }

    // === variables and scope ===

    #[test]
    fn uninitialized_variable_is_nil() {
        assert_eq!(run("var a; print a;").unwrap(), "nil\n");
    }

    #[test]
    fn block_shadowing() {
        let source = "var a = 1; { var a = 2; print a; } print a;";
        assert_eq!(run(source).unwrap(), "2\n1\n");
    }

    #[test]
    fn assignment_updates_resolved_scope() {
        let source = "var a = 1; { var b = 0; { a = b = 5; } print b; } print a;";
        assert_eq!(run(source).unwrap(), "5\n5\n");
    }

    #[test]
    fn undefined_variable_is_runtime_error() {
        let err = run("print missing;").unwrap_err();
        assert_eq!(err.to_string(), "Undefined variable 'missing'.\n[line 1]");
    }

    #[test]
    fn assigning_undefined_global_is_runtime_error() {
        assert_eq!(runtime_message("missing = 1;"), "Undefined variable 'missing'.");
    }

    #[test]
    fn control_flow_statements() {
        let source = "
            var out = \"\";
            for (var i = 0; i < 3; i = i + 1) {
                if (i == 1) out = out + \"one\"; else out = out + \"x\";
            }
            print out;
        ";
        assert_eq!(run(source).unwrap(), "xonex\n");
    }

    // === functions ===

    #[test]
    fn functions_return_values() {
        let source = "fun add(a, b) { return a + b; } print add(1, 2);";
        assert_eq!(run(source).unwrap(), "3\n");
    }

    #[test]
    fn function_without_return_yields_nil() {
        assert_eq!(run("fun f() {} print f();").unwrap(), "nil\n");
    }

    #[test]
    fn return_unwinds_loops() {
        let source = "fun first() { while (true) { for (;;) { return 7; } } } print first();";
        assert_eq!(run(source).unwrap(), "7\n");
    }

    #[test]
    fn closures_capture_by_reference() {
        let source = "
            fun counter() {
                var n = 0;
                fun inc() { n = n + 1; return n; }
                return inc;
            }
            var c = counter();
            c(); c();
            print c();
        ";
        assert_eq!(run(source).unwrap(), "3\n");
    }

    #[test]
    fn closure_sees_declaration_scope_not_later_shadow() {
        let source = "
            var a = \"global\";
            {
                fun show() { print a; }
                show();
                var a = \"block\";
                show();
                print a;
            }
        ";
        assert_eq!(run(source).unwrap(), "global\nglobal\nblock\n");
    }

    #[test]
    fn lambdas_are_values() {
        let source = "var twice = fun (f, x) { return f(f(x)); }; print twice(fun (n) { return n * 2; }, 3);";
        assert_eq!(run(source).unwrap(), "12\n");
    }

    #[test]
    fn recursion() {
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);";
        assert_eq!(run(source).unwrap(), "55\n");
    }

    #[test]
    fn deep_recursion_below_limit() {
        let source = "fun down(n) { if (n == 0) return \"bottom\"; return down(n - 1); } print down(1000);";
        assert_eq!(run(source).unwrap(), "bottom\n");
    }

    #[test]
    fn unbounded_recursion_is_a_runtime_error() {
        let err = run("fun f(n) {\n  return f(n + 1);\n}\nf(0);").unwrap_err();
        assert!(err.is_runtime());
        assert_eq!(err.to_string(), "Stack overflow.\n[line 2]");
    }

    #[test]
    fn recursive_initializer_overflows_too() {
        assert_eq!(
            runtime_message("class Node { init() { this.next = Node(); } } Node();"),
            "Stack overflow."
        );
    }

    #[test]
    fn call_depth_unwinds_after_overflow() {
        let tokens: Vec<Token> = Scanner::new(
            "fun f() { return f(); } fun g(n) { if (n > 0) return g(n - 1); return n; }",
        )
        .collect::<Result<_, _>>()
        .unwrap();
        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        let resolved = Resolver::new().resolve(&statements).unwrap();

        let mut interpreter = Interpreter::new();
        interpreter.add_resolutions(resolved.resolutions);
        let mut output = Vec::new();
        for stmt in &statements {
            interpreter.execute(stmt, &mut output).unwrap();
        }

        let call = |name: &str, args: Vec<Value>, interpreter: &mut Interpreter| {
            let callee = interpreter
                .globals
                .borrow()
                .get(&make_token(TokenType::Identifier, name))
                .unwrap();
            interpreter.call_value(
                callee,
                args,
                &make_token(TokenType::RightParen, ")"),
                &mut Vec::new(),
            )
        };

        assert!(call("f", vec![], &mut interpreter).is_err());
        assert_eq!(interpreter.call_depth, 0);
        assert_eq!(
            call("g", vec![Value::Number(900.0)], &mut interpreter).unwrap(),
            Value::Number(0.0)
        );
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_print_is_reported_at_its_line() {
        let tokens: Vec<Token> = Scanner::new("var a = 1;\nprint a;")
            .collect::<Result<_, _>>()
            .unwrap();
        let statements = Parser::new(tokens).parse();

        let mut interpreter = Interpreter::new();
        interpreter.execute(&statements[0], &mut BrokenPipe).unwrap();
        let err = interpreter
            .execute(&statements[1], &mut BrokenPipe)
            .unwrap_err();

        assert!(err.is_runtime());
        assert_eq!(err.message(), "Could not write output: pipe closed.");
        assert!(err.to_string().ends_with("\n[line 2]"));
    }

    #[test]
    fn arity_mismatch() {
        assert_eq!(
            runtime_message("fun f(a, b) {} f(1);"),
            "Expected 2 arguments but got 1."
        );
    }

    #[test]
    fn calling_non_callable() {
        assert_eq!(
            runtime_message("\"text\"();"),
            "Can only call functions and classes."
        );
    }

    #[test]
    fn clock_is_a_native_number() {
        assert_eq!(run("print clock() > 0;").unwrap(), "true\n");
        assert_eq!(run("print clock;").unwrap(), "<native fn clock>\n");
    }

    #[test]
    fn prints_function_values() {
        assert_eq!(run("fun f() {} print f; print fun () {};").unwrap(), "<fn f>\n<fn>\n");
    }

    // === classes ===

    #[test]
    fn instances_hold_fields() {
        let source = "class P {} var p = P(); p.x = 3; print p.x; print p;";
        assert_eq!(run(source).unwrap(), "3\n<P instance>\n");
    }

    #[test]
    fn methods_bind_this() {
        let source = "
            class Greeter {
                init(name) { this.name = name; }
                greet() { return \"hi \" + this.name; }
            }
            var g = Greeter(\"ada\");
            var f = g.greet;
            print f();
        ";
        assert_eq!(run(source).unwrap(), "hi ada\n");
    }

    #[test]
    fn initializer_returns_this() {
        let source = "
            class A { init() { this.v = 1; return; } }
            var a = A();
            print a.init() == a;
            print a.v;
        ";
        assert_eq!(run(source).unwrap(), "true\n1\n");
    }

    #[test]
    fn class_arity_follows_initializer() {
        assert_eq!(
            runtime_message("class A { init(x) {} } A();"),
            "Expected 1 arguments but got 0."
        );
        assert_eq!(
            runtime_message("class B {} B(1);"),
            "Expected 0 arguments but got 1."
        );
    }

    #[test]
    fn inheritance_and_super() {
        let source = "
            class A { name() { return \"A\"; } }
            class B < A { name() { return \"B\" + super.name(); } }
            print B().name();
        ";
        assert_eq!(run(source).unwrap(), "BA\n");
    }

    #[test]
    fn super_binds_original_receiver() {
        let source = "
            class A { who() { return this.tag; } }
            class B < A { who() { return super.who(); } }
            class C < B {}
            var c = C();
            c.tag = \"c\";
            print c.who();
        ";
        assert_eq!(run(source).unwrap(), "c\n");
    }

    #[test]
    fn inherited_initializer() {
        let source = "
            class A { init(v) { this.v = v; } }
            class B < A {}
            print B(4).v;
        ";
        assert_eq!(run(source).unwrap(), "4\n");
    }

    #[test]
    fn superclass_must_be_a_class() {
        assert_eq!(
            runtime_message("var NotAClass = 1; class B < NotAClass {}"),
            "Superclass must be a class."
        );
    }

    #[test]
    fn static_methods_on_class_only() {
        let source = "
            class Math { class square(n) { return n * n; } }
            print Math.square(3);
        ";
        assert_eq!(run(source).unwrap(), "9\n");
        assert_eq!(
            runtime_message("class Math { class square(n) { return n * n; } } Math().square(3);"),
            "Undefined property 'square'."
        );
    }

    #[test]
    fn static_methods_are_inherited_and_see_the_class() {
        let source = "
            class A { class make() { return this(); } }
            class B < A {}
            print B.make();
        ";
        assert_eq!(run(source).unwrap(), "<B instance>\n");
    }

    #[test]
    fn super_inside_static_method_uses_metaclass() {
        let source = "
            class A { class id() { return \"A\"; } }
            class B < A { class id() { return \"B\" + super.id(); } }
            print B.id();
        ";
        assert_eq!(run(source).unwrap(), "BA\n");
    }

    #[test]
    fn class_name_property_and_fields() {
        let source = "
            class A {}
            class B < A {}
            print B.name;
            A.count = 2;
            print A.count;
            print B;
        ";
        assert_eq!(run(source).unwrap(), "B\n2\nB\n");
    }

    #[test]
    fn properties_on_non_objects() {
        assert_eq!(runtime_message("print 1.x;"), "Only instances have properties.");
        assert_eq!(runtime_message("var s = \"s\"; s.x = 1;"), "Only instances have fields.");
    }

    #[test]
    fn undefined_property() {
        assert_eq!(
            runtime_message("class A {} print A().nope;"),
            "Undefined property 'nope'."
        );
    }

    #[test]
    fn fields_shadow_methods() {
        let source = "
            class A { m() { return \"method\"; } }
            var a = A();
            a.m = fun () { return \"field\"; };
            print a.m();
        ";
        assert_eq!(run(source).unwrap(), "field\n");
    }

    #[test]
    fn runtime_error_reports_line() {
        let err = run("var a = 1;\nvar b = a + nil;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Operands of '+' must be two numbers or two strings, got number and nil.\n[line 2]"
        );
    }

    #[test]
    fn resolutions_accumulate() {
        let mut interpreter = Interpreter::new();
        let mut first = Resolutions::new();
        first.insert(NodeId(0), 0);
        let mut second = Resolutions::new();
        second.insert(NodeId(1), 2);

        interpreter.add_resolutions(first);
        interpreter.add_resolutions(second);

        assert_eq!(interpreter.resolutions.get(&NodeId(0)), Some(&0));
        assert_eq!(interpreter.resolutions.get(&NodeId(1)), Some(&2));
    }
}
