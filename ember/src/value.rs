use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDecl;
use crate::environment::{EnvRef, Environment};
use crate::error::EmberError;
use crate::token::Literal;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Name used in runtime type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
        }
    }
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Nil => Value::Nil,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::String(Rc::from(s.as_str())),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Function(func) => write!(f, "{}", func),
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Instance(instance) => write!(f, "<{} instance>", instance.class.name),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Function {
    User(UserFunction),
    Native(NativeFunction),
}

impl Function {
    pub fn arity(&self) -> usize {
        match self {
            Function::User(f) => f.declaration.params.len(),
            Function::Native(f) => f.arity,
        }
    }

    /// Returns a copy of this function whose closure binds `this` to `receiver`.
    /// Natives carry no closure and come back unchanged.
    pub fn bind(&self, receiver: Value) -> Function {
        match self {
            Function::User(f) => Function::User(f.bind(receiver)),
            Function::Native(f) => Function::Native(f.clone()),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::User(func) => match &func.declaration.name {
                Some(name) => write!(f, "<fn {}>", name.lexeme),
                None => write!(f, "<fn>"),
            },
            Function::Native(func) => write!(f, "<native fn {}>", func.name),
        }
    }
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&[Value]) -> Result<Value, EmberError>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UserFunction {
    pub declaration: Rc<FunctionDecl>,
    pub closure: EnvRef,
    pub is_initializer: bool,
}

impl UserFunction {
    pub fn bind(&self, receiver: Value) -> UserFunction {
        let mut env = Environment::with_enclosing(Rc::clone(&self.closure));
        env.define("this", receiver);
        UserFunction {
            declaration: Rc::clone(&self.declaration),
            closure: env.into_ref(),
            is_initializer: self.is_initializer,
        }
    }
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: HashMap<String, Rc<Function>>,
    /// Holds the class-level methods. `None` for metaclasses themselves.
    pub metaclass: Option<Rc<Class>>,
    pub fields: RefCell<HashMap<String, Value>>,
}

impl Class {
    pub fn new(
        name: impl Into<String>,
        superclass: Option<Rc<Class>>,
        methods: HashMap<String, Rc<Function>>,
        metaclass: Option<Rc<Class>>,
    ) -> Self {
        Self {
            name: name.into(),
            superclass,
            methods,
            metaclass,
            fields: RefCell::new(HashMap::new()),
        }
    }

    /// Find a method in this class or its superclass chain
    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        if let Some(method) = self.methods.get(name) {
            return Some(Rc::clone(method));
        }

        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.find_method(name))
    }

    /// Find a class-level method through the metaclass chain.
    pub fn find_static_method(&self, name: &str) -> Option<Rc<Function>> {
        self.metaclass
            .as_ref()
            .and_then(|metaclass| metaclass.find_method(name))
    }

    /// Arity of construction: the initializer's, or zero without one.
    pub fn arity(&self) -> usize {
        self.find_method("init").map_or(0, |init| init.arity())
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<Class>,
    pub fields: RefCell<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: RefCell::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Token, TokenType};

    fn declaration(name: Option<&str>, params: &[&str]) -> Rc<FunctionDecl> {
        Rc::new(FunctionDecl {
            name: name.map(|n| Token::synthetic(TokenType::Identifier, n, 1)),
            params: params
                .iter()
                .map(|p| Token::synthetic(TokenType::Identifier, p, 1))
                .collect(),
            body: vec![],
        })
    }

    fn user_function(name: Option<&str>, params: &[&str]) -> Function {
        Function::User(UserFunction {
            declaration: declaration(name, params),
            closure: Environment::new().into_ref(),
            is_initializer: false,
        })
    }

    fn class_with(name: &str, methods: &[(&str, Function)]) -> Rc<Class> {
        let methods = methods
            .iter()
            .map(|(n, f)| (n.to_string(), Rc::new(f.clone())))
            .collect();
        Rc::new(Class::new(name, None, methods, None))
    }

    #[test]
    fn numbers_display_without_trailing_zero() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn scalars_display_plainly() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::from("raw").to_string(), "raw");
    }

    #[test]
    fn functions_display_by_kind() {
        let named = Value::Function(Rc::new(user_function(Some("greet"), &[])));
        let lambda = Value::Function(Rc::new(user_function(None, &[])));
        let native = Value::Function(Rc::new(Function::Native(NativeFunction {
            name: "clock",
            arity: 0,
            func: |_| Ok(Value::Nil),
        })));

        assert_eq!(named.to_string(), "<fn greet>");
        assert_eq!(lambda.to_string(), "<fn>");
        assert_eq!(native.to_string(), "<native fn clock>");
    }

    #[test]
    fn classes_and_instances_display() {
        let class = class_with("Point", &[]);
        let instance = Value::Instance(Rc::new(Instance::new(Rc::clone(&class))));
        assert_eq!(Value::Class(class).to_string(), "Point");
        assert_eq!(instance.to_string(), "<Point instance>");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn equality_rules() {
        assert_eq!(Value::Nil, Value::Nil);
        assert_eq!(Value::from("a"), Value::from("a"));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_ne!(Value::Number(0.0), Value::Bool(false));
        assert_ne!(Value::Nil, Value::Bool(false));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = class_with("A", &[]);
        let same = Value::Class(Rc::clone(&a));
        assert_eq!(Value::Class(a), same);
        assert_ne!(Value::Class(class_with("A", &[])), same);
    }

    #[test]
    fn literal_converts_to_value() {
        assert_eq!(Value::from(&Literal::Number(1.5)), Value::Number(1.5));
        assert_eq!(
            Value::from(&Literal::String("hi".to_string())),
            Value::from("hi")
        );
        assert_eq!(Value::from(&Literal::Nil), Value::Nil);
    }

    #[test]
    fn find_method_walks_superclass_chain() {
        let base = class_with("Base", &[("greet", user_function(Some("greet"), &[]))]);
        let derived = Class::new("Derived", Some(base), HashMap::new(), None);

        assert!(derived.find_method("greet").is_some());
        assert!(derived.find_method("missing").is_none());
    }

    #[test]
    fn static_methods_live_on_metaclass() {
        let meta = class_with(
            "Math metaclass",
            &[("square", user_function(Some("square"), &["n"]))],
        );
        let class = Class::new("Math", None, HashMap::new(), Some(meta));

        assert!(class.find_static_method("square").is_some());
        assert!(class.find_method("square").is_none());
    }

    #[test]
    fn class_arity_comes_from_initializer() {
        let plain = class_with("Plain", &[]);
        let point = class_with("Point", &[("init", user_function(Some("init"), &["x", "y"]))]);
        assert_eq!(plain.arity(), 0);
        assert_eq!(point.arity(), 2);
    }

    #[test]
    fn bind_defines_this_in_new_scope() {
        let class = class_with("Box", &[]);
        let instance = Value::Instance(Rc::new(Instance::new(class)));
        let Function::User(method) = user_function(Some("get"), &[]) else {
            unreachable!()
        };

        let bound = method.bind(instance.clone());
        assert_eq!(bound.closure.borrow().get_at(0, "this"), Some(instance));
        assert_eq!(method.closure.borrow().get_at(0, "this"), None);
    }
}
