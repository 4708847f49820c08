mod ast;
mod environment;
mod error;
mod interpreter;
mod parser;
mod resolver;
mod scanner;
mod token;
mod value;

use std::io::Write;
use std::path::Path;

use log::debug;

pub use ast::{Expr, NodeId, Stmt};
pub use error::EmberError;
pub use parser::Parser;
pub use scanner::{KEYWORDS, Scanner, is_identifier_char, is_identifier_start};
pub use token::{Literal, Span, Token, TokenType};

/// Method name that makes a method the class initializer.
pub const INITIALIZER_NAME: &str = "init";

/// Native functions available in the global scope.
pub const NATIVE_FUNCTIONS: &[&str] = &["clock"];

/// An interpreter session. Globals, declared classes and resolved bindings
/// survive from one `run` to the next.
pub struct Ember {
    interpreter: interpreter::Interpreter,
    /// First node id for the next parse, so ids stay unique for the session.
    next_node: usize,
}

impl Default for Ember {
    fn default() -> Self {
        Self::new()
    }
}

impl Ember {
    pub fn new() -> Self {
        Self {
            interpreter: interpreter::Interpreter::new(),
            next_node: 0,
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.interpreter.variable_names()
    }

    /// Runs `source` as one program, writing `print` output to `stdout`.
    ///
    /// Returns every diagnostic in the order it was produced. Scan and parse
    /// errors stop the run before resolution, resolution errors stop it
    /// before execution, and the first runtime error ends execution.
    /// Warnings never stop anything.
    pub fn run<O: Write>(&mut self, source: &str, mut stdout: O) -> Vec<EmberError> {
        let mut errors = Vec::new();

        let mut tokens = Vec::new();
        for result in scanner::Scanner::new(source) {
            match result {
                Ok(token) => tokens.push(token),
                Err(e) => errors.push(e),
            }
        }
        debug!("scanned {} token(s)", tokens.len());

        let mut parser = parser::Parser::with_first_id(tokens, self.next_node);
        let statements = parser.parse();
        self.next_node = parser.next_id();
        errors.extend(parser.take_errors());

        if !errors.is_empty() {
            debug!("{} syntax error(s), skipping execution", errors.len());
            return errors;
        }
        debug!("parsed {} statement(s)", statements.len());

        let resolved = match resolver::Resolver::new().resolve(&statements) {
            Ok(resolved) => resolved,
            Err(diagnostics) => return diagnostics,
        };
        errors.extend(resolved.warnings);
        self.interpreter.add_resolutions(resolved.resolutions);

        for stmt in &statements {
            if let Err(e) = self.interpreter.execute(stmt, &mut stdout) {
                errors.push(e);
                break;
            }
        }

        debug!("run finished with {} diagnostic(s)", errors.len());
        errors
    }

    /// Reads a script from disk and runs it. Failing to read the file is the
    /// only error returned through `Err`.
    pub fn run_file<O: Write>(
        &mut self,
        path: impl AsRef<Path>,
        stdout: O,
    ) -> Result<Vec<EmberError>, EmberError> {
        let source = std::fs::read_to_string(path)?;
        Ok(self.run(&source, stdout))
    }
}
