use crate::error::DomainError;
use crate::traits::{Scalar, Symbol};
use anyhow::{anyhow, bail, Result};
use num_complex::Complex64;
use std::collections::HashMap;

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (Complex64 or HyperDual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a complex constant onto the stack.
    LoadConst(Complex64),
    /// Pushes a phase-space coordinate (positions first, then momenta).
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b). Fails near b = 0.
    Div,
    /// Pops top two values (b, a), pushes exp(b ln a) on the principal branch.
    Pow,
    /// Pops top value (a), pushes a^n for a literal integer n.
    PowI(i32),
    Sin,
    Cos,
    Exp,
    /// Principal logarithm. Fails at the origin and on the negative real axis.
    Ln,
    /// Principal square root. Same branch cut as `Ln`.
    Sqrt,
    /// Pops top value (a), pushes -a.
    Neg,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based Virtual Machine for evaluating symbols.
///
/// The VM is stateless; `execute` takes all necessary context and returns the
/// value left on the stack, or a `DomainError` when an operation leaves the
/// region where the expression is holomorphic.
pub struct VM;

fn check_branch(z: Complex64, tolerance: f64, op: &str) -> Result<(), DomainError> {
    if z.norm() <= tolerance {
        return Err(DomainError::new(format!("{op} evaluated at its branch point 0")));
    }
    if z.re < 0.0 && z.im.abs() <= tolerance {
        return Err(DomainError::new(format!(
            "{op} evaluated on its branch cut at {z}"
        )));
    }
    Ok(())
}

impl VM {
    /// Variables index positions first, then momenta. Parameters are lifted
    /// as constants when loaded.
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        position: &[T],
        momentum: &[T],
        params: &[Complex64],
        singularity_tolerance: f64,
        stack: &mut Vec<T>,
    ) -> Result<T, DomainError> {
        stack.clear();
        let n = position.len();
        let underflow = || DomainError::new("malformed bytecode: stack underflow");

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_complex(val)),
                OpCode::LoadVar(idx) => {
                    stack.push(if idx < n { position[idx] } else { momentum[idx - n] })
                }
                OpCode::LoadParam(idx) => stack.push(T::from_complex(params[idx])),
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = stack.pop().ok_or_else(underflow)?;
                    let a = stack.pop().ok_or_else(underflow)?;
                    let result = match *op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => {
                            if b.value().norm() <= singularity_tolerance {
                                return Err(DomainError::new(format!(
                                    "division by {} within singularity tolerance",
                                    b.value()
                                )));
                            }
                            a / b
                        }
                        _ => {
                            check_branch(a.value(), singularity_tolerance, "power")?;
                            (b * a.ln()).exp()
                        }
                    };
                    stack.push(result);
                }
                OpCode::PowI(n) => {
                    let a = stack.pop().ok_or_else(underflow)?;
                    if n < 0 && a.value().norm() <= singularity_tolerance {
                        return Err(DomainError::new("negative power of zero"));
                    }
                    stack.push(a.powi(n));
                }
                OpCode::Sin | OpCode::Cos | OpCode::Exp | OpCode::Neg => {
                    let a = stack.pop().ok_or_else(underflow)?;
                    stack.push(match *op {
                        OpCode::Sin => a.sin(),
                        OpCode::Cos => a.cos(),
                        OpCode::Exp => a.exp(),
                        _ => -a,
                    });
                }
                OpCode::Ln => {
                    let a = stack.pop().ok_or_else(underflow)?;
                    check_branch(a.value(), singularity_tolerance, "ln")?;
                    stack.push(a.ln());
                }
                OpCode::Sqrt => {
                    let a = stack.pop().ok_or_else(underflow)?;
                    check_branch(a.value(), singularity_tolerance, "sqrt")?;
                    stack.push(a.sqrt());
                }
            }
        }

        let result = stack.pop().ok_or_else(underflow)?;
        if !stack.is_empty() {
            return Err(DomainError::new("malformed bytecode: values left on stack"));
        }
        Ok(result)
    }
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),
    Call(String, Box<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable and parameter names to indices; `i` and `pi` are
/// constants unless shadowed by a variable or parameter.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(Complex64::new(*n, 0.0))),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == "i" {
                    ops.push(OpCode::LoadConst(Complex64::new(0.0, 1.0)));
                } else if name == "pi" {
                    ops.push(OpCode::LoadConst(Complex64::new(std::f64::consts::PI, 0.0)));
                } else {
                    bail!("Unknown variable or parameter: {}", name);
                }
            }
            Expr::Binary(left, '^', right) if integer_exponent(right).is_some() => {
                self.compile_recursive(left, ops)?;
                if let Some(n) = integer_exponent(right) {
                    ops.push(OpCode::PowI(n));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => bail!("Unknown binary operator: {}", op),
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => bail!("Unknown unary operator: {}", op),
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "exp" => OpCode::Exp,
                    "ln" | "log" => OpCode::Ln,
                    "sqrt" => OpCode::Sqrt,
                    _ => bail!("Unknown function: {}", func),
                });
            }
        }
        Ok(())
    }
}

/// Literal integer exponents compile to `PowI`, which is entire.
fn integer_exponent(expr: &Expr) -> Option<i32> {
    let value = match expr {
        Expr::Number(n) => *n,
        Expr::Unary('-', inner) => match inner.as_ref() {
            Expr::Number(n) => -*n,
            _ => return None,
        },
        _ => return None,
    };
    if value.fract() == 0.0 && value.abs() <= 64.0 {
        Some(value as i32)
    } else {
        None
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected trailing token {:?}", token);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            // Scientific notation: 1e-6, 2.5E3
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                let mut look = pos + 1;
                if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                    look += 1;
                }
                if look < chars.len() && chars[look].is_ascii_digit() {
                    pos = look;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let text: String = chars[start..pos].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| anyhow!("Invalid number literal '{}'", text))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Identifier(chars[start..pos].iter().collect()));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => bail!("Unexpected character '{}' at position {}", c, pos),
            });
            pos += 1;
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    /// Unary minus binds looser than `^`, so `-k^2` is `-(k^2)`.
    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        if let Some(Token::Plus) = self.peek() {
            self.consume();
            return self.parse_unary();
        }
        self.parse_power()
    }

    /// Right-associative: `a^b^c` is `a^(b^c)`.
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let arg = self.parse_expression()?;
                    match self.consume() {
                        Some(Token::RParen) => Ok(Expr::Call(name, Box::new(arg))),
                        _ => bail!("Expected ')' after argument of {}", name),
                    }
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(expr),
                    _ => bail!("Expected ')'"),
                }
            }
            Some(token) => bail!("Unexpected token {:?}", token),
            None => bail!("Unexpected end of expression"),
        }
    }
}

// --- ExpressionSymbol ---

/// A symbol compiled from a text expression such as `"-k^2 - x"`.
///
/// Derivatives come from running the same bytecode on hyper-dual numbers.
/// Evaluation borrows a per-thread scratch stack, so one instance can be
/// shared across threads.
#[derive(Debug, Clone)]
pub struct ExpressionSymbol {
    source: String,
    bytecode: Bytecode,
    dimension: usize,
    params: Vec<Complex64>,
    singularity_tolerance: f64,
}

impl ExpressionSymbol {
    pub fn compile(
        source: &str,
        position_names: &[String],
        momentum_names: &[String],
        param_names: &[String],
        param_values: &[Complex64],
    ) -> Result<Self> {
        if position_names.is_empty() {
            bail!("A symbol needs at least one position coordinate.");
        }
        if position_names.len() != momentum_names.len() {
            bail!(
                "Got {} position names but {} momentum names.",
                position_names.len(),
                momentum_names.len()
            );
        }
        if param_names.len() != param_values.len() {
            bail!(
                "Got {} parameter names but {} parameter values.",
                param_names.len(),
                param_values.len()
            );
        }
        let mut var_names = position_names.to_vec();
        var_names.extend_from_slice(momentum_names);

        let expr = parse(source)?;
        let bytecode = Compiler::new(&var_names, param_names).compile(&expr)?;
        Ok(Self {
            source: source.to_string(),
            bytecode,
            dimension: position_names.len(),
            params: param_values.to_vec(),
            singularity_tolerance: 1e-12,
        })
    }

    /// Shorthand for a one-dimensional symbol in `x` and `k`.
    pub fn one_dimensional(source: &str) -> Result<Self> {
        Self::compile(source, &["x".to_string()], &["k".to_string()], &[], &[])
    }

    /// Distance from a pole or branch point inside which evaluation is refused.
    pub fn with_singularity_tolerance(mut self, tolerance: f64) -> Self {
        self.singularity_tolerance = tolerance;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }
}

impl Symbol for ExpressionSymbol {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate<T: Scalar>(&self, position: &[T], momentum: &[T]) -> Result<T, DomainError> {
        T::with_scratch(|stack| {
            VM::execute(
                &self.bytecode,
                position,
                momentum,
                &self.params,
                self.singularity_tolerance,
                stack,
            )
        })
    }
}
