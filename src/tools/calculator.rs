//! 算术工具：calculate / verify
//!
//! 表达式只经过受限文法求值，不执行任何代码：
//! 数字（允许千分位逗号，如 1,000）、`+ - * / %`、`^` 与 `**`（右结合）、括号、一元正负号。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::schema_value;
use crate::tools::Tool;

/// 求值误差阈值（verify 使用）
const TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let mut text = String::new();
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        i += 1;
                    } else if c == ','
                        && text.chars().last().is_some_and(|p| p.is_ascii_digit())
                        && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
                    {
                        // 千分位逗号
                        i += 1;
                    } else {
                        break;
                    }
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Num(n));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

/// 递归下降求值器
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

const MAX_DEPTH: usize = 128;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Token::Slash => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= rhs;
                }
                Token::Percent => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err("modulo by zero".to_string());
                    }
                    // 与除数同号的取模
                    value = value - rhs * (value / rhs).floor();
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // unary := ('-' | '+') unary | power
    fn unary(&mut self) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        let value = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                -self.unary()?
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(value)
    }

    // power := primary (('^' | '**') unary)?
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(t) => Err(format!("unexpected token {t:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// 对受限文法的算术表达式求值
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = lex(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("unexpected trailing input at token {}", parser.pos + 1));
    }
    if !value.is_finite() {
        return Err("result is not finite".to_string());
    }
    Ok(value)
}

/// 整数值以整数输出，其余以浮点输出
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculateArgs {
    /// 算术表达式，如 (2 + 3) * 4
    pub expression: String,
}

/// calculate 工具：返回 {"result": n} 或 {"error": msg}
pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+ - * / % ^ ** and parentheses)."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<CalculateArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: CalculateArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        tracing::info!(expression = %args.expression, "calculate");
        let out = match evaluate(&args.expression) {
            Ok(n) => json!({ "result": number_value(n) }),
            Err(e) => json!({ "error": e }),
        };
        Ok(out.to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerifyArgs {
    /// 需要验证的表达式
    pub expression: String,
    /// 期望结果（数字或表达式）
    pub expected: String,
}

/// verify 工具：比较表达式结果与期望值，返回 {"is_correct", "actual", "expected"}
pub struct VerifyTool;

#[async_trait]
impl Tool for VerifyTool {
    fn name(&self) -> &str {
        "verify"
    }

    fn description(&self) -> &str {
        "Check whether an arithmetic expression evaluates to the expected value."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<VerifyArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: VerifyArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let out = match (evaluate(&args.expression), evaluate(&args.expected)) {
            (Ok(actual), Ok(expected)) => {
                let is_correct = (actual - expected).abs() < TOLERANCE;
                if is_correct {
                    tracing::info!(expression = %args.expression, expected, "verify: correct");
                } else {
                    tracing::info!(expression = %args.expression, actual, expected, "verify: incorrect");
                }
                json!({ "is_correct": is_correct, "actual": actual, "expected": expected })
            }
            (Err(e), _) | (_, Err(e)) => json!({ "error": e }),
        };
        Ok(out.to_string())
    }
}
