//! 算术表达式求值
//!
//! `{calc:...}` 占位符使用的受限算术：数字、`+ - * /`、全角 `× ÷`、括号和一元负号。
//! 输入长度和嵌套深度都有上限，不支持变量和函数。

/// 表达式最大字符数
pub const MAX_EXPR_CHARS: usize = 128;

/// 最大括号嵌套深度
pub const MAX_EXPR_DEPTH: usize = 16;

/// 求值错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,
    #[error("expression exceeds {0} characters")]
    TooLong(usize),
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expression nests deeper than {0}")]
    TooDeep(usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&mut self) -> Option<char> {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                '-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                '*' | '×' | 'x' | 'X' => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                '/' | '÷' => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            None => Err(CalcError::UnexpectedEnd),
            Some('-') => {
                self.pos += 1;
                self.nested(|p| p.factor()).map(|v| -v)
            }
            Some('+') => {
                self.pos += 1;
                self.nested(|p| p.factor())
            }
            Some('(') | Some('（') => {
                self.pos += 1;
                let value = self.nested(|p| p.expr())?;
                match self.peek() {
                    Some(')') | Some('）') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(c) => Err(CalcError::UnexpectedChar(c)),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(CalcError::UnexpectedChar(c)),
        }
    }

    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<f64, CalcError>,
    ) -> Result<f64, CalcError> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            return Err(CalcError::TooDeep(MAX_EXPR_DEPTH));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn number(&mut self) -> Result<f64, CalcError> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| CalcError::UnexpectedChar('.'))
    }
}

/// 求值
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let chars: Vec<char> = expression.chars().collect();
    if chars.len() > MAX_EXPR_CHARS {
        return Err(CalcError::TooLong(MAX_EXPR_CHARS));
    }
    if chars.iter().all(|c| c.is_whitespace()) {
        return Err(CalcError::Empty);
    }

    let mut parser = Parser {
        chars,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(CalcError::UnexpectedChar(c));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

/// 格式化结果：整数不带小数点，其余最多保留 6 位小数
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let formatted = format!("{:.6}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// 求值并格式化
pub fn evaluate_to_string(expression: &str) -> Result<String, CalcError> {
    evaluate(expression).map(format_number)
}
