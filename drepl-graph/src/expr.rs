//! Index correspondence expressions.
//!
//! A view declares, for every dataset dimension of an array, an expression over the view's own
//! dimension variables `v0, v1, ...` giving the dataset index. Expressions use integer literals,
//! named constants, `+ - * /`, unary minus and parentheses, with the usual precedence.
//!
//! Only expressions with a fractional-linear form over a single view dimension can drive
//! replication; [`IndexExpr::to_affine`] rejects everything else.

use std::fmt::{Display, Formatter};
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

use drepl_error::{DreplError, DreplResult, drepl_bail, drepl_err};

use crate::AffineMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// Parsed index expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexExpr {
    Literal(i64),
    /// The index along view dimension `n`, written `vn`.
    Dim(usize),
    /// A constant resolved when converting to an affine map.
    Named(String),
    Neg(Box<IndexExpr>),
    Binary(Box<IndexExpr>, BinaryOp, Box<IndexExpr>),
}

impl IndexExpr {
    /// Converts the expression to an affine map, looking named constants up in `constants`.
    pub fn to_affine(&self, constants: &dyn Fn(&str) -> Option<i64>) -> DreplResult<AffineMap> {
        match self {
            IndexExpr::Literal(v) => Ok(AffineMap::constant(*v)),
            IndexExpr::Dim(dim) => Ok(AffineMap::identity(*dim)),
            IndexExpr::Named(name) => constants(name)
                .map(AffineMap::constant)
                .ok_or_else(|| drepl_err!(Structural: "constant '{name}' is not defined")),
            IndexExpr::Neg(inner) => neg(inner.to_affine(constants)?),
            IndexExpr::Binary(lhs, op, rhs) => {
                let l = lhs.to_affine(constants)?;
                let r = rhs.to_affine(constants)?;
                match op {
                    BinaryOp::Add => add(l, r),
                    BinaryOp::Sub => add(l, neg(r)?),
                    BinaryOp::Mul => mul(l, r),
                    BinaryOp::Div => mul(l, reciprocal(r)),
                }
                .map_err(|e| e.with_context(format!("in '{self}'")))
            }
        }
    }
}

fn checked(v: Option<i64>) -> DreplResult<i64> {
    v.ok_or_else(|| drepl_err!(Structural: "index expression coefficients overflow"))
}

fn shared_dim(l: &AffineMap, r: &AffineMap) -> DreplResult<Option<usize>> {
    match (l.dim(), r.dim()) {
        (Some(a), Some(b)) if a != b => {
            drepl_bail!(Structural: "no affine form: relates view dimensions v{a} and v{b}")
        }
        (a, b) => Ok(a.or(b)),
    }
}

fn neg(m: AffineMap) -> DreplResult<AffineMap> {
    let (a, b, c, d) = m.coefficients();
    Ok(AffineMap::new(
        checked(a.checked_neg())?,
        checked(b.checked_neg())?,
        c,
        d,
        m.dim(),
    ))
}

fn reciprocal(m: AffineMap) -> AffineMap {
    let (a, b, c, d) = m.coefficients();
    AffineMap::new(c, d, a, b, m.dim())
}

fn add(l: AffineMap, r: AffineMap) -> DreplResult<AffineMap> {
    let dim = shared_dim(&l, &r)?;
    let (la, lb, lc, ld) = l.coefficients();
    let (ra, rb, rc, rd) = r.coefficients();
    let m = |x: i64, y: i64| checked(x.checked_mul(y));
    if checked(m(la, rc)?.checked_add(m(ra, lc)?))? != 0 || m(lc, rc)? != 0 {
        drepl_bail!(Structural: "no affine form: sum has a quadratic term");
    }
    Ok(AffineMap::new(
        checked(
            m(la, rd)?
                .checked_add(m(lb, rc)?)
                .and_then(|s| s.checked_add(m(ra, ld).ok()?))
                .and_then(|s| s.checked_add(m(rb, lc).ok()?)),
        )?,
        checked(m(lb, rd)?.checked_add(m(rb, ld)?))?,
        checked(m(lc, rd)?.checked_add(m(rc, ld)?))?,
        m(ld, rd)?,
        dim,
    ))
}

fn mul(l: AffineMap, r: AffineMap) -> DreplResult<AffineMap> {
    let dim = shared_dim(&l, &r)?;
    let (la, lb, lc, ld) = l.coefficients();
    let (ra, rb, rc, rd) = r.coefficients();
    let m = |x: i64, y: i64| checked(x.checked_mul(y));
    if m(la, ra)? != 0 || m(lc, rc)? != 0 {
        drepl_bail!(Structural: "no affine form: product has a quadratic term");
    }
    Ok(AffineMap::new(
        checked(m(la, rb)?.checked_add(m(lb, ra)?))?,
        m(lb, rb)?,
        checked(m(lc, rd)?.checked_add(m(ld, rc)?))?,
        m(ld, rd)?,
        dim,
    ))
}

impl Display for IndexExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexExpr::Literal(v) => write!(f, "{v}"),
            IndexExpr::Dim(dim) => write!(f, "v{dim}"),
            IndexExpr::Named(name) => write!(f, "{name}"),
            IndexExpr::Neg(inner) => write!(f, "-{inner}"),
            IndexExpr::Binary(lhs, op, rhs) => write!(f, "({lhs}{}{rhs})", op.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Ident(String),
    Op(char),
    Open,
    Close,
}

struct Parser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    peeked: Option<(usize, Token)>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            peeked: None,
        }
    }

    fn error(&self, pos: usize, msg: &str) -> DreplError {
        drepl_err!(Structural: "{msg} at {pos} in index expression '{}'", self.src)
    }

    fn lex(&mut self) -> DreplResult<Option<(usize, Token)>> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some((pos, c)) = self.chars.next() else {
            return Ok(None);
        };
        let token = match c {
            '+' | '-' | '*' | '/' => Token::Op(c),
            '(' => Token::Open,
            ')' => Token::Close,
            c if c.is_ascii_digit() => {
                let mut end = pos + 1;
                while let Some((i, _)) = self.chars.next_if(|(_, c)| c.is_ascii_digit()) {
                    end = i + 1;
                }
                Token::Int(
                    self.src[pos..end]
                        .parse()
                        .map_err(|_| self.error(pos, "integer out of range"))?,
                )
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = pos + c.len_utf8();
                while let Some((i, c)) = self
                    .chars
                    .next_if(|(_, c)| c.is_alphanumeric() || *c == '_')
                {
                    end = i + c.len_utf8();
                }
                Token::Ident(self.src[pos..end].to_string())
            }
            _ => return Err(self.error(pos, &format!("unexpected '{c}'"))),
        };
        Ok(Some((pos, token)))
    }

    fn peek(&mut self) -> DreplResult<Option<&Token>> {
        if self.peeked.is_none() {
            self.peeked = self.lex()?;
        }
        Ok(self.peeked.as_ref().map(|(_, t)| t))
    }

    fn next(&mut self) -> DreplResult<Option<(usize, Token)>> {
        match self.peeked.take() {
            Some(token) => Ok(Some(token)),
            None => self.lex(),
        }
    }

    fn expr(&mut self) -> DreplResult<IndexExpr> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek()? {
            let op = if *c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            self.next()?;
            lhs = IndexExpr::Binary(Box::new(lhs), op, Box::new(self.term()?));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> DreplResult<IndexExpr> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek()? {
            let op = if *c == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            self.next()?;
            lhs = IndexExpr::Binary(Box::new(lhs), op, Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> DreplResult<IndexExpr> {
        if let Some(Token::Op('-')) = self.peek()? {
            self.next()?;
            return Ok(IndexExpr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> DreplResult<IndexExpr> {
        match self.next()? {
            Some((_, Token::Int(v))) => Ok(IndexExpr::Literal(v)),
            Some((_, Token::Ident(name))) => Ok(dimension(&name)
                .map(IndexExpr::Dim)
                .unwrap_or(IndexExpr::Named(name))),
            Some((pos, Token::Open)) => {
                let inner = self.expr()?;
                match self.next()? {
                    Some((_, Token::Close)) => Ok(inner),
                    _ => Err(self.error(pos, "unclosed '('")),
                }
            }
            Some((pos, Token::Close | Token::Op(_))) => Err(self.error(pos, "unexpected token")),
            None => Err(self.error(self.src.len(), "unexpected end")),
        }
    }
}

/// `v<n>` names view dimension `n`.
fn dimension(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for IndexExpr {
    type Err = DreplError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser::new(s);
        let expr = parser.expr()?;
        if let Some((pos, _)) = parser.next()? {
            return Err(parser.error(pos, "trailing input"));
        }
        Ok(expr)
    }
}
