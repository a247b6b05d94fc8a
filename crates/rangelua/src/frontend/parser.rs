// Recursive-descent parser for Lua 5.5, producing the AST of `ast.rs`.
// Operator precedence follows the reference grammar; `..` and `^` are
// right-associative.

use smol_str::SmolStr;

use crate::frontend::ast::*;
use crate::frontend::lexer::{Lexer, SyntaxError};
use crate::frontend::token::Token;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    tok: Token,
    line: u32,
    col: u32,
    ahead: Option<(Token, u32, u32)>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, SyntaxError> {
        let mut lexer = Lexer::new(source);
        let (tok, line, col) = lexer.next_token()?;
        Ok(Parser {
            lexer,
            tok,
            line,
            col,
            ahead: None,
        })
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: format!("{} near {}", message.into(), self.tok.describe()),
            line: self.line,
            col: self.col,
        }
    }

    fn advance(&mut self) -> Result<(), SyntaxError> {
        let (tok, line, col) = match self.ahead.take() {
            Some(t) => t,
            None => self.lexer.next_token()?,
        };
        self.tok = tok;
        self.line = line;
        self.col = col;
        Ok(())
    }

    fn peek(&mut self) -> Result<&Token, SyntaxError> {
        if self.ahead.is_none() {
            self.ahead = Some(self.lexer.next_token()?);
        }
        Ok(self.ahead.as_ref().map(|(t, _, _)| t).unwrap_or(&Token::Eof))
    }

    fn check(&self, t: &Token) -> bool {
        self.tok == *t
    }

    fn accept(&mut self, t: &Token) -> Result<bool, SyntaxError> {
        if self.check(t) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, t: &Token) -> Result<(), SyntaxError> {
        if self.check(t) {
            self.advance()
        } else {
            Err(self.error(format!("{} expected", t.describe())))
        }
    }

    fn expect_name(&mut self) -> Result<SmolStr, SyntaxError> {
        match &self.tok {
            Token::Name(n) => {
                let n = n.clone();
                self.advance()?;
                Ok(n)
            }
            _ => Err(self.error("<name> expected")),
        }
    }

    // ============ entry ============

    pub fn parse_chunk(mut self) -> Result<Block, SyntaxError> {
        let block = self.parse_block()?;
        if !self.check(&Token::Eof) {
            return Err(self.error("<eof> expected"));
        }
        Ok(block)
    }

    fn block_follow(&self, with_until: bool) -> bool {
        match self.tok {
            Token::Else | Token::Elseif | Token::End | Token::Eof => true,
            Token::Until => with_until,
            _ => false,
        }
    }

    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let mut stmts = Vec::new();
        while !self.block_follow(true) {
            if self.check(&Token::Return) {
                stmts.push(self.parse_return()?);
                break; // return must be the last statement
            }
            if let Some(stat) = self.parse_statement()? {
                stmts.push(stat);
            }
        }
        Ok(Block { stmts })
    }

    // ============ statements ============

    fn parse_statement(&mut self) -> Result<Option<Stat>, SyntaxError> {
        let span = self.span();
        match self.tok {
            Token::Semi => {
                self.advance()?;
                Ok(None)
            }
            Token::If => Ok(Some(self.parse_if(span)?)),
            Token::While => Ok(Some(self.parse_while(span)?)),
            Token::Do => {
                self.advance()?;
                let body = self.parse_block()?;
                self.expect(&Token::End)?;
                Ok(Some(Stat::Do { body, span }))
            }
            Token::For => Ok(Some(self.parse_for(span)?)),
            Token::Repeat => Ok(Some(self.parse_repeat(span)?)),
            Token::Function => Ok(Some(self.parse_function_stat(span)?)),
            Token::Local => Ok(Some(self.parse_local(span)?)),
            Token::DColon => {
                self.advance()?;
                let name = self.expect_name()?;
                self.expect(&Token::DColon)?;
                Ok(Some(Stat::Label { name, span }))
            }
            Token::Break => {
                self.advance()?;
                Ok(Some(Stat::Break { span }))
            }
            Token::Goto => {
                self.advance()?;
                let label = self.expect_name()?;
                Ok(Some(Stat::Goto { label, span }))
            }
            _ => Ok(Some(self.parse_expr_stat(span)?)),
        }
    }

    fn parse_return(&mut self) -> Result<Stat, SyntaxError> {
        let span = self.span();
        self.advance()?; // skip 'return'
        let mut exprs = Vec::new();
        if !self.block_follow(true) && !self.check(&Token::Semi) {
            exprs = self.parse_exprlist()?;
        }
        let _ = self.accept(&Token::Semi)?;
        Ok(Stat::Return { exprs, span })
    }

    fn parse_if(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        self.advance()?; // skip 'if'
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(&Token::Then)?;
        let body = self.parse_block()?;
        arms.push((cond, body));
        loop {
            match self.tok {
                Token::Elseif => {
                    self.advance()?;
                    let cond = self.parse_expr()?;
                    self.expect(&Token::Then)?;
                    let body = self.parse_block()?;
                    arms.push((cond, body));
                }
                Token::Else => {
                    self.advance()?;
                    let else_block = self.parse_block()?;
                    self.expect(&Token::End)?;
                    return Ok(Stat::If {
                        arms,
                        else_block: Some(else_block),
                        span,
                    });
                }
                Token::End => {
                    self.advance()?;
                    return Ok(Stat::If {
                        arms,
                        else_block: None,
                        span,
                    });
                }
                _ => return Err(self.error("'end' expected")),
            }
        }
    }

    fn parse_while(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        self.advance()?; // skip 'while'
        let cond = self.parse_expr()?;
        self.expect(&Token::Do)?;
        let body = self.parse_block()?;
        self.expect(&Token::End)?;
        Ok(Stat::While { cond, body, span })
    }

    fn parse_repeat(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        self.advance()?; // skip 'repeat'
        let body = self.parse_block()?;
        self.expect(&Token::Until)?;
        let cond = self.parse_expr()?;
        Ok(Stat::Repeat { body, cond, span })
    }

    fn parse_for(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        self.advance()?; // skip 'for'
        let first = self.expect_name()?;
        if self.check(&Token::Assign) {
            self.advance()?;
            let start = self.parse_expr()?;
            self.expect(&Token::Comma)?;
            let limit = self.parse_expr()?;
            let step = if self.accept(&Token::Comma)? {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&Token::Do)?;
            let body = self.parse_block()?;
            self.expect(&Token::End)?;
            Ok(Stat::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
                span,
            })
        } else {
            let mut names = vec![first];
            while self.accept(&Token::Comma)? {
                names.push(self.expect_name()?);
            }
            self.expect(&Token::In)?;
            let exprs = self.parse_exprlist()?;
            self.expect(&Token::Do)?;
            let body = self.parse_block()?;
            self.expect(&Token::End)?;
            Ok(Stat::GenericFor {
                names,
                exprs,
                body,
                span,
            })
        }
    }

    fn parse_function_stat(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        self.advance()?; // skip 'function'
        let base = self.expect_name()?;
        let mut fields = Vec::new();
        let mut method = None;
        loop {
            if self.accept(&Token::Dot)? {
                fields.push(self.expect_name()?);
            } else if self.accept(&Token::Colon)? {
                method = Some(self.expect_name()?);
                break;
            } else {
                break;
            }
        }
        let is_method = method.is_some();
        let body = self.parse_func_body(is_method)?;
        Ok(Stat::Function {
            target: FuncTarget {
                base,
                fields,
                method,
            },
            body,
            span,
        })
    }

    fn parse_local(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        self.advance()?; // skip 'local'
        if self.accept(&Token::Function)? {
            let name = self.expect_name()?;
            let body = self.parse_func_body(false)?;
            return Ok(Stat::LocalFunction { name, body, span });
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if self.accept(&Token::Lt)? {
                let attr_name = self.expect_name()?;
                let attrib = match attr_name.as_str() {
                    "const" => Attrib::Const,
                    "close" => Attrib::Close,
                    other => {
                        return Err(self.error(format!("unknown attribute '{other}'")));
                    }
                };
                self.expect(&Token::Gt)?;
                attrib
            } else {
                Attrib::None
            };
            names.push((name, attrib));
            if !self.accept(&Token::Comma)? {
                break;
            }
        }
        let values = if self.accept(&Token::Assign)? {
            self.parse_exprlist()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local {
            names,
            values,
            span,
        })
    }

    fn parse_expr_stat(&mut self, span: Span) -> Result<Stat, SyntaxError> {
        let first = self.parse_suffixed_expr()?;
        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![first];
            while self.accept(&Token::Comma)? {
                targets.push(self.parse_suffixed_expr()?);
            }
            for t in &targets {
                if !matches!(t, Expr::Name(..) | Expr::Index { .. }) {
                    return Err(self.error("syntax error: cannot assign to this expression"));
                }
            }
            self.expect(&Token::Assign)?;
            let values = self.parse_exprlist()?;
            return Ok(Stat::Assign {
                targets,
                values,
                span,
            });
        }
        if !matches!(first, Expr::Call { .. } | Expr::MethodCall { .. }) {
            return Err(self.error("syntax error"));
        }
        Ok(Stat::Expr { expr: first, span })
    }

    // ============ expressions ============

    fn parse_exprlist(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.accept(&Token::Comma)? {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_sub_expr(0)
    }

    /// Precedence-climbing expression parser.
    fn parse_sub_expr(&mut self, limit: u8) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let mut left = if let Some(op) = unary_op(&self.tok) {
            self.advance()?;
            let operand = self.parse_sub_expr(UNARY_PRIORITY)?;
            Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            }
        } else {
            self.parse_simple_expr()?
        };

        while let Some(op) = binary_op(&self.tok) {
            let (lprio, rprio) = binary_priority(op);
            if lprio <= limit {
                break;
            }
            let op_span = self.span();
            self.advance()?;
            let right = self.parse_sub_expr(rprio)?;
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
                span: op_span,
            };
        }
        Ok(left)
    }

    fn parse_simple_expr(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let expr = match &self.tok {
            Token::Nil => {
                self.advance()?;
                Expr::Nil(span)
            }
            Token::True => {
                self.advance()?;
                Expr::True(span)
            }
            Token::False => {
                self.advance()?;
                Expr::False(span)
            }
            Token::Ellipsis => {
                self.advance()?;
                Expr::Vararg(span)
            }
            Token::Int(i) => {
                let i = *i;
                self.advance()?;
                Expr::Integer(i, span)
            }
            Token::Float(f) => {
                let f = *f;
                self.advance()?;
                Expr::Float(f, span)
            }
            Token::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Expr::Str(s, span)
            }
            Token::Function => {
                self.advance()?;
                Expr::Function(self.parse_func_body(false)?)
            }
            Token::LBrace => self.parse_table_constructor(span)?,
            _ => return self.parse_suffixed_expr(),
        };
        Ok(expr)
    }

    /// primaryexp: Name | '(' expr ')'
    fn parse_primary_expr(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        match &self.tok {
            Token::Name(n) => {
                let n = n.clone();
                self.advance()?;
                Ok(Expr::Name(n, span))
            }
            Token::LParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Paren {
                    inner: Box::new(inner),
                    span,
                })
            }
            _ => Err(self.error("unexpected symbol")),
        }
    }

    /// suffixedexp: primaryexp { '.' Name | '[' expr ']' | ':' Name args | args }
    fn parse_suffixed_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            let span = self.span();
            match &self.tok {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(Expr::Str(name.to_string(), span)),
                        span,
                    };
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(key),
                        span,
                    };
                }
                Token::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        method,
                        args,
                        span,
                    };
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        span,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let span = self.span();
        match &self.tok {
            Token::LParen => {
                self.advance()?;
                let args = if self.check(&Token::RParen) {
                    Vec::new()
                } else {
                    self.parse_exprlist()?
                };
                self.expect(&Token::RParen)?;
                Ok(args)
            }
            Token::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Ok(vec![Expr::Str(s, span)])
            }
            Token::LBrace => Ok(vec![self.parse_table_constructor(span)?]),
            _ => Err(self.error("function arguments expected")),
        }
    }

    fn parse_table_constructor(&mut self, span: Span) -> Result<Expr, SyntaxError> {
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::LBracket) {
                self.advance()?;
                let key = self.parse_expr()?;
                self.expect(&Token::RBracket)?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expr()?;
                fields.push(TableField::Keyed(key, value));
            } else {
                let named = if let Token::Name(n) = &self.tok {
                    let name = n.clone();
                    (*self.peek()? == Token::Assign).then_some(name)
                } else {
                    None
                };
                if let Some(name) = named {
                    self.advance()?;
                    self.advance()?; // skip '='
                    let value = self.parse_expr()?;
                    fields.push(TableField::Named(name, value));
                } else {
                    fields.push(TableField::Item(self.parse_expr()?));
                }
            }
            if !self.accept(&Token::Comma)? && !self.accept(&Token::Semi)? {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::Table { fields, span })
    }

    fn parse_func_body(&mut self, is_method: bool) -> Result<FuncBody, SyntaxError> {
        let span = self.span();
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if is_method {
            params.push(SmolStr::new("self"));
        }
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                match &self.tok {
                    Token::Name(n) => {
                        params.push(n.clone());
                        self.advance()?;
                    }
                    Token::Ellipsis => {
                        is_vararg = true;
                        self.advance()?;
                        break;
                    }
                    _ => return Err(self.error("<name> expected")),
                }
                if !self.accept(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let block = self.parse_block()?;
        self.expect(&Token::End)?;
        Ok(FuncBody {
            params,
            is_vararg,
            block,
            span,
        })
    }
}

const UNARY_PRIORITY: u8 = 12;

fn unary_op(tok: &Token) -> Option<UnOp> {
    match tok {
        Token::Minus => Some(UnOp::Neg),
        Token::Not => Some(UnOp::Not),
        Token::Hash => Some(UnOp::Len),
        Token::Tilde => Some(UnOp::BNot),
        _ => None,
    }
}

fn binary_op(tok: &Token) -> Option<BinOp> {
    match tok {
        Token::Plus => Some(BinOp::Add),
        Token::Minus => Some(BinOp::Sub),
        Token::Star => Some(BinOp::Mul),
        Token::Slash => Some(BinOp::Div),
        Token::DSlash => Some(BinOp::IDiv),
        Token::Percent => Some(BinOp::Mod),
        Token::Caret => Some(BinOp::Pow),
        Token::DDot => Some(BinOp::Concat),
        Token::Eq => Some(BinOp::Eq),
        Token::Ne => Some(BinOp::Ne),
        Token::Lt => Some(BinOp::Lt),
        Token::Le => Some(BinOp::Le),
        Token::Gt => Some(BinOp::Gt),
        Token::Ge => Some(BinOp::Ge),
        Token::And => Some(BinOp::And),
        Token::Or => Some(BinOp::Or),
        Token::Amp => Some(BinOp::BAnd),
        Token::Pipe => Some(BinOp::BOr),
        Token::Tilde => Some(BinOp::BXor),
        Token::Shl => Some(BinOp::Shl),
        Token::Shr => Some(BinOp::Shr),
        _ => None,
    }
}

/// (left, right) binding priorities; right < left makes an operator
/// right-associative.
fn binary_priority(op: BinOp) -> (u8, u8) {
    use BinOp::*;
    match op {
        Or => (1, 1),
        And => (2, 2),
        Lt | Gt | Le | Ge | Ne | Eq => (3, 3),
        BOr => (4, 4),
        BXor => (5, 5),
        BAnd => (6, 6),
        Shl | Shr => (7, 7),
        Concat => (9, 8),
        Add | Sub => (10, 10),
        Mul | Div | IDiv | Mod => (11, 11),
        Pow => (14, 13),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Block {
        Parser::new(src).unwrap().parse_chunk().unwrap()
    }

    #[test]
    fn test_local_and_return() {
        let block = parse("local x = 1 return x");
        assert_eq!(block.stmts.len(), 2);
        assert!(matches!(block.stmts[0], Stat::Local { .. }));
        assert!(matches!(block.stmts[1], Stat::Return { .. }));
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let block = parse("return 1 + 2 * 3");
        let Stat::Return { exprs, .. } = &block.stmts[0] else {
            panic!("expected return");
        };
        let Expr::Binary { op: BinOp::Add, rhs, .. } = &exprs[0] else {
            panic!("expected add at top");
        };
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_right_associative_concat() {
        // a .. b .. c parses as a .. (b .. c)
        let block = parse("return 'a' .. 'b' .. 'c'");
        let Stat::Return { exprs, .. } = &block.stmts[0] else {
            panic!("expected return");
        };
        let Expr::Binary { op: BinOp::Concat, rhs, .. } = &exprs[0] else {
            panic!("expected concat at top");
        };
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Concat, .. }));
    }

    #[test]
    fn test_method_call_and_fields() {
        let block = parse("obj.a:m(1, 'x')\nt[1] = 2");
        assert!(matches!(block.stmts[0], Stat::Expr { .. }));
        assert!(matches!(block.stmts[1], Stat::Assign { .. }));
    }

    #[test]
    fn test_function_statement_forms() {
        let block = parse("function a.b.c:m() end local function f() end");
        let Stat::Function { target, body, .. } = &block.stmts[0] else {
            panic!("expected function stat");
        };
        assert_eq!(target.base.as_str(), "a");
        assert_eq!(target.fields.len(), 2);
        assert_eq!(target.method.as_deref(), Some("m"));
        // implicit self
        assert_eq!(body.params[0].as_str(), "self");
        assert!(matches!(block.stmts[1], Stat::LocalFunction { .. }));
    }

    #[test]
    fn test_table_constructor_flavors() {
        let block = parse("local t = {1, 2, x = 3, [4] = 5; 6}");
        let Stat::Local { values, .. } = &block.stmts[0] else {
            panic!("expected local");
        };
        let Expr::Table { fields, .. } = &values[0] else {
            panic!("expected table");
        };
        assert_eq!(fields.len(), 5);
        assert!(matches!(fields[2], TableField::Named(..)));
        assert!(matches!(fields[3], TableField::Keyed(..)));
    }

    #[test]
    fn test_attribs() {
        let block = parse("local x <const> = 1 local y <close> = nil");
        let Stat::Local { names, .. } = &block.stmts[0] else {
            panic!("expected local");
        };
        assert_eq!(names[0].1, Attrib::Const);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Parser::new("local = 5").unwrap().parse_chunk().is_err());
        assert!(Parser::new("return return")
            .unwrap()
            .parse_chunk()
            .is_err());
        assert!(Parser::new("a b c").unwrap().parse_chunk().is_err());
    }

    #[test]
    fn test_statement_after_return_rejected() {
        assert!(Parser::new("return 1 local x = 2")
            .unwrap()
            .parse_chunk()
            .is_err());
    }
}
