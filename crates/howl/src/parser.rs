use crate::ast::*;
use crate::diagnostics::{Diagnostic, HowlError, HowlResult};
use crate::lexer;
use crate::position::{Span, DUMMY_SPAN};
use crate::source::SourceFile;
use crate::tokens::{Keyword, Symbol, Token, TokenKind};
use smol_str::SmolStr;
use std::rc::Rc;

pub struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, index: 0 }
    }

    pub fn parse(&mut self) -> HowlResult<Program> {
        let start = self.current().span;
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.is_eof() {
            if self.peek_token(|t| matches!(t.kind, TokenKind::Indent)) {
                return Err(self.error_here("unexpected indent"));
            }
            self.parse_statement(&mut statements)?;
            self.skip_newlines();
        }
        Ok(Program::new(Block::new(statements, start)))
    }

    /// Parses a standalone expression (a bare tuple such as `a, b` is allowed)
    /// and requires the input to end afterwards.
    pub fn parse_standalone_expression(&mut self) -> HowlResult<Expr> {
        if self.is_eof() {
            return Err(self.error_here("expected an expression"));
        }
        let expr = self.parse_testlist_star()?;
        if !self.is_eof() {
            return Err(self.error_here("invalid syntax"));
        }
        Ok(expr)
    }

    fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> HowlResult<()> {
        let stmt = match self.current().kind.clone() {
            TokenKind::Keyword(Keyword::If) => Stmt::If(self.parse_if_statement()?),
            TokenKind::Keyword(Keyword::While) => self.parse_while_statement()?,
            TokenKind::Keyword(Keyword::For) => self.parse_for_statement()?,
            TokenKind::Keyword(Keyword::Def) => self.parse_function_def()?,
            TokenKind::Keyword(Keyword::Class) => self.parse_class_def()?,
            TokenKind::Keyword(Keyword::Try) => self.parse_try_statement()?,
            TokenKind::Keyword(Keyword::With | Keyword::Async) => {
                return Err(self.error_here(format!(
                    "`{}` statements are not supported",
                    self.current().kind
                )))
            }
            TokenKind::Symbol(Symbol::At) => {
                return Err(self.error_here("decorators are not supported"))
            }
            _ => return self.parse_simple_line(out),
        };
        out.push(stmt);
        Ok(())
    }

    /// `small_stmt (';' small_stmt)* [';'] NEWLINE`
    fn parse_simple_line(&mut self, out: &mut Vec<Stmt>) -> HowlResult<()> {
        loop {
            let stmt = self.parse_small_statement()?;
            out.push(stmt);
            if self.eat_symbol(Symbol::Semicolon) {
                if self.at_line_end() {
                    break;
                }
                continue;
            }
            break;
        }
        self.expect_line_end()
    }

    fn parse_small_statement(&mut self) -> HowlResult<Stmt> {
        let start = self.current().span;
        match self.current().kind.clone() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                Ok(Stmt::Pass(start))
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                Ok(Stmt::Break(start))
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                Ok(Stmt::Continue(start))
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.at_line_end() || self.peek_symbol(Symbol::Semicolon) {
                    None
                } else {
                    Some(self.parse_testlist_star()?)
                };
                Ok(Stmt::Return(ReturnStmt {
                    value,
                    span: start.union(self.prev_span()),
                }))
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                let exception = if self.at_line_end() || self.peek_symbol(Symbol::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                if self.eat_keyword(Keyword::From) {
                    self.parse_expression()?;
                }
                Ok(Stmt::Raise(RaiseStmt {
                    exception,
                    span: start.union(self.prev_span()),
                }))
            }
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                let names = self.parse_name_list("global name")?;
                Ok(Stmt::Global(names, start.union(self.prev_span())))
            }
            TokenKind::Keyword(Keyword::Nonlocal) => {
                self.advance();
                let names = self.parse_name_list("nonlocal name")?;
                Ok(Stmt::Nonlocal(names, start.union(self.prev_span())))
            }
            TokenKind::Keyword(Keyword::Del) => {
                self.advance();
                let mut targets = Vec::new();
                loop {
                    let target = self.parse_bitor()?;
                    if !target.is_assignable() {
                        return Err(self.error_at(target.span(), "cannot delete expression"));
                    }
                    targets.push(target);
                    if !self.eat_symbol(Symbol::Comma) || self.at_line_end() {
                        break;
                    }
                }
                Ok(Stmt::Delete(targets, start.union(self.prev_span())))
            }
            TokenKind::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.parse_expression()?;
                let message = if self.eat_symbol(Symbol::Comma) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(Stmt::Assert(AssertStmt {
                    test,
                    message,
                    span: start.union(self.prev_span()),
                }))
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::Keyword(Keyword::From) => self.parse_from_import(),
            TokenKind::Keyword(Keyword::Yield | Keyword::Await) => {
                Err(self.error_here("generators and coroutines are not supported"))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> HowlResult<Stmt> {
        let start = self.current().span;
        let first = self.parse_testlist_star()?;

        if let TokenKind::Symbol(symbol) = self.current().kind {
            if symbol.is_augmented() {
                if !matches!(first, Expr::Identifier(..) | Expr::Field(_) | Expr::Index(_)) {
                    return Err(self.error_at(
                        first.span(),
                        "illegal expression for augmented assignment",
                    ));
                }
                self.advance();
                let value = self.parse_testlist_star()?;
                return Ok(Stmt::AugAssign(AugAssignStmt {
                    target: first,
                    op: augmented_op(symbol),
                    value,
                    span: start.union(self.prev_span()),
                }));
            }
        }

        if self.peek_symbol(Symbol::Colon) {
            // Annotated assignment: the annotation is parsed and dropped.
            if !matches!(first, Expr::Identifier(..) | Expr::Field(_) | Expr::Index(_)) {
                return Err(self.error_at(first.span(), "illegal target for annotation"));
            }
            self.advance();
            self.parse_expression()?;
            if !self.eat_symbol(Symbol::Equals) {
                return Ok(Stmt::Pass(start.union(self.prev_span())));
            }
            let value = self.parse_testlist_star()?;
            return Ok(Stmt::Assign(AssignStmt {
                targets: vec![first],
                value,
                span: start.union(self.prev_span()),
            }));
        }

        if !self.peek_symbol(Symbol::Equals) {
            return Ok(Stmt::Expr(first, start.union(self.prev_span())));
        }

        let mut exprs = vec![first];
        while self.eat_symbol(Symbol::Equals) {
            exprs.push(self.parse_testlist_star()?);
        }
        let value = exprs.pop().unwrap_or(Expr::Literal(Literal::None, start));
        for target in &exprs {
            if !target.is_assignable() {
                return Err(self.error_at(target.span(), "cannot assign to expression"));
            }
            let starred = match target {
                Expr::Tuple(t) => count_starred(&t.elements),
                Expr::List(l) => count_starred(&l.elements),
                Expr::Starred(..) => {
                    return Err(self.error_at(
                        target.span(),
                        "starred assignment target must be in a list or tuple",
                    ))
                }
                _ => 0,
            };
            if starred > 1 {
                return Err(self.error_at(target.span(), "multiple starred expressions in assignment"));
            }
        }
        Ok(Stmt::Assign(AssignStmt {
            targets: exprs,
            value,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_import(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::Import)?.span;
        let mut names = Vec::new();
        loop {
            let path = self.parse_dotted_path()?;
            let alias = if self.eat_keyword(Keyword::As) {
                Some(self.expect_identifier("import alias")?)
            } else {
                None
            };
            names.push(ImportName { path, alias });
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        Ok(Stmt::Import(ImportStmt {
            names,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_from_import(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::From)?.span;
        while self.eat_symbol(Symbol::Dot) || self.eat_symbol(Symbol::Ellipsis) {}
        let module = self.parse_dotted_path()?;
        self.expect_keyword(Keyword::Import)?;
        let mut items = Vec::new();
        if self.eat_symbol(Symbol::Star) {
            items.push(ImportItem::Wildcard(self.prev_span()));
        } else {
            let parenthesized = self.eat_symbol(Symbol::LParen);
            loop {
                let name = self.expect_identifier("import item")?;
                let alias = if self.eat_keyword(Keyword::As) {
                    Some(self.expect_identifier("import alias")?)
                } else {
                    None
                };
                items.push(ImportItem::Item {
                    name,
                    alias,
                    span: self.prev_span(),
                });
                if !self.eat_symbol(Symbol::Comma) {
                    break;
                }
                if parenthesized && self.peek_symbol(Symbol::RParen) {
                    break;
                }
            }
            if parenthesized {
                self.expect_symbol(Symbol::RParen, "expected ')' after import list")?;
            }
        }
        Ok(Stmt::FromImport(FromImportStmt {
            module,
            items,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_if_statement(&mut self) -> HowlResult<IfStmt> {
        let start = self.advance().span;
        let condition = self.parse_expression()?;
        let header = start.union(condition.span());
        let then_branch = self.parse_suite()?;
        let else_branch = if self.peek_keyword(Keyword::Elif) {
            let nested = self.parse_if_statement()?;
            let span = nested.span;
            Some(Block::new(vec![Stmt::If(nested)], span))
        } else if self.eat_keyword(Keyword::Else) {
            Some(self.parse_suite()?)
        } else {
            None
        };
        Ok(IfStmt {
            condition,
            then_branch,
            else_branch,
            span: header,
        })
    }

    fn parse_while_statement(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::While)?.span;
        let condition = self.parse_expression()?;
        let header = start.union(self.prev_span());
        let body = self.parse_suite()?;
        let orelse = self.parse_else_suite()?;
        Ok(Stmt::While(WhileStmt {
            condition,
            body,
            orelse,
            span: header,
        }))
    }

    fn parse_for_statement(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::For)?.span;
        let target = self.parse_target_list()?;
        self.expect_keyword(Keyword::In)?;
        let iterable = self.parse_testlist_star()?;
        let header = start.union(self.prev_span());
        let body = self.parse_suite()?;
        let orelse = self.parse_else_suite()?;
        Ok(Stmt::For(ForStmt {
            target,
            iterable,
            body,
            orelse,
            span: header,
        }))
    }

    fn parse_else_suite(&mut self) -> HowlResult<Option<Block>> {
        if self.eat_keyword(Keyword::Else) {
            Ok(Some(self.parse_suite()?))
        } else {
            Ok(None)
        }
    }

    fn parse_function_def(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::Def)?.span;
        let name = self.expect_identifier("function name")?;
        self.expect_symbol(Symbol::LParen, "expected '(' after function name")?;
        let params = self.parse_parameters(Symbol::RParen, true)?;
        self.expect_symbol(Symbol::RParen, "expected ')' after parameters")?;
        if self.eat_symbol(Symbol::Arrow) {
            self.parse_expression()?;
        }
        let header = start.union(self.prev_span());
        let body = self.parse_suite()?;
        Ok(Stmt::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body,
            span: header,
        })))
    }

    fn parse_parameters(&mut self, close: Symbol, annotations: bool) -> HowlResult<Vec<Parameter>> {
        let mut params: Vec<Parameter> = Vec::new();
        let mut keyword_only = false;
        let mut seen_default = false;
        while !self.peek_symbol(close) {
            let span = self.current().span;
            if self.eat_symbol(Symbol::Slash) {
                // positional-only marker
            } else if self.eat_symbol(Symbol::DoubleStar) {
                let name = self.expect_identifier("parameter name")?;
                self.skip_annotation(annotations)?;
                params.push(Parameter {
                    name,
                    default: None,
                    kind: ParamKind::KwArgs,
                    span,
                });
            } else if self.eat_symbol(Symbol::Star) {
                keyword_only = true;
                if let TokenKind::Identifier(name) = self.current().kind.clone() {
                    self.advance();
                    self.skip_annotation(annotations)?;
                    params.push(Parameter {
                        name,
                        default: None,
                        kind: ParamKind::VarArgs,
                        span,
                    });
                }
            } else {
                if params.iter().any(|p| p.kind == ParamKind::KwArgs) {
                    return Err(self.error_here("parameter after `**` parameter"));
                }
                let name = self.expect_identifier("parameter name")?;
                self.skip_annotation(annotations)?;
                let default = if self.eat_symbol(Symbol::Equals) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                if default.is_some() {
                    seen_default = true;
                } else if seen_default && !keyword_only {
                    return Err(self.error_at(
                        span,
                        "non-default argument follows default argument",
                    ));
                }
                if params.iter().any(|p| p.name == name) {
                    return Err(self.error_at(
                        span,
                        format!("duplicate argument '{name}' in function definition"),
                    ));
                }
                params.push(Parameter {
                    name,
                    default,
                    kind: if keyword_only {
                        ParamKind::KeywordOnly
                    } else {
                        ParamKind::Positional
                    },
                    span,
                });
            }
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn skip_annotation(&mut self, annotations: bool) -> HowlResult<()> {
        if annotations && self.eat_symbol(Symbol::Colon) {
            self.parse_expression()?;
        }
        Ok(())
    }

    fn parse_class_def(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::Class)?.span;
        let name = self.expect_identifier("class name")?;
        let mut bases = Vec::new();
        if self.eat_symbol(Symbol::LParen) {
            for argument in self.parse_call_arguments()? {
                if let Argument::Positional(base) = argument {
                    bases.push(base);
                }
            }
            self.expect_symbol(Symbol::RParen, "expected ')' after base classes")?;
        }
        let header = start.union(self.prev_span());
        let body = self.parse_suite()?;
        Ok(Stmt::ClassDef(ClassDef {
            name,
            bases,
            body,
            span: header,
        }))
    }

    fn parse_try_statement(&mut self) -> HowlResult<Stmt> {
        let start = self.expect_keyword(Keyword::Try)?.span;
        let body = self.parse_suite()?;
        let mut handlers = Vec::new();
        while self.peek_keyword(Keyword::Except) {
            let span = self.advance().span;
            let mut kind = None;
            let mut name = None;
            if !self.peek_symbol(Symbol::Colon) {
                kind = Some(self.parse_expression()?);
                if self.eat_keyword(Keyword::As) {
                    name = Some(self.expect_identifier("exception name")?);
                }
            }
            if kind.is_none() && self.peek_keyword(Keyword::Except) {
                return Err(self.error_at(span, "default 'except:' must be last"));
            }
            let handler_body = self.parse_suite()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                span,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_keyword(Keyword::Else) {
            Some(self.parse_suite()?)
        } else {
            None
        };
        let finally = if self.eat_keyword(Keyword::Finally) {
            Some(self.parse_suite()?)
        } else {
            None
        };
        if handlers.is_empty() && finally.is_none() {
            return Err(self.error_here("expected 'except' or 'finally' block"));
        }
        Ok(Stmt::Try(TryStmt {
            body,
            handlers,
            orelse,
            finally,
            span: start,
        }))
    }

    /// `':' (simple_line | NEWLINE INDENT stmt+ DEDENT)`
    fn parse_suite(&mut self) -> HowlResult<Block> {
        let colon = self.expect_symbol(Symbol::Colon, "expected ':'")?.span;
        let mut statements = Vec::new();
        if !self.peek_token(|t| matches!(t.kind, TokenKind::Newline)) {
            self.parse_simple_line(&mut statements)?;
            return Ok(Block::new(statements, colon));
        }
        self.skip_newlines();
        if !self.peek_token(|t| matches!(t.kind, TokenKind::Indent)) {
            return Err(self.error_here("expected an indented block"));
        }
        self.advance();
        while !self.is_eof() && !self.peek_token(|t| matches!(t.kind, TokenKind::Dedent)) {
            self.parse_statement(&mut statements)?;
            self.skip_newlines();
        }
        if self.peek_token(|t| matches!(t.kind, TokenKind::Dedent)) {
            self.advance();
        }
        let span = statements.first().map(Stmt::span).unwrap_or(colon);
        Ok(Block::new(statements, span))
    }

    fn parse_target_list(&mut self) -> HowlResult<Expr> {
        let start = self.current().span;
        let first = self.parse_star_or_bitor()?;
        if !self.peek_symbol(Symbol::Comma) {
            return self.checked_target(first);
        }
        let mut elements = vec![first];
        while self.eat_symbol(Symbol::Comma) {
            if !self.starts_expression() {
                break;
            }
            elements.push(self.parse_star_or_bitor()?);
        }
        let target = Expr::Tuple(TupleExpr {
            elements,
            span: start.union(self.prev_span()),
        });
        self.checked_target(target)
    }

    fn checked_target(&self, target: Expr) -> HowlResult<Expr> {
        if target.is_assignable() {
            Ok(target)
        } else {
            Err(self.error_at(target.span(), "cannot assign to expression"))
        }
    }

    fn parse_star_or_bitor(&mut self) -> HowlResult<Expr> {
        if self.peek_symbol(Symbol::Star) {
            let span = self.advance().span;
            let inner = self.parse_bitor()?;
            let span = span.union(inner.span());
            return Ok(Expr::Starred(Box::new(inner), span));
        }
        self.parse_bitor()
    }

    /// `(test | star_expr) (',' (test | star_expr))* [',']`
    fn parse_testlist_star(&mut self) -> HowlResult<Expr> {
        let start = self.current().span;
        let first = self.parse_star_or_test()?;
        if !self.peek_symbol(Symbol::Comma) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat_symbol(Symbol::Comma) {
            if !self.starts_expression() {
                break;
            }
            elements.push(self.parse_star_or_test()?);
        }
        Ok(Expr::Tuple(TupleExpr {
            elements,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_star_or_test(&mut self) -> HowlResult<Expr> {
        if self.peek_symbol(Symbol::Star) {
            return self.parse_star_or_bitor();
        }
        self.parse_expression()
    }

    /// `test`: lambda, or a conditional expression.
    pub fn parse_expression(&mut self) -> HowlResult<Expr> {
        if self.peek_keyword(Keyword::Lambda) {
            return self.parse_lambda();
        }
        let start = self.current().span;
        let value = self.parse_or()?;
        if self.peek_keyword(Keyword::If) {
            self.advance();
            let condition = self.parse_or()?;
            self.expect_keyword(Keyword::Else)?;
            let else_value = self.parse_expression()?;
            let span = start.union(self.prev_span());
            return Ok(Expr::IfElse(Box::new(IfElseExpr {
                condition,
                then_value: value,
                else_value,
                span,
            })));
        }
        Ok(value)
    }

    fn parse_lambda(&mut self) -> HowlResult<Expr> {
        let start = self.expect_keyword(Keyword::Lambda)?.span;
        let params = self.parse_parameters(Symbol::Colon, false)?;
        self.expect_symbol(Symbol::Colon, "expected ':' in lambda")?;
        let body = self.parse_expression()?;
        let span = start.union(self.prev_span());
        Ok(Expr::Lambda(Rc::new(LambdaExpr { params, body, span })))
    }

    fn parse_or(&mut self) -> HowlResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> HowlResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> HowlResult<Expr> {
        if self.peek_keyword(Keyword::Not) {
            let start = self.advance().span;
            let expr = self.parse_not()?;
            let span = start.union(expr.span());
            return Ok(Expr::Unary(Box::new(UnaryExpr {
                op: UnaryOp::Not,
                expr,
                span,
            })));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> HowlResult<Expr> {
        let left = self.parse_bitor()?;
        let mut comparisons = Vec::new();
        while let Some(op) = self.eat_compare_op() {
            comparisons.push((op, self.parse_bitor()?));
        }
        if comparisons.is_empty() {
            return Ok(left);
        }
        let span = left.span().union(self.prev_span());
        Ok(Expr::Compare(Box::new(CompareExpr {
            left,
            comparisons,
            span,
        })))
    }

    fn eat_compare_op(&mut self) -> Option<CompareOp> {
        let op = match &self.current().kind {
            TokenKind::Symbol(Symbol::EqEq) => CompareOp::Eq,
            TokenKind::Symbol(Symbol::NotEq) => CompareOp::NotEq,
            TokenKind::Symbol(Symbol::Lt) => CompareOp::Lt,
            TokenKind::Symbol(Symbol::Le) => CompareOp::Lte,
            TokenKind::Symbol(Symbol::Gt) => CompareOp::Gt,
            TokenKind::Symbol(Symbol::Ge) => CompareOp::Gte,
            TokenKind::Keyword(Keyword::In) => CompareOp::In,
            TokenKind::Keyword(Keyword::Not) if self.peek_keyword_n(Keyword::In, 1) => {
                self.advance();
                CompareOp::NotIn
            }
            TokenKind::Keyword(Keyword::Is) => {
                if self.peek_keyword_n(Keyword::Not, 1) {
                    self.advance();
                    CompareOp::IsNot
                } else {
                    CompareOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_bitor(&mut self) -> HowlResult<Expr> {
        self.parse_binary_level(0)
    }

    /// Precedence climbing over the binary operator table, loosest first.
    fn parse_binary_level(&mut self, level: usize) -> HowlResult<Expr> {
        const LEVELS: &[&[(Symbol, BinaryOp)]] = &[
            &[(Symbol::Pipe, BinaryOp::BitOr)],
            &[(Symbol::Caret, BinaryOp::BitXor)],
            &[(Symbol::Amp, BinaryOp::BitAnd)],
            &[(Symbol::ShiftLeft, BinaryOp::Shl), (Symbol::ShiftRight, BinaryOp::Shr)],
            &[(Symbol::Plus, BinaryOp::Add), (Symbol::Minus, BinaryOp::Sub)],
            &[
                (Symbol::Star, BinaryOp::Mul),
                (Symbol::Slash, BinaryOp::Div),
                (Symbol::DoubleSlash, BinaryOp::FloorDiv),
                (Symbol::Percent, BinaryOp::Mod),
                (Symbol::At, BinaryOp::MatMul),
            ],
        ];
        if level == LEVELS.len() {
            return self.parse_factor();
        }
        let mut left = self.parse_binary_level(level + 1)?;
        'outer: loop {
            for (symbol, op) in LEVELS[level] {
                if self.eat_symbol(*symbol) {
                    let right = self.parse_binary_level(level + 1)?;
                    left = binary(*op, left, right);
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> HowlResult<Expr> {
        let op = match self.current().kind {
            TokenKind::Symbol(Symbol::Minus) => Some(UnaryOp::Neg),
            TokenKind::Symbol(Symbol::Plus) => Some(UnaryOp::Pos),
            TokenKind::Symbol(Symbol::Tilde) => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.advance().span;
            let expr = self.parse_factor()?;
            let span = start.union(expr.span());
            return Ok(Expr::Unary(Box::new(UnaryExpr { op, expr, span })));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> HowlResult<Expr> {
        let base = self.parse_postfix()?;
        if self.eat_symbol(Symbol::DoubleStar) {
            let exponent = self.parse_factor()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> HowlResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_symbol(Symbol::LParen) {
                let args = self.parse_call_arguments()?;
                self.expect_symbol(Symbol::RParen, "expected ')' after arguments")?;
                let span = expr.span().union(self.prev_span());
                expr = Expr::Call(Box::new(CallExpr {
                    function: expr,
                    args,
                    span,
                }));
            } else if self.eat_symbol(Symbol::LBracket) {
                let index = self.parse_subscript()?;
                self.expect_symbol(Symbol::RBracket, "expected ']' after subscript")?;
                let span = expr.span().union(self.prev_span());
                expr = Expr::Index(Box::new(IndexExpr {
                    target: expr,
                    index,
                    span,
                }));
            } else if self.eat_symbol(Symbol::Dot) {
                let field = self.expect_identifier("attribute name")?;
                let span = expr.span().union(self.prev_span());
                expr = Expr::Field(Box::new(FieldExpr {
                    target: expr,
                    field,
                    span,
                }));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_arguments(&mut self) -> HowlResult<Vec<Argument>> {
        let mut args = Vec::new();
        while !self.peek_symbol(Symbol::RParen) {
            if self.eat_symbol(Symbol::DoubleStar) {
                args.push(Argument::UnpackDict(self.parse_expression()?));
            } else if self.eat_symbol(Symbol::Star) {
                args.push(Argument::Unpack(self.parse_expression()?));
            } else if matches!(self.current().kind, TokenKind::Identifier(_))
                && self
                    .tokens
                    .get(self.index + 1)
                    .is_some_and(|t| t.is_symbol(Symbol::Equals))
            {
                let name = self.expect_identifier("keyword argument")?;
                self.advance();
                args.push(Argument::Keyword(name, self.parse_expression()?));
            } else {
                if args
                    .iter()
                    .any(|a| matches!(a, Argument::Keyword(..) | Argument::UnpackDict(_)))
                {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                let value = self.parse_expression()?;
                if self.peek_keyword(Keyword::For) {
                    let generator = self.parse_comprehension(ComprehensionKind::Generator, value, None)?;
                    args.push(Argument::Positional(generator));
                    continue;
                }
                args.push(Argument::Positional(value));
            }
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript(&mut self) -> HowlResult<Expr> {
        let start = self.current().span;
        let first = self.parse_slice_item()?;
        if !self.peek_symbol(Symbol::Comma) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat_symbol(Symbol::Comma) {
            if self.peek_symbol(Symbol::RBracket) {
                break;
            }
            elements.push(self.parse_slice_item()?);
        }
        Ok(Expr::Tuple(TupleExpr {
            elements,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_slice_item(&mut self) -> HowlResult<Expr> {
        let start = self.current().span;
        let lower = if self.peek_symbol(Symbol::Colon) {
            None
        } else {
            let expr = self.parse_expression()?;
            if !self.peek_symbol(Symbol::Colon) {
                return Ok(expr);
            }
            Some(expr)
        };
        self.expect_symbol(Symbol::Colon, "expected ':' in slice")?;
        let upper = if self.slice_part_follows() {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let step = if self.eat_symbol(Symbol::Colon) && self.slice_part_follows() {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Expr::Slice(Box::new(SliceExpr {
            lower,
            upper,
            step,
            span: start.union(self.prev_span()),
        })))
    }

    fn slice_part_follows(&self) -> bool {
        !self.peek_symbol(Symbol::Colon)
            && !self.peek_symbol(Symbol::Comma)
            && !self.peek_symbol(Symbol::RBracket)
    }

    fn parse_atom(&mut self) -> HowlResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::IntLiteral(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(value), token.span))
            }
            TokenKind::FloatLiteral(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(value), token.span))
            }
            TokenKind::BoolLiteral(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(value), token.span))
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(Expr::Literal(Literal::None, token.span))
            }
            TokenKind::Symbol(Symbol::Ellipsis) => {
                self.advance();
                Ok(Expr::Literal(Literal::Ellipsis, token.span))
            }
            TokenKind::StringLiteral(_) | TokenKind::FormatString(_) => self.parse_strings(),
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier(name, token.span))
            }
            TokenKind::Symbol(Symbol::LParen) => self.parse_parenthesized(),
            TokenKind::Symbol(Symbol::LBracket) => self.parse_list_display(),
            TokenKind::Symbol(Symbol::LBrace) => self.parse_brace_display(),
            TokenKind::Keyword(Keyword::Yield | Keyword::Await) => {
                Err(self.error_here("generators and coroutines are not supported"))
            }
            TokenKind::Eof | TokenKind::Newline => Err(self.error_here("unexpected end of input")),
            TokenKind::Indent => Err(self.error_here("unexpected indent")),
            TokenKind::Dedent => Err(self.error_here("unexpected dedent")),
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    /// Adjacent string literals concatenate; any f-string part makes the
    /// whole run a format string.
    fn parse_strings(&mut self) -> HowlResult<Expr> {
        let start = self.current().span;
        let mut parts: Vec<FormatPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.current().kind.clone() {
                TokenKind::StringLiteral(text) => {
                    self.advance();
                    push_text(&mut parts, &text);
                }
                TokenKind::FormatString(body) => {
                    let span = self.advance().span;
                    formatted = true;
                    for part in self.parse_format_body(&body, span)? {
                        match part {
                            FormatPart::Text(text) => push_text(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        let span = start.union(self.prev_span());
        if !formatted {
            let text = match parts.pop() {
                Some(FormatPart::Text(text)) => text,
                _ => String::new(),
            };
            return Ok(Expr::Literal(Literal::String(text), span));
        }
        Ok(Expr::FormatString(parts, span))
    }

    fn parse_format_body(&self, body: &str, span: Span) -> HowlResult<Vec<FormatPart>> {
        let chars: Vec<char> = body.chars().collect();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    text.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    text.push('}');
                    i += 2;
                }
                '}' => return Err(self.error_at(span, "f-string: single '}' is not allowed")),
                '{' => {
                    let field_start = i + 1;
                    let mut j = field_start;
                    let mut depth = 0usize;
                    let mut quote: Option<char> = None;
                    let mut expr_end = None;
                    let mut conversion = None;
                    let mut spec_start = None;
                    loop {
                        let Some(&c) = chars.get(j) else {
                            return Err(self.error_at(span, "f-string: expecting '}'"));
                        };
                        if let Some(q) = quote {
                            if c == q {
                                quote = None;
                            }
                            j += 1;
                            continue;
                        }
                        match c {
                            '\'' | '"' if spec_start.is_none() => quote = Some(c),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            '}' if depth > 0 => depth -= 1,
                            '}' => break,
                            '!' if depth == 0
                                && spec_start.is_none()
                                && expr_end.is_none()
                                && chars.get(j + 1) != Some(&'=') =>
                            {
                                expr_end = Some(j);
                                conversion = chars.get(j + 1).copied();
                                j += 2;
                                continue;
                            }
                            ':' if depth == 0 && spec_start.is_none() => {
                                if expr_end.is_none() {
                                    expr_end = Some(j);
                                }
                                spec_start = Some(j + 1);
                            }
                            _ => {}
                        }
                        j += 1;
                    }
                    let mut expr_text: String =
                        chars[field_start..expr_end.unwrap_or(j)].iter().collect();
                    let spec: Option<String> = spec_start.map(|s| chars[s..j].iter().collect());
                    if let Some(c) = conversion {
                        if !matches!(c, 'r' | 's' | 'a') {
                            return Err(self.error_at(
                                span,
                                "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                            ));
                        }
                    }
                    let trimmed = expr_text.trim_end();
                    if trimmed.ends_with('=')
                        && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op))
                    {
                        text.push_str(&expr_text);
                        expr_text = trimmed.trim_end_matches('=').to_string();
                        if conversion.is_none() && spec.is_none() {
                            conversion = Some('r');
                        }
                    }
                    if expr_text.trim().is_empty() {
                        return Err(self.error_at(span, "f-string: empty expression not allowed"));
                    }
                    let expr = parse_expression_text(expr_text.trim())
                        .map_err(|_| self.error_at(span, "f-string: invalid expression"))?;
                    if !text.is_empty() {
                        parts.push(FormatPart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(FormatPart::Field {
                        expr,
                        conversion,
                        spec,
                    });
                    i = j + 1;
                }
                c => {
                    text.push(c);
                    i += 1;
                }
            }
        }
        if !text.is_empty() {
            parts.push(FormatPart::Text(text));
        }
        Ok(parts)
    }

    fn parse_parenthesized(&mut self) -> HowlResult<Expr> {
        let start = self.expect_symbol(Symbol::LParen, "expected '('")?.span;
        if self.eat_symbol(Symbol::RParen) {
            return Ok(Expr::Tuple(TupleExpr {
                elements: Vec::new(),
                span: start.union(self.prev_span()),
            }));
        }
        let first = self.parse_star_or_test()?;
        if self.peek_keyword(Keyword::For) {
            let generator = self.parse_comprehension(ComprehensionKind::Generator, first, None)?;
            self.expect_symbol(Symbol::RParen, "expected ')' after generator expression")?;
            return Ok(generator);
        }
        if !self.peek_symbol(Symbol::Comma) {
            self.expect_symbol(Symbol::RParen, "expected ')'")?;
            if let Expr::Starred(_, span) = first {
                return Err(self.error_at(span, "cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat_symbol(Symbol::Comma) {
            if self.peek_symbol(Symbol::RParen) {
                break;
            }
            elements.push(self.parse_star_or_test()?);
        }
        self.expect_symbol(Symbol::RParen, "expected ')' to close tuple")?;
        Ok(Expr::Tuple(TupleExpr {
            elements,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_list_display(&mut self) -> HowlResult<Expr> {
        let start = self.expect_symbol(Symbol::LBracket, "expected '['")?.span;
        let mut elements = Vec::new();
        if !self.peek_symbol(Symbol::RBracket) {
            let first = self.parse_star_or_test()?;
            if self.peek_keyword(Keyword::For) {
                let comprehension = self.parse_comprehension(ComprehensionKind::List, first, None)?;
                self.expect_symbol(Symbol::RBracket, "expected ']' after list comprehension")?;
                return Ok(comprehension);
            }
            elements.push(first);
            while self.eat_symbol(Symbol::Comma) {
                if self.peek_symbol(Symbol::RBracket) {
                    break;
                }
                elements.push(self.parse_star_or_test()?);
            }
        }
        self.expect_symbol(Symbol::RBracket, "expected ']' to close list literal")?;
        Ok(Expr::List(ListExpr {
            elements,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_brace_display(&mut self) -> HowlResult<Expr> {
        let start = self.expect_symbol(Symbol::LBrace, "expected '{'")?.span;
        if self.eat_symbol(Symbol::RBrace) {
            return Ok(Expr::Dict(DictExpr {
                entries: Vec::new(),
                span: start.union(self.prev_span()),
            }));
        }

        if self.eat_symbol(Symbol::DoubleStar) {
            let first = DictEntry::Unpack(self.parse_bitor()?);
            return self.finish_dict(start, first);
        }

        let first = self.parse_star_or_test()?;
        if self.eat_symbol(Symbol::Colon) {
            let value = self.parse_expression()?;
            if self.peek_keyword(Keyword::For) {
                let comprehension =
                    self.parse_comprehension(ComprehensionKind::Dict, first, Some(value))?;
                self.expect_symbol(Symbol::RBrace, "expected '}' after dict comprehension")?;
                return Ok(comprehension);
            }
            return self.finish_dict(start, DictEntry::Pair(first, value));
        }

        if self.peek_keyword(Keyword::For) {
            let comprehension = self.parse_comprehension(ComprehensionKind::Set, first, None)?;
            self.expect_symbol(Symbol::RBrace, "expected '}' after set comprehension")?;
            return Ok(comprehension);
        }
        let mut elements = vec![first];
        while self.eat_symbol(Symbol::Comma) {
            if self.peek_symbol(Symbol::RBrace) {
                break;
            }
            elements.push(self.parse_star_or_test()?);
        }
        self.expect_symbol(Symbol::RBrace, "expected '}' to close set literal")?;
        Ok(Expr::Set(SetExpr {
            elements,
            span: start.union(self.prev_span()),
        }))
    }

    fn finish_dict(&mut self, start: Span, first: DictEntry) -> HowlResult<Expr> {
        let mut entries = vec![first];
        while self.eat_symbol(Symbol::Comma) {
            if self.peek_symbol(Symbol::RBrace) {
                break;
            }
            if self.eat_symbol(Symbol::DoubleStar) {
                entries.push(DictEntry::Unpack(self.parse_bitor()?));
                continue;
            }
            let key = self.parse_expression()?;
            self.expect_symbol(Symbol::Colon, "expected ':' between dict key and value")?;
            let value = self.parse_expression()?;
            entries.push(DictEntry::Pair(key, value));
        }
        self.expect_symbol(Symbol::RBrace, "expected '}' to close dict literal")?;
        Ok(Expr::Dict(DictExpr {
            entries,
            span: start.union(self.prev_span()),
        }))
    }

    fn parse_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: Expr,
        value: Option<Expr>,
    ) -> HowlResult<Expr> {
        let start = element.span();
        let mut clauses = Vec::new();
        while self.eat_keyword(Keyword::For) {
            let target = self.parse_target_list()?;
            self.expect_keyword(Keyword::In)?;
            let iterable = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat_keyword(Keyword::If) {
                conditions.push(self.parse_or()?);
            }
            clauses.push(ComprehensionClause {
                target,
                iterable,
                conditions,
            });
        }
        Ok(Expr::Comprehension(Box::new(ComprehensionExpr {
            kind,
            element,
            value,
            clauses,
            span: start.union(self.prev_span()),
        })))
    }

    fn parse_name_list(&mut self, what: &str) -> HowlResult<Vec<SmolStr>> {
        let mut names = vec![self.expect_identifier(what)?];
        while self.eat_symbol(Symbol::Comma) {
            names.push(self.expect_identifier(what)?);
        }
        Ok(names)
    }

    fn parse_dotted_path(&mut self) -> HowlResult<Vec<SmolStr>> {
        let mut parts = vec![self.expect_identifier("module name")?];
        while self.eat_symbol(Symbol::Dot) {
            parts.push(self.expect_identifier("module name")?);
        }
        Ok(parts)
    }

    fn starts_expression(&self) -> bool {
        match &self.current().kind {
            TokenKind::Identifier(_)
            | TokenKind::IntLiteral(_)
            | TokenKind::FloatLiteral(_)
            | TokenKind::BoolLiteral(_)
            | TokenKind::StringLiteral(_)
            | TokenKind::FormatString(_) => true,
            TokenKind::Keyword(keyword) => {
                matches!(keyword, Keyword::Not | Keyword::Lambda | Keyword::None)
            }
            TokenKind::Symbol(symbol) => matches!(
                symbol,
                Symbol::LParen
                    | Symbol::LBracket
                    | Symbol::LBrace
                    | Symbol::Minus
                    | Symbol::Plus
                    | Symbol::Tilde
                    | Symbol::Star
                    | Symbol::Ellipsis
            ),
            _ => false,
        }
    }

    fn at_line_end(&self) -> bool {
        self.peek_token(|t| matches!(t.kind, TokenKind::Newline | TokenKind::Eof))
    }

    fn expect_line_end(&mut self) -> HowlResult<()> {
        if self.peek_token(|t| matches!(t.kind, TokenKind::Newline)) {
            self.advance();
            return Ok(());
        }
        if self.is_eof() {
            return Ok(());
        }
        Err(self.error_here("invalid syntax"))
    }

    fn peek_token<F>(&self, predicate: F) -> bool
    where
        F: FnOnce(&Token) -> bool,
    {
        if self.index >= self.tokens.len() {
            return false;
        }
        predicate(&self.tokens[self.index])
    }

    fn peek_keyword(&self, keyword: Keyword) -> bool {
        self.peek_token(|t| matches!(t.kind, TokenKind::Keyword(k) if k == keyword))
    }

    fn peek_keyword_n(&self, keyword: Keyword, n: usize) -> bool {
        self.tokens
            .get(self.index + n)
            .is_some_and(|t| matches!(t.kind, TokenKind::Keyword(k) if k == keyword))
    }

    fn peek_symbol(&self, symbol: Symbol) -> bool {
        self.peek_token(|t| t.is_symbol(symbol))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> HowlResult<&Token> {
        if self.peek_keyword(keyword) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected `{keyword}`")))
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol, message: &str) -> HowlResult<&Token> {
        if self.peek_symbol(symbol) {
            Ok(self.advance())
        } else {
            Err(self.error_here(message))
        }
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        if self.peek_symbol(symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self, what: &str) -> HowlResult<SmolStr> {
        if let Some(token) = self.tokens.get(self.index) {
            if let TokenKind::Identifier(name) = &token.kind {
                let name = name.clone();
                self.advance();
                return Ok(name);
            }
        }
        Err(self.error_here(format!("expected {what}")))
    }

    fn skip_newlines(&mut self) {
        while self.peek_token(|t| matches!(t.kind, TokenKind::Newline)) {
            self.advance();
        }
    }

    fn is_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.index];
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn prev_span(&self) -> Span {
        if self.index == 0 {
            DUMMY_SPAN
        } else {
            self.tokens[self.index - 1].span
        }
    }

    fn error_here(&self, message: impl Into<String>) -> HowlError {
        self.error_at(self.current().span, message)
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> HowlError {
        HowlError::Diagnostic(Diagnostic::syntax(message, span))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span().union(right.span());
    Expr::Binary(Box::new(BinaryExpr {
        op,
        left,
        right,
        span,
    }))
}

fn augmented_op(symbol: Symbol) -> BinaryOp {
    match symbol {
        Symbol::PlusEquals => BinaryOp::Add,
        Symbol::MinusEquals => BinaryOp::Sub,
        Symbol::StarEquals => BinaryOp::Mul,
        Symbol::DoubleStarEquals => BinaryOp::Pow,
        Symbol::SlashEquals => BinaryOp::Div,
        Symbol::DoubleSlashEquals => BinaryOp::FloorDiv,
        Symbol::PercentEquals => BinaryOp::Mod,
        Symbol::AmpEquals => BinaryOp::BitAnd,
        Symbol::PipeEquals => BinaryOp::BitOr,
        Symbol::CaretEquals => BinaryOp::BitXor,
        Symbol::ShiftLeftEquals => BinaryOp::Shl,
        _ => BinaryOp::Shr,
    }
}

/// The operator an augmented assignment token applies, if it is one.
pub fn augmented_operator(symbol: Symbol) -> Option<BinaryOp> {
    symbol.is_augmented().then(|| augmented_op(symbol))
}

fn count_starred(elements: &[Expr]) -> usize {
    elements
        .iter()
        .filter(|e| matches!(e, Expr::Starred(..)))
        .count()
}

fn push_text(parts: &mut Vec<FormatPart>, text: &str) {
    if let Some(FormatPart::Text(existing)) = parts.last_mut() {
        existing.push_str(text);
    } else {
        parts.push(FormatPart::Text(text.to_string()));
    }
}

pub fn parse(tokens: &[Token]) -> HowlResult<Program> {
    let mut parser = Parser::new(tokens);
    parser.parse()
}

/// Lexes and parses a whole program file.
pub fn parse_program(file: &SourceFile) -> HowlResult<Program> {
    let tokens = lexer::lex(file)?;
    parse(&tokens)
}

/// Parses a single expression written on one line, such as the right-hand
/// side of an annotation macro.
pub fn parse_expression_text(text: &str) -> HowlResult<Expr> {
    let file = SourceFile::fragment(text);
    let tokens = lexer::lex_fragment(&file)?;
    Parser::new(&tokens).parse_standalone_expression()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(text: &str) -> Program {
        parse_program(&SourceFile::fragment(text)).unwrap()
    }

    #[test]
    fn elif_nests_in_else_branch() {
        let program = program("if a:\n    b\nelif c:\n    d\nelse:\n    e\n");
        let Stmt::If(stmt) = &program.body.statements[0] else {
            panic!("expected if");
        };
        let else_branch = stmt.else_branch.as_ref().unwrap();
        let Stmt::If(nested) = &else_branch.statements[0] else {
            panic!("expected nested if");
        };
        assert_eq!(nested.span.line(), 3);
    }

    #[test]
    fn one_line_suites() {
        let program = program("for t in range(3): t\nx = 1\n");
        assert_eq!(program.body.statements.len(), 2);
    }

    #[test]
    fn chained_assignment_and_unpacking() {
        let program = program("a = b = 1\nx, *y = [1, 2, 3]\n");
        let Stmt::Assign(first) = &program.body.statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(first.targets.len(), 2);
        assert!(matches!(program.body.statements[1], Stmt::Assign(_)));
    }

    #[test]
    fn format_strings_split_fields() {
        let expr = parse_expression_text("f'{a!r:>4} and {{b}}'").unwrap();
        let Expr::FormatString(parts, _) = expr else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], FormatPart::Text(t) if t == " and {b}"));
    }

    #[test]
    fn syntax_errors_carry_lines() {
        let err = parse_program(&SourceFile::fragment("x = 1\ny = (\n")).unwrap_err();
        assert!(err.as_syntax_error().is_some());
    }

    #[test]
    fn comparisons_chain() {
        let expr = parse_expression_text("1 < x <= 3 not in y").unwrap();
        let Expr::Compare(compare) = expr else {
            panic!("expected comparison");
        };
        assert_eq!(compare.comparisons.len(), 3);
    }
}
