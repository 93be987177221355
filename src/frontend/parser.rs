use super::ast::*;
use super::diagnostic::Diagnostics;
use super::lexer::{AtKeyword, Keyword, Symbol, Token, TokenKind};
use super::symbols::{method_family, method_symbols, normalize_selector, property_symbols, sorted_member_symbols};
use std::collections::BTreeSet;

/// Combined statement, unary and operand nesting the parser accepts before giving up on a construct.
pub const MAX_NESTING_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug)]
pub struct ParseOptions {
    /// Argument-slot budget of the runtime dispatch function; padding is computed against it.
    pub runtime_dispatch_arg_slots: usize,
}

pub struct ParseOutput {
    pub program: Program,
    pub diags: Diagnostics,
    pub next_expr_id: ExprId,
}

pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    eof: Token,
    pub diags: Diagnostics,
    next_expr_id: ExprId,
    options: ParseOptions,
    depth: usize,
    depth_reported: bool,
}

pub fn parse(tokens: Vec<Token>, options: ParseOptions) -> ParseOutput {
    let mut parser = Parser::new(tokens, options);
    let program = parser.parse_program();
    ParseOutput {
        program,
        next_expr_id: parser.next_expr_id,
        diags: parser.diags,
    }
}

impl Parser {
    pub fn new(tokens: Vec<Token>, options: ParseOptions) -> Self {
        let eof_span = tokens.last().map(|t| t.span.clone()).unwrap_or_else(|| Span::at(1, 1));
        Self {
            tokens,
            idx: 0,
            eof: Token {
                kind: TokenKind::Eof,
                span: eof_span,
            },
            diags: Diagnostics::default(),
            next_expr_id: 0,
            options,
            depth: 0,
            depth_reported: false,
        }
    }

    /// Reports the limit once per parse; the caller unwinds and recovery resynchronizes.
    fn enter_nesting(&mut self, code: &'static str) -> bool {
        if self.depth >= MAX_NESTING_DEPTH {
            if !self.depth_reported {
                self.depth_reported = true;
                let msg = format!("nesting depth exceeds limit of {}", MAX_NESTING_DEPTH);
                self.error_here(code, &msg);
            }
            return false;
        }
        self.depth += 1;
        true
    }

    fn new_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        Expr { id, kind, span }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while !self.at_eof() {
            let ok = match self.peek().kind.clone() {
                TokenKind::Symbol(Symbol::Semi) => {
                    self.bump();
                    true
                }
                TokenKind::Keyword(Keyword::Module) => self
                    .parse_module()
                    .map(|m| program.modules.push(m))
                    .is_some(),
                TokenKind::Keyword(Keyword::Let) => self
                    .parse_global()
                    .map(|g| program.globals.push(g))
                    .is_some(),
                TokenKind::Keyword(
                    Keyword::Pure | Keyword::Extern | Keyword::Async | Keyword::Fn,
                ) => self
                    .parse_function()
                    .map(|f| program.functions.push(f))
                    .is_some(),
                TokenKind::At(AtKeyword::Interface) => self
                    .parse_interface()
                    .map(|i| program.interfaces.push(i))
                    .is_some(),
                TokenKind::At(AtKeyword::Implementation) => self
                    .parse_implementation()
                    .map(|i| program.implementations.push(i))
                    .is_some(),
                TokenKind::At(AtKeyword::Protocol) => self
                    .parse_protocol()
                    .map(|p| program.protocols.push(p))
                    .is_some(),
                _ => {
                    self.error_here("O3P100", "expected top-level declaration");
                    self.bump();
                    false
                }
            };
            if !ok {
                self.sync_top_level();
            }
        }
        if let Some(first) = program.modules.first() {
            program.module_name = first.name.clone();
        }
        program
    }

    fn sync_top_level(&mut self) {
        while !self.at_eof() {
            if self.at_symbol(Symbol::Semi) {
                self.bump();
                return;
            }
            if self.at_top_level_start() {
                return;
            }
            self.bump();
        }
    }

    fn at_top_level_start(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Keyword(
                Keyword::Module | Keyword::Let | Keyword::Fn | Keyword::Pure | Keyword::Extern | Keyword::Async
            ) | TokenKind::At(AtKeyword::Interface | AtKeyword::Implementation | AtKeyword::Protocol)
        )
    }

    fn parse_module(&mut self) -> Option<ModuleDecl> {
        let span = self.bump().span;
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid module identifier");
                return None;
            }
        };
        if !self.eat_symbol(Symbol::Semi) {
            self.error_here("O3P104", "missing ';' after module declaration");
            return None;
        }
        Some(ModuleDecl { name, span })
    }

    fn parse_global(&mut self) -> Option<GlobalDecl> {
        let span = self.bump().span;
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid declaration identifier");
                return None;
            }
        };
        if !self.eat_symbol(Symbol::Eq) {
            self.error_here("O3P102", "missing '=' in declaration");
            return None;
        }
        let value = self.parse_expr()?;
        if !self.eat_symbol(Symbol::Semi) {
            self.error_here("O3P104", "missing ';' after declaration");
            return None;
        }
        Some(GlobalDecl { name, value, span })
    }

    fn parse_function(&mut self) -> Option<FunctionDecl> {
        let span = self.peek_span();
        let (mut is_pure, mut is_extern, mut is_async) = (false, false, false);
        loop {
            let (flag, label) = match self.peek().kind {
                TokenKind::Keyword(Keyword::Pure) => (&mut is_pure, "pure"),
                TokenKind::Keyword(Keyword::Extern) => (&mut is_extern, "extern"),
                TokenKind::Keyword(Keyword::Async) => (&mut is_async, "async"),
                _ => break,
            };
            if *flag {
                let msg = format!("duplicate '{}' qualifier in function declaration", label);
                self.error_here("O3P100", &msg);
                return None;
            }
            *flag = true;
            self.bump();
        }
        if !self.eat_keyword(Keyword::Fn) {
            self.error_here("O3P100", "expected 'fn' after function qualifiers");
            return None;
        }
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid function identifier");
                return None;
            }
        };
        if !self.eat_symbol(Symbol::LParen) {
            self.error_here("O3P106", "missing '(' after function name");
            return None;
        }
        let params = self.parse_params(Symbol::RParen)?;
        if !self.eat_symbol(Symbol::RParen) {
            self.error_here("O3P109", "missing ')' after parameters");
            return None;
        }
        let is_throws = self.eat_keyword(Keyword::Throws);
        let return_type = if self.eat_symbol(Symbol::Arrow) {
            self.parse_type(true)?
        } else {
            TypeAnnotation::implicit_i32(self.peek_span())
        };
        let body = if self.eat_symbol(Symbol::Semi) {
            None
        } else if is_extern {
            self.error_here("O3P104", "missing ';' after extern function declaration");
            return None;
        } else {
            Some(self.parse_block()?)
        };
        Some(FunctionDecl {
            name,
            params,
            return_type,
            is_pure,
            is_extern,
            is_async,
            is_throws,
            body,
            span,
        })
    }

    fn parse_params(&mut self, close: Symbol) -> Option<Vec<Param>> {
        let mut params = Vec::new();
        if self.at_symbol(close) {
            return Some(params);
        }
        loop {
            let span = self.peek_span();
            let name = match self.take_ident() {
                Some(name) => name,
                None => {
                    self.error_here("O3P108", "invalid parameter identifier");
                    return None;
                }
            };
            if !self.eat_symbol(Symbol::Colon) {
                self.error_here("O3P108", "missing ':' after parameter name");
                return None;
            }
            let ty = self.parse_type(false)?;
            params.push(Param { name, ty, span });
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        Some(params)
    }

    fn parse_type(&mut self, allow_void: bool) -> Option<TypeAnnotation> {
        let span = self.peek_span();
        let ownership = match &self.peek().kind {
            TokenKind::Ident(name) if name.starts_with("__") => {
                let q = OwnershipQualifier {
                    spelling: name.clone(),
                    kind: OwnershipKind::from_spelling(name),
                    span: self.peek_span(),
                };
                self.bump();
                Some(q)
            }
            _ => None,
        };
        let base = match self.peek().kind.clone() {
            TokenKind::Keyword(kw) if kw.is_type() => {
                self.bump();
                keyword_type_base(kw)
            }
            TokenKind::Ident(name) => {
                self.bump();
                TypeBase::Named(name)
            }
            _ => {
                self.error_here("O3P108", "invalid type annotation");
                return None;
            }
        };
        if base == TypeBase::Void && !allow_void {
            self.diags
                .push("O3P108", "type 'void' is only valid as a return annotation", span.clone());
            return None;
        }
        let generic = if self.at_symbol(Symbol::Lt) {
            Some(self.parse_generic_suffix())
        } else {
            None
        };
        let mut pointer_depth = 0;
        while self.eat_symbol(Symbol::Star) {
            pointer_depth += 1;
        }
        let mut nullability = Vec::new();
        loop {
            let kind = match self.peek().kind {
                TokenKind::Symbol(Symbol::Question) => Nullability::Nullable,
                TokenKind::Symbol(Symbol::Bang) => Nullability::Nonnull,
                _ => break,
            };
            nullability.push((kind, self.bump().span));
        }
        if base == TypeBase::Void && (generic.is_some() || pointer_depth > 0 || !nullability.is_empty()) {
            self.diags
                .push("O3P114", "type suffix is not allowed on 'void' return annotation", span.clone());
            return None;
        }
        if matches!(base, TypeBase::Named(_)) && pointer_depth == 0 {
            self.diags.push(
                "O3P108",
                format!("unknown type '{}'; object types need a pointer declarator", base.spelling()),
                span.clone(),
            );
            return None;
        }
        let mut ty = TypeAnnotation {
            base,
            implicit: false,
            generic,
            pointer_depth,
            nullability,
            ownership,
            shape: TypeShape::default(),
            span,
        };
        ty.shape = ty.classify();
        Some(ty)
    }

    /// Collects raw `<...>` text; an unterminated suffix is recorded, not diagnosed.
    fn parse_generic_suffix(&mut self) -> GenericSuffix {
        let span = self.bump().span;
        let mut depth = 1usize;
        let mut text = String::new();
        loop {
            match &self.peek().kind {
                TokenKind::Eof
                | TokenKind::Symbol(Symbol::Semi | Symbol::LBrace | Symbol::RBrace | Symbol::RParen) => {
                    return GenericSuffix {
                        text,
                        terminated: false,
                        span,
                    };
                }
                TokenKind::Symbol(Symbol::Gt) => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return GenericSuffix {
                            text,
                            terminated: true,
                            span,
                        };
                    }
                    text.push('>');
                }
                TokenKind::Symbol(Symbol::Shr) => {
                    self.bump();
                    if depth <= 2 {
                        if depth == 2 {
                            text.push('>');
                        }
                        return GenericSuffix {
                            text,
                            terminated: true,
                            span,
                        };
                    }
                    depth -= 2;
                    text.push_str(">>");
                }
                TokenKind::Symbol(Symbol::Lt) => {
                    depth += 1;
                    self.bump();
                    text.push('<');
                }
                kind => {
                    text.push_str(&token_text(kind));
                    self.bump();
                }
            }
        }
    }

    fn parse_interface(&mut self) -> Option<InterfaceDecl> {
        let span = self.bump().span;
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid @interface identifier");
                return None;
            }
        };
        let super_name = if self.eat_symbol(Symbol::Colon) {
            let sspan = self.peek_span();
            match self.take_ident() {
                Some(s) => Some(NamedRef { name: s, span: sspan }),
                None => {
                    self.error_here("O3P101", "invalid superclass identifier");
                    return None;
                }
            }
        } else {
            None
        };
        let category = self.parse_category_suffix()?;
        let protocols = self.parse_protocol_list()?;
        let mut properties = Vec::new();
        let mut methods = Vec::new();
        self.parse_container_members(&name, "@interface", &mut properties, &mut methods)?;
        let member_symbols = sorted_member_symbols(
            methods
                .iter()
                .map(|m: &MethodDecl| m.symbols.lookup_symbol.clone())
                .chain(properties.iter().map(|p: &PropertyDecl| p.symbols.synthesis_symbol.clone())),
        );
        Some(InterfaceDecl {
            name,
            super_name,
            category,
            protocols,
            properties,
            methods,
            member_symbols,
            span,
        })
    }

    fn parse_protocol(&mut self) -> Option<ProtocolDecl> {
        let span = self.bump().span;
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid @protocol identifier");
                return None;
            }
        };
        let inherited = self.parse_protocol_list()?;
        let mut properties = Vec::new();
        let mut methods = Vec::new();
        self.parse_container_members(&name, "@protocol", &mut properties, &mut methods)?;
        let member_symbols = sorted_member_symbols(
            methods
                .iter()
                .map(|m: &MethodDecl| m.symbols.lookup_symbol.clone())
                .chain(properties.iter().map(|p: &PropertyDecl| p.symbols.synthesis_symbol.clone())),
        );
        Some(ProtocolDecl {
            name,
            inherited,
            properties,
            methods,
            member_symbols,
            span,
        })
    }

    fn parse_category_suffix(&mut self) -> Option<Option<String>> {
        if !self.eat_symbol(Symbol::LParen) {
            return Some(None);
        }
        let category = match self.take_ident() {
            Some(c) => c,
            None => {
                self.error_here("O3P101", "invalid category identifier");
                return None;
            }
        };
        if !self.eat_symbol(Symbol::RParen) {
            self.error_here("O3P109", "missing ')' after category name");
            return None;
        }
        Some(Some(category))
    }

    fn parse_protocol_list(&mut self) -> Option<Vec<NamedRef>> {
        let mut out = Vec::new();
        if !self.eat_symbol(Symbol::Lt) {
            return Some(out);
        }
        loop {
            let span = self.peek_span();
            match self.take_ident() {
                Some(name) => out.push(NamedRef { name, span }),
                None => {
                    self.error_here("O3P101", "invalid protocol identifier");
                    return None;
                }
            }
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        if !self.eat_symbol(Symbol::Gt) {
            self.error_here("O3P114", "missing '>' after protocol list");
            return None;
        }
        Some(out)
    }

    fn parse_container_members(
        &mut self,
        owner: &str,
        container: &str,
        properties: &mut Vec<PropertyDecl>,
        methods: &mut Vec<MethodDecl>,
    ) -> Option<()> {
        loop {
            match self.peek().kind {
                TokenKind::At(AtKeyword::End) => {
                    self.bump();
                    return Some(());
                }
                TokenKind::Eof => {
                    self.error_here(
                        "O3P115",
                        &format!("missing '@end' for {} '{}'", container, owner),
                    );
                    return None;
                }
                TokenKind::Symbol(Symbol::Semi) => {
                    self.bump();
                }
                TokenKind::At(AtKeyword::Property) => match self.parse_property(owner) {
                    Some(p) => properties.push(p),
                    None => self.sync_member(),
                },
                TokenKind::Symbol(Symbol::Minus | Symbol::Plus) => match self.parse_method(owner) {
                    Some(m) => methods.push(m),
                    None => self.sync_member(),
                },
                _ => {
                    self.error_here(
                        "O3P115",
                        &format!("unexpected token in {} body for '{}'", container, owner),
                    );
                    self.bump();
                    self.sync_member();
                }
            }
        }
    }

    fn sync_member(&mut self) {
        while !self.at_eof() {
            match self.peek().kind {
                TokenKind::Symbol(Symbol::Semi) => {
                    self.bump();
                    return;
                }
                TokenKind::At(
                    AtKeyword::End | AtKeyword::Property | AtKeyword::Synthesize | AtKeyword::Dynamic,
                )
                | TokenKind::Symbol(Symbol::Minus | Symbol::Plus) => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_property(&mut self, owner: &str) -> Option<PropertyDecl> {
        let span = self.bump().span;
        let mut attributes = Vec::new();
        if self.eat_symbol(Symbol::LParen) {
            if !self.at_symbol(Symbol::RParen) {
                loop {
                    let aspan = self.peek_span();
                    let name = match self.take_ident() {
                        Some(name) => name,
                        None => {
                            self.error_here("O3P115", "invalid @property attribute");
                            return None;
                        }
                    };
                    let value = if self.eat_symbol(Symbol::Eq) {
                        Some(self.parse_attribute_value()?)
                    } else {
                        None
                    };
                    attributes.push(PropertyAttribute {
                        name,
                        value,
                        span: aspan,
                    });
                    if !self.eat_symbol(Symbol::Comma) {
                        break;
                    }
                }
            }
            if !self.eat_symbol(Symbol::RParen) {
                self.error_here("O3P109", "missing ')' after @property attributes");
                return None;
            }
        }
        let ty = self.parse_type(false)?;
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid property identifier");
                return None;
            }
        };
        if !self.eat_symbol(Symbol::Semi) {
            self.error_here("O3P104", "missing ';' after @property declaration");
            return None;
        }
        let symbols = property_symbols(owner, &name, &attributes);
        Some(PropertyDecl {
            name,
            ty,
            attributes,
            symbols,
            span,
        })
    }

    fn parse_attribute_value(&mut self) -> Option<String> {
        let mut value = String::new();
        if let Some(head) = self.take_ident() {
            value.push_str(&head);
        }
        loop {
            if self.eat_symbol(Symbol::Colon) {
                value.push(':');
                continue;
            }
            if matches!(self.peek().kind, TokenKind::Ident(_)) && self.peek_next_is(Symbol::Colon) {
                if let Some(piece) = self.take_ident() {
                    value.push_str(&piece);
                }
                continue;
            }
            break;
        }
        if value.is_empty() {
            self.error_here("O3P115", "missing @property attribute value");
            return None;
        }
        Some(value)
    }

    fn parse_method(&mut self, owner: &str) -> Option<MethodDecl> {
        let start = self.bump();
        let kind = if matches!(start.kind, TokenKind::Symbol(Symbol::Plus)) {
            MethodKind::Class
        } else {
            MethodKind::Instance
        };
        if !self.eat_symbol(Symbol::LParen) {
            self.error_here("O3P106", "missing '(' before method return type");
            return None;
        }
        let return_type = self.parse_type(true)?;
        if !self.eat_symbol(Symbol::RParen) {
            self.error_here("O3P109", "missing ')' after method return type");
            return None;
        }
        let mut pieces = Vec::new();
        let first_span = self.peek_span();
        let first = self.take_ident();
        if first.is_some() && !self.at_symbol(Symbol::Colon) {
            pieces.push(SelectorPiece {
                keyword: first.unwrap_or_default(),
                param: None,
                span: first_span,
            });
        } else {
            if first.is_none() && !self.at_symbol(Symbol::Colon) {
                self.error_here("O3P115", "expected selector in method declaration");
                return None;
            }
            let mut keyword = first.unwrap_or_default();
            let mut piece_span = first_span;
            loop {
                if !self.eat_symbol(Symbol::Colon) {
                    self.error_here("O3P115", "missing ':' in keyword selector piece");
                    return None;
                }
                if !self.eat_symbol(Symbol::LParen) {
                    self.error_here("O3P106", "missing '(' before selector parameter type");
                    return None;
                }
                let ty = self.parse_type(false)?;
                if !self.eat_symbol(Symbol::RParen) {
                    self.error_here("O3P109", "missing ')' after selector parameter type");
                    return None;
                }
                let pspan = self.peek_span();
                let pname = match self.take_ident() {
                    Some(n) => n,
                    None => {
                        self.error_here("O3P108", "invalid selector parameter identifier");
                        return None;
                    }
                };
                pieces.push(SelectorPiece {
                    keyword: std::mem::take(&mut keyword),
                    param: Some(Param {
                        name: pname,
                        ty,
                        span: pspan,
                    }),
                    span: piece_span.clone(),
                });
                piece_span = self.peek_span();
                if self.at_symbol(Symbol::Colon) {
                    continue;
                }
                if matches!(self.peek().kind, TokenKind::Ident(_)) && self.peek_next_is(Symbol::Colon) {
                    keyword = self.take_ident().unwrap_or_default();
                    continue;
                }
                break;
            }
        }
        let keyword_form = pieces.iter().any(|p| p.param.is_some());
        let selector = normalize_selector(pieces.iter().map(|p| p.keyword.as_str()), keyword_form);
        let body = if self.eat_symbol(Symbol::Semi) {
            None
        } else if self.at_symbol(Symbol::LBrace) {
            Some(self.parse_block()?)
        } else {
            self.error_here("O3P104", "missing ';' after method declaration");
            return None;
        };
        let symbols = method_symbols(
            owner,
            kind,
            &selector,
            &return_type,
            pieces.iter().filter_map(|p| p.param.as_ref().map(|param| &param.ty)),
        );
        Some(MethodDecl {
            kind,
            return_type,
            pieces,
            body,
            symbols,
            span: start.span,
        })
    }

    fn parse_implementation(&mut self) -> Option<ImplementationDecl> {
        let span = self.bump().span;
        let name = match self.take_ident() {
            Some(name) => name,
            None => {
                self.error_here("O3P101", "invalid @implementation identifier");
                return None;
            }
        };
        let category = self.parse_category_suffix()?;
        let mut methods = Vec::new();
        let mut synthesizes = Vec::new();
        let mut dynamics = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::At(AtKeyword::End) => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    self.error_here(
                        "O3P115",
                        &format!("missing '@end' for @implementation '{}'", name),
                    );
                    return None;
                }
                TokenKind::Symbol(Symbol::Semi) => {
                    self.bump();
                }
                TokenKind::Symbol(Symbol::Minus | Symbol::Plus) => match self.parse_method(&name) {
                    Some(m) => methods.push(m),
                    None => self.sync_member(),
                },
                TokenKind::At(AtKeyword::Synthesize) => {
                    if self.parse_synthesize(&mut synthesizes).is_none() {
                        self.sync_member();
                    }
                }
                TokenKind::At(AtKeyword::Dynamic) => {
                    if self.parse_dynamic(&mut dynamics).is_none() {
                        self.sync_member();
                    }
                }
                _ => {
                    self.error_here(
                        "O3P115",
                        &format!("unexpected token in @implementation body for '{}'", name),
                    );
                    self.bump();
                    self.sync_member();
                }
            }
        }
        let member_symbols = sorted_member_symbols(methods.iter().map(|m| m.symbols.lookup_symbol.clone()));
        Some(ImplementationDecl {
            name,
            category,
            methods,
            synthesizes,
            dynamics,
            member_symbols,
            span,
        })
    }

    fn parse_synthesize(&mut self, out: &mut Vec<SynthesizeEntry>) -> Option<()> {
        self.bump();
        loop {
            let span = self.peek_span();
            let property = match self.take_ident() {
                Some(p) => p,
                None => {
                    self.error_here("O3P101", "invalid @synthesize property identifier");
                    return None;
                }
            };
            let ivar = if self.eat_symbol(Symbol::Eq) {
                match self.take_ident() {
                    Some(i) => Some(i),
                    None => {
                        self.error_here("O3P101", "invalid @synthesize ivar identifier");
                        return None;
                    }
                }
            } else {
                None
            };
            out.push(SynthesizeEntry { property, ivar, span });
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        if !self.eat_symbol(Symbol::Semi) {
            self.error_here("O3P104", "missing ';' after @synthesize");
            return None;
        }
        Some(())
    }

    fn parse_dynamic(&mut self, out: &mut Vec<NamedRef>) -> Option<()> {
        self.bump();
        loop {
            let span = self.peek_span();
            match self.take_ident() {
                Some(name) => out.push(NamedRef { name, span }),
                None => {
                    self.error_here("O3P101", "invalid @dynamic property identifier");
                    return None;
                }
            }
            if !self.eat_symbol(Symbol::Comma) {
                break;
            }
        }
        if !self.eat_symbol(Symbol::Semi) {
            self.error_here("O3P104", "missing ';' after @dynamic");
            return None;
        }
        Some(())
    }

    fn parse_block(&mut self) -> Option<Block> {
        let span = self.peek_span();
        if !self.eat_symbol(Symbol::LBrace) {
            self.error_here("O3P110", "missing '{' to start block");
            return None;
        }
        let mut stmts = Vec::new();
        loop {
            if self.eat_symbol(Symbol::RBrace) {
                break;
            }
            if self.at_eof() {
                self.error_here("O3P111", "missing '}' to end block");
                return None;
            }
            let start = self.idx;
            match self.parse_stmt() {
                Some(stmt) => stmts.push(stmt),
                None => self.recover_stmt(start),
            }
        }
        Some(Block { stmts, span })
    }

    /// Resynchronizes after a failed statement, always consuming at least one token.
    fn recover_stmt(&mut self, start: usize) {
        self.sync_stmt();
        if self.idx == start && !self.at_eof() {
            self.bump();
        }
    }

    fn sync_stmt(&mut self) {
        while !self.at_eof() {
            match self.peek().kind {
                TokenKind::Symbol(Symbol::Semi) => {
                    self.bump();
                    return;
                }
                TokenKind::Symbol(Symbol::RBrace)
                | TokenKind::Keyword(
                    Keyword::Let
                    | Keyword::Return
                    | Keyword::If
                    | Keyword::While
                    | Keyword::Do
                    | Keyword::For
                    | Keyword::Switch
                    | Keyword::Break
                    | Keyword::Continue
                    | Keyword::Case
                    | Keyword::Default,
                ) => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Single statement or braced block as a loop/branch body.
    fn parse_body(&mut self) -> Option<Block> {
        if self.at_symbol(Symbol::LBrace) {
            return self.parse_block();
        }
        let span = self.peek_span();
        let stmt = self.parse_stmt()?;
        Some(Block {
            stmts: vec![stmt],
            span,
        })
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        if !self.enter_nesting("O3P100") {
            return None;
        }
        let stmt = self.parse_stmt_inner();
        self.depth -= 1;
        stmt
    }

    fn parse_stmt_inner(&mut self) -> Option<Stmt> {
        let span = self.peek_span();
        match self.peek().kind.clone() {
            TokenKind::Keyword(Keyword::Let) => {
                self.bump();
                let name = match self.take_ident() {
                    Some(n) => n,
                    None => {
                        self.error_here("O3P101", "invalid let identifier");
                        return None;
                    }
                };
                if !self.eat_symbol(Symbol::Eq) {
                    self.error_here("O3P102", "missing '=' in let declaration");
                    return None;
                }
                let value = self.parse_expr()?;
                self.expect_semi("let declaration")?;
                Some(Stmt::Let { name, value, span })
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.bump();
                let value = if self.at_symbol(Symbol::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_semi("return statement")?;
                Some(Stmt::Return { value, span })
            }
            TokenKind::Keyword(Keyword::If) => {
                self.bump();
                let cond = self.parse_paren_condition("if")?;
                let then_body = self.parse_body()?;
                let else_body = if self.eat_keyword(Keyword::Else) {
                    Some(self.parse_body()?)
                } else {
                    None
                };
                Some(Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    span,
                })
            }
            TokenKind::Keyword(Keyword::While) => {
                self.bump();
                let cond = self.parse_paren_condition("while")?;
                let body = self.parse_body()?;
                Some(Stmt::While { cond, body, span })
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.bump();
                let body = self.parse_body()?;
                if !self.eat_keyword(Keyword::While) {
                    self.error_here("O3P100", "missing 'while' after do-while body");
                    return None;
                }
                let cond = self.parse_paren_condition("while")?;
                self.expect_semi("do-while statement")?;
                Some(Stmt::DoWhile { body, cond, span })
            }
            TokenKind::Keyword(Keyword::For) => self.parse_for(span),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(span),
            TokenKind::Keyword(Keyword::Break) => {
                self.bump();
                self.expect_semi("break")?;
                Some(Stmt::Break { span })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.bump();
                self.expect_semi("continue")?;
                Some(Stmt::Continue { span })
            }
            TokenKind::Symbol(Symbol::Semi) => {
                self.bump();
                Some(Stmt::Empty { span })
            }
            TokenKind::Symbol(Symbol::LBrace) => Some(Stmt::Block(self.parse_block()?)),
            TokenKind::At(AtKeyword::AutoreleasePool) => {
                self.bump();
                let body = self.parse_block()?;
                Some(Stmt::AutoreleasePool { body, span })
            }
            TokenKind::Keyword(kw @ (Keyword::Case | Keyword::Default)) => {
                let label = if kw == Keyword::Case { "case" } else { "default" };
                self.error_here("O3P100", &format!("'{}' label outside switch", label));
                self.bump();
                None
            }
            _ => {
                if let Some(assign) = self.try_parse_assignment()? {
                    self.expect_semi("assignment")?;
                    return Some(Stmt::Assign(assign));
                }
                let expr = self.parse_expr()?;
                self.expect_semi("expression statement")?;
                Some(Stmt::Expr { expr, span })
            }
        }
    }

    fn parse_paren_condition(&mut self, keyword: &str) -> Option<Expr> {
        if !self.eat_symbol(Symbol::LParen) {
            self.error_here("O3P106", &format!("missing '(' after '{}'", keyword));
            return None;
        }
        let cond = self.parse_expr()?;
        if !self.eat_symbol(Symbol::RParen) {
            self.error_here("O3P109", &format!("missing ')' after '{}' condition", keyword));
            return None;
        }
        Some(cond)
    }

    /// `Some(None)` when the statement is not an assignment form.
    fn try_parse_assignment(&mut self) -> Option<Option<Assignment>> {
        let span = self.peek_span();
        if let TokenKind::Symbol(sym @ (Symbol::PlusPlus | Symbol::MinusMinus)) = self.peek().kind {
            self.bump();
            let name = match self.take_ident() {
                Some(n) => n,
                None => {
                    self.error_here("O3P101", "invalid update target identifier");
                    return None;
                }
            };
            let op = if sym == Symbol::PlusPlus {
                AssignOp::Increment
            } else {
                AssignOp::Decrement
            };
            return Some(Some(Assignment {
                name,
                op,
                value: None,
                span,
            }));
        }
        let name = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => return Some(None),
        };
        let next = match self.tokens.get(self.idx + 1).map(|t| &t.kind) {
            Some(TokenKind::Symbol(sym)) => *sym,
            _ => return Some(None),
        };
        let op = match next {
            Symbol::Eq => AssignOp::Set,
            Symbol::PlusPlus => AssignOp::Increment,
            Symbol::MinusMinus => AssignOp::Decrement,
            other => match compound_op(other) {
                Some(op) => AssignOp::Compound(op),
                None => return Some(None),
            },
        };
        self.bump();
        self.bump();
        let value = match op {
            AssignOp::Increment | AssignOp::Decrement => None,
            _ => Some(self.parse_expr()?),
        };
        Some(Some(Assignment {
            name,
            op,
            value,
            span,
        }))
    }

    fn parse_for(&mut self, span: Span) -> Option<Stmt> {
        self.bump();
        if !self.eat_symbol(Symbol::LParen) {
            self.error_here("O3P106", "missing '(' after 'for'");
            return None;
        }
        let init = self.parse_for_clause()?;
        self.expect_semi("for initializer")?;
        let cond = if self.at_symbol(Symbol::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_semi("for condition")?;
        let step = if self.at_symbol(Symbol::RParen) {
            ForClause::None
        } else {
            self.parse_for_clause()?
        };
        if !self.eat_symbol(Symbol::RParen) {
            self.error_here("O3P109", "missing ')' after for clauses");
            return None;
        }
        let body = self.parse_body()?;
        Some(Stmt::For {
            init,
            cond,
            step,
            body,
            span,
        })
    }

    fn parse_for_clause(&mut self) -> Option<ForClause> {
        if self.at_symbol(Symbol::Semi) {
            return Some(ForClause::None);
        }
        if self.at_keyword(Keyword::Let) {
            let span = self.bump().span;
            let name = match self.take_ident() {
                Some(n) => n,
                None => {
                    self.error_here("O3P101", "invalid let identifier");
                    return None;
                }
            };
            if !self.eat_symbol(Symbol::Eq) {
                self.error_here("O3P102", "missing '=' in let declaration");
                return None;
            }
            let value = self.parse_expr()?;
            return Some(ForClause::Let { name, value, span });
        }
        if let Some(assign) = self.try_parse_assignment()? {
            return Some(ForClause::Assign(assign));
        }
        Some(ForClause::Expr(self.parse_expr()?))
    }

    fn parse_switch(&mut self, span: Span) -> Option<Stmt> {
        self.bump();
        let scrutinee = self.parse_paren_condition("switch")?;
        if !self.eat_symbol(Symbol::LBrace) {
            self.error_here("O3P110", "missing '{' to start switch body");
            return None;
        }
        let mut cases = Vec::new();
        loop {
            if self.eat_symbol(Symbol::RBrace) {
                break;
            }
            let cspan = self.peek_span();
            let label = if self.eat_keyword(Keyword::Case) {
                let expr = match self.parse_expr() {
                    Some(e) => e,
                    None => {
                        self.error_here("O3P103", "invalid case label expression");
                        return None;
                    }
                };
                Some(expr)
            } else if self.eat_keyword(Keyword::Default) {
                None
            } else {
                self.error_here("O3P111", "missing '}' to end switch body");
                return None;
            };
            if !self.eat_symbol(Symbol::Colon) {
                self.error_here("O3P107", "missing ':' after case label");
                return None;
            }
            let mut body = Vec::new();
            while !self.at_keyword(Keyword::Case)
                && !self.at_keyword(Keyword::Default)
                && !self.at_symbol(Symbol::RBrace)
                && !self.at_eof()
            {
                let start = self.idx;
                match self.parse_stmt() {
                    Some(stmt) => body.push(stmt),
                    None => self.recover_stmt(start),
                }
            }
            cases.push(SwitchCase {
                label,
                body,
                span: cspan,
            });
        }
        Some(Stmt::Switch {
            scrutinee,
            cases,
            span,
        })
    }

    fn expect_semi(&mut self, what: &str) -> Option<()> {
        if self.eat_symbol(Symbol::Semi) {
            Some(())
        } else {
            self.error_here("O3P104", &format!("missing ';' after {}", what));
            None
        }
    }

    pub fn parse_expr(&mut self) -> Option<Expr> {
        if !self.enter_nesting("O3P103") {
            return None;
        }
        let expr = self.parse_conditional_expr();
        self.depth -= 1;
        expr
    }

    fn parse_conditional_expr(&mut self) -> Option<Expr> {
        let cond = self.parse_binary_expr(0)?;
        if !self.at_symbol(Symbol::Question) {
            return Some(cond);
        }
        self.bump();
        let then_expr = self.parse_expr()?;
        if !self.eat_symbol(Symbol::Colon) {
            self.error_here("O3P103", "missing ':' in conditional expression");
            return None;
        }
        let else_expr = self.parse_expr()?;
        let span = cond.span.clone();
        Some(self.new_expr(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        ))
    }

    /// Each folded operator deepens the left operand, so it counts toward the nesting limit.
    fn parse_binary_expr(&mut self, min_prec: u8) -> Option<Expr> {
        let mut left = self.parse_unary_expr()?;
        let mut folded = 0;
        let out = loop {
            let (prec, op) = match self.peek_binary_op() {
                Some(pair) => pair,
                None => break Some(left),
            };
            if prec < min_prec {
                break Some(left);
            }
            if !self.enter_nesting("O3P103") {
                break None;
            }
            folded += 1;
            self.bump();
            let Some(right) = self.parse_binary_expr(prec + 1) else {
                break None;
            };
            let span = left.span.clone();
            left = self.new_expr(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        };
        self.depth -= folded;
        out
    }

    fn peek_binary_op(&self) -> Option<(u8, BinaryOp)> {
        let op = match self.peek().kind {
            TokenKind::Symbol(Symbol::OrOr) => (1, BinaryOp::Or),
            TokenKind::Symbol(Symbol::AndAnd) => (2, BinaryOp::And),
            TokenKind::Symbol(Symbol::Pipe) => (3, BinaryOp::BitOr),
            TokenKind::Symbol(Symbol::Caret) => (4, BinaryOp::BitXor),
            TokenKind::Symbol(Symbol::Amp) => (5, BinaryOp::BitAnd),
            TokenKind::Symbol(Symbol::EqEq) => (6, BinaryOp::Eq),
            TokenKind::Symbol(Symbol::NotEq) => (6, BinaryOp::NotEq),
            TokenKind::Symbol(Symbol::Lt) => (7, BinaryOp::Lt),
            TokenKind::Symbol(Symbol::Lte) => (7, BinaryOp::Lte),
            TokenKind::Symbol(Symbol::Gt) => (7, BinaryOp::Gt),
            TokenKind::Symbol(Symbol::Gte) => (7, BinaryOp::Gte),
            TokenKind::Symbol(Symbol::Shl) => (8, BinaryOp::Shl),
            TokenKind::Symbol(Symbol::Shr) => (8, BinaryOp::Shr),
            TokenKind::Symbol(Symbol::Plus) => (9, BinaryOp::Add),
            TokenKind::Symbol(Symbol::Minus) => (9, BinaryOp::Sub),
            TokenKind::Symbol(Symbol::Star) => (10, BinaryOp::Mul),
            TokenKind::Symbol(Symbol::Slash) => (10, BinaryOp::Div),
            TokenKind::Symbol(Symbol::Percent) => (10, BinaryOp::Rem),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary_expr(&mut self) -> Option<Expr> {
        if !self.enter_nesting("O3P103") {
            return None;
        }
        let expr = self.parse_unary_inner();
        self.depth -= 1;
        expr
    }

    fn parse_unary_inner(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        let op = match self.peek().kind {
            TokenKind::Symbol(Symbol::Bang) => Some(UnaryOp::Not),
            TokenKind::Symbol(Symbol::Minus) => Some(UnaryOp::Neg),
            TokenKind::Symbol(Symbol::Plus) => Some(UnaryOp::Plus),
            TokenKind::Symbol(Symbol::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Keyword(Keyword::Await) => {
                self.bump();
                let operand = self.parse_unary_expr()?;
                return Some(self.new_expr(ExprKind::Await(Box::new(operand)), span));
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.bump();
                let operand = self.parse_unary_expr()?;
                Some(self.new_expr(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(operand),
                    },
                    span,
                ))
            }
            None => self.parse_postfix_expr(),
        }
    }

    fn parse_postfix_expr(&mut self) -> Option<Expr> {
        let expr = self.parse_primary_expr()?;
        if !self.at_symbol(Symbol::LParen) {
            return Some(expr);
        }
        let callee = match &expr.kind {
            ExprKind::Ident(name) => name.clone(),
            _ => {
                self.error_here("O3P112", "call target must be identifier");
                return None;
            }
        };
        self.bump();
        let mut args = Vec::new();
        if !self.at_symbol(Symbol::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        if !self.eat_symbol(Symbol::RParen) {
            self.error_here("O3P109", "missing ')' after call arguments");
            return None;
        }
        Some(self.new_expr(ExprKind::Call { callee, args }, expr.span))
    }

    fn parse_primary_expr(&mut self) -> Option<Expr> {
        let span = self.peek_span();
        match self.peek().kind.clone() {
            TokenKind::Number(text) => {
                self.bump();
                let value = match parse_int_literal(&text) {
                    Some(v) => v,
                    None => {
                        self.diags.push(
                            "O3P103",
                            format!("invalid numeric literal '{}'", text),
                            span.clone(),
                        );
                        0
                    }
                };
                Some(self.new_expr(ExprKind::Number(value), span))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Some(self.new_expr(ExprKind::Bool(true), span))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Some(self.new_expr(ExprKind::Bool(false), span))
            }
            TokenKind::Keyword(Keyword::Nil) => {
                self.bump();
                Some(self.new_expr(ExprKind::Nil, span))
            }
            TokenKind::Ident(name) => {
                self.bump();
                Some(self.new_expr(ExprKind::Ident(name), span))
            }
            TokenKind::Symbol(Symbol::LParen) => {
                self.bump();
                let inner = self.parse_expr()?;
                if !self.eat_symbol(Symbol::RParen) {
                    self.error_here("O3P109", "missing ')' after expression");
                    return None;
                }
                Some(inner)
            }
            TokenKind::Symbol(Symbol::LBracket) => self.parse_message_send(span),
            TokenKind::Symbol(Symbol::Caret) => self.parse_block_literal(span),
            _ => {
                self.error_here("O3P103", "invalid expression");
                None
            }
        }
    }

    fn parse_message_send(&mut self, span: Span) -> Option<Expr> {
        self.bump();
        let receiver = self.parse_expr()?;
        let receiver_kind = match &receiver.kind {
            ExprKind::Nil => ReceiverKind::NilLiteral,
            ExprKind::Ident(name) if name == "super" => ReceiverKind::Super,
            ExprKind::Ident(name) if name == "self" => ReceiverKind::SelfRef,
            ExprKind::Ident(_) => ReceiverKind::Identifier,
            _ => ReceiverKind::Other,
        };
        let mut keywords = Vec::new();
        let mut args = Vec::new();
        let head = self.take_ident();
        let form = if head.is_some() && !self.at_symbol(Symbol::Colon) {
            keywords.push(head.unwrap_or_default());
            SelectorForm::Unary
        } else {
            if head.is_none() && !self.at_symbol(Symbol::Colon) {
                self.error_here("O3P113", "expected selector identifier in message send");
                return None;
            }
            let mut keyword = head.unwrap_or_default();
            loop {
                if !self.eat_symbol(Symbol::Colon) {
                    self.error_here("O3P113", "missing ':' in keyword selector segment");
                    return None;
                }
                args.push(self.parse_expr()?);
                keywords.push(std::mem::take(&mut keyword));
                if self.at_symbol(Symbol::Colon) {
                    continue;
                }
                if matches!(self.peek().kind, TokenKind::Ident(_)) && self.peek_next_is(Symbol::Colon) {
                    keyword = self.take_ident().unwrap_or_default();
                    continue;
                }
                break;
            }
            SelectorForm::Keyword
        };
        if !self.eat_symbol(Symbol::RBracket) {
            self.error_here("O3P113", "missing ']' after message send expression");
            return None;
        }
        let selector = normalize_selector(
            keywords.iter().map(String::as_str),
            form == SelectorForm::Keyword,
        );
        let budget = self.options.runtime_dispatch_arg_slots;
        let argument_values = args.len().min(budget);
        let slots = DispatchSlots {
            receiver: 1,
            selector: 1,
            argument_values,
            argument_padding: budget - argument_values,
            total: 2 + budget,
        };
        let send = MessageSend {
            receiver,
            keywords,
            args,
            form,
            family: method_family(&selector),
            selector,
            receiver_kind,
            slots,
        };
        Some(self.new_expr(ExprKind::MessageSend(Box::new(send)), span))
    }

    fn parse_block_literal(&mut self, span: Span) -> Option<Expr> {
        self.bump();
        let params = if self.eat_symbol(Symbol::LParen) {
            let params = self.parse_params(Symbol::RParen)?;
            if !self.eat_symbol(Symbol::RParen) {
                self.error_here("O3P109", "missing ')' after block parameters");
                return None;
            }
            params
        } else {
            Vec::new()
        };
        let body = self.parse_block()?;
        let mut scan = CaptureScan::default();
        let mut scopes = vec![params.iter().map(|p| p.name.clone()).collect::<BTreeSet<_>>()];
        scan.block(&body, &mut scopes);
        let literal = BlockLiteral {
            body_statement_count: body.stmts.len(),
            captures: scan.captures.into_iter().collect(),
            mutable_captures: scan.mutated.into_iter().collect(),
            params,
            body,
        };
        Some(self.new_expr(ExprKind::BlockLiteral(Box::new(literal)), span))
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.idx).unwrap_or(&self.eof)
    }

    fn peek_next_is(&self, symbol: Symbol) -> bool {
        matches!(
            self.tokens.get(self.idx + 1).map(|t| &t.kind),
            Some(TokenKind::Symbol(sym)) if *sym == symbol
        )
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if !matches!(token.kind, TokenKind::Eof) {
            self.idx += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn at_symbol(&self, symbol: Symbol) -> bool {
        matches!(&self.peek().kind, TokenKind::Symbol(sym) if *sym == symbol)
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(kw) if *kw == keyword)
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        if self.at_symbol(symbol) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn take_ident(&mut self) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Some(name)
            }
            _ => None,
        }
    }

    fn peek_span(&self) -> Span {
        self.peek().span.clone()
    }

    fn error_here(&mut self, code: &'static str, message: &str) {
        let span = self.peek_span();
        self.diags.push(code, message, span);
    }
}

fn keyword_type_base(kw: Keyword) -> TypeBase {
    match kw {
        Keyword::Bool => TypeBase::Bool,
        Keyword::ObjcBool => TypeBase::ObjcBool,
        Keyword::NSInteger => TypeBase::NSInteger,
        Keyword::NSUInteger => TypeBase::NSUInteger,
        Keyword::Void => TypeBase::Void,
        Keyword::Id => TypeBase::Id,
        Keyword::Class => TypeBase::Class,
        Keyword::Sel => TypeBase::Sel,
        Keyword::Protocol => TypeBase::Protocol,
        Keyword::Instancetype => TypeBase::Instancetype,
        _ => TypeBase::I32,
    }
}

fn compound_op(sym: Symbol) -> Option<BinaryOp> {
    let op = match sym {
        Symbol::PlusEq => BinaryOp::Add,
        Symbol::MinusEq => BinaryOp::Sub,
        Symbol::StarEq => BinaryOp::Mul,
        Symbol::SlashEq => BinaryOp::Div,
        Symbol::PercentEq => BinaryOp::Rem,
        Symbol::AmpEq => BinaryOp::BitAnd,
        Symbol::PipeEq => BinaryOp::BitOr,
        Symbol::CaretEq => BinaryOp::BitXor,
        Symbol::ShlEq => BinaryOp::Shl,
        Symbol::ShrEq => BinaryOp::Shr,
        _ => return None,
    };
    Some(op)
}

/// Decimal, `0x`, `0b` and `0o` literals with `_` separators; must fit in i32.
pub fn parse_int_literal(text: &str) -> Option<i32> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, radix) = match cleaned.get(..2) {
        Some("0x" | "0X") => (&cleaned[2..], 16),
        Some("0b" | "0B") => (&cleaned[2..], 2),
        Some("0o" | "0O") => (&cleaned[2..], 8),
        _ => (cleaned.as_str(), 10),
    };
    if digits.is_empty() {
        return None;
    }
    let value = u64::from_str_radix(digits, radix).ok()?;
    i32::try_from(value).ok()
}

fn token_text(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(s) | TokenKind::Number(s) => s.clone(),
        TokenKind::Keyword(kw) if kw.is_type() => keyword_type_base(*kw).spelling().to_string(),
        TokenKind::Keyword(kw) => format!("{:?}", kw).to_ascii_lowercase(),
        TokenKind::At(_) => "@".to_string(),
        TokenKind::Symbol(sym) => match sym {
            Symbol::Comma => ",".to_string(),
            Symbol::Star => "*".to_string(),
            Symbol::Colon => ":".to_string(),
            Symbol::Question => "?".to_string(),
            Symbol::Bang => "!".to_string(),
            other => format!("{:?}", other),
        },
        TokenKind::Eof => String::new(),
    }
}

/// Free identifiers of a block literal body, scope-aware.
#[derive(Default)]
struct CaptureScan {
    captures: BTreeSet<String>,
    mutated: BTreeSet<String>,
}

impl CaptureScan {
    fn bound(scopes: &[BTreeSet<String>], name: &str) -> bool {
        scopes.iter().any(|s| s.contains(name))
    }

    fn block(&mut self, block: &Block, scopes: &mut Vec<BTreeSet<String>>) {
        scopes.push(BTreeSet::new());
        for stmt in &block.stmts {
            self.stmt(stmt, scopes);
        }
        scopes.pop();
    }

    fn assign(&mut self, a: &Assignment, scopes: &mut Vec<BTreeSet<String>>) {
        if !Self::bound(scopes, &a.name) {
            self.captures.insert(a.name.clone());
            self.mutated.insert(a.name.clone());
        }
        if let Some(v) = &a.value {
            self.expr(v, scopes);
        }
    }

    fn declare(scopes: &mut [BTreeSet<String>], name: &str) {
        if let Some(top) = scopes.last_mut() {
            top.insert(name.to_string());
        }
    }

    fn stmt(&mut self, stmt: &Stmt, scopes: &mut Vec<BTreeSet<String>>) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.expr(value, scopes);
                Self::declare(scopes, name);
            }
            Stmt::Assign(a) => self.assign(a, scopes),
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    self.expr(v, scopes);
                }
            }
            Stmt::Expr { expr, .. } => self.expr(expr, scopes),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                self.expr(cond, scopes);
                self.block(then_body, scopes);
                if let Some(b) = else_body {
                    self.block(b, scopes);
                }
            }
            Stmt::While { cond, body, .. } | Stmt::DoWhile { body, cond, .. } => {
                self.expr(cond, scopes);
                self.block(body, scopes);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                scopes.push(BTreeSet::new());
                self.clause(init, scopes);
                if let Some(c) = cond {
                    self.expr(c, scopes);
                }
                self.clause(step, scopes);
                self.block(body, scopes);
                scopes.pop();
            }
            Stmt::Switch {
                scrutinee, cases, ..
            } => {
                self.expr(scrutinee, scopes);
                for case in cases {
                    if let Some(label) = &case.label {
                        self.expr(label, scopes);
                    }
                    scopes.push(BTreeSet::new());
                    for s in &case.body {
                        self.stmt(s, scopes);
                    }
                    scopes.pop();
                }
            }
            Stmt::Block(b) | Stmt::AutoreleasePool { body: b, .. } => self.block(b, scopes),
            Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Empty { .. } => {}
        }
    }

    fn clause(&mut self, clause: &ForClause, scopes: &mut Vec<BTreeSet<String>>) {
        match clause {
            ForClause::None => {}
            ForClause::Let { name, value, .. } => {
                self.expr(value, scopes);
                Self::declare(scopes, name);
            }
            ForClause::Assign(a) => self.assign(a, scopes),
            ForClause::Expr(e) => self.expr(e, scopes),
        }
    }

    fn expr(&mut self, expr: &Expr, scopes: &mut Vec<BTreeSet<String>>) {
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::Bool(_) | ExprKind::Nil => {}
            ExprKind::Ident(name) => {
                if name != "super" && !Self::bound(scopes, name) {
                    self.captures.insert(name.clone());
                }
            }
            ExprKind::Unary { expr, .. } | ExprKind::Await(expr) => self.expr(expr, scopes),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left, scopes);
                self.expr(right, scopes);
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.expr(cond, scopes);
                self.expr(then_expr, scopes);
                self.expr(else_expr, scopes);
            }
            ExprKind::Call { args, .. } => {
                for a in args {
                    self.expr(a, scopes);
                }
            }
            ExprKind::MessageSend(send) => {
                self.expr(&send.receiver, scopes);
                for a in &send.args {
                    self.expr(a, scopes);
                }
            }
            ExprKind::BlockLiteral(inner) => {
                for name in &inner.captures {
                    if !Self::bound(scopes, name) {
                        self.captures.insert(name.clone());
                    }
                }
                for name in &inner.mutable_captures {
                    if !Self::bound(scopes, name) {
                        self.mutated.insert(name.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ParseOptions, parse, parse_int_literal};
    use crate::frontend::ast::*;
    use crate::frontend::lexer::{LexOptions, tokenize};

    fn parse_src(src: &str) -> (Program, Vec<String>) {
        let lexed = tokenize(
            src,
            LexOptions {
                language_version: 3,
                migration_assist: false,
            },
        );
        assert!(lexed.diags.is_empty(), "lexer diagnostics: {:?}", lexed.diags);
        let out = parse(
            lexed.tokens,
            ParseOptions {
                runtime_dispatch_arg_slots: 4,
            },
        );
        let diags = out.diags.items.iter().map(|d| d.render()).collect();
        (out.program, diags)
    }

    fn first_send(program: &Program) -> MessageSend {
        let body = program.functions[0].body.as_ref().expect("body");
        for stmt in &body.stmts {
            let expr = match stmt {
                Stmt::Return { value: Some(e), .. } | Stmt::Expr { expr: e, .. } => e,
                Stmt::Let { value, .. } => value,
                _ => continue,
            };
            if let ExprKind::MessageSend(send) = &expr.kind {
                return (**send).clone();
            }
        }
        panic!("no message send found");
    }

    #[test]
    fn parses_globals_and_functions() {
        let (program, diags) = parse_src(
            "module demo;\nlet g = 1 + 2 * 3;\npure fn add(a: i32, b: i32) -> i32 { return a + b; }\nextern fn ext(x: i32) -> i32;\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(program.module_name, "demo");
        assert_eq!(program.globals.len(), 1);
        assert!(program.functions[0].is_pure);
        assert!(program.functions[1].is_extern);
        assert!(program.functions[1].is_prototype());
    }

    #[test]
    fn keyword_message_send_derives_selector_and_slots() {
        let (program, diags) = parse_src("fn main() -> i32 { return [obj setX: 1 y: 2]; }");
        assert!(diags.is_empty(), "{:?}", diags);
        let send = first_send(&program);
        assert_eq!(send.selector, "setX:y:");
        assert_eq!(send.form, SelectorForm::Keyword);
        assert_eq!(send.receiver_kind, ReceiverKind::Identifier);
        assert_eq!(send.slots.argument_values, 2);
        assert_eq!(send.slots.argument_padding, 2);
        assert_eq!(send.slots.total, 6);
    }

    #[test]
    fn nil_receiver_is_classified() {
        let (program, _) = parse_src("fn main() -> i32 { return [nil ping]; }");
        let send = first_send(&program);
        assert_eq!(send.receiver_kind, ReceiverKind::NilLiteral);
        assert_eq!(send.form, SelectorForm::Unary);
        assert_eq!(send.selector, "ping");
    }

    #[test]
    fn interface_members_are_sorted_and_symbolized() {
        let src = "@interface Widget : NSObject <Drawable>\n@property (nonatomic, copy) id name;\n- (i32) width;\n+ (instancetype) make:(i32)w height:(i32)h;\n@end\n";
        let (program, diags) = parse_src(src);
        assert!(diags.is_empty(), "{:?}", diags);
        let iface = &program.interfaces[0];
        assert_eq!(iface.super_name.as_ref().map(|s| s.name.as_str()), Some("NSObject"));
        assert_eq!(iface.protocols[0].name, "Drawable");
        assert_eq!(iface.methods[1].symbols.selector, "make:height:");
        assert_eq!(iface.methods[1].symbols.lookup_symbol, "Widget|class|make:height:");
        assert_eq!(
            iface.member_symbols,
            vec![
                "Widget::name".to_string(),
                "Widget|class|make:height:".to_string(),
                "Widget|instance|width".to_string(),
            ]
        );
        assert_eq!(iface.properties[0].symbols.setter.as_deref(), Some("setName:"));
    }

    #[test]
    fn type_suffixes_are_classified() {
        let src = "fn f(a: __weak id<Proto>?, e: NSError**, n: i32?) -> i32 { return 0; }";
        let (program, diags) = parse_src(src);
        assert!(diags.is_empty(), "{:?}", diags);
        let params = &program.functions[0].params;
        assert!(params[0].ty.shape.protocol_composition);
        assert!(params[0].ty.shape.ownership_well_formed);
        assert!(params[0].ty.shape.nullability_well_formed);
        assert!(params[1].ty.shape.ns_error_out_parameter);
        assert!(!params[2].ty.shape.nullability_well_formed);
    }

    #[test]
    fn block_literal_captures_are_free_names() {
        let src = "fn f(a: i32, b: i32) -> i32 { let k = ^(x: i32) { let y = x + a; b = y; return y; }; return 0; }";
        let (program, diags) = parse_src(src);
        assert!(diags.is_empty(), "{:?}", diags);
        let body = program.functions[0].body.as_ref().expect("body");
        let Stmt::Let { value, .. } = &body.stmts[0] else {
            panic!("expected let");
        };
        let ExprKind::BlockLiteral(lit) = &value.kind else {
            panic!("expected block literal");
        };
        assert_eq!(lit.captures, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(lit.mutable_captures, vec!["b".to_string()]);
        assert_eq!(lit.body_statement_count, 3);
    }

    #[test]
    fn recovers_after_bad_declaration() {
        let (program, diags) = parse_src("let = 3;\nfn ok() -> i32 { return 1; }\n");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].contains("[O3P101]"));
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn stray_case_label_is_skipped() {
        let (program, diags) = parse_src("fn main() -> i32 { case 1: return 0; }\n");
        assert_eq!(diags, vec!["error:1:20: 'case' label outside switch [O3P100]".to_string()]);
        let body = program.functions[0].body.as_ref().expect("body");
        assert!(matches!(body.stmts.as_slice(), [Stmt::Return { .. }]));
    }

    #[test]
    fn stray_default_label_is_skipped() {
        let (program, diags) = parse_src("fn main() -> i32 { default: return 0; }\n");
        assert_eq!(diags, vec!["error:1:20: 'default' label outside switch [O3P100]".to_string()]);
        assert_eq!(program.functions[0].body.as_ref().map(|b| b.stmts.len()), Some(1));
    }

    #[test]
    fn stray_close_brace_resumes_at_next_declaration() {
        let (program, diags) = parse_src("fn main() -> i32 { return 0; } }\nfn next() -> i32 { return 1; }\n");
        assert_eq!(diags, vec!["error:1:32: expected top-level declaration [O3P100]".to_string()]);
        assert_eq!(program.functions.len(), 2);
    }

    #[test]
    fn unbalanced_close_paren_in_body() {
        let (program, diags) = parse_src("fn main() -> i32 { let x = 1); return x; }\n");
        assert_eq!(diags, vec!["error:1:29: missing ';' after let declaration [O3P104]".to_string()]);
        assert_eq!(program.functions[0].body.as_ref().map(|b| b.stmts.len()), Some(1));

        let (_, diags) = parse_src("fn main() -> i32 { ) return 0; }\n");
        assert_eq!(diags, vec!["error:1:20: invalid expression [O3P103]".to_string()]);
    }

    fn on_large_stack<F: FnOnce() + Send + 'static>(f: F) {
        std::thread::Builder::new()
            .stack_size(16 * 1024 * 1024)
            .spawn(f)
            .expect("spawn")
            .join()
            .expect("parser thread");
    }

    #[test]
    fn excessive_nesting_reports_once() {
        on_large_stack(excessive_nesting_body);
    }

    fn excessive_nesting_body() {
        let depth = 400;
        let src = format!("fn main() -> i32 {{ return {}1{}; }}\n", "(".repeat(depth), ")".repeat(depth));
        let (program, diags) = parse_src(&src);
        assert_eq!(diags.len(), 1, "{:?}", diags);
        assert!(diags[0].ends_with("nesting depth exceeds limit of 256 [O3P103]"));
        assert_eq!(program.functions.len(), 1);

        let chain = format!("fn main() -> i32 {{ return 1{}; }}\n", " + 1".repeat(400));
        let (_, diags) = parse_src(&chain);
        assert_eq!(diags.len(), 1, "{:?}", diags);
        assert!(diags[0].contains("nesting depth exceeds limit"));

        let blocks = format!("fn main() -> i32 {{ {} return 0; {} }}\n", "{".repeat(300), "}".repeat(300));
        let (_, diags) = parse_src(&blocks);
        assert!(diags.iter().any(|d| d.ends_with("nesting depth exceeds limit of 256 [O3P100]")), "{:?}", diags);
    }

    #[test]
    fn duplicate_pure_qualifier() {
        let (_, diags) = parse_src("pure pure fn f() -> i32 { return 1; }");
        assert!(diags[0].contains("duplicate 'pure' qualifier in function declaration [O3P100]"));
    }

    #[test]
    fn extern_with_body_is_rejected() {
        let (_, diags) = parse_src("extern fn f() -> i32 { return 1; }");
        assert!(diags[0].contains("missing ';' after extern function declaration [O3P104]"));
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(parse_int_literal("0x7f"), Some(127));
        assert_eq!(parse_int_literal("0b1010"), Some(10));
        assert_eq!(parse_int_literal("1_000"), Some(1000));
        assert_eq!(parse_int_literal("4294967296"), None);
    }

    #[test]
    fn compound_assignment_and_updates() {
        let (program, diags) =
            parse_src("fn f() -> i32 { let x = 1; x <<= 2; x++; --x; for (let i = 0; i < 3; i++) { x += i; } return x; }");
        assert!(diags.is_empty(), "{:?}", diags);
        let body = program.functions[0].body.as_ref().expect("body");
        let Stmt::Assign(a) = &body.stmts[1] else {
            panic!("expected assignment");
        };
        assert_eq!(a.op, AssignOp::Compound(BinaryOp::Shl));
        assert!(matches!(&body.stmts[3], Stmt::Assign(Assignment { op: AssignOp::Decrement, .. })));
    }
}
