use super::ast::Span;
use super::diagnostic::Diagnostics;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(String),
    Keyword(Keyword),
    At(AtKeyword),
    Symbol(Symbol),
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Module,
    Let,
    Fn,
    Pure,
    Extern,
    Async,
    Throws,
    Return,
    If,
    Else,
    Do,
    For,
    Switch,
    Case,
    Default,
    While,
    Break,
    Continue,
    Await,
    I32,
    Bool,
    ObjcBool,
    NSInteger,
    NSUInteger,
    Void,
    Id,
    Class,
    Sel,
    Protocol,
    Instancetype,
    True,
    False,
    Nil,
}

impl Keyword {
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Keyword::I32
                | Keyword::Bool
                | Keyword::ObjcBool
                | Keyword::NSInteger
                | Keyword::NSUInteger
                | Keyword::Void
                | Keyword::Id
                | Keyword::Class
                | Keyword::Sel
                | Keyword::Protocol
                | Keyword::Instancetype
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtKeyword {
    Interface,
    Implementation,
    Protocol,
    End,
    Property,
    Synthesize,
    Dynamic,
    AutoreleasePool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Symbol {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Arrow,
    Question,
    Tilde,
    Caret,
    CaretEq,
    Eq,
    EqEq,
    Bang,
    NotEq,
    Lt,
    Lte,
    Shl,
    ShlEq,
    Gt,
    Gte,
    Shr,
    ShrEq,
    Amp,
    AndAnd,
    AmpEq,
    Pipe,
    OrOr,
    PipeEq,
    Plus,
    PlusPlus,
    PlusEq,
    Minus,
    MinusMinus,
    MinusEq,
    Star,
    StarEq,
    Slash,
    SlashEq,
    Percent,
    PercentEq,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PragmaContract {
    pub seen: bool,
    pub directive_count: usize,
    pub duplicate: bool,
    pub non_leading: bool,
    pub first_line: usize,
    pub first_column: usize,
    pub last_line: usize,
    pub last_column: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationHints {
    pub legacy_yes: usize,
    pub legacy_no: usize,
    pub legacy_null: usize,
}

impl MigrationHints {
    pub fn legacy_total(&self) -> usize {
        self.legacy_yes + self.legacy_no + self.legacy_null
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LexOptions {
    pub language_version: u32,
    pub migration_assist: bool,
}

pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub diags: Diagnostics,
    pub pragma: PragmaContract,
    pub hints: MigrationHints,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Placement {
    Prelude,
    NonLeading,
}

const MALFORMED_PRAGMA: &str =
    "malformed '#pragma objc_language_version' directive; expected '#pragma objc_language_version(3)'";
const DUPLICATE_PRAGMA: &str =
    "duplicate '#pragma objc_language_version' directive; only one file-scope prelude pragma is allowed";
const NON_LEADING_PRAGMA: &str =
    "language-version pragma must stay in the file-scope prelude before declarations or tokens";

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    idx: usize,
    line: usize,
    col: usize,
    options: LexOptions,
    diags: Diagnostics,
    pragma: PragmaContract,
    hints: MigrationHints,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, options: LexOptions) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            idx: 0,
            line: 1,
            col: 1,
            options,
            diags: Diagnostics::default(),
            pragma: PragmaContract::default(),
            hints: MigrationHints::default(),
        }
    }

    pub fn lex_all(mut self) -> LexOutput {
        let mut tokens = Vec::new();
        self.consume_prelude_pragmas();
        loop {
            if !self.skip_trivia() {
                self.idx = self.bytes.len();
            }
            if self.idx >= self.bytes.len() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span: self.span_from(self.idx, self.line, self.col),
                });
                break;
            }
            if self.peek_char() == '#' && self.consume_pragma(Placement::NonLeading, false) {
                continue;
            }
            if let Some(tok) = self.next_token() {
                tokens.push(tok);
            }
        }
        LexOutput {
            tokens,
            diags: self.diags,
            pragma: self.pragma,
            hints: self.hints,
        }
    }

    fn consume_prelude_pragmas(&mut self) {
        loop {
            if !self.skip_trivia() {
                self.idx = self.bytes.len();
                return;
            }
            if !self.consume_pragma(Placement::Prelude, true) {
                return;
            }
        }
    }

    /// Returns false when tokenization must stop (broken block comment).
    fn skip_trivia(&mut self) -> bool {
        while self.idx < self.bytes.len() {
            let ch = self.peek_char();
            if ch.is_ascii_whitespace() {
                self.advance();
                continue;
            }
            if ch == '/' && self.peek_next_char() == '/' {
                while self.idx < self.bytes.len() && self.peek_char() != '\n' {
                    self.advance();
                }
                continue;
            }
            if ch == '/' && self.peek_next_char() == '*' {
                let (line, column) = (self.line, self.col);
                self.advance();
                self.advance();
                let mut terminated = false;
                while self.idx < self.bytes.len() {
                    if self.peek_char() == '/' && self.peek_next_char() == '*' {
                        self.diags.push(
                            "O3L003",
                            "nested block comments are unsupported",
                            Span::at(self.line, self.col),
                        );
                        return false;
                    }
                    if self.peek_char() == '*' && self.peek_next_char() == '/' {
                        self.advance();
                        self.advance();
                        terminated = true;
                        break;
                    }
                    self.advance();
                }
                if !terminated {
                    self.diags
                        .push("O3L002", "unterminated block comment", Span::at(line, column));
                    return false;
                }
                continue;
            }
            break;
        }
        true
    }

    fn consume_pragma(&mut self, placement: Placement, strict: bool) -> bool {
        if self.peek_char() != '#' {
            return false;
        }
        let mut cursor = self.idx + 1;
        cursor = self.skip_horizontal_at(cursor);
        if !self.matches_at(cursor, "pragma") {
            return false;
        }
        cursor = self.skip_horizontal_at(cursor + "pragma".len());
        if !strict && !self.matches_at(cursor, "objc_language_version") {
            return false;
        }
        let (line, column) = (self.line, self.col);
        let directive = Span::at(line, column);
        self.advance();
        self.skip_horizontal();
        self.match_literal("pragma");
        self.skip_horizontal();
        if !self.match_literal("objc_language_version") {
            return self.malformed_pragma(directive);
        }
        self.skip_horizontal();
        if !self.match_char('(') {
            return self.malformed_pragma(directive);
        }
        self.skip_horizontal();
        let version_span = Span::at(self.line, self.col);
        if !self.peek_char().is_ascii_digit() {
            return self.malformed_pragma(directive);
        }
        let version = self.read_while(|c| c.is_ascii_digit());
        self.skip_horizontal();
        if !self.match_char(')') {
            return self.malformed_pragma(directive);
        }
        self.skip_horizontal();
        if self.idx < self.bytes.len() && self.peek_char() != '\n' {
            return self.malformed_pragma(directive);
        }
        let expected = self.options.language_version.to_string();
        if version != expected {
            self.diags.push(
                "O3L006",
                format!(
                    "unsupported objc language version '{}'; expected {}",
                    version, expected
                ),
                version_span,
            );
        }
        self.record_pragma(line, column, placement);
        if placement == Placement::NonLeading {
            self.diags.push("O3L008", NON_LEADING_PRAGMA, directive.clone());
        }
        if self.pragma.directive_count > 1 {
            self.diags.push("O3L007", DUPLICATE_PRAGMA, directive);
        }
        if self.peek_char() == '\n' {
            self.advance();
        }
        true
    }

    fn malformed_pragma(&mut self, directive: Span) -> bool {
        self.diags.push("O3L005", MALFORMED_PRAGMA, directive);
        while self.idx < self.bytes.len() && self.peek_char() != '\n' {
            self.advance();
        }
        if self.peek_char() == '\n' {
            self.advance();
        }
        true
    }

    fn record_pragma(&mut self, line: usize, column: usize, placement: Placement) {
        if !self.pragma.seen {
            self.pragma.seen = true;
            self.pragma.first_line = line;
            self.pragma.first_column = column;
        }
        self.pragma.directive_count += 1;
        self.pragma.last_line = line;
        self.pragma.last_column = column;
        if self.pragma.directive_count > 1 {
            self.pragma.duplicate = true;
        }
        if placement == Placement::NonLeading {
            self.pragma.non_leading = true;
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        let start = self.idx;
        let (line, column) = (self.line, self.col);
        let ch = self.peek_char();
        if ch == '@' {
            self.advance();
            if !is_ident_start(self.peek_char()) {
                self.diags
                    .push("O3L001", "unexpected character '@'", Span::at(line, column));
                return None;
            }
            let directive = self.read_while(is_ident_continue);
            let kind = match directive.as_str() {
                "interface" => AtKeyword::Interface,
                "implementation" => AtKeyword::Implementation,
                "protocol" => AtKeyword::Protocol,
                "end" => AtKeyword::End,
                "property" => AtKeyword::Property,
                "synthesize" => AtKeyword::Synthesize,
                "dynamic" => AtKeyword::Dynamic,
                "autoreleasepool" => AtKeyword::AutoreleasePool,
                _ => {
                    self.diags.push(
                        "O3L001",
                        format!("unsupported '@' directive '@{}'", directive),
                        Span::at(line, column),
                    );
                    return None;
                }
            };
            return Some(Token {
                kind: TokenKind::At(kind),
                span: self.span_from(start, line, column),
            });
        }
        if is_ident_start(ch) {
            let ident = self.read_while(is_ident_continue);
            let kind = match ident.as_str() {
                "module" => TokenKind::Keyword(Keyword::Module),
                "let" => TokenKind::Keyword(Keyword::Let),
                "fn" => TokenKind::Keyword(Keyword::Fn),
                "pure" => TokenKind::Keyword(Keyword::Pure),
                "extern" => TokenKind::Keyword(Keyword::Extern),
                "async" => TokenKind::Keyword(Keyword::Async),
                "throws" => TokenKind::Keyword(Keyword::Throws),
                "return" => TokenKind::Keyword(Keyword::Return),
                "if" => TokenKind::Keyword(Keyword::If),
                "else" => TokenKind::Keyword(Keyword::Else),
                "do" => TokenKind::Keyword(Keyword::Do),
                "for" => TokenKind::Keyword(Keyword::For),
                "switch" => TokenKind::Keyword(Keyword::Switch),
                "case" => TokenKind::Keyword(Keyword::Case),
                "default" => TokenKind::Keyword(Keyword::Default),
                "while" => TokenKind::Keyword(Keyword::While),
                "break" => TokenKind::Keyword(Keyword::Break),
                "continue" => TokenKind::Keyword(Keyword::Continue),
                "await" => TokenKind::Keyword(Keyword::Await),
                "i32" => TokenKind::Keyword(Keyword::I32),
                "bool" => TokenKind::Keyword(Keyword::Bool),
                "BOOL" => TokenKind::Keyword(Keyword::ObjcBool),
                "NSInteger" => TokenKind::Keyword(Keyword::NSInteger),
                "NSUInteger" => TokenKind::Keyword(Keyword::NSUInteger),
                "void" => TokenKind::Keyword(Keyword::Void),
                "id" => TokenKind::Keyword(Keyword::Id),
                "Class" => TokenKind::Keyword(Keyword::Class),
                "SEL" => TokenKind::Keyword(Keyword::Sel),
                "Protocol" => TokenKind::Keyword(Keyword::Protocol),
                "instancetype" => TokenKind::Keyword(Keyword::Instancetype),
                "true" => TokenKind::Keyword(Keyword::True),
                "false" => TokenKind::Keyword(Keyword::False),
                "nil" => TokenKind::Keyword(Keyword::Nil),
                "YES" => {
                    if self.options.migration_assist {
                        self.hints.legacy_yes += 1;
                    }
                    TokenKind::Keyword(Keyword::True)
                }
                "NO" => {
                    if self.options.migration_assist {
                        self.hints.legacy_no += 1;
                    }
                    TokenKind::Keyword(Keyword::False)
                }
                "NULL" => {
                    if self.options.migration_assist {
                        self.hints.legacy_null += 1;
                    }
                    TokenKind::Keyword(Keyword::Nil)
                }
                _ => TokenKind::Ident(ident),
            };
            return Some(Token {
                kind,
                span: self.span_from(start, line, column),
            });
        }
        if ch.is_ascii_digit() {
            let number = self.read_number();
            return Some(Token {
                kind: TokenKind::Number(number),
                span: self.span_from(start, line, column),
            });
        }
        self.advance();
        let sym = match ch {
            '(' => Symbol::LParen,
            ')' => Symbol::RParen,
            '{' => Symbol::LBrace,
            '}' => Symbol::RBrace,
            '[' => Symbol::LBracket,
            ']' => Symbol::RBracket,
            ',' => Symbol::Comma,
            ';' => Symbol::Semi,
            ':' => Symbol::Colon,
            '?' => Symbol::Question,
            '~' => Symbol::Tilde,
            '^' => self.pick('=', Symbol::CaretEq, Symbol::Caret),
            '=' => self.pick('=', Symbol::EqEq, Symbol::Eq),
            '!' => self.pick('=', Symbol::NotEq, Symbol::Bang),
            '<' => {
                if self.match_char('<') {
                    self.pick('=', Symbol::ShlEq, Symbol::Shl)
                } else {
                    self.pick('=', Symbol::Lte, Symbol::Lt)
                }
            }
            '>' => {
                if self.match_char('>') {
                    self.pick('=', Symbol::ShrEq, Symbol::Shr)
                } else {
                    self.pick('=', Symbol::Gte, Symbol::Gt)
                }
            }
            '&' => {
                if self.match_char('&') {
                    Symbol::AndAnd
                } else {
                    self.pick('=', Symbol::AmpEq, Symbol::Amp)
                }
            }
            '|' => {
                if self.match_char('|') {
                    Symbol::OrOr
                } else {
                    self.pick('=', Symbol::PipeEq, Symbol::Pipe)
                }
            }
            '+' => {
                if self.match_char('+') {
                    Symbol::PlusPlus
                } else {
                    self.pick('=', Symbol::PlusEq, Symbol::Plus)
                }
            }
            '-' => {
                if self.match_char('-') {
                    Symbol::MinusMinus
                } else if self.match_char('>') {
                    Symbol::Arrow
                } else {
                    self.pick('=', Symbol::MinusEq, Symbol::Minus)
                }
            }
            '*' => {
                if self.match_char('/') {
                    self.diags.push(
                        "O3L004",
                        "stray block comment terminator",
                        Span::at(line, column),
                    );
                    return None;
                }
                self.pick('=', Symbol::StarEq, Symbol::Star)
            }
            '/' => self.pick('=', Symbol::SlashEq, Symbol::Slash),
            '%' => self.pick('=', Symbol::PercentEq, Symbol::Percent),
            _ => {
                self.diags.push(
                    "O3L001",
                    format!("unexpected character '{}'", ch),
                    Span::at(line, column),
                );
                return None;
            }
        };
        Some(Token {
            kind: TokenKind::Symbol(sym),
            span: self.span_from(start, line, column),
        })
    }

    fn pick(&mut self, next: char, matched: Symbol, otherwise: Symbol) -> Symbol {
        if self.match_char(next) {
            matched
        } else {
            otherwise
        }
    }

    fn span_from(&self, start: usize, line: usize, column: usize) -> Span {
        Span {
            start,
            end: self.idx,
            line,
            column,
        }
    }

    fn read_number(&mut self) -> String {
        let radix_prefix = self.peek_char() == '0'
            && matches!(self.peek_next_char(), 'x' | 'X' | 'b' | 'B' | 'o' | 'O');
        let mut s = String::new();
        if radix_prefix {
            s.push(self.peek_char());
            self.advance();
            let marker = self.peek_char();
            s.push(marker);
            self.advance();
            let digits = match marker {
                'x' | 'X' => self.read_while(|c| c.is_ascii_hexdigit() || c == '_'),
                'b' | 'B' => self.read_while(|c| c == '0' || c == '1' || c == '_'),
                _ => self.read_while(|c| ('0'..='7').contains(&c) || c == '_'),
            };
            s.push_str(&digits);
            return s;
        }
        s.push_str(&self.read_while(|c| c.is_ascii_digit() || c == '_'));
        s
    }

    fn read_while<F>(&mut self, f: F) -> String
    where
        F: Fn(char) -> bool,
    {
        let mut s = String::new();
        while self.idx < self.bytes.len() {
            let ch = self.peek_char();
            if !f(ch) {
                break;
            }
            s.push(ch);
            self.advance();
        }
        s
    }

    fn skip_horizontal(&mut self) {
        while matches!(self.peek_char(), ' ' | '\t' | '\r') && self.idx < self.bytes.len() {
            self.advance();
        }
    }

    fn skip_horizontal_at(&self, mut cursor: usize) -> usize {
        while matches!(self.bytes.get(cursor), Some(b' ' | b'\t' | b'\r')) {
            cursor += 1;
        }
        cursor
    }

    fn matches_at(&self, cursor: usize, literal: &str) -> bool {
        self.bytes
            .get(cursor..cursor + literal.len())
            .is_some_and(|window| window == literal.as_bytes())
    }

    fn match_literal(&mut self, literal: &str) -> bool {
        if !self.matches_at(self.idx, literal) {
            return false;
        }
        for _ in 0..literal.len() {
            self.advance();
        }
        true
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.idx < self.bytes.len() && self.peek_char() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if self.idx >= self.bytes.len() {
            return;
        }
        let ch = self.peek_char();
        self.idx += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
    }

    fn peek_char(&self) -> char {
        self.rest().next().unwrap_or('\0')
    }

    fn peek_next_char(&self) -> char {
        self.rest().nth(1).unwrap_or('\0')
    }

    fn rest(&self) -> std::str::Chars<'a> {
        self.src.get(self.idx..).unwrap_or_default().chars()
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

pub fn tokenize(source: &str, options: LexOptions) -> LexOutput {
    Lexer::new(source, options).lex_all()
}

#[cfg(test)]
mod tests {
    use super::{AtKeyword, Keyword, LexOptions, Symbol, TokenKind, tokenize};

    fn opts() -> LexOptions {
        LexOptions {
            language_version: 3,
            migration_assist: false,
        }
    }

    fn codes(src: &str) -> Vec<&'static str> {
        tokenize(src, opts())
            .diags
            .items
            .iter()
            .map(|d| d.code)
            .collect()
    }

    #[test]
    fn leading_pragma_is_clean() {
        let out = tokenize("#pragma objc_language_version(3)\nfn main() { return 0; }\n", opts());
        assert!(out.diags.is_empty());
        assert!(out.pragma.seen);
        assert_eq!(out.pragma.directive_count, 1);
        assert_eq!((out.pragma.first_line, out.pragma.first_column), (1, 1));
    }

    #[test]
    fn duplicate_pragma_reported_once() {
        let src = "#pragma objc_language_version(3)\n#pragma objc_language_version(3)\nlet x = 1;\n";
        assert_eq!(codes(src), vec!["O3L007"]);
    }

    #[test]
    fn non_leading_pragma_reported_once() {
        let src = "let x = 1;\n#pragma objc_language_version(3)\n";
        let out = tokenize(src, opts());
        assert_eq!(out.diags.items.len(), 1);
        assert_eq!(out.diags.items[0].code, "O3L008");
        assert!(out.pragma.non_leading);
        assert!(!out.pragma.duplicate);
    }

    #[test]
    fn wrong_version_points_at_digits() {
        let out = tokenize("#pragma objc_language_version(2)\n", opts());
        assert_eq!(out.diags.items[0].code, "O3L006");
        assert_eq!(out.diags.items[0].span.column, 31);
    }

    #[test]
    fn legacy_literals_counted_only_with_assist() {
        let src = "let a = YES; let b = NO; let c = NULL;";
        let quiet = tokenize(src, opts());
        assert_eq!(quiet.hints.legacy_total(), 0);
        let loud = tokenize(
            src,
            LexOptions {
                language_version: 3,
                migration_assist: true,
            },
        );
        assert_eq!(loud.hints.legacy_total(), 3);
        assert!(loud
            .tokens
            .iter()
            .any(|t| t.kind == TokenKind::Keyword(Keyword::True)));
    }

    #[test]
    fn at_directives_and_errors() {
        let out = tokenize("@interface Foo @end @autoreleasepool @selector", opts());
        let kinds: Vec<_> = out.tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(kinds[0], TokenKind::At(AtKeyword::Interface));
        assert_eq!(kinds[2], TokenKind::At(AtKeyword::End));
        assert_eq!(kinds[3], TokenKind::At(AtKeyword::AutoreleasePool));
        assert_eq!(out.diags.items[0].message, "unsupported '@' directive '@selector'");
    }

    #[test]
    fn compound_operators_lex_greedily() {
        let out = tokenize("a <<= b >>= c ^= d -> e", opts());
        let syms: Vec<_> = out
            .tokens
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Symbol(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            syms,
            vec![Symbol::ShlEq, Symbol::ShrEq, Symbol::CaretEq, Symbol::Arrow]
        );
    }

    #[test]
    fn non_ascii_character_is_reported_once() {
        let out = tokenize("let é = 1; // café\nlet b = 2;", opts());
        let rendered: Vec<String> = out.diags.items.iter().map(|d| d.render()).collect();
        assert_eq!(rendered, vec!["error:1:5: unexpected character 'é' [O3L001]".to_string()]);
        let idents = out
            .tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Ident(_)))
            .count();
        assert_eq!(idents, 1);
        let second = out.tokens.iter().find(|t| t.kind == TokenKind::Ident("b".into())).expect("b");
        assert_eq!((second.span.line, second.span.column), (2, 5));
    }

    #[test]
    fn block_comment_errors_stop_lexing() {
        assert_eq!(codes("let x = 1; /* open"), vec!["O3L002"]);
        assert_eq!(codes("/* a /* b */"), vec!["O3L003"]);
        assert_eq!(codes("let x = 1 */;"), vec!["O3L004"]);
    }
}
