use crate::schema::mapping::{PathItem, SourceMeta};
use crate::schema::scalar::ScalarValue;
use crate::subst::ast::{
    StringOrSubstitution, StringOrSubstitutions, Substitution, SubstitutionValue,
};
use crate::subst::lexer::{lex, Token, TokenKind};

// ─── Parse Context ──────────────────────────────────────────────────────────

/// Where the substitution content sits in the surface document. `start` is
/// the 1-based position of the first character after `${`; `None` when the
/// surface form provides no coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseContext {
    pub start: Option<SourceMeta>,
    /// Folded/literal surface blocks re-indent content, so column carry-over
    /// from the parent is disabled.
    pub block_style: bool,
}

impl ParseContext {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            start: Some(SourceMeta::new(line, column)),
            block_style: false,
        }
    }

    pub fn block(line: usize, column: usize) -> Self {
        Self {
            start: Some(SourceMeta::new(line, column)),
            block_style: true,
        }
    }

    /// Resolve a token's relative coordinates against the parent start.
    fn resolve(&self, rel_line: usize, rel_column: usize) -> Option<SourceMeta> {
        let start = self.start?;
        let line = start.line + rel_line;
        let column = if rel_line == 0 && !self.block_style {
            start.column + rel_column
        } else {
            rel_column + 1
        };
        Some(SourceMeta::new(line, column))
    }

    /// Context for content beginning at a relative offset inside this one.
    fn offset(&self, rel_line: usize, rel_column: usize) -> ParseContext {
        ParseContext {
            start: self.resolve(rel_line, rel_column),
            block_style: false,
        }
    }
}

/// A parse failure with resolved source coordinates when available.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub location: Option<SourceMeta>,
}

// ─── Entry Points ───────────────────────────────────────────────────────────

/// Parse the contents of a single `${...}` expression. Errors accumulate;
/// a best-effort AST is returned alongside them when one could be formed.
pub fn parse_substitution(
    input: &str,
    ctx: &ParseContext,
) -> (Option<Substitution>, Vec<ParseError>) {
    let (tokens, lex_errors) = lex(input);
    let mut errors: Vec<ParseError> = lex_errors
        .into_iter()
        .map(|e| ParseError {
            message: e.message,
            location: ctx.resolve(e.line, e.column),
        })
        .collect();

    if tokens.is_empty() {
        errors.push(ParseError {
            message: "empty substitution".to_string(),
            location: ctx.start,
        });
        return (None, errors);
    }

    let mut parser = Parser::new(&tokens, ctx);
    let result = parser.parse_substitution();
    if result.is_some() {
        if let Some(extra) = parser.peek().cloned() {
            parser.error_at(
                format!("unexpected {} after substitution", extra.kind.describe()),
                Some(extra),
            );
        }
    }
    errors.extend(parser.errors);
    (result, errors)
}

/// Split an interpolated string into literal fragments and parsed
/// substitutions. Quotes inside substitution string literals escape `\"`
/// and do not terminate the `${...}` form.
pub fn parse_string_or_substitutions(
    input: &str,
    ctx: &ParseContext,
) -> (StringOrSubstitutions, Vec<ParseError>) {
    let chars: Vec<char> = input.chars().collect();
    let mut values = Vec::new();
    let mut errors = Vec::new();
    let mut literal = String::new();
    let mut pos = 0;
    let mut line = 0;
    let mut column = 0;

    while pos < chars.len() {
        if chars[pos] == '$' && chars.get(pos + 1) == Some(&'{') {
            // Content starts after "${".
            let content_line = line;
            let content_column = column + 2;
            match find_closing_brace(&chars[pos + 2..]) {
                Some(len) => {
                    if !literal.is_empty() {
                        values.push(StringOrSubstitution::StringValue(std::mem::take(
                            &mut literal,
                        )));
                    }
                    let content: String = chars[pos + 2..pos + 2 + len].iter().collect();
                    let sub_ctx = ctx.offset(content_line, content_column);
                    let (sub, sub_errors) = parse_substitution(&content, &sub_ctx);
                    errors.extend(sub_errors);
                    if let Some(sub) = sub {
                        values.push(StringOrSubstitution::Substitution(sub));
                    }
                    for _ in 0..len + 3 {
                        if chars[pos] == '\n' {
                            line += 1;
                            column = 0;
                        } else {
                            column += 1;
                        }
                        pos += 1;
                    }
                }
                None => {
                    errors.push(ParseError {
                        message: "missing closing brace for substitution".to_string(),
                        location: ctx.resolve(line, column),
                    });
                    // Keep the rest as a literal fragment.
                    literal.extend(&chars[pos..]);
                    pos = chars.len();
                }
            }
        } else {
            if chars[pos] == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
            literal.push(chars[pos]);
            pos += 1;
        }
    }

    if !literal.is_empty() {
        values.push(StringOrSubstitution::StringValue(literal));
    }

    (StringOrSubstitutions { values }, errors)
}

/// Find the index of the `}` closing a substitution, honouring string
/// literals so `"${}"` inside the content does not terminate it early.
fn find_closing_brace(chars: &[char]) -> Option<usize> {
    let mut in_string = false;
    let mut pos = 0;
    while pos < chars.len() {
        match chars[pos] {
            '\\' if in_string && matches!(chars.get(pos + 1), Some('"') | Some('\\')) => {
                pos += 1;
            }
            '"' => in_string = !in_string,
            '}' if !in_string => return Some(pos),
            _ => {}
        }
        pos += 1;
    }
    None
}

// ─── Parser ─────────────────────────────────────────────────────────────────

/// Recursive descent over the substitution grammar. Ambiguous prefixes (an
/// identifier starting a function call or a bare resource reference; `[`
/// starting a name accessor or an index accessor) are resolved by saving the
/// token index on an explicit position stack and restoring it on failure.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    saved: Vec<usize>,
    errors: Vec<ParseError>,
    ctx: &'a ParseContext,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], ctx: &'a ParseContext) -> Self {
        Self {
            tokens,
            pos: 0,
            saved: Vec::new(),
            errors: Vec::new(),
            ctx,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn save(&mut self) {
        self.saved.push(self.pos);
    }

    fn restore(&mut self) {
        if let Some(pos) = self.saved.pop() {
            self.pos = pos;
        }
    }

    fn discard(&mut self) {
        self.saved.pop();
    }

    fn meta_of(&self, token: &Token) -> Option<SourceMeta> {
        self.ctx.resolve(token.line, token.column)
    }

    fn current_meta(&self) -> Option<SourceMeta> {
        self.peek()
            .or_else(|| self.tokens.last())
            .and_then(|t| self.meta_of(t))
    }

    fn error_at(&mut self, message: String, token: Option<Token>) {
        let location = token
            .as_ref()
            .and_then(|t| self.meta_of(t))
            .or_else(|| self.current_meta());
        self.errors.push(ParseError { message, location });
    }

    // substitution = functionCall | variableRef | datasourceRef | childRef
    //              | resourceRef | literal
    fn parse_substitution(&mut self) -> Option<Substitution> {
        let start = self.peek()?.clone();
        let meta = self.meta_of(&start);

        match &start.kind {
            TokenKind::KeywordVariables => {
                self.advance();
                let name = self.parse_name_accessor()?;
                Some(Substitution::new(
                    SubstitutionValue::Variable { name },
                    meta,
                ))
            }
            TokenKind::KeywordDatasources => {
                self.advance();
                let data_source_name = self.parse_name_accessor()?;
                let field_name = self.parse_name_accessor()?;
                let index = self.try_parse_index_accessor();
                Some(Substitution::new(
                    SubstitutionValue::DataSourceProperty {
                        data_source_name,
                        field_name,
                        primitive_arr_index: index,
                    },
                    meta,
                ))
            }
            TokenKind::KeywordChildren => {
                self.advance();
                let child_name = self.parse_name_accessor()?;
                let first = self.parse_name_accessor()?;
                let mut path = vec![PathItem::FieldName(first)];
                path.extend(self.parse_path_accessors());
                Some(Substitution::new(
                    SubstitutionValue::Child { child_name, path },
                    meta,
                ))
            }
            TokenKind::KeywordResources => {
                self.advance();
                let resource_name = self.parse_name_accessor()?;
                let path = self.parse_path_accessors();
                Some(Substitution::new(
                    SubstitutionValue::ResourceProperty {
                        resource_name,
                        path,
                    },
                    meta,
                ))
            }
            TokenKind::Ident(_) => {
                // Could be a function call or a bare-name resource reference.
                self.save();
                if let Some(call) = self.try_parse_function_call(meta) {
                    self.discard();
                    return Some(call);
                }
                self.restore();
                let TokenKind::Ident(resource_name) = self.advance()?.kind.clone() else {
                    return None;
                };
                let path = self.parse_path_accessors();
                Some(Substitution::new(
                    SubstitutionValue::ResourceProperty {
                        resource_name,
                        path,
                    },
                    meta,
                ))
            }
            TokenKind::IntLiteral(i) => {
                let value = *i;
                self.advance();
                Some(Substitution::new(
                    SubstitutionValue::Literal(ScalarValue::Int(value)),
                    meta,
                ))
            }
            TokenKind::FloatLiteral(v) => {
                let value = *v;
                self.advance();
                Some(Substitution::new(
                    SubstitutionValue::Literal(ScalarValue::Float(value)),
                    meta,
                ))
            }
            TokenKind::BoolLiteral(b) => {
                let value = *b;
                self.advance();
                Some(Substitution::new(
                    SubstitutionValue::Literal(ScalarValue::Bool(value)),
                    meta,
                ))
            }
            TokenKind::StringLiteral(s) => {
                let value = s.clone();
                self.advance();
                Some(Substitution::new(
                    SubstitutionValue::Literal(ScalarValue::String(value)),
                    meta,
                ))
            }
            other => {
                let message = format!("expected a reference, function call, or literal, found {}", other.describe());
                self.error_at(message, Some(start));
                None
            }
        }
    }

    // functionCall = name "(" [ substitution { "," substitution } ] ")"
    //
    // Returns None without emitting errors when the prefix is not a call,
    // so the caller can backtrack to a bare resource reference.
    fn try_parse_function_call(&mut self, meta: Option<SourceMeta>) -> Option<Substitution> {
        let TokenKind::Ident(name) = self.peek_kind()?.clone() else {
            return None;
        };
        if self.tokens.get(self.pos + 1).map(|t| &t.kind) != Some(&TokenKind::OpenParen) {
            return None;
        }
        self.advance();
        self.advance();

        let mut args = Vec::new();
        if self.peek_kind() == Some(&TokenKind::CloseParen) {
            self.advance();
            return Some(Substitution::new(
                SubstitutionValue::FunctionCall { name, args },
                meta,
            ));
        }

        loop {
            match self.parse_substitution() {
                Some(arg) => args.push(arg),
                // Recover inside the argument list: skip to the next comma
                // or the call's closing paren and keep collecting args.
                None => self.skip_to_argument_boundary(),
            }
            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                Some(TokenKind::CloseParen) => {
                    self.advance();
                    break;
                }
                Some(_) => {
                    let tok = self.peek().cloned();
                    self.error_at(
                        "expected ',' or ')' in function arguments".to_string(),
                        tok,
                    );
                    self.skip_to_argument_boundary();
                    if self.peek_kind() == Some(&TokenKind::Comma) {
                        self.advance();
                        continue;
                    }
                    if self.peek_kind() == Some(&TokenKind::CloseParen) {
                        self.advance();
                    }
                    break;
                }
                None => {
                    self.error_at("unterminated function call".to_string(), None);
                    break;
                }
            }
        }

        Some(Substitution::new(
            SubstitutionValue::FunctionCall { name, args },
            meta,
        ))
    }

    /// Skip tokens until the next argument boundary at the current nesting
    /// level: a `,` or the closing `)` of the enclosing call.
    fn skip_to_argument_boundary(&mut self) {
        let mut depth = 0usize;
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::OpenParen => depth += 1,
                TokenKind::CloseParen if depth == 0 => return,
                TokenKind::CloseParen => depth -= 1,
                TokenKind::Comma if depth == 0 => return,
                _ => {}
            }
            self.advance();
        }
    }

    // nameAccessor = "." name | "[" nameStringLiteral "]"
    fn parse_name_accessor(&mut self) -> Option<String> {
        match self.peek_kind() {
            Some(TokenKind::Dot) => {
                self.advance();
                match self.advance().map(|t| t.clone()) {
                    Some(tok) => match token_name(&tok.kind) {
                        Some(name) => Some(name),
                        None => {
                            self.error_at(
                                format!("expected a name after '.', found {}", tok.kind.describe()),
                                Some(tok),
                            );
                            None
                        }
                    },
                    None => {
                        self.error_at("expected a name after '.'".to_string(), None);
                        None
                    }
                }
            }
            Some(TokenKind::OpenBracket) => {
                self.advance();
                let name = match self.advance().map(|t| t.clone()) {
                    Some(Token {
                        kind: TokenKind::NameStringLiteral(name),
                        ..
                    }) => name,
                    Some(tok) => {
                        self.error_at(
                            format!(
                                "bracketed accessor must be a quoted name, found {}",
                                tok.kind.describe()
                            ),
                            Some(tok),
                        );
                        return None;
                    }
                    None => {
                        self.error_at("expected a quoted name after '['".to_string(), None);
                        return None;
                    }
                };
                if self.peek_kind() == Some(&TokenKind::CloseBracket) {
                    self.advance();
                    Some(name)
                } else {
                    let tok = self.peek().cloned();
                    self.error_at("expected ']' after bracketed name".to_string(), tok);
                    None
                }
            }
            _ => {
                let tok = self.peek().cloned();
                self.error_at("expected '.' or '[' accessor".to_string(), tok);
                None
            }
        }
    }

    // indexAccessor = "[" [ intLiteral ] "]"  — an empty accessor means 0.
    fn try_parse_index_accessor(&mut self) -> Option<usize> {
        if self.peek_kind() != Some(&TokenKind::OpenBracket) {
            return None;
        }
        self.save();
        self.advance();
        let index = match self.peek_kind() {
            Some(TokenKind::IntLiteral(i)) if *i >= 0 => {
                let value = *i as usize;
                self.advance();
                value
            }
            Some(TokenKind::CloseBracket) => 0,
            _ => {
                self.restore();
                return None;
            }
        };
        if self.peek_kind() == Some(&TokenKind::CloseBracket) {
            self.advance();
            self.discard();
            Some(index)
        } else {
            self.restore();
            None
        }
    }

    // { nameAccessor | indexAccessor } — `[` is ambiguous between the two,
    // resolved by trying the name accessor first and backtracking.
    fn parse_path_accessors(&mut self) -> Vec<PathItem> {
        let mut path = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Dot) => match self.parse_name_accessor() {
                    Some(name) => path.push(PathItem::FieldName(name)),
                    None => break,
                },
                Some(TokenKind::OpenBracket) => {
                    self.save();
                    if let Some(name) = self.parse_bracketed_name() {
                        self.discard();
                        path.push(PathItem::FieldName(name));
                        continue;
                    }
                    self.restore();
                    match self.try_parse_index_accessor() {
                        Some(index) => path.push(PathItem::ArrayIndex(index)),
                        None => {
                            let tok = self.peek().cloned();
                            self.error_at(
                                "expected a quoted name or integer index in brackets".to_string(),
                                tok,
                            );
                            // Recover within the path: drop the bracket and
                            // whatever sits inside it.
                            self.advance();
                            while let Some(kind) = self.peek_kind() {
                                let done = *kind == TokenKind::CloseBracket;
                                self.advance();
                                if done {
                                    break;
                                }
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        path
    }

    /// `"[" nameStringLiteral "]"` with no error reporting; used for the
    /// backtracking half of the bracket ambiguity.
    fn parse_bracketed_name(&mut self) -> Option<String> {
        if self.peek_kind() != Some(&TokenKind::OpenBracket) {
            return None;
        }
        self.advance();
        let name = match self.peek_kind() {
            Some(TokenKind::NameStringLiteral(name)) => {
                let name = name.clone();
                self.advance();
                name
            }
            _ => return None,
        };
        if self.peek_kind() == Some(&TokenKind::CloseBracket) {
            self.advance();
            Some(name)
        } else {
            None
        }
    }
}

/// Accept identifiers and reserved keywords in name position, so paths like
/// `resources.api.spec.resources` stay addressable.
fn token_name(kind: &TokenKind) -> Option<String> {
    match kind {
        TokenKind::Ident(name) => Some(name.clone()),
        TokenKind::KeywordVariables => Some("variables".to_string()),
        TokenKind::KeywordDatasources => Some("datasources".to_string()),
        TokenKind::KeywordResources => Some("resources".to_string()),
        TokenKind::KeywordChildren => Some("children".to_string()),
        _ => None,
    }
}
