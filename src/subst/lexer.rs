use std::sync::LazyLock;

use regex::Regex;

/// Pattern a bracketed name accessor must match, e.g. `["cluster.v1"]`.
/// Anything else inside brackets stays a plain string literal so the parser
/// can reject it with a precise error.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").expect("name pattern compiles")
});

// ─── Tokens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    Comma,
    Dot,
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    StringLiteral(String),
    /// A string literal immediately after `[` whose content matches the
    /// bracketed-name pattern.
    NameStringLiteral(String),
    Ident(String),
    KeywordVariables,
    KeywordDatasources,
    KeywordResources,
    KeywordChildren,
}

impl TokenKind {
    /// Short human label used in parser error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::OpenBracket => "'['".to_string(),
            TokenKind::CloseBracket => "']'".to_string(),
            TokenKind::OpenParen => "'('".to_string(),
            TokenKind::CloseParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::IntLiteral(i) => format!("integer {}", i),
            TokenKind::FloatLiteral(f) => format!("float {}", f),
            TokenKind::BoolLiteral(b) => format!("boolean {}", b),
            TokenKind::StringLiteral(s) => format!("string \"{}\"", s),
            TokenKind::NameStringLiteral(s) => format!("name \"{}\"", s),
            TokenKind::Ident(name) => format!("identifier \"{}\"", name),
            TokenKind::KeywordVariables => "keyword \"variables\"".to_string(),
            TokenKind::KeywordDatasources => "keyword \"datasources\"".to_string(),
            TokenKind::KeywordResources => "keyword \"resources\"".to_string(),
            TokenKind::KeywordChildren => "keyword \"children\"".to_string(),
        }
    }
}

/// A lexed token with its position relative to the start of the substitution
/// content: 0-based line offset and 0-based column within that line.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// A lexing failure, positioned like a token. The lexer reports every error
/// it encounters and keeps producing tokens for best-effort parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

// ─── Lexer ──────────────────────────────────────────────────────────────────

/// Tokenise the contents of a `${...}` expression.
pub fn lex(input: &str) -> (Vec<Token>, Vec<LexError>) {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut pos = 0;
    let mut line = 0;
    let mut column = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        let (tok_line, tok_col) = (line, column);

        match ch {
            '\n' => {
                pos += 1;
                line += 1;
                column = 0;
            }
            c if c.is_whitespace() => {
                pos += 1;
                column += 1;
            }
            '[' => {
                tokens.push(token(TokenKind::OpenBracket, tok_line, tok_col));
                pos += 1;
                column += 1;
            }
            ']' => {
                tokens.push(token(TokenKind::CloseBracket, tok_line, tok_col));
                pos += 1;
                column += 1;
            }
            '(' => {
                tokens.push(token(TokenKind::OpenParen, tok_line, tok_col));
                pos += 1;
                column += 1;
            }
            ')' => {
                tokens.push(token(TokenKind::CloseParen, tok_line, tok_col));
                pos += 1;
                column += 1;
            }
            ',' => {
                tokens.push(token(TokenKind::Comma, tok_line, tok_col));
                pos += 1;
                column += 1;
            }
            '.' => {
                tokens.push(token(TokenKind::Dot, tok_line, tok_col));
                pos += 1;
                column += 1;
            }
            '"' => {
                let (value, consumed, terminated) = scan_string(&chars[pos..]);
                if !terminated {
                    errors.push(LexError {
                        message: "unterminated string literal".to_string(),
                        line: tok_line,
                        column: tok_col,
                    });
                }
                let after_open_bracket = matches!(
                    tokens.last(),
                    Some(Token {
                        kind: TokenKind::OpenBracket,
                        ..
                    })
                );
                let kind = if after_open_bracket && NAME_PATTERN.is_match(&value) {
                    TokenKind::NameStringLiteral(value)
                } else {
                    TokenKind::StringLiteral(value)
                };
                tokens.push(token(kind, tok_line, tok_col));
                pos += consumed;
                column += consumed;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, pos)) => {
                let (kind, consumed) = scan_number(&chars[pos..]);
                tokens.push(token(kind, tok_line, tok_col));
                pos += consumed;
                column += consumed;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (kind, consumed) = scan_ident(&chars[pos..]);
                tokens.push(token(kind, tok_line, tok_col));
                pos += consumed;
                column += consumed;
            }
            other => {
                errors.push(LexError {
                    message: format!("unexpected character '{}'", other),
                    line: tok_line,
                    column: tok_col,
                });
                pos += 1;
                column += 1;
            }
        }
    }

    (tokens, errors)
}

fn token(kind: TokenKind, line: usize, column: usize) -> Token {
    Token { kind, line, column }
}

fn next_is_digit(chars: &[char], pos: usize) -> bool {
    chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
}

/// Scan a double-quoted string starting at `chars[0] == '"'`. Quotes escape
/// with `\"` and do not terminate the literal. Returns the unescaped value,
/// the number of chars consumed, and whether a closing quote was found.
fn scan_string(chars: &[char]) -> (String, usize, bool) {
    let mut value = String::new();
    let mut pos = 1;

    while pos < chars.len() {
        match chars[pos] {
            '\\' if matches!(chars.get(pos + 1), Some('"') | Some('\\')) => {
                value.push(chars[pos + 1]);
                pos += 2;
            }
            '"' => {
                return (value, pos + 1, true);
            }
            c => {
                value.push(c);
                pos += 1;
            }
        }
    }

    (value, pos, false)
}

/// Scan a numeric literal. The float rule requires a decimal point with
/// digits on both sides; integers are matched greedily when it fails, which
/// leaves a trailing `.` to be lexed as an accessor dot.
fn scan_number(chars: &[char]) -> (TokenKind, usize) {
    let mut pos = 0;
    if chars[0] == '-' {
        pos += 1;
    }
    let int_start = pos;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    let int_end = pos;

    if pos < chars.len()
        && chars[pos] == '.'
        && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
    {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
        let text: String = chars[..pos].iter().collect();
        if let Ok(f) = text.parse::<f64>() {
            return (TokenKind::FloatLiteral(f), pos);
        }
    }

    let text: String = chars[..int_end].iter().collect();
    match text.parse::<i64>() {
        Ok(i) => (TokenKind::IntLiteral(i), int_end),
        // Digits that overflow i64 degrade to a string literal token so the
        // parser can still report a positioned error.
        Err(_) => (TokenKind::StringLiteral(text), int_end.max(int_start + 1)),
    }
}

fn scan_ident(chars: &[char]) -> (TokenKind, usize) {
    let mut pos = 0;
    while pos < chars.len()
        && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_' || chars[pos] == '-')
    {
        pos += 1;
    }
    let text: String = chars[..pos].iter().collect();
    let kind = match text.as_str() {
        "variables" => TokenKind::KeywordVariables,
        "datasources" => TokenKind::KeywordDatasources,
        "resources" => TokenKind::KeywordResources,
        "children" => TokenKind::KeywordChildren,
        "true" => TokenKind::BoolLiteral(true),
        "false" => TokenKind::BoolLiteral(false),
        _ => TokenKind::Ident(text),
    };
    (kind, pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let (tokens, errors) = lex(input);
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_variable_reference() {
        assert_eq!(
            kinds("variables.environment"),
            vec![
                TokenKind::KeywordVariables,
                TokenKind::Dot,
                TokenKind::Ident("environment".to_string()),
            ]
        );
    }

    #[test]
    fn lexes_function_call_with_mixed_args() {
        assert_eq!(
            kinds("replace(datasources.host.domain, \"${}\", \"\")"),
            vec![
                TokenKind::Ident("replace".to_string()),
                TokenKind::OpenParen,
                TokenKind::KeywordDatasources,
                TokenKind::Dot,
                TokenKind::Ident("host".to_string()),
                TokenKind::Dot,
                TokenKind::Ident("domain".to_string()),
                TokenKind::Comma,
                TokenKind::StringLiteral("${}".to_string()),
                TokenKind::Comma,
                TokenKind::StringLiteral(String::new()),
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn bracketed_names_get_their_own_token() {
        assert_eq!(
            kinds("resources[\"save-order.v1\"]"),
            vec![
                TokenKind::KeywordResources,
                TokenKind::OpenBracket,
                TokenKind::NameStringLiteral("save-order.v1".to_string()),
                TokenKind::CloseBracket,
            ]
        );
        // Arbitrary characters stay a plain string literal.
        assert_eq!(
            kinds("resources[\"not a name!\"]"),
            vec![
                TokenKind::KeywordResources,
                TokenKind::OpenBracket,
                TokenKind::StringLiteral("not a name!".to_string()),
                TokenKind::CloseBracket,
            ]
        );
    }

    #[test]
    fn escaped_quotes_do_not_terminate_strings() {
        assert_eq!(
            kinds(r#""a \"quoted\" value""#),
            vec![TokenKind::StringLiteral("a \"quoted\" value".to_string())]
        );
    }

    #[test]
    fn floats_need_digits_on_both_sides() {
        assert_eq!(kinds("3.25"), vec![TokenKind::FloatLiteral(3.25)]);
        assert_eq!(kinds("-1.5"), vec![TokenKind::FloatLiteral(-1.5)]);
        // "5." greedily matches the integer and leaves the accessor dot.
        assert_eq!(
            kinds("5."),
            vec![TokenKind::IntLiteral(5), TokenKind::Dot]
        );
    }

    #[test]
    fn reports_every_error_and_keeps_going() {
        let (tokens, errors) = lex("variables.region ? !");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "unexpected character '?'");
        assert_eq!(errors[0].column, 17);
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn unterminated_string_yields_partial_token() {
        let (tokens, errors) = lex("\"abc");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated"));
        assert_eq!(
            tokens,
            vec![Token {
                kind: TokenKind::StringLiteral("abc".to_string()),
                line: 0,
                column: 0,
            }]
        );
    }

    #[test]
    fn multi_line_input_tracks_line_offsets() {
        let (tokens, errors) = lex("join(\n  variables.region,\n  \"-\")");
        assert!(errors.is_empty());
        let variables = tokens
            .iter()
            .find(|t| t.kind == TokenKind::KeywordVariables)
            .unwrap();
        assert_eq!(variables.line, 1);
        assert_eq!(variables.column, 2);
    }
}
