use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    StringLit,
    Punct,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_ident(&self, text: &str) -> bool {
        self.kind == TokenKind::Identifier && self.text == text
    }
}

/// Multi-character operators, longest first so the scanner matches greedily.
const OPERATORS: &[&str] = &[
    ">>=", "<<=", "**", "++", "--", "+=", "-=", "*=", "/=", "%=", "==", "!=", "<=", ">=", "&&",
    "||", "=>", "->", "<<", ">>", "|=", "&=", "^=",
];

/// Tokenize Solidity source. Comments and whitespace are dropped; every token
/// carries its 1-based line/column for spans and parse errors.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut col = 1;

    let advance = |i: &mut usize, line: &mut usize, col: &mut usize, c: char| {
        *i += 1;
        if c == '\n' {
            *line += 1;
            *col = 1;
        } else {
            *col += 1;
        }
    };

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            advance(&mut i, &mut line, &mut col, c);
            continue;
        }

        // Line comment
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                let ch = chars[i];
                advance(&mut i, &mut line, &mut col, ch);
            }
            continue;
        }

        // Block comment
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let (start_line, start_col) = (line, col);
            advance(&mut i, &mut line, &mut col, '/');
            advance(&mut i, &mut line, &mut col, '*');
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    advance(&mut i, &mut line, &mut col, '*');
                    advance(&mut i, &mut line, &mut col, '/');
                    closed = true;
                    break;
                }
                let ch = chars[i];
                advance(&mut i, &mut line, &mut col, ch);
            }
            if !closed {
                return Err(AnalysisError::parse(
                    start_line,
                    start_col,
                    "unterminated block comment",
                ));
            }
            continue;
        }

        // Identifier / keyword
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let (tok_line, tok_col) = (line, col);
            let mut text = String::new();
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                let ch = chars[i];
                text.push(ch);
                advance(&mut i, &mut line, &mut col, ch);
            }
            tokens.push(Token {
                kind: TokenKind::Identifier,
                text,
                line: tok_line,
                col: tok_col,
            });
            continue;
        }

        // Number (decimal or 0x hex, with underscores and exponent)
        if c.is_ascii_digit() {
            let (tok_line, tok_col) = (line, col);
            let mut text = String::new();
            if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                let zero = chars[i];
                text.push(zero);
                advance(&mut i, &mut line, &mut col, zero);
                let x = chars[i];
                text.push(x);
                advance(&mut i, &mut line, &mut col, x);
                while i < chars.len() && (chars[i].is_ascii_hexdigit() || chars[i] == '_') {
                    let ch = chars[i];
                    text.push(ch);
                    advance(&mut i, &mut line, &mut col, ch);
                }
            } else {
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '_'
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E')
                {
                    let ch = chars[i];
                    text.push(ch);
                    advance(&mut i, &mut line, &mut col, ch);
                }
            }
            tokens.push(Token {
                kind: TokenKind::Number,
                text,
                line: tok_line,
                col: tok_col,
            });
            continue;
        }

        // String literal
        if c == '"' || c == '\'' {
            let quote = c;
            let (tok_line, tok_col) = (line, col);
            advance(&mut i, &mut line, &mut col, c);
            let mut text = String::new();
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i];
                if ch == '\\' && i + 1 < chars.len() {
                    text.push(ch);
                    advance(&mut i, &mut line, &mut col, ch);
                    let escaped = chars[i];
                    text.push(escaped);
                    advance(&mut i, &mut line, &mut col, escaped);
                    continue;
                }
                if ch == quote {
                    advance(&mut i, &mut line, &mut col, ch);
                    closed = true;
                    break;
                }
                if ch == '\n' {
                    break;
                }
                text.push(ch);
                advance(&mut i, &mut line, &mut col, ch);
            }
            if !closed {
                return Err(AnalysisError::parse(
                    tok_line,
                    tok_col,
                    "unterminated string literal",
                ));
            }
            tokens.push(Token {
                kind: TokenKind::StringLit,
                text,
                line: tok_line,
                col: tok_col,
            });
            continue;
        }

        // Multi-char operators before single punctuation
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            let (tok_line, tok_col) = (line, col);
            for _ in 0..op.len() {
                let ch = chars[i];
                advance(&mut i, &mut line, &mut col, ch);
            }
            tokens.push(Token {
                kind: TokenKind::Punct,
                text: op.to_string(),
                line: tok_line,
                col: tok_col,
            });
            continue;
        }

        if "{}()[];,.:?=+-*/%<>!&|^~".contains(c) {
            tokens.push(Token {
                kind: TokenKind::Punct,
                text: c.to_string(),
                line,
                col,
            });
            advance(&mut i, &mut line, &mut col, c);
            continue;
        }

        return Err(AnalysisError::parse(
            line,
            col,
            format!("unexpected character `{c}`"),
        ));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple_function() {
        let tokens = tokenize("function withdraw(uint amount) public {}").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["function", "withdraw", "(", "uint", "amount", ")", "public", "{", "}"]
        );
    }

    #[test]
    fn test_tokenize_tracks_positions() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
    }

    #[test]
    fn test_tokenize_compound_operators() {
        let tokens = tokenize("balances[msg.sender] -= amount;").unwrap();
        assert!(tokens.iter().any(|t| t.text == "-="));
    }

    #[test]
    fn test_tokenize_call_options() {
        let tokens = tokenize(r#"msg.sender.call{value: amount}("")"#).unwrap();
        assert!(tokens.iter().any(|t| t.text == "call"));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::StringLit));
    }

    #[test]
    fn test_tokenize_number_forms() {
        let tokens = tokenize("x = 1_000 + 0xFF_a1 + 1e18;").unwrap();
        let numbers: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(numbers, vec!["1_000", "0xFF_a1", "1e18"]);
    }

    #[test]
    fn test_comments_dropped() {
        let tokens = tokenize("a // comment\n/* block */ b").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_unterminated_string_is_parse_error() {
        let err = tokenize("\"oops").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }
}
