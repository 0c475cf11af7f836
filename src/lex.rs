use crate::*;

/// Token kind. Keywords arrive as `Id` and are matched case-insensitively
/// by the parser; identifier text keeps its case.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Id(String),
    Int(i64),
    Float(f64),
    Str(String),
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Times,
    Divide,
    Percent,
    LBra,
    RBra,
    Comma,
    Semi,
    Dot,
    EndOfFile,
}

impl TokenKind {
    /// Short rendering for expected-vs-found diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Id(s) => format!("'{}'", s),
            TokenKind::Int(x) => format!("'{}'", x),
            TokenKind::Float(x) => format!("'{}'", x),
            TokenKind::Str(s) => format!("'{}'", s),
            TokenKind::EndOfFile => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Equal => "=",
            TokenKind::NotEqual => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Times => "*",
            TokenKind::Divide => "/",
            TokenKind::Percent => "%",
            TokenKind::LBra => "(",
            TokenKind::RBra => ")",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Dot => ".",
            _ => "?",
        }
    }
}

/// A lexeme with its source position.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Single-pass scanner over the SQL text.
pub struct Lexer<'a> {
    source: &'a [u8],
    ix: usize,
    cc: u8,
    line: usize,
    column: usize,
}

/// Tokenize the whole input, ending with an EndOfFile token.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut lx = Lexer::new(src);
    let mut out = Vec::new();
    loop {
        let t = lx.next_token()?;
        let done = t.kind == TokenKind::EndOfFile;
        out.push(t);
        if done {
            return Ok(out);
        }
    }
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        let source = src.as_bytes();
        let mut lx = Self {
            source,
            ix: 0,
            cc: 0,
            line: 1,
            column: 0,
        };
        lx.read_char();
        lx
    }

    /// Read a byte, adjusting source line/column.
    fn read_char(&mut self) -> u8 {
        if self.ix >= self.source.len() {
            self.cc = 0;
            self.ix = self.source.len() + 1;
        } else {
            self.cc = self.source[self.ix];
            if self.cc == b'\n' {
                self.line += 1;
                self.column = 0;
            } else if (self.cc & 192) != 128
            // Skip UTF8 continuation bytes.
            {
                self.column += 1;
            }
            self.ix += 1;
        }
        self.cc
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        let mut cc = self.cc;
        'skip_space: loop {
            while cc == b' ' || cc == b'\n' || cc == b'\r' || cc == b'\t' {
                cc = self.read_char();
            }
            let line = self.line;
            let column = self.column;
            let start = self.ix - 1;
            let sc = cc;
            cc = self.read_char();
            let kind = match sc {
                0 => TokenKind::EndOfFile,
                b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                    while cc.is_ascii_alphanumeric() || cc == b'_' {
                        cc = self.read_char();
                    }
                    let text = std::str::from_utf8(&self.source[start..self.ix - 1])
                        .map_err(|_| Error::lexical("invalid UTF-8 in identifier", line, column))?;
                    TokenKind::Id(text.to_string())
                }
                b'0'..=b'9' => {
                    while cc.is_ascii_digit() {
                        cc = self.read_char();
                    }
                    let mut float = false;
                    if cc == b'.' {
                        float = true;
                        cc = self.read_char();
                        while cc.is_ascii_digit() {
                            cc = self.read_char();
                        }
                    }
                    let text = std::str::from_utf8(&self.source[start..self.ix - 1])
                        .expect("digits and dot are ASCII");
                    if float {
                        let x: f64 = text
                            .parse()
                            .map_err(|_| Error::lexical("malformed number", line, column))?;
                        TokenKind::Float(x)
                    } else {
                        let x: i64 = text
                            .parse()
                            .map_err(|_| Error::lexical("integer literal too large", line, column))?;
                        TokenKind::Int(x)
                    }
                }
                quote @ (b'\'' | b'"') => {
                    let mut s = String::new();
                    let mut seg = self.ix - 1;
                    loop {
                        if cc == 0 {
                            return Err(Error::lexical(
                                "missing closing quote for string literal",
                                line,
                                column,
                            ));
                        }
                        if cc == quote {
                            cc = self.read_char();
                            if cc != quote {
                                break;
                            }
                            // Doubled quote stands for one quote character.
                            s.push_str(
                                std::str::from_utf8(&self.source[seg..self.ix - 2]).map_err(
                                    |_| Error::lexical("invalid UTF-8 in string", line, column),
                                )?,
                            );
                            seg = self.ix - 1;
                        }
                        cc = self.read_char();
                    }
                    s.push_str(
                        std::str::from_utf8(&self.source[seg..self.ix - 2])
                            .map_err(|_| Error::lexical("invalid UTF-8 in string", line, column))?,
                    );
                    TokenKind::Str(s)
                }
                b'-' => {
                    if cc == b'-' {
                        // Single-line comment.
                        while cc != b'\n' && cc != 0 {
                            cc = self.read_char();
                        }
                        continue 'skip_space;
                    }
                    TokenKind::Minus
                }
                b'/' => {
                    if cc == b'*' {
                        cc = self.read_char();
                        let mut prev = b'x';
                        while !(cc == b'/' && prev == b'*') {
                            if cc == 0 {
                                return Err(Error::lexical("unterminated comment", line, column));
                            }
                            prev = cc;
                            cc = self.read_char();
                        }
                        cc = self.read_char();
                        continue 'skip_space;
                    }
                    TokenKind::Divide
                }
                b'>' => {
                    if cc == b'=' {
                        self.read_char();
                        TokenKind::GreaterEqual
                    } else {
                        TokenKind::Greater
                    }
                }
                b'<' => {
                    if cc == b'=' {
                        self.read_char();
                        TokenKind::LessEqual
                    } else if cc == b'>' {
                        self.read_char();
                        TokenKind::NotEqual
                    } else {
                        TokenKind::Less
                    }
                }
                b'!' => {
                    if cc == b'=' {
                        self.read_char();
                        TokenKind::NotEqual
                    } else {
                        return Err(Error::lexical("unexpected character '!'", line, column));
                    }
                }
                b'=' => TokenKind::Equal,
                b'+' => TokenKind::Plus,
                b'*' => TokenKind::Times,
                b'%' => TokenKind::Percent,
                b'(' => TokenKind::LBra,
                b')' => TokenKind::RBra,
                b',' => TokenKind::Comma,
                b';' => TokenKind::Semi,
                b'.' => TokenKind::Dot,
                other => {
                    return Err(Error::lexical(
                        format!("illegal character '{}'", other as char),
                        line,
                        column,
                    ))
                }
            };
            return Ok(Token { kind, line, column });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_select() {
        let k = kinds("SELECT name FROM users WHERE age >= 21;");
        assert_eq!(
            k,
            vec![
                TokenKind::Id("SELECT".into()),
                TokenKind::Id("name".into()),
                TokenKind::Id("FROM".into()),
                TokenKind::Id("users".into()),
                TokenKind::Id("WHERE".into()),
                TokenKind::Id("age".into()),
                TokenKind::GreaterEqual,
                TokenKind::Int(21),
                TokenKind::Semi,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn literals_and_comments() {
        let k = kinds("-- leading comment\n1 2.5 'it''s' \"two\" /* block\n comment */ <>");
        assert_eq!(
            k,
            vec![
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::Str("it's".into()),
                TokenKind::Str("two".into()),
                TokenKind::NotEqual,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn positions() {
        let toks = tokenize("SELECT\n  name").unwrap();
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[1].line, toks[1].column), (2, 3));
    }

    #[test]
    fn unterminated_string() {
        let e = tokenize("SELECT 'oops").unwrap_err();
        assert!(matches!(e, Error::Lexical { .. }));
        assert!(e.to_string().contains("closing quote"));
    }

    #[test]
    fn illegal_character() {
        assert!(matches!(tokenize("SELECT @x"), Err(Error::Lexical { .. })));
    }
}
