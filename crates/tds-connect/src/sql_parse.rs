//! Lightweight SQL statement inspection.
//!
//! Rewriting a batched INSERT through bulk copy requires the raw target
//! table name from the statement text. The scanner here understands just
//! enough T-SQL lexing to find it: block and line comments anywhere,
//! `[bracketed]` identifiers with `]]` escapes, and `"quoted"`
//! identifiers with `""` escapes. The returned name is raw: quoting and
//! escapes are preserved exactly as written.

/// Extract the target table name from an INSERT statement.
///
/// Returns the raw (possibly multi-part, possibly quoted) name, or
/// `None` when the statement is not an INSERT or the name cannot be
/// scanned unambiguously.
#[must_use]
pub fn parse_insert_table_name(sql: &str) -> Option<String> {
    let mut scanner = Scanner::new(sql);

    scanner.skip_ignorable();
    if !scanner.consume_keyword("INSERT") {
        return None;
    }
    scanner.skip_ignorable();
    // INTO is optional.
    scanner.consume_keyword("INTO");
    scanner.skip_ignorable();

    scanner.scan_object_name()
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Skip whitespace and comments in any interleaving.
    fn skip_ignorable(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    while self.pos < self.chars.len() {
                        if self.peek() == Some('*') && self.peek_at(1) == Some('/') {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some('-') if self.peek_at(1) == Some('-') => {
                    while let Some(c) = self.peek() {
                        self.pos += 1;
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// Consume a keyword case-insensitively. Returns whether it matched.
    fn consume_keyword(&mut self, keyword: &str) -> bool {
        let len = keyword.len();
        if self.pos + len > self.chars.len() {
            return false;
        }
        let candidate: String = self.chars[self.pos..self.pos + len].iter().collect();
        if !candidate.eq_ignore_ascii_case(keyword) {
            return false;
        }
        // Must end at a word boundary.
        if let Some(next) = self.chars.get(self.pos + len) {
            if next.is_alphanumeric() || *next == '_' {
                return false;
            }
        }
        self.pos += len;
        true
    }

    /// Scan a (possibly multi-part) object name, raw.
    fn scan_object_name(&mut self) -> Option<String> {
        let mut name = String::new();

        loop {
            self.skip_ignorable();
            let part = match self.peek()? {
                '[' => self.scan_bracketed()?,
                '"' => self.scan_quoted()?,
                c if c.is_alphanumeric() || c == '_' || c == '#' || c == '@' => {
                    self.scan_bare()
                }
                _ => return None,
            };
            name.push_str(&part);

            // A dot continues a multi-part name; comments may surround it.
            let checkpoint = self.pos;
            self.skip_ignorable();
            if self.peek() == Some('.') {
                self.pos += 1;
                name.push('.');
            } else {
                self.pos = checkpoint;
                break;
            }
        }

        (!name.is_empty()).then_some(name)
    }

    /// `[name]] with escapes]`; `]]` stays in the raw output.
    fn scan_bracketed(&mut self) -> Option<String> {
        let mut out = String::from('[');
        self.pos += 1; // opening bracket

        loop {
            match self.peek()? {
                ']' if self.peek_at(1) == Some(']') => {
                    out.push_str("]]");
                    self.pos += 2;
                }
                ']' => {
                    out.push(']');
                    self.pos += 1;
                    return Some(out);
                }
                c => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    /// `"name"" with escapes"`; `""` stays in the raw output.
    fn scan_quoted(&mut self) -> Option<String> {
        let mut out = String::from('"');
        self.pos += 1;

        loop {
            match self.peek()? {
                '"' if self.peek_at(1) == Some('"') => {
                    out.push_str("\"\"");
                    self.pos += 2;
                }
                '"' => {
                    out.push('"');
                    self.pos += 1;
                    return Some(out);
                }
                c => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn scan_bare(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '#' || c == '@' || c == '$' {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_insert() {
        assert_eq!(
            parse_insert_table_name("INSERT INTO users VALUES (1)").as_deref(),
            Some("users")
        );
    }

    #[test]
    fn insert_without_into() {
        assert_eq!(
            parse_insert_table_name("insert users values (1)").as_deref(),
            Some("users")
        );
    }

    #[test]
    fn bracketed_name_with_escaped_brackets() {
        assert_eq!(
            parse_insert_table_name("INSERT INTO [Peter[]]Table] VALUES ('a')").as_deref(),
            Some("[Peter[]]Table]")
        );
    }

    #[test]
    fn quoted_name_with_escaped_quotes() {
        assert_eq!(
            parse_insert_table_name(r#"INSERT INTO "Peter""""Table" VALUES ('a')"#).as_deref(),
            Some(r#""Peter""""Table""#)
        );
    }

    #[test]
    fn block_comments_in_arbitrary_positions() {
        assert_eq!(
            parse_insert_table_name(
                "/*leading*/ INSERT /*mid*/ INTO /*before name*/ [Peter[]]Table] /*after*/ VALUES (1)"
            )
            .as_deref(),
            Some("[Peter[]]Table]")
        );
    }

    #[test]
    fn line_comments() {
        assert_eq!(
            parse_insert_table_name("-- comment\nINSERT INTO t1 -- trailing\nVALUES (1)")
                .as_deref(),
            Some("t1")
        );
    }

    #[test]
    fn multi_part_name() {
        assert_eq!(
            parse_insert_table_name("INSERT INTO db1.dbo.t1 VALUES (1)").as_deref(),
            Some("db1.dbo.t1")
        );
        assert_eq!(
            parse_insert_table_name("INSERT INTO [db 1].[dbo].[t 1] VALUES (1)").as_deref(),
            Some("[db 1].[dbo].[t 1]")
        );
    }

    #[test]
    fn comments_around_dots() {
        assert_eq!(
            parse_insert_table_name("INSERT INTO dbo/*c*/./*c*/t1 VALUES (1)").as_deref(),
            Some("dbo.t1")
        );
    }

    #[test]
    fn temp_table() {
        assert_eq!(
            parse_insert_table_name("INSERT INTO #temp VALUES (1)").as_deref(),
            Some("#temp")
        );
    }

    #[test]
    fn non_insert_returns_none() {
        assert!(parse_insert_table_name("SELECT * FROM t").is_none());
        assert!(parse_insert_table_name("INSERTX INTO t VALUES (1)").is_none());
        assert!(parse_insert_table_name("").is_none());
    }

    #[test]
    fn unterminated_bracket_returns_none() {
        assert!(parse_insert_table_name("INSERT INTO [broken VALUES (1)").is_none());
    }
}
