use crate::types::MODULE_SCOPE;

/// Line range of one `def` or `class` block
#[derive(Debug, Clone, PartialEq)]
struct Scope {
    start: u32,
    end: u32,
    /// Dotted path, e.g. `Model.save`
    name: String,
}

/// Maps source lines to the innermost enclosing function or class.
///
/// Built from an indentation scan rather than a full parse: blocks open at a
/// `def`/`class` statement and close at the next logical line indented at or
/// left of it. Blank lines, comments, bracketed continuations and
/// triple-quoted strings never close a block.
#[derive(Debug, Default)]
pub struct ScopeMap {
    /// Sorted innermost first
    scopes: Vec<Scope>,
}

impl ScopeMap {
    pub fn parse(source: &str) -> Self {
        let mut lexer = LineState::default();
        let mut open: Vec<(usize, Scope)> = Vec::new();
        let mut scopes = Vec::new();
        let mut last_code_line = 0;

        for (index, line) in source.lines().enumerate() {
            let row = index as u32 + 1;
            let stripped = line.trim_start();
            let logical_start = lexer.at_logical_start();

            if logical_start && (stripped.is_empty() || stripped.starts_with('#')) {
                continue;
            }

            if logical_start {
                let indent = indent_width(line);
                while open.last().is_some_and(|(depth, _)| *depth >= indent) {
                    if let Some((_, mut scope)) = open.pop() {
                        scope.end = last_code_line;
                        scopes.push(scope);
                    }
                }
                if let Some(name) = block_name(stripped) {
                    let name = match open.last() {
                        Some((_, parent)) => format!("{}.{}", parent.name, name),
                        None => name.to_string(),
                    };
                    open.push((
                        indent,
                        Scope {
                            start: row,
                            end: row,
                            name,
                        },
                    ));
                }
            }

            lexer.scan(line);
            if !stripped.is_empty() {
                last_code_line = row;
            }
        }

        while let Some((_, mut scope)) = open.pop() {
            scope.end = last_code_line;
            scopes.push(scope);
        }

        scopes.sort_by_key(|s| s.end - s.start);
        Self { scopes }
    }

    /// Innermost scope containing `row`, or `<module>` for top-level code
    pub fn scope_for(&self, row: u32) -> &str {
        self.scopes
            .iter()
            .find(|s| (s.start..=s.end).contains(&row))
            .map_or(MODULE_SCOPE, |s| s.name.as_str())
    }
}

/// Name declared by a `def`, `async def` or `class` statement
fn block_name(stripped: &str) -> Option<&str> {
    let rest = stripped.strip_prefix("async ").map_or(stripped, str::trim_start);
    let rest = rest
        .strip_prefix("def ")
        .or_else(|| rest.strip_prefix("class "))?
        .trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// Leading whitespace width, tabs advancing to the next multiple of 8
fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

/// Lexical state carried from one physical line to the next
#[derive(Debug, Default)]
struct LineState {
    brackets: usize,
    triple_quote: Option<u8>,
    backslash: bool,
}

impl LineState {
    fn at_logical_start(&self) -> bool {
        self.brackets == 0 && self.triple_quote.is_none() && !self.backslash
    }

    fn scan(&mut self, line: &str) {
        let bytes = line.as_bytes();
        let mut i = 0;
        self.backslash = false;
        while i < bytes.len() {
            if let Some(quote) = self.triple_quote {
                if bytes[i] == b'\\' {
                    i += 2;
                } else if bytes[i..].starts_with(&[quote; 3]) {
                    self.triple_quote = None;
                    i += 3;
                } else {
                    i += 1;
                }
                continue;
            }
            match bytes[i] {
                b'#' => return,
                quote @ (b'"' | b'\'') => {
                    if bytes[i..].starts_with(&[quote; 3]) {
                        self.triple_quote = Some(quote);
                        i += 3;
                    } else {
                        i += 1;
                        while i < bytes.len() && bytes[i] != quote {
                            i += if bytes[i] == b'\\' { 2 } else { 1 };
                        }
                        i += 1;
                    }
                }
                b'(' | b'[' | b'{' => {
                    self.brackets += 1;
                    i += 1;
                }
                b')' | b']' | b'}' => {
                    self.brackets = self.brackets.saturating_sub(1);
                    i += 1;
                }
                b'\\' if i + 1 == bytes.len() => {
                    self.backslash = true;
                    i += 1;
                }
                _ => i += 1,
            }
        }
    }
}
