//! Tenant scoping of SQL text.
//!
//! The [`IdentifierRewriter`] turns SQL written against logical table names
//! (`person`, `family`, ...) into SQL against one tenant's physical tables
//! (`smith_person`, `smith_family`, ...). It works on tokens produced by the
//! pest grammar in `sql.pest`, so string literals, comments and quoted
//! identifiers are opaque and a table name can never match inside a longer
//! identifier such as `person_notes`.
//!
//! Only occurrences in a structural position are rewritten: after `FROM`,
//! `JOIN`, `INTO`, `UPDATE`, `TABLE` (with optional `IF [NOT] EXISTS`),
//! `REFERENCES`, after a comma inside a `FROM` list, after `ON` inside
//! `CREATE INDEX` / `CREATE TRIGGER`, and as the left side of a dotted column
//! reference. `FROM` only counts at statement level or inside a subquery, so
//! `TRIM(x FROM col)` and `IS DISTINCT FROM col` keep their columns. Names
//! bound by a `WITH` clause refer to the common table expression and are not
//! rewritten once bound. Everything else is left alone and reported as
//! [`RewriteDecision::LeftUnscoped`].
//!
//! A query that already mentions `prefix || table` anywhere is treated as
//! scoped and returned unchanged, which makes the rewrite idempotent.

use std::fmt;
use std::sync::Arc;

use pest::Parser;
use pest_derive::Parser;
use tracing::trace;

use crate::error::Degradation;
use crate::tables::TableSet;

#[derive(Parser)]
#[grammar = "sql.pest"]
struct SqlLexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Space,
    Comment,
    StringLiteral,
    QuotedIdentifier,
    Word,
    Number,
    Parameter,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub offset: usize,
}

impl Token<'_> {
    fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Space | TokenKind::Comment)
    }
    fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

/// Splits SQL text into tokens. The grammar accepts any input, so `None` only
/// signals a parser failure, which callers treat as "leave the text alone".
pub fn tokenize(sql: &str) -> Option<Vec<Token<'_>>> {
    let mut pairs = SqlLexer::parse(Rule::sql_text, sql).ok()?;
    let root = pairs.next()?;
    let mut tokens = Vec::new();
    for pair in root.into_inner() {
        let kind = match pair.as_rule() {
            Rule::space => TokenKind::Space,
            Rule::line_comment | Rule::block_comment => TokenKind::Comment,
            Rule::string | Rule::dollar_string => TokenKind::StringLiteral,
            Rule::quoted_ident => TokenKind::QuotedIdentifier,
            Rule::word => TokenKind::Word,
            Rule::number => TokenKind::Number,
            Rule::parameter => TokenKind::Parameter,
            Rule::punct => TokenKind::Punct,
            _ => continue,
        };
        tokens.push(Token {
            kind,
            text: pair.as_str(),
            offset: pair.as_span().start(),
        });
    }
    Some(tokens)
}

/// The structural position a rewritten table name was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    From,
    Join,
    Into,
    Update,
    Table,
    References,
    FromList,
    IndexTarget,
    Dotted,
}

/// Why a table name was seen but not rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    StringLiteral,
    QuotedIdentifier,
    Qualified,
    NoTableContext,
    /// The name is bound by a `WITH` clause of the same statement.
    CommonTableExpression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteDecision {
    AlreadyScoped { marker: String },
    Rewritten { table: String, clause: Clause, offset: usize },
    LeftUnscoped { table: String, offset: usize, reason: SkipReason },
}

impl RewriteDecision {
    /// The non-fatal condition this decision represents, if any.
    pub fn degradation(&self) -> Option<Degradation> {
        match self {
            RewriteDecision::LeftUnscoped {
                reason: SkipReason::CommonTableExpression,
                ..
            } => None,
            RewriteDecision::LeftUnscoped { table, offset, .. } => Some(Degradation::RewriteAmbiguous {
                table: table.clone(),
                offset: *offset,
            }),
            _ => None,
        }
    }
}

pub type RewriteObserver = Arc<dyn Fn(&RewriteDecision) + Send + Sync>;

#[derive(Clone)]
pub struct IdentifierRewriter {
    prefix: String,
    tables: TableSet,
    quote: bool,
    observer: Option<RewriteObserver>,
}

impl fmt::Debug for IdentifierRewriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IdentifierRewriter")
            .field("prefix", &self.prefix)
            .field("tables", &self.tables)
            .field("quote", &self.quote)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl IdentifierRewriter {
    pub fn new(prefix: impl Into<String>, tables: TableSet) -> Self {
        Self {
            prefix: prefix.into(),
            tables,
            quote: false,
            observer: None,
        }
    }
    /// Emit `"prefix_table"` instead of `prefix_table`.
    pub fn quoted(mut self, quote: bool) -> Self {
        self.quote = quote;
        self
    }
    pub fn with_observer(mut self, observer: RewriteObserver) -> Self {
        self.observer = Some(observer);
        self
    }
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
    pub fn tables(&self) -> &TableSet {
        &self.tables
    }

    pub fn rewrite(&self, sql: &str) -> String {
        if self.prefix.is_empty() || self.tables.is_empty() {
            return sql.to_string();
        }
        let Some(tokens) = tokenize(sql) else {
            return sql.to_string();
        };
        if let Some(marker) = self.scoped_marker(&tokens) {
            self.notify(RewriteDecision::AlreadyScoped { marker });
            return sql.to_string();
        }

        let significant: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| token.is_significant())
            .map(|(index, _)| index)
            .collect();
        let mut replaced: Vec<Option<Clause>> = vec![None; tokens.len()];
        let mut tracker = ClauseTracker::new();
        let bindings = common_table_bindings(&tokens, &significant);

        for (position, &index) in significant.iter().enumerate() {
            let token = tokens[index];
            let previous = position.checked_sub(1).map(|p| tokens[significant[p]]);
            match token.kind {
                TokenKind::Word => {
                    if self.tables.contains(token.text) {
                        let next = significant.get(position + 1).map(|&n| tokens[n]);
                        if bindings.iter().any(|binding| binding.shadows(token.text, position)) {
                            self.skip(token, SkipReason::CommonTableExpression);
                        } else if previous.is_some_and(|t| t.is_punct(".")) {
                            self.skip(token, SkipReason::Qualified);
                        } else if next.is_some_and(|t| t.is_punct(".")) {
                            replaced[index] = Some(Clause::Dotted);
                        } else if let Some(clause) = tracker.table_clause(&tokens, &significant, position) {
                            replaced[index] = Some(clause);
                        } else {
                            self.skip(token, SkipReason::NoTableContext);
                        }
                    }
                    tracker.observe_word(token.text, previous);
                }
                TokenKind::QuotedIdentifier => {
                    if self.tables.contains(&unquote(token.text)) {
                        self.skip(token, SkipReason::QuotedIdentifier);
                    }
                }
                TokenKind::StringLiteral => {
                    if let Some(word) = literal_words(token.text).find(|word| self.tables.contains(word)) {
                        self.notify(RewriteDecision::LeftUnscoped {
                            table: word.to_string(),
                            offset: token.offset,
                            reason: SkipReason::StringLiteral,
                        });
                    }
                }
                TokenKind::Punct => tracker.observe_punct(token.text, previous),
                _ => {}
            }
        }

        let mut rewritten = String::with_capacity(sql.len() + self.prefix.len() * 4);
        for (token, clause) in tokens.iter().zip(replaced) {
            match clause {
                Some(clause) => {
                    self.notify(RewriteDecision::Rewritten {
                        table: token.text.to_string(),
                        clause,
                        offset: token.offset,
                    });
                    if self.quote {
                        rewritten.push('"');
                        rewritten.push_str(&self.prefix);
                        rewritten.push_str(token.text);
                        rewritten.push('"');
                    } else {
                        rewritten.push_str(&self.prefix);
                        rewritten.push_str(token.text);
                    }
                }
                None => rewritten.push_str(token.text),
            }
        }
        rewritten
    }

    // The first identifier that already reads `prefix || table`, if any.
    fn scoped_marker(&self, tokens: &[Token]) -> Option<String> {
        tokens.iter().find_map(|token| {
            let name = match token.kind {
                TokenKind::Word => token.text.to_string(),
                TokenKind::QuotedIdentifier => unquote(token.text),
                _ => return None,
            };
            let head = name.get(..self.prefix.len())?;
            let tail = name.get(self.prefix.len()..)?;
            (head.eq_ignore_ascii_case(&self.prefix) && self.tables.contains(tail)).then_some(name)
        })
    }

    fn skip(&self, token: Token, reason: SkipReason) {
        let table = match token.kind {
            TokenKind::QuotedIdentifier => unquote(token.text),
            _ => token.text.to_string(),
        };
        self.notify(RewriteDecision::LeftUnscoped {
            table,
            offset: token.offset,
            reason,
        });
    }

    fn notify(&self, decision: RewriteDecision) {
        trace!(prefix = %self.prefix, ?decision, "rewrite decision");
        if let Some(observer) = &self.observer {
            observer(&decision);
        }
    }
}

/// One-shot convenience around [`IdentifierRewriter`].
pub fn rewrite(sql: &str, prefix: &str, tables: &TableSet) -> String {
    IdentifierRewriter::new(prefix, tables.clone()).rewrite(sql)
}

fn unquote(text: &str) -> String {
    let mut chars = text.chars();
    let Some(open) = chars.next() else {
        return String::new();
    };
    let inner = chars.as_str();
    let inner = inner.strip_suffix(open).unwrap_or(inner);
    match open {
        '"' => inner.replace("\"\"", "\""),
        _ => inner.to_string(),
    }
}

fn literal_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
}

// A name bound by `WITH name AS (...)`, by significant-token position. The
// body of a non-recursive binding still sees the real table.
struct CommonTableBinding {
    name: String,
    defined_at: usize,
    visible_from: usize,
    visible_until: usize,
}

impl CommonTableBinding {
    fn shadows(&self, name: &str, position: usize) -> bool {
        self.name.eq_ignore_ascii_case(name)
            && (position == self.defined_at || (self.visible_from < position && position < self.visible_until))
    }
}

fn common_table_bindings(tokens: &[Token], significant: &[usize]) -> Vec<CommonTableBinding> {
    let at = |p: usize| significant.get(p).map(|&i| tokens[i]);
    let is_keyword = |p: usize, keyword: &str| at(p).is_some_and(|t| t.is_keyword(keyword));
    let is_punct = |p: usize, punct: &str| at(p).is_some_and(|t| t.is_punct(punct));
    let mut bindings = Vec::new();
    for with in (0..significant.len()).filter(|&p| is_keyword(p, "WITH")) {
        let until = (with..significant.len())
            .find(|&p| is_punct(p, ";"))
            .unwrap_or(significant.len());
        let recursive = is_keyword(with + 1, "RECURSIVE");
        let mut name_at = if recursive { with + 2 } else { with + 1 };
        while let Some(name) = at(name_at).filter(|t| t.kind == TokenKind::Word) {
            let mut p = name_at + 1;
            // optional column list
            if is_punct(p, "(") {
                match closing_paren(tokens, significant, p) {
                    Some(close) => p = close + 1,
                    None => break,
                }
            }
            if !is_keyword(p, "AS") {
                break;
            }
            p += 1;
            if is_keyword(p, "NOT") {
                p += 1;
            }
            if is_keyword(p, "MATERIALIZED") {
                p += 1;
            }
            if !is_punct(p, "(") {
                break;
            }
            let Some(close) = closing_paren(tokens, significant, p) else {
                break;
            };
            bindings.push(CommonTableBinding {
                name: name.text.to_string(),
                defined_at: name_at,
                visible_from: if recursive { p } else { close },
                visible_until: until,
            });
            if !is_punct(close + 1, ",") {
                break;
            }
            name_at = close + 2;
        }
    }
    bindings
}

fn closing_paren(tokens: &[Token], significant: &[usize], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (p, &i) in significant.iter().enumerate().skip(open) {
        if tokens[i].is_punct("(") {
            depth += 1;
        } else if tokens[i].is_punct(")") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(p);
            }
        }
    }
    None
}

// One level of parentheses. A statement frame holds a query (the top level,
// a subquery or a parenthesized FROM source); any other frame is an
// expression, where FROM belongs to a function such as TRIM or SUBSTRING.
#[derive(Debug, Clone, Copy)]
struct Frame {
    from_list: bool,
    statement: bool,
    undecided: bool,
}

impl Frame {
    fn query() -> Self {
        Self {
            from_list: false,
            statement: true,
            undecided: false,
        }
    }
}

// Tracks just enough statement structure to tell table positions apart:
// the leading words of the current statement and, per parenthesis depth,
// whether it holds a query and whether we are inside its FROM list.
struct ClauseTracker {
    head: Vec<String>,
    frames: Vec<Frame>,
}

impl ClauseTracker {
    fn new() -> Self {
        Self {
            head: Vec::new(),
            frames: vec![Frame::query()],
        }
    }

    fn observe_word(&mut self, word: &str, previous: Option<Token>) {
        let upper = word.to_ascii_uppercase();
        if let Some(top) = self.frames.last_mut() {
            if top.undecided {
                top.undecided = false;
                top.statement = matches!(upper.as_str(), "SELECT" | "WITH" | "VALUES");
            }
            let in_from = match upper.as_str() {
                "FROM" => Some(top.statement && !previous.is_some_and(|t| t.is_keyword("DISTINCT"))),
                "JOIN" => Some(top.statement),
                "WHERE" | "GROUP" | "ORDER" | "HAVING" | "LIMIT" | "UNION" | "EXCEPT" | "INTERSECT"
                | "ON" | "USING" | "SET" | "VALUES" | "SELECT" | "WINDOW" | "RETURNING" | "WITH" => Some(false),
                _ => None,
            };
            if let Some(in_from) = in_from {
                top.from_list = in_from;
            }
        }
        if self.head.len() < 4 {
            self.head.push(upper);
        }
    }

    fn observe_punct(&mut self, punct: &str, previous: Option<Token>) {
        match punct {
            "(" => {
                let source = previous.is_some_and(|t| {
                    t.is_keyword("FROM") || t.is_keyword("JOIN") || (t.is_punct(",") && self.in_from_list())
                }) && self.in_statement();
                if let Some(top) = self.frames.last_mut() {
                    top.undecided = false;
                }
                self.frames.push(Frame {
                    from_list: false,
                    statement: source,
                    undecided: !source,
                });
            }
            ")" => {
                if self.frames.len() > 1 {
                    self.frames.pop();
                }
            }
            ";" => {
                self.head.clear();
                self.frames = vec![Frame::query()];
            }
            _ => {}
        }
    }

    fn in_from_list(&self) -> bool {
        self.frames.last().is_some_and(|frame| frame.from_list)
    }

    fn in_statement(&self) -> bool {
        self.frames.last().is_some_and(|frame| frame.statement)
    }

    fn defines_index_or_trigger(&self) -> bool {
        self.head.first().is_some_and(|w| w == "CREATE")
            && self.head.iter().any(|w| w == "INDEX" || w == "TRIGGER")
    }

    fn table_clause(&self, tokens: &[Token], significant: &[usize], position: usize) -> Option<Clause> {
        let before = |back: usize| -> Option<Token> {
            position.checked_sub(back).map(|p| tokens[significant[p]])
        };
        let previous = before(1)?;
        if previous.kind == TokenKind::Punct {
            return (previous.text == "," && self.in_from_list()).then_some(Clause::FromList);
        }
        if previous.kind != TokenKind::Word {
            return None;
        }
        match previous.text.to_ascii_uppercase().as_str() {
            "FROM" => {
                let distinct = before(2).is_some_and(|t| t.is_keyword("DISTINCT"));
                (self.in_statement() && !distinct).then_some(Clause::From)
            }
            "JOIN" => self.in_statement().then_some(Clause::Join),
            "INTO" => Some(Clause::Into),
            "UPDATE" => Some(Clause::Update),
            // UPDATE OR REPLACE t, UPDATE OR IGNORE t, ...
            "REPLACE" | "IGNORE" | "ABORT" | "FAIL" | "ROLLBACK" => {
                let conflict = before(2).is_some_and(|t| t.is_keyword("OR"))
                    && before(3).is_some_and(|t| t.is_keyword("UPDATE"));
                conflict.then_some(Clause::Update)
            }
            "TABLE" => Some(Clause::Table),
            "REFERENCES" => Some(Clause::References),
            "ON" => self.defines_index_or_trigger().then_some(Clause::IndexTarget),
            "EXISTS" => {
                // TABLE IF EXISTS t / TABLE IF NOT EXISTS t
                let guarded = match (before(2), before(3), before(4)) {
                    (Some(a), Some(b), _) if a.is_keyword("IF") && b.is_keyword("TABLE") => true,
                    (Some(a), Some(b), Some(c)) => {
                        a.is_keyword("NOT") && b.is_keyword("IF") && c.is_keyword("TABLE")
                    }
                    _ => false,
                };
                guarded.then_some(Clause::Table)
            }
            _ => None,
        }
    }
}
