//! SQL script handling
//!
//! Splitting scripts into single statements and telling schema-definition
//! statements apart from data manipulation. The distinction drives the
//! rollback outcome on backends where DDL commits implicitly.

use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

use crate::backends::SqlDialect;

/// Kind of a single SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Creates, alters or drops a schema object
    Schema,
    /// Reads or writes rows
    Data,
}

impl StatementKind {
    pub fn is_schema(&self) -> bool {
        matches!(self, StatementKind::Schema)
    }
}

/// Classify a single statement.
///
/// The leading keyword is checked as well, so vendor extensions the parser
/// does not know (`CREATE EVENT`, `RENAME TABLE`) still count as schema.
pub fn classify_statement(sql: &str, dialect: SqlDialect) -> StatementKind {
    let parsed_schema = Parser::parse_sql(parser_dialect(dialect), sql)
        .ok()
        .map(|statements| statements.iter().any(is_schema_statement))
        .unwrap_or(false);

    if parsed_schema || classify_by_keyword(sql).is_schema() {
        StatementKind::Schema
    } else {
        StatementKind::Data
    }
}

static POSTGRES: PostgreSqlDialect = PostgreSqlDialect {};
static MYSQL: MySqlDialect = MySqlDialect {};
static SQLITE: SQLiteDialect = SQLiteDialect {};

fn parser_dialect(dialect: SqlDialect) -> &'static dyn Dialect {
    match dialect {
        SqlDialect::PostgreSQL => &POSTGRES,
        SqlDialect::MySQL => &MYSQL,
        SqlDialect::SQLite => &SQLITE,
    }
}

fn is_schema_statement(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::CreateTable { .. }
            | Statement::CreateVirtualTable { .. }
            | Statement::CreateIndex { .. }
            | Statement::CreateView { .. }
            | Statement::CreateSchema { .. }
            | Statement::CreateDatabase { .. }
            | Statement::CreateSequence { .. }
            | Statement::CreateFunction { .. }
            | Statement::AlterTable { .. }
            | Statement::AlterIndex { .. }
            | Statement::AlterView { .. }
            | Statement::Drop { .. }
            | Statement::DropFunction { .. }
            | Statement::Truncate { .. }
    )
}

const SCHEMA_KEYWORDS: [&str; 5] = ["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME"];

fn classify_by_keyword(sql: &str) -> StatementKind {
    let first = strip_leading_comments(sql)
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    if SCHEMA_KEYWORDS.contains(&first.as_str()) {
        StatementKind::Schema
    } else {
        StatementKind::Data
    }
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(line) = rest.strip_prefix("--") {
            rest = line.split_once('\n').map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = block.split_once("*/").map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else {
            return rest;
        }
    }
}

/// Split a script into statements on top-level semicolons.
///
/// The script is tokenized with the backend's dialect, so semicolons inside
/// string literals (including backslash escapes on MySQL), quoted
/// identifiers, comments and dollar-quoted bodies do not end a statement.
/// Comment-only fragments are dropped. A script the tokenizer rejects is
/// returned whole and left for the server to report.
pub fn split_sql_statements(sql: &str, dialect: SqlDialect) -> Vec<String> {
    let mut statements = Vec::new();

    let tokens = match Tokenizer::new(parser_dialect(dialect), sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::debug!(error = %err, "Script not tokenized, running it as one statement");
            push_statement(&mut statements, sql);
            return statements;
        }
    };

    let lines = line_starts(sql);
    let mut start = 0;
    for token in tokens.iter().filter(|token| token.token == Token::SemiColon) {
        let end = byte_offset(sql, &lines, token.location);
        push_statement(&mut statements, &sql[start..end]);
        start = end + 1;
    }

    push_statement(&mut statements, &sql[start..]);
    statements
}

fn line_starts(sql: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(index, _)| index + 1))
        .collect()
}

/// Byte offset of a tokenizer location (1-based line, 1-based char column)
fn byte_offset(sql: &str, lines: &[usize], location: Location) -> usize {
    let line_start = lines
        .get((location.line as usize).saturating_sub(1))
        .copied()
        .unwrap_or(sql.len());
    let column = (location.column as usize).saturating_sub(1);

    sql[line_start..]
        .char_indices()
        .nth(column)
        .map(|(index, _)| line_start + index)
        .unwrap_or(sql.len())
}

fn push_statement(statements: &mut Vec<String>, fragment: &str) {
    let statement = fragment.trim();
    if !strip_leading_comments(statement).is_empty() {
        statements.push(statement.to_string());
    }
}
