//! The tiny statement grammar understood by the memory backend.

use dbc_core::{Error, Result, Value};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    SelectOne,
    CreateTable {
        table: String,
        columns: Vec<String>,
        if_not_exists: bool,
    },
    Insert {
        table: String,
        values: Vec<Value>,
    },
    SelectAll {
        table: String,
    },
    Count {
        table: String,
    },
    Delete {
        table: String,
    },
}

impl Statement {
    pub(crate) fn returns_rows(&self) -> bool {
        matches!(
            self,
            Self::SelectOne | Self::SelectAll { .. } | Self::Count { .. }
        )
    }
}

macro_rules! regex {
    ($re:literal) => {{
        #[allow(clippy::unwrap_used)]
        static RE: Lazy<Regex> = Lazy::new(|| Regex::new($re).unwrap());
        &*RE
    }};
}

pub(crate) fn parse(sql: &str) -> Result<Statement> {
    if regex!(r"(?i)^\s*SELECT\s+1\s*;?\s*$").is_match(sql) {
        return Ok(Statement::SelectOne);
    }

    let create =
        regex!(r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(\w+)\s*\((.*)\)\s*;?\s*$");
    if let Some(caps) = create.captures(sql) {
        let columns: Vec<String> = split_list(&caps[3])
            .iter()
            .filter_map(|def| def.split_whitespace().next().map(str::to_lowercase))
            .collect();
        if columns.is_empty() {
            return Err(Error::Query("CREATE TABLE without columns".into()));
        }
        return Ok(Statement::CreateTable {
            table: caps[2].to_lowercase(),
            columns,
            if_not_exists: caps.get(1).is_some(),
        });
    }

    let insert = regex!(r"(?is)^\s*INSERT\s+INTO\s+(\w+)\s+VALUES\s*\((.*)\)\s*;?\s*$");
    if let Some(caps) = insert.captures(sql) {
        let values = split_list(&caps[2])
            .iter()
            .map(|lit| parse_literal(lit))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Statement::Insert {
            table: caps[1].to_lowercase(),
            values,
        });
    }

    if let Some(caps) = regex!(r"(?i)^\s*SELECT\s+\*\s+FROM\s+(\w+)\s*;?\s*$").captures(sql) {
        return Ok(Statement::SelectAll {
            table: caps[1].to_lowercase(),
        });
    }

    let count = regex!(r"(?i)^\s*SELECT\s+COUNT\(\s*\*\s*\)\s+FROM\s+(\w+)\s*;?\s*$");
    if let Some(caps) = count.captures(sql) {
        return Ok(Statement::Count {
            table: caps[1].to_lowercase(),
        });
    }

    if let Some(caps) = regex!(r"(?i)^\s*DELETE\s+FROM\s+(\w+)\s*;?\s*$").captures(sql) {
        return Ok(Statement::Delete {
            table: caps[1].to_lowercase(),
        });
    }

    Err(Error::Query(format!("unsupported statement: {sql}")))
}

/// Split a comma-separated list, ignoring commas inside quotes or parentheses.
fn split_list(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth = 0usize;

    for c in list.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn parse_literal(lit: &str) -> Result<Value> {
    if lit.len() >= 2 && lit.starts_with('\'') && lit.ends_with('\'') {
        return Ok(Value::Text(lit[1..lit.len() - 1].replace("''", "'")));
    }
    if lit.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    if lit.eq_ignore_ascii_case("true") {
        return Ok(Value::Bool(true));
    }
    if lit.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(false));
    }
    if let Ok(i) = lit.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(x) = lit.parse::<f64>() {
        return Ok(Value::Float(x));
    }
    Err(Error::Query(format!("invalid literal: {lit}")))
}

/// Number of `?` placeholders outside string literals.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut in_quote = false;
    sql.chars()
        .filter(|&c| {
            if c == '\'' {
                in_quote = !in_quote;
            }
            c == '?' && !in_quote
        })
        .count()
}

/// Substitute `?` placeholders with SQL literals.
pub(crate) fn bind_placeholders(sql: &str, params: &[Value]) -> Result<String> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut in_quote = false;
    let mut next = params.iter();

    for c in sql.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                out.push(c);
            }
            '?' if !in_quote => {
                let value = next.next().ok_or_else(|| {
                    Error::Query("fewer parameters than placeholders".into())
                })?;
                if let Value::Bytes(_) = value {
                    return Err(Error::Unsupported(
                        "binary parameters in the memory backend".into(),
                    ));
                }
                out.push_str(&value.to_string());
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}
