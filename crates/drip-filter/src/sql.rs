//! Postgres rendering of compiled predicates.
//!
//! The fragment is a `WHERE` condition over the `contacts` table with
//! positional binds (`$1..$n`). Tags, segments and custom properties are
//! resolved with correlated `EXISTS` subqueries against `contact_tags`,
//! `contact_segments` and `contact_properties`.

use std::fmt;

use jiff::Timestamp;
use serde::Serialize;
use uuid::Uuid;

use crate::predicate::{Clause, Operand, Predicate, Target, Test};

/// Escape character used in LIKE patterns.
const LIKE_ESCAPE: char = '\\';

/// A positional bind parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum SqlBind {
    Text(String),
    Float(f64),
    Bool(bool),
    Timestamp(Timestamp),
    TextArray(Vec<String>),
    FloatArray(Vec<f64>),
    UuidArray(Vec<Uuid>),
}

/// SQL condition plus the values of its placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SqlFragment {
    pub sql: String,
    pub binds: Vec<SqlBind>,
}

impl fmt::Display for SqlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

impl Predicate {
    /// Renders the predicate as a Postgres `WHERE` fragment.
    pub fn to_sql(&self) -> SqlFragment {
        let mut renderer = Renderer::default();
        let sql = renderer.predicate(self);
        SqlFragment {
            sql,
            binds: renderer.binds,
        }
    }
}

/// Escapes `%`, `_` and the escape character itself.
pub fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Default)]
struct Renderer {
    binds: Vec<SqlBind>,
}

impl Renderer {
    fn bind(&mut self, bind: SqlBind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Const(true) => "TRUE".to_owned(),
            Predicate::Const(false) => "FALSE".to_owned(),
            Predicate::All(members) => self.join(members, " AND ", "TRUE"),
            Predicate::Any(members) => self.join(members, " OR ", "FALSE"),
            Predicate::Clause(clause) => self.clause(clause),
        }
    }

    fn join(&mut self, members: &[Predicate], separator: &str, empty: &str) -> String {
        if members.is_empty() {
            return empty.to_owned();
        }
        let parts: Vec<String> = members.iter().map(|member| self.predicate(member)).collect();
        format!("({})", parts.join(separator))
    }

    fn clause(&mut self, clause: &Clause) -> String {
        match &clause.target {
            Target::Column(column) => {
                let column = format!("contacts.{}", column.column_name());
                self.present(&column, &clause.test, clause.negated)
            }
            Target::Activity(column) => {
                let column = format!("contacts.{}", column.column_name());
                self.present(&column, &clause.test, clause.negated)
            }
            Target::Membership(membership) => {
                let (table, id_column) = membership.table();
                let ids = match &clause.test {
                    Test::HasAny(ids) => ids.clone(),
                    _ => Vec::new(),
                };
                let ids = self.bind(SqlBind::UuidArray(ids));
                let exists = format!(
                    "EXISTS (SELECT 1 FROM {table} m WHERE m.contact_id = contacts.id \
                     AND m.{id_column} = ANY({ids}))"
                );
                if clause.negated {
                    format!("NOT {exists}")
                } else {
                    exists
                }
            }
            Target::Property { key, kind } => {
                let key = self.bind(SqlBind::Text(key.clone()));
                let column = format!("cp.{}", kind.column());
                let scope = format!(
                    "SELECT 1 FROM contact_properties cp WHERE cp.contact_id = contacts.id \
                     AND cp.key = {key}"
                );
                let test = self.test(&column, &clause.test);
                if clause.negated {
                    format!(
                        "(EXISTS ({scope} AND {column} IS NOT NULL) \
                         AND NOT EXISTS ({scope} AND {test}))"
                    )
                } else {
                    format!("EXISTS ({scope} AND {test})")
                }
            }
        }
    }

    fn present(&mut self, column: &str, test: &Test, negated: bool) -> String {
        let test = self.test(column, test);
        if negated {
            format!("({column} IS NOT NULL AND NOT ({test}))")
        } else {
            test
        }
    }

    fn test(&mut self, column: &str, test: &Test) -> String {
        match test {
            Test::Compare(comparison, operand) => {
                let value = self.operand(operand);
                format!("{column} {} {value}", comparison.sql_operator())
            }
            Test::OneOf(operands) if operands.is_empty() => "FALSE".to_owned(),
            Test::OneOf(operands) => {
                let floats: Option<Vec<f64>> = operands
                    .iter()
                    .map(|operand| match operand {
                        Operand::Float(number) => Some(*number),
                        _ => None,
                    })
                    .collect();
                let bind = match floats {
                    Some(floats) => SqlBind::FloatArray(floats),
                    None => SqlBind::TextArray(operands.iter().map(operand_text).collect()),
                };
                let values = self.bind(bind);
                format!("{column} = ANY({values})")
            }
            Test::StartsWith(needle) => self.like(column, format!("{}%", escape_like(needle))),
            Test::EndsWith(needle) => self.like(column, format!("%{}", escape_like(needle))),
            Test::Contains(needle) => self.like(column, format!("%{}%", escape_like(needle))),
            Test::Within { since, until } => {
                let since = self.bind(SqlBind::Timestamp(*since));
                let until = self.bind(SqlBind::Timestamp(*until));
                format!("{column} BETWEEN {since} AND {until}")
            }
            Test::HasAny(_) => "FALSE".to_owned(),
        }
    }

    fn like(&mut self, column: &str, pattern: String) -> String {
        let pattern = self.bind(SqlBind::Text(pattern));
        format!("{column} ILIKE {pattern} ESCAPE '{LIKE_ESCAPE}'")
    }

    fn operand(&mut self, operand: &Operand) -> String {
        let bind = match operand {
            Operand::Text(text) => SqlBind::Text(text.clone()),
            Operand::Float(number) => SqlBind::Float(*number),
            Operand::Bool(flag) => SqlBind::Bool(*flag),
            Operand::Date(timestamp) => SqlBind::Timestamp(*timestamp),
        };
        self.bind(bind)
    }
}

fn operand_text(operand: &Operand) -> String {
    match operand {
        Operand::Text(text) => text.clone(),
        Operand::Float(number) => number.to_string(),
        Operand::Bool(flag) => flag.to_string(),
        Operand::Date(timestamp) => timestamp.to_string(),
    }
}
