//! Store-agnostic predicate AST and in-memory evaluation.
//!
//! A [`Predicate`] is produced by [`compile`](crate::compile) and can either
//! be evaluated against anything implementing [`Subject`] or rendered into a
//! SQL fragment with [`Predicate::to_sql`].

use std::borrow::Cow;
use std::cmp::Ordering;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use uuid::Uuid;

use crate::model::PropertyKind;

/// Text column on the contact record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ContactColumn {
    Email,
    FirstName,
    LastName,
    Phone,
    Status,
    Source,
}

impl ContactColumn {
    /// Returns the column name in the `contacts` table.
    #[inline]
    pub fn column_name(self) -> &'static str {
        self.into()
    }
}

/// Activity timestamp column on the contact record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ActivityColumn {
    LastOpenedAt,
    LastClickedAt,
    LastSentAt,
}

impl ActivityColumn {
    /// Returns the column name in the `contacts` table.
    #[inline]
    pub fn column_name(self) -> &'static str {
        self.into()
    }
}

/// Id set a contact can be a member of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Membership {
    Tags,
    Segments,
}

impl Membership {
    /// Returns the join table and its id column.
    #[inline]
    pub fn table(self) -> (&'static str, &'static str) {
        match self {
            Self::Tags => ("contact_tags", "tag_id"),
            Self::Segments => ("contact_segments", "segment_id"),
        }
    }
}

/// Stored value of a custom contact property.
///
/// Strings always decode as [`Text`](Self::Text); dates are read from text
/// only when the declared kind asks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Float(f64),
    List(Vec<String>),
    Text(String),
    Date(Timestamp),
}

impl PropertyValue {
    /// Returns every textual rendering of the value (one per list element).
    pub fn texts(&self) -> Vec<Cow<'_, str>> {
        match self {
            Self::Text(text) => vec![Cow::Borrowed(text.as_str())],
            Self::List(items) => items.iter().map(|item| Cow::Borrowed(item.as_str())).collect(),
            Self::Float(number) => vec![Cow::Owned(number.to_string())],
            Self::Boolean(flag) => vec![Cow::Owned(flag.to_string())],
            Self::Date(timestamp) => vec![Cow::Owned(timestamp.to_string())],
        }
    }

    /// Coerces the value into operands of the declared kind.
    ///
    /// Values that cannot be read as `kind` are dropped, so a property holding
    /// `"n/a"` never matches a float comparison.
    pub fn operands(&self, kind: PropertyKind) -> Vec<Operand> {
        match (kind, self) {
            (PropertyKind::Float, Self::Float(number)) => vec![Operand::Float(*number)],
            (PropertyKind::Boolean, Self::Boolean(flag)) => vec![Operand::Bool(*flag)],
            (PropertyKind::Date, Self::Date(timestamp)) => vec![Operand::Date(*timestamp)],
            (PropertyKind::Text, _) => self
                .texts()
                .into_iter()
                .map(|text| Operand::Text(text.into_owned()))
                .collect(),
            (PropertyKind::Float, _) => self
                .texts()
                .iter()
                .filter_map(|text| text.trim().parse().ok().map(Operand::Float))
                .collect(),
            (PropertyKind::Boolean, _) => self
                .texts()
                .iter()
                .filter_map(|text| text.trim().parse().ok().map(Operand::Bool))
                .collect(),
            (PropertyKind::Date, _) => self
                .texts()
                .iter()
                .filter_map(|text| text.trim().parse().ok().map(Operand::Date))
                .collect(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Timestamp> for PropertyValue {
    fn from(value: Timestamp) -> Self {
        Self::Date(value)
    }
}

/// Anything a predicate can be evaluated against.
pub trait Subject {
    /// Returns a text column, `None` when unset.
    fn column(&self, column: ContactColumn) -> Option<Cow<'_, str>>;

    /// Returns an activity timestamp, `None` when the activity never happened.
    fn activity(&self, column: ActivityColumn) -> Option<Timestamp>;

    /// Returns whether the subject is a member of `id` in the given set.
    fn has_member(&self, membership: Membership, id: &Uuid) -> bool;

    /// Returns a custom property value, `None` when unset.
    fn property(&self, key: &str) -> Option<&PropertyValue>;
}

/// Typed operand of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    Float(f64),
    Bool(bool),
    Date(Timestamp),
}

impl Operand {
    /// Compares two operands of the same type; mixed types are incomparable.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    fn as_date(&self) -> Option<Timestamp> {
        match self {
            Self::Date(timestamp) => Some(*timestamp),
            _ => None,
        }
    }
}

/// Ordering comparison; `ne` is expressed as a negated `Eq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Comparison {
    /// Returns whether `ordering` (candidate relative to operand) satisfies the comparison.
    #[inline]
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::Gt => ordering.is_gt(),
            Self::Lt => ordering.is_lt(),
            Self::Gte => ordering.is_ge(),
            Self::Lte => ordering.is_le(),
        }
    }

    /// Returns the SQL operator.
    #[inline]
    pub fn sql_operator(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

/// What a clause reads from the subject.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Column(ContactColumn),
    Activity(ActivityColumn),
    Membership(Membership),
    Property { key: String, kind: PropertyKind },
}

/// Positive test applied to the value(s) read by a [`Target`].
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Compare(Comparison, Operand),
    OneOf(Vec<Operand>),
    /// Case-insensitive prefix match.
    StartsWith(String),
    /// Case-insensitive suffix match.
    EndsWith(String),
    /// Case-insensitive substring match.
    Contains(String),
    /// Inclusive on both bounds.
    Within { since: Timestamp, until: Timestamp },
    HasAny(Vec<Uuid>),
}

impl Test {
    fn matches(&self, candidate: &Operand) -> bool {
        match self {
            Self::Compare(comparison, operand) => candidate
                .compare(operand)
                .is_some_and(|ordering| comparison.holds(ordering)),
            Self::OneOf(operands) => operands
                .iter()
                .any(|operand| candidate.compare(operand).is_some_and(Ordering::is_eq)),
            Self::StartsWith(needle) => candidate
                .as_text()
                .is_some_and(|text| text.to_lowercase().starts_with(&needle.to_lowercase())),
            Self::EndsWith(needle) => candidate
                .as_text()
                .is_some_and(|text| text.to_lowercase().ends_with(&needle.to_lowercase())),
            Self::Contains(needle) => candidate
                .as_text()
                .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase())),
            Self::Within { since, until } => candidate
                .as_date()
                .is_some_and(|timestamp| *since <= timestamp && timestamp <= *until),
            Self::HasAny(_) => false,
        }
    }
}

/// A leaf of the predicate tree.
///
/// A negated clause still requires the target value to be present, except
/// for membership sets where an empty set is a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub target: Target,
    pub test: Test,
    pub negated: bool,
}

impl Clause {
    /// Creates a positive clause.
    pub fn new(target: Target, test: Test) -> Self {
        Self {
            target,
            test,
            negated: false,
        }
    }

    /// Creates a negated clause.
    pub fn negated(target: Target, test: Test) -> Self {
        Self {
            target,
            test,
            negated: true,
        }
    }

    /// Evaluates the clause against a subject.
    pub fn evaluate<S: Subject + ?Sized>(&self, subject: &S) -> bool {
        if let (Target::Membership(membership), Test::HasAny(ids)) = (&self.target, &self.test) {
            let hit = ids.iter().any(|id| subject.has_member(*membership, id));
            return hit != self.negated;
        }

        let candidates = self.candidates(subject);
        if candidates.is_empty() {
            return false;
        }

        let hit = candidates.iter().any(|candidate| self.test.matches(candidate));
        hit != self.negated
    }

    fn candidates<S: Subject + ?Sized>(&self, subject: &S) -> Vec<Operand> {
        match &self.target {
            Target::Column(column) => subject
                .column(*column)
                .map(|value| Operand::Text(value.into_owned()))
                .into_iter()
                .collect(),
            Target::Activity(column) => subject
                .activity(*column)
                .map(Operand::Date)
                .into_iter()
                .collect(),
            Target::Membership(_) => Vec::new(),
            Target::Property { key, kind } => subject
                .property(key)
                .map(|value| value.operands(*kind))
                .unwrap_or_default(),
        }
    }
}

/// Compiled boolean expression over contacts.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    /// Conjunction; true when empty.
    All(Vec<Predicate>),
    /// Disjunction; false when empty.
    Any(Vec<Predicate>),
    Clause(Clause),
}

impl Predicate {
    /// Conjunction, collapsing a single member into itself.
    pub fn all(mut members: Vec<Predicate>) -> Self {
        if members.len() == 1 {
            return members.remove(0);
        }
        Self::All(members)
    }

    /// Disjunction, collapsing a single member into itself.
    pub fn any(mut members: Vec<Predicate>) -> Self {
        if members.len() == 1 {
            return members.remove(0);
        }
        Self::Any(members)
    }

    /// Evaluates the predicate against a subject.
    pub fn evaluate<S: Subject + ?Sized>(&self, subject: &S) -> bool {
        match self {
            Self::Const(value) => *value,
            Self::All(members) => members.iter().all(|member| member.evaluate(subject)),
            Self::Any(members) => members.iter().any(|member| member.evaluate(subject)),
            Self::Clause(clause) => clause.evaluate(subject),
        }
    }

    /// Returns the number of leaf clauses.
    pub fn clause_count(&self) -> usize {
        match self {
            Self::Const(_) => 0,
            Self::All(members) | Self::Any(members) => {
                members.iter().map(Predicate::clause_count).sum()
            }
            Self::Clause(_) => 1,
        }
    }
}

impl From<Clause> for Predicate {
    fn from(clause: Clause) -> Self {
        Self::Clause(clause)
    }
}
