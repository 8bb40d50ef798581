//! Query AST and builder.
//!
//! A query is a disjunction of AND-chains. [`where_field`] starts the
//! first chain, [`Query::and`] extends it, and [`Query::or`] attaches a
//! whole independent query as another branch. Skip, limit, sort, reverse,
//! and an explicit index pin apply to the query as a whole.
//!
//! ```rust,ignore
//! use rockhold::{where_field, KEY};
//!
//! let q = where_field("category").eq("vehicle")
//!     .and("id").ge(10)
//!     .or(where_field(KEY).le(3))
//!     .sort_by(&["name"])
//!     .limit(20);
//! ```
//!
//! ## Misuse panics
//!
//! Misassembled queries are caller bugs and panic rather than erroring:
//! calling `skip` or `limit` twice, a `skip`/`limit` inside an `or`
//! branch, `match_fn` on the key pseudo-field, and a dotted path passed to
//! `index()`. Unknown fields and indexes are runtime conditions (they
//! depend on the stored type) and surface as errors when the query runs.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::executor::RecordAccess;

/// Pseudo-field addressing the record key instead of a record field.
pub const KEY: &str = "";

/// Predicate attached by [`FieldClause::match_fn`].
pub type MatchFn = Arc<dyn Fn(&RecordAccess<'_>) -> Result<bool> + Send + Sync>;

/// A value a criterion compares against: either a literal or another field
/// of the record under evaluation.
#[derive(Clone)]
pub(crate) enum Operand {
    Literal(Value),
    Field(String),
}

/// A single field test.
#[derive(Clone)]
pub(crate) enum Test {
    Eq(Operand),
    Ne(Operand),
    Gt(Operand),
    Ge(Operand),
    Lt(Operand),
    Le(Operand),
    In(Vec<Value>),
    IsNil,
    Matches(Regex),
    HasPrefix(String),
    HasSuffix(String),
    MatchFn(MatchFn),
}

/// A (field, test) pair. An empty field name addresses the record key.
#[derive(Clone)]
pub(crate) struct Criterion {
    pub field: String,
    pub test: Test,
}

impl Criterion {
    pub fn is_key(&self) -> bool {
        self.field == KEY
    }
}

/// A composable query over one record type.
#[derive(Clone, Default)]
pub struct Query {
    pub(crate) criteria: Vec<Criterion>,
    pub(crate) index: Option<String>,
    pub(crate) ors: Vec<Query>,
    pub(crate) skip: Option<usize>,
    pub(crate) limit: Option<usize>,
    pub(crate) sort: Vec<String>,
    pub(crate) reverse: bool,
}

/// Starts a query with a criterion on `field`.
///
/// Dotted paths reach into nested structs; [`KEY`] addresses the record
/// key.
pub fn where_field(field: impl Into<String>) -> FieldClause {
    Query::all().and(field)
}

impl Query {
    /// A query matching every record of the type.
    pub fn all() -> Query {
        Query::default()
    }

    /// Adds another criterion to the current AND-chain.
    pub fn and(self, field: impl Into<String>) -> FieldClause {
        FieldClause {
            query: self,
            field: field.into(),
        }
    }

    /// Disjoins another query. Results are the union of both, deduplicated
    /// by record key.
    pub fn or(mut self, other: Query) -> Query {
        assert!(
            other.skip.is_none() && other.limit.is_none(),
            "skip and limit belong on the outermost query, not inside or()"
        );
        self.ors.push(other);
        self
    }

    /// Pins the index that drives the scan for this chain.
    pub fn index(mut self, name: impl Into<String>) -> Query {
        let name = name.into();
        assert!(
            !name.contains('.'),
            "index() takes an index name, not a nested field path"
        );
        self.index = Some(name);
        self
    }

    /// Skips the first `n` post-processed results. May be set once, on the
    /// outermost query only.
    pub fn skip(mut self, n: usize) -> Query {
        assert!(self.skip.is_none(), "skip may only be set once per query");
        self.skip = Some(n);
        self
    }

    /// Caps the number of post-processed results. May be set once, on the
    /// outermost query only.
    pub fn limit(mut self, n: usize) -> Query {
        assert!(self.limit.is_none(), "limit may only be set once per query");
        self.limit = Some(n);
        self
    }

    /// Sorts results by the given fields, in order, before skip and limit
    /// apply.
    pub fn sort_by(mut self, fields: &[&str]) -> Query {
        self.sort.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Reverses the result order.
    pub fn reverse(mut self) -> Query {
        self.reverse = true;
        self
    }
}

/// A query under construction, waiting for the test on its current field.
pub struct FieldClause {
    query: Query,
    field: String,
}

impl FieldClause {
    fn push(mut self, test: Test) -> Query {
        self.query.criteria.push(Criterion {
            field: self.field,
            test,
        });
        self.query
    }

    fn literal(value: impl Serialize) -> Operand {
        Operand::Literal(
            serde_json::to_value(value).expect("query literal must serialize to a value"),
        )
    }

    /// Field equals the value.
    pub fn eq(self, value: impl Serialize) -> Query {
        self.push(Test::Eq(Self::literal(value)))
    }

    /// Field does not equal the value.
    pub fn ne(self, value: impl Serialize) -> Query {
        self.push(Test::Ne(Self::literal(value)))
    }

    /// Field is greater than the value.
    pub fn gt(self, value: impl Serialize) -> Query {
        self.push(Test::Gt(Self::literal(value)))
    }

    /// Field is greater than or equal to the value.
    pub fn ge(self, value: impl Serialize) -> Query {
        self.push(Test::Ge(Self::literal(value)))
    }

    /// Field is less than the value.
    pub fn lt(self, value: impl Serialize) -> Query {
        self.push(Test::Lt(Self::literal(value)))
    }

    /// Field is less than or equal to the value.
    pub fn le(self, value: impl Serialize) -> Query {
        self.push(Test::Le(Self::literal(value)))
    }

    /// Field equals another field of the same record.
    pub fn eq_field(self, other: impl Into<String>) -> Query {
        self.push(Test::Eq(Operand::Field(other.into())))
    }

    /// Field does not equal another field of the same record.
    pub fn ne_field(self, other: impl Into<String>) -> Query {
        self.push(Test::Ne(Operand::Field(other.into())))
    }

    /// Field is greater than another field of the same record.
    pub fn gt_field(self, other: impl Into<String>) -> Query {
        self.push(Test::Gt(Operand::Field(other.into())))
    }

    /// Field is greater than or equal to another field of the same record.
    pub fn ge_field(self, other: impl Into<String>) -> Query {
        self.push(Test::Ge(Operand::Field(other.into())))
    }

    /// Field is less than another field of the same record.
    pub fn lt_field(self, other: impl Into<String>) -> Query {
        self.push(Test::Lt(Operand::Field(other.into())))
    }

    /// Field is less than or equal to another field of the same record.
    pub fn le_field(self, other: impl Into<String>) -> Query {
        self.push(Test::Le(Operand::Field(other.into())))
    }

    /// Field equals any of the values.
    pub fn any_of<V: Serialize>(self, values: &[V]) -> Query {
        let values = values
            .iter()
            .map(|v| serde_json::to_value(v).expect("query literal must serialize to a value"))
            .collect();
        self.push(Test::In(values))
    }

    /// Field is absent (null).
    pub fn is_nil(self) -> Query {
        self.push(Test::IsNil)
    }

    /// Field is a string matching the regular expression.
    pub fn matches(self, re: Regex) -> Query {
        self.push(Test::Matches(re))
    }

    /// Field is a string with the given prefix.
    pub fn has_prefix(self, prefix: impl Into<String>) -> Query {
        self.push(Test::HasPrefix(prefix.into()))
    }

    /// Field is a string with the given suffix.
    pub fn has_suffix(self, suffix: impl Into<String>) -> Query {
        self.push(Test::HasSuffix(suffix.into()))
    }

    /// Field matches an arbitrary predicate.
    ///
    /// The predicate receives a [`RecordAccess`] with the current field
    /// value, the whole record, and sub-query entry points that run in the
    /// outer query's snapshot.
    pub fn match_fn(
        self,
        f: impl Fn(&RecordAccess<'_>) -> Result<bool> + Send + Sync + 'static,
    ) -> Query {
        assert!(
            self.field != KEY,
            "match_fn cannot be applied to the key pseudo-field"
        );
        self.push(Test::MatchFn(Arc::new(f)))
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, operand: &Operand) -> fmt::Result {
    match operand {
        Operand::Literal(v) => fmt_value(f, v),
        Operand::Field(name) => write!(f, "field {name}"),
    }
}

fn fmt_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "{s}"),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for criterion in &self.criteria {
            let field: &str = if criterion.is_key() {
                "Key"
            } else {
                &criterion.field
            };
            write!(f, "\t{field} ")?;
            match &criterion.test {
                Test::Eq(op) => {
                    write!(f, "== ")?;
                    fmt_operand(f, op)?;
                }
                Test::Ne(op) => {
                    write!(f, "!= ")?;
                    fmt_operand(f, op)?;
                }
                Test::Gt(op) => {
                    write!(f, "> ")?;
                    fmt_operand(f, op)?;
                }
                Test::Ge(op) => {
                    write!(f, ">= ")?;
                    fmt_operand(f, op)?;
                }
                Test::Lt(op) => {
                    write!(f, "< ")?;
                    fmt_operand(f, op)?;
                }
                Test::Le(op) => {
                    write!(f, "<= ")?;
                    fmt_operand(f, op)?;
                }
                Test::In(values) => {
                    write!(f, "in [")?;
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            write!(f, " ")?;
                        }
                        fmt_value(f, v)?;
                    }
                    write!(f, "]")?;
                }
                Test::IsNil => write!(f, "is nil")?,
                Test::Matches(re) => {
                    write!(f, "matches the regular expression {re}")?;
                }
                Test::HasPrefix(p) => write!(f, "starts with {p}")?,
                Test::HasSuffix(s) => write!(f, "ends with {s}")?,
                Test::MatchFn(_) => write!(f, "matches the function")?,
            }
            writeln!(f)?;
        }

        if let Some(index) = &self.index {
            writeln!(f, "Using Index [{index}]")?;
        }
        if let Some(skip) = self.skip {
            writeln!(f, "Skip {skip}")?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "Limit {limit}")?;
        }
        for or in &self.ors {
            writeln!(f, "Or")?;
            write!(f, "{or}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query[\n{self}]")
    }
}
