//! Fact model for instances and solutions.
//!
//! # Overview
//!
//! Everything the solving engine consumes or reports is expressed as ground
//! [`Fact`]s:
//! - An [`Instance`] holds the facts of a preprocessed problem (`node`,
//!   `arc`, `demand`, `month`, `vehicle`, `available`) together with the
//!   planning `horizon` constant.
//! - A [`Model`] holds the visible facts of one solution plus its
//!   [`CostVector`].
//!
//! The text codec reads and writes the declarative fact language: one
//! statement per `.`-terminated sentence, `%` line comments and `%* *%`
//! block comments, `#const name=value.` declarations. Parsing is driven by
//! the pest grammar in `facts.pest`.

use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Statistics tree reported by the engine, serialized with sorted keys.
pub type Statistics = serde_json::Map<String, serde_json::Value>;

/// Predicate names an instance may contain.
///
/// Arities are not checked: preprocessing decides the argument layout.
pub const INSTANCE_PREDICATES: [&str; 6] = ["node", "arc", "demand", "month", "vehicle", "available"];

/// Name of the planning horizon constant.
pub const HORIZON_CONSTANT: &str = "horizon";

/// Errors raised while reading facts or instances.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("statement at line {line} is not ground: {statement}")]
    NotGround { line: usize, statement: String },
    #[error("unexpected predicate {name}/{arity} in instance")]
    Schema { name: String, arity: usize },
    #[error("at most 26 duplicates can be marked, got {0}")]
    Duplicates(u32),
}

pub type Result<T> = std::result::Result<T, FactError>;

/// A single fact argument.
///
/// Variant order is significant: it defines the total order used to sort
/// facts (`none` < integers < strings < terms).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Argument {
    /// The `none` sentinel.
    None,
    Integer(i64),
    String(String),
    /// A nested term; zero-argument terms are symbolic constants.
    Term(Fact),
}

impl Argument {
    /// Creates a symbolic constant such as `v1`.
    pub fn symbol(name: impl Into<String>) -> Self {
        Argument::Term(Fact::constant(name))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Argument::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Argument::Integer(value)
    }
}

impl From<Fact> for Argument {
    fn from(fact: Fact) -> Self {
        Argument::Term(fact)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::None => write!(f, "none"),
            Argument::Integer(value) => write!(f, "{}", value),
            Argument::String(value) => {
                write!(f, "\"")?;
                for c in value.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "\"")
            }
            Argument::Term(fact) => write!(f, "{}", fact),
        }
    }
}

/// An immutable named tuple of arguments.
///
/// Facts order by name first, then by their arguments.
///
/// # Examples
///
/// ```
/// use fleet_scheduling::facts::{Argument, Fact};
///
/// let arc = Fact::new("arc", vec![Argument::symbol("a"), Argument::symbol("b"), 12.into()]);
/// assert_eq!(arc.to_string(), "arc(a,b,12)");
/// assert_eq!(arc.arity(), 3);
///
/// let parsed: Fact = "arc(a,b,12)".parse().unwrap();
/// assert_eq!(parsed, arc);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fact {
    name: String,
    arguments: Vec<Argument>,
}

impl Fact {
    pub fn new(name: impl Into<String>, arguments: Vec<Argument>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Creates a fact without arguments.
    pub fn constant(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Returns a fact with the same arguments under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Fact {
        Fact::new(name, self.arguments.clone())
    }

    /// Returns the integer argument at `index`, if there is one.
    pub fn integer(&self, index: usize) -> Option<i64> {
        self.arguments.get(index).and_then(Argument::as_integer)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.arguments.is_empty() {
            return Ok(());
        }
        write!(f, "(")?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", argument)?;
        }
        write!(f, ")")
    }
}

impl Serialize for Fact {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::str::FromStr for Fact {
    type Err = FactError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let fact = FactParser::parse(Rule::fact, text)
            .map_err(syntax_error)?
            .next()
            .ok_or_else(|| malformed(1, text))?;
        let term = fact.into_inner().next().ok_or_else(|| malformed(1, text))?;
        build_fact(1, text.trim_end_matches('.'), term)
    }
}

/// Renames an integer identifier for duplicate `index` (1-based).
///
/// With more than one duplicate, identifier `n` of duplicate `k` becomes the
/// constant `<k-th letter><n>`; otherwise the argument is unchanged. Returns
/// `None` when `index` has no letter.
///
/// ```
/// use fleet_scheduling::facts::{duplicate_identifier, Argument};
///
/// assert_eq!(duplicate_identifier(&Argument::Integer(3), 2, 2), Some(Argument::symbol("b3")));
/// assert_eq!(duplicate_identifier(&Argument::Integer(3), 1, 1), Some(Argument::Integer(3)));
/// ```
pub fn duplicate_identifier(argument: &Argument, index: u32, duplicates: u32) -> Option<Argument> {
    if duplicates <= 1 {
        return Some(argument.clone());
    }
    match argument {
        Argument::Integer(n) => {
            if !(1..=26).contains(&index) {
                return None;
            }
            let letter = (b'a' + (index - 1) as u8) as char;
            Some(Argument::symbol(format!("{}{}", letter, n)))
        }
        other => Some(other.clone()),
    }
}

/// One numeric optimization criterion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Criterion {
    Integer(i64),
    Real(f64),
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Integer(value) => write!(f, "{}", value),
            Criterion::Real(value) => write!(f, "{}", value),
        }
    }
}

/// Ordered optimization criteria of a model.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CostVector(Vec<Criterion>);

impl CostVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_integers(values: impl IntoIterator<Item = i64>) -> Self {
        Self(values.into_iter().map(Criterion::Integer).collect())
    }

    pub fn push(&mut self, criterion: Criterion) {
        self.0.push(criterion);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Criterion] {
        &self.0
    }
}

impl fmt::Display for CostVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, criterion) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", criterion)?;
        }
        Ok(())
    }
}

/// A solution reported by the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    /// Model number within its solve call (1-based).
    pub number: u64,
    /// Visible facts, sorted.
    pub facts: BTreeSet<Fact>,
    pub cost: CostVector,
    /// Time since search started.
    pub elapsed: Duration,
}

impl Model {
    pub fn new(number: u64, facts: impl IntoIterator<Item = Fact>, cost: CostVector, elapsed: Duration) -> Self {
        Self {
            number,
            facts: facts.into_iter().collect(),
            cost,
            elapsed,
        }
    }

    /// Renders one `fact.` line per fact in sort order.
    pub fn render(&self) -> String {
        self.facts.iter().map(|fact| format!("{}.\n", fact)).collect()
    }
}

/// A parsed program statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Fact(Fact),
    Constant { name: String, value: Argument },
    /// A rule or directive, kept verbatim.
    Other(String),
}

#[derive(Parser)]
#[grammar = "facts.pest"]
struct FactParser;

/// Parses program text into statements.
///
/// Ground facts and `#const` declarations are decoded; rules and other
/// directives are kept as text after a structural check (terminated
/// statements, balanced parentheses, closed strings and comments).
pub fn parse_program(text: &str) -> Result<Vec<Statement>> {
    Ok(parse_statements(text)?
        .into_iter()
        .map(|(_, statement)| statement)
        .collect())
}

/// Parses program text into `(line, statement)` pairs.
fn parse_statements(text: &str) -> Result<Vec<(usize, Statement)>> {
    let program = FactParser::parse(Rule::program, text)
        .map_err(syntax_error)?
        .next()
        .ok_or_else(|| malformed(1, text))?;

    let mut statements = Vec::new();
    for pair in program.into_inner() {
        let line = pair.as_span().start_pos().line_col().0;
        let source = pair.as_str().trim_end_matches('.').trim();
        let statement = match pair.as_rule() {
            Rule::constant => {
                let mut inner = pair.into_inner();
                let name = inner.next().ok_or_else(|| malformed(line, source))?;
                let value = inner.next().ok_or_else(|| malformed(line, source))?;
                Statement::Constant {
                    name: name.as_str().to_string(),
                    value: build_argument(line, source, value)?,
                }
            }
            Rule::fact_statement => {
                let term = pair.into_inner().next().ok_or_else(|| malformed(line, source))?;
                Statement::Fact(build_fact(line, source, term)?)
            }
            Rule::other => {
                let body = pair.into_inner().next().ok_or_else(|| malformed(line, source))?;
                Statement::Other(body.as_str().to_string())
            }
            Rule::EOI => continue,
            _ => return Err(malformed(line, source)),
        };
        statements.push((line, statement));
    }
    Ok(statements)
}

fn syntax_error(error: pest::error::Error<Rule>) -> FactError {
    let line = match error.line_col {
        LineColLocation::Pos((line, _)) => line,
        LineColLocation::Span((line, _), _) => line,
    };
    FactError::Syntax {
        line,
        message: error.variant.message().into_owned(),
    }
}

fn malformed(line: usize, source: &str) -> FactError {
    FactError::Syntax {
        line,
        message: format!("malformed statement `{}`", source),
    }
}

fn build_fact(line: usize, source: &str, term: Pair<'_, Rule>) -> Result<Fact> {
    let mut inner = term.into_inner();
    let name = inner.next().ok_or_else(|| malformed(line, source))?.as_str();
    let arguments = match inner.next() {
        Some(arguments) => arguments
            .into_inner()
            .map(|argument| build_argument(line, source, argument))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(Fact::new(name, arguments))
}

fn build_argument(line: usize, source: &str, pair: Pair<'_, Rule>) -> Result<Argument> {
    match pair.as_rule() {
        Rule::integer => pair.as_str().parse::<i64>().map(Argument::Integer).map_err(|_| FactError::Syntax {
            line,
            message: format!("invalid integer `{}` in `{}`", pair.as_str(), source),
        }),
        Rule::string => {
            let raw = pair.into_inner().next().map(|inner| inner.as_str()).unwrap_or_default();
            Ok(Argument::String(unescape(raw)))
        }
        Rule::term if pair.as_str() == "none" => Ok(Argument::None),
        Rule::term => build_fact(line, source, pair).map(Argument::Term),
        Rule::variable => Err(FactError::NotGround {
            line,
            statement: source.to_string(),
        }),
        _ => Err(malformed(line, source)),
    }
}

fn unescape(raw: &str) -> String {
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some(escaped) => value.push(escaped),
            None => {}
        }
    }
    value
}

/// A preprocessed problem instance.
///
/// # Examples
///
/// ```
/// use fleet_scheduling::facts::Instance;
///
/// let instance = Instance::parse(
///     "#const horizon=8.\n\
///      month(7,0,4). month(8,4,8).\n\
///      vehicle(v1,40). available(v1,7).",
/// )
/// .unwrap();
///
/// assert_eq!(instance.horizon(), Some(8));
/// assert_eq!(instance.months(), vec![7, 8]);
/// assert_eq!(instance.count("vehicle"), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instance {
    constants: BTreeMap<String, Argument>,
    facts: BTreeSet<Fact>,
}

impl Instance {
    /// Parses an instance, rejecting rules and unknown predicates.
    pub fn parse(text: &str) -> Result<Self> {
        let mut instance = Instance::default();
        for (line, statement) in parse_statements(text)? {
            match statement {
                Statement::Fact(fact) => instance.insert(fact)?,
                Statement::Constant { name, value } => {
                    instance.constants.insert(name, value);
                }
                Statement::Other(text) => {
                    return Err(FactError::Syntax {
                        line,
                        message: format!("rules are not allowed in an instance: `{}`", text),
                    })
                }
            }
        }
        Ok(instance)
    }

    /// Builds an instance from facts, validating predicate names.
    pub fn from_facts(facts: impl IntoIterator<Item = Fact>) -> Result<Self> {
        let mut instance = Instance::default();
        for fact in facts {
            instance.insert(fact)?;
        }
        Ok(instance)
    }

    fn insert(&mut self, fact: Fact) -> Result<()> {
        if !INSTANCE_PREDICATES.contains(&fact.name()) {
            return Err(FactError::Schema {
                name: fact.name().to_string(),
                arity: fact.arity(),
            });
        }
        self.facts.insert(fact);
        Ok(())
    }

    /// Declares a constant, replacing any previous value.
    pub fn set_constant(&mut self, name: impl Into<String>, value: Argument) {
        self.constants.insert(name.into(), value);
    }

    pub fn constant(&self, name: &str) -> Option<&Argument> {
        self.constants.get(name)
    }

    pub fn constants(&self) -> impl Iterator<Item = (&str, &Argument)> {
        self.constants.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// The planning horizon: the declared constant, else the latest month end.
    pub fn horizon(&self) -> Option<i64> {
        self.constants
            .get(HORIZON_CONSTANT)
            .and_then(Argument::as_integer)
            .or_else(|| self.predicate("month").filter_map(|m| m.integer(2)).max())
    }

    /// Month identifiers in ascending order.
    pub fn months(&self) -> Vec<i64> {
        let months: BTreeSet<i64> = self.predicate("month").filter_map(|m| m.integer(0)).collect();
        months.into_iter().collect()
    }

    pub fn predicate<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.facts.iter().filter(move |fact| fact.name() == name)
    }

    pub fn count(&self, name: &str) -> usize {
        self.predicate(name).count()
    }

    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Renders the instance as program text: constants, then sorted facts.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for (name, value) in &self.constants {
            text.push_str(&format!("#const {}={}.\n", name, value));
        }
        for fact in &self.facts {
            text.push_str(&format!("{}.\n", fact));
        }
        text
    }
}
