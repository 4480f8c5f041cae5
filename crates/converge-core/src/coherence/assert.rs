//! The coherence assertion language.
//!
//! Deliberately tiny: a comparison between `result`, `baseline`, or a
//! numeric literal, optionally combined with `AND` / `OR`
//! (case-insensitive, no nesting). Parsed into a small AST and
//! evaluated against a fixed environment, never delegated to a host
//! expression evaluator.

use thiserror::Error;

/// Errors raised when an assertion string does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AssertError {
    /// The assertion is empty.
    #[error("empty assertion")]
    Empty,

    /// No comparison operator found in a clause.
    #[error("no comparison operator in clause: {clause}")]
    MissingOperator {
        /// The offending clause.
        clause: String,
    },

    /// An operand is neither `result`, `baseline`, nor a number.
    #[error("unrecognized operand: {token}")]
    BadOperand {
        /// The offending token.
        token: String,
    },

    /// `AND` and `OR` cannot be mixed without nesting, which the
    /// grammar does not have.
    #[error("cannot mix AND and OR in one assertion")]
    MixedConnectives,
}

/// A comparison operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// The probe's parsed numeric output.
    Result,
    /// The stored baseline for this question.
    Baseline,
    /// A numeric literal.
    Literal(f64),
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A single comparison clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Left operand.
    pub lhs: Operand,
    /// Operator.
    pub op: Op,
    /// Right operand.
    pub rhs: Operand,
}

/// A parsed assertion: one clause or a flat conjunction/disjunction.
#[derive(Debug, Clone, PartialEq)]
pub enum Assertion {
    /// A single comparison.
    Single(Comparison),
    /// All clauses must hold.
    All(Vec<Comparison>),
    /// Any clause must hold.
    Any(Vec<Comparison>),
}

impl Assertion {
    /// Parses an assertion string.
    ///
    /// # Errors
    ///
    /// Returns [`AssertError`] on grammar violations.
    pub fn parse(text: &str) -> Result<Self, AssertError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssertError::Empty);
        }

        let has_and = contains_connective(text, "AND");
        let has_or = contains_connective(text, "OR");
        if has_and && has_or {
            return Err(AssertError::MixedConnectives);
        }

        if has_and || has_or {
            let connective = if has_and { "AND" } else { "OR" };
            let clauses = split_connective(text, connective)
                .into_iter()
                .map(|clause| parse_comparison(&clause))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(if has_and {
                Self::All(clauses)
            } else {
                Self::Any(clauses)
            });
        }

        Ok(Self::Single(parse_comparison(text)?))
    }

    /// Evaluates against the probe result and the stored baseline.
    ///
    /// A clause referencing `baseline` passes when no baseline is
    /// stored yet (first-run permissive).
    #[must_use]
    pub fn evaluate(&self, result: f64, baseline: Option<f64>) -> bool {
        match self {
            Self::Single(clause) => eval_clause(clause, result, baseline),
            Self::All(clauses) => clauses.iter().all(|c| eval_clause(c, result, baseline)),
            Self::Any(clauses) => clauses.iter().any(|c| eval_clause(c, result, baseline)),
        }
    }

    /// True when any clause references the baseline.
    #[must_use]
    pub fn references_baseline(&self) -> bool {
        let refers = |c: &Comparison| {
            c.lhs == Operand::Baseline || c.rhs == Operand::Baseline
        };
        match self {
            Self::Single(clause) => refers(clause),
            Self::All(clauses) | Self::Any(clauses) => clauses.iter().any(refers),
        }
    }
}

fn eval_clause(clause: &Comparison, result: f64, baseline: Option<f64>) -> bool {
    let resolve = |operand: Operand| -> Option<f64> {
        match operand {
            Operand::Result => Some(result),
            Operand::Baseline => baseline,
            Operand::Literal(value) => Some(value),
        }
    };
    let (Some(lhs), Some(rhs)) = (resolve(clause.lhs), resolve(clause.rhs)) else {
        // Baseline referenced but not yet stored.
        return true;
    };
    match clause.op {
        Op::Eq => (lhs - rhs).abs() < f64::EPSILON,
        Op::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        Op::Lt => lhs < rhs,
        Op::Le => lhs <= rhs,
        Op::Gt => lhs > rhs,
        Op::Ge => lhs >= rhs,
    }
}

fn parse_comparison(clause: &str) -> Result<Comparison, AssertError> {
    let clause = clause.trim();
    // Two-character operators first so "<=" is not read as "<".
    const OPS: [(&str, Op); 6] = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        (">", Op::Gt),
        ("<", Op::Lt),
    ];
    for (symbol, op) in OPS {
        if let Some(pos) = clause.find(symbol) {
            let lhs = parse_operand(clause[..pos].trim())?;
            let rhs = parse_operand(clause[pos + symbol.len()..].trim())?;
            return Ok(Comparison { lhs, op, rhs });
        }
    }
    Err(AssertError::MissingOperator {
        clause: clause.to_string(),
    })
}

fn parse_operand(token: &str) -> Result<Operand, AssertError> {
    match token {
        "result" => Ok(Operand::Result),
        "baseline" => Ok(Operand::Baseline),
        _ => token
            .parse::<f64>()
            .map(Operand::Literal)
            .map_err(|_| AssertError::BadOperand {
                token: token.to_string(),
            }),
    }
}

fn contains_connective(text: &str, connective: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains(&format!(" {connective} "))
}

fn split_connective(text: &str, connective: &str) -> Vec<String> {
    let needle = format!(" {connective} ");
    let upper = text.to_uppercase();
    let mut clauses = Vec::new();
    let mut start = 0;
    while let Some(pos) = upper[start..].find(&needle) {
        let at = start + pos;
        clauses.push(text[start..at].to_string());
        start = at + needle.len();
    }
    clauses.push(text[start..].to_string());
    clauses
}
