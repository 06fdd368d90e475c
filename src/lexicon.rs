//! Concept lexicon: subject domain -> vocabulary terms.
//!
//! Built once (from the built-in table or from the `[lexicon]` section of the
//! TOML config) and shared read-only across sessions.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{error, info};

/// Built-in table used when the config supplies none.
const BUILTIN: &[(&str, &[&str])] = &[
  ("algebra", &[
    "variable", "equation", "coefficient", "constant", "expression", "term", "isolate",
    "inverse operation", "both sides", "substitute", "solve", "unknown", "linear", "inequality",
  ]),
  ("arithmetic", &[
    "add", "addition", "subtract", "subtraction", "multiply", "multiplication", "divide",
    "division", "sum", "difference", "product", "quotient", "order of operations", "negative",
  ]),
  ("fractions", &[
    "fraction", "numerator", "denominator", "ratio", "proportion", "percent", "decimal",
    "common denominator",
  ]),
  ("geometry", &[
    "angle", "triangle", "area", "perimeter", "radius", "diameter", "circumference",
    "hypotenuse", "parallel", "perpendicular", "volume",
  ]),
  ("functions", &[
    "function", "slope", "intercept", "graph", "domain", "range", "input", "output",
  ]),
];

struct Domain {
  name: String,
  terms: Vec<String>,
  pattern: Regex,
}

/// Immutable domain -> terms table with precompiled matchers.
pub struct ConceptLexicon {
  domains: Vec<Domain>,
}

impl ConceptLexicon {
  pub fn builtin() -> Self {
    let table: BTreeMap<String, Vec<String>> = BUILTIN
      .iter()
      .map(|(d, terms)| (d.to_string(), terms.iter().map(|t| t.to_string()).collect()))
      .collect();
    Self::from_table(&table)
  }

  /// Build from a config table. Domains with no usable terms are skipped.
  pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Self {
    let mut domains = Vec::with_capacity(table.len());
    for (name, raw_terms) in table {
      let mut terms: Vec<String> = raw_terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
      terms.sort();
      terms.dedup();
      if terms.is_empty() {
        continue;
      }

      // Longest first so multi-word terms win over their prefixes.
      let mut alts = terms.clone();
      alts.sort_by(|a, b| b.len().cmp(&a.len()));
      let alternation = alts.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
      match Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)) {
        Ok(pattern) => domains.push(Domain { name: name.clone(), terms, pattern }),
        Err(e) => error!(target: "socratic", domain = %name, error = %e, "Skipping lexicon domain: bad pattern"),
      }
    }
    info!(target: "socratic", domains = domains.len(), "Concept lexicon ready");
    Self { domains }
  }

  pub fn domain_names(&self) -> impl Iterator<Item = &str> {
    self.domains.iter().map(|d| d.name.as_str())
  }

  #[cfg(test)]
  pub fn terms(&self, domain: &str) -> Option<&[String]> {
    self.domains.iter().find(|d| d.name == domain).map(|d| d.terms.as_slice())
  }

  /// Concept tags mentioned in `text`, in mention order, each term once.
  pub fn extract(&self, text: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();
    for domain in &self.domains {
      for m in domain.pattern.find_iter(text) {
        hits.push((m.start(), m.as_str().to_lowercase()));
      }
    }
    hits.sort_by_key(|(pos, _)| *pos);

    let mut out: Vec<String> = Vec::with_capacity(hits.len());
    for (_, term) in hits {
      if !out.contains(&term) {
        out.push(term);
      }
    }
    out
  }
}
