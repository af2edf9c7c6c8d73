//! Graph query compiler that renders pattern trees into Cypher text.
//!
//! Every identifier goes through [`quote_ident`] and every value through
//! [`literal`], so escaping is identical across upsert, segment, count and sum.

use crate::condition::{Aggregate, Literal, Operator, Rollup};
use crate::config::GraphConfig;
use crate::error::CompileError;
use crate::graph_pattern::{EdgeDirection, PatternEdge, PatternNode, PropertyPredicate, Relation};
use crate::request::{GroupTarget, Page, Sort, SortOrder};
use crate::rows::{COUNT_COLUMN, ELEMENT_COLUMN, GROUP_COLUMN, ID_COLUMN, SUM_COLUMN};

const ROOT: &str = "n";
const GROUP_VAR: &str = "g";

/// Delimit a label or property key as an opaque identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Render a literal value. Dates are already epoch milliseconds.
pub fn literal(value: &Literal) -> String {
    match value {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Number(n) => n.to_string(),
        Literal::Text(s) => quote_string(s),
        Literal::Millis(ms) => ms.to_string(),
        Literal::List(items) => {
            let rendered: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

fn comparison_symbol(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Eq => Some("="),
        Operator::NotEq => Some("<>"),
        Operator::Lt => Some("<"),
        Operator::Lte => Some("<="),
        Operator::Gt => Some(">"),
        Operator::Gte => Some(">="),
        _ => None,
    }
}

/// Options for the segment renderer.
#[derive(Debug, Clone, Default)]
pub struct SegmentOptions {
    pub sort: Option<Sort>,
    pub page: Option<Page>,
}

pub struct CypherCompiler {
    config: GraphConfig,
}

impl CypherCompiler {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    fn property(&self, var: &str, key: &str) -> String {
        format!("{}.{}", var, quote_ident(key))
    }

    fn identity(&self, var: &str) -> String {
        self.property(var, &self.config.identity_property)
    }

    fn node_pattern(&self, var: &str, node: &PatternNode) -> String {
        match &node.identity {
            Some(id) => format!(
                "({}:{} {{{}: {}}})",
                var,
                quote_ident(&node.label),
                quote_ident(&self.config.identity_property),
                quote_string(id)
            ),
            None => format!("({}:{})", var, quote_ident(&node.label)),
        }
    }

    fn relationship(&self, relation: &Relation) -> String {
        match relation {
            Relation::Contains => format!("[:{}]", quote_ident(&self.config.contains_relation)),
            Relation::Has { key: Some(key) } => format!(
                "[:{} {{{}: {}}}]",
                quote_ident(&self.config.has_relation),
                quote_ident(&self.config.relation_key_property),
                quote_string(key)
            ),
            Relation::Has { key: None } => format!("[:{}]", quote_ident(&self.config.has_relation)),
        }
    }

    /// `(from)-[rel]->(to:label)` honoring the edge direction.
    fn path(&self, from: &str, relation: &Relation, direction: EdgeDirection, to: &str, label: &str) -> String {
        let rel = self.relationship(relation);
        let target = format!("({}:{})", to, quote_ident(label));
        match direction {
            EdgeDirection::Outgoing => format!("({})-{}->{}", from, rel, target),
            EdgeDirection::Incoming => format!("({})<-{}-{}", from, rel, target),
            EdgeDirection::Either => format!("({})-{}-{}", from, rel, target),
        }
    }

    fn predicate(&self, var: &str, predicate: &PropertyPredicate) -> Result<String, CompileError> {
        let target = self.property(var, &predicate.key);
        let rendered = match (predicate.op, &predicate.value) {
            (Operator::Eq, Literal::Null) => format!("{} IS NULL", target),
            (Operator::NotEq, Literal::Null) => format!("{} IS NOT NULL", target),
            (Operator::In, value) => format!("{} IN {}", target, literal(value)),
            (Operator::NotIn, value) => format!("NOT {} IN {}", target, literal(value)),
            (Operator::StartsWith, value) => format!("{} STARTS WITH {}", target, literal(value)),
            (Operator::EndsWith, value) => format!("{} ENDS WITH {}", target, literal(value)),
            (Operator::Contains, value) => format!("{} CONTAINS {}", target, literal(value)),
            (Operator::Between, Literal::List(bounds)) if bounds.len() == 2 => format!(
                "({} >= {} AND {} <= {})",
                target,
                literal(&bounds[0]),
                target,
                literal(&bounds[1])
            ),
            (Operator::Between, _) => {
                return Err(CompileError::InvalidValue {
                    key: predicate.key.clone(),
                    reason: "between needs two bounds".to_string(),
                })
            }
            (op, value) => {
                // comparison_symbol covers every remaining operator
                let symbol = comparison_symbol(op).unwrap_or("=");
                format!("{} {} {}", target, symbol, literal(value))
            }
        };
        Ok(rendered)
    }

    fn rollup(&self, from: &str, edge: &PatternEdge, rollup: &Rollup, var: &str) -> Result<String, CompileError> {
        let path = self.path(from, &edge.relation, edge.direction, var, &edge.target.label);
        if rollup.value.is_null() {
            return Ok(format!("EXISTS {{ MATCH {} }}", path));
        }
        let values = format!("[{} | {}]", path, self.property(var, &rollup.key));
        let aggregated = match rollup.aggregate {
            Aggregate::Count => format!("size([{} | {}])", path, var),
            Aggregate::Sum => format!("reduce(total = 0, value IN {} | total + coalesce(value, 0))", values),
            Aggregate::Max => format!(
                "reduce(best = null, value IN {} | CASE WHEN best IS NULL OR value > best THEN value ELSE best END)",
                values
            ),
            Aggregate::Min => format!(
                "reduce(best = null, value IN {} | CASE WHEN best IS NULL OR value < best THEN value ELSE best END)",
                values
            ),
        };
        let symbol = comparison_symbol(rollup.op).ok_or_else(|| CompileError::UnsupportedOperator {
            key: rollup.key.clone(),
            op: rollup.op.to_string(),
            kind: "rollup".to_string(),
        })?;
        Ok(format!("{} {} {}", aggregated, symbol, literal(&rollup.value)))
    }

    fn edge_exists(&self, from: &str, edge: &PatternEdge, var: &str) -> Result<String, CompileError> {
        if let Some(rollup) = &edge.rollup {
            return self.rollup(from, edge, rollup, var);
        }
        let path = self.path(from, &edge.relation, edge.direction, var, &edge.target.label);
        let predicates = edge
            .target
            .properties
            .iter()
            .map(|p| self.predicate(var, p))
            .collect::<Result<Vec<_>, _>>()?;
        if predicates.is_empty() {
            Ok(format!("EXISTS {{ MATCH {} }}", path))
        } else {
            Ok(format!("EXISTS {{ MATCH {} WHERE {} }}", path, predicates.join(" AND ")))
        }
    }

    /// Conjunction of property predicates and edge groups on `var`.
    fn conditions(&self, var: &str, node: &PatternNode) -> Result<Vec<String>, CompileError> {
        let mut parts = node
            .properties
            .iter()
            .map(|p| self.predicate(var, p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut counter = 0;
        for group in node.edge_groups() {
            let mut alternatives = Vec::with_capacity(group.len());
            for edge in &group {
                alternatives.push(self.edge_exists(var, edge, &format!("m{}", counter))?);
                counter += 1;
            }
            let combined = if alternatives.len() == 1 {
                alternatives.remove(0)
            } else {
                format!("({})", alternatives.join(" OR "))
            };
            // a group never mixes negated and plain edges
            if group.first().is_some_and(|edge| edge.negated) {
                parts.push(format!("NOT {}", combined));
            } else {
                parts.push(combined);
            }
        }
        Ok(parts)
    }

    fn match_where(&self, node: &PatternNode) -> Result<Vec<String>, CompileError> {
        let mut lines = vec![format!("MATCH {}", self.node_pattern(ROOT, node))];
        let conditions = self.conditions(ROOT, node)?;
        if !conditions.is_empty() {
            lines.push(format!("WHERE {}", conditions.join(" AND ")));
        }
        Ok(lines)
    }

    /// `MATCH` + `WHERE` followed by the clause that binds the group variable.
    fn grouped(&self, node: &PatternNode, target: &GroupTarget) -> Result<(Vec<String>, Option<String>), CompileError> {
        let mut lines = self.match_where(node)?;
        let group = match target {
            GroupTarget::Total => None,
            GroupTarget::Property { key } => Some(self.property(ROOT, key)),
            GroupTarget::Elements { key } => {
                lines.push(format!(
                    "MATCH {}",
                    self.path(ROOT, &Relation::Contains, EdgeDirection::Outgoing, GROUP_VAR, key)
                ));
                Some(self.property(GROUP_VAR, &self.config.element_property))
            }
            GroupTarget::Related { key, ref_id, reverse } => {
                let direction = if *reverse { EdgeDirection::Incoming } else { EdgeDirection::Outgoing };
                let relation = Relation::Has { key: Some(key.clone()) };
                lines.push(format!("MATCH {}", self.path(ROOT, &relation, direction, GROUP_VAR, ref_id)));
                Some(self.identity(GROUP_VAR))
            }
        };
        Ok((lines, group))
    }

    /// Segment: identities of matching nodes, sorted and paged.
    pub fn segment(&self, node: &PatternNode, options: &SegmentOptions) -> Result<String, CompileError> {
        let mut lines = self.match_where(node)?;
        lines.push(format!("RETURN {} AS {}", self.identity(ROOT), ID_COLUMN));

        let order = options.sort.as_ref().map(|s| s.order).unwrap_or_default();
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut order_by = Vec::new();
        if let Some(sort) = options.sort.as_ref().filter(|s| s.key != self.config.identity_property) {
            order_by.push(format!("{} {}", self.property(ROOT, &sort.key), direction));
        }
        order_by.push(format!("{} {}", self.identity(ROOT), direction));
        lines.push(format!("ORDER BY {}", order_by.join(", ")));

        if let Some(page) = options.page {
            lines.push(format!("SKIP {}", page.offset()));
            lines.push(format!("LIMIT {}", page.size));
        }
        Ok(lines.join("\n"))
    }

    /// Unordered identities, for downstream exact-match filtering.
    pub fn ids(&self, node: &PatternNode) -> Result<String, CompileError> {
        let mut lines = self.match_where(node)?;
        lines.push(format!("RETURN {} AS {}", self.identity(ROOT), ID_COLUMN));
        Ok(lines.join("\n"))
    }

    /// Distinct element values of list field `key` over matching nodes.
    pub fn elements(&self, node: &PatternNode, key: &str) -> Result<String, CompileError> {
        let mut lines = self.match_where(node)?;
        lines.push(format!(
            "MATCH {}",
            self.path(ROOT, &Relation::Contains, EdgeDirection::Outgoing, GROUP_VAR, key)
        ));
        lines.push(format!(
            "RETURN DISTINCT {} AS {}",
            self.property(GROUP_VAR, &self.config.element_property),
            ELEMENT_COLUMN
        ));
        Ok(lines.join("\n"))
    }

    pub fn count(&self, node: &PatternNode, target: &GroupTarget) -> Result<String, CompileError> {
        let (mut lines, group) = self.grouped(node, target)?;
        let count = format!("count({}) AS {}", ROOT, COUNT_COLUMN);
        lines.push(match group {
            Some(group) => format!("RETURN {} AS {}, {}", group, quote_ident(GROUP_COLUMN), count),
            None => format!("RETURN {}", count),
        });
        Ok(lines.join("\n"))
    }

    pub fn sum(&self, node: &PatternNode, key: &str, target: &GroupTarget) -> Result<String, CompileError> {
        let (mut lines, group) = self.grouped(node, target)?;
        let sum = format!("sum({}) AS {}", self.property(ROOT, key), SUM_COLUMN);
        lines.push(match group {
            Some(group) => format!("RETURN {} AS {}, {}", group, quote_ident(GROUP_COLUMN), sum),
            None => format!("RETURN {}", sum),
        });
        Ok(lines.join("\n"))
    }

    /// Idempotent write: merge the node by identity, set its properties and
    /// merge one relation per edge.
    pub fn upsert(&self, node: &PatternNode) -> Result<String, CompileError> {
        if node.identity.is_none() {
            return Err(CompileError::MissingIdentity { entity_id: node.label.clone() });
        }
        let mut lines = vec![format!("MERGE {}", self.node_pattern(ROOT, node))];

        let mut assignments = Vec::new();
        for property in &node.properties {
            if property.op != Operator::Eq || property.key == self.config.identity_property {
                return Err(write_unsupported(&property.key, property.op));
            }
            assignments.push(format!("{} = {}", self.property(ROOT, &property.key), literal(&property.value)));
        }
        if !assignments.is_empty() {
            lines.push(format!("SET {}", assignments.join(", ")));
        }

        let mut counter = 0;
        for edge in &node.edges {
            if edge.negated || edge.rollup.is_some() {
                return Err(write_unsupported(&edge.target.label, Operator::NotEq));
            }
            for (key, value) in merge_keys(&edge.target)? {
                let var = format!("m{}", counter);
                counter += 1;
                lines.push(format!(
                    "MERGE ({}:{} {{{}: {}}})",
                    var,
                    quote_ident(&edge.target.label),
                    quote_ident(&key),
                    literal(&value)
                ));
                let rel = self.relationship(&edge.relation);
                lines.push(match edge.direction {
                    EdgeDirection::Outgoing => format!("MERGE ({})-{}->({})", ROOT, rel, var),
                    EdgeDirection::Incoming => format!("MERGE ({})<-{}-({})", ROOT, rel, var),
                    EdgeDirection::Either => format!("MERGE ({})-{}-({})", ROOT, rel, var),
                });
            }
        }
        Ok(lines.join("\n"))
    }
}

fn write_unsupported(key: &str, op: Operator) -> CompileError {
    CompileError::UnsupportedOperator {
        key: key.to_string(),
        op: op.to_string(),
        kind: "upsert".to_string(),
    }
}

/// The identifying key/value pairs of an edge target in a write.
fn merge_keys(target: &PatternNode) -> Result<Vec<(String, Literal)>, CompileError> {
    match target.properties.as_slice() {
        [PropertyPredicate { key, op: Operator::Eq, value }] => Ok(vec![(key.clone(), value.clone())]),
        [PropertyPredicate { key, op: Operator::In, value: Literal::List(values) }] => {
            Ok(values.iter().map(|v| (key.clone(), v.clone())).collect())
        }
        [first, ..] => Err(write_unsupported(&first.key, first.op)),
        [] => Err(CompileError::MissingIdentity { entity_id: target.label.clone() }),
    }
}
