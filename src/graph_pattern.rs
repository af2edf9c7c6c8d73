//! Graph Pattern Builder: turns an entity id plus conditions into a tree of
//! pattern nodes and edges for the graph backend.
//!
//! Properties stay on the node they constrain. Lists become `contains` edges to
//! element nodes, references become `has` edges to the referenced entity.
//! Edges built from the same condition share a `group` and are alternatives of
//! each other (any element / any container matches).

use crate::condition::{
    Condition, ConditionVisitor, IdSet, Leaf, ListCondition, Literal, Operator, OtherCondition,
    ReferenceCondition, Rollup, SourceCondition, Target,
};
use crate::config::GraphConfig;
use crate::error::CompileError;
use crate::schema::SchemaLookup;

/// A direct predicate on a node property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPredicate {
    pub key: String,
    pub op: Operator,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    /// List membership.
    Contains,
    /// Reference through field `key`; `None` matches any reference field.
    Has { key: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
    Either,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternEdge {
    pub relation: Relation,
    pub direction: EdgeDirection,
    /// Edges sharing a group are OR-combined.
    pub group: usize,
    /// The whole group is negated.
    pub negated: bool,
    /// Aggregate comparison over the targets instead of a per-target filter.
    pub rollup: Option<Rollup>,
    pub target: PatternNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    pub label: String,
    /// Set for point lookups and writes; unset for segmentation.
    pub identity: Option<String>,
    pub properties: Vec<PropertyPredicate>,
    pub edges: Vec<PatternEdge>,
}

impl PatternNode {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            identity: None,
            properties: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Edges grouped by their `group`, in first-seen order.
    pub fn edge_groups(&self) -> Vec<Vec<&PatternEdge>> {
        let mut groups: Vec<(usize, Vec<&PatternEdge>)> = Vec::new();
        for edge in &self.edges {
            match groups.iter_mut().find(|(group, _)| *group == edge.group) {
                Some((_, edges)) => edges.push(edge),
                None => groups.push((edge.group, vec![edge])),
            }
        }
        groups.into_iter().map(|(_, edges)| edges).collect()
    }
}

pub struct PatternBuilder<'a> {
    schema: &'a dyn SchemaLookup,
    config: &'a GraphConfig,
}

impl<'a> PatternBuilder<'a> {
    pub fn new(schema: &'a dyn SchemaLookup, config: &'a GraphConfig) -> Self {
        Self { schema, config }
    }

    pub fn build(
        &self,
        entity_id: &str,
        identity: Option<&str>,
        conditions: &[Condition],
    ) -> Result<PatternNode, CompileError> {
        let mut root = PatternNode::new(entity_id);
        root.identity = identity.map(str::to_string);

        let mut visitor = NodeVisitor {
            builder: self,
            node: &mut root,
            next_group: 0,
        };
        for condition in conditions {
            condition.accept(&mut visitor)?;
        }
        Ok(root)
    }
}

struct NodeVisitor<'b, 'a> {
    builder: &'b PatternBuilder<'a>,
    node: &'b mut PatternNode,
    next_group: usize,
}

impl NodeVisitor<'_, '_> {
    fn group(&mut self) -> usize {
        let group = self.next_group;
        self.next_group += 1;
        group
    }

    fn identity_predicate(&self, op: Operator, ids: &[String]) -> PropertyPredicate {
        PropertyPredicate {
            key: self.builder.config.identity_property.clone(),
            op,
            value: Literal::List(ids.iter().cloned().map(Literal::Text).collect()),
        }
    }
}

impl ConditionVisitor for NodeVisitor<'_, '_> {
    type Output = ();

    fn visit_leaf(&mut self, leaf: &Leaf) -> Result<(), CompileError> {
        self.node.properties.push(PropertyPredicate {
            key: leaf.key.clone(),
            op: leaf.op,
            value: leaf.value.clone(),
        });
        Ok(())
    }

    fn visit_list(&mut self, list: &ListCondition) -> Result<(), CompileError> {
        let group = self.group();
        let element_key = if list.element.key.is_empty() {
            self.builder.config.element_property.clone()
        } else {
            list.element.key.clone()
        };
        for value in &list.values {
            let mut element = PatternNode::new(&list.key);
            element.properties.push(PropertyPredicate {
                key: element_key.clone(),
                op: list.element.op,
                value: value.clone(),
            });
            self.node.edges.push(PatternEdge {
                relation: Relation::Contains,
                direction: EdgeDirection::Outgoing,
                group,
                negated: list.negated,
                rollup: None,
                target: element,
            });
        }
        Ok(())
    }

    fn visit_reference(&mut self, reference: &ReferenceCondition) -> Result<(), CompileError> {
        if !self.builder.schema.has_entity(&reference.ref_id) {
            return Err(CompileError::UnknownReference {
                key: reference.key.clone(),
                ref_id: reference.ref_id.clone(),
            });
        }

        let mut target = PatternNode::new(&reference.ref_id);
        let mut rollup = None;
        match &reference.target {
            Target::Identity(ids) => target.properties.push(self.identity_predicate(Operator::In, ids)),
            Target::Property(leaf) => target.properties.push(PropertyPredicate {
                key: leaf.key.clone(),
                op: leaf.op,
                value: leaf.value.clone(),
            }),
            // the edge is kept even when the rollup filters nothing
            Target::Rollup(aggregate) => rollup = Some(aggregate.clone()),
        }

        let group = self.group();
        self.node.edges.push(PatternEdge {
            relation: Relation::Has { key: Some(reference.key.clone()) },
            direction: if reference.reverse { EdgeDirection::Incoming } else { EdgeDirection::Outgoing },
            group,
            negated: reference.negated,
            rollup,
            target,
        });
        Ok(())
    }

    fn visit_id_set(&mut self, ids: &IdSet) -> Result<(), CompileError> {
        let op = if ids.negated { Operator::NotIn } else { Operator::In };
        let predicate = self.identity_predicate(op, &ids.ids);
        self.node.properties.push(predicate);
        Ok(())
    }

    fn visit_source(&mut self, source: &SourceCondition) -> Result<(), CompileError> {
        if source.containers.is_empty() {
            // scoped to no container: nothing matches, unless negated
            if !source.negated {
                let predicate = self.identity_predicate(Operator::In, &[]);
                self.node.properties.push(predicate);
            }
            return Ok(());
        }

        let group = self.group();
        for container in &source.containers {
            let (entity_id, item_id) = container.split_once('#').ok_or_else(|| CompileError::InvalidValue {
                key: String::new(),
                reason: format!("container `{}` is not `entity#item`", container),
            })?;
            let mut parent = PatternNode::new(entity_id);
            parent.properties.push(PropertyPredicate {
                key: self.builder.config.identity_property.clone(),
                op: Operator::Eq,
                value: Literal::Text(item_id.to_string()),
            });
            self.node.edges.push(PatternEdge {
                relation: Relation::Has { key: None },
                direction: EdgeDirection::Either,
                group,
                negated: source.negated,
                rollup: None,
                target: parent,
            });
        }
        Ok(())
    }

    fn visit_other(&mut self, other: &OtherCondition) -> Result<(), CompileError> {
        Err(CompileError::UnsupportedDataType {
            key: other.key.clone(),
            data_type: other.data_type.clone(),
        })
    }
}
