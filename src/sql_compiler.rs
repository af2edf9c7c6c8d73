//! SQL compiler that renders conditions into sea-query predicates over a
//! single items table with a JSON `fields` column.
//!
//! References and lists are stored as JSON arrays inside `fields`, so list and
//! forward-reference checks are containment tests instead of joins. Everything
//! that does need a second row (reversed references, reference properties,
//! rollups) is a correlated sub-query over the same table aliased `r`.

use crate::condition::{
    millis_to_rfc3339, Aggregate, Condition, ConditionVisitor, DataType, IdSet, Leaf, LeafKind,
    ListCondition, Literal, Operator, OtherCondition, ReferenceCondition, Rollup, SourceCondition,
    Target,
};
use crate::config::RelationalConfig;
use crate::error::CompileError;
use crate::request::{GroupTarget, Page, Sort, SortOrder};
use crate::rows::{COUNT_COLUMN, ELEMENT_COLUMN, GROUP_COLUMN, ID_COLUMN, SUM_COLUMN, VALUE_COLUMN};
use crate::schema::SchemaLookup;
use sea_query::{
    Alias, Asterisk, Expr, Func, Iden, JoinType, LikeExpr, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr, SubQueryStatement, Value, Values,
};
use std::sync::Arc;
use tracing::warn;

/// Represents a table identifier for sea-query
#[derive(Debug, Clone)]
pub enum TableName {
    Items(String),
    /// The second row of a one-hop sub-query.
    Related,
    /// The derived table of a grouped aggregate.
    Grouped,
}

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = match self {
            TableName::Items(name) => write!(s, "{}", name),
            TableName::Related => write!(s, "r"),
            TableName::Grouped => write!(s, "grouped"),
        };
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl ColumnName {
    fn new(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = write!(s, "{}", self.0);
    }
}

/// Rendered statement plus its bound parameters.
#[derive(Debug, Clone)]
pub struct CompiledSql {
    pub sql: String,
    pub values: Values,
}

impl CompiledSql {
    fn from_select(select: &SelectStatement) -> Self {
        let (sql, values) = select.build(PostgresQueryBuilder);
        Self { sql, values }
    }
}

/// SQL Compiler that converts conditions to predicates and statements
pub struct SqlCompiler {
    config: RelationalConfig,
    schema: Arc<dyn SchemaLookup>,
}

impl SqlCompiler {
    pub fn new(config: RelationalConfig, schema: Arc<dyn SchemaLookup>) -> Self {
        Self { config, schema }
    }

    fn items(&self) -> TableName {
        TableName::Items(self.config.items_table.clone())
    }

    fn column(&self, scope: &TableName, name: &str) -> SimpleExpr {
        Expr::col((scope.clone(), ColumnName::new(name))).into()
    }

    fn id(&self, scope: &TableName) -> SimpleExpr {
        self.column(scope, &self.config.id_column)
    }

    fn fields(&self, scope: &TableName) -> SimpleExpr {
        self.column(scope, &self.config.fields_column)
    }

    /// `fields ->> key`
    fn json_text(&self, scope: &TableName, key: &str) -> SimpleExpr {
        Expr::cust_with_exprs("$1 ->> $2", [self.fields(scope), Expr::val(key).into()])
    }

    /// `fields -> key`
    fn json_value(&self, scope: &TableName, key: &str) -> SimpleExpr {
        Expr::cust_with_exprs("$1 -> $2", [self.fields(scope), Expr::val(key).into()])
    }

    fn typed_field(&self, scope: &TableName, key: &str, kind: LeafKind) -> SimpleExpr {
        let text = Expr::expr(self.json_text(scope, key));
        match kind {
            LeafKind::String => text.into(),
            LeafKind::Number => text.cast_as(Alias::new("numeric")),
            LeafKind::DateTime | LeafKind::DateRange => text.cast_as(Alias::new("timestamptz")),
        }
    }

    /// `fields @> '{"key": [value]}'::jsonb`
    fn contains_json(&self, scope: &TableName, key: &str, value: &Literal) -> SimpleExpr {
        let mut document = serde_json::Map::new();
        document.insert(key.to_string(), serde_json::Value::Array(vec![value.to_json()]));
        let document = serde_json::Value::Object(document).to_string();
        Expr::cust_with_exprs(
            "$1 @> $2",
            [self.fields(scope), Expr::val(document).cast_as(Alias::new("jsonb"))],
        )
    }

    /// Whether the reference array `key` on `holder` lists the id of `member`.
    fn link(&self, key: &str, holder: &TableName, member: &TableName) -> SimpleExpr {
        Expr::cust_with_exprs(
            "($1) @> jsonb_build_array($2)",
            [self.json_value(holder, key), self.id(member)],
        )
    }

    fn entity_filter(&self, scope: &TableName, entity_id: &str) -> SimpleExpr {
        Expr::expr(self.column(scope, &self.config.entity_column)).eq(entity_id)
    }

    /// Convert a literal to a sea-query Value
    fn literal_to_value(&self, key: &str, literal: &Literal) -> Result<Value, CompileError> {
        match literal {
            Literal::Null => Ok(Value::String(None)),
            Literal::Bool(b) => Ok(Value::Bool(Some(*b))),
            Literal::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::BigInt(Some(i))),
                None => Ok(Value::Double(n.as_f64())),
            },
            Literal::Text(s) => Ok(Value::String(Some(Box::new(s.clone())))),
            Literal::Millis(ms) => Ok(Value::BigInt(Some(*ms))),
            Literal::List(_) => Err(CompileError::InvalidValue {
                key: key.to_string(),
                reason: "a list cannot be compared as a single value".to_string(),
            }),
        }
    }

    /// Timestamps are bound as RFC 3339 text and cast on the server.
    fn value_expr(&self, key: &str, literal: &Literal) -> Result<SimpleExpr, CompileError> {
        match literal {
            Literal::Millis(ms) => {
                let text = millis_to_rfc3339(*ms).ok_or_else(|| CompileError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("timestamp {} out of range", ms),
                })?;
                Ok(Expr::val(text).cast_as(Alias::new("timestamptz")))
            }
            other => Ok(SimpleExpr::Value(self.literal_to_value(key, other)?)),
        }
    }

    fn value_exprs(&self, key: &str, items: &[Literal]) -> Result<Vec<SimpleExpr>, CompileError> {
        items.iter().map(|item| self.value_expr(key, item)).collect()
    }

    /// Compile a single comparison against an already typed target
    fn compare(
        &self,
        key: &str,
        target: SimpleExpr,
        op: Operator,
        value: &Literal,
    ) -> Result<SimpleExpr, CompileError> {
        let target = Expr::expr(target);
        let expr = match (op, value) {
            (Operator::Eq, Literal::Null) => target.is_null(),
            (Operator::NotEq, Literal::Null) => target.is_not_null(),
            (Operator::In, Literal::List(items)) => target.is_in(self.value_exprs(key, items)?),
            (Operator::NotIn, Literal::List(items)) => target.is_not_in(self.value_exprs(key, items)?),
            (Operator::StartsWith, value) => target.like(like_pattern(value, false, true)),
            (Operator::EndsWith, value) => target.like(like_pattern(value, true, false)),
            (Operator::Contains, value) => target.like(like_pattern(value, true, true)),
            (Operator::Between, Literal::List(bounds)) if bounds.len() == 2 => target.between(
                self.value_expr(key, &bounds[0])?,
                self.value_expr(key, &bounds[1])?,
            ),
            (Operator::Eq, value) => target.eq(self.value_expr(key, value)?),
            (Operator::NotEq, value) => target.ne(self.value_expr(key, value)?),
            (Operator::Lt, value) => target.lt(self.value_expr(key, value)?),
            (Operator::Lte, value) => target.lte(self.value_expr(key, value)?),
            (Operator::Gt, value) => target.gt(self.value_expr(key, value)?),
            (Operator::Gte, value) => target.gte(self.value_expr(key, value)?),
            (op, _) => {
                return Err(CompileError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("`{}` does not fit the value", op),
                })
            }
        };
        Ok(expr)
    }

    fn leaf(&self, scope: &TableName, leaf: &Leaf) -> Result<SimpleExpr, CompileError> {
        let target = self.typed_field(scope, &leaf.key, leaf.kind);
        self.compare(&leaf.key, target, leaf.op, &leaf.value)
    }

    /// `EXISTS` over the elements of list `key` for non-equality element checks.
    fn element_exists(&self, scope: &TableName, list: &ListCondition, value: &Literal) -> Result<SimpleExpr, CompileError> {
        let element = match value {
            Literal::Number(_) => Expr::expr(Expr::cust("element.value")).cast_as(Alias::new("numeric")),
            _ => Expr::cust("element.value"),
        };
        let predicate = self.compare(&list.key, element, list.element.op, value)?;
        Ok(Expr::cust_with_exprs(
            "EXISTS (SELECT 1 FROM jsonb_array_elements_text($1) AS element(value) WHERE $2)",
            [self.json_value(scope, &list.key), predicate],
        ))
    }

    /// One-hop sub-query over the rows related through `reference`.
    fn related(&self, scope: &TableName, reference: &ReferenceCondition, projection: SimpleExpr) -> SelectStatement {
        let link = if reference.reverse {
            self.link(&reference.key, &TableName::Related, scope)
        } else {
            self.link(&reference.key, scope, &TableName::Related)
        };
        let mut select = Query::select();
        select
            .expr(projection)
            .from_as(self.items(), TableName::Related)
            .and_where(self.entity_filter(&TableName::Related, &reference.ref_id))
            .and_where(link);
        select
    }

    fn rollup(&self, scope: &TableName, reference: &ReferenceCondition, rollup: &Rollup) -> Result<SimpleExpr, CompileError> {
        if rollup.value.is_null() {
            return Ok(Expr::exists(self.related(scope, reference, self.id(&TableName::Related))));
        }

        let numeric = self.typed_field(&TableName::Related, &rollup.key, LeafKind::Number);
        let aggregate: SimpleExpr = match rollup.aggregate {
            Aggregate::Sum => Func::coalesce([Func::sum(numeric).into(), Expr::val(0).into()]).into(),
            Aggregate::Max => Func::max(numeric).into(),
            Aggregate::Min => Func::min(numeric).into(),
            Aggregate::Count => Func::count(self.id(&TableName::Related)).into(),
        };
        let select = self.related(scope, reference, aggregate);
        let scalar = SimpleExpr::SubQuery(None, Box::new(SubQueryStatement::SelectStatement(select)));
        self.compare(&rollup.key, scalar, rollup.op, &rollup.value)
    }

    /// Build predicate expressions for `conditions`, to be AND-ed by the caller
    pub fn build(&self, conditions: &[Condition]) -> Result<Vec<SimpleExpr>, CompileError> {
        let mut clause = WhereClause {
            compiler: self,
            scope: self.items(),
        };
        conditions
            .iter()
            .map(|condition| condition.accept(&mut clause))
            .collect()
    }

    fn filtered(&self, entity_id: &str, conditions: &[Condition]) -> Result<SelectStatement, CompileError> {
        let predicates = self.build(conditions)?;
        let items = self.items();
        let mut select = Query::select();
        select.from(items.clone()).and_where(self.entity_filter(&items, entity_id));
        for predicate in predicates {
            select.and_where(predicate);
        }
        Ok(select)
    }

    fn sort_expr(&self, entity_id: &str, sort: &Sort) -> Option<SimpleExpr> {
        if sort.key == self.config.id_column || sort.key == ID_COLUMN {
            return None;
        }
        let kind = match self.schema.field(entity_id, &sort.key).map(|meta| meta.data_type) {
            Some(DataType::Number) => LeafKind::Number,
            Some(DataType::DateTime) | Some(DataType::DateRange) => LeafKind::DateTime,
            _ => LeafKind::String,
        };
        Some(self.typed_field(&self.items(), &sort.key, kind))
    }

    /// Matching ids in sort order, with an id tiebreak, paged.
    pub fn segment(
        &self,
        entity_id: &str,
        conditions: &[Condition],
        sort: Option<&Sort>,
        page: Option<Page>,
    ) -> Result<CompiledSql, CompileError> {
        let items = self.items();
        let mut select = self.filtered(entity_id, conditions)?;
        select.expr_as(self.id(&items), ColumnName::new(ID_COLUMN));

        let order = match sort.map(|s| s.order).unwrap_or_default() {
            SortOrder::Asc => Order::Asc,
            SortOrder::Desc => Order::Desc,
        };
        if let Some(expr) = sort.and_then(|s| self.sort_expr(entity_id, s)) {
            select.order_by_expr(expr, order.clone());
        }
        select.order_by_expr(self.id(&items), order);

        if let Some(page) = page {
            select.limit(page.size).offset(page.offset());
        }
        Ok(CompiledSql::from_select(&select))
    }

    /// Unordered matching ids.
    pub fn ids(&self, entity_id: &str, conditions: &[Condition]) -> Result<CompiledSql, CompileError> {
        let mut select = self.filtered(entity_id, conditions)?;
        select.expr_as(self.id(&self.items()), ColumnName::new(ID_COLUMN));
        Ok(CompiledSql::from_select(&select))
    }

    /// Distinct elements of list field `key` over the matching rows, as
    /// `jsonb` so numbers stay numbers.
    pub fn elements(&self, entity_id: &str, conditions: &[Condition], key: &str) -> Result<CompiledSql, CompileError> {
        let mut select = self.filtered(entity_id, conditions)?;
        select.distinct().expr_as(
            Expr::cust_with_exprs("jsonb_array_elements($1)", [self.json_value(&self.items(), key)]),
            ColumnName::new(ELEMENT_COLUMN),
        );
        Ok(CompiledSql::from_select(&select))
    }

    /// Full records for a set of ids, in no particular order.
    pub fn load(&self, ids: &[String]) -> CompiledSql {
        let items = self.items();
        let mut select = Query::select();
        select
            .expr_as(self.id(&items), ColumnName::new("id"))
            .expr_as(self.column(&items, &self.config.entity_column), ColumnName::new("entity_id"))
            .expr_as(self.fields(&items), ColumnName::new("fields"))
            .expr_as(self.column(&items, &self.config.container_column), ColumnName::new("container_id"))
            .from(items.clone())
            .and_where(Expr::expr(self.id(&items)).is_in(ids.iter().map(String::as_str)));
        CompiledSql::from_select(&select)
    }

    /// Inner select exposing one `group` column per matching row, plus `value`
    /// when summing.
    fn grouped_rows(
        &self,
        entity_id: &str,
        conditions: &[Condition],
        target: &GroupTarget,
        value: Option<SimpleExpr>,
    ) -> Result<SelectStatement, CompileError> {
        let items = self.items();
        let mut inner = self.filtered(entity_id, conditions)?;
        let group = match target {
            GroupTarget::Total => {
                inner.expr_as(self.id(&items), ColumnName::new(ID_COLUMN));
                None
            }
            GroupTarget::Property { key } => Some(self.json_text(&items, key)),
            GroupTarget::Elements { key } | GroupTarget::Related { key, reverse: false, .. } => Some(
                Expr::cust_with_exprs("jsonb_array_elements_text($1)", [self.json_value(&items, key)]),
            ),
            GroupTarget::Related { key, ref_id, reverse: true } => {
                let on = self
                    .entity_filter(&TableName::Related, ref_id)
                    .and(self.link(key, &TableName::Related, &items));
                inner.join_as(JoinType::InnerJoin, items.clone(), TableName::Related, on);
                Some(self.id(&TableName::Related))
            }
        };
        if let Some(group) = group {
            inner.expr_as(group, ColumnName::new(GROUP_COLUMN));
        }
        if let Some(value) = value {
            inner.expr_as(value, ColumnName::new(VALUE_COLUMN));
        }
        Ok(inner)
    }

    fn aggregate(&self, inner: SelectStatement, target: &GroupTarget, aggregate: SimpleExpr, alias: &str) -> SelectStatement {
        let mut outer = Query::select();
        outer.from_subquery(inner, TableName::Grouped);
        if *target != GroupTarget::Total {
            let group = Expr::col((TableName::Grouped, ColumnName::new(GROUP_COLUMN)));
            outer
                .expr_as(group, ColumnName::new(GROUP_COLUMN))
                .group_by_col((TableName::Grouped, ColumnName::new(GROUP_COLUMN)));
        }
        outer.expr_as(aggregate, ColumnName::new(alias));
        outer
    }

    pub fn count(&self, entity_id: &str, conditions: &[Condition], target: &GroupTarget) -> Result<CompiledSql, CompileError> {
        let inner = self.grouped_rows(entity_id, conditions, target, None)?;
        let outer = self.aggregate(inner, target, Func::count(Expr::col(Asterisk)).into(), COUNT_COLUMN);
        Ok(CompiledSql::from_select(&outer))
    }

    pub fn sum(
        &self,
        entity_id: &str,
        conditions: &[Condition],
        key: &str,
        target: &GroupTarget,
    ) -> Result<CompiledSql, CompileError> {
        let value = self.typed_field(&self.items(), key, LeafKind::Number);
        let inner = self.grouped_rows(entity_id, conditions, target, Some(value))?;
        let total = Func::coalesce([
            Func::sum(Expr::col((TableName::Grouped, ColumnName::new(VALUE_COLUMN)))).into(),
            Expr::val(0).into(),
        ]);
        let outer = self.aggregate(inner, target, total.into(), SUM_COLUMN);
        Ok(CompiledSql::from_select(&outer))
    }
}

/// `LIKE` pattern with the value's own wildcards escaped.
fn like_pattern(value: &Literal, leading: bool, trailing: bool) -> LikeExpr {
    let text = match value {
        Literal::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    };
    let mut pattern = String::with_capacity(text.len() + 2);
    if leading {
        pattern.push('%');
    }
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    if trailing {
        pattern.push('%');
    }
    LikeExpr::new(pattern).escape('\\')
}

fn any_of(exprs: Vec<SimpleExpr>) -> SimpleExpr {
    exprs
        .into_iter()
        .reduce(|acc, expr| acc.or(expr))
        .unwrap_or_else(|| Expr::val(false).into())
}

fn negate_if(expr: SimpleExpr, negated: bool) -> SimpleExpr {
    if negated {
        expr.not()
    } else {
        expr
    }
}

struct WhereClause<'a> {
    compiler: &'a SqlCompiler,
    scope: TableName,
}

impl ConditionVisitor for WhereClause<'_> {
    type Output = SimpleExpr;

    fn visit_leaf(&mut self, leaf: &Leaf) -> Result<SimpleExpr, CompileError> {
        self.compiler.leaf(&self.scope, leaf)
    }

    fn visit_list(&mut self, list: &ListCondition) -> Result<SimpleExpr, CompileError> {
        let checks = list
            .values
            .iter()
            .map(|value| match list.element.op {
                Operator::Eq => Ok(self.compiler.contains_json(&self.scope, &list.key, value)),
                _ => self.compiler.element_exists(&self.scope, list, value),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(negate_if(any_of(checks), list.negated))
    }

    fn visit_reference(&mut self, reference: &ReferenceCondition) -> Result<SimpleExpr, CompileError> {
        if !self.compiler.schema.has_entity(&reference.ref_id) {
            return Err(CompileError::UnknownReference {
                key: reference.key.clone(),
                ref_id: reference.ref_id.clone(),
            });
        }

        let expr = match &reference.target {
            Target::Identity(ids) if !reference.reverse => any_of(
                ids.iter()
                    .map(|id| self.compiler.contains_json(&self.scope, &reference.key, &Literal::Text(id.clone())))
                    .collect(),
            ),
            Target::Identity(ids) => {
                let mut related = self.compiler.related(&self.scope, reference, self.compiler.id(&TableName::Related));
                related.and_where(
                    Expr::expr(self.compiler.id(&TableName::Related)).is_in(ids.iter().map(String::as_str)),
                );
                Expr::exists(related)
            }
            Target::Property(leaf) => {
                let mut related = self.compiler.related(&self.scope, reference, self.compiler.id(&TableName::Related));
                related.and_where(self.compiler.leaf(&TableName::Related, leaf)?);
                Expr::exists(related)
            }
            Target::Rollup(rollup) => self.compiler.rollup(&self.scope, reference, rollup)?,
        };
        Ok(negate_if(expr, reference.negated))
    }

    fn visit_id_set(&mut self, ids: &IdSet) -> Result<SimpleExpr, CompileError> {
        let id = Expr::expr(self.compiler.id(&self.scope));
        let values = sentinel_or(&ids.ids, &self.compiler.config.empty_set_sentinel);
        Ok(if ids.negated { id.is_not_in(values) } else { id.is_in(values) })
    }

    fn visit_source(&mut self, source: &SourceCondition) -> Result<SimpleExpr, CompileError> {
        let container = Expr::expr(self.compiler.column(&self.scope, &self.compiler.config.container_column));
        let values = sentinel_or(&source.containers, &self.compiler.config.empty_set_sentinel);
        // items outside every container have a null container_id
        Ok(if source.negated {
            container.clone().is_null().or(container.is_not_in(values))
        } else {
            container.is_in(values)
        })
    }

    fn visit_other(&mut self, other: &OtherCondition) -> Result<SimpleExpr, CompileError> {
        warn!(
            key = %other.key,
            data_type = %other.data_type,
            "rendering unknown data type as a text comparison"
        );
        let value = match &other.value {
            Literal::List(items) => Literal::List(items.iter().map(as_text).collect()),
            scalar => as_text(scalar),
        };
        let target = self.compiler.json_text(&self.scope, &other.key);
        self.compiler.compare(&other.key, target, other.op, &value)
    }
}

fn as_text(literal: &Literal) -> Literal {
    match literal {
        Literal::Null => Literal::Null,
        Literal::Text(s) => Literal::Text(s.clone()),
        other => Literal::Text(other.to_json().to_string()),
    }
}

/// Empty sets are replaced by a sentinel so the predicate still matches nothing.
fn sentinel_or(values: &[String], sentinel: &str) -> Vec<String> {
    if values.is_empty() {
        vec![sentinel.to_string()]
    } else {
        values.to_vec()
    }
}
