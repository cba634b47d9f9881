// Record storage for CGM entries and treatments.
//
// Compiled predicate sets are rendered to parameterised SurrealQL: field
// names are validated identifiers and go into the statement backtick-quoted,
// every value is bound as `$pN`.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use surrealdb::RecordId;
use tracing::debug;

use crate::db::connection::Db;
use crate::db::schema::Owned;
use crate::query::{CompiledQuery, Operator, Predicate, SortDirection, SortKey};
use crate::types::TenantId;

#[derive(Clone)]
pub struct RecordStore {
    db: Db,
}

impl RecordStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Run a compiled query. The `id` and `owner` storage fields are never
    /// returned.
    pub async fn query_records<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &CompiledQuery,
    ) -> Result<Vec<T>> {
        let (clause, bindings) = render_where(&query.predicates);
        let sql = format!(
            "SELECT * OMIT id, owner FROM {} WHERE {}{} LIMIT $limit",
            table,
            clause,
            render_order(&query.order)
        );
        debug!("Querying {}: {}", table, sql);

        let mut request = self.db.query(sql).bind(("limit", query.limit));
        for binding in bindings {
            request = request.bind(binding);
        }

        let mut res = request.await?;
        let rows: Vec<T> = res.take(0)?;
        Ok(rows)
    }

    /// Store one record stamped with its owner.
    pub async fn insert<T: Serialize>(&self, table: &str, owner: &TenantId, record: T) -> Result<()> {
        let content = serde_json::to_value(Owned {
            owner: owner.as_str().to_string(),
            record,
        })?;

        self.db
            .query("CREATE type::table($table) CONTENT $content")
            .bind(("table", table.to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        Ok(())
    }

    /// Delete records matching `predicates`, at most `limit` of them.
    /// Returns how many were removed.
    pub async fn delete_matching(
        &self,
        table: &str,
        predicates: &[Predicate],
        limit: Option<u32>,
    ) -> Result<usize> {
        let (clause, bindings) = render_where(predicates);
        let limit_clause = if limit.is_some() { " LIMIT $limit" } else { "" };
        let sql = format!(
            "SELECT VALUE id FROM {} WHERE {}{}",
            table, clause, limit_clause
        );
        debug!("Selecting {} records to delete: {}", table, sql);

        let mut request = self.db.query(sql);
        if let Some(limit) = limit {
            request = request.bind(("limit", limit));
        }
        for binding in bindings {
            request = request.bind(binding);
        }

        let mut res = request.await?;
        let ids: Vec<RecordId> = res.take(0)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let count = ids.len();
        self.db
            .query(format!("DELETE {} WHERE id INSIDE $ids", table))
            .bind(("ids", ids))
            .await?
            .check()?;

        Ok(count)
    }
}

/// Render predicates as an `AND`-joined condition plus its bindings.
pub(crate) fn render_where(predicates: &[Predicate]) -> (String, Vec<(String, Value)>) {
    let mut parts = Vec::with_capacity(predicates.len());
    let mut bindings = Vec::with_capacity(predicates.len());

    for (i, predicate) in predicates.iter().enumerate() {
        let param = format!("p{}", i);
        parts.push(render_predicate(predicate, &param));
        bindings.push((param, predicate.value.to_json()));
    }

    if parts.is_empty() {
        return ("true".to_string(), bindings);
    }

    (parts.join(" AND "), bindings)
}

fn render_predicate(predicate: &Predicate, param: &str) -> String {
    let field = format!("`{}`", predicate.field);
    match predicate.operator {
        Operator::Eq => format!("{} = ${}", field, param),
        Operator::Ne => format!("{} != ${}", field, param),
        Operator::Gte => format!("{} >= ${}", field, param),
        Operator::Gt => format!("{} > ${}", field, param),
        Operator::Lte => format!("{} <= ${}", field, param),
        Operator::Lt => format!("{} < ${}", field, param),
        Operator::In => format!("{} INSIDE ${}", field, param),
        Operator::NotIn => format!("{} NOTINSIDE ${}", field, param),
        Operator::Regex => format!(
            "string::matches(type::string({} ?? ''), ${})",
            field, param
        ),
        Operator::Like => format!(
            "string::contains(type::string({} ?? ''), ${})",
            field, param
        ),
    }
}

pub(crate) fn render_order(order: &[SortKey]) -> String {
    if order.is_empty() {
        return String::new();
    }

    let keys: Vec<String> = order
        .iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("`{}` {}", key.field, direction)
        })
        .collect();

    format!(" ORDER BY {}", keys.join(", "))
}
