use serde_json::Value;
use sqlx::{self, postgres::PgArguments, FromRow};

use crate::database::repository::{ClassQuery, StudentQuery, CLASS_SORT_COLUMNS, STUDENT_SORT_COLUMNS};
use crate::sanitize::{clean_identifier, Sort};

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}

/// Collects AND-ed conditions with positional parameters
struct WhereBuilder {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl WhereBuilder {
    fn new() -> Self {
        Self {
            conditions: vec![],
            params: vec![],
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn push(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    fn clause(&self) -> String {
        if self.conditions.is_empty() {
            "1=1".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }
}

/// Quote a sort column, re-checking it against the allow-list
fn order_clause(alias: &str, sort: &Sort, allow_list: &[&str], fallback: &str) -> String {
    let column = clean_identifier(&sort.column);
    let column = if allow_list.contains(&column.as_str()) {
        column
    } else {
        fallback.to_string()
    };
    // id tiebreak keeps paging stable across equal sort keys
    format!(
        "ORDER BY {alias}.\"{column}\" {}, {alias}.\"id\" ASC",
        sort.direction.to_sql()
    )
}

fn like_pattern(term: &str) -> Value {
    Value::String(format!("%{}%", term))
}

/// SELECT and COUNT statements for students of a tenant who are not
/// enrolled in the class.
pub fn available_students_sql(query: &StudentQuery) -> (SqlResult, SqlResult) {
    let mut w = WhereBuilder::new();

    let school = w.param(Value::String(query.school_id.to_string()));
    w.push(format!("s.\"school_id\" = {}::uuid", school));
    w.push("s.\"deleted_at\" IS NULL");

    let class = w.param(Value::String(query.class_id.to_string()));
    w.push(format!(
        "NOT EXISTS (SELECT 1 FROM \"class_enrollments\" e WHERE e.\"class_id\" = {}::uuid AND e.\"student_id\" = s.\"id\")",
        class
    ));

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let p = w.param(like_pattern(search));
        w.push(format!("(s.\"name\" ILIKE {p} OR s.\"nis\" ILIKE {p})"));
    }
    if let Some(gender) = query.gender {
        let p = w.param(Value::String(gender.as_str().to_string()));
        w.push(format!("s.\"gender\" = {}", p));
    }
    if let Some(boarding) = query.boarding {
        let p = w.param(Value::Bool(boarding.is_boarding()));
        w.push(format!("s.\"is_boarding\" = {}", p));
    }

    let where_clause = w.clause();
    let count = SqlResult {
        query: format!("SELECT COUNT(*) AS count FROM \"students\" s WHERE {}", where_clause),
        params: w.params.clone(),
    };

    let order = order_clause("s", &query.sort, STUDENT_SORT_COLUMNS, "name");
    let limit = w.param(Value::from(query.pagination.limit));
    let offset = w.param(Value::from(query.pagination.offset()));
    let select = SqlResult {
        query: format!(
            "SELECT s.* FROM \"students\" s WHERE {} {} LIMIT {} OFFSET {}",
            where_clause, order, limit, offset
        ),
        params: w.params,
    };

    (select, count)
}

/// SELECT and COUNT statements for live classes of a tenant
pub fn class_list_sql(query: &ClassQuery) -> (SqlResult, SqlResult) {
    let mut w = WhereBuilder::new();

    let school = w.param(Value::String(query.school_id.to_string()));
    w.push(format!("c.\"school_id\" = {}::uuid", school));
    w.push("c.\"deleted_at\" IS NULL");

    if let Some(teacher_id) = query.teacher_id {
        let p = w.param(Value::String(teacher_id.to_string()));
        w.push(format!("c.\"teacher_id\" = {}::uuid", p));
    }
    if let Some(status) = query.status {
        let p = w.param(serde_json::to_value(status).unwrap_or(Value::Null));
        w.push(format!("c.\"status\" = {}::class_status", p));
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        let p = w.param(like_pattern(search));
        w.push(format!("c.\"name\" ILIKE {}", p));
    }

    let where_clause = w.clause();
    let count = SqlResult {
        query: format!("SELECT COUNT(*) AS count FROM \"classes\" c WHERE {}", where_clause),
        params: w.params.clone(),
    };

    let order = order_clause("c", &query.sort, CLASS_SORT_COLUMNS, "name");
    let limit = w.param(Value::from(query.pagination.limit));
    let offset = w.param(Value::from(query.pagination.offset()));
    let select = SqlResult {
        query: format!(
            "SELECT c.* FROM \"classes\" c WHERE {} {} LIMIT {} OFFSET {}",
            where_clause, order, limit, offset
        ),
        params: w.params,
    };

    (select, count)
}

pub fn bind_param_query<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        // Only scalars are produced by the builders above
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

pub fn bind_param_query_as<'q, O>(
    q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>,
    v: &'q Value,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>
where
    O: for<'r> FromRow<'r, sqlx::postgres::PgRow>,
{
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}
