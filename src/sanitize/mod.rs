//! Input cleaning for anything that reaches query construction.
//!
//! Every function here is total: bad input degrades to a safe value, nothing
//! returns an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const MAX_SEARCH_LENGTH: usize = 255;
pub const MAX_IDENTIFIER_LENGTH: usize = 64;
pub const MAX_ID_TOKEN_LENGTH: usize = 64;
pub const MAX_ID_LIST_LENGTH: usize = 1000;
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Characters with meaning in LIKE patterns, quoting, statement separation
/// or comments.
const FORBIDDEN_SEARCH_CHARS: &[char] = &['\'', '"', '`', ';', '%', '_', '\\', '*', '/', '#'];

/// Strip pattern, quoting, separator and comment syntax from a free-text
/// search term. Idempotent.
pub fn clean_search_term(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .filter(|c| !FORBIDDEN_SEARCH_CHARS.contains(c) && !c.is_control())
        .collect();

    // Removing one marker can expose another ("-'-" -> "--")
    while cleaned.contains("--") {
        cleaned = cleaned.replace("--", "");
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_SEARCH_LENGTH).collect();
    truncated.trim().to_string()
}

/// Clean a search term from an untyped payload. Non-strings yield "".
pub fn clean_search_value(input: &Value) -> String {
    match input {
        Value::String(s) => clean_search_term(s),
        _ => String::new(),
    }
}

/// Clean an optional search term, collapsing empty results to `None`
pub fn clean_optional_search(input: Option<&str>) -> Option<String> {
    input.map(clean_search_term).filter(|s| !s.is_empty())
}

/// Restrict to `[A-Za-z0-9_]` for anything interpolated as a column name
pub fn clean_identifier(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_IDENTIFIER_LENGTH)
        .collect()
}

fn is_id_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_TOKEN_LENGTH
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Keep only well-shaped ids: positive integers or narrow id tokens.
/// Order of survivors is preserved; the list is capped.
pub fn clean_id_list(ids: &[Value]) -> Vec<String> {
    ids.iter()
        .filter_map(|v| match v {
            Value::Number(n) => n.as_u64().filter(|n| *n > 0).map(|n| n.to_string()),
            Value::String(s) => {
                let trimmed = s.trim();
                is_id_token(trimmed).then(|| trimmed.to_string())
            }
            _ => None,
        })
        .take(MAX_ID_LIST_LENGTH)
        .collect()
}

/// `clean_id_list` narrowed to UUID ids, the key type of this store
pub fn clean_uuid_list(ids: &[Value]) -> Vec<Uuid> {
    clean_id_list(ids)
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// `page >= 1`, `1 <= limit <= 100`; missing or non-positive values fall
/// back to the defaults.
pub fn clamp_pagination(page: Option<i64>, limit: Option<i64>) -> Pagination {
    let page = page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE);
    let limit = limit
        .filter(|l| *l >= 1)
        .map(|l| l.min(MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);
    Pagination { page, limit }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

/// Sort key must be on the allow-list, otherwise `default_column` is used.
/// Anything other than "desc" (case-insensitive) sorts ascending.
pub fn clamp_sort(
    sort_by: Option<&str>,
    sort_order: Option<&str>,
    allow_list: &[&str],
    default_column: &str,
) -> Sort {
    let column = sort_by
        .map(clean_identifier)
        .filter(|c| allow_list.contains(&c.as_str()))
        .unwrap_or_else(|| default_column.to_string());
    let direction = match sort_order.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref s) if s == "desc" => SortDirection::Desc,
        _ => SortDirection::Asc,
    };
    Sort { column, direction }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn strips_injection_syntax() {
        let cleaned = clean_search_term("'; DROP TABLE x; --");
        assert!(!cleaned.contains('\''));
        assert!(!cleaned.contains('"'));
        assert!(!cleaned.contains(';'));
        assert!(!cleaned.contains("--"));
        assert_eq!(cleaned, "DROP TABLE x");
    }

    #[test]
    fn strips_wildcards_and_comments() {
        assert_eq!(clean_search_term("50%_off /* hi */"), "50off hi");
        assert_eq!(clean_search_term("-'-a"), "a");
        assert_eq!(clean_search_term("---"), "-");
        assert_eq!(clean_search_term("Anne-Marie"), "Anne-Marie");
    }

    #[test]
    fn truncates_long_terms() {
        let long = "a".repeat(1000);
        assert_eq!(clean_search_term(&long).len(), MAX_SEARCH_LENGTH);
    }

    #[test]
    fn non_string_search_is_empty() {
        assert_eq!(clean_search_value(&json!(42)), "");
        assert_eq!(clean_search_value(&json!(null)), "");
        assert_eq!(clean_search_value(&json!("budi")), "budi");
        assert_eq!(clean_optional_search(Some("  ';  ")), None);
    }

    #[test]
    fn identifier_allow_list() {
        assert_eq!(clean_identifier("name; DROP"), "nameDROP");
        assert_eq!(clean_identifier("created_at"), "created_at");
        assert_eq!(clean_identifier("\"x\""), "x");
    }

    #[test]
    fn id_list_keeps_well_shaped_ids_in_order() {
        let ids = vec![
            json!(3),
            json!(-1),
            json!(0),
            json!("abc-123"),
            json!("1; DROP"),
            json!(null),
            json!(1.5),
            json!({ "id": 1 }),
            json!("7"),
        ];
        assert_eq!(clean_id_list(&ids), vec!["3", "abc-123", "7"]);
        assert!(clean_id_list(&[json!("' OR 1=1"), json!(false)]).is_empty());
    }

    #[test]
    fn id_list_is_capped() {
        let ids: Vec<Value> = (1..=1500).map(|n| json!(n)).collect();
        assert_eq!(clean_id_list(&ids).len(), MAX_ID_LIST_LENGTH);
    }

    #[test]
    fn uuid_list_drops_non_uuid_tokens() {
        let id = Uuid::new_v4();
        let ids = vec![json!(id.to_string()), json!("not-a-uuid"), json!(5)];
        assert_eq!(clean_uuid_list(&ids), vec![id]);
    }

    #[test]
    fn pagination_defaults_and_bounds() {
        assert_eq!(clamp_pagination(None, None), Pagination { page: 1, limit: 20 });
        assert_eq!(clamp_pagination(Some(-3), Some(0)), Pagination { page: 1, limit: 20 });
        assert_eq!(clamp_pagination(Some(4), Some(500)), Pagination { page: 4, limit: 100 });
        assert_eq!(clamp_pagination(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn sort_respects_allow_list() {
        let allow = ["name", "created_at"];
        let sort = clamp_sort(Some("created_at"), Some("DESC"), &allow, "name");
        assert_eq!(sort.column, "created_at");
        assert_eq!(sort.direction, SortDirection::Desc);

        let sort = clamp_sort(Some("password; --"), Some("sideways"), &allow, "name");
        assert_eq!(sort.column, "name");
        assert_eq!(sort.direction, SortDirection::Asc);
    }

    proptest! {
        #[test]
        fn clean_search_term_is_idempotent(s in ".{0,400}") {
            let once = clean_search_term(&s);
            prop_assert_eq!(clean_search_term(&once), once.clone());
            prop_assert!(once.chars().count() <= MAX_SEARCH_LENGTH);
            prop_assert!(!once.contains('\'') && !once.contains('"') && !once.contains(';'));
        }

        #[test]
        fn clean_identifier_is_idempotent(s in ".{0,100}") {
            let once = clean_identifier(&s);
            prop_assert_eq!(clean_identifier(&once), once);
        }
    }
}
