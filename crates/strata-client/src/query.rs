use serde::{Deserialize, Serialize};

/// Wire name of the free-text query predicate parameter.
pub const QUERY_PARAM_QL: &str = "ql";
/// Wire name of the page-size parameter.
pub const QUERY_PARAM_LIMIT: &str = "limit";
/// Reserved wire name of the paging cursor parameter. Owned by
/// `PagedCollection`; user-supplied extras under this key are discarded.
pub const QUERY_PARAM_CURSOR: &str = "cursor";

/// Page size the server applies when no explicit limit is sent.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Query parameters for one collection view.
///
/// Cursors are scoped to the query that produced them; a collection resets
/// its paging state whenever its query is swapped out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    ql: Option<String>,
    limit: Option<u32>,
    extra: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text query predicate, e.g. `select * where color = 'orange'`.
    pub fn with_ql(mut self, ql: impl Into<String>) -> Self {
        self.ql = Some(ql.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add an arbitrary extra parameter. The reserved `cursor` key is
    /// discarded; paging cursors are staged by the collection itself.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key != QUERY_PARAM_CURSOR {
            self.extra.push((key, value.into()));
        }
        self
    }

    pub fn ql(&self) -> Option<&str> {
        self.ql.as_deref()
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Render the outgoing query-string pairs, in a stable order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(2 + self.extra.len());
        if let Some(ql) = &self.ql {
            params.push((QUERY_PARAM_QL.to_string(), ql.clone()));
        }
        if let Some(limit) = self.limit {
            params.push((QUERY_PARAM_LIMIT.to_string(), limit.to_string()));
        }
        params.extend(self.extra.iter().cloned());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_params_renders_ql_limit_then_extras() {
        let query = Query::new()
            .with_ql("select * where color = 'orange'")
            .with_limit(25)
            .with_param("reversed", "true");

        assert_eq!(
            query.to_params(),
            vec![
                ("ql".to_string(), "select * where color = 'orange'".to_string()),
                ("limit".to_string(), "25".to_string()),
                ("reversed".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn empty_query_renders_no_params() {
        assert!(Query::new().to_params().is_empty());
    }

    #[test]
    fn reserved_cursor_key_is_discarded() {
        let query = Query::new().with_param("cursor", "stale-token");
        assert!(query.to_params().is_empty());
    }
}
