//! Filter SQL builder.
//!
//! Builds `WHERE`/`LIMIT`/`OFFSET` clauses with `$N` placeholders from the
//! typed filter structs. Values are always bound as parameters.

use tokio_postgres::types::ToSql;

/// A boxed statement parameter.
pub type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Accumulates conditions and their parameters.
#[derive(Default)]
pub struct FilterBuilder {
    conditions: Vec<String>,
    params: Vec<BoxedParam>,
}

impl std::fmt::Debug for FilterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterBuilder")
            .field("conditions", &self.conditions)
            .field("params", &self.params.len())
            .finish()
    }
}

impl FilterBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` and adds `condition`, where `{}` stands for its placeholder.
    ///
    /// ```
    /// use ehr_persistence::repository::FilterBuilder;
    ///
    /// let mut filter = FilterBuilder::new();
    /// filter.push("mrn = {}", "X-1".to_string());
    /// filter.push("active = {}", true);
    /// assert_eq!(filter.where_clause(), " WHERE mrn = $1 AND active = $2");
    /// ```
    pub fn push<P>(&mut self, condition: &str, value: P) -> &mut Self
    where
        P: ToSql + Sync + Send + 'static,
    {
        let placeholder = self.bind(value);
        self.conditions.push(condition.replace("{}", &placeholder));
        self
    }

    /// Binds `value` when present.
    pub fn push_opt<P>(&mut self, condition: &str, value: Option<P>) -> &mut Self
    where
        P: ToSql + Sync + Send + 'static,
    {
        if let Some(value) = value {
            self.push(condition, value);
        }
        self
    }

    /// Binds a parameter without adding a condition and returns its placeholder.
    pub fn bind<P>(&mut self, value: P) -> String
    where
        P: ToSql + Sync + Send + 'static,
    {
        self.params.push(Box::new(value));
        format!("${}", self.params.len())
    }

    /// Returns ` WHERE ...` or an empty string.
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Binds paging parameters and returns the ` LIMIT ... OFFSET ...` clause.
    pub fn paging(&mut self, limit: Option<i64>, offset: Option<i64>) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(&format!(" LIMIT {}", self.bind(limit.max(0))));
        }
        if let Some(offset) = offset {
            clause.push_str(&format!(" OFFSET {}", self.bind(offset.max(0))));
        }
        clause
    }

    /// Returns the parameters in placeholder order.
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

/// Escapes `LIKE` wildcards so the value matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
