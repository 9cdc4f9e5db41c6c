use crate::error::{FinanceDbError, Result};
use crate::schema::SchemaDefinition;
use sqlparser::ast::{
    Expr, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet};

/// A named read query exposed by the data access surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDef {
    pub name: &'static str,
    pub sql: &'static str,
    /// Whether callers may observe this query reactively.
    pub reactive: bool,
}

pub const ALL_ENTRIES: QueryDef = QueryDef {
    name: "all_entries",
    sql: "SELECT * FROM entries",
    reactive: true,
};

pub const ALL_SHOP_ITEMS: QueryDef = QueryDef {
    name: "all_shop_items",
    sql: "SELECT * FROM shop_items",
    reactive: true,
};

pub const SHOP_TOTAL: QueryDef = QueryDef {
    name: "shop_total",
    sql: "SELECT SUM(count * purchasePrice) AS total FROM shop_items",
    reactive: true,
};

pub const ALL_SOLD_ITEMS: QueryDef = QueryDef {
    name: "all_sold_items",
    sql: "SELECT * FROM sold_items ORDER BY dateTimestamp DESC",
    reactive: true,
};

pub const MONTHLY_PROFITS: QueryDef = QueryDef {
    name: "monthly_profits",
    sql: "SELECT year, month, SUM(profit) AS profit FROM sold_items \
          GROUP BY year, month ORDER BY year DESC, month DESC",
    reactive: true,
};

pub const HISTORY_FOR_ENTRY: QueryDef = QueryDef {
    name: "history_for_entry",
    sql: "SELECT * FROM entry_history WHERE entryId = ? ORDER BY dateTimestamp DESC",
    reactive: true,
};

pub const ALL_CREDIT_CARDS: QueryDef = QueryDef {
    name: "all_credit_cards",
    sql: "SELECT * FROM credit_cards",
    reactive: true,
};

pub const ENTRY_BY_NAME: QueryDef = QueryDef {
    name: "entry_by_name",
    sql: "SELECT * FROM entries WHERE name = ? LIMIT 1",
    reactive: false,
};

pub const ENTRY_COUNT: QueryDef = QueryDef {
    name: "entry_count",
    sql: "SELECT COUNT(*) AS count FROM entries",
    reactive: false,
};

pub const QUERIES: &[QueryDef] = &[
    ALL_ENTRIES,
    ALL_SHOP_ITEMS,
    SHOP_TOTAL,
    ALL_SOLD_ITEMS,
    MONTHLY_PROFITS,
    HISTORY_FOR_ENTRY,
    ALL_CREDIT_CARDS,
    ENTRY_BY_NAME,
    ENTRY_COUNT,
];

/// Every query with the tables it reads, parsed once when the store opens.
#[derive(Debug, Clone)]
pub struct QueryCatalog {
    tables: BTreeMap<&'static str, BTreeSet<String>>,
}

impl QueryCatalog {
    /// Parse every query in [`QUERIES`] and check that each one only reads declared tables.
    pub fn new(schema: &SchemaDefinition) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for def in QUERIES {
            let read = referenced_tables(def.sql)
                .map_err(|e| FinanceDbError::SqlParse(format!("Query '{}': {e}", def.name)))?;
            if let Some(unknown) = read.iter().find(|t| schema.table(t).is_none()) {
                return Err(FinanceDbError::Schema(format!(
                    "Query '{}' reads unknown table '{unknown}'",
                    def.name
                )));
            }
            tables.insert(def.name, read);
        }
        Ok(QueryCatalog { tables })
    }

    /// Tables `name` reads, if it is a known query.
    pub fn tables_for(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.tables.get(name)
    }

    /// Queries that must be recomputed after a write to `table`.
    pub fn affected_queries(&self, table: &str) -> Vec<&'static str> {
        self.tables
            .iter()
            .filter(|(_, read)| read.contains(table))
            .map(|(name, _)| *name)
            .collect()
    }
}

/// The set of tables a SELECT reads, from its FROM and JOIN clauses and any subqueries.
pub fn referenced_tables(sql: &str) -> Result<BTreeSet<String>> {
    let clean_sql = replace_params(sql.trim());
    let dialect = GenericDialect {};
    let statements =
        Parser::parse_sql(&dialect, &clean_sql).map_err(|e| FinanceDbError::SqlParse(e.to_string()))?;

    let Some(stmt) = statements.first() else {
        return Err(FinanceDbError::SqlParse("no SQL statements found".to_string()));
    };

    let mut tables = BTreeSet::new();
    match stmt {
        Statement::Query(query) => extract_from_query(query, &mut tables),
        other => {
            return Err(FinanceDbError::SqlParse(format!(
                "expected a SELECT, found: {other}"
            )))
        }
    }
    Ok(tables)
}

/// Replace `:name` placeholders with NULL for parsing. Positional `?` parses as is.
fn replace_params(sql: &str) -> String {
    let mut result = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ':' && chars.peek().map(|ch| ch.is_alphabetic() || *ch == '_').unwrap_or(false) {
            while chars
                .peek()
                .map(|ch| ch.is_alphanumeric() || *ch == '_')
                .unwrap_or(false)
            {
                chars.next();
            }
            result.push_str("NULL");
        } else {
            result.push(c);
        }
    }

    result
}

fn extract_from_query(query: &Query, tables: &mut BTreeSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            extract_from_query(&cte.query, tables);
        }
    }
    extract_from_set_expr(query.body.as_ref(), tables);
}

fn extract_from_set_expr(body: &SetExpr, tables: &mut BTreeSet<String>) {
    match body {
        SetExpr::Select(select) => extract_from_select(select, tables),
        SetExpr::Query(query) => extract_from_query(query, tables),
        SetExpr::SetOperation { left, right, .. } => {
            extract_from_set_expr(left, tables);
            extract_from_set_expr(right, tables);
        }
        _ => {}
    }
}

fn extract_from_select(select: &Select, tables: &mut BTreeSet<String>) {
    for table in &select.from {
        extract_from_table_with_joins(table, tables);
    }

    for item in &select.projection {
        if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
            extract_from_expr(expr, tables);
        }
    }
    if let Some(selection) = &select.selection {
        extract_from_expr(selection, tables);
    }
    if let Some(having) = &select.having {
        extract_from_expr(having, tables);
    }
}

/// Subqueries nested inside an expression.
fn extract_from_expr(expr: &Expr, tables: &mut BTreeSet<String>) {
    match expr {
        Expr::Subquery(query) | Expr::Exists { subquery: query, .. } => {
            extract_from_query(query, tables)
        }
        Expr::InSubquery { expr, subquery, .. } => {
            extract_from_expr(expr, tables);
            extract_from_query(subquery, tables);
        }
        Expr::BinaryOp { left, right, .. } => {
            extract_from_expr(left, tables);
            extract_from_expr(right, tables);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr) => extract_from_expr(expr, tables),
        Expr::InList { expr, list, .. } => {
            extract_from_expr(expr, tables);
            for item in list {
                extract_from_expr(item, tables);
            }
        }
        Expr::Between { expr, low, high, .. } => {
            extract_from_expr(expr, tables);
            extract_from_expr(low, tables);
            extract_from_expr(high, tables);
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            for e in operand.iter().chain(else_result.iter()) {
                extract_from_expr(e, tables);
            }
            for e in conditions.iter().chain(results.iter()) {
                extract_from_expr(e, tables);
            }
        }
        _ => {}
    }
}

fn extract_from_table_with_joins(table_with_joins: &TableWithJoins, tables: &mut BTreeSet<String>) {
    extract_table_name(&table_with_joins.relation, tables);

    for join in &table_with_joins.joins {
        extract_table_name(&join.relation, tables);
    }
}

fn extract_table_name(factor: &TableFactor, tables: &mut BTreeSet<String>) {
    match factor {
        TableFactor::Table { name, .. } => {
            let table_name = name.0.last().map(|i| i.value.clone()).unwrap_or_default();
            if !table_name.is_empty() {
                tables.insert(table_name);
            }
        }
        TableFactor::Derived { subquery, .. } => extract_from_query(subquery, tables),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => extract_from_table_with_joins(table_with_joins, tables),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FINANCE_SCHEMA;
    use pretty_assertions::assert_eq;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_every_query_parses() {
        let catalog = QueryCatalog::new(&FINANCE_SCHEMA).unwrap();
        assert_eq!(catalog.tables_for("all_entries"), Some(&set(&["entries"])));
        assert_eq!(catalog.tables_for("shop_total"), Some(&set(&["shop_items"])));
        assert_eq!(catalog.tables_for("monthly_profits"), Some(&set(&["sold_items"])));
        assert_eq!(catalog.tables_for("history_for_entry"), Some(&set(&["entry_history"])));
        assert!(catalog.tables_for("posts").is_none());
    }

    #[test]
    fn test_affected_queries() {
        let catalog = QueryCatalog::new(&FINANCE_SCHEMA).unwrap();
        assert_eq!(catalog.affected_queries("sold_items"), vec!["all_sold_items", "monthly_profits"]);
        assert_eq!(
            catalog.affected_queries("entries"),
            vec!["all_entries", "entry_by_name", "entry_count"]
        );
        assert!(catalog.affected_queries("schema_master").is_empty());
    }

    #[test]
    fn test_joins_and_derived_tables() {
        let tables = referenced_tables(
            "SELECT h.newAmount, e.name FROM entry_history h \
             JOIN entries e ON h.entryId = e.id \
             UNION SELECT 0, name FROM (SELECT name FROM credit_cards)",
        )
        .unwrap();
        assert_eq!(tables, set(&["credit_cards", "entries", "entry_history"]));
    }

    #[test]
    fn test_where_and_projection_subqueries() {
        let tables = referenced_tables(
            "SELECT name, (SELECT COUNT(*) FROM entry_history h WHERE h.entryId = e.id) AS changes \
             FROM entries e \
             WHERE e.id IN (SELECT id FROM shop_items) \
             OR NOT EXISTS (SELECT 1 FROM sold_items WHERE profit > e.amount)",
        )
        .unwrap();
        assert_eq!(tables, set(&["entries", "entry_history", "shop_items", "sold_items"]));
    }

    #[test]
    fn test_having_subquery() {
        let tables = referenced_tables(
            "SELECT year, SUM(profit) FROM sold_items GROUP BY year \
             HAVING SUM(profit) > (SELECT MAX(balance) FROM credit_cards)",
        )
        .unwrap();
        assert_eq!(tables, set(&["credit_cards", "sold_items"]));
    }

    #[test]
    fn test_named_params() {
        assert_eq!(replace_params("WHERE id = :entry_id AND t = '10:30'"), "WHERE id = NULL AND t = '10:30'");
        let tables = referenced_tables("SELECT * FROM entries WHERE name = :name").unwrap();
        assert_eq!(tables, set(&["entries"]));
    }

    #[test]
    fn test_rejects_non_select() {
        let err = referenced_tables("DELETE FROM entries").unwrap_err();
        assert!(matches!(err, FinanceDbError::SqlParse(_)));
        assert!(referenced_tables("SELEC nothing").is_err());
    }
}
