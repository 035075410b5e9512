// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

/// SQL dialect: query building for the verification reads.
///
/// Implemented per driver. Pure string manipulation with no sqlx
/// dependency, so the query builders can be unit tested.
pub trait QueryDialect: Send + Sync {
    /// Return the driver name as a lowercase string ("mysql", "postgres", …).
    /// Used for logging only, never for branching logic.
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column, schema) per dialect.
    /// - MySQL / MariaDB → backtick: `` `col` ``
    /// - PostgreSQL → double-quote: `"col"`
    fn quote_ident(&self, s: &str) -> String;

    /// Return the `schema.` prefix for a qualified table reference.
    fn schema_prefix(&self, schema: &str) -> String {
        format!("{}.", self.quote_ident(schema))
    }

    /// Expression yielding the column's stored bytes without any charset
    /// conversion on the way to the client.
    /// - MySQL/MariaDB : `CAST(\`col\` AS BINARY) AS \`col\``
    /// - PostgreSQL    : `convert_to("col"::TEXT, 'UTF8') AS "col"`
    fn raw_bytes_expr(&self, col_quoted: &str) -> String;

    /// Expression yielding the primary key as a signed 64-bit integer,
    /// which `sqlx::AnyRow` decodes on every driver.
    fn key_expr(&self, col_quoted: &str) -> String;

    /// Bind placeholder for the 1-based parameter `n`.
    fn placeholder(&self, n: usize) -> String;

    /// The SQL returning `(column_name, character_set_name, collation_name)`
    /// in ordinal order for `(schema, table)`.
    fn introspect_sql(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// MySQL / MariaDB
// ─────────────────────────────────────────────────────────────────────────────

pub struct MysqlDialect;

impl QueryDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("`{}`", s.replace('`', "``"))
    }

    fn raw_bytes_expr(&self, col_quoted: &str) -> String {
        format!("CAST({} AS BINARY) AS {}", col_quoted, col_quoted)
    }

    fn key_expr(&self, col_quoted: &str) -> String {
        format!("CAST({} AS SIGNED) AS {}", col_quoted, col_quoted)
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn introspect_sql(&self) -> &'static str {
        "SELECT column_name, character_set_name, collation_name \
         FROM information_schema.columns \
         WHERE table_schema = ? AND table_name = ? \
         ORDER BY ordinal_position"
    }
}

// MariaDB shares MySQL's wire protocol and information_schema layout.
pub struct MariadbDialect;

impl QueryDialect for MariadbDialect {
    fn name(&self) -> &'static str {
        "mariadb"
    }

    fn quote_ident(&self, s: &str) -> String {
        MysqlDialect.quote_ident(s)
    }

    fn raw_bytes_expr(&self, col_quoted: &str) -> String {
        MysqlDialect.raw_bytes_expr(col_quoted)
    }

    fn key_expr(&self, col_quoted: &str) -> String {
        MysqlDialect.key_expr(col_quoted)
    }

    fn placeholder(&self, n: usize) -> String {
        MysqlDialect.placeholder(n)
    }

    fn introspect_sql(&self) -> &'static str {
        MysqlDialect.introspect_sql()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ─────────────────────────────────────────────────────────────────────────────

pub struct PostgresDialect;

impl QueryDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, s: &str) -> String {
        format!("\"{}\"", s.replace('"', "\"\""))
    }

    fn raw_bytes_expr(&self, col_quoted: &str) -> String {
        format!("convert_to({}::TEXT, 'UTF8') AS {}", col_quoted, col_quoted)
    }

    fn key_expr(&self, col_quoted: &str) -> String {
        format!("{}::BIGINT AS {}", col_quoted, col_quoted)
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    // Text is read back through convert_to(…, 'UTF8'), so text columns report
    // utf8mb4 and no collation: values compare exactly.
    fn introspect_sql(&self) -> &'static str {
        "SELECT column_name::TEXT, \
                CASE WHEN data_type IN ('text', 'character varying', 'character') \
                     THEN 'utf8mb4' END AS character_set_name, \
                NULL::TEXT AS collation_name \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 \
         ORDER BY ordinal_position"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the dialect from a driver name string.
pub fn from_driver(driver: &str) -> Box<dyn QueryDialect> {
    match driver {
        "mariadb" => Box::new(MariadbDialect),
        "postgres" => Box::new(PostgresDialect),
        _ => Box::new(MysqlDialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_reads_stored_bytes() {
        assert_eq!(
            MysqlDialect.raw_bytes_expr("`data`"),
            "CAST(`data` AS BINARY) AS `data`"
        );
        assert_eq!(MysqlDialect.placeholder(3), "?");
    }

    #[test]
    fn postgres_numbers_placeholders() {
        assert_eq!(PostgresDialect.placeholder(3), "$3");
        assert_eq!(PostgresDialect.key_expr("\"id\""), "\"id\"::BIGINT AS \"id\"");
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(MysqlDialect.quote_ident("we`ird"), "`we``ird`");
        assert_eq!(PostgresDialect.quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn factory_defaults_to_mysql() {
        assert_eq!(from_driver("mariadb").name(), "mariadb");
        assert_eq!(from_driver("postgres").name(), "postgres");
        assert_eq!(from_driver("anything").name(), "mysql");
    }
}
