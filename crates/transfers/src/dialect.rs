use common::types::Granularity;
use common::warehouse::Backend;

/// SQL rendering rules for one backend.
///
/// Fragments take already-rendered SQL expressions and return SQL text.
/// Paths into the semi-structured `data` column are dotted key names
/// (`send.amount`); they are compile-time constants, never user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// JSON text columns read with JSON1, plus the registered `try_to_double`.
    Sqlite,
    /// VARIANT columns read with bracket paths.
    Snowflake,
}

impl Dialect {
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Sqlite => Self::Sqlite,
            Backend::Snowflake => Self::Snowflake,
        }
    }

    pub fn backend(self) -> Backend {
        match self {
            Self::Sqlite => Backend::Sqlite,
            Self::Snowflake => Backend::Snowflake,
        }
    }

    /// Raw JSON value at `path`, or NULL when `col` is not valid JSON.
    fn json_at(self, col: &str, path: &str) -> String {
        match self {
            Self::Sqlite => format!("json_extract({col}, '$.{path}')"),
            Self::Snowflake => {
                let keys: String = path.split('.').map(|k| format!("['{k}']")).collect();
                format!("{col}{keys}")
            }
        }
    }

    /// Scalar at `path` as text.
    pub fn json_text(self, col: &str, path: &str) -> String {
        let value = self.json_at(col, path);
        match self {
            Self::Sqlite => format!("CASE WHEN json_valid({col}) THEN {value} END"),
            Self::Snowflake => format!("TO_VARCHAR({value})"),
        }
    }

    /// Number at `path`. Arrays, objects, booleans and non-numeric text are
    /// NULL; nothing here can make the query fail.
    pub fn json_number(self, col: &str, path: &str) -> String {
        let value = self.json_at(col, path);
        match self {
            Self::Sqlite => format!(
                "CASE WHEN json_valid({col}) AND json_type({col}, '$.{path}') IN ('integer', 'real', 'text') \
                 THEN try_to_double({value}) END"
            ),
            Self::Snowflake => format!(
                "CASE WHEN IS_ARRAY({value}) OR IS_OBJECT({value}) OR IS_BOOLEAN({value}) THEN NULL \
                 ELSE TRY_TO_DOUBLE(TO_VARCHAR({value})) END"
            ),
        }
    }

    pub fn text(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST({expr} AS TEXT)"),
            Self::Snowflake => format!("CAST({expr} AS VARCHAR)"),
        }
    }

    /// Lower-cased chain name; blank names are NULL so they group with
    /// missing ones.
    pub fn chain_name(self, expr: &str) -> String {
        self.text(&format!("NULLIF(LOWER(TRIM({expr})), '')"))
    }

    pub fn real(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST({expr} AS REAL)"),
            Self::Snowflake => format!("CAST({expr} AS FLOAT)"),
        }
    }

    pub fn timestamp(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST({expr} AS TEXT)"),
            Self::Snowflake => format!("CAST({expr} AS TIMESTAMP_NTZ)"),
        }
    }

    /// Lower-cased `field` contains the bound (already lower-cased) entry.
    /// Plain substring search, so `%` and `_` match themselves.
    pub fn contains_param(self, field: &str) -> String {
        match self {
            Self::Sqlite => format!("instr(lower({field}), ?) > 0"),
            Self::Snowflake => format!("CONTAINS(LOWER({field}), ?)"),
        }
    }

    /// Calendar date of a timestamp expression.
    pub fn date(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("date({expr})"),
            Self::Snowflake => format!("TO_DATE({expr})"),
        }
    }

    /// `expr` falls on a day in `[?, ?]`; binds start then end.
    pub fn date_between_params(self, expr: &str) -> String {
        format!(
            "{} BETWEEN {} AND {}",
            self.date(expr),
            self.date("?"),
            self.date("?")
        )
    }

    /// First day of the bucket containing `expr`, as `YYYY-MM-DD` text.
    /// Weeks start on Monday.
    pub fn bucket_start(self, expr: &str, granularity: Granularity) -> String {
        match (self, granularity) {
            (Self::Sqlite, Granularity::Day) => format!("date({expr})"),
            // 'weekday 0' moves forward to Sunday (or stays); back six days is Monday.
            (Self::Sqlite, Granularity::Week) => format!("date({expr}, 'weekday 0', '-6 days')"),
            (Self::Sqlite, Granularity::Month) => format!("date({expr}, 'start of month')"),
            (Self::Snowflake, g) => format!(
                "TO_VARCHAR(DATE_TRUNC('{}', TO_DATE({expr})), 'YYYY-MM-DD')",
                g.as_str().to_ascii_uppercase()
            ),
        }
    }

    /// Timestamp as `YYYY-MM-DD HH:MM:SS` text.
    pub fn timestamp_text(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("strftime('%Y-%m-%d %H:%M:%S', {expr})"),
            Self::Snowflake => format!("TO_VARCHAR({expr}, 'YYYY-MM-DD HH24:MI:SS')"),
        }
    }
}
