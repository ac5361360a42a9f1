//! # SQL Rendering
//!
//! Turns a [`ChangeSet`] into up and down statements for one dialect, and
//! reads/writes the migration file format:
//!
//! ```sql
//! -- Migration: 20240501093000_add_age
//! -- App: users
//!
//! -- +up
//! ALTER TABLE "users" ADD COLUMN "age" BIGINT NOT NULL DEFAULT 0;
//!
//! -- +down
//! ALTER TABLE "users" DROP COLUMN "age";
//! ```
//!
//! Entries starting with `--` are notes for a human (changes SQLite cannot
//! express as `ALTER TABLE`, or tag edits with no schema effect); they are
//! written to the file but never executed. Identifiers are quoted for the
//! target dialect.

use super::changes::ChangeSet;
use super::descriptor::{unwrap_option, FieldDescriptor, ModelDescriptor};
use crate::database::Dialect;
use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::path::Path;

const UP_MARKER: &str = "-- +up";
const DOWN_MARKER: &str = "-- +down";

/// Up and down statements of one migration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationScript {
    /// Statements applied by `migrate`
    pub up: Vec<String>,
    /// Statements applied by rollback
    pub down: Vec<String>,
}

impl MigrationScript {
    /// Executable up statements (notes removed)
    pub fn up_statements(&self) -> impl Iterator<Item = &str> {
        executable(&self.up)
    }

    /// Executable down statements (notes removed)
    pub fn down_statements(&self) -> impl Iterator<Item = &str> {
        executable(&self.down)
    }

    /// Render the file text; `header` lines become leading comments
    #[must_use]
    pub fn render(&self, header: &[String]) -> String {
        let mut out = String::new();
        for line in header {
            let _ = writeln!(out, "-- {line}");
        }
        if !header.is_empty() {
            out.push('\n');
        }

        for (marker, statements) in [(UP_MARKER, &self.up), (DOWN_MARKER, &self.down)] {
            let _ = writeln!(out, "{marker}");
            for stmt in statements {
                if is_note(stmt) {
                    let _ = writeln!(out, "{stmt}");
                } else {
                    let _ = writeln!(out, "{stmt};");
                }
            }
            if marker == UP_MARKER {
                out.push('\n');
            }
        }
        out
    }

    /// Parse file text; `path` is used in errors
    ///
    /// Comments are dropped, so a parsed script only holds executable
    /// statements.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMigrationFile` when the `-- +up` section is
    /// missing, a section marker repeats, or SQL appears before the first
    /// marker.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidMigrationFile {
            path: path.to_path_buf(),
            reason,
        };

        let mut up: Option<String> = None;
        let mut down: Option<String> = None;
        let mut in_down = false;

        for (number, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case(UP_MARKER) {
                if up.is_some() {
                    return Err(invalid(format!("line {}: duplicate {UP_MARKER}", number + 1)));
                }
                up = Some(String::new());
                in_down = false;
                continue;
            }
            if trimmed.eq_ignore_ascii_case(DOWN_MARKER) {
                if down.is_some() {
                    return Err(invalid(format!("line {}: duplicate {DOWN_MARKER}", number + 1)));
                }
                down = Some(String::new());
                in_down = true;
                continue;
            }

            let section = if in_down { down.as_mut() } else { up.as_mut() };
            match section {
                Some(section) => {
                    section.push_str(line);
                    section.push('\n');
                }
                None if trimmed.is_empty() || trimmed.starts_with("--") => {}
                None => {
                    return Err(invalid(format!(
                        "line {}: statement outside a section",
                        number + 1
                    )))
                }
            }
        }

        let up = up.ok_or_else(|| invalid(format!("missing {UP_MARKER} section")))?;
        Ok(Self {
            up: split_statements(&up),
            down: down.as_deref().map(split_statements).unwrap_or_default(),
        })
    }
}

fn is_note(stmt: &str) -> bool {
    stmt.trim_start().starts_with("--")
}

fn executable(statements: &[String]) -> impl Iterator<Item = &str> {
    statements
        .iter()
        .map(String::as_str)
        .filter(|s| !is_note(s))
}

/// Split SQL on `;` outside quotes, dropping `--` comments
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    // doubled quote is an escaped quote
                    if chars.peek() == Some(&q) {
                        if let Some(next) = chars.next() {
                            current.push(next);
                        }
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            current.push('\n');
                            break;
                        }
                    }
                }
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let stmt = raw
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !stmt.trim().is_empty() {
        statements.push(stmt.trim().to_string());
    }
}

/// Render the statements for `changes`
///
/// Up runs: create new tables, add columns, alter modified columns, drop
/// deleted columns, rebuild replaced tables, drop deleted tables. Down
/// undoes each step in reverse order, rebuilding dropped tables and columns
/// from their last recorded descriptors.
#[must_use]
pub fn render_migration(changes: &ChangeSet, dialect: Dialect) -> MigrationScript {
    let mut steps: Vec<(Vec<String>, Vec<String>)> = Vec::new();

    for model in &changes.new_models {
        steps.push((create_table(model, dialect), vec![drop_table(model, dialect)]));
    }

    for (model, fields) in &changes.new_fields {
        let table = table_of(model);
        for field in fields {
            let column = Column::from_field(field, dialect);
            steps.push((column.add(&table), column.drop(&table)));
        }
    }

    for (model, modified) in &changes.modified_fields {
        let table = table_of(model);
        for change in modified {
            let before = Column::from_field(&change.before, dialect);
            let after = Column::from_field(&change.after, dialect);
            steps.push((
                alter_column(&table, &before, &after),
                alter_column(&table, &after, &before),
            ));
        }
    }

    for (model, fields) in &changes.deleted_fields {
        let table = table_of(model);
        for field in fields {
            let column = Column::from_field(field, dialect);
            steps.push((column.drop(&table), column.add(&table)));
        }
    }

    for change in &changes.replaced_models {
        let mut up = vec![drop_table(&change.before, dialect)];
        up.extend(create_table(&change.after, dialect));
        let mut down = vec![drop_table(&change.after, dialect)];
        down.extend(create_table(&change.before, dialect));
        steps.push((up, down));
    }

    for model in &changes.deleted_models {
        steps.push((vec![drop_table(model, dialect)], create_table(model, dialect)));
    }

    let mut script = MigrationScript::default();
    for (up, _) in &steps {
        script.up.extend(up.iter().cloned());
    }
    for (_, down) in steps.iter().rev() {
        script.down.extend(down.iter().cloned());
    }
    script
}

fn table_of(model: &str) -> String {
    super::naming::table_name(model)
}

/// Column definitions contributed by an embedded `BaseModel`
fn base_columns(dialect: Dialect) -> Vec<String> {
    let (id, timestamp, now) = match dialect {
        Dialect::Sqlite => ("INTEGER PRIMARY KEY AUTOINCREMENT", "TIMESTAMP", "CURRENT_TIMESTAMP"),
        Dialect::Postgres => ("BIGSERIAL PRIMARY KEY", "TIMESTAMPTZ", "CURRENT_TIMESTAMP"),
        Dialect::MySql => (
            "BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY",
            "DATETIME(3)",
            "CURRENT_TIMESTAMP(3)",
        ),
    };
    let q = |name: &str| dialect.quote_ident(name);
    vec![
        format!("{} {id}", q("id")),
        format!("{} {timestamp} NOT NULL DEFAULT {now}", q("created_at")),
        format!("{} {timestamp} NOT NULL DEFAULT {now}", q("updated_at")),
        format!("{} {timestamp}", q("deleted_at")),
    ]
}

fn create_table(model: &ModelDescriptor, dialect: Dialect) -> Vec<String> {
    let table = model.table_name();
    let q = |name: &str| dialect.quote_ident(name);

    let columns: Vec<Column> = model
        .fields
        .iter()
        .map(|f| Column::from_field(f, dialect))
        .collect();

    let mut lines = if model.base_model {
        base_columns(dialect)
    } else {
        Vec::new()
    };
    lines.extend(columns.iter().map(|c| c.definition(false)));

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n    {}\n)",
        q(&table),
        lines.join(",\n    ")
    )];
    if model.base_model {
        statements.push(format!(
            "CREATE INDEX {} ON {} ({})",
            q(&format!("idx_{table}_deleted_at")),
            q(&table),
            q("deleted_at")
        ));
    }
    for column in &columns {
        statements.extend(column.create_indexes(&table));
    }
    statements
}

fn drop_table(model: &ModelDescriptor, dialect: Dialect) -> String {
    format!("DROP TABLE {}", dialect.quote_ident(&model.table_name()))
}

fn alter_column(table: &str, from: &Column, to: &Column) -> Vec<String> {
    // tag-only edits such as `size` on SQLite leave the column untouched
    if from == to {
        return vec![format!(
            "-- unchanged: {table}.{} keeps {} on {}",
            to.name,
            to.definition(false),
            to.dialect
        )];
    }

    let dialect = to.dialect;
    let q = |name: &str| dialect.quote_ident(name);
    let mut statements = from.drop_indexes(table);
    let qtable = q(table);

    if from.name != to.name {
        statements.push(format!(
            "ALTER TABLE {qtable} RENAME COLUMN {} TO {}",
            q(&from.name),
            q(&to.name)
        ));
    }
    let column = q(&to.name);
    let redefined =
        from.sql_type != to.sql_type || from.nullable != to.nullable || from.default != to.default;

    match dialect {
        Dialect::Postgres => {
            if from.sql_type != to.sql_type {
                statements.push(format!(
                    "ALTER TABLE {qtable} ALTER COLUMN {column} TYPE {ty} USING {column}::{ty}",
                    ty = to.sql_type
                ));
            }
            if from.default != to.default {
                statements.push(match &to.default {
                    Some(default) => {
                        format!("ALTER TABLE {qtable} ALTER COLUMN {column} SET DEFAULT {default}")
                    }
                    None => format!("ALTER TABLE {qtable} ALTER COLUMN {column} DROP DEFAULT"),
                });
            }
            if from.nullable != to.nullable {
                let action = if to.nullable { "DROP" } else { "SET" };
                statements.push(format!(
                    "ALTER TABLE {qtable} ALTER COLUMN {column} {action} NOT NULL"
                ));
            }
        }
        Dialect::MySql => {
            if redefined {
                statements.push(format!(
                    "ALTER TABLE {qtable} MODIFY COLUMN {}",
                    to.definition(false)
                ));
            }
        }
        Dialect::Sqlite => {
            if redefined {
                statements.push(format!(
                    "-- manual: SQLite cannot alter {table}.{} in place; rebuild the table to change {} to {}",
                    to.name,
                    from.definition(false),
                    to.definition(false)
                ));
            }
        }
    }

    statements.extend(to.create_indexes(table));
    statements
}

/// A model field resolved to column terms
#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    name: String,
    sql_type: String,
    nullable: bool,
    default: Option<String>,
    unique: bool,
    index: bool,
    primary_key: bool,
    dialect: Dialect,
}

impl Column {
    fn from_field(field: &FieldDescriptor, dialect: Dialect) -> Self {
        let tag = field.tag();
        let sql_type = tag
            .get("type")
            .map_or_else(|| column_type(field, dialect), ToString::to_string);
        Self {
            name: field.column_name(),
            sql_type,
            nullable: field.is_nullable(),
            default: tag.get("default").map(ToString::to_string),
            unique: tag.has("unique"),
            index: tag.has("index"),
            primary_key: tag.has("primary_key"),
            dialect,
        }
    }

    fn quoted(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    /// Column definition; added columns need a default when NOT NULL
    fn definition(&self, adding: bool) -> String {
        let mut def = format!("{} {}", self.quoted(&self.name), self.sql_type);
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if self.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        match &self.default {
            Some(default) => {
                let _ = write!(def, " DEFAULT {default}");
            }
            None if adding && !self.nullable => {
                if let Some(zero) = zero_value(&self.sql_type, self.dialect) {
                    let _ = write!(def, " DEFAULT {zero}");
                }
            }
            None => {}
        }
        def
    }

    fn add(&self, table: &str) -> Vec<String> {
        let mut statements = vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quoted(table),
            self.definition(true)
        )];
        statements.extend(self.create_indexes(table));
        statements
    }

    fn drop(&self, table: &str) -> Vec<String> {
        let mut statements = self.drop_indexes(table);
        statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quoted(table),
            self.quoted(&self.name)
        ));
        statements
    }

    fn index_names(&self, table: &str) -> Vec<(String, bool)> {
        let mut names = Vec::new();
        if self.unique {
            names.push((format!("uniq_{table}_{}", self.name), true));
        }
        if self.index {
            names.push((format!("idx_{table}_{}", self.name), false));
        }
        names
    }

    fn create_indexes(&self, table: &str) -> Vec<String> {
        self.index_names(table)
            .into_iter()
            .map(|(name, unique)| {
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if unique { "UNIQUE " } else { "" },
                    self.quoted(&name),
                    self.quoted(table),
                    self.quoted(&self.name)
                )
            })
            .collect()
    }

    fn drop_indexes(&self, table: &str) -> Vec<String> {
        self.index_names(table)
            .into_iter()
            .map(|(name, _)| match self.dialect {
                Dialect::MySql => {
                    format!("DROP INDEX {} ON {}", self.quoted(&name), self.quoted(table))
                }
                Dialect::Sqlite | Dialect::Postgres => {
                    format!("DROP INDEX IF EXISTS {}", self.quoted(&name))
                }
            })
            .collect()
    }
}

/// Column type for a field's Rust type
#[must_use]
pub fn column_type(field: &FieldDescriptor, dialect: Dialect) -> String {
    let sig = &field.type_signature;
    let inner = unwrap_option(sig).unwrap_or(sig);

    if is_byte_vec(inner) {
        return match dialect {
            Dialect::Postgres => "BYTEA",
            Dialect::Sqlite | Dialect::MySql => "BLOB",
        }
        .to_string();
    }

    let name = base_name(inner);
    if matches!(name, "String" | "str") {
        return string_type(field, dialect);
    }

    let ty = match dialect {
        Dialect::Postgres => match name {
            "i8" | "i16" | "i32" | "u8" | "u16" => "INTEGER",
            "i64" | "u32" | "u64" | "isize" | "usize" => "BIGINT",
            "f32" => "REAL",
            "f64" => "DOUBLE PRECISION",
            "bool" => "BOOLEAN",
            "DateTime" => "TIMESTAMPTZ",
            "NaiveDateTime" => "TIMESTAMP",
            "NaiveDate" => "DATE",
            "NaiveTime" => "TIME",
            "Uuid" => "UUID",
            "Value" | "JsonValue" => "JSONB",
            "Decimal" => "NUMERIC",
            _ => "TEXT",
        },
        Dialect::MySql => match name {
            "i8" | "u8" => "TINYINT",
            "i16" | "u16" => "SMALLINT",
            "i32" => "INT",
            "u32" => "INT UNSIGNED",
            "i64" | "isize" => "BIGINT",
            "u64" | "usize" => "BIGINT UNSIGNED",
            "f32" => "FLOAT",
            "f64" => "DOUBLE",
            "bool" => "BOOLEAN",
            "DateTime" | "NaiveDateTime" => "DATETIME(3)",
            "NaiveDate" => "DATE",
            "NaiveTime" => "TIME",
            "Uuid" => "CHAR(36)",
            "Value" | "JsonValue" => "JSON",
            "Decimal" => "DECIMAL(65,30)",
            _ => "TEXT",
        },
        Dialect::Sqlite => match name {
            "i8" | "i16" | "i32" | "u8" | "u16" | "i64" | "u32" | "u64" | "isize" | "usize" => {
                "INTEGER"
            }
            "f32" | "f64" => "REAL",
            "bool" => "BOOLEAN",
            "DateTime" | "NaiveDateTime" => "TIMESTAMP",
            "NaiveDate" => "DATE",
            "NaiveTime" => "TIME",
            "Decimal" => "NUMERIC",
            _ => "TEXT",
        },
    };
    ty.to_string()
}

/// `size = N` gives `VARCHAR(N)` where it matters; MySQL cannot index
/// `TEXT`, so indexed strings there default to `VARCHAR(255)`
fn string_type(field: &FieldDescriptor, dialect: Dialect) -> String {
    let tag = field.tag();
    match (dialect, tag.size()) {
        (Dialect::Sqlite, _) => "TEXT".to_string(),
        (_, Some(size)) => format!("VARCHAR({size})"),
        (Dialect::MySql, None) if tag.has("unique") || tag.has("index") => {
            "VARCHAR(255)".to_string()
        }
        _ => "TEXT".to_string(),
    }
}

/// Last path segment without generics or references:
/// `chrono::DateTime<Utc>` -> `DateTime`, `&'static str` -> `str`
fn base_name(ty: &str) -> &str {
    let ty = ty.trim_start_matches('&');
    let ty = match ty.strip_prefix('\'') {
        Some(rest) => rest.split_once(' ').map_or(rest, |(_, t)| t),
        None => ty,
    };
    let ty = ty.trim_start_matches("mut ");
    let head = ty.split('<').next().unwrap_or(ty);
    head.rsplit("::").next().unwrap_or(head)
}

fn is_byte_vec(ty: &str) -> bool {
    ty.strip_suffix('>')
        .and_then(|t| t.split_once('<'))
        .is_some_and(|(head, arg)| base_name(head) == "Vec" && arg == "u8")
}

/// Default used when adding a NOT NULL column to a populated table
///
/// MySQL rejects literal defaults on `TEXT`, `BLOB` and `JSON` columns and
/// fills existing rows with the type's implicit default instead.
fn zero_value(sql_type: &str, dialect: Dialect) -> Option<&'static str> {
    const NUMERIC: [&str; 10] = [
        "INT", "BIGINT", "SMALLINT", "TINYINT", "REAL", "DOUBLE", "NUMERIC", "DECIMAL", "FLOAT",
        "MEDIUMINT",
    ];

    let upper = sql_type.to_ascii_uppercase();
    if dialect == Dialect::MySql
        && (upper.ends_with("TEXT") || upper.ends_with("BLOB") || upper.starts_with("JSON"))
    {
        return None;
    }

    Some(if NUMERIC.iter().any(|p| upper.starts_with(p)) {
        "0"
    } else if upper.starts_with("BOOL") {
        "FALSE"
    } else if upper.starts_with("TIMESTAMP") || upper.starts_with("DATETIME") {
        "'1970-01-01 00:00:00'"
    } else if upper.starts_with("DATE") {
        "'1970-01-01'"
    } else if upper.starts_with("TIME") {
        "'00:00:00'"
    } else if upper.starts_with("UUID") {
        "'00000000-0000-0000-0000-000000000000'"
    } else if upper.starts_with("JSON") {
        "'{}'"
    } else if upper.starts_with("BLOB") || upper.starts_with("BYTEA") {
        match dialect {
            Dialect::Sqlite => "X''",
            Dialect::Postgres | Dialect::MySql => "''",
        }
    } else {
        "''"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::changes::FieldChange;
    use crate::migrate::snapshot::AppSnapshot;
    use std::path::PathBuf;

    fn field(name: &str, ty: &str, tag: &str) -> FieldDescriptor {
        FieldDescriptor::new(name, ty, tag)
    }

    fn user(extra: Vec<FieldDescriptor>) -> ModelDescriptor {
        let mut fields = vec![field("name", "String", ""), field("email", "String", "unique")];
        fields.extend(extra);
        ModelDescriptor::new("User", fields)
    }

    #[test]
    fn test_added_field_adds_one_column() {
        let before = user(vec![]);
        let after = user(vec![field("age", "i64", "")]);
        let changes = ChangeSet::detect(
            &[after],
            Some(&AppSnapshot::from_models(&[before], "1")),
        );

        let script = render_migration(&changes, Dialect::Sqlite);
        assert_eq!(
            script.up,
            vec![r#"ALTER TABLE "users" ADD COLUMN "age" INTEGER NOT NULL DEFAULT 0"#]
        );
        assert_eq!(script.down, vec![r#"ALTER TABLE "users" DROP COLUMN "age""#]);
    }

    #[test]
    fn test_new_model_creates_table_with_base_columns() {
        let changes = ChangeSet::detect(&[user(vec![])], None);
        let script = render_migration(&changes, Dialect::Postgres);

        let create = &script.up[0];
        assert!(create.starts_with("CREATE TABLE \"users\""));
        assert!(create.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(create.contains("\"deleted_at\" TIMESTAMPTZ"));
        assert!(create.contains("\"name\" TEXT NOT NULL"));
        assert_eq!(
            script.up[1],
            r#"CREATE INDEX "idx_users_deleted_at" ON "users" ("deleted_at")"#
        );
        assert_eq!(
            script.up[2],
            r#"CREATE UNIQUE INDEX "uniq_users_email" ON "users" ("email")"#
        );
        assert_eq!(script.down, vec![r#"DROP TABLE "users""#]);
    }

    #[test]
    fn test_derive_only_model_has_only_its_own_columns() {
        let account = ModelDescriptor::new(
            "Account",
            vec![field("id", "i64", "primary_key"), field("name", "String", "")],
        )
        .with_base_model(false);
        let script = render_migration(&ChangeSet::detect(&[account], None), Dialect::Sqlite);

        assert_eq!(
            script.up,
            vec!["CREATE TABLE \"accounts\" (\n    \"id\" INTEGER NOT NULL PRIMARY KEY,\n    \"name\" TEXT NOT NULL\n)"]
        );
        assert_eq!(script.down, vec![r#"DROP TABLE "accounts""#]);
    }

    #[test]
    fn test_mysql_rendering() {
        let changes = ChangeSet::detect(&[user(vec![field("bio", "String", "")])], None);
        let script = render_migration(&changes, Dialect::MySql);

        let create = &script.up[0];
        assert!(create.starts_with("CREATE TABLE `users`"));
        assert!(create.contains("`id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY"));
        assert!(create.contains("`created_at` DATETIME(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3)"));
        assert!(create.contains("`email` VARCHAR(255) NOT NULL"));
        assert!(create.contains("`bio` TEXT NOT NULL"));
        assert_eq!(
            script.up[2],
            "CREATE UNIQUE INDEX `uniq_users_email` ON `users` (`email`)"
        );

        let before = user(vec![]);
        let after = user(vec![field("bio", "String", ""), field("age", "u32", "")]);
        let added = ChangeSet::detect(&[after], Some(&AppSnapshot::from_models(&[before], "1")));
        let script = render_migration(&added, Dialect::MySql);
        assert_eq!(
            script.up,
            vec![
                "ALTER TABLE `users` ADD COLUMN `bio` TEXT NOT NULL",
                "ALTER TABLE `users` ADD COLUMN `age` INT UNSIGNED NOT NULL DEFAULT 0",
            ]
        );
    }

    #[test]
    fn test_mysql_modify_and_drop_index() {
        let mut changes = ChangeSet::default();
        changes.modified_fields.insert(
            "User".to_string(),
            vec![FieldChange {
                before: field("email", "String", "unique"),
                after: field("email", "Option<String>", "size = 320"),
            }],
        );

        let script = render_migration(&changes, Dialect::MySql);
        assert_eq!(
            script.up,
            vec![
                "DROP INDEX `uniq_users_email` ON `users`",
                "ALTER TABLE `users` MODIFY COLUMN `email` VARCHAR(320)",
            ]
        );
        assert_eq!(
            script.down,
            vec![
                "ALTER TABLE `users` MODIFY COLUMN `email` VARCHAR(255) NOT NULL",
                "CREATE UNIQUE INDEX `uniq_users_email` ON `users` (`email`)",
            ]
        );
    }

    #[test]
    fn test_tag_change_without_schema_effect_leaves_a_note() {
        let mut changes = ChangeSet::default();
        changes.modified_fields.insert(
            "User".to_string(),
            vec![FieldChange {
                before: field("name", "String", "size = 64"),
                after: field("name", "String", "size = 128"),
            }],
        );

        let script = render_migration(&changes, Dialect::Sqlite);
        assert_eq!(script.up.len(), 1);
        assert!(script.up[0].starts_with("-- unchanged: users.name"));
        assert_eq!(script.up_statements().count(), 0);
        assert!(script.render(&[]).contains("-- +up\n-- unchanged:"));

        let pg = render_migration(&changes, Dialect::Postgres);
        assert_eq!(
            pg.up,
            vec![r#"ALTER TABLE "users" ALTER COLUMN "name" TYPE VARCHAR(128) USING "name"::VARCHAR(128)"#]
        );
    }

    #[test]
    fn test_base_model_toggle_rebuilds_the_table() {
        let before = ModelDescriptor::new(
            "User",
            vec![field("id", "i64", ""), field("name", "String", "")],
        )
        .with_base_model(false);
        let after = ModelDescriptor::new("User", vec![field("name", "String", "")]);
        let changes = ChangeSet::detect(&[after], Some(&AppSnapshot::from_models(&[before], "1")));

        let script = render_migration(&changes, Dialect::Sqlite);
        assert_eq!(script.up[0], r#"DROP TABLE "users""#);
        assert!(script.up[1].contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert_eq!(script.down[0], r#"DROP TABLE "users""#);
        assert!(script.down[1].contains("\"id\" INTEGER NOT NULL"));
        assert!(!script.down[1].contains("deleted_at"));
    }

    #[test]
    fn test_down_reverses_up_order() {
        let post = ModelDescriptor::new("Post", vec![field("title", "String", "")]);
        let before = user(vec![field("legacy", "Option<String>", "")]);
        let after = user(vec![]);
        let changes = ChangeSet::detect(
            &[after, post],
            Some(&AppSnapshot::from_models(&[before], "1")),
        );

        let script = render_migration(&changes, Dialect::Sqlite);
        assert!(script.up[0].starts_with("CREATE TABLE \"posts\""));
        assert_eq!(script.up.last().map(String::as_str), Some(r#"ALTER TABLE "users" DROP COLUMN "legacy""#));
        assert_eq!(
            script.down[0],
            r#"ALTER TABLE "users" ADD COLUMN "legacy" TEXT"#
        );
        assert_eq!(script.down.last().map(String::as_str), Some(r#"DROP TABLE "posts""#));
    }

    #[test]
    fn test_modified_field_per_dialect() {
        let mut changes = ChangeSet::default();
        changes.modified_fields.insert(
            "User".to_string(),
            vec![FieldChange {
                before: field("age", "i32", ""),
                after: field("age", "Option<i64>", ""),
            }],
        );

        let pg = render_migration(&changes, Dialect::Postgres);
        assert_eq!(
            pg.up,
            vec![
                r#"ALTER TABLE "users" ALTER COLUMN "age" TYPE BIGINT USING "age"::BIGINT"#,
                r#"ALTER TABLE "users" ALTER COLUMN "age" DROP NOT NULL"#,
            ]
        );
        assert_eq!(pg.down[1], r#"ALTER TABLE "users" ALTER COLUMN "age" SET NOT NULL"#);

        let sqlite = render_migration(&changes, Dialect::Sqlite);
        assert!(sqlite.up[0].starts_with("-- manual:"));
        assert_eq!(sqlite.up_statements().count(), 0);
    }

    #[test]
    fn test_type_mapping() {
        let cases = [
            ("i32", "INTEGER", "INTEGER"),
            ("i64", "BIGINT", "INTEGER"),
            ("f64", "DOUBLE PRECISION", "REAL"),
            ("bool", "BOOLEAN", "BOOLEAN"),
            ("&'static str", "TEXT", "TEXT"),
            ("Vec<u8>", "BYTEA", "BLOB"),
            ("chrono::DateTime<chrono::Utc>", "TIMESTAMPTZ", "TIMESTAMP"),
            ("Option<NaiveDate>", "DATE", "DATE"),
            ("uuid::Uuid", "UUID", "TEXT"),
            ("serde_json::Value", "JSONB", "TEXT"),
            ("Vec<String>", "TEXT", "TEXT"),
        ];
        for (ty, pg, sqlite) in cases {
            let f = field("x", ty, "");
            assert_eq!(column_type(&f, Dialect::Postgres), pg, "{ty}");
            assert_eq!(column_type(&f, Dialect::Sqlite), sqlite, "{ty}");
        }

        let mysql = [
            ("i32", "INT"),
            ("u64", "BIGINT UNSIGNED"),
            ("f64", "DOUBLE"),
            ("Vec<u8>", "BLOB"),
            ("chrono::NaiveDateTime", "DATETIME(3)"),
            ("uuid::Uuid", "CHAR(36)"),
            ("serde_json::Value", "JSON"),
            ("String", "TEXT"),
        ];
        for (ty, expected) in mysql {
            assert_eq!(column_type(&field("x", ty, ""), Dialect::MySql), expected, "{ty}");
        }
        assert_eq!(
            column_type(&field("x", "String", "index"), Dialect::MySql),
            "VARCHAR(255)"
        );
        assert_eq!(
            column_type(&field("x", "String", "size = 64"), Dialect::Postgres),
            "VARCHAR(64)"
        );
    }

    #[test]
    fn test_file_round_trip() {
        let script = MigrationScript {
            up: vec![
                "CREATE TABLE \"notes\" (\n    \"body\" TEXT DEFAULT 'a;b'\n)".to_string(),
                "-- manual: rebuild".to_string(),
            ],
            down: vec!["DROP TABLE \"notes\"".to_string()],
        };
        let text = script.render(&["Migration: 1".to_string()]);
        assert!(text.starts_with("-- Migration: 1\n\n-- +up\n"));

        let parsed = MigrationScript::parse(&text, &PathBuf::from("1.sql")).unwrap();
        assert_eq!(parsed.up, vec![script.up[0].clone()]);
        assert_eq!(parsed.down, script.down);
    }

    #[test]
    fn test_parse_rejects_malformed_files() {
        let path = PathBuf::from("bad.sql");
        assert!(matches!(
            MigrationScript::parse("SELECT 1;", &path),
            Err(Error::InvalidMigrationFile { .. })
        ));
        assert!(MigrationScript::parse("-- +up\n-- +up\n", &path).is_err());

        let only_up = MigrationScript::parse("-- +up\nSELECT 1; SELECT 2;\n", &path).unwrap();
        assert_eq!(only_up.up, vec!["SELECT 1", "SELECT 2"]);
        assert!(only_up.down.is_empty());
    }
}
