//! Renders schema changes into SQL for one dialect.
//!
//! The editor only collects statements; running them (and wrapping them in a
//! transaction) is the backend's job. Database-level defaults are used for
//! backfilling only and never survive the statement that needed them.

use std::collections::BTreeMap;

use super::dialect::Dialect;
use super::field::{Field, FieldKind, ManyToMany, Value};
use super::state::{ModelState, ProjectState};
use crate::error::MigrationError;

pub struct SchemaEditor {
    dialect: Dialect,
    statements: Vec<String>,
}

impl SchemaEditor {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            statements: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn push(&mut self, sql: String) {
        self.statements.push(sql);
    }

    // ========================================================================
    // Column rendering
    // ========================================================================

    fn column_type(&self, field: &Field, state: &ProjectState) -> Result<String, MigrationError> {
        match &field.kind {
            FieldKind::ForeignKey { to, .. } => {
                let pk = state.model(to)?.primary_key()?;
                self.column_type(pk, state)
            }
            kind => Ok(self.dialect.column_type(kind).unwrap_or_else(|| "text".to_string())),
        }
    }

    /// Full column definition as used in CREATE TABLE / ADD COLUMN.
    fn column_definition(
        &self,
        field: &Field,
        state: &ProjectState,
        default: Option<&Value>,
    ) -> Result<String, MigrationError> {
        let mut sql = format!("{} {}", self.q(&field.column()), self.column_type(field, state)?);

        if field.primary_key && field.kind == FieldKind::AutoId {
            sql.push_str(" NOT NULL ");
            sql.push_str(self.dialect.auto_pk_suffix());
            return Ok(sql);
        }

        if let Some(value) = default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&value.to_sql_literal());
        }
        sql.push_str(if field.is_nullable() { " NULL" } else { " NOT NULL" });

        if field.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if field.unique {
            sql.push_str(" UNIQUE");
        }

        if let FieldKind::ForeignKey { to, on_delete } = &field.kind {
            let target = state.model(to)?;
            let pk = target.primary_key()?;
            sql.push_str(&format!(
                " REFERENCES {} ({}) ON DELETE {}{}",
                self.q(&target.table()),
                self.q(&pk.column()),
                on_delete.as_sql(),
                self.dialect.fk_suffix(),
            ));
        }
        Ok(sql)
    }

    fn index_name(table: &str, columns: &[String], suffix: &str) -> String {
        format!("{}_{}_{}", table, columns.join("_"), suffix)
    }

    /// Indexes every foreign key column and every unique-together set.
    fn create_indexes(&mut self, model: &ModelState) {
        let table = model.table();
        for field in model.fields.iter().filter(|f| f.related_model().is_some()) {
            let column = field.column();
            let sql = format!(
                "CREATE INDEX {} ON {} ({})",
                self.q(&Self::index_name(&table, std::slice::from_ref(&column), "idx")),
                self.q(&table),
                self.q(&column),
            );
            self.push(sql);
        }
        for names in &model.unique_together {
            let columns: Vec<String> = names
                .iter()
                .map(|name| model.field(name).map(Field::column).unwrap_or_else(|| name.clone()))
                .collect();
            let quoted: Vec<String> = columns.iter().map(|c| self.q(c)).collect();
            let sql = format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                self.q(&Self::index_name(&table, &columns, "uniq")),
                self.q(&table),
                quoted.join(", "),
            );
            self.push(sql);
        }
    }

    fn create_table(&mut self, name: &str, model: &ModelState, state: &ProjectState) -> Result<(), MigrationError> {
        let columns = model
            .fields
            .iter()
            .map(|f| self.column_definition(f, state, None))
            .collect::<Result<Vec<_>, _>>()?;
        let sql = format!("CREATE TABLE {} ({})", self.q(name), columns.join(", "));
        self.push(sql);
        Ok(())
    }

    // ========================================================================
    // Model operations
    // ========================================================================

    /// `state` must already contain `model` and everything it references.
    pub fn create_model(&mut self, model: &ModelState, state: &ProjectState) -> Result<(), MigrationError> {
        self.create_table(&model.table(), model, state)?;
        self.create_indexes(model);
        for relation in &model.many_to_many {
            self.create_m2m(model, relation, state)?;
        }
        Ok(())
    }

    pub fn delete_model(&mut self, model: &ModelState) {
        for relation in &model.many_to_many {
            self.delete_m2m(model, relation);
        }
        self.drop_table(&model.table());
    }

    fn drop_table(&mut self, table: &str) {
        let sql = match self.dialect {
            Dialect::Sqlite => format!("DROP TABLE {}", self.q(table)),
            Dialect::Postgres => format!("DROP TABLE {} CASCADE", self.q(table)),
        };
        self.push(sql);
    }

    pub fn create_m2m(
        &mut self,
        model: &ModelState,
        relation: &ManyToMany,
        state: &ProjectState,
    ) -> Result<(), MigrationError> {
        let through = model.through(relation);
        self.create_table(&through.table(), &through, state)?;
        self.create_indexes(&through);
        Ok(())
    }

    pub fn delete_m2m(&mut self, model: &ModelState, relation: &ManyToMany) {
        self.drop_table(&model.m2m_table(relation));
    }

    // ========================================================================
    // Field operations
    // ========================================================================

    /// Add `field` to a table shaped like `before`, producing `after`.
    /// Existing rows receive the field's literal default, if it has one.
    pub fn add_field(
        &mut self,
        before: &ModelState,
        after: &ModelState,
        field: &Field,
        state: &ProjectState,
    ) -> Result<(), MigrationError> {
        let backfill = field.backfill_value();
        let table = after.table();

        match self.dialect {
            Dialect::Sqlite => {
                if field.is_nullable() && backfill.is_none() && !field.unique {
                    let sql = format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        self.q(&table),
                        self.column_definition(field, state, None)?,
                    );
                    self.push(sql);
                    if field.related_model().is_some() {
                        self.create_column_index(&table, &field.column());
                    }
                } else {
                    let mut overrides = BTreeMap::new();
                    let expr = backfill
                        .map(|v| v.to_sql_literal())
                        .unwrap_or_else(|| "NULL".to_string());
                    overrides.insert(field.column(), expr);
                    self.remake_table(before, after, state, &overrides)?;
                }
            }
            Dialect::Postgres => {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.q(&table),
                    self.column_definition(field, state, backfill)?,
                );
                self.push(sql);
                if backfill.is_some() {
                    let sql = format!(
                        "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                        self.q(&table),
                        self.q(&field.column()),
                    );
                    self.push(sql);
                }
                if field.related_model().is_some() {
                    self.create_column_index(&table, &field.column());
                }
            }
        }
        Ok(())
    }

    pub fn remove_field(
        &mut self,
        before: &ModelState,
        after: &ModelState,
        field: &Field,
        state: &ProjectState,
    ) -> Result<(), MigrationError> {
        match self.dialect {
            Dialect::Sqlite => self.remake_table(before, after, state, &BTreeMap::new()),
            Dialect::Postgres => {
                let sql = format!(
                    "ALTER TABLE {} DROP COLUMN {} CASCADE",
                    self.q(&before.table()),
                    self.q(&field.column()),
                );
                self.push(sql);
                Ok(())
            }
        }
    }

    /// Change `old` into `new` in place. Only nullability, uniqueness and type
    /// reach storage; a change that renders the same column emits nothing.
    pub fn alter_field(
        &mut self,
        before: &ModelState,
        after: &ModelState,
        old: &Field,
        new: &Field,
        state: &ProjectState,
    ) -> Result<(), MigrationError> {
        let old_def = self.column_definition(old, state, None)?;
        let new_def = self.column_definition(new, state, None)?;
        if old_def == new_def {
            return Ok(());
        }

        let column = new.column();
        let tightening = old.is_nullable() && !new.is_nullable();
        let backfill = new.backfill_value();

        match self.dialect {
            Dialect::Sqlite => {
                let expr = match (tightening, backfill) {
                    (true, Some(value)) => {
                        format!("coalesce({}, {})", self.q(&old.column()), value.to_sql_literal())
                    }
                    _ => self.q(&old.column()),
                };
                let mut overrides = BTreeMap::new();
                overrides.insert(column, expr);
                self.remake_table(before, after, state, &overrides)
            }
            Dialect::Postgres => {
                let table = self.q(&after.table());
                let col = self.q(&column);
                let old_type = self.column_type(old, state)?;
                let new_type = self.column_type(new, state)?;
                if old_type != new_type {
                    self.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                        table, col, new_type, col, new_type
                    ));
                }
                if tightening {
                    if let Some(value) = backfill {
                        self.push(format!(
                            "UPDATE {} SET {} = {} WHERE {} IS NULL",
                            table, col, value.to_sql_literal(), col
                        ));
                    }
                    self.push(format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL", table, col));
                } else if !old.is_nullable() && new.is_nullable() {
                    self.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL", table, col));
                }
                let constraint = self.q(&Self::index_name(&after.table(), std::slice::from_ref(&column), "uniq"));
                if new.unique && !old.unique {
                    self.push(format!("ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})", table, constraint, col));
                } else if old.unique && !new.unique {
                    self.push(format!("ALTER TABLE {} DROP CONSTRAINT {}", table, constraint));
                }
                Ok(())
            }
        }
    }

    fn create_column_index(&mut self, table: &str, column: &str) {
        let sql = format!(
            "CREATE INDEX {} ON {} ({})",
            self.q(&Self::index_name(table, &[column.to_string()], "idx")),
            self.q(table),
            self.q(column),
        );
        self.push(sql);
    }

    /// Rebuild a SQLite table as `after`: create a copy, move the rows over,
    /// swap the copy in and recreate indexes. Columns of `after` are filled
    /// from `overrides` when present, else from the same column of `before`;
    /// columns in neither are left NULL.
    fn remake_table(
        &mut self,
        before: &ModelState,
        after: &ModelState,
        state: &ProjectState,
        overrides: &BTreeMap<String, String>,
    ) -> Result<(), MigrationError> {
        let table = after.table();
        let temp = format!("new__{}", table);
        self.create_table(&temp, after, state)?;

        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for field in &after.fields {
            let column = field.column();
            if let Some(expr) = overrides.get(&column) {
                targets.push(self.q(&column));
                sources.push(expr.clone());
            } else if before.field(&field.name).is_some() {
                targets.push(self.q(&column));
                sources.push(self.q(&column));
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.q(&temp),
            targets.join(", "),
            sources.join(", "),
            self.q(&before.table()),
        );
        self.push(sql);
        self.push(format!("DROP TABLE {}", self.q(&before.table())));
        self.push(format!("ALTER TABLE {} RENAME TO {}", self.q(&temp), self.q(&table)));
        self.create_indexes(after);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::{FieldDefault, OnDelete};
    use crate::schema::ModelRef;

    fn location(with_name: bool, address_null: bool) -> ModelState {
        let mut address = Field::new("address", FieldKind::Text);
        if address_null {
            address = address.blank().null();
        }
        let mut fields = vec![Field::uuid_pk(), address];
        if with_name {
            fields.push(Field::char("name", 255).default(FieldDefault::text("Home")));
        }
        ModelState::new("core", "Location", fields, vec![])
    }

    fn group() -> ModelState {
        ModelState::new("auth", "Group", vec![Field::auto_pk(), Field::char("name", 150).unique()], vec![])
    }

    fn state_with(models: Vec<ModelState>) -> ProjectState {
        let mut state = ProjectState::new();
        for model in models {
            state.add_model(model).unwrap();
        }
        state
    }

    #[test]
    fn test_create_model_with_foreign_key() {
        let room = ModelState::new(
            "core",
            "Room",
            vec![
                Field::uuid_pk(),
                Field::foreign_key("location", ModelRef::new("core", "location"), OnDelete::Cascade),
            ],
            vec![],
        );
        let state = state_with(vec![location(false, false), room.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Sqlite);
        editor.create_model(&room, &state).unwrap();

        let sql = editor.into_statements();
        assert_eq!(
            sql[0],
            "CREATE TABLE \"core_room\" (\"id\" char(36) NOT NULL PRIMARY KEY, \
             \"location_id\" char(36) NOT NULL REFERENCES \"core_location\" (\"id\") ON DELETE CASCADE)"
        );
        assert_eq!(sql[1], "CREATE INDEX \"core_room_location_id_idx\" ON \"core_room\" (\"location_id\")");
    }

    #[test]
    fn test_sqlite_add_field_with_default_remakes_table() {
        let before = location(false, false);
        let after = location(true, false);
        let state = state_with(vec![after.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Sqlite);
        editor
            .add_field(&before, &after, after.field("name").unwrap(), &state)
            .unwrap();

        let sql = editor.into_statements();
        assert!(sql[0].starts_with("CREATE TABLE \"new__core_location\""));
        assert!(!sql[0].contains("DEFAULT"));
        assert_eq!(
            sql[1],
            "INSERT INTO \"new__core_location\" (\"id\", \"address\", \"name\") \
             SELECT \"id\", \"address\", 'Home' FROM \"core_location\""
        );
        assert_eq!(sql[2], "DROP TABLE \"core_location\"");
        assert_eq!(sql[3], "ALTER TABLE \"new__core_location\" RENAME TO \"core_location\"");
    }

    #[test]
    fn test_postgres_add_field_drops_default_after_backfill() {
        let before = location(false, false);
        let after = location(true, false);
        let state = state_with(vec![after.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Postgres);
        editor
            .add_field(&before, &after, after.field("name").unwrap(), &state)
            .unwrap();

        assert_eq!(
            editor.statements(),
            &[
                "ALTER TABLE \"core_location\" ADD COLUMN \"name\" varchar(255) DEFAULT 'Home' NOT NULL".to_string(),
                "ALTER TABLE \"core_location\" ALTER COLUMN \"name\" DROP DEFAULT".to_string(),
            ]
        );
    }

    #[test]
    fn test_sqlite_nullable_field_uses_add_column() {
        let before = location(false, false);
        let mut after = before.clone();
        let note = Field::new("note", FieldKind::Text).null();
        after.fields.push(note.clone());
        let state = state_with(vec![after.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Sqlite);
        editor.add_field(&before, &after, &note, &state).unwrap();
        assert_eq!(
            editor.statements(),
            &["ALTER TABLE \"core_location\" ADD COLUMN \"note\" text NULL".to_string()]
        );
    }

    #[test]
    fn test_postgres_relaxing_nullability() {
        let before = location(false, false);
        let after = location(false, true);
        let state = state_with(vec![after.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Postgres);
        editor
            .alter_field(&before, &after, before.field("address").unwrap(), after.field("address").unwrap(), &state)
            .unwrap();
        assert_eq!(
            editor.statements(),
            &["ALTER TABLE \"core_location\" ALTER COLUMN \"address\" DROP NOT NULL".to_string()]
        );
    }

    #[test]
    fn test_blank_only_change_emits_nothing() {
        let before = location(false, false);
        let mut after = before.clone();
        after.fields[1] = after.fields[1].clone().blank();
        let state = state_with(vec![after.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Sqlite);
        editor
            .alter_field(&before, &after, &before.fields[1], &after.fields[1], &state)
            .unwrap();
        assert!(editor.statements().is_empty());
    }

    #[test]
    fn test_m2m_table_uses_group_integer_key() {
        let owners = ManyToMany::new("owners", ModelRef::new("auth", "group")).related_name("owned_locations");
        let mut loc = location(true, true);
        loc.many_to_many.push(owners.clone());
        let state = state_with(vec![loc.clone(), group()]);
        let mut editor = SchemaEditor::new(Dialect::Sqlite);
        editor.create_m2m(&loc, &owners, &state).unwrap();

        let sql = editor.into_statements();
        assert_eq!(
            sql[0],
            "CREATE TABLE \"core_location_owners\" (\"id\" integer NOT NULL PRIMARY KEY AUTOINCREMENT, \
             \"location_id\" char(36) NOT NULL REFERENCES \"core_location\" (\"id\") ON DELETE CASCADE, \
             \"group_id\" integer NOT NULL REFERENCES \"auth_group\" (\"id\") ON DELETE CASCADE)"
        );
        assert_eq!(
            sql.last().unwrap(),
            "CREATE UNIQUE INDEX \"core_location_owners_location_id_group_id_uniq\" \
             ON \"core_location_owners\" (\"location_id\", \"group_id\")"
        );
    }

    #[test]
    fn test_postgres_foreign_keys_are_deferrable() {
        let room = ModelState::new(
            "core",
            "Room",
            vec![
                Field::uuid_pk(),
                Field::foreign_key("location", ModelRef::new("core", "location"), OnDelete::Cascade),
            ],
            vec![],
        );
        let state = state_with(vec![location(false, false), room.clone()]);
        let mut editor = SchemaEditor::new(Dialect::Postgres);
        editor.create_model(&room, &state).unwrap();
        assert!(editor.statements()[0].contains("ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED"));
        assert!(editor.statements()[0].contains("\"id\" uuid NOT NULL PRIMARY KEY"));
    }
}
