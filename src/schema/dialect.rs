use serde::Serialize;

use super::field::FieldKind;

/// SQL flavour a schema editor renders for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Column type for a non-relational field kind. Foreign keys take the
    /// type of the primary key they point at, so they yield `None` here.
    pub fn column_type(&self, kind: &FieldKind) -> Option<String> {
        let ty = match (self, kind) {
            (Dialect::Sqlite, FieldKind::AutoId) => "integer".to_string(),
            (Dialect::Postgres, FieldKind::AutoId) => "bigint".to_string(),
            (Dialect::Sqlite, FieldKind::Uuid) => "char(36)".to_string(),
            (Dialect::Postgres, FieldKind::Uuid) => "uuid".to_string(),
            (Dialect::Sqlite, FieldKind::DateTime) => "datetime".to_string(),
            (Dialect::Postgres, FieldKind::DateTime) => "timestamp with time zone".to_string(),
            (_, FieldKind::Date) => "date".to_string(),
            (_, FieldKind::Char { max_length }) => format!("varchar({})", max_length),
            (_, FieldKind::Text) => "text".to_string(),
            (_, FieldKind::Image { .. }) => "varchar(100)".to_string(),
            (_, FieldKind::ForeignKey { .. }) => return None,
        };
        Some(ty)
    }

    pub fn auto_pk_suffix(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "PRIMARY KEY GENERATED BY DEFAULT AS IDENTITY",
        }
    }

    pub fn fk_suffix(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "",
            Dialect::Postgres => " DEFERRABLE INITIALLY DEFERRED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes_double_quotes() {
        assert_eq!(Dialect::Sqlite.quote("core_room"), "\"core_room\"");
        assert_eq!(Dialect::Postgres.quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_uuid_types_differ_by_dialect() {
        assert_eq!(Dialect::Sqlite.column_type(&FieldKind::Uuid).as_deref(), Some("char(36)"));
        assert_eq!(Dialect::Postgres.column_type(&FieldKind::Uuid).as_deref(), Some("uuid"));
    }
}
