//! Field and relation descriptions used by model states and operations.

use serde::Serialize;

use super::ModelRef;

/// What happens to a row when the row its foreign key points at is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnDelete {
    Cascade,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    /// Auto-incrementing integer primary key.
    AutoId,
    Uuid,
    DateTime,
    Date,
    Char { max_length: u32 },
    Text,
    /// Relative path of an uploaded image, rooted at `upload_to`.
    Image { upload_to: String },
    ForeignKey { to: ModelRef, on_delete: OnDelete },
}

/// A literal value usable in DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Value {
    Text(String),
}

impl Value {
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldDefault {
    Literal(Value),
    /// Generated by the application on insert (`uuid` v4).
    NewUuid,
    /// Current time, generated by the application on insert.
    Now,
}

impl FieldDefault {
    pub fn text(s: impl Into<String>) -> Self {
        FieldDefault::Literal(Value::Text(s.into()))
    }

    /// Only literal defaults can be written into existing rows.
    pub fn backfill_literal(&self) -> Option<&Value> {
        match self {
            FieldDefault::Literal(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub null: bool,
    pub blank: bool,
    pub unique: bool,
    pub editable: bool,
    pub auto_now: bool,
    pub auto_now_add: bool,
    pub default: Option<FieldDefault>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary_key: false,
            null: false,
            blank: false,
            unique: false,
            editable: true,
            auto_now: false,
            auto_now_add: false,
            default: None,
        }
    }

    pub fn foreign_key(name: impl Into<String>, to: ModelRef, on_delete: OnDelete) -> Self {
        Self::new(name, FieldKind::ForeignKey { to, on_delete })
    }

    /// Client-generated, immutable UUID primary key.
    pub fn uuid_pk() -> Self {
        Self::new("id", FieldKind::Uuid)
            .primary_key()
            .default(FieldDefault::NewUuid)
            .not_editable()
    }

    pub fn auto_pk() -> Self {
        Self::new("id", FieldKind::AutoId).primary_key()
    }

    pub fn char(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, FieldKind::Char { max_length })
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_editable(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn auto_now_add(mut self) -> Self {
        self.auto_now_add = true;
        self
    }

    pub fn default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Column name in storage: foreign keys get an `_id` suffix.
    pub fn column(&self) -> String {
        match self.kind {
            FieldKind::ForeignKey { .. } => format!("{}_id", self.name),
            _ => self.name.clone(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.null && !self.primary_key
    }

    pub fn related_model(&self) -> Option<&ModelRef> {
        match &self.kind {
            FieldKind::ForeignKey { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn backfill_value(&self) -> Option<&Value> {
        self.default.as_ref().and_then(FieldDefault::backfill_literal)
    }
}

/// A many-to-many relation, stored in its own association table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManyToMany {
    pub name: String,
    pub to: ModelRef,
    pub related_name: Option<String>,
}

impl ManyToMany {
    pub fn new(name: impl Into<String>, to: ModelRef) -> Self {
        Self {
            name: name.into(),
            to,
            related_name: None,
        }
    }

    pub fn related_name(mut self, related_name: impl Into<String>) -> Self {
        self.related_name = Some(related_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_key_column_gets_id_suffix() {
        let fk = Field::foreign_key("room", ModelRef::new("core", "Room"), OnDelete::Cascade);
        assert_eq!(fk.column(), "room_id");
        assert_eq!(Field::char("name", 255).column(), "name");
    }

    #[test]
    fn test_text_literal_escapes_quotes() {
        assert_eq!(Value::Text("O'Brien".into()).to_sql_literal(), "'O''Brien'");
        assert_eq!(Value::Text(String::new()).to_sql_literal(), "''");
    }

    #[test]
    fn test_only_literal_defaults_backfill() {
        let name = Field::char("name", 255).default(FieldDefault::text("Home"));
        assert_eq!(name.backfill_value(), Some(&Value::Text("Home".into())));
        assert!(Field::uuid_pk().backfill_value().is_none());
    }

    #[test]
    fn test_primary_key_is_never_nullable() {
        let pk = Field::uuid_pk().null();
        assert!(!pk.is_nullable());
    }
}
