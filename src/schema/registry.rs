//! Model registry: name → model definition → field descriptors.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{OrmError, Result};
use crate::query::errors::DomainError;
use crate::schema::field::{FieldDescriptor, FieldKind, LinkTable, ValueType};

/// One model: its table and its fields in declaration order.
#[derive(Debug)]
pub struct ModelDef {
    /// Technical name (`sale.order`).
    pub name: String,
    /// Table name (`sale_order`).
    pub table: String,
    /// Field used for name-search and for ordering through a many2one.
    pub rec_name: String,
    /// Default order specification.
    pub order: String,
    /// Many2one to the same model that `child_of`/`parent_of` follow.
    pub parent_name: Option<String>,
    fields: Vec<Arc<FieldDescriptor>>,
    index: FxHashMap<String, usize>,
}

impl ModelDef {
    /// Looks a field up by name.
    pub fn field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// Fields in declaration order, `id` first.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter()
    }

    /// Fields backed by a column of the model's own table.
    pub fn column_fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields
            .iter()
            .filter(|f| f.stored && f.name != "id" && !f.is_x2many())
    }
}

/// Read-only registry shared by every transaction.
#[derive(Debug, Default)]
pub struct Registry {
    models: FxHashMap<String, Arc<ModelDef>>,
    order: Vec<String>,
}

impl Registry {
    /// Starts a programmatic registry definition.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolves a model by name.
    pub fn model(&self, name: &str) -> std::result::Result<&Arc<ModelDef>, DomainError> {
        self.models.get(name).ok_or_else(|| DomainError::UnknownModel {
            model: name.to_owned(),
        })
    }

    /// Resolves a field of a model.
    pub fn field(&self, model: &str, name: &str) -> std::result::Result<&Arc<FieldDescriptor>, DomainError> {
        self.model(model)?
            .field(name)
            .ok_or_else(|| DomainError::unknown_field(model, name))
    }

    /// Models in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.order.iter().filter_map(|name| self.models.get(name))
    }

    /// Loads a registry from a TOML schema document.
    pub fn from_toml_str(text: &str) -> Result<Registry> {
        let doc: SchemaDoc =
            toml::from_str(text).map_err(|err| OrmError::Schema(format!("invalid schema document: {err}")))?;
        let mut builder = Registry::builder();
        for spec in doc.models {
            builder = builder.model(spec.into_builder()?);
        }
        builder.build()
    }

    /// Reads and parses a TOML schema file.
    pub fn load(path: &Path) -> Result<Registry> {
        let text = std::fs::read_to_string(path)?;
        Registry::from_toml_str(&text)
    }
}

/// Fluent definition of one model.
#[derive(Debug)]
pub struct ModelBuilder {
    name: String,
    table: Option<String>,
    rec_name: Option<String>,
    order: Option<String>,
    parent_name: Option<String>,
    fields: Vec<FieldDescriptor>,
}

impl ModelBuilder {
    /// New model with the default table name (`.` replaced by `_`).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            rec_name: None,
            order: None,
            parent_name: None,
            fields: Vec::new(),
        }
    }

    /// Overrides the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Overrides the record name field.
    pub fn rec_name(mut self, field: impl Into<String>) -> Self {
        self.rec_name = Some(field.into());
        self
    }

    /// Overrides the default order.
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Overrides the hierarchy field; `parent_id` is used when declared.
    pub fn parent(mut self, field: impl Into<String>) -> Self {
        self.parent_name = Some(field.into());
        self
    }

    /// Declares a field.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// Collects model definitions and validates them as a whole.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelBuilder>,
}

impl RegistryBuilder {
    /// Adds a model.
    pub fn model(mut self, model: ModelBuilder) -> Self {
        self.models.push(model);
        self
    }

    /// Validates cross-model references and freezes the registry.
    pub fn build(self) -> Result<Registry> {
        let tables: FxHashMap<String, String> = self
            .models
            .iter()
            .map(|m| {
                let table = m.table.clone().unwrap_or_else(|| m.name.replace('.', "_"));
                (m.name.clone(), table)
            })
            .collect();
        if tables.len() != self.models.len() {
            return Err(OrmError::Schema("duplicate model definition".into()));
        }

        let mut registry = Registry::default();
        for model in self.models {
            let table = tables[&model.name].clone();
            let mut fields = Vec::with_capacity(model.fields.len() + 1);
            let mut index = FxHashMap::default();
            let mut id = FieldDescriptor::scalar("id", ValueType::Id).required();
            id.owner_model = model.name.clone();
            index.insert(id.name.clone(), 0);
            fields.push(Arc::new(id));

            for mut field in model.fields {
                if index.contains_key(&field.name) {
                    return Err(OrmError::Schema(format!(
                        "field '{}' declared twice on '{}'",
                        field.name, model.name
                    )));
                }
                field.owner_model = model.name.clone();
                if field.is_relational() {
                    let target = field.target().to_owned();
                    let Some(target_table) = tables.get(&target) else {
                        return Err(OrmError::Schema(format!(
                            "{}.{} targets unknown model '{target}'",
                            model.name, field.name
                        )));
                    };
                    if field.kind == FieldKind::Many2many && field.link.is_none() {
                        if *target_table == table {
                            return Err(OrmError::Schema(format!(
                                "{}.{} links a model to itself and needs an explicit link table",
                                model.name, field.name
                            )));
                        }
                        let mut pair = [table.as_str(), target_table.as_str()];
                        pair.sort_unstable();
                        field.link = Some(LinkTable {
                            table: format!("{}_{}_rel", pair[0], pair[1]),
                            column1: format!("{table}_id"),
                            column2: format!("{target_table}_id"),
                        });
                    }
                }
                if field.translatable && !field.is_textual() {
                    return Err(OrmError::Schema(format!(
                        "{}.{} is translatable but not textual",
                        model.name, field.name
                    )));
                }
                index.insert(field.name.clone(), fields.len());
                fields.push(Arc::new(field));
            }

            let rec_name = model
                .rec_name
                .unwrap_or_else(|| if index.contains_key("name") { "name".into() } else { "id".into() });
            if !index.contains_key(&rec_name) {
                return Err(OrmError::Schema(format!(
                    "rec_name '{rec_name}' is not a field of '{}'",
                    model.name
                )));
            }
            let is_parent = |name: &str| {
                index.get(name).is_some_and(|&i| {
                    let field: &FieldDescriptor = &fields[i];
                    field.kind == FieldKind::Many2one && field.target() == model.name
                })
            };
            let parent_name = match model.parent_name {
                Some(parent) if is_parent(&parent) => Some(parent),
                Some(parent) => {
                    return Err(OrmError::Schema(format!(
                        "parent_name '{parent}' is not a many2one from '{}' to itself",
                        model.name
                    )))
                }
                None => is_parent("parent_id").then(|| "parent_id".to_owned()),
            };

            let def = ModelDef {
                name: model.name.clone(),
                table,
                rec_name,
                order: model.order.unwrap_or_else(|| "id".into()),
                parent_name,
                fields,
                index,
            };
            registry.order.push(model.name.clone());
            registry.models.insert(model.name, Arc::new(def));
        }

        registry.validate_references()?;
        debug!(models = registry.order.len(), "ormql.registry.built");
        Ok(registry)
    }
}

impl Registry {
    fn validate_references(&self) -> Result<()> {
        for model in self.models() {
            for field in model.fields() {
                if field.kind == FieldKind::One2many {
                    let inverse = field.inverse_name.as_deref().unwrap_or("");
                    let target = self.field(field.target(), inverse).map_err(|_| {
                        OrmError::Schema(format!(
                            "{}.{}: inverse '{inverse}' not found on '{}'",
                            model.name,
                            field.name,
                            field.target()
                        ))
                    })?;
                    if target.kind != FieldKind::Many2one || target.target() != model.name {
                        return Err(OrmError::Schema(format!(
                            "{}.{}: inverse '{inverse}' must be a many2one to '{}'",
                            model.name, field.name, model.name
                        )));
                    }
                }
                if let Some(related) = &field.related {
                    self.check_related(&model.name, &field.name, related)?;
                }
            }
        }
        Ok(())
    }

    fn check_related(&self, model: &str, field: &str, path: &str) -> Result<()> {
        let mut current = model.to_owned();
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            let target = self.field(&current, segment).map_err(|_| {
                OrmError::Schema(format!("{model}.{field}: related path '{path}' does not resolve"))
            })?;
            if target.owner_model == model && target.name == field {
                return Err(OrmError::Schema(format!("{model}.{field}: related path refers to itself")));
            }
            if i + 1 < segments.len() {
                if !target.is_relational() {
                    return Err(OrmError::Schema(format!(
                        "{model}.{field}: related path '{path}' traverses non-relational '{segment}'"
                    )));
                }
                current = target.target().to_owned();
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SchemaDoc {
    #[serde(default)]
    models: Vec<ModelSpec>,
}

#[derive(Debug, Deserialize)]
struct ModelSpec {
    name: String,
    table: Option<String>,
    rec_name: Option<String>,
    order: Option<String>,
    parent_name: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    name: String,
    #[serde(default = "default_kind")]
    kind: FieldKind,
    #[serde(rename = "type")]
    value_type: Option<ValueType>,
    target: Option<String>,
    inverse: Option<String>,
    column: Option<String>,
    link: Option<LinkTable>,
    #[serde(default = "default_true")]
    stored: bool,
    #[serde(default)]
    bypass_access: bool,
    #[serde(default)]
    translatable: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    groups: Vec<String>,
    related: Option<String>,
}

fn default_kind() -> FieldKind {
    FieldKind::Scalar
}

fn default_true() -> bool {
    true
}

impl ModelSpec {
    fn into_builder(self) -> Result<ModelBuilder> {
        let mut builder = ModelBuilder::new(self.name.clone());
        builder.table = self.table;
        builder.rec_name = self.rec_name;
        builder.order = self.order;
        builder.parent_name = self.parent_name;
        for spec in self.fields {
            builder = builder.field(spec.into_descriptor(&self.name)?);
        }
        Ok(builder)
    }
}

impl FieldSpec {
    fn into_descriptor(self, model: &str) -> Result<FieldDescriptor> {
        let target = || {
            self.target.clone().ok_or_else(|| {
                OrmError::Schema(format!("{model}.{}: relational field needs a target", self.name))
            })
        };
        let mut field = match self.kind {
            FieldKind::Scalar => FieldDescriptor::scalar(self.name.clone(), self.value_type.unwrap_or(ValueType::Char)),
            FieldKind::Many2one => FieldDescriptor::many2one(self.name.clone(), target()?),
            FieldKind::Many2many => FieldDescriptor::many2many(self.name.clone(), target()?),
            FieldKind::Property => FieldDescriptor::property(self.name.clone()),
            FieldKind::One2many => {
                let inverse = self.inverse.clone().ok_or_else(|| {
                    OrmError::Schema(format!("{model}.{}: one2many needs an inverse", self.name))
                })?;
                FieldDescriptor::one2many(self.name.clone(), target()?, inverse)
            }
        };
        if let Some(column) = self.column {
            field.column = column;
        }
        field.link = self.link;
        if !self.stored {
            field = field.computed();
        }
        if let Some(related) = self.related {
            field = field.related(related);
        }
        field.bypass_access = self.bypass_access;
        field.translatable = self.translatable;
        field.required = self.required;
        field.groups = self.groups;
        Ok(field)
    }
}
