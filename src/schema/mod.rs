//! Field descriptor registry.

pub mod field;
pub mod registry;

pub use field::{FieldDescriptor, FieldKind, LinkTable, SearchMethod, ValueType};
pub use registry::{ModelBuilder, ModelDef, Registry, RegistryBuilder};

#[cfg(test)]
pub(crate) mod fixtures;
