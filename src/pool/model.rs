//! Model definitions and model handles.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::Domain;
use crate::storage::{ModelName, Record, RecordId, StorageError, Values};
use crate::transaction::{Transaction, TransactionError, TransactionResult};

/// A field of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    /// Creation fails when a required field is missing and has no default.
    pub required: bool,
    /// Value filled in on creation when the field is absent.
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Definition of a model registered in a pool.
///
/// Fields not declared here are stored as-is; the definition only drives
/// required-field checks and defaults on creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    pub name: ModelName,
    pub fields: Vec<FieldDef>,
}

impl ModelDef {
    pub fn new(name: ModelName) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fill defaults and check required fields of a creation payload.
    pub fn prepare(&self, mut values: Values) -> TransactionResult<Values> {
        values.remove("id");
        for field in &self.fields {
            if values.contains_key(&field.name) {
                continue;
            }
            match (&field.default, field.required) {
                (Some(default), _) => {
                    values.insert(field.name.clone(), default.clone());
                }
                (None, true) => {
                    return Err(TransactionError::MissingField {
                        model: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                (None, false) => {}
            }
        }
        Ok(values)
    }
}

/// Handle to a model, resolved through a pool.
///
/// Cheap to clone. All operations run inside the transaction passed in.
#[derive(Debug, Clone)]
pub struct Model {
    def: Arc<ModelDef>,
}

impl Model {
    pub(crate) fn new(def: Arc<ModelDef>) -> Self {
        Self { def }
    }

    pub fn name(&self) -> &ModelName {
        &self.def.name
    }

    pub fn definition(&self) -> &ModelDef {
        &self.def
    }

    /// Create one record per entry of `vlist`.
    ///
    /// Payloads are validated up front; nothing is created if any of them
    /// misses a required field.
    pub fn create(&self, tx: &mut Transaction, vlist: Vec<Values>) -> TransactionResult<Vec<Record>> {
        let prepared = vlist
            .into_iter()
            .map(|values| self.def.prepare(values))
            .collect::<TransactionResult<Vec<_>>>()?;

        debug!(model = %self.name(), count = prepared.len(), tx = tx.id(), "create");
        prepared
            .into_iter()
            .map(|values| tx.insert(self.name(), values))
            .collect()
    }

    /// Read one record.
    pub fn read(&self, tx: &Transaction, id: RecordId) -> TransactionResult<Record> {
        tx.read(self.name(), id)?.ok_or_else(|| {
            StorageError::RecordNotFound {
                model: self.name().clone(),
                id,
            }
            .into()
        })
    }

    /// Read the given records, skipping ids that do not exist.
    pub fn browse(&self, tx: &Transaction, ids: &[RecordId]) -> TransactionResult<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = tx.read(self.name(), *id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Records matching `domain`, ordered by id.
    pub fn search(&self, tx: &Transaction, domain: &Domain) -> TransactionResult<Vec<Record>> {
        let records = tx.scan(self.name())?;
        Ok(records.into_iter().filter(|r| domain.matches(r)).collect())
    }

    pub fn search_count(&self, tx: &Transaction, domain: &Domain) -> TransactionResult<usize> {
        if matches!(domain, Domain::All) {
            return tx.count(self.name());
        }
        let records = tx.scan(self.name())?;
        Ok(records.iter().filter(|r| domain.matches(r)).count())
    }

    /// Merge `values` into every given record.
    pub fn write(
        &self,
        tx: &mut Transaction,
        ids: &[RecordId],
        values: Values,
    ) -> TransactionResult<()> {
        let mut values = values;
        values.remove("id");
        debug!(model = %self.name(), count = ids.len(), tx = tx.id(), "write");
        for id in ids {
            let mut record = self.read(tx, *id)?;
            record.merge_data(values.clone());
            tx.update(self.name(), record)?;
        }
        Ok(())
    }

    pub fn delete(&self, tx: &mut Transaction, ids: &[RecordId]) -> TransactionResult<()> {
        debug!(model = %self.name(), count = ids.len(), tx = tx.id(), "delete");
        for id in ids {
            tx.remove(self.name(), *id)?;
        }
        Ok(())
    }
}

/// Registry of model definitions keyed by name.
pub(crate) type Registry = BTreeMap<ModelName, Arc<ModelDef>>;
