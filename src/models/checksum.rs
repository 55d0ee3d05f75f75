//! `checksum` wrapper.
//!
//! Checksums identify uploaded content. A collision is another checksum
//! with the same code over the same byte range and algorithm.

use serde_json::Value;
use tracing::debug;

use crate::db::TdbResult;
use crate::domain::Domain;
use crate::pool::{FieldDef, ModelDef};
use crate::storage::{ModelName, Record, Values};
use crate::transaction::{Transaction, TransactionError};

use super::{ModelWrapper, SearchByCode};

pub struct Checksum;

const REQUIRED: [&str; 3] = ["origin", "code", "algorithm"];

impl ModelWrapper for Checksum {
    const MODEL: Option<&'static str> = Some("checksum");

    /// Create checksums. `origin`, `code` and `algorithm` are required,
    /// `timestamp` defaults to now.
    fn create(tx: &mut Transaction, vlist: Vec<Values>) -> TdbResult<Option<Vec<Record>>> {
        debug!(count = vlist.len(), "create checksums");
        let model = Self::get(tx, None)?;
        let mut prepared = Vec::with_capacity(vlist.len());
        for mut values in vlist {
            for field in REQUIRED {
                if !values.contains_key(field) {
                    return Err(TransactionError::MissingField {
                        model: model.name().clone(),
                        field: field.to_string(),
                    }
                    .into());
                }
            }
            values
                .entry("timestamp".to_string())
                .or_insert_with(|| Value::from(chrono::Utc::now().to_rfc3339()));
            prepared.push(values);
        }

        let created = model.create(tx, prepared)?;
        Ok(if created.is_empty() { None } else { Some(created) })
    }
}

impl SearchByCode for Checksum {}

impl Checksum {
    pub(crate) fn definition() -> ModelDef {
        let mut def = ModelDef::new(ModelName::from_static("checksum"));
        for field in REQUIRED {
            def = def.field(FieldDef::required(field));
        }
        def.field(FieldDef::optional("timestamp"))
            .field(FieldDef::optional("begin"))
            .field(FieldDef::optional("end"))
    }

    /// Checksums colliding with the given one.
    ///
    /// Without a code nothing collides. Range bounds and algorithm narrow
    /// the search only when given and non-zero or non-empty.
    pub fn search_collision(
        tx: &Transaction,
        code: Option<&str>,
        algorithm: Option<&str>,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> TdbResult<Vec<Record>> {
        let code = match code {
            Some(code) => code,
            None => return Ok(Vec::new()),
        };

        let mut domain = Domain::eq("code", code);
        if let Some(begin) = begin.filter(|b| *b != 0) {
            domain = domain.and(Domain::eq("begin", begin));
        }
        if let Some(end) = end.filter(|e| *e != 0) {
            domain = domain.and(Domain::eq("end", end));
        }
        if let Some(algorithm) = algorithm.filter(|a| !a.is_empty()) {
            domain = domain.and(Domain::eq("algorithm", algorithm));
        }

        Ok(Self::get(tx, None)?.search(tx, &domain)?)
    }
}
