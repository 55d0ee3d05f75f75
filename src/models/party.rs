//! `party.party` and `party.address` wrappers.

use serde_json::Value;

use crate::db::TdbResult;
use crate::domain::Domain;
use crate::pool::{FieldDef, ModelDef};
use crate::storage::{ModelName, Record};
use crate::transaction::Transaction;

use super::{first, ModelWrapper, SearchAll, SearchById, SearchByName};

/// Persons and organisations. `create` requires `name`.
pub struct Party;

impl ModelWrapper for Party {
    const MODEL: Option<&'static str> = Some("party.party");
}

impl SearchAll for Party {}
impl SearchById for Party {}
impl SearchByName for Party {}

impl Party {
    pub(crate) fn definition() -> ModelDef {
        ModelDef::new(ModelName::from_static("party.party"))
            .field(FieldDef::required("name"))
            .field(FieldDef::optional("email"))
    }

    /// First party with the given email; `None` for an empty email.
    pub fn search_by_email(tx: &Transaction, email: &str) -> TdbResult<Option<Record>> {
        if email.is_empty() {
            return Ok(None);
        }
        first(tx, &Self::get(tx, None)?, Domain::eq("email", email))
    }
}

/// Postal addresses of parties. `create` requires `name`.
pub struct Address;

impl ModelWrapper for Address {
    const MODEL: Option<&'static str> = Some("party.address");
}

impl SearchAll for Address {}
impl SearchById for Address {}
impl SearchByName for Address {}

impl Address {
    pub(crate) fn definition() -> ModelDef {
        ModelDef::new(ModelName::from_static("party.address"))
            .field(FieldDef::required("name"))
            .field(FieldDef::optional("party"))
            .field(FieldDef::optional("street"))
            .field(FieldDef::optional("zip"))
            .field(FieldDef::optional("city"))
            .field(FieldDef::optional("country").with_default(Value::Null))
    }
}
