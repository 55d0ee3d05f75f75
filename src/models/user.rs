//! `res.user` wrapper.

use serde_json::Value;

use crate::db::TdbResult;
use crate::pool::{FieldDef, ModelDef};
use crate::storage::{ModelName, RecordId, StorageError, UserId};
use crate::transaction::{Context, Transaction};

use super::{ModelWrapper, SearchById, SearchByName};

pub const DEFAULT_LANGUAGE: &str = "en";

/// Users the portal acts as.
pub struct User;

impl ModelWrapper for User {
    const MODEL: Option<&'static str> = Some("res.user");
}

impl SearchById for User {}
impl SearchByName for User {}

impl User {
    pub(crate) fn definition() -> ModelDef {
        ModelDef::new(ModelName::from_static("res.user"))
            .field(FieldDef::required("login"))
            .field(FieldDef::optional("name"))
            .field(FieldDef::optional("language").with_default(DEFAULT_LANGUAGE))
            .field(FieldDef::optional("company"))
    }

    /// Context preferences of a user: `language`, `company` and `user`.
    ///
    /// The root user has no record and gets the defaults. Results are kept
    /// in the worker cache until the next reset.
    pub fn get_preferences(
        tx: &Transaction,
        user: UserId,
        default_company: Option<RecordId>,
    ) -> TdbResult<Context> {
        let cache = tx.pool().cache();
        if let Some(preferences) = cache.get_preferences(user) {
            return Ok(preferences);
        }
        let generation = tx.pool().store().cache_generation();

        let mut preferences = Context::new();
        preferences.insert("language".to_string(), Value::from(DEFAULT_LANGUAGE));
        preferences.insert(
            "company".to_string(),
            default_company.map(|c| Value::from(c.value())).unwrap_or(Value::Null),
        );
        preferences.insert("user".to_string(), Value::from(user.value()));

        if !user.is_root() {
            let model = Self::get(tx, None)?;
            let id = RecordId::new(user.value());
            let record = tx.read(model.name(), id)?.ok_or_else(|| StorageError::RecordNotFound {
                model: model.name().clone(),
                id,
            })?;
            for key in ["language", "company"] {
                match record.get(key) {
                    Some(Value::Null) | None => {}
                    Some(value) => {
                        preferences.insert(key.to_string(), value.clone());
                    }
                }
            }
        }

        cache.put_preferences(tx.pool().store(), generation, user, preferences.clone());
        Ok(preferences)
    }
}
