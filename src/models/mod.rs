//! Typed model wrappers.
//!
//! A wrapper names a model once and adds the lookups the portal needs on
//! top of the generic model handle. Search helpers come as mixin traits
//! with default methods, so a wrapper opts in with an empty impl:
//!
//! ```ignore
//! struct Party;
//!
//! impl ModelWrapper for Party {
//!     const MODEL: Option<&'static str> = Some("party.party");
//! }
//! impl SearchByName for Party {}
//!
//! let party = Party::search_by_name(&tx, "C3S")?;
//! ```

mod bank;
mod checksum;
mod company;
mod country;
mod party;
mod user;
mod web_user_role;

use crate::db::{TdbError, TdbResult};
use crate::domain::Domain;
use crate::pool::{Model, ModelDef};
use crate::storage::{Record, RecordId, Values};
use crate::transaction::Transaction;

pub use bank::BankAccountNumber;
pub use checksum::Checksum;
pub use company::Company;
pub use country::{Country, Subdivision};
pub use party::{Address, Party};
pub use user::User;
pub use web_user_role::WebUserRole;

/// Definitions registered by every pool on initialization.
pub(crate) fn builtin_definitions() -> Vec<ModelDef> {
    let mut defs = vec![
        User::definition(),
        Company::definition(),
        Checksum::definition(),
        Party::definition(),
        Address::definition(),
        WebUserRole::definition(),
    ];
    defs.extend(BankAccountNumber::definitions());
    defs.extend(Country::definitions());
    defs
}

/// Typed access to one model.
pub trait ModelWrapper {
    /// Default model name; `None` for generic wrappers.
    const MODEL: Option<&'static str>;

    /// Resolve the model handle. An explicit `name` overrides the default.
    fn get(tx: &Transaction, name: Option<&str>) -> TdbResult<Model> {
        let name = name.or(Self::MODEL).ok_or(TdbError::MissingModelName)?;
        Ok(tx.pool().model(name)?)
    }

    /// Create records; `None` if nothing was created.
    fn create(tx: &mut Transaction, vlist: Vec<Values>) -> TdbResult<Option<Vec<Record>>> {
        let model = Self::get(tx, None)?;
        let created = model.create(tx, vlist)?;
        Ok(if created.is_empty() { None } else { Some(created) })
    }
}

fn first(tx: &Transaction, model: &Model, domain: Domain) -> TdbResult<Option<Record>> {
    Ok(model.search(tx, &domain)?.into_iter().next())
}

pub trait SearchAll: ModelWrapper {
    fn search_all(tx: &Transaction) -> TdbResult<Vec<Record>> {
        Ok(Self::get(tx, None)?.search(tx, &Domain::All)?)
    }
}

pub trait SearchById: ModelWrapper {
    fn search_by_id(tx: &Transaction, id: RecordId) -> TdbResult<Option<Record>> {
        first(tx, &Self::get(tx, None)?, Domain::eq("id", id.value()))
    }
}

pub trait SearchByCode: ModelWrapper {
    fn search_by_code(tx: &Transaction, code: &str) -> TdbResult<Option<Record>> {
        if code.is_empty() {
            return Ok(None);
        }
        first(tx, &Self::get(tx, None)?, Domain::eq("code", code))
    }
}

pub trait SearchByName: ModelWrapper {
    fn search_by_name(tx: &Transaction, name: &str) -> TdbResult<Option<Record>> {
        first(tx, &Self::get(tx, None)?, Domain::eq("name", name))
    }
}

pub trait SearchByUuid: ModelWrapper {
    fn search_by_uuid(tx: &Transaction, uuid: &str) -> TdbResult<Option<Record>> {
        first(tx, &Self::get(tx, None)?, Domain::eq("uuid", uuid))
    }
}

/// Wrapper without a default model; callers always pass a name.
pub struct Generic;

impl ModelWrapper for Generic {
    const MODEL: Option<&'static str> = None;
}
