//! `bank.account.number` wrapper.
//!
//! Numbers belong to a bank account, which links a bank to its owner. A
//! bank is found by its BIC and created on first use, together with a
//! party named after the BIC.

use serde_json::Value;
use tracing::debug;

use crate::db::{TdbError, TdbResult};
use crate::domain::Domain;
use crate::pool::{FieldDef, ModelDef};
use crate::storage::{ModelName, Record, Values};
use crate::transaction::{Transaction, TransactionError};

use super::{first, ModelWrapper, Party};

pub struct BankAccountNumber;

impl ModelWrapper for BankAccountNumber {
    const MODEL: Option<&'static str> = Some("bank.account.number");
}

impl BankAccountNumber {
    pub(crate) fn definitions() -> Vec<ModelDef> {
        vec![
            ModelDef::new(ModelName::from_static("bank"))
                .field(FieldDef::required("bic"))
                .field(FieldDef::optional("party")),
            ModelDef::new(ModelName::from_static("bank.account"))
                .field(FieldDef::required("bank"))
                .field(FieldDef::optional("owner")),
            ModelDef::new(ModelName::from_static("bank.account.number"))
                .field(FieldDef::required("type"))
                .field(FieldDef::required("number"))
                .field(FieldDef::optional("account")),
        ]
    }

    pub fn search_by_number(tx: &Transaction, number: &str) -> TdbResult<Option<Record>> {
        first(tx, &Self::get(tx, None)?, Domain::eq("number", number))
    }

    /// Create account numbers owned by `party`.
    ///
    /// Each entry needs `bic` and `type`. Only `iban` is supported, which
    /// also needs `number`; an existing number is skipped. Returns `None`
    /// when nothing was created.
    pub fn create_for_party(
        tx: &mut Transaction,
        party: &Record,
        vlist: Vec<Values>,
    ) -> TdbResult<Option<Vec<Record>>> {
        let model = Self::get(tx, None)?;
        let banks = Self::get(tx, Some("bank"))?;
        let accounts = Self::get(tx, Some("bank.account"))?;
        let missing = |field: &str| -> TdbError {
            TransactionError::MissingField {
                model: model.name().clone(),
                field: field.to_string(),
            }
            .into()
        };

        let mut created = Vec::new();
        for values in vlist {
            let bic = values.get("bic").cloned().ok_or_else(|| missing("bic"))?;
            let kind = values.get("type").cloned().ok_or_else(|| missing("type"))?;

            let bank = match first(tx, &banks, Domain::eq("bic", bic.clone()))? {
                Some(bank) => bank,
                None => {
                    let mut party_values = Values::new();
                    party_values.insert("name".to_string(), bic.clone());
                    let bank_party = Party::get(tx, None)?.create(tx, vec![party_values])?;
                    let mut bank_values = Values::new();
                    bank_values.insert("bic".to_string(), bic.clone());
                    bank_values
                        .insert("party".to_string(), Value::from(bank_party[0].id.value()));
                    debug!(bic = %bic, "create bank");
                    banks.create(tx, vec![bank_values])?.remove(0)
                }
            };

            if kind.as_str() != Some("iban") {
                return Err(TdbError::application(format!(
                    "bank account number type not implemented: {}",
                    kind
                )));
            }
            let number = values.get("number").cloned().ok_or_else(|| missing("number"))?;
            let existing = match number.as_str() {
                Some(n) => Self::search_by_number(tx, n)?,
                None => None,
            };
            if let Some(existing) = existing {
                debug!(id = %existing.id, "bank account number already exists");
                continue;
            }

            let mut account_values = Values::new();
            account_values.insert("bank".to_string(), Value::from(bank.id.value()));
            account_values.insert("owner".to_string(), Value::from(party.id.value()));
            let account = accounts.create(tx, vec![account_values])?.remove(0);

            let mut number_values = Values::new();
            number_values.insert("type".to_string(), kind);
            number_values.insert("number".to_string(), number);
            number_values.insert("account".to_string(), Value::from(account.id.value()));
            created.extend(model.create(tx, vec![number_values])?);
        }

        Ok(if created.is_empty() { None } else { Some(created) })
    }
}
