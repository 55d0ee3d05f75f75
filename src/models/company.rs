//! `company.company` wrapper.

use crate::pool::{FieldDef, ModelDef};
use crate::storage::ModelName;

use super::{ModelWrapper, SearchById, SearchByName};

pub struct Company;

impl ModelWrapper for Company {
    const MODEL: Option<&'static str> = Some("company.company");
}

impl SearchById for Company {}
impl SearchByName for Company {}

impl Company {
    pub(crate) fn definition() -> ModelDef {
        ModelDef::new(ModelName::from_static("company.company"))
            .field(FieldDef::required("name"))
            .field(FieldDef::optional("currency"))
    }
}
