//! `country.country` and `country.subdivision` wrappers.

use crate::pool::{FieldDef, ModelDef};
use crate::storage::ModelName;

use super::{ModelWrapper, SearchAll, SearchByCode, SearchById, SearchByName};

pub struct Country;

impl ModelWrapper for Country {
    const MODEL: Option<&'static str> = Some("country.country");
}

impl SearchAll for Country {}
impl SearchById for Country {}
impl SearchByCode for Country {}
impl SearchByName for Country {}

/// States, provinces and regions; `country` holds the country id.
pub struct Subdivision;

impl ModelWrapper for Subdivision {
    const MODEL: Option<&'static str> = Some("country.subdivision");
}

impl SearchAll for Subdivision {}
impl SearchById for Subdivision {}
impl SearchByCode for Subdivision {}
impl SearchByName for Subdivision {}

impl Country {
    pub(crate) fn definitions() -> Vec<ModelDef> {
        vec![
            ModelDef::new(ModelName::from_static("country.country"))
                .field(FieldDef::required("code"))
                .field(FieldDef::required("name")),
            ModelDef::new(ModelName::from_static("country.subdivision"))
                .field(FieldDef::required("code"))
                .field(FieldDef::required("name"))
                .field(FieldDef::required("country")),
        ]
    }
}
