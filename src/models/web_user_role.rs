//! `web.user.role` wrapper.

use crate::pool::{FieldDef, ModelDef};
use crate::storage::ModelName;

use super::{ModelWrapper, SearchAll, SearchByCode};

pub struct WebUserRole;

impl ModelWrapper for WebUserRole {
    const MODEL: Option<&'static str> = Some("web.user.role");
}

impl SearchAll for WebUserRole {}
impl SearchByCode for WebUserRole {}

impl WebUserRole {
    pub(crate) fn definition() -> ModelDef {
        ModelDef::new(ModelName::from_static("web.user.role"))
            .field(FieldDef::required("code"))
            .field(FieldDef::optional("name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TdbConfig;
    use crate::db::Tdb;
    use crate::storage::Values;
    use crate::transaction::TxOptions;
    use serde_json::json;

    fn role(code: &str, name: &str) -> Values {
        let mut values = Values::new();
        values.insert("code".to_string(), json!(code));
        values.insert("name".to_string(), json!(name));
        values
    }

    #[test]
    fn test_roles() {
        let tdb = Tdb::init(TdbConfig::new("test")).unwrap();
        tdb.transaction(TxOptions::read_only(), |tx| {
            assert!(WebUserRole::search_all(tx)?.is_empty());
            Ok(())
        })
        .unwrap();

        tdb.transaction(TxOptions::read_write(), |tx| {
            WebUserRole::create(tx, vec![role("licenser", "Licenser"), role("licensee", "Licensee")])
        })
        .unwrap();

        tdb.transaction(TxOptions::read_only(), |tx| {
            assert_eq!(WebUserRole::search_all(tx)?.len(), 2);
            let role = WebUserRole::search_by_code(tx, "licensee")?.unwrap();
            assert_eq!(role.get_str("name"), Some("Licensee"));
            Ok(())
        })
        .unwrap();
    }
}
