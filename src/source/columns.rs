//! Header resolution.
//!
//! Each logical field is looked up through a preference-ordered list of
//! column names: the configured override first, then conventional aliases.

use crate::models::{ColumnOverrides, ConfigError, OperationMode, Row};
use csv::StringRecord;

const TOKEN_ALIASES: [&str; 3] = ["purchaseToken", "purchase_token", "token"];
const SUBSCRIPTION_ID_ALIASES: [&str; 3] = ["subscriptionId", "subscription_id", "product"];
const PACKAGE_ALIASES: [&str; 1] = ["package"];
const PRODUCT_ALIASES: [&str; 1] = ["product"];
const ORDER_ID_ALIASES: [&str; 2] = ["order_id", "orderId"];

/// First candidate present in `headers`. Empty candidates are ignored.
pub fn choose_field(headers: &StringRecord, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .filter(|name| !name.is_empty())
        .find(|name| headers.iter().any(|h| h == **name))
        .map(|name| name.to_string())
}

fn candidates<'a>(override_name: &'a str, aliases: &[&'a str]) -> Vec<&'a str> {
    std::iter::once(override_name)
        .chain(aliases.iter().copied())
        .collect()
}

/// Column names resolved against one input's header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub token: String,
    pub subscription_id: Option<String>,
    pub package: Option<String>,
    pub product: Option<String>,
    pub order_id: Option<String>,
}

/// Identifiers read from one row through [`ResolvedColumns`].
///
/// All values are trimmed; empty values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIdentifiers {
    pub token: Option<String>,
    pub subscription_id: Option<String>,
    pub package: Option<String>,
    pub product: Option<String>,
    pub order_id: Option<String>,
}

impl ResolvedColumns {
    /// Resolve all columns and check the mode's required columns.
    ///
    /// Fails when the token column is missing, when the mode needs columns
    /// the input lacks, or when neither a run-level package nor a package
    /// column is available.
    pub fn resolve(
        headers: &StringRecord,
        overrides: &ColumnOverrides,
        mode: OperationMode,
        has_run_package: bool,
    ) -> Result<Self, ConfigError> {
        let token_candidates = candidates(&overrides.token, &TOKEN_ALIASES);
        let token = choose_field(headers, &token_candidates).ok_or_else(|| {
            ConfigError::MissingTokenColumn {
                tried: token_candidates
                    .iter()
                    .filter(|c| !c.is_empty())
                    .map(|c| c.to_string())
                    .collect(),
            }
        })?;

        let missing: Vec<String> = mode
            .required_columns()
            .iter()
            .filter(|col| !headers.iter().any(|h| h == **col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingColumns {
                missing,
                found: headers.iter().map(str::to_string).collect(),
            });
        }

        let resolved = Self {
            token,
            subscription_id: choose_field(
                headers,
                &candidates(&overrides.subscription_id, &SUBSCRIPTION_ID_ALIASES),
            ),
            package: choose_field(headers, &candidates(&overrides.package, &PACKAGE_ALIASES)),
            product: choose_field(headers, &candidates(&overrides.product, &PRODUCT_ALIASES)),
            order_id: choose_field(headers, &candidates(&overrides.order_id, &ORDER_ID_ALIASES)),
        };

        if !has_run_package && resolved.package.is_none() {
            return Err(ConfigError::NoPackageSource);
        }

        Ok(resolved)
    }

    /// Read this row's identifiers.
    pub fn identifiers(&self, row: &Row) -> RowIdentifiers {
        let value = |column: &Option<String>| {
            column
                .as_deref()
                .and_then(|c| row.get_trimmed(c))
                .map(str::to_string)
        };

        RowIdentifiers {
            token: row.get_trimmed(&self.token).map(str::to_string),
            subscription_id: value(&self.subscription_id),
            package: value(&self.package),
            product: value(&self.product),
            order_id: value(&self.order_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn headers(names: &[&str]) -> StringRecord {
        StringRecord::from(names.to_vec())
    }

    #[test]
    fn test_override_wins_over_aliases() {
        let overrides = ColumnOverrides {
            token: "tok".to_string(),
            ..Default::default()
        };
        let cols = ResolvedColumns::resolve(
            &headers(&["purchaseToken", "tok"]),
            &overrides,
            OperationMode::Cancel,
            true,
        )
        .unwrap();
        assert_eq!(cols.token, "tok");
    }

    #[test]
    fn test_aliases_in_preference_order() {
        let cols = ResolvedColumns::resolve(
            &headers(&["token", "purchase_token", "subscription_id", "orderId", "product"]),
            &ColumnOverrides::default(),
            OperationMode::Cancel,
            true,
        )
        .unwrap();
        assert_eq!(cols.token, "purchase_token");
        assert_eq!(cols.subscription_id.as_deref(), Some("subscription_id"));
        assert_eq!(cols.order_id.as_deref(), Some("orderId"));
        assert_eq!(cols.product.as_deref(), Some("product"));
        assert_eq!(cols.package, None);
    }

    #[test]
    fn test_missing_token_column_lists_candidates() {
        let err = ResolvedColumns::resolve(
            &headers(&["id"]),
            &ColumnOverrides::default(),
            OperationMode::Cancel,
            true,
        )
        .unwrap_err();
        match err {
            ConfigError::MissingTokenColumn { tried } => {
                assert_eq!(tried, vec!["purchaseToken", "purchaseToken", "purchase_token", "token"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_revoke_requires_subscription_state_column() {
        let err = ResolvedColumns::resolve(
            &headers(&["purchaseToken", "package"]),
            &ColumnOverrides::default(),
            OperationMode::RevokeProrated,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingColumns { .. }));

        assert!(
            ResolvedColumns::resolve(
                &headers(&["purchaseToken", "subscription_state"]),
                &ColumnOverrides::default(),
                OperationMode::RevokeProrated,
                true,
            )
            .is_ok()
        );
    }

    #[test]
    fn test_package_source_is_required() {
        let err = ResolvedColumns::resolve(
            &headers(&["purchaseToken"]),
            &ColumnOverrides::default(),
            OperationMode::Validate,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoPackageSource));
    }

    #[test]
    fn test_identifiers_are_trimmed_and_blank_is_none() {
        let header_row = headers(&["purchaseToken", "package", "order_id"]);
        let cols = ResolvedColumns::resolve(
            &header_row,
            &ColumnOverrides::default(),
            OperationMode::Cancel,
            false,
        )
        .unwrap();
        let row = Row::new(
            1,
            Arc::new(header_row),
            StringRecord::from(vec![" tok ", " com.example.app ", "  "]),
        );

        let ids = cols.identifiers(&row);
        assert_eq!(ids.token.as_deref(), Some("tok"));
        assert_eq!(ids.package.as_deref(), Some("com.example.app"));
        assert_eq!(ids.order_id, None);
        assert_eq!(ids.product, None);
    }
}
