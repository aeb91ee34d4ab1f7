use std::{collections::HashMap, fmt::Display};

use rust_decimal::{Decimal, prelude::ToPrimitive};
use tracing::warn;
use uuid::Uuid;

/// Correlation data the order-intake flow stamps onto a checkout session.
///
/// Keys are written in camelCase by the intake flow; snake_case spellings
/// are accepted as well. Money is expressed in major units (`"149.00"`)
/// and converted to minor units here.
///
/// Parsing never fails: metadata is authenticated but free-form, and a value
/// this service cannot use must not turn a signed delivery into a rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub order_id: Option<EntityRef>,
    pub package_id: Option<EntityRef>,
    pub setup_fee_minor: Option<i64>,
    pub charge_setup_fee: bool,
    pub maintenance_required: bool,
    pub business_name: Option<String>,
}

/// An id exactly as it appeared in the metadata.
///
/// Stored rows are keyed by UUID, so a reference that is not one can never
/// resolve and is reported as a missing entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef(String);

impl EntityRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }
}

impl From<Uuid> for EntityRef {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CheckoutMetadata {
    pub fn from_map(metadata: &HashMap<String, String>) -> Self {
        let setup_fee_minor = lookup(metadata, &["setupFee", "setup_fee"]).and_then(|raw| {
            let parsed = parse_major_amount(raw);
            if parsed.is_none() {
                warn!(
                    setup_fee = raw,
                    "checkout metadata: setup fee is not a valid amount, ignoring"
                );
            }
            parsed
        });

        Self {
            order_id: lookup(metadata, &["orderId", "order_id"]).map(EntityRef::new),
            package_id: lookup(metadata, &["packageId", "package_id"]).map(EntityRef::new),
            setup_fee_minor,
            charge_setup_fee: lookup(metadata, &["chargeSetupFee", "charge_setup_fee"])
                .is_some_and(parse_flag),
            maintenance_required: lookup(
                metadata,
                &["maintenanceRequired", "maintenance_required"],
            )
            .is_some_and(parse_flag),
            business_name: lookup(metadata, &["businessName", "business_name"])
                .map(str::to_string),
        }
    }

    /// The setup fee to bill, when one was requested and flagged chargeable.
    pub fn chargeable_setup_fee(&self) -> Option<i64> {
        if !self.charge_setup_fee {
            return None;
        }
        self.setup_fee_minor.filter(|fee| *fee > 0)
    }

    pub fn package_uuid(&self) -> Option<Uuid> {
        self.package_id.as_ref().and_then(EntityRef::as_uuid)
    }
}

fn lookup<'a>(metadata: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| metadata.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

fn parse_major_amount(raw: &str) -> Option<i64> {
    let amount = raw.parse::<Decimal>().ok()?;
    if amount.is_sign_negative() {
        return None;
    }

    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_camel_case_keys() {
        let order_id = Uuid::new_v4();
        let parsed = CheckoutMetadata::from_map(&metadata(&[
            ("orderId", &order_id.to_string()),
            ("setupFee", "149.50"),
            ("chargeSetupFee", "true"),
            ("maintenanceRequired", "TRUE"),
        ]));

        assert_eq!(parsed.order_id, Some(EntityRef::from(order_id)));
        assert_eq!(parsed.order_id.as_ref().and_then(EntityRef::as_uuid), Some(order_id));
        assert_eq!(parsed.package_id, None);
        assert_eq!(parsed.setup_fee_minor, Some(14950));
        assert!(parsed.charge_setup_fee);
        assert!(parsed.maintenance_required);
        assert_eq!(parsed.chargeable_setup_fee(), Some(14950));
    }

    #[test]
    fn setup_fee_is_not_chargeable_without_flag() {
        let parsed = CheckoutMetadata::from_map(&metadata(&[("setupFee", "99")]));

        assert_eq!(parsed.setup_fee_minor, Some(9900));
        assert_eq!(parsed.chargeable_setup_fee(), None);
    }

    #[test]
    fn zero_setup_fee_is_never_chargeable() {
        let parsed =
            CheckoutMetadata::from_map(&metadata(&[("setupFee", "0"), ("chargeSetupFee", "true")]));

        assert_eq!(parsed.chargeable_setup_fee(), None);
    }

    #[test]
    fn blank_values_are_treated_as_absent() {
        let parsed = CheckoutMetadata::from_map(&metadata(&[("orderId", "  "), ("packageId", "")]));

        assert_eq!(parsed, CheckoutMetadata::default());
    }

    #[test]
    fn foreign_ids_are_kept_verbatim() {
        let parsed = CheckoutMetadata::from_map(&metadata(&[
            ("order_id", "ord_1"),
            ("packageId", "pkg_1"),
        ]));

        assert_eq!(parsed.order_id, Some(EntityRef::new("ord_1")));
        assert_eq!(parsed.order_id.as_ref().and_then(EntityRef::as_uuid), None);
        assert_eq!(parsed.package_id.as_ref().map(EntityRef::as_str), Some("pkg_1"));
        assert_eq!(parsed.package_uuid(), None);
    }

    #[test]
    fn unusable_setup_fee_is_dropped() {
        for raw in ["-5", "forty"] {
            let parsed = CheckoutMetadata::from_map(&metadata(&[
                ("setupFee", raw),
                ("chargeSetupFee", "true"),
            ]));

            assert_eq!(parsed.setup_fee_minor, None);
            assert_eq!(parsed.chargeable_setup_fee(), None);
        }
    }
}
