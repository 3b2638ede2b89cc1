use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. "consignments.sell").
///
/// `"*"` is the wildcard granted to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub const TENANTS_REGISTER: Permission = Permission(Cow::Borrowed("tenants.register"));
    pub const TENANTS_MANAGE: Permission = Permission(Cow::Borrowed("tenants.manage"));

    pub const PRODUCTS_CREATE: Permission = Permission(Cow::Borrowed("products.create"));
    pub const PRODUCTS_UPDATE: Permission = Permission(Cow::Borrowed("products.update"));

    pub const CONSIGNMENTS_CREATE: Permission = Permission(Cow::Borrowed("consignments.create"));
    pub const CONSIGNMENTS_SELL: Permission = Permission(Cow::Borrowed("consignments.sell"));
    pub const CONSIGNMENTS_RETURN: Permission = Permission(Cow::Borrowed("consignments.return"));
    pub const CONSIGNMENTS_SETTLE: Permission = Permission(Cow::Borrowed("consignments.settle"));
    pub const CONSIGNMENTS_MANAGE: Permission = Permission(Cow::Borrowed("consignments.manage"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
