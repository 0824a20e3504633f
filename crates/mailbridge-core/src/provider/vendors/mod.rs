//! Built-in vendor rules.

mod custom;
mod gmail;
mod icloud;
mod netease;
mod outlook;
mod qq;

use std::sync::Arc;

pub use custom::Custom;
pub use gmail::Gmail;
pub use icloud::{ICloud, is_app_password};
pub use netease::NetEase;
pub use outlook::Outlook;
pub use qq::{Qq, is_authorization_code};

use super::VendorRules;
use crate::account::Vendor;

/// Returns the rules for a vendor.
#[must_use]
pub fn rules_for(vendor: Vendor) -> Arc<dyn VendorRules> {
    match vendor {
        Vendor::Gmail => Arc::new(Gmail),
        Vendor::Outlook => Arc::new(Outlook),
        Vendor::Qq => Arc::new(Qq),
        Vendor::NetEase => Arc::new(NetEase),
        Vendor::ICloud => Arc::new(ICloud),
        Vendor::Custom => Arc::new(Custom),
    }
}
