// In crates/risk/src/screen.rs

use std::collections::HashSet;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const DEAD_ADDRESS: &str = "0x000000000000000000000000000000000000dead";

/// A source of known-malicious addresses.
///
/// The static denylist ships with the engine; threat-intel feeds plug in by
/// implementing this trait.
pub trait AddressScreen: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_malicious(&self, address: &str) -> bool;
}

/// A fixed, case-insensitive set of flagged addresses.
#[derive(Debug, Clone)]
pub struct StaticDenylist {
    addresses: HashSet<String>,
}

impl StaticDenylist {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addresses: HashSet<String> = [ZERO_ADDRESS, DEAD_ADDRESS]
            .iter()
            .map(|a| a.to_string())
            .collect();
        addresses.extend(extra.into_iter().map(|a| a.as_ref().to_ascii_lowercase()));
        Self { addresses }
    }
}

impl Default for StaticDenylist {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl AddressScreen for StaticDenylist {
    fn name(&self) -> &'static str {
        "static_denylist"
    }

    fn is_malicious(&self, address: &str) -> bool {
        self.addresses.contains(&address.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_matches_case_insensitively() {
        let list = StaticDenylist::new(["0xABCDEF0000000000000000000000000000000001"]);
        assert!(list.is_malicious("0xabcdef0000000000000000000000000000000001"));
        assert!(list.is_malicious("0x000000000000000000000000000000000000dEaD"));
        assert!(list.is_malicious(ZERO_ADDRESS));
        assert!(!list.is_malicious("0x1111111111111111111111111111111111111112"));
    }
}
