//! Debug probe bridge management
//!
//! This module provides built-in probe profiles (the OpenOCD configuration
//! for common debug adapters) and the lifecycle of the OpenOCD bridge
//! process that sits between the adapter and the target.

pub mod openocd;
pub mod profile;

pub use openocd::{ProbeCommand, ProbeError, ProbeHandle, SHUTDOWN_GRACE};
pub use profile::{ProbeProfile, CMSIS_DAP_PROFILE, JLINK_PROFILE, STLINK_PROFILE};

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Registry of built-in probe profiles
pub static PROBE_PROFILES: Lazy<HashMap<&'static str, &'static ProbeProfile>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("cmsis-dap", &*CMSIS_DAP_PROFILE);
    m.insert("debugprobe", &*CMSIS_DAP_PROFILE);
    m.insert("picoprobe", &*CMSIS_DAP_PROFILE);
    m.insert("jlink", &*JLINK_PROFILE);
    m.insert("j-link", &*JLINK_PROFILE);
    m.insert("stlink", &*STLINK_PROFILE);
    m.insert("st-link", &*STLINK_PROFILE);
    m
});

/// Get a probe profile by name
pub fn get_profile(name: &str) -> Option<&'static ProbeProfile> {
    PROBE_PROFILES.get(name.to_lowercase().as_str()).copied()
}

/// Get profile names only (deduplicated)
pub fn profile_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = vec!["cmsis-dap", "jlink", "stlink"];
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_names_and_aliases() {
        assert_eq!(get_profile("cmsis-dap").unwrap().id, "cmsis-dap");
        assert_eq!(get_profile("Debugprobe").unwrap().id, "cmsis-dap");
        assert_eq!(get_profile("JLINK").unwrap().id, "jlink");
        assert_eq!(get_profile("st-link").unwrap().id, "stlink");
        assert!(get_profile("blackmagic").is_none());
    }

    #[test]
    fn test_profile_names_are_sorted() {
        assert_eq!(profile_names(), vec!["cmsis-dap", "jlink", "stlink"]);
    }
}
