//! Debug probe profiles
//!
//! Each profile pins the OpenOCD configuration for one adapter family:
//! interface script, target script, and adapter clock. The target is the
//! RP2350 RISC-V cores for all built-ins; a TOML override can point the
//! bridge anywhere else.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// OpenOCD script search path, passed via `-s`
pub const SCRIPT_SEARCH_PATH: &str = "tcl";

/// Target configuration for the RP2350 RISC-V cores
pub const RP2350_TARGET_CFG: &str = "target/rp2350-riscv.cfg";

/// OpenOCD configuration for one debug adapter family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeProfile {
    /// Short identifier (e.g. "cmsis-dap")
    pub id: String,
    /// Human-readable adapter name
    pub name: String,
    /// What hardware this profile covers
    pub description: String,
    /// OpenOCD interface script
    pub interface_cfg: String,
    /// OpenOCD target script
    pub target_cfg: String,
    /// Adapter clock in kHz
    pub adapter_speed_khz: u32,
}

impl ProbeProfile {
    /// Load a custom profile from a TOML file, overriding the built-ins
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read probe config: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Invalid probe config: {}", path.display()))
    }
}

/// CMSIS-DAP profile (Raspberry Pi Debug Probe and compatibles)
pub static CMSIS_DAP_PROFILE: Lazy<ProbeProfile> = Lazy::new(|| ProbeProfile {
    id: "cmsis-dap".to_string(),
    name: "CMSIS-DAP".to_string(),
    description: "CMSIS-DAP adapters, including the Raspberry Pi Debug Probe".to_string(),
    interface_cfg: "interface/cmsis-dap.cfg".to_string(),
    target_cfg: RP2350_TARGET_CFG.to_string(),
    adapter_speed_khz: 5000,
});

/// SEGGER J-Link profile
pub static JLINK_PROFILE: Lazy<ProbeProfile> = Lazy::new(|| ProbeProfile {
    id: "jlink".to_string(),
    name: "SEGGER J-Link".to_string(),
    description: "J-Link adapters in SWD mode".to_string(),
    interface_cfg: "interface/jlink.cfg".to_string(),
    target_cfg: RP2350_TARGET_CFG.to_string(),
    adapter_speed_khz: 4000,
});

/// ST-Link profile
pub static STLINK_PROFILE: Lazy<ProbeProfile> = Lazy::new(|| ProbeProfile {
    id: "stlink".to_string(),
    name: "ST-Link".to_string(),
    description: "ST-Link V2/V3 adapters".to_string(),
    interface_cfg: "interface/stlink.cfg".to_string(),
    target_cfg: RP2350_TARGET_CFG.to_string(),
    adapter_speed_khz: 3300,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmsis_dap_profile() {
        let profile = &*CMSIS_DAP_PROFILE;
        assert_eq!(profile.id, "cmsis-dap");
        assert_eq!(profile.interface_cfg, "interface/cmsis-dap.cfg");
        assert_eq!(profile.target_cfg, "target/rp2350-riscv.cfg");
        assert_eq!(profile.adapter_speed_khz, 5000);
    }

    #[test]
    fn test_toml_round_trip() {
        let rendered = toml::to_string(&*JLINK_PROFILE).unwrap();
        let parsed: ProbeProfile = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.id, "jlink");
        assert_eq!(parsed.adapter_speed_khz, 4000);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        std::fs::write(
            &path,
            r#"
id = "custom"
name = "Custom adapter"
description = "Bench setup"
interface_cfg = "interface/ftdi/olimex-arm-usb-tiny-h.cfg"
target_cfg = "target/rp2350-riscv.cfg"
adapter_speed_khz = 1000
"#,
        )
        .unwrap();

        let profile = ProbeProfile::from_toml_file(&path).unwrap();
        assert_eq!(profile.id, "custom");
        assert_eq!(profile.adapter_speed_khz, 1000);
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = ProbeProfile::from_toml_file(Path::new("/nonexistent/probe.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read probe config"));
    }
}
