//! Host architecture detection.

use provisio_shared::errors::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of architectures an artifact is published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureTag {
    Aarch64,
    Arm,
    X86_64,
    I686,
}

impl ArchitectureTag {
    /// Tag as it appears in artifact names and checksum maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchitectureTag::Aarch64 => "aarch64",
            ArchitectureTag::Arm => "arm",
            ArchitectureTag::X86_64 => "x86_64",
            ArchitectureTag::I686 => "i686",
        }
    }

    /// Map an ABI or machine identifier to a tag.
    pub fn from_abi(abi: &str) -> Option<Self> {
        match abi.trim().to_ascii_lowercase().as_str() {
            "arm64-v8a" | "aarch64" | "arm64" => Some(ArchitectureTag::Aarch64),
            "armeabi-v7a" | "armeabi" | "arm" | "armv7l" | "armv8l" => Some(ArchitectureTag::Arm),
            "x86_64" | "amd64" | "x64" => Some(ArchitectureTag::X86_64),
            "x86" | "i686" | "i386" => Some(ArchitectureTag::I686),
            _ => None,
        }
    }
}

impl fmt::Display for ArchitectureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchitectureTag {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_abi(s).ok_or_else(|| ProvisionError::UnsupportedArchitecture(s.to_string()))
    }
}

/// Pick the first supported identifier from `preferred`, in order.
///
/// Unknown identifiers are skipped; an empty match is an error rather than a guess.
pub fn detect_from<S: AsRef<str>>(preferred: &[S]) -> ProvisionResult<ArchitectureTag> {
    for abi in preferred {
        if let Some(tag) = ArchitectureTag::from_abi(abi.as_ref()) {
            tracing::debug!(abi = abi.as_ref(), arch = %tag, "Detected architecture");
            return Ok(tag);
        }
    }

    let seen: Vec<&str> = preferred.iter().map(|s| s.as_ref()).collect();
    Err(ProvisionError::UnsupportedArchitecture(if seen.is_empty() {
        "no host identifiers".to_string()
    } else {
        seen.join(",")
    }))
}

/// Detect the host architecture.
///
/// Configured ABI overrides win; otherwise the compile-time target arch is used.
pub fn detect_architecture(abi_overrides: &[String]) -> ProvisionResult<ArchitectureTag> {
    let mut candidates: Vec<&str> = abi_overrides.iter().map(String::as_str).collect();
    candidates.push(std::env::consts::ARCH);
    detect_from(&candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_aliases() {
        assert_eq!(ArchitectureTag::from_abi("arm64-v8a"), Some(ArchitectureTag::Aarch64));
        assert_eq!(ArchitectureTag::from_abi("arm64"), Some(ArchitectureTag::Aarch64));
        assert_eq!(ArchitectureTag::from_abi("armeabi-v7a"), Some(ArchitectureTag::Arm));
        assert_eq!(ArchitectureTag::from_abi("AMD64"), Some(ArchitectureTag::X86_64));
        assert_eq!(ArchitectureTag::from_abi("x86"), Some(ArchitectureTag::I686));
        assert_eq!(ArchitectureTag::from_abi("mips"), None);
    }

    #[test]
    fn test_detect_skips_unknown() {
        let tag = detect_from(&["mips", "x86_64"]).unwrap();
        assert_eq!(tag, ArchitectureTag::X86_64);
    }

    #[test]
    fn test_detect_unsupported() {
        let err = detect_from(&["mips", "riscv64"]).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedArchitecture(_)));
        assert!(err.to_string().contains("riscv64"));
    }

    #[test]
    fn test_override_wins() {
        let tag = detect_architecture(&["armeabi-v7a".to_string()]).unwrap();
        assert_eq!(tag, ArchitectureTag::Arm);
    }
}
