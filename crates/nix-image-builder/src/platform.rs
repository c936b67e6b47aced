//! Host architecture to Nix system mapping

use crate::error::BuilderError;
use crate::Result;

/// Host CPU architectures we know how to build for, with their Nix system.
pub const SYSTEM_TABLE: [(&str, &str); 2] =
    [("aarch64", "aarch64-linux"), ("x86_64", "x86_64-linux")];

/// CPU architecture of the running host (`std::env::consts::ARCH`).
pub fn host_arch() -> &'static str {
    std::env::consts::ARCH
}

/// Pick the Nix system to build for.
///
/// An explicit, non-empty system is returned unchanged. Otherwise the host
/// architecture is looked up in [`SYSTEM_TABLE`]; anything outside the table
/// is an error rather than a guess.
pub fn resolve_system(explicit: Option<&str>, host_arch: &str) -> Result<String> {
    if let Some(system) = explicit.filter(|s| !s.is_empty()) {
        return Ok(system.to_string());
    }

    SYSTEM_TABLE
        .iter()
        .find(|(arch, _)| *arch == host_arch)
        .map(|(_, system)| system.to_string())
        .ok_or_else(|| BuilderError::UnsupportedArchitecture(host_arch.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_system_wins() {
        let system = resolve_system(Some("riscv64-linux"), "x86_64").unwrap();
        assert_eq!(system, "riscv64-linux");
    }

    #[test]
    fn test_explicit_system_wins_on_unknown_host() {
        let system = resolve_system(Some("x86_64-linux"), "mips").unwrap();
        assert_eq!(system, "x86_64-linux");
    }

    #[test]
    fn test_table_lookup() {
        assert_eq!(resolve_system(None, "aarch64").unwrap(), "aarch64-linux");
        assert_eq!(resolve_system(None, "x86_64").unwrap(), "x86_64-linux");
    }

    #[test]
    fn test_empty_explicit_falls_back_to_table() {
        assert_eq!(resolve_system(Some(""), "x86_64").unwrap(), "x86_64-linux");
    }

    #[test]
    fn test_unknown_arch_is_fatal() {
        let err = resolve_system(None, "powerpc64").unwrap_err();
        match err {
            BuilderError::UnsupportedArchitecture(arch) => assert_eq!(arch, "powerpc64"),
            other => panic!("expected UnsupportedArchitecture, got {:?}", other),
        }
    }
}
