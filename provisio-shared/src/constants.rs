//! Provisioning constants.
//!
//! Centralized location for tunables shared by the fetcher, chain and orchestrator.

/// HTTP transfer configuration
pub mod http {
    /// Connect timeout for artifact downloads, in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;

    /// User agent sent with every artifact request
    pub const USER_AGENT: &str = concat!("provisio-fetcher/", env!("CARGO_PKG_VERSION"));

    /// Status returned when a range request is honored
    pub const STATUS_PARTIAL_CONTENT: u16 = 206;

    /// Status returned for a full-body response
    pub const STATUS_OK: u16 = 200;
}

/// Progress reporting configuration
pub mod progress {
    /// Minimum interval between two progress events with the same percent
    pub const REPORT_INTERVAL_MS: u64 = 500;

    /// Highest percent value ever reported
    pub const MAX_PERCENT: u8 = 100;
}

/// Artifact cache layout
pub mod cache {
    /// Suffix of the sidecar file recording the cached version
    pub const VERSION_SUFFIX: &str = "version";

    /// Suffix of an in-progress download
    pub const PARTIAL_SUFFIX: &str = "part";

    /// Placeholder replaced by the architecture tag in URL and file templates
    pub const ARCH_PLACEHOLDER: &str = "{arch}";
}

/// Prefix installation layout
pub mod install {
    /// Symlink manifest shipped inside bootstrap archives
    pub const SYMLINKS_FILE: &str = "SYMLINKS.txt";

    /// Separator between target and link path in the manifest
    pub const SYMLINK_SEPARATOR: char = '←';

    /// Suffix of the staging directory created next to the prefix
    pub const STAGING_SUFFIX: &str = "staging";

    /// Mode applied to executables in the installed prefix
    pub const EXECUTABLE_MODE: u32 = 0o700;

    /// Prefix-relative paths whose files must be executable
    pub const EXECUTABLE_PATHS: &[&str] = &[
        "bin/",
        "libexec/",
        "lib/apt/apt-helper",
        "lib/apt/methods/",
    ];
}

/// Dependency install chain configuration
pub mod chain {
    /// Characters of stderr kept in install failures
    pub const STDERR_EXCERPT_CHARS: usize = 500;

    /// Default per-command timeout, in seconds
    pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30 * 60;

    /// Exit code reported when the surface never produced one
    pub const UNKNOWN_EXIT_CODE: i32 = -1;
}
