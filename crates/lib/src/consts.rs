/// Application name, used for directory names under the platform data/cache roots.
pub const APP_NAME: &str = "kiln";

/// Number of hex characters kept from a SHA-256 digest for object ids.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Marker file written into a build output directory once the build succeeds.
pub const BUILD_COMPLETE_MARKER: &str = ".kiln-complete";

/// Default declaration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "kiln.json";

/// Entries skipped when hashing a project's source tree.
pub const DEFAULT_SOURCE_EXCLUSIONS: &[&str] = &[".git"];

/// PATH value used when an environment carries no tools.
pub const EMPTY_PATH_SENTINEL: &str = "/path-not-set";

/// Reproducible timestamp exported to every command (1980-01-01T00:00:00Z).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
