/// Resource name under which the serialized manifest is embedded.
pub const MANIFEST_RESOURCE_NAME: &str = "packbox-manifest.json";

/// Extension of compressed artifact files in the scratch workspace.
pub const PACKED_EXTENSION: &str = "packed";

/// Directory (under the manifest's directory) that holds scratch workspaces.
pub const SCRATCH_DIR: &str = "Temp";

/// Delimiter between the segments of a module's qualified name.
pub const PARTIAL_NAME_DELIMITER: char = ',';

/// Log file for startup and otherwise fatal loader faults.
pub const FATAL_LOG_FILENAME: &str = "rolling-fatal.log";

/// Log file for faults recovered inside the resolution hook.
pub const ERROR_LOG_FILENAME: &str = "rolling-error.log";

/// Environment variable naming the default loader stub executable.
pub const STUB_ENV_VAR: &str = "PACKBOX_STUB";
