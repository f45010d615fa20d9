/// Length of the truncated object hash used for builder signatures.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Directory (relative to the build root) holding persisted state.
pub const STATE_DIR: &str = ".use";

/// Name of the persisted state file inside [`STATE_DIR`].
pub const STATE_FILENAME: &str = "state.json";

/// Current on-disk state format.
pub const STATE_VERSION: u32 = 1;

/// Default build script name.
pub const SCRIPT_FILENAME: &str = "build.lua";

/// Targets that force a reconfiguration when requested.
pub const CONFIGURE_TARGETS: &[&str] = &["configure", "reconfigure"];
