//! Build identification

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_COMMIT: &str = env!("WIREJUMP_BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("WIREJUMP_BUILD_DATE");

/// `WireJump <version>-<commit> built @<date>`
pub fn version_string() -> String {
    format!("WireJump {}-{} built @{}", VERSION, BUILD_COMMIT, BUILD_DATE)
}
