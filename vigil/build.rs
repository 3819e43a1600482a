use rustc_version::version_meta;
use std::env;
use std::path::PathBuf;

/// Record the compiler version, so that hosts can tell which compiler built a plugin.
fn main() {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is not set"));

    let version = version_meta()
        .expect("Failed to read rustc version.")
        .short_version_string;

    let source = format!(
        "/// `rustc` version the library was built with.
pub const RUSTC_VERSION: &str = {version:?};

/// [`RUSTC_VERSION`] as a nul-terminated string, exported by detector plugins.
#[doc(hidden)]
pub const RUSTC_VERSION_C: &[u8] = b\"{}\\0\";
",
        version.escape_default()
    );

    std::fs::write(out_dir.join("version.rs"), source).expect("cannot write version.rs");
}
