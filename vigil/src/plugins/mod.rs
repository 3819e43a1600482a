//! # External detector plugins
//!
//! A detector plugin is a shared library exporting three C functions:
//!
//! * `init_motion_trigger(parameter: *const c_char) -> *mut c_void` creates a detector instance
//!   from a free-form parameter string.
//! * `detect_motion(instance, ts, width, height, prev, cur, mask, meta) -> bool` compares two
//!   packed RGB frames. `mask` is either null or `width * height` bytes where non-zero selects a
//!   pixel. The plugin may store a `malloc`ed, nul-terminated string in `*meta`, which the host
//!   frees.
//! * `uninit_motion_trigger(instance)` destroys the instance.
//!
//! Plugins built with [`define_detector_plugin!`](crate::define_detector_plugin) also export
//! `vigil_plugin_rustc_version() -> *const c_char`. The host warns when the plugin was built by a
//! different compiler than itself.
//!
//! Rust plugins implement [`PluginDetector`] and generate the functions with
//! [`define_detector_plugin!`](crate::define_detector_plugin).

use crate::prelude::v1::*;
use std::ffi::CStr;
use std::os::raw::c_char;

#[cfg(feature = "plugins")]
pub mod util;

pub const INIT_SYMBOL: &str = "init_motion_trigger";
pub const DETECT_SYMBOL: &str = "detect_motion";
pub const UNINIT_SYMBOL: &str = "uninit_motion_trigger";

/// Every symbol a plugin must export.
pub const ENTRY_POINTS: [&str; 3] = [INIT_SYMBOL, DETECT_SYMBOL, UNINIT_SYMBOL];

/// Detector implemented inside a plugin library.
pub trait PluginDetector: Send + Sized + 'static {
    /// Create a detector from its parameter string.
    fn new(parameter: &str) -> Result<Self>;

    /// Compare two frames.
    ///
    /// # Arguments
    ///
    /// * `ts` - timestamp of `cur` in microseconds.
    /// * `width` - width of the frames.
    /// * `height` - height of the frames.
    /// * `prev` - previous packed RGB frame.
    /// * `cur` - current packed RGB frame.
    /// * `mask` - optional selection, non-zero bytes select a pixel.
    ///
    /// Returns whether motion was detected, and optional text to publish.
    fn detect(
        &mut self,
        ts: u64,
        width: usize,
        height: usize,
        prev: &[u8],
        cur: &[u8],
        mask: Option<&[u8]>,
    ) -> (bool, Option<String>);
}

/// Copy `meta` into a `malloc`ed C string, for handing over to the host.
///
/// Text after an interior nul byte is dropped.
pub fn into_c_meta(meta: Option<String>) -> *mut c_char {
    let meta = match meta {
        Some(meta) => meta,
        None => return std::ptr::null_mut(),
    };

    let bytes = meta.as_bytes();
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

    unsafe {
        let out = libc::malloc(len + 1) as *mut u8;

        if out.is_null() {
            return std::ptr::null_mut();
        }

        std::ptr::copy_nonoverlapping(bytes.as_ptr(), out, len);
        *out.add(len) = 0;

        out as *mut c_char
    }
}

/// Take ownership of a plugin produced C string and free it.
///
/// # Safety
///
/// `meta` must be null or a nul-terminated string allocated with `malloc`, that is not used
/// afterwards.
pub unsafe fn take_c_meta(meta: *mut c_char) -> Option<String> {
    if meta.is_null() {
        return None;
    }

    let out = CStr::from_ptr(meta).to_string_lossy().into_owned();
    libc::free(meta as *mut _);

    Some(out)
}

/// Export a [`PluginDetector`] implementation through the plugin C interface.
#[macro_export]
macro_rules! define_detector_plugin {
    ($ty:ty) => {
        #[no_mangle]
        pub unsafe extern "C" fn init_motion_trigger(
            parameter: *const ::std::os::raw::c_char,
        ) -> *mut ::std::os::raw::c_void {
            let parameter = if parameter.is_null() {
                ::std::borrow::Cow::Borrowed("")
            } else {
                ::std::ffi::CStr::from_ptr(parameter).to_string_lossy()
            };

            match <$ty as $crate::plugins::PluginDetector>::new(&parameter) {
                Ok(detector) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(detector)) as _,
                Err(e) => {
                    $crate::log::error!("init_motion_trigger({}): {}", parameter, e);
                    ::std::ptr::null_mut()
                }
            }
        }

        #[no_mangle]
        pub unsafe extern "C" fn detect_motion(
            instance: *mut ::std::os::raw::c_void,
            ts: u64,
            width: ::std::os::raw::c_int,
            height: ::std::os::raw::c_int,
            prev: *const u8,
            cur: *const u8,
            mask: *const u8,
            meta: *mut *mut ::std::os::raw::c_char,
        ) -> bool {
            if !meta.is_null() {
                *meta = ::std::ptr::null_mut();
            }

            if instance.is_null() || prev.is_null() || cur.is_null() || width <= 0 || height <= 0
            {
                return false;
            }

            let detector = &mut *(instance as *mut $ty);
            let (width, height) = (width as usize, height as usize);
            let n = width * height;

            let prev = ::std::slice::from_raw_parts(prev, n * 3);
            let cur = ::std::slice::from_raw_parts(cur, n * 3);
            let mask = if mask.is_null() {
                None
            } else {
                Some(::std::slice::from_raw_parts(mask, n))
            };

            let (triggered, out) = $crate::plugins::PluginDetector::detect(
                detector, ts, width, height, prev, cur, mask,
            );

            if !meta.is_null() {
                *meta = $crate::plugins::into_c_meta(out);
            }

            triggered
        }

        #[no_mangle]
        pub extern "C" fn vigil_plugin_rustc_version() -> *const ::std::os::raw::c_char {
            $crate::RUSTC_VERSION_C.as_ptr() as _
        }

        #[no_mangle]
        pub unsafe extern "C" fn uninit_motion_trigger(instance: *mut ::std::os::raw::c_void) {
            if !instance.is_null() {
                ::std::mem::drop(::std::boxed::Box::from_raw(instance as *mut $ty));
            }
        }
    };
}

#[cfg(feature = "plugins")]
pub use external::ExternalDetector;

#[cfg(feature = "plugins")]
mod external {
    use super::*;
    use libloading::{Library, Symbol};
    use log::*;
    use std::ffi::CString;
    use std::os::raw::{c_int, c_void};
    use std::path::Path;

    type InitFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
    type DetectFn = unsafe extern "C" fn(
        *mut c_void,
        u64,
        c_int,
        c_int,
        *const u8,
        *const u8,
        *const u8,
        *mut *mut c_char,
    ) -> bool;
    type UninitFn = unsafe extern "C" fn(*mut c_void);
    type VersionFn = extern "C" fn() -> *const c_char;

    /// Detector instance living in a dynamically loaded plugin.
    pub struct ExternalDetector {
        instance: *mut c_void,
        detect: DetectFn,
        uninit: UninitFn,
        rustc_version: Option<String>,
        // Must outlive the function pointers above, dropped last.
        _lib: Library,
    }

    // The instance is only ever used from the thread that owns the detector.
    unsafe impl Send for ExternalDetector {}

    impl ExternalDetector {
        /// Load a plugin and create a detector instance.
        ///
        /// # Arguments
        ///
        /// * `path` - path to the shared library.
        /// * `parameter` - parameter string passed to `init_motion_trigger`.
        pub fn load(path: impl AsRef<Path>, parameter: &str) -> Result<Self> {
            let path = path.as_ref();

            util::check_entry_points(path, &ENTRY_POINTS)?;

            let lib = unsafe { Library::new(path) }
                .with_context(|| format!("cannot load plugin {}", path.display()))?;

            let (init, detect, uninit) = unsafe {
                let init: Symbol<InitFn> = lib.get(b"init_motion_trigger\0")?;
                let detect: Symbol<DetectFn> = lib.get(b"detect_motion\0")?;
                let uninit: Symbol<UninitFn> = lib.get(b"uninit_motion_trigger\0")?;
                (*init, *detect, *uninit)
            };

            let rustc_version = unsafe { lib.get::<VersionFn>(b"vigil_plugin_rustc_version\0") }
                .ok()
                .map(|version| {
                    unsafe { CStr::from_ptr(version()) }
                        .to_string_lossy()
                        .into_owned()
                });

            match &rustc_version {
                Some(v) if v != crate::RUSTC_VERSION => warn!(
                    "plugin {} was built with rustc {v}, host with {}",
                    path.display(),
                    crate::RUSTC_VERSION
                ),
                Some(_) => {}
                None => debug!("plugin {} does not report its rustc version", path.display()),
            }

            let c_parameter = CString::new(parameter)
                .map_err(|_| anyhow!("plugin parameter contains a nul byte"))?;

            let instance = unsafe { init(c_parameter.as_ptr()) };

            if instance.is_null() {
                bail!("plugin {} failed to initialize", path.display());
            }

            info!("loaded detector plugin {}", path.display());

            Ok(Self {
                instance,
                detect,
                uninit,
                rustc_version,
                _lib: lib,
            })
        }

        /// Compiler version reported by the plugin, if it exports one.
        pub fn rustc_version(&self) -> Option<&str> {
            self.rustc_version.as_deref()
        }

        /// Run the plugin on a pair of packed RGB frames.
        pub fn detect(
            &mut self,
            ts: u64,
            width: usize,
            height: usize,
            prev: &[u8],
            cur: &[u8],
            mask: Option<&[bool]>,
        ) -> Result<(bool, Option<String>)> {
            let n = width * height;

            if prev.len() != n * 3 || cur.len() != n * 3 {
                bail!("frame data does not match {width}x{height}");
            }

            if mask.map_or(false, |m| m.len() != n) {
                bail!("selection mask does not match {width}x{height}");
            }

            let w = c_int::try_from(width)?;
            let h = c_int::try_from(height)?;

            let mask = mask.map_or(std::ptr::null(), |m| m.as_ptr() as *const u8);
            let mut meta = std::ptr::null_mut();

            let triggered = unsafe {
                (self.detect)(
                    self.instance,
                    ts,
                    w,
                    h,
                    prev.as_ptr(),
                    cur.as_ptr(),
                    mask,
                    &mut meta,
                )
            };

            Ok((triggered, unsafe { take_c_meta(meta) }))
        }
    }

    impl Drop for ExternalDetector {
        fn drop(&mut self) {
            unsafe { (self.uninit)(self.instance) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Threshold(usize);

    impl PluginDetector for Threshold {
        fn new(parameter: &str) -> Result<Self> {
            Ok(Self(parameter.parse()?))
        }

        fn detect(
            &mut self,
            _: u64,
            _: usize,
            _: usize,
            prev: &[u8],
            cur: &[u8],
            mask: Option<&[u8]>,
        ) -> (bool, Option<String>) {
            let changed = prev
                .chunks(3)
                .zip(cur.chunks(3))
                .enumerate()
                .filter(|(i, _)| mask.map_or(true, |m| m[*i] != 0))
                .filter(|(_, (a, b))| a != b)
                .count();
            (changed >= self.0, Some(format!("changed={changed}")))
        }
    }

    crate::define_detector_plugin!(Threshold);

    #[test]
    fn meta_strings() {
        let ptr = into_c_meta(Some("a\0b".into()));
        assert_eq!(unsafe { take_c_meta(ptr) }.as_deref(), Some("a"));
        assert!(into_c_meta(None).is_null());
        assert_eq!(unsafe { take_c_meta(std::ptr::null_mut()) }, None);
    }

    #[test]
    fn generated_entry_points() {
        unsafe {
            assert!(init_motion_trigger(b"nope\0".as_ptr() as _).is_null());

            let inst = init_motion_trigger(b"2\0".as_ptr() as _);
            assert!(!inst.is_null());

            let prev = [0u8; 12];
            let mut cur = [0u8; 12];
            cur[0] = 1;
            cur[3] = 1;

            let mut meta = std::ptr::null_mut();
            assert!(detect_motion(
                inst,
                0,
                2,
                2,
                prev.as_ptr(),
                cur.as_ptr(),
                std::ptr::null(),
                &mut meta
            ));
            assert_eq!(take_c_meta(meta).as_deref(), Some("changed=2"));

            let mask = [1u8, 0, 1, 1];
            assert!(!detect_motion(
                inst,
                0,
                2,
                2,
                prev.as_ptr(),
                cur.as_ptr(),
                mask.as_ptr(),
                &mut meta
            ));
            assert_eq!(take_c_meta(meta).as_deref(), Some("changed=1"));

            uninit_motion_trigger(inst);
        }
    }

    #[test]
    fn exported_version() {
        let version = unsafe { CStr::from_ptr(vigil_plugin_rustc_version()) };
        assert_eq!(version.to_str().unwrap(), crate::RUSTC_VERSION);
    }

    #[cfg(feature = "plugins")]
    #[test]
    fn load_missing_plugin() {
        assert!(ExternalDetector::load("/nonexistent/vigil/plugin.so", "").is_err());
    }
}
