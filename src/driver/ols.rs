//! OpenLibSys-compatible module loader

use std::path::{Path, PathBuf};

use super::{
    DriverConfig, DriverFailure, DriverState, OlsDllStatus, OlsDriverType, OlsVersion,
    PciConfigAccess,
};
use crate::error::{Result, SmuError};

type GetDllStatusFn = unsafe extern "C" fn() -> u32;
type GetVersionFn = unsafe extern "C" fn(*mut u8, *mut u8, *mut u8, *mut u8) -> u32;
type GetDriverTypeFn = unsafe extern "C" fn() -> u32;
type InitializeOlsFn = unsafe extern "C" fn() -> i32;
type DeinitializeOlsFn = unsafe extern "C" fn();
type ReadPciConfigByteFn = unsafe extern "C" fn(u32, u32, *mut u8) -> i32;
type ReadPciConfigWordFn = unsafe extern "C" fn(u32, u32, *mut u16) -> i32;
type ReadPciConfigDwordFn = unsafe extern "C" fn(u32, u32, *mut u32) -> i32;
type WritePciConfigByteFn = unsafe extern "C" fn(u32, u32, u8) -> i32;
type WritePciConfigWordFn = unsafe extern "C" fn(u32, u32, u16) -> i32;
type WritePciConfigDwordFn = unsafe extern "C" fn(u32, u32, u32) -> i32;

/// Exports resolved from the driver module
///
/// Only `initialize_ols`, `deinitialize_ols`, `read_pci_config_dword` and
/// `write_pci_config_dword` are required; the rest are optional capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct OlsFunctions {
    /// `GetDllStatus`
    pub get_dll_status: Option<GetDllStatusFn>,
    /// `GetDllVersion`
    pub get_dll_version: Option<GetVersionFn>,
    /// `GetDriverVersion`
    pub get_driver_version: Option<GetVersionFn>,
    /// `GetDriverType`
    pub get_driver_type: Option<GetDriverTypeFn>,
    /// `InitializeOls`
    pub initialize_ols: Option<InitializeOlsFn>,
    /// `DeinitializeOls`
    pub deinitialize_ols: Option<DeinitializeOlsFn>,
    /// `ReadPciConfigByteEx`
    pub read_pci_config_byte: Option<ReadPciConfigByteFn>,
    /// `ReadPciConfigWordEx`
    pub read_pci_config_word: Option<ReadPciConfigWordFn>,
    /// `ReadPciConfigDwordEx`
    pub read_pci_config_dword: Option<ReadPciConfigDwordFn>,
    /// `WritePciConfigByteEx`
    pub write_pci_config_byte: Option<WritePciConfigByteFn>,
    /// `WritePciConfigWordEx`
    pub write_pci_config_word: Option<WritePciConfigWordFn>,
    /// `WritePciConfigDwordEx`
    pub write_pci_config_dword: Option<WritePciConfigDwordFn>,
}

impl OlsFunctions {
    fn resolve(library: &Library) -> Self {
        // SAFETY: each alias above matches the C signature of the named export
        unsafe {
            Self {
                get_dll_status: library.symbol("GetDllStatus"),
                get_dll_version: library.symbol("GetDllVersion"),
                get_driver_version: library.symbol("GetDriverVersion"),
                get_driver_type: library.symbol("GetDriverType"),
                initialize_ols: library.symbol("InitializeOls"),
                deinitialize_ols: library.symbol("DeinitializeOls"),
                read_pci_config_byte: library.symbol("ReadPciConfigByteEx"),
                read_pci_config_word: library.symbol("ReadPciConfigWordEx"),
                read_pci_config_dword: library.symbol("ReadPciConfigDwordEx"),
                write_pci_config_byte: library.symbol("WritePciConfigByteEx"),
                write_pci_config_word: library.symbol("WritePciConfigWordEx"),
                write_pci_config_dword: library.symbol("WritePciConfigDwordEx"),
            }
        }
    }

    /// Names of missing mandatory exports
    pub fn missing_mandatory(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.initialize_ols.is_none() {
            missing.push("InitializeOls");
        }
        if self.deinitialize_ols.is_none() {
            missing.push("DeinitializeOls");
        }
        if self.read_pci_config_dword.is_none() {
            missing.push("ReadPciConfigDwordEx");
        }
        if self.write_pci_config_dword.is_none() {
            missing.push("WritePciConfigDwordEx");
        }
        missing
    }
}

#[cfg(unix)]
struct Library {
    handle: std::ptr::NonNull<libc::c_void>,
}

// SAFETY: a dlopen handle is not tied to the opening thread
#[cfg(unix)]
unsafe impl Send for Library {}

#[cfg(unix)]
impl Library {
    fn open(path: &Path) -> std::result::Result<Self, String> {
        use std::ffi::{CStr, CString};
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| e.to_string())?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };

        std::ptr::NonNull::new(handle)
            .map(|handle| Self { handle })
            .ok_or_else(|| {
                let err = unsafe { libc::dlerror() };
                if err.is_null() {
                    format!("dlopen failed for {}", path.display())
                } else {
                    unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
                }
            })
    }

    /// Look up an exported function
    ///
    /// # Safety
    ///
    /// `T` must be a function pointer type matching the export's real signature.
    unsafe fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
        let c_name = std::ffi::CString::new(name).ok()?;
        let ptr = libc::dlsym(self.handle.as_ptr(), c_name.as_ptr());
        if ptr.is_null() {
            None
        } else {
            Some(std::mem::transmute_copy::<*mut libc::c_void, T>(&ptr))
        }
    }
}

#[cfg(unix)]
impl Drop for Library {
    fn drop(&mut self) {
        unsafe { libc::dlclose(self.handle.as_ptr()) };
    }
}

#[cfg(not(unix))]
struct Library;

#[cfg(not(unix))]
impl Library {
    fn open(_path: &Path) -> std::result::Result<Self, String> {
        Err("dynamic driver loading is only available on unix targets".to_string())
    }

    unsafe fn symbol<T: Copy>(&self, _name: &str) -> Option<T> {
        None
    }
}

/// Loaded driver module with its resolved function table
///
/// Dropping the bridge deinitializes the driver (if a session is open) and
/// unloads the module.
pub struct DriverBridge {
    library: Option<Library>,
    functions: OlsFunctions,
    state: DriverState,
    loaded_path: Option<PathBuf>,
    last_error: Option<String>,
}

impl std::fmt::Debug for DriverBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverBridge")
            .field("state", &self.state)
            .field("loaded_path", &self.loaded_path)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl DriverBridge {
    /// Locate and load the driver module
    ///
    /// Never fails: a missing module or missing mandatory export is recorded
    /// in [`DriverBridge::state`] and every later operation short-circuits.
    pub fn load(config: &DriverConfig) -> Self {
        let mut bridge = Self {
            library: None,
            functions: OlsFunctions::default(),
            state: DriverState::NotLoaded,
            loaded_path: None,
            last_error: None,
        };

        for candidate in config.candidates() {
            match Library::open(&candidate) {
                Ok(library) => {
                    bridge.loaded_path = Some(candidate);
                    bridge.library = Some(library);
                    break;
                }
                Err(e) => {
                    log::debug!("Driver module {} not loaded: {}", candidate.display(), e);
                    bridge.last_error = Some(e);
                }
            }
        }

        let Some(library) = &bridge.library else {
            log::warn!(
                "Hardware access driver not found: {}",
                bridge.last_error.as_deref().unwrap_or("no candidates")
            );
            bridge.state = DriverState::Error(DriverFailure::DllNotFound);
            return bridge;
        };

        bridge.functions = OlsFunctions::resolve(library);

        let missing = bridge.functions.missing_mandatory();
        if !missing.is_empty() {
            log::warn!("Driver module lacks mandatory exports: {}", missing.join(", "));
            bridge.last_error = Some(format!("missing exports: {}", missing.join(", ")));
            bridge.state = DriverState::Error(DriverFailure::DllIncorrectVersion);
            return bridge;
        }

        log::debug!(
            "Driver module loaded from {}",
            bridge.loaded_path.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_default()
        );
        bridge.state = DriverState::Loaded;
        bridge
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Path the module was loaded from
    pub fn loaded_path(&self) -> Option<&Path> {
        self.loaded_path.as_deref()
    }

    /// Last loader error text
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Resolved export table
    pub fn functions(&self) -> &OlsFunctions {
        &self.functions
    }

    fn usable(&self) -> bool {
        matches!(self.state, DriverState::Loaded | DriverState::Initialized)
    }

    /// Driver module status
    pub fn dll_status(&self) -> Option<OlsDllStatus> {
        if !self.usable() {
            return None;
        }
        let f = self.functions.get_dll_status?;
        Some(OlsDllStatus::from(unsafe { f() }))
    }

    fn query_version(&self, f: Option<GetVersionFn>) -> Option<OlsVersion> {
        if !self.usable() {
            return None;
        }
        let f = f?;
        let mut version = OlsVersion::default();
        unsafe {
            f(
                &mut version.major,
                &mut version.minor,
                &mut version.revision,
                &mut version.release,
            )
        };
        Some(version)
    }

    /// Version of the support module itself
    pub fn dll_version(&self) -> Option<OlsVersion> {
        self.query_version(self.functions.get_dll_version)
    }

    /// Version of the kernel driver behind it
    pub fn driver_version(&self) -> Option<OlsVersion> {
        self.query_version(self.functions.get_driver_version)
    }

    /// Kernel driver flavour
    pub fn driver_type(&self) -> Option<OlsDriverType> {
        if !self.usable() {
            return None;
        }
        let f = self.functions.get_driver_type?;
        Some(OlsDriverType::from(unsafe { f() }))
    }

    /// Read an 8-bit config register, if the module exports it
    pub fn read_byte(&self, pci_address: u32, register: u32) -> Option<u8> {
        if !self.usable() {
            return None;
        }
        let f = self.functions.read_pci_config_byte?;
        let mut value = 0u8;
        (unsafe { f(pci_address, register, &mut value) } == 1).then_some(value)
    }

    /// Read a 16-bit config register, if the module exports it
    pub fn read_word(&self, pci_address: u32, register: u32) -> Option<u16> {
        if !self.usable() {
            return None;
        }
        let f = self.functions.read_pci_config_word?;
        let mut value = 0u16;
        (unsafe { f(pci_address, register, &mut value) } == 1).then_some(value)
    }

    /// Write an 8-bit config register, if the module exports it
    pub fn write_byte(&self, pci_address: u32, register: u32, value: u8) -> bool {
        match self.functions.write_pci_config_byte {
            Some(f) if self.usable() => unsafe { f(pci_address, register, value) == 1 },
            _ => false,
        }
    }

    /// Write a 16-bit config register, if the module exports it
    pub fn write_word(&self, pci_address: u32, register: u32, value: u16) -> bool {
        match self.functions.write_pci_config_word {
            Some(f) if self.usable() => unsafe { f(pci_address, register, value) == 1 },
            _ => false,
        }
    }
}

impl PciConfigAccess for DriverBridge {
    fn is_ready(&self) -> bool {
        self.library.is_some() && self.usable()
    }

    fn initialize(&mut self) -> Result<()> {
        match self.state {
            DriverState::Initialized => return Ok(()),
            DriverState::Error(DriverFailure::DllInitializeError) => {
                return Err(SmuError::DriverInit(
                    self.last_error.clone().unwrap_or_else(|| "initialization failed".to_string()),
                ));
            }
            DriverState::Error(failure) => return Err(SmuError::DriverLoad(failure)),
            DriverState::NotLoaded => return Err(SmuError::DriverLoad(DriverFailure::DllNotFound)),
            DriverState::Loaded => {}
        }

        let Some(init) = self.functions.initialize_ols else {
            self.state = DriverState::Error(DriverFailure::DllIncorrectVersion);
            return Err(SmuError::DriverLoad(DriverFailure::DllIncorrectVersion));
        };

        if unsafe { init() } == 0 {
            log::error!("InitializeOls reported failure");
            self.last_error = Some("InitializeOls returned 0".to_string());
            self.state = DriverState::Error(DriverFailure::DllInitializeError);
            return Err(SmuError::DriverInit("InitializeOls returned 0".to_string()));
        }
        self.state = DriverState::Initialized;

        if let Some(status) = self.dll_status() {
            if status != OlsDllStatus::NoError {
                log::error!("Driver status after initialize: {:?}", status);
                self.deinitialize();
                let reason = format!("driver status {:?}", status);
                self.last_error = Some(reason.clone());
                self.state = DriverState::Error(DriverFailure::DllInitializeError);
                return Err(SmuError::DriverInit(reason));
            }
        }

        log::trace!("Driver session initialized");
        Ok(())
    }

    fn deinitialize(&mut self) {
        if self.state != DriverState::Initialized {
            return;
        }
        if let Some(deinit) = self.functions.deinitialize_ols {
            unsafe { deinit() };
        }
        self.state = DriverState::Loaded;
        log::trace!("Driver session closed");
    }

    fn read_dword(&self, pci_address: u32, register: u32) -> Option<u32> {
        if !self.is_ready() {
            return None;
        }
        let f = self.functions.read_pci_config_dword?;
        let mut value = 0u32;
        (unsafe { f(pci_address, register, &mut value) } == 1).then_some(value)
    }

    fn write_dword(&self, pci_address: u32, register: u32, value: u32) -> bool {
        match self.functions.write_pci_config_dword {
            Some(f) if self.is_ready() => unsafe { f(pci_address, register, value) == 1 },
            _ => false,
        }
    }
}

impl Drop for DriverBridge {
    fn drop(&mut self) {
        self.deinitialize();
        // `library` drops after this body and unloads the module
    }
}
