use std::{ffi::CString, path::PathBuf, ptr};

use widestring::{U16CString, U16Str};
use windows_sys::Win32::{
    Foundation::HMODULE,
    System::LibraryLoader::{GetModuleFileNameW, GetModuleHandleW, GetProcAddress},
};

use crate::{resolver::HostModule, symbol::Address, Error::LoaderError, Result};

/// Longest path `GetModuleFileNameW` can report with the `\\?\` prefix
const MAX_MODULE_PATH: usize = 32_768;

/// A module loaded into the current process, seen through the Windows loader.
#[derive(Debug)]
pub struct ProcessModule {
    name: String,
    handle: HMODULE,
    path: Option<PathBuf>,
}

impl ProcessModule {
    /// The executable of the current process.
    ///
    /// # Errors
    /// Returns [`crate::Error::LoaderError`] if the loader refuses the request.
    pub fn open_self() -> Result<Self> {
        let handle = unsafe { GetModuleHandleW(ptr::null()) };
        Self::from_handle(handle, None)
    }

    /// A module that is already loaded, found by name (`CvGameCore_Expansion2.dll`).
    ///
    /// The module is never loaded by this call.
    ///
    /// # Errors
    /// Returns [`crate::Error::LoaderError`] if no such module is loaded.
    pub fn open(name: &str) -> Result<Self> {
        let wide = U16CString::from_str(name)
            .map_err(|_| LoaderError(format!("Module name contains a NUL character - {name}")))?;
        let handle = unsafe { GetModuleHandleW(wide.as_ptr()) };
        Self::from_handle(handle, Some(name))
    }

    fn from_handle(handle: HMODULE, name: Option<&str>) -> Result<Self> {
        if handle.is_null() {
            return Err(LoaderError(format!(
                "{} is not loaded",
                name.unwrap_or("the main executable")
            )));
        }

        let path = module_path(handle);
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .as_deref()
                .and_then(|path| path.file_name())
                .map_or_else(|| "self".to_string(), |name| name.to_string_lossy().into_owned()),
        };

        log::debug!("Opened {} at {}", name, Address::from_ptr(handle.cast_const()));
        Ok(ProcessModule { name, handle, path })
    }
}

impl HostModule for ProcessModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> Address {
        // A module handle is the address the image was mapped at.
        Address::from_ptr(self.handle.cast_const())
    }

    fn export(&self, name: &str) -> Option<Address> {
        let c_name = CString::new(name).ok()?;
        let function = unsafe { GetProcAddress(self.handle, c_name.as_ptr().cast()) }?;

        Some(Address::new(function as usize))
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

fn module_path(handle: HMODULE) -> Option<PathBuf> {
    let mut buffer = vec![0_u16; MAX_MODULE_PATH];
    let len = unsafe { GetModuleFileNameW(handle, buffer.as_mut_ptr(), buffer.len() as u32) };
    if len == 0 {
        return None;
    }

    let path = U16Str::from_slice(&buffer[..len as usize]).to_os_string();
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_self() {
        let module = ProcessModule::open_self().unwrap();
        assert!(!module.base().is_null());
        assert!(module.path().is_some());
    }

    #[test]
    fn open_kernel32() {
        let module = ProcessModule::open("kernel32.dll").unwrap();
        assert!(module.export("GetProcAddress").is_some());
        assert!(module.export("hostlink_definitely_missing_symbol").is_none());
    }

    #[test]
    fn open_not_loaded() {
        assert!(matches!(
            ProcessModule::open("hostlink_not_loaded.dll"),
            Err(LoaderError(_))
        ));
    }
}
