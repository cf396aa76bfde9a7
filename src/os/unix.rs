use std::{
    ffi::{c_int, c_void, CStr, CString},
    ops::Range,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
};

use libc::{dl_phdr_info, size_t, PT_LOAD, RTLD_LAZY, RTLD_NOLOAD};

use crate::{resolver::HostModule, symbol::Address, Error::LoaderError, Result};

/// A module loaded into the current process, seen through the dynamic loader.
#[derive(Debug)]
pub struct ProcessModule {
    name: String,
    handle: NonNull<c_void>,
    base: Address,
    path: Option<PathBuf>,
    segments: Vec<Range<usize>>,
}

impl ProcessModule {
    /// The main executable of the current process.
    ///
    /// Export lookups only report symbols the executable itself defines, even though the
    /// loader searches every library in the global scope.
    ///
    /// # Errors
    /// Returns [`crate::Error::LoaderError`] if the loader refuses the request.
    pub fn open_self() -> Result<Self> {
        let handle = unsafe { libc::dlopen(ptr::null(), RTLD_LAZY) };
        let handle = NonNull::new(handle).ok_or_else(|| LoaderError(last_error()))?;

        // The main program is always the first object reported.
        let Some(object) = find_object(None) else {
            unsafe { libc::dlclose(handle.as_ptr()) };
            return Err(LoaderError("main program not reported by the loader".to_string()));
        };

        let path = std::env::current_exe().ok();
        let name = path
            .as_deref()
            .and_then(Path::file_name)
            .map_or_else(|| "self".to_string(), |name| name.to_string_lossy().into_owned());

        log::debug!("Opened main program {} at {}", name, object.base);
        Ok(ProcessModule {
            name,
            handle,
            base: object.base,
            path,
            segments: object.segments,
        })
    }

    /// A shared object that is already loaded, found by file name (`libgame.so`) or path.
    ///
    /// The object is never loaded by this call. Export lookups only report symbols the object
    /// itself defines, not those of its dependencies.
    ///
    /// # Errors
    /// Returns [`crate::Error::LoaderError`] if no such object is loaded.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = CString::new(name)
            .map_err(|_| LoaderError(format!("Module name contains a NUL byte - {name}")))?;

        let handle = unsafe { libc::dlopen(c_name.as_ptr(), RTLD_LAZY | RTLD_NOLOAD) };
        let handle = NonNull::new(handle).ok_or_else(|| LoaderError(last_error()))?;

        let Some(object) = find_object(Some(name)) else {
            unsafe { libc::dlclose(handle.as_ptr()) };
            return Err(LoaderError(format!("{name} is loaded but has no program headers")));
        };

        log::debug!("Opened {} at {}", name, object.base);
        Ok(ProcessModule {
            name: name.to_string(),
            handle,
            base: object.base,
            path: object.path,
            segments: object.segments,
        })
    }

    fn defines(&self, address: usize) -> bool {
        self.segments.iter().any(|segment| segment.contains(&address))
    }
}

impl HostModule for ProcessModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> Address {
        self.base
    }

    fn export(&self, name: &str) -> Option<Address> {
        let c_name = CString::new(name).ok()?;
        let symbol = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
        if symbol.is_null() {
            return None;
        }

        // dlsym also searches the dependencies of the handle
        if !self.defines(symbol as usize) {
            log::trace!("{} resolves to {:p} outside of {}", name, symbol, self.name);
            return None;
        }

        Some(Address::from_ptr(symbol.cast_const()))
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

impl Drop for ProcessModule {
    fn drop(&mut self) {
        // Drops the reference taken by `dlopen`, the object itself stays loaded.
        unsafe { libc::dlclose(self.handle.as_ptr()) };
    }
}

fn last_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown dynamic loader error".to_string();
    }

    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}

/// A loaded object as reported by `dl_iterate_phdr`.
struct LoadedObject {
    base: Address,
    path: Option<PathBuf>,
    segments: Vec<Range<usize>>,
}

struct ObjectQuery<'a> {
    name: Option<&'a str>,
    found: Option<LoadedObject>,
}

/// The first loaded object matching `name`, or the main program.
fn find_object(name: Option<&str>) -> Option<LoadedObject> {
    let mut query = ObjectQuery { name, found: None };

    unsafe {
        libc::dl_iterate_phdr(
            Some(visit_object),
            ptr::addr_of_mut!(query).cast::<c_void>(),
        );
    }

    query.found
}

unsafe extern "C" fn visit_object(info: *mut dl_phdr_info, _size: size_t, data: *mut c_void) -> c_int {
    let query = &mut *data.cast::<ObjectQuery<'_>>();
    let info = &*info;

    let path = if info.dlpi_name.is_null() {
        None
    } else {
        CStr::from_ptr(info.dlpi_name)
            .to_str()
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    };

    let matches = match query.name {
        None => true,
        Some(name) => path.as_deref().is_some_and(|path| {
            path == Path::new(name) || path.file_name().is_some_and(|file| file == name)
        }),
    };

    if matches {
        let bias = info.dlpi_addr as usize;
        let headers = if info.dlpi_phdr.is_null() {
            &[][..]
        } else {
            std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum))
        };
        let segments = headers
            .iter()
            .filter(|header| header.p_type == PT_LOAD)
            .filter_map(|header| {
                let start = bias.checked_add(header.p_vaddr as usize)?;
                Some(start..start.checked_add(header.p_memsz as usize)?)
            })
            .collect();

        query.found = Some(LoadedObject {
            base: Address::new(bias),
            path,
            segments,
        });
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_self() {
        let module = ProcessModule::open_self().unwrap();

        assert!(module.path().is_some());
        assert!(!module.name().is_empty());
        assert!(module.export("hostlink_definitely_missing_symbol").is_none());
        assert!(module.export("bad\0name").is_none());
    }

    #[test]
    #[cfg(target_env = "gnu")]
    fn exports_of_dependencies_are_not_reported() {
        let libc = ProcessModule::open("libc.so.6").unwrap();
        let malloc = libc.export("malloc").unwrap();
        assert!(libc.defines(malloc.value()));

        // libgcc_s depends on libc, so dlsym finds malloc through it
        let unwinder = ProcessModule::open("libgcc_s.so.1").unwrap();
        assert!(unwinder.export("malloc").is_none());
        assert!(unwinder.export("_Unwind_Backtrace").is_some());
    }

    #[test]
    fn open_not_loaded() {
        let result = ProcessModule::open("libhostlink_not_loaded.so");
        assert!(matches!(result, Err(LoaderError(_))));
    }
}
