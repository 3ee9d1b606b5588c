//! SQLite VFS serving the main database file from a [`RemoteBlockStore`].
//!
//! Each connection registers its own uniquely named VFS that points at the
//! block store opened for that connection. Files other than the main database
//! (temp files used for sorting and the like) are handed off to the platform's
//! default VFS.
//!
//! SQLite only ever sees `{read, size, close}` on the main file. Writes and
//! truncates are rejected, locks are no-ops since the object is immutable.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::{Arc, Mutex};

use rusqlite::ffi;
use tracing::debug;
use uuid::Uuid;

use crate::block_store::RemoteBlockStore;
use crate::errors::{FederationError, Result};

const MAX_PATHNAME: c_int = 512;

/// Shared state reachable from the VFS and every file it opens.
#[derive(Debug)]
struct VfsContext {
    store: Arc<RemoteBlockStore>,
    default_vfs: *mut ffi::sqlite3_vfs,
    /// Error from the last failing callback. SQLite only reports a generic IO
    /// error code, this keeps the original.
    last_error: Mutex<Option<FederationError>>,
}

impl VfsContext {
    fn record_error(&self, err: FederationError) {
        debug!(%err, "remote vfs callback failed");
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(err);
        }
    }
}

/// File handle as laid out in the memory SQLite allocates for us.
#[repr(C)]
struct RemoteFile {
    base: ffi::sqlite3_file,
    store: *const RemoteBlockStore,
    context: *const VfsContext,
}

/// A registered VFS. Unregisters and frees everything on drop.
///
/// Must outlive every connection opened through it.
#[derive(Debug)]
pub struct RegisteredVfs {
    name: String,
    // Kept alive for `zName`.
    _c_name: CString,
    vfs: *mut ffi::sqlite3_vfs,
    context: *mut VfsContext,
}

impl RegisteredVfs {
    /// Register a new VFS backed by `store`.
    pub fn register(store: Arc<RemoteBlockStore>) -> Result<Self> {
        let name = format!("s3qlite-{}", Uuid::new_v4());
        let c_name = CString::new(name.clone())
            .map_err(|e| FederationError::Internal(format!("invalid vfs name: {e}")))?;

        // SAFETY: Passing null returns the default VFS, initializing SQLite if
        // needed.
        let default_vfs = unsafe { ffi::sqlite3_vfs_find(ptr::null()) };
        if default_vfs.is_null() {
            return Err(FederationError::Internal(
                "sqlite has no default vfs".to_string(),
            ));
        }

        // SAFETY: Non-null pointer to a registered VFS, which lives for the
        // lifetime of the process.
        let default_file_size = unsafe { (*default_vfs).szOsFile };
        let file_size = c_int::max(std::mem::size_of::<RemoteFile>() as c_int, default_file_size);

        let context = Box::into_raw(Box::new(VfsContext {
            store,
            default_vfs,
            last_error: Mutex::new(None),
        }));

        let vfs = Box::into_raw(Box::new(ffi::sqlite3_vfs {
            iVersion: 1,
            szOsFile: file_size,
            mxPathname: MAX_PATHNAME,
            pNext: ptr::null_mut(),
            zName: c_name.as_ptr(),
            pAppData: context as *mut c_void,
            xOpen: Some(x_open),
            xDelete: Some(x_delete),
            xAccess: Some(x_access),
            xFullPathname: Some(x_full_pathname),
            xRandomness: Some(x_randomness),
            xSleep: Some(x_sleep),
            xCurrentTime: Some(x_current_time),
            xGetLastError: Some(x_get_last_error),
            // SAFETY: The remaining members are nullable function pointers.
            ..unsafe { std::mem::zeroed() }
        }));

        // SAFETY: `vfs` is fully initialized and stays valid until we
        // unregister it in drop.
        let rc = unsafe { ffi::sqlite3_vfs_register(vfs, 0) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: Not registered, we still own both allocations.
            unsafe {
                drop(Box::from_raw(vfs));
                drop(Box::from_raw(context));
            }
            return Err(FederationError::Internal(format!(
                "failed to register vfs, sqlite error code {rc}"
            )));
        }

        debug!(%name, "registered remote vfs");

        Ok(RegisteredVfs {
            name,
            _c_name: c_name,
            vfs,
            context,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the error recorded by the last failing callback, if any.
    pub fn take_error(&self) -> Option<FederationError> {
        // SAFETY: `context` is valid until drop.
        let context = unsafe { &*self.context };
        context.last_error.lock().ok().and_then(|mut last| last.take())
    }
}

impl Drop for RegisteredVfs {
    fn drop(&mut self) {
        // SAFETY: Registered in `register`. Connections using this VFS have
        // already been closed.
        unsafe {
            ffi::sqlite3_vfs_unregister(self.vfs);
            drop(Box::from_raw(self.vfs));
            drop(Box::from_raw(self.context));
        }
        debug!(name = %self.name, "unregistered remote vfs");
    }
}

static REMOTE_IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

/// Read into `buf` from `offset`, clamped to the size of the object.
///
/// Returns the number of bytes actually read.
fn read_clamped(store: &RemoteBlockStore, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let size = store.size();
    if offset >= size {
        return Ok(0);
    }
    let len = u64::min(buf.len() as u64, size - offset);
    let bytes = store.read(offset, len)?;
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
}

unsafe fn context<'a>(vfs: *mut ffi::sqlite3_vfs) -> &'a VfsContext {
    unsafe { &*((*vfs).pAppData as *const VfsContext) }
}

unsafe fn remote_file<'a>(file: *mut ffi::sqlite3_file) -> &'a RemoteFile {
    unsafe { &*(file as *const RemoteFile) }
}

unsafe extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    unsafe {
        let ctx = context(vfs);

        if flags & ffi::SQLITE_OPEN_MAIN_DB == 0 {
            let default = ctx.default_vfs;
            return match (*default).xOpen {
                Some(open) => open(default, name, file, flags, out_flags),
                None => ffi::SQLITE_CANTOPEN,
            };
        }

        let store = Arc::into_raw(ctx.store.clone());
        ptr::write(
            file as *mut RemoteFile,
            RemoteFile {
                base: ffi::sqlite3_file {
                    pMethods: &REMOTE_IO_METHODS,
                },
                store,
                context: ctx,
            },
        );

        if !out_flags.is_null() {
            *out_flags = (flags & !(ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE))
                | ffi::SQLITE_OPEN_READONLY;
        }

        debug!(object = %ctx.store.object(), "opened main database file");
        ffi::SQLITE_OK
    }
}

unsafe extern "C" fn x_delete(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    sync_dir: c_int,
) -> c_int {
    unsafe {
        let default = context(vfs).default_vfs;
        match (*default).xDelete {
            Some(delete) => delete(default, name, sync_dir),
            None => ffi::SQLITE_IOERR_DELETE,
        }
    }
}

unsafe extern "C" fn x_access(
    _vfs: *mut ffi::sqlite3_vfs,
    _name: *const c_char,
    _flags: c_int,
    res_out: *mut c_int,
) -> c_int {
    // Journals and WAL files never exist for an immutable database.
    unsafe {
        *res_out = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_full_pathname(
    _vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    n_out: c_int,
    out: *mut c_char,
) -> c_int {
    if name.is_null() || out.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }
    unsafe {
        let name = CStr::from_ptr(name).to_bytes_with_nul();
        if name.len() > n_out as usize {
            return ffi::SQLITE_CANTOPEN;
        }
        ptr::copy_nonoverlapping(name.as_ptr() as *const c_char, out, name.len());
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_randomness(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    out: *mut c_char,
) -> c_int {
    unsafe {
        let default = context(vfs).default_vfs;
        match (*default).xRandomness {
            Some(randomness) => randomness(default, n_byte, out),
            None => 0,
        }
    }
}

unsafe extern "C" fn x_sleep(vfs: *mut ffi::sqlite3_vfs, micros: c_int) -> c_int {
    unsafe {
        let default = context(vfs).default_vfs;
        match (*default).xSleep {
            Some(sleep) => sleep(default, micros),
            None => 0,
        }
    }
}

unsafe extern "C" fn x_current_time(vfs: *mut ffi::sqlite3_vfs, out: *mut f64) -> c_int {
    unsafe {
        let default = context(vfs).default_vfs;
        match (*default).xCurrentTime {
            Some(current_time) => current_time(default, out),
            None => ffi::SQLITE_ERROR,
        }
    }
}

unsafe extern "C" fn x_get_last_error(
    vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    out: *mut c_char,
) -> c_int {
    unsafe {
        let ctx = context(vfs);
        let msg = match ctx.last_error.lock() {
            Ok(last) => match last.as_ref() {
                Some(err) => err.to_string(),
                None => return 0,
            },
            Err(_) => return 0,
        };
        if n_byte <= 0 || out.is_null() {
            return 0;
        }
        let len = usize::min(msg.len(), n_byte as usize - 1);
        ptr::copy_nonoverlapping(msg.as_ptr() as *const c_char, out, len);
        *out.add(len) = 0;
        0
    }
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    unsafe {
        let remote = &mut *(file as *mut RemoteFile);
        if !remote.store.is_null() {
            drop(Arc::from_raw(remote.store));
            remote.store = ptr::null();
        }
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    unsafe {
        let remote = remote_file(file);
        let store = &*remote.store;
        let ctx = &*remote.context;

        if amount < 0 || offset < 0 {
            return ffi::SQLITE_IOERR_READ;
        }
        let out = std::slice::from_raw_parts_mut(buf as *mut u8, amount as usize);

        match read_clamped(store, offset as u64, out) {
            Ok(n) if n == out.len() => ffi::SQLITE_OK,
            Ok(n) => {
                // SQLite requires the unread tail to be zeroed on short reads.
                out[n..].fill(0);
                ffi::SQLITE_IOERR_SHORT_READ
            }
            Err(err) => {
                ctx.record_error(err);
                ffi::SQLITE_IOERR_READ
            }
        }
    }
}

unsafe extern "C" fn x_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    unsafe {
        let remote = remote_file(file);
        let data = std::slice::from_raw_parts(buf as *const u8, amount.max(0) as usize);
        if let Err(err) = (*remote.store).write(offset as u64, data) {
            (*remote.context).record_error(err);
        }
    }
    ffi::SQLITE_IOERR_WRITE
}

unsafe extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, _size: ffi::sqlite3_int64) -> c_int {
    unsafe {
        let remote = remote_file(file);
        (*remote.context).record_error(FederationError::UnsupportedOperation(
            "cannot truncate a remote database",
        ));
    }
    ffi::SQLITE_IOERR_TRUNCATE
}

unsafe extern "C" fn x_sync(_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    // Nothing is ever written.
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_size(
    file: *mut ffi::sqlite3_file,
    size_out: *mut ffi::sqlite3_int64,
) -> c_int {
    unsafe {
        let remote = remote_file(file);
        *size_out = (*remote.store).size() as ffi::sqlite3_int64;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_lock(_file: *mut ffi::sqlite3_file, _lock: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_unlock(_file: *mut ffi::sqlite3_file, _lock: c_int) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_check_reserved_lock(
    _file: *mut ffi::sqlite3_file,
    res_out: *mut c_int,
) -> c_int {
    unsafe {
        *res_out = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_control(
    _file: *mut ffi::sqlite3_file,
    _op: c_int,
    _arg: *mut c_void,
) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_sector_size(_file: *mut ffi::sqlite3_file) -> c_int {
    512
}

unsafe extern "C" fn x_device_characteristics(_file: *mut ffi::sqlite3_file) -> c_int {
    ffi::SQLITE_IOCAP_IMMUTABLE
}
