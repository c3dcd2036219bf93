//! Open-file probe backed by the system handle table
//!
//! - Snapshots every handle in the system (`SystemExtendedHandleInformation`)
//! - Keeps the entries owned by the target pid
//! - Duplicates each one into this process and keeps only `File` objects
//! - Resolves the path with `GetFinalPathNameByHandleW`, falling back to the
//!   object manager name
//!
//! Every duplicated handle and buffer is released on all exit paths.

use super::{
    name_query_may_block, normalize_pattern, observe_path, HandleAuditLog, HandleAuditRecord,
    OpenFileProbe,
};
use ntapi::ntexapi::{
    NtQuerySystemInformation, SystemExtendedHandleInformation, SYSTEM_HANDLE_INFORMATION_EX,
    SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX,
};
use ntapi::ntobapi::{
    NtQueryObject, ObjectNameInformation, ObjectTypeInformation, OBJECT_INFORMATION_CLASS,
    OBJECT_NAME_INFORMATION, OBJECT_TYPE_INFORMATION,
};
use ntapi::winapi::shared::ntdef::{HANDLE as NtHandle, UNICODE_STRING};
use once_cell::sync::OnceCell;
use std::mem;
use std::sync::Arc;
use tracing::{debug, info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, DuplicateHandle, DUPLICATE_SAME_ACCESS, FALSE, HANDLE, LUID,
};
use windows::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_DEBUG_NAME,
    SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::Storage::FileSystem::{GetFinalPathNameByHandleW, FILE_NAME_NORMALIZED};
use windows::Win32::System::Threading::{
    GetCurrentProcess, OpenProcess, OpenProcessToken, PROCESS_DUP_HANDLE,
    PROCESS_QUERY_INFORMATION,
};

const STATUS_INFO_LENGTH_MISMATCH: i32 = 0xC000_0004_u32 as i32;
const STATUS_BUFFER_OVERFLOW: i32 = 0x8000_0005_u32 as i32;

const INITIAL_HANDLE_TABLE_BYTES: usize = 0x10000;
const TYPE_INFO_BYTES: usize = 0x1000;
const NAME_INFO_BYTES: usize = 0x10000;
const FINAL_PATH_CHARS: usize = 2048;

/// Closes the wrapped handle on drop
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// Pointer-aligned byte buffer for NT query results
struct QueryBuffer {
    words: Vec<usize>,
}

impl QueryBuffer {
    fn with_bytes(bytes: usize) -> Self {
        let words = bytes.div_ceil(mem::size_of::<usize>());
        Self {
            words: vec![0; words],
        }
    }

    fn len_bytes(&self) -> usize {
        self.words.len() * mem::size_of::<usize>()
    }

    fn grow_to(&mut self, bytes: usize) {
        if bytes > self.len_bytes() {
            *self = Self::with_bytes(bytes);
        }
    }

    fn as_ptr<T>(&self) -> *const T {
        self.words.as_ptr().cast()
    }

    fn as_mut_ptr<T>(&mut self) -> *mut T {
        self.words.as_mut_ptr().cast()
    }
}

/// Enable SeDebugPrivilege for this process.
///
/// Attempted once per process; later calls return the first result. Failure
/// only narrows which processes can be inspected.
pub fn enable_debug_privilege() -> bool {
    static ENABLED: OnceCell<bool> = OnceCell::new();
    *ENABLED.get_or_init(|| match unsafe { adjust_debug_privilege() } {
        Ok(()) => {
            info!("SeDebugPrivilege enabled");
            true
        }
        Err(e) => {
            warn!("Could not enable SeDebugPrivilege: {}", e);
            false
        }
    })
}

unsafe fn adjust_debug_privilege() -> windows::core::Result<()> {
    let mut token = HANDLE::default();
    OpenProcessToken(
        GetCurrentProcess(),
        TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
        &mut token,
    )?;
    let token = OwnedHandle(token);

    let mut luid = LUID::default();
    LookupPrivilegeValueW(PCWSTR::null(), SE_DEBUG_NAME, &mut luid)?;

    let privileges = TOKEN_PRIVILEGES {
        PrivilegeCount: 1,
        Privileges: [LUID_AND_ATTRIBUTES {
            Luid: luid,
            Attributes: SE_PRIVILEGE_ENABLED,
        }],
    };
    AdjustTokenPrivileges(
        token.0,
        FALSE,
        Some(&privileges as *const TOKEN_PRIVILEGES),
        0,
        None,
        None,
    )
}

/// Windows implementation of [`OpenFileProbe`]
pub struct HandleTableProbe {
    audit: Option<Arc<HandleAuditLog>>,
}

impl HandleTableProbe {
    pub fn new(audit: Option<Arc<HandleAuditLog>>) -> Self {
        enable_debug_privilege();
        Self { audit }
    }
}

/// Snapshot of the system handle table, grown until it fits
fn query_handle_table() -> Option<QueryBuffer> {
    let mut size = INITIAL_HANDLE_TABLE_BYTES;
    loop {
        let Ok(len) = u32::try_from(size) else {
            warn!("Handle table exceeds {} bytes", u32::MAX);
            return None;
        };

        let mut buffer = QueryBuffer::with_bytes(size);
        let mut needed = 0u32;
        let status = unsafe {
            NtQuerySystemInformation(
                SystemExtendedHandleInformation,
                buffer.as_mut_ptr(),
                len,
                &mut needed,
            )
        };

        if status == STATUS_INFO_LENGTH_MISMATCH {
            size = (size * 2).max(needed as usize);
            continue;
        }
        if status < 0 {
            warn!("NtQuerySystemInformation failed: 0x{:08X}", status);
            return None;
        }
        return Some(buffer);
    }
}

/// Entries of a handle table snapshot, clamped to what the buffer holds
fn table_entries(buffer: &QueryBuffer) -> &[SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX] {
    let info: *const SYSTEM_HANDLE_INFORMATION_EX = buffer.as_ptr();
    unsafe {
        let first = std::ptr::addr_of!((*info).Handles) as *const SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX;
        let header = first as usize - info as usize;
        let capacity = buffer.len_bytes().saturating_sub(header)
            / mem::size_of::<SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX>();
        let count = (*info).NumberOfHandles.min(capacity);
        std::slice::from_raw_parts(first, count)
    }
}

fn duplicate_into_self(process: &OwnedHandle, source: usize) -> Option<OwnedHandle> {
    let mut target = HANDLE::default();
    unsafe {
        DuplicateHandle(
            process.0,
            HANDLE(source as isize),
            GetCurrentProcess(),
            &mut target,
            0,
            FALSE,
            DUPLICATE_SAME_ACCESS,
        )
    }
    .ok()?;
    Some(OwnedHandle(target))
}

/// Query object information into `buffer`, growing it once if too small
fn query_object(
    handle: &OwnedHandle,
    class: OBJECT_INFORMATION_CLASS,
    buffer: &mut QueryBuffer,
) -> bool {
    for _ in 0..2 {
        let mut needed = 0u32;
        let status = unsafe {
            NtQueryObject(
                handle.0 .0 as NtHandle,
                class,
                buffer.as_mut_ptr(),
                buffer.len_bytes() as u32,
                &mut needed,
            )
        };
        if status == STATUS_INFO_LENGTH_MISMATCH || status == STATUS_BUFFER_OVERFLOW {
            buffer.grow_to((buffer.len_bytes() * 2).max(needed as usize));
            continue;
        }
        return status >= 0;
    }
    false
}

fn unicode_to_string(us: &UNICODE_STRING) -> Option<String> {
    if us.Buffer.is_null() || us.Length == 0 {
        return None;
    }
    let units = unsafe { std::slice::from_raw_parts(us.Buffer, us.Length as usize / 2) };
    Some(String::from_utf16_lossy(units))
}

fn object_type_name(handle: &OwnedHandle, buffer: &mut QueryBuffer) -> Option<String> {
    if !query_object(handle, ObjectTypeInformation, buffer) {
        return None;
    }
    let info: *const OBJECT_TYPE_INFORMATION = buffer.as_ptr();
    unicode_to_string(unsafe { &(*info).TypeName })
}

fn object_name(handle: &OwnedHandle, buffer: &mut QueryBuffer) -> Option<String> {
    if !query_object(handle, ObjectNameInformation, buffer) {
        return None;
    }
    let info: *const OBJECT_NAME_INFORMATION = buffer.as_ptr();
    unicode_to_string(unsafe { &(*info).Name })
}

fn final_path(handle: &OwnedHandle) -> Option<String> {
    let mut chars = vec![0u16; FINAL_PATH_CHARS];
    let mut len = unsafe { GetFinalPathNameByHandleW(handle.0, &mut chars, FILE_NAME_NORMALIZED) }
        as usize;
    if len >= chars.len() {
        // Returned length is the required size including the terminator
        chars.resize(len + 1, 0);
        len = unsafe { GetFinalPathNameByHandleW(handle.0, &mut chars, FILE_NAME_NORMALIZED) }
            as usize;
    }
    if len == 0 || len >= chars.len() {
        return None;
    }
    Some(String::from_utf16_lossy(&chars[..len]))
}

impl OpenFileProbe for HandleTableProbe {
    fn find_open_file(&self, pid: u32, include: &str, exclude: &str) -> Option<String> {
        if pid == 0 {
            return None;
        }

        let process = match unsafe {
            OpenProcess(PROCESS_DUP_HANDLE | PROCESS_QUERY_INFORMATION, FALSE, pid)
        } {
            Ok(h) => OwnedHandle(h),
            Err(e) => {
                debug!("OpenProcess({}) failed: {}", pid, e);
                return None;
            }
        };

        let table = query_handle_table()?;
        let entries = table_entries(&table);
        debug!("Scanning up to {} handles for PID {}", entries.len(), pid);

        let include = normalize_pattern(include);
        let exclude = normalize_pattern(exclude);
        let mut type_buffer = QueryBuffer::with_bytes(TYPE_INFO_BYTES);
        let mut name_buffer = QueryBuffer::with_bytes(NAME_INFO_BYTES);
        let mut scanned = 0usize;

        for entry in entries.iter().filter(|e| e.UniqueProcessId == pid as usize) {
            let Some(dup) = duplicate_into_self(&process, entry.HandleValue) else {
                continue;
            };

            match object_type_name(&dup, &mut type_buffer) {
                Some(name) if name.eq_ignore_ascii_case("File") => {}
                _ => continue,
            }
            if name_query_may_block(entry.GrantedAccess) {
                continue;
            }

            let Some(path) = final_path(&dup).or_else(|| object_name(&dup, &mut name_buffer))
            else {
                continue;
            };
            scanned += 1;

            let record = HandleAuditRecord {
                handle_value: entry.HandleValue as u64,
                object_type: "FILE",
                path: &path,
            };
            if observe_path(self.audit.as_deref(), pid, record, &include, &exclude) {
                debug!("MATCHED (FILE) PID={}: {}", pid, path);
                return Some(path);
            }
        }

        debug!("Scanned {} file handles for PID {}, no match", scanned, pid);
        None
    }
}
