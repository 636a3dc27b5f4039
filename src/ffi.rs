//! C ABI over [`VectorIndexHandle`].
//!
//! Every function returns `0` on success or an [`ErrorCode`] value. Handles are
//! opaque pointers created by [`ann_create_index`] and released by
//! [`ann_delete_index`]. Arrays returned to the caller are allocated here and must
//! be released with the matching `ann_free_*` function.
//!
//! No panic crosses the boundary: a panic inside any call is reported as
//! `UNKNOWN_ERROR`.

use std::ffi::{c_char, c_void, CStr};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use tracing::{debug, error};

use crate::engine::IndexType;
use crate::error::{to_code, AdapterError, ErrorCode, Result};
use crate::index::VectorIndexHandle;
use crate::logging;
use crate::persistence;
use crate::search::MemoryPayloadStore;
use crate::stream::{IoReader, IoWriter};

/// Foreign sink: write `len` bytes from `buf`, return the number of bytes written.
pub type WriteCallback = unsafe extern "C" fn(ctx: *mut c_void, buf: *const u8, len: usize) -> usize;

/// Foreign source: read up to `len` bytes into `buf`, return the number of bytes
/// read. `0` means end of stream.
pub type ReadCallback = unsafe extern "C" fn(ctx: *mut c_void, buf: *mut u8, len: usize) -> usize;

fn guard(op: &'static str, f: impl FnOnce() -> Result<()>) -> i32 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => {
            if let Err(e) = &result {
                debug!(op, "call failed: {e}");
            }
            to_code(&result)
        }
        Err(_) => {
            error!(op, "panic caught at the C boundary");
            ErrorCode::UnknownError.as_i32()
        }
    }
}

fn null_arg(what: &str) -> AdapterError {
    AdapterError::InvalidArgument(format!("{what} is null"))
}

unsafe fn handle_mut<'a>(handle: *mut VectorIndexHandle) -> Result<&'a mut VectorIndexHandle> {
    handle.as_mut().ok_or_else(|| null_arg("handle"))
}

unsafe fn c_str<'a>(p: *const c_char, what: &str) -> Result<&'a str> {
    if p.is_null() {
        return Err(null_arg(what));
    }
    CStr::from_ptr(p)
        .to_str()
        .map_err(|_| AdapterError::InvalidArgument(format!("{what} is not valid UTF-8")))
}

unsafe fn slice_arg<'a, T>(p: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if p.is_null() {
        return Err(null_arg(what));
    }
    Ok(std::slice::from_raw_parts(p, len))
}

fn non_negative<T: TryInto<usize> + Copy + std::fmt::Display>(value: T, what: &str) -> Result<usize> {
    value
        .try_into()
        .map_err(|_| AdapterError::InvalidArgument(format!("{what} must not be negative, got {value}")))
}

unsafe fn write_out<T>(out: *mut T, value: T, what: &str) -> Result<()> {
    if out.is_null() {
        return Err(null_arg(what));
    }
    out.write(value);
    Ok(())
}

fn into_raw<T>(values: Vec<T>) -> *mut T {
    Box::into_raw(values.into_boxed_slice()) as *mut T
}

unsafe fn free_raw<T>(p: *mut T, len: usize) {
    if !p.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(p, len)));
    }
}

/// Create an index. On failure `*out_handle` is set to null.
///
/// # Safety
/// `dtype` and `metric` must be null or NUL-terminated strings; `out_handle` must be
/// null or writable.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ann_create_index(
    index_type: i32,
    dtype: *const c_char,
    metric: *const c_char,
    dim: i32,
    max_degree: i32,
    ef_construction: i32,
    ef_search: i32,
    out_handle: *mut *mut VectorIndexHandle,
) -> i32 {
    guard("create_index", || {
        if out_handle.is_null() {
            return Err(null_arg("out_handle"));
        }
        out_handle.write(ptr::null_mut());
        let dtype = c_str(dtype, "dtype")?;
        let metric = c_str(metric, "metric")?;
        let handle = VectorIndexHandle::create(
            index_type,
            dtype,
            metric,
            non_negative(dim, "dim")?,
            non_negative(max_degree, "max_degree")?,
            non_negative(ef_construction, "ef_construction")?,
            non_negative(ef_search, "ef_search")?,
        )?;
        out_handle.write(Box::into_raw(Box::new(handle)));
        Ok(())
    })
}

unsafe fn check_add_args<'a>(
    handle: &VectorIndexHandle,
    vectors: *const f32,
    ids: *const i64,
    dim: i32,
    count: i64,
) -> Result<(&'a [f32], &'a [i64])> {
    let dim = non_negative(dim, "dim")?;
    if dim != handle.dimension() {
        return Err(AdapterError::DimensionMismatch {
            expected: handle.dimension(),
            actual: dim,
        });
    }
    let count = non_negative(count, "count")?;
    let floats = count
        .checked_mul(dim)
        .ok_or_else(|| AdapterError::InvalidArgument("count * dim overflows".to_string()))?;
    Ok((
        slice_arg(vectors, floats, "vectors")?,
        slice_arg(ids, count, "ids")?,
    ))
}

/// Add `count` vectors of `dim` floats each.
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `vectors` must hold `count * dim`
/// floats and `ids` must hold `count` ids.
#[no_mangle]
pub unsafe extern "C" fn ann_add_index(
    handle: *mut VectorIndexHandle,
    vectors: *const f32,
    ids: *const i64,
    dim: i32,
    count: i64,
) -> i32 {
    guard("add_index", || {
        let handle = handle_mut(handle)?;
        let (vectors, ids) = check_add_args(handle, vectors, ids, dim, count)?;
        handle.add(vectors, ids)
    })
}

/// Bulk build the index from `count` vectors plus anything already buffered.
/// Later adds go straight to the built index.
///
/// # Safety
/// As [`ann_add_index`].
#[no_mangle]
pub unsafe extern "C" fn ann_build_index(
    handle: *mut VectorIndexHandle,
    vectors: *const f32,
    ids: *const i64,
    dim: i32,
    count: i64,
) -> i32 {
    guard("build_index", || {
        let handle = handle_mut(handle)?;
        let (vectors, ids) = check_add_args(handle, vectors, ids, dim, count)?;
        handle.build(vectors, ids)
    })
}

/// Add vectors with one `row_length`-byte payload row each.
///
/// # Safety
/// As [`ann_add_index`]; `payload` must hold `count * row_length` bytes.
#[no_mangle]
pub unsafe extern "C" fn ann_add_index_with_payload(
    handle: *mut VectorIndexHandle,
    vectors: *const f32,
    ids: *const i64,
    dim: i32,
    count: i64,
    payload: *const u8,
    row_length: u32,
) -> i32 {
    guard("add_index_with_payload", || {
        let handle = handle_mut(handle)?;
        let (vectors, ids) = check_add_args(handle, vectors, ids, dim, count)?;
        let row_length = row_length as usize;
        let payload = slice_arg(payload, ids.len().saturating_mul(row_length), "payload")?;
        handle.add_with_payload(vectors, ids, payload, row_length)
    })
}

/// Keep payload rows in process memory so payload searches can return them.
///
/// # Safety
/// `handle` must come from [`ann_create_index`].
#[no_mangle]
pub unsafe extern "C" fn ann_attach_memory_payload_store(handle: *mut VectorIndexHandle) -> i32 {
    guard("attach_memory_payload_store", || {
        handle_mut(handle)?.set_payload_store(Box::new(MemoryPayloadStore::new()));
        Ok(())
    })
}

/// Report the number of vectors in the index, buffered or built.
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `out_count` must be writable.
#[no_mangle]
pub unsafe extern "C" fn ann_get_index_number(
    handle: *mut VectorIndexHandle,
    out_count: *mut i64,
) -> i32 {
    guard("get_index_number", || {
        let handle = handle_mut(handle)?;
        let count = handle.get_index_number()?;
        write_out(out_count, count as i64, "out_count")
    })
}

unsafe fn check_query<'a>(
    handle: &VectorIndexHandle,
    query: *const f32,
    dim: i32,
    topk: i32,
) -> Result<(&'a [f32], usize)> {
    let dim = non_negative(dim, "dim")?;
    if dim != handle.dimension() {
        return Err(AdapterError::DimensionMismatch {
            expected: handle.dimension(),
            actual: dim,
        });
    }
    let topk = non_negative(topk, "topk")?;
    Ok((slice_arg(query, dim, "query")?, topk))
}

/// Search for the `topk` nearest neighbors of `query`.
///
/// On success `*out_distances` and `*out_ids` point to `*out_size` entries each,
/// `*out_size <= topk`. Release them with [`ann_free_search_result`].
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `query` must hold `dim` floats;
/// the out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn ann_knn_search(
    handle: *mut VectorIndexHandle,
    query: *const f32,
    dim: i32,
    topk: i32,
    out_distances: *mut *mut f32,
    out_ids: *mut *mut i64,
    out_size: *mut i64,
) -> i32 {
    guard("knn_search", || {
        if out_distances.is_null() || out_ids.is_null() || out_size.is_null() {
            return Err(null_arg("search output"));
        }
        let handle = handle_mut(handle)?;
        let (query, topk) = check_query(handle, query, dim, topk)?;
        let result = handle.search(query, topk)?;

        out_size.write(result.len() as i64);
        out_distances.write(into_raw(result.distances));
        out_ids.write(into_raw(result.ids));
        Ok(())
    })
}

/// Search and also return one payload row per result as a single
/// `*out_size * *out_row_length` byte buffer. Rows without a payload are zeroed.
/// Release the rows with [`ann_free_buffer`].
///
/// # Safety
/// As [`ann_knn_search`]; `out_rows` and `out_row_length` must be writable.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ann_knn_search_with_payload(
    handle: *mut VectorIndexHandle,
    query: *const f32,
    dim: i32,
    topk: i32,
    out_distances: *mut *mut f32,
    out_ids: *mut *mut i64,
    out_size: *mut i64,
    out_rows: *mut *mut u8,
    out_row_length: *mut u32,
) -> i32 {
    guard("knn_search_with_payload", || {
        if out_distances.is_null()
            || out_ids.is_null()
            || out_size.is_null()
            || out_rows.is_null()
            || out_row_length.is_null()
        {
            return Err(null_arg("search output"));
        }
        let handle = handle_mut(handle)?;
        let (query, topk) = check_query(handle, query, dim, topk)?;
        let found = handle.search_with_payload(query, topk)?;

        let row_length = found.row_length as usize;
        let mut rows = vec![0u8; found.rows.len() * row_length];
        for (slot, row) in rows.chunks_exact_mut(row_length.max(1)).zip(&found.rows) {
            if let Some(row) = row {
                slot.copy_from_slice(&row[..slot.len()]);
            }
        }

        out_size.write(found.result.len() as i64);
        out_distances.write(into_raw(found.result.distances));
        out_ids.write(into_raw(found.result.ids));
        out_rows.write(into_raw(rows));
        out_row_length.write(found.row_length);
        Ok(())
    })
}

/// Release arrays returned by a search.
///
/// # Safety
/// The pointers must come from the same successful search call, with `size` as
/// reported by it. Each may be null.
#[no_mangle]
pub unsafe extern "C" fn ann_free_search_result(distances: *mut f32, ids: *mut i64, size: i64) {
    let size = size.max(0) as usize;
    free_raw(distances, size);
    free_raw(ids, size);
}

/// Write the index image to `<dir>/hnsw.data`.
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `dir` must be a NUL-terminated path.
#[no_mangle]
pub unsafe extern "C" fn ann_serialize(handle: *mut VectorIndexHandle, dir: *const c_char) -> i32 {
    guard("serialize", || {
        let handle = handle_mut(handle)?;
        let dir = c_str(dir, "dir")?;
        persistence::serialize_to_dir(handle, dir)?;
        Ok(())
    })
}

/// Replace the index with the image stored in `<dir>/hnsw.data`.
///
/// # Safety
/// As [`ann_serialize`].
#[no_mangle]
pub unsafe extern "C" fn ann_deserialize_bin(
    handle: *mut VectorIndexHandle,
    dir: *const c_char,
) -> i32 {
    guard("deserialize_bin", || {
        let handle = handle_mut(handle)?;
        let dir = c_str(dir, "dir")?;
        persistence::deserialize_from_dir(handle, dir)
    })
}

/// Serialize into a buffer allocated here. Release it with [`ann_free_buffer`].
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; the out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn ann_fserialize(
    handle: *mut VectorIndexHandle,
    out_buffer: *mut *mut u8,
    out_len: *mut usize,
) -> i32 {
    guard("fserialize", || {
        if out_buffer.is_null() || out_len.is_null() {
            return Err(null_arg("serialize output"));
        }
        let handle = handle_mut(handle)?;
        let bytes = handle.serialize_to_vec()?;
        out_len.write(bytes.len());
        out_buffer.write(into_raw(bytes));
        Ok(())
    })
}

/// Replace the index with an image held in a caller-owned buffer.
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `buffer` must hold `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ann_fdeserialize(
    handle: *mut VectorIndexHandle,
    buffer: *const u8,
    len: usize,
) -> i32 {
    guard("fdeserialize", || {
        let handle = handle_mut(handle)?;
        let bytes = slice_arg(buffer, len, "buffer")?;
        handle.deserialize_from(bytes)
    })
}

/// Release a buffer returned by [`ann_fserialize`] or a payload search.
///
/// # Safety
/// `buffer` must be null or come from this library with the reported `len`.
#[no_mangle]
pub unsafe extern "C" fn ann_free_buffer(buffer: *mut u8, len: usize) {
    free_raw(buffer, len);
}

struct CallbackWriter {
    write: WriteCallback,
    ctx: *mut c_void,
}

impl IoWriter for CallbackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(unsafe { (self.write)(self.ctx, buf.as_ptr(), buf.len()) })
    }
}

struct CallbackReader {
    read: ReadCallback,
    ctx: *mut c_void,
}

impl IoReader for CallbackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let rest = &mut buf[filled..];
            let n = unsafe { (self.read)(self.ctx, rest.as_mut_ptr(), rest.len()) };
            if n == 0 {
                break;
            }
            filled += n.min(rest.len());
        }
        Ok(filled)
    }
}

/// Serialize through a foreign write callback.
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `write` must honor the
/// [`WriteCallback`] contract for `ctx`.
#[no_mangle]
pub unsafe extern "C" fn ann_serialize_stream(
    handle: *mut VectorIndexHandle,
    write: Option<WriteCallback>,
    ctx: *mut c_void,
) -> i32 {
    guard("serialize_stream", || {
        let handle = handle_mut(handle)?;
        let write = write.ok_or_else(|| null_arg("write callback"))?;
        handle.serialize(&mut CallbackWriter { write, ctx })
    })
}

/// Replace the index with an image pulled through a foreign read callback.
///
/// # Safety
/// `handle` must come from [`ann_create_index`]; `read` must honor the
/// [`ReadCallback`] contract for `ctx`.
#[no_mangle]
pub unsafe extern "C" fn ann_deserialize_stream(
    handle: *mut VectorIndexHandle,
    read: Option<ReadCallback>,
    ctx: *mut c_void,
) -> i32 {
    guard("deserialize_stream", || {
        let handle = handle_mut(handle)?;
        let read = read.ok_or_else(|| null_arg("read callback"))?;
        handle.deserialize(&mut CallbackReader { read, ctx })
    })
}

/// Release a handle. A null handle is a no-op.
///
/// # Safety
/// `handle` must be null or come from [`ann_create_index`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn ann_delete_index(handle: *mut VectorIndexHandle) -> i32 {
    guard("delete_index", || {
        if !handle.is_null() {
            drop(Box::from_raw(handle));
        }
        Ok(())
    })
}

/// Set the library log level (0 trace ... 6 off).
#[no_mangle]
pub extern "C" fn ann_set_log_level(level: i32) -> i32 {
    guard("set_log_level", || logging::set_log_level(level))
}

/// Whether `index_type` names a supported index.
#[no_mangle]
pub extern "C" fn ann_is_supported_index(index_type: i32) -> bool {
    IndexType::is_supported(index_type)
}
