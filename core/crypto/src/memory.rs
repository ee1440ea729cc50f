//! Secure memory primitives.
//!
//! Every secret buffer in this crate bottoms out here:
//! - `wipe` zeroes memory through volatile writes followed by a compiler
//!   fence, so the stores cannot be elided as dead
//! - `constant_time_compare` scans the full input regardless of where the
//!   first difference sits
//! - `SecureBuffer` owns a fixed allocation and wipes it before release
//! - `BufferPool` recycles buffers and wipes them on both release and acquire

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use sealcore_common::{Error, Result};

/// Largest allocation a `SecureBuffer` accepts (100 MiB).
pub const MAX_BUFFER_SIZE: usize = 100 * 1024 * 1024;

/// Overwrite every byte of `buffer` with zero.
///
/// Must be called on any secret buffer before it is freed or reused.
/// `SecureBuffer` does this automatically on drop.
pub fn wipe(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// Compare two byte strings without data-dependent early exit.
///
/// Lengths are treated as public: inputs of different length compare
/// unequal immediately. For equal lengths every byte pair is visited and
/// the differences are folded together before a single result is produced.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// XOR `src` into `dst` byte by byte.
///
/// # Errors
/// - Returns error if the slices differ in length
pub fn xor_in_place(dst: &mut [u8], src: &[u8]) -> Result<()> {
    if dst.len() != src.len() {
        return Err(Error::InvalidInput(format!(
            "XOR operands differ in length: {} vs {}",
            dst.len(),
            src.len()
        )));
    }

    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }

    Ok(())
}

/// Owned byte region that is wiped before its memory is released.
///
/// `allocated` is fixed at construction; `size` is the logical length
/// of the content and never exceeds it. Not `Clone`: ownership moves,
/// it is never aliased.
pub struct SecureBuffer {
    data: Vec<u8>,
    size: usize,
}

impl SecureBuffer {
    /// Allocate a zeroed buffer of `size` bytes with no content.
    ///
    /// # Errors
    /// - `InvalidInput` if `size` is zero
    /// - `Overflow` if `size` exceeds MAX_BUFFER_SIZE
    /// - `MemoryError` if the allocation fails
    pub fn alloc(size: usize) -> Result<Self> {
        Self::alloc_with_limit(size, MAX_BUFFER_SIZE)
    }

    /// Allocate with a caller-supplied cap instead of MAX_BUFFER_SIZE.
    pub fn alloc_with_limit(size: usize, limit: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidInput(
                "Buffer size must be non-zero".to_string(),
            ));
        }
        if size > limit {
            return Err(Error::Overflow { size, limit });
        }

        Ok(Self {
            data: zeroed(size)?,
            size: 0,
        })
    }

    /// Copy `bytes` into a new buffer sized exactly to fit them.
    ///
    /// An empty slice yields an empty buffer with no allocation.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self {
                data: Vec::new(),
                size: 0,
            });
        }

        let mut buffer = Self::alloc(bytes.len())?;
        buffer.extend_from_slice(bytes)?;
        Ok(buffer)
    }

    /// Logical length of the content.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check if the buffer holds no content.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Borrow the content.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Mutably borrow the content.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data[..self.size]
    }

    /// Append `bytes` after the current content.
    ///
    /// # Errors
    /// - `Overflow` if the result would exceed the allocated capacity
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let capacity = self.capacity();
        let end = self
            .size
            .checked_add(bytes.len())
            .filter(|end| *end <= capacity)
            .ok_or(Error::Overflow {
                size: self.size.saturating_add(bytes.len()),
                limit: capacity,
            })?;

        self.data[self.size..end].copy_from_slice(bytes);
        self.size = end;
        Ok(())
    }

    /// Shorten the content to `len`, wiping the bytes that are cut off.
    pub fn truncate(&mut self, len: usize) {
        if len < self.size {
            wipe(&mut self.data[len..self.size]);
            self.size = len;
        }
    }

    /// Zero the whole allocation and reset the content length.
    pub fn wipe(&mut self) {
        wipe(&mut self.data);
        self.size = 0;
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecureBuffer([REDACTED; {}/{} bytes])",
            self.size,
            self.data.len()
        )
    }
}

fn zeroed(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| Error::MemoryError(format!("Failed to reserve {} bytes: {}", size, e)))?;
    data.resize(size, 0);
    Ok(data)
}

/// Pool of equally sized secure buffers.
///
/// Released buffers are wiped before they are pooled and wiped again
/// before they are handed out, so no acquirer can observe a previous
/// owner's content.
pub struct BufferPool {
    buffer_size: usize,
    max_pooled: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers keeping at most `max_pooled` idle.
    ///
    /// # Errors
    /// - Same bounds as `SecureBuffer::alloc` for `buffer_size`
    pub fn new(buffer_size: usize, max_pooled: usize) -> Result<Self> {
        if buffer_size == 0 {
            return Err(Error::InvalidInput(
                "Buffer size must be non-zero".to_string(),
            ));
        }
        if buffer_size > MAX_BUFFER_SIZE {
            return Err(Error::Overflow {
                size: buffer_size,
                limit: MAX_BUFFER_SIZE,
            });
        }

        Ok(Self {
            buffer_size,
            max_pooled,
            free: Mutex::new(Vec::new()),
        })
    }

    /// Size of every buffer handed out by this pool.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers currently held.
    pub fn pooled(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Take a buffer from the pool, allocating if none is idle.
    pub fn acquire(&self) -> Result<SecureBuffer> {
        let recycled = self.lock()?.pop();

        match recycled {
            Some(mut data) => {
                wipe(&mut data);
                Ok(SecureBuffer { data, size: 0 })
            }
            None => SecureBuffer::alloc(self.buffer_size),
        }
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer is wiped first. Buffers of a foreign size, or beyond
    /// the idle limit, are dropped (and therefore wiped) instead.
    pub fn release(&self, mut buffer: SecureBuffer) -> Result<()> {
        buffer.wipe();
        if buffer.capacity() != self.buffer_size {
            return Ok(());
        }

        let mut free = self.lock()?;
        if free.len() < self.max_pooled {
            free.push(std::mem::take(&mut buffer.data));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Vec<u8>>>> {
        self.free
            .lock()
            .map_err(|_| Error::MemoryError("Buffer pool lock poisoned".to_string()))
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Ok(free) = self.free.get_mut() {
            for data in free.iter_mut() {
                data.zeroize();
            }
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("max_pooled", &self.max_pooled)
            .finish()
    }
}
