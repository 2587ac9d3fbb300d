//! CPU access bracketing for device-shared frame buffers.
//!
//! Buffers mapped from a DMA-BUF must be bracketed with a sync-start and a
//! sync-end ioctl around every CPU access, otherwise caches may hold stale
//! data. [`SyncGuard`] issues the start when created and the end when it is
//! finished or dropped, so every exit path is covered.

use std::io;
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, BorrowedFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAccess {
    Read,
    Write,
    ReadWrite,
}

/// Synchronization handle attached to a frame buffer.
pub trait BufferSync: Sync {
    fn start(&self, access: SyncAccess) -> io::Result<()>;
    fn end(&self, access: SyncAccess) -> io::Result<()>;
}

/// Plain host memory, nothing to synchronize.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSync;

impl BufferSync for NoSync {
    fn start(&self, _access: SyncAccess) -> io::Result<()> {
        Ok(())
    }

    fn end(&self, _access: SyncAccess) -> io::Result<()> {
        Ok(())
    }
}

#[repr(C)]
pub struct DmaBufSyncArg {
    flags: u64,
}

const DMA_BUF_SYNC_READ: u64 = 1 << 0;
const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
const DMA_BUF_SYNC_RW: u64 = DMA_BUF_SYNC_READ | DMA_BUF_SYNC_WRITE;
const DMA_BUF_SYNC_START: u64 = 0 << 2;
const DMA_BUF_SYNC_END: u64 = 1 << 2;

nix::ioctl_write_ptr!(dma_buf_ioctl_sync, b'b', 0, DmaBufSyncArg);

/// `DMA_BUF_IOCTL_SYNC` on a borrowed dma-buf descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DmaBufSync<'fd> {
    fd: BorrowedFd<'fd>,
}

impl<'fd> DmaBufSync<'fd> {
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self { fd }
    }

    fn sync(&self, flags: u64) -> io::Result<()> {
        let arg = DmaBufSyncArg { flags };
        // SAFETY: `arg` outlives the call and matches `struct dma_buf_sync`.
        unsafe { dma_buf_ioctl_sync(self.fd.as_raw_fd(), &arg) }
            .map(|_| ())
            .map_err(io::Error::from)
    }
}

fn access_flags(access: SyncAccess) -> u64 {
    match access {
        SyncAccess::Read => DMA_BUF_SYNC_READ,
        SyncAccess::Write => DMA_BUF_SYNC_WRITE,
        SyncAccess::ReadWrite => DMA_BUF_SYNC_RW,
    }
}

impl BufferSync for DmaBufSync<'_> {
    fn start(&self, access: SyncAccess) -> io::Result<()> {
        self.sync(DMA_BUF_SYNC_START | access_flags(access))
    }

    fn end(&self, access: SyncAccess) -> io::Result<()> {
        self.sync(DMA_BUF_SYNC_END | access_flags(access))
    }
}

/// Scoped CPU access to a frame buffer.
///
/// The buffer contents are only reachable through the guard. A failed start
/// is advisory: the guard still hands out the data and still issues the end.
pub struct SyncGuard<'b> {
    data: &'b mut [u8],
    sync: &'b dyn BufferSync,
    access: SyncAccess,
    start_error: Option<io::Error>,
    ended: bool,
}

impl<'b> SyncGuard<'b> {
    pub(crate) fn begin(data: &'b mut [u8], sync: &'b dyn BufferSync, access: SyncAccess) -> Self {
        let start_error = sync.start(access).err();
        if let Some(err) = &start_error {
            log::warn!("buffer sync start failed: {err}");
        }
        Self {
            data,
            sync,
            access,
            start_error,
            ended: false,
        }
    }

    /// The error reported by the start request, if any.
    pub fn start_error(&self) -> Option<&io::Error> {
        self.start_error.as_ref()
    }

    /// Issues the end request now and reports its outcome.
    pub fn finish(mut self) -> io::Result<()> {
        self.ended = true;
        self.sync.end(self.access)
    }
}

impl Deref for SyncGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &*self.data
    }
}

impl DerefMut for SyncGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if !self.ended {
            if let Err(err) = self.sync.end(self.access) {
                log::warn!("buffer sync end failed: {err}");
            }
        }
    }
}
