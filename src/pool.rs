//! Concurrent pool of fixed-size scratch buffers backing per-block restore
//! points.
//!
//! Buffers are allocated lazily up to a capacity bound fixed at
//! construction; the bound is only reached under pessimal scheduling, so
//! most factorizations allocate a handful of buffers and recycle them.
//! `get_wait` blocks the calling task until a buffer is free. There is no
//! fairness guarantee between waiters.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

pub(crate) struct BlockPool {
    state: Mutex<PoolState>,
    available: Condvar,
    buf_len: usize,
}

struct PoolState {
    free: Vec<Box<[f64]>>,
    /// Buffers created so far, free or handed out.
    allocated: usize,
    cap: usize,
}

impl BlockPool {
    pub fn new(cap: usize, buf_len: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                free: Vec::new(),
                allocated: 0,
                cap,
            }),
            available: Condvar::new(),
            buf_len,
        })
    }

    /// Acquire a buffer, blocking until one is available. The buffer is
    /// returned to the pool when the guard is dropped.
    pub fn get_wait(self: &Arc<Self>) -> BlockBuf {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let buf = loop {
            if let Some(buf) = st.free.pop() {
                break buf;
            }
            if st.allocated < st.cap {
                st.allocated += 1;
                break vec![0.0; self.buf_len].into_boxed_slice();
            }
            st = self
                .available
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        };
        BlockBuf {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Box<[f64]>) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.free.push(buf);
        drop(st);
        self.available.notify_one();
    }
}

/// Scoped handle to a pool buffer; releases on drop.
pub(crate) struct BlockBuf {
    buf: Option<Box<[f64]>>,
    pool: Arc<BlockPool>,
}

impl Deref for BlockBuf {
    type Target = [f64];
    fn deref(&self) -> &[f64] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for BlockBuf {
    fn deref_mut(&mut self) -> &mut [f64] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for BlockBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
