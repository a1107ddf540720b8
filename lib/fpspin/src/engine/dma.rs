// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Descriptor-based transfers and their completion tracking.
//!
//! Transfers are fire-and-forget: a descriptor is handed to a
//! transport and, some time later, a [`DescStatus`] carrying the same
//! tag comes back. Statuses may arrive in any order. The
//! [`DmaTracker`] remembers what each outstanding tag was for and
//! hands that back when its status shows up, or when it has waited
//! too long.
//!
//! The tracker never retries. A failed or expired transfer is
//! reported once and forgotten.

use crate::api::DescStatus;
use crate::api::DmaDesc;
use crate::api::DmaOp;
use crate::api::Error;
use crate::ddi::sync::KMutex;
use crate::ddi::time::Moment;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// Moves bytes into the device's local RAM.
pub trait LocalTransfer: Send + Sync {
    /// Start landing `data` at `desc.ram_addr` of `desc.ram_sel`. A
    /// status tagged `desc.tag` follows.
    fn start_local_write(
        &self,
        desc: &DmaDesc,
        data: &[u8],
    ) -> Result<(), Error>;

    /// Store `data` directly, without a descriptor.
    fn write_local(&self, ram_sel: u8, addr: u64, data: &[u8]);

    /// Load `len` bytes directly, without a descriptor.
    fn read_local(&self, ram_sel: u8, addr: u64, len: usize) -> Vec<u8>;
}

/// Moves bytes between local RAM and host memory.
pub trait HostTransfer: Send + Sync {
    /// Start copying `desc.len` bytes from host `desc.addr` into local
    /// RAM.
    fn start_host_read(&self, desc: &DmaDesc) -> Result<(), Error>;

    /// Start copying `desc.len` bytes of local RAM out to host
    /// `desc.addr`.
    fn start_host_write(&self, desc: &DmaDesc) -> Result<(), Error>;
}

/// An outstanding transfer.
#[derive(Clone, Debug)]
pub struct Pending<C> {
    pub op: DmaOp,
    pub desc: DmaDesc,
    pub issued: Moment,
    pub cookie: C,
}

/// A transfer that is no longer outstanding, and how it ended.
#[derive(Clone, Debug)]
pub struct Completion<C> {
    pub op: DmaOp,
    pub desc: DmaDesc,
    pub cookie: C,
    /// `TransferFailed` or `Timeout` on failure.
    pub result: Result<(), Error>,
}

impl<C> Completion<C> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outstanding transfers keyed by tag. `C` is whatever the submitter
/// wants back when the transfer ends.
pub struct DmaTracker<C> {
    timeout_ms: u64,
    pending: KMutex<BTreeMap<u64, Pending<C>>>,
}

impl<C> DmaTracker<C> {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms, pending: KMutex::new(BTreeMap::new()) }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn submit(
        &self,
        op: DmaOp,
        desc: DmaDesc,
        cookie: C,
        now: Moment,
    ) -> Result<(), Error> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&desc.tag) {
            return Err(Error::TagInUse(desc.tag));
        }

        pending.insert(desc.tag, Pending { op, desc, issued: now, cookie });
        Ok(())
    }

    pub fn submit_read(
        &self,
        desc: DmaDesc,
        cookie: C,
        now: Moment,
    ) -> Result<(), Error> {
        self.submit(DmaOp::Read, desc, cookie, now)
    }

    pub fn submit_write(
        &self,
        desc: DmaDesc,
        cookie: C,
        now: Moment,
    ) -> Result<(), Error> {
        self.submit(DmaOp::Write, desc, cookie, now)
    }

    /// Forget a submission without a status, e.g. when the transport
    /// refused it.
    pub fn cancel(&self, tag: u64) -> Option<Pending<C>> {
        self.pending.lock().remove(&tag)
    }

    /// Match a status to its transfer.
    pub fn complete(
        &self,
        status: DescStatus,
    ) -> Result<Completion<C>, Error> {
        let p = self
            .pending
            .lock()
            .remove(&status.tag)
            .ok_or(Error::UnknownTag(status.tag))?;

        let result = if status.is_ok() {
            Ok(())
        } else {
            let DescStatus { tag, error } = status;
            Err(Error::TransferFailed { tag, error })
        };

        Ok(Completion { op: p.op, desc: p.desc, cookie: p.cookie, result })
    }

    /// Remove and report every transfer outstanding for longer than
    /// the timeout.
    pub fn expire(&self, now: Moment) -> Vec<Completion<C>> {
        let mut pending = self.pending.lock();
        let expired: Vec<u64> = pending
            .iter()
            .filter(|(_, p)| now.delta_as_millis(p.issued) > self.timeout_ms)
            .map(|(&tag, _)| tag)
            .collect();

        expired
            .into_iter()
            .filter_map(|tag| pending.remove(&tag))
            .map(|p| {
                let tag = p.desc.tag;
                let elapsed_ms = now.delta_as_millis(p.issued);
                Completion {
                    op: p.op,
                    desc: p.desc,
                    cookie: p.cookie,
                    result: Err(Error::Timeout { tag, elapsed_ms }),
                }
            })
            .collect()
    }

    pub fn is_pending(&self, tag: u64) -> bool {
        self.pending.lock().contains_key(&tag)
    }

    pub fn pending_tags(&self) -> Vec<u64> {
        self.pending.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::time::Duration;

    fn desc(tag: u64) -> DmaDesc {
        DmaDesc { addr: 0x1000 * tag, ram_sel: 0, ram_addr: 0, len: 64, tag }
    }

    #[test]
    fn out_of_order_completion() {
        let t = DmaTracker::new(10);
        let now = Moment::now();
        t.submit_read(desc(1), "first", now).unwrap();
        t.submit_read(desc(2), "second", now).unwrap();
        assert_eq!(t.pending_tags(), vec![1, 2]);

        let c = t.complete(DescStatus::ok(2)).unwrap();
        assert_eq!(c.cookie, "second");
        assert_eq!(c.op, DmaOp::Read);
        assert!(c.is_ok());

        let c = t.complete(DescStatus::ok(1)).unwrap();
        assert_eq!(c.cookie, "first");
        assert_eq!(c.desc, desc(1));
        assert!(t.is_empty());
    }

    #[test]
    fn unknown_and_duplicate_tags() {
        let t = DmaTracker::new(10);
        let now = Moment::now();
        assert!(matches!(
            t.complete(DescStatus::ok(9)),
            Err(Error::UnknownTag(9))
        ));

        t.submit_write(desc(3), (), now).unwrap();
        assert_eq!(t.submit_read(desc(3), (), now), Err(Error::TagInUse(3)));
        t.complete(DescStatus::ok(3)).unwrap();
        // A tag can be reused once its transfer is done.
        t.submit_read(desc(3), (), now).unwrap();
    }

    #[test]
    fn error_status_is_a_failure() {
        let t = DmaTracker::new(10);
        t.submit_write(desc(5), 55u32, Moment::now()).unwrap();
        let c = t.complete(DescStatus { tag: 5, error: 2 }).unwrap();
        assert_eq!(c.cookie, 55);
        assert_eq!(c.result, Err(Error::TransferFailed { tag: 5, error: 2 }));
        assert!(!t.is_pending(5));
    }

    #[test]
    fn expire_after_timeout() {
        let t = DmaTracker::new(10);
        let t0 = Moment::now();
        t.submit_read(desc(1), 1, t0).unwrap();
        t.submit_read(desc(2), 2, t0 + Duration::from_millis(5)).unwrap();

        assert!(t.expire(t0 + Duration::from_millis(10)).is_empty());

        let gone = t.expire(t0 + Duration::from_millis(12));
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].cookie, 1);
        assert_eq!(
            gone[0].result,
            Err(Error::Timeout { tag: 1, elapsed_ms: 12 })
        );
        assert_eq!(t.pending_tags(), vec![2]);

        // A late status for an expired transfer is unknown.
        assert!(t.complete(DescStatus::ok(1)).is_err());
    }
}
