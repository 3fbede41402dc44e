//! Simulated block device
//!
//! The device owns a sparse sector map and forwards every read and write to
//! its scheduler as a [`Request`]. Writes land in the sector map at
//! submission time, before the scheduler sees them: a write's completion
//! callback means the scheduler has processed the request, not that the data
//! just became visible. It already was.

pub mod config;
mod sectors;

pub use config::{DeviceConfig, DEFAULT_TOTAL_SECTORS};

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, info};

use self::sectors::SectorMap;
use crate::io::{
    Completion, CompletionCallback, IoError, IoResult, Request, RequestId, Scheduler,
};

/// A block device backed by an in-memory sector map
pub struct BlockDevice {
    id: u32,
    total_sectors: u64,
    /// Attached at most once
    scheduler: OnceLock<Arc<Scheduler>>,
    /// Sector payloads, including writes the scheduler has yet to accept.
    ///
    /// Only `write` mutates it; observers on other threads read it.
    sectors: RwLock<SectorMap>,
}

impl BlockDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            id: config.id,
            total_sectors: config.total_sectors,
            scheduler: OnceLock::new(),
            sectors: RwLock::new(SectorMap::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    /// Attach the scheduler that services this device's requests
    pub fn set_scheduler(&self, scheduler: Arc<Scheduler>) -> IoResult<()> {
        let name = scheduler.name().to_string();
        self.scheduler
            .set(scheduler)
            .map_err(|_| IoError::SchedulerAlreadyAttached { device: self.id })?;
        info!(device = self.id, scheduler = %name, "Scheduler attached");
        Ok(())
    }

    pub fn scheduler(&self) -> Option<&Arc<Scheduler>> {
        self.scheduler.get()
    }

    /// Submit a read of `extent` sectors starting at `sector`
    pub fn read(
        &self,
        sector: u64,
        extent: usize,
        on_complete: Option<CompletionCallback>,
    ) -> IoResult<RequestId> {
        self.check_sector(sector)?;
        let scheduler = self.attached()?;

        let request = Request::new(self.id, sector, extent).with_callback(on_complete);
        let id = request.id();
        scheduler.schedule(request)?;
        debug!(device = self.id, request = %id, sector, extent, "Read submitted");
        Ok(id)
    }

    /// Submit a write of `data` at `sector`.
    ///
    /// The request's extent is the payload length. The payload is staged
    /// before the request is queued, so `read_sector` returns it immediately
    /// and the completion callback always observes it. If the scheduler
    /// refuses the request only this write is withdrawn; a write submitted
    /// after it stays visible whichever of the two settles first.
    pub fn write(
        &self,
        sector: u64,
        data: impl Into<Vec<u8>>,
        on_complete: Option<CompletionCallback>,
    ) -> IoResult<RequestId> {
        self.check_sector(sector)?;
        let scheduler = self.attached()?;

        let data = data.into();
        let request = Request::new(self.id, sector, data.len()).with_callback(on_complete);
        let id = request.id();
        let extent = data.len();

        let seq = self.sectors.write().stage(sector, data);
        if let Err(e) = scheduler.schedule(request) {
            self.sectors.write().refuse(sector, seq);
            return Err(e);
        }
        self.sectors.write().accept(sector, seq);

        debug!(device = self.id, request = %id, sector, extent, "Write submitted");
        Ok(id)
    }

    /// Submit a read and get a handle that resolves when it completes.
    ///
    /// The handle never resolves for a seek-sized extent under
    /// `SeekPolicy::Requeue`.
    pub fn read_handle(
        &self,
        sector: u64,
        extent: usize,
    ) -> IoResult<oneshot::Receiver<Completion>> {
        let (tx, rx) = oneshot::channel();
        self.read(sector, extent, Some(completion_sender(tx)))?;
        Ok(rx)
    }

    /// Submit a write and get a handle that resolves when it completes
    pub fn write_handle(
        &self,
        sector: u64,
        data: impl Into<Vec<u8>>,
    ) -> IoResult<oneshot::Receiver<Completion>> {
        let (tx, rx) = oneshot::channel();
        self.write(sector, data, Some(completion_sender(tx)))?;
        Ok(rx)
    }

    /// Current contents of a sector, bypassing the scheduler
    pub fn read_sector(&self, sector: u64) -> Option<Vec<u8>> {
        self.sectors.read().get(sector).map(<[u8]>::to_vec)
    }

    /// Validate a sector index
    pub fn seek_sector(&self, sector: i64) -> IoResult<u64> {
        match u64::try_from(sector) {
            Ok(s) if s < self.total_sectors => Ok(s),
            _ => Err(IoError::InvalidSector {
                sector,
                total: self.total_sectors,
            }),
        }
    }

    /// Number of sectors that hold data
    pub fn written_sectors(&self) -> usize {
        self.sectors.read().len()
    }

    fn check_sector(&self, sector: u64) -> IoResult<()> {
        if sector < self.total_sectors {
            return Ok(());
        }
        Err(IoError::InvalidSector {
            sector: i64::try_from(sector).unwrap_or(i64::MAX),
            total: self.total_sectors,
        })
    }

    fn attached(&self) -> IoResult<&Arc<Scheduler>> {
        self.scheduler
            .get()
            .ok_or(IoError::NoSchedulerAttached { device: self.id })
    }
}

fn completion_sender(tx: oneshot::Sender<Completion>) -> CompletionCallback {
    Box::new(move |request: &Request| {
        // The caller may have dropped the handle
        let _ = tx.send(Completion::from_request(request));
    })
}
