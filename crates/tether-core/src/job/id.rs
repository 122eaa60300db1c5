//! Packed 64-bit job identifiers.
//!
//! ```text
//!  63        54 53  50 49                        20 19                 0
//! [ box id 10 ][pid 4][ start time 30 (s since 2005) ][ sequence 20     ]
//! ```
//!
//! `u64::MAX` is reserved as [`JobId::INVALID`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const SEQUENCE_BITS: u32 = 20;
const START_TIME_BITS: u32 = 30;
const PROCESS_BITS: u32 = 4;
const BOX_BITS: u32 = 10;

const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const START_TIME_MASK: u64 = (1 << START_TIME_BITS) - 1;
const PROCESS_MASK: u64 = (1 << PROCESS_BITS) - 1;
const BOX_MASK: u64 = (1 << BOX_BITS) - 1;

const START_TIME_SHIFT: u32 = SEQUENCE_BITS;
const PROCESS_SHIFT: u32 = START_TIME_SHIFT + START_TIME_BITS;
const BOX_SHIFT: u32 = PROCESS_SHIFT + PROCESS_BITS;

/// Opaque identifier correlating a request with its eventual reply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Sentinel meaning "no job in flight". Never generated.
    pub const INVALID: JobId = JobId(u64::MAX);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    fn pack(sequence: u64, start_time: u64, process_id: u64, box_id: u64) -> Self {
        Self(
            (sequence & SEQUENCE_MASK)
                | (start_time & START_TIME_MASK) << START_TIME_SHIFT
                | (process_id & PROCESS_MASK) << PROCESS_SHIFT
                | (box_id & BOX_MASK) << BOX_SHIFT,
        )
    }

    pub fn sequence(self) -> u32 {
        (self.0 & SEQUENCE_MASK) as u32
    }

    /// Start-time component in seconds since the 2005-01-01 base.
    pub fn start_time_secs(self) -> u32 {
        ((self.0 >> START_TIME_SHIFT) & START_TIME_MASK) as u32
    }

    pub fn start_time(self) -> DateTime<Utc> {
        base_time() + chrono::Duration::seconds(i64::from(self.start_time_secs()))
    }

    pub fn process_id(self) -> u8 {
        ((self.0 >> PROCESS_SHIFT) & PROCESS_MASK) as u8
    }

    pub fn box_id(self) -> u16 {
        ((self.0 >> BOX_SHIFT) & BOX_MASK) as u16
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

impl std::fmt::Debug for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_valid() {
            return write!(f, "JobId(INVALID)");
        }
        f.debug_struct("JobId")
            .field("sequence", &self.sequence())
            .field("start_time", &self.start_time_secs())
            .field("process", &self.process_id())
            .field("box", &self.box_id())
            .finish()
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Lock-free generator of process-unique job ids.
///
/// The sequence counter is a single atomic; when it overflows its 20 bits
/// the carry advances the start-time field, so ids stay unique for the
/// whole process lifetime without any coordination between callers.
#[derive(Debug)]
pub struct JobIdGenerator {
    counter: AtomicU64,
    start_time: u64,
    process_id: u64,
    box_id: u64,
}

impl JobIdGenerator {
    pub fn new(start_time_secs: u32, process_id: u8, box_id: u16) -> Self {
        Self {
            counter: AtomicU64::new(0),
            start_time: u64::from(start_time_secs) & START_TIME_MASK,
            process_id: u64::from(process_id) & PROCESS_MASK,
            box_id: u64::from(box_id) & BOX_MASK,
        }
    }

    /// Generator stamped with the current time and this process's id.
    pub fn for_process() -> Self {
        let elapsed = Utc::now()
            .signed_duration_since(base_time())
            .num_seconds()
            .clamp(0, START_TIME_MASK as i64);
        Self::new(elapsed as u32, (std::process::id() as u64 & PROCESS_MASK) as u8, 0)
    }

    /// Allocate the next id. Never returns [`JobId::INVALID`].
    pub fn next_id(&self) -> JobId {
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let sequence = n & SEQUENCE_MASK;
            let start_time = self.start_time + (n >> SEQUENCE_BITS);
            let id = JobId::pack(sequence, start_time, self.process_id, self.box_id);
            if id.is_valid() {
                return id;
            }
        }
    }
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::for_process()
    }
}
