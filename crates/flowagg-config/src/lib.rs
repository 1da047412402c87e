//! Global tunables for the flow aggregation engine.
//!
//! Values are initialized from environment variables on first access and
//! can be overridden at runtime via setter functions. Per-aggregator
//! configuration structs take their defaults from here.
//!
//! - `FLOWAGG_TEMP_DIR`: parent directory for spill files. Default: the
//!   system temporary directory.
//! - `FLOWAGG_MEMORY_LIMIT`: byte budget for the in-memory bin table and
//!   distinct trackers before spilling. Default: 2 GiB.
//! - `FLOWAGG_HASH_INITIAL_CAPACITY`: initial bin table size estimate.
//!   Default: 500000 entries.
//! - `FLOWAGG_MAX_OPEN_FILES`: how many spill files a merge may hold open
//!   at once. Default: 1024; clamped to 4..=1024.
//! - `FLOWAGG_SPILL_COMPRESSION`: `none` or `lz4`. Default: `none`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Once, RwLock};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_MEMORY_LIMIT: usize = 2 * 1024 * 1024 * 1024; // 2 GiB
const DEFAULT_HASH_INITIAL_CAPACITY: usize = 500_000;

/// Upper bound on simultaneously open spill files.
pub const MAX_MERGE_FILES: usize = 1024;
/// Lower bound; a merge needs at least two pairs open.
pub const MIN_MERGE_FILES: usize = 4;

// ---------------------------------------------------------------------------
// Atomic globals
// ---------------------------------------------------------------------------

static MEMORY_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_MEMORY_LIMIT);
static HASH_INITIAL_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_HASH_INITIAL_CAPACITY);
static MAX_OPEN_FILES: AtomicUsize = AtomicUsize::new(MAX_MERGE_FILES);
static SPILL_COMPRESSION: AtomicBool = AtomicBool::new(false);
static TEMP_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        if let Ok(val) = std::env::var("FLOWAGG_MEMORY_LIMIT") {
            if let Some(n) = parse_byte_size(&val) {
                MEMORY_LIMIT.store(n, Ordering::Relaxed);
            }
        }
        if let Ok(val) = std::env::var("FLOWAGG_HASH_INITIAL_CAPACITY") {
            if let Ok(n) = val.trim().parse::<usize>() {
                HASH_INITIAL_CAPACITY.store(n.max(1), Ordering::Relaxed);
            }
        }
        if let Ok(val) = std::env::var("FLOWAGG_MAX_OPEN_FILES") {
            if let Ok(n) = val.trim().parse::<usize>() {
                MAX_OPEN_FILES.store(clamp_open_files(n), Ordering::Relaxed);
            }
        }
        if let Ok(val) = std::env::var("FLOWAGG_SPILL_COMPRESSION") {
            if let Some(on) = parse_compression(&val) {
                SPILL_COMPRESSION.store(on, Ordering::Relaxed);
            }
        }
        if let Ok(val) = std::env::var("FLOWAGG_TEMP_DIR") {
            if !val.is_empty() {
                if let Ok(mut dir) = TEMP_DIR.write() {
                    *dir = Some(PathBuf::from(val));
                }
            }
        }
    });
}

/// Parse a byte size such as `512`, `64K`, `10MB` or `2g`.
fn parse_byte_size(s: &str) -> Option<usize> {
    let upper = s.trim().to_ascii_uppercase();
    let digits = upper.trim_end_matches('B');
    let (num, shift) = match digits.chars().last()? {
        'K' => (&digits[..digits.len() - 1], 10),
        'M' => (&digits[..digits.len() - 1], 20),
        'G' => (&digits[..digits.len() - 1], 30),
        _ => (digits, 0),
    };
    num.trim().parse::<usize>().ok()?.checked_mul(1usize << shift)
}

fn parse_compression(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "none" | "off" | "0" => Some(false),
        "lz4" | "on" | "1" => Some(true),
        _ => None,
    }
}

fn clamp_open_files(n: usize) -> usize {
    n.clamp(MIN_MERGE_FILES, MAX_MERGE_FILES)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn get_memory_limit() -> usize {
    ensure_init();
    MEMORY_LIMIT.load(Ordering::Relaxed)
}

pub fn set_memory_limit(bytes: usize) {
    ensure_init();
    MEMORY_LIMIT.store(bytes, Ordering::Relaxed);
}

pub fn get_hash_initial_capacity() -> usize {
    ensure_init();
    HASH_INITIAL_CAPACITY.load(Ordering::Relaxed)
}

pub fn set_hash_initial_capacity(entries: usize) {
    ensure_init();
    HASH_INITIAL_CAPACITY.store(entries.max(1), Ordering::Relaxed);
}

pub fn get_max_open_files() -> usize {
    ensure_init();
    MAX_OPEN_FILES.load(Ordering::Relaxed)
}

/// Set the open spill file limit; clamped to 4..=1024.
pub fn set_max_open_files(n: usize) {
    ensure_init();
    MAX_OPEN_FILES.store(clamp_open_files(n), Ordering::Relaxed);
}

pub fn get_spill_compression() -> bool {
    ensure_init();
    SPILL_COMPRESSION.load(Ordering::Relaxed)
}

pub fn set_spill_compression(lz4: bool) {
    ensure_init();
    SPILL_COMPRESSION.store(lz4, Ordering::Relaxed);
}

/// Parent directory for spill files; `None` means the system default.
pub fn get_temp_dir() -> Option<PathBuf> {
    ensure_init();
    TEMP_DIR.read().ok().and_then(|dir| dir.clone())
}

pub fn set_temp_dir(dir: Option<PathBuf>) {
    ensure_init();
    if let Ok(mut slot) = TEMP_DIR.write() {
        *slot = dir;
    }
}
