use chrono::{DateTime, Utc};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

static SEQUENCE: OnceLock<AtomicU32> = OnceLock::new();

/// Builds a unique staging/destination key for an uploaded file:
/// `<YYYYmmdd_HHMMSS>_<8 hex>_<base>.<ext>`.
///
/// The caller must pass a sanitized filename; no path checks happen here.
pub fn make_key(original_filename: &str) -> String {
    make_key_at(original_filename, Utc::now(), next_suffix())
}

/// Random-looking 32-bit suffix. A randomly seeded counter is passed through a
/// bijective mixer, so suffixes never repeat within one process for 2^32 calls
/// while separate processes still start from unrelated points.
fn next_suffix() -> u32 {
    let counter = SEQUENCE
        .get_or_init(|| AtomicU32::new(rand::random()))
        .fetch_add(1, Ordering::Relaxed);
    mix(counter)
}

fn mix(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

pub(crate) fn make_key_at(original_filename: &str, now: DateTime<Utc>, suffix: u32) -> String {
    let (base, ext) = split_name(original_filename);
    let prefix = format!("{}_{:08x}", now.format("%Y%m%d_%H%M%S"), suffix);

    if ext.is_empty() {
        format!("{}_{}", prefix, base)
    } else {
        format!("{}_{}.{}", prefix, base, ext.to_lowercase())
    }
}

/// Splits on the last `.`; a name without one is all base.
fn split_name(filename: &str) -> (&str, &str) {
    filename.rsplit_once('.').unwrap_or((filename, ""))
}
