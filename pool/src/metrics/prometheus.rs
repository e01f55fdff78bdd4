use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder};
use std::sync::OnceLock;

static SHARES_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static SHARES_REJECTED: OnceLock<IntCounter> = OnceLock::new();
static BLOCK_CANDIDATES: OnceLock<IntCounter> = OnceLock::new();
static BLOCKS_ACCEPTED: OnceLock<IntCounter> = OnceLock::new();
static BLOCKS_REJECTED: OnceLock<IntCounter> = OnceLock::new();
static DUPLICATE_SUBMITS: OnceLock<IntCounter> = OnceLock::new();

static RPC_REQUESTS: OnceLock<IntCounter> = OnceLock::new();
static RPC_ERRORS: OnceLock<IntCounter> = OnceLock::new();
static TEMPLATE_UPDATES: OnceLock<IntCounter> = OnceLock::new();
static TEMPLATE_FETCH_ERRORS: OnceLock<IntCounter> = OnceLock::new();

static TEMPLATE_HEIGHT: OnceLock<IntGauge> = OnceLock::new();

fn shares_accepted() -> &'static IntCounter {
    SHARES_ACCEPTED.get_or_init(|| IntCounter::new("shares_accepted_total", "Total accepted shares").unwrap())
}

fn shares_rejected() -> &'static IntCounter {
    SHARES_REJECTED.get_or_init(|| IntCounter::new("shares_rejected_total", "Total rejected shares").unwrap())
}

fn block_candidates() -> &'static IntCounter {
    BLOCK_CANDIDATES.get_or_init(|| {
        IntCounter::new(
            "block_candidates_total",
            "Total shares meeting the network target",
        )
        .unwrap()
    })
}

fn blocks_accepted() -> &'static IntCounter {
    BLOCKS_ACCEPTED.get_or_init(|| {
        IntCounter::new("blocks_accepted_total", "Total submitted blocks confirmed by a daemon").unwrap()
    })
}

fn blocks_rejected() -> &'static IntCounter {
    BLOCKS_REJECTED.get_or_init(|| {
        IntCounter::new(
            "blocks_rejected_total",
            "Total submitted blocks rejected or not found on any daemon",
        )
        .unwrap()
    })
}

fn duplicate_submits() -> &'static IntCounter {
    DUPLICATE_SUBMITS.get_or_init(|| {
        IntCounter::new(
            "block_duplicate_submits_total",
            "Total block submissions suppressed as duplicates",
        )
        .unwrap()
    })
}

fn rpc_requests() -> &'static IntCounter {
    RPC_REQUESTS
        .get_or_init(|| IntCounter::new("rpc_requests_total", "Total RPC requests to daemons").unwrap())
}

fn rpc_errors() -> &'static IntCounter {
    RPC_ERRORS.get_or_init(|| IntCounter::new("rpc_errors_total", "Total RPC errors").unwrap())
}

fn template_updates() -> &'static IntCounter {
    TEMPLATE_UPDATES
        .get_or_init(|| IntCounter::new("block_template_updates_total", "Total template updates").unwrap())
}

fn template_fetch_errors() -> &'static IntCounter {
    TEMPLATE_FETCH_ERRORS.get_or_init(|| {
        IntCounter::new(
            "block_template_fetch_errors_total",
            "Total template fetch errors",
        )
        .unwrap()
    })
}

fn template_height() -> &'static IntGauge {
    TEMPLATE_HEIGHT.get_or_init(|| IntGauge::new("block_template_height", "Current block template height").unwrap())
}

pub fn inc_shares_accepted() {
    shares_accepted().inc();
}

pub fn inc_shares_rejected() {
    shares_rejected().inc();
}

pub fn inc_block_candidates() {
    block_candidates().inc();
}

pub fn inc_blocks_accepted() {
    blocks_accepted().inc();
}

pub fn inc_blocks_rejected() {
    blocks_rejected().inc();
}

pub fn inc_duplicate_submits() {
    duplicate_submits().inc();
}

pub fn inc_rpc_requests() {
    rpc_requests().inc();
}

pub fn inc_rpc_errors() {
    rpc_errors().inc();
}

pub fn inc_template_updates() {
    template_updates().inc();
}

pub fn inc_template_fetch_errors() {
    template_fetch_errors().inc();
}

pub fn set_template_height(height: u64) {
    template_height().set(height as i64);
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(shares_accepted().collect());
    mfs.extend(shares_rejected().collect());
    mfs.extend(block_candidates().collect());
    mfs.extend(blocks_accepted().collect());
    mfs.extend(blocks_rejected().collect());
    mfs.extend(duplicate_submits().collect());
    mfs.extend(rpc_requests().collect());
    mfs.extend(rpc_errors().collect());
    mfs.extend(template_updates().collect());
    mfs.extend(template_fetch_errors().collect());
    mfs.extend(template_height().collect());

    let mut buf = Vec::new();
    let _ = enc.encode(&mfs, &mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_counters() {
        inc_block_candidates();
        set_template_height(42);
        let body = render();
        assert!(body.contains("block_candidates_total"));
        assert!(body.contains("block_template_height 42"));
    }
}
