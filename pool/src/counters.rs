/// Extranonce and job id allocation
///
/// Both counters are owned by one Job Manager and never reset while the
/// process lives.

use rand::Rng;

/// Unique 4-byte extranonce1 per subscribing miner.
///
/// The instance id is shifted into the top 5 bits so independent pool
/// processes hand out disjoint ranges.
#[derive(Debug, Clone)]
pub struct ExtraNonceCounter {
    counter: u32,
}

impl ExtraNonceCounter {
    pub const SIZE: usize = 4;

    pub fn new(instance_id: Option<u32>) -> Self {
        let instance_id = instance_id.unwrap_or_else(|| rand::thread_rng().gen());
        Self {
            counter: instance_id.wrapping_shl(27),
        }
    }

    /// Next extranonce1 as 8 hex chars (big-endian).
    pub fn next(&mut self) -> String {
        let value = self.counter;
        self.counter = self.counter.wrapping_add(1);
        hex::encode(value.to_be_bytes())
    }

    pub fn size(&self) -> usize {
        Self::SIZE
    }
}

/// Job id sequence, rendered as lowercase hex without padding.
///
/// Wraps to 1 instead of 0 when the counter reaches a multiple of `max`.
#[derive(Debug, Clone)]
pub struct JobCounter {
    counter: u64,
    max: u64,
}

impl JobCounter {
    pub fn new(start: u64, max: u64) -> Self {
        Self { counter: start, max }
    }

    pub fn next(&mut self) -> String {
        self.counter += 1;
        if self.counter % self.max == 0 {
            self.counter = 1;
        }
        self.cur()
    }

    pub fn cur(&self) -> String {
        format!("{:x}", self.counter)
    }
}
