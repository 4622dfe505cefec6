//! Fixed capacity moving average (boxcar) filter

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use super::{ArmCtrlError, Sample4};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Shortest allowed filter length, a length of one passes samples through
/// unchanged.
pub const FILTER_MIN_LEN: usize = 1;

/// Longest allowed filter length.
pub const FILTER_MAX_LEN: usize = 1000;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Moving average over the last `len` four channel samples.
///
/// The running sum is kept incrementally so each push is O(1). To stop
/// floating point drift building up in the running sum it is recomputed from
/// the buffer every time the write position wraps.
#[derive(Debug, Clone)]
pub struct RingFilter {
    buffer: Vec<Sample4>,
    len: usize,
    head: usize,
    count: usize,
    sum: Sample4,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RingFilter {
    /// Create a new empty filter with the given length.
    pub fn new(len: usize) -> Result<Self, ArmCtrlError> {
        let mut filter = Self {
            buffer: Vec::new(),
            len: FILTER_MIN_LEN,
            head: 0,
            count: 0,
            sum: Sample4::zeros(),
        };

        filter.configure(len)?;

        Ok(filter)
    }

    /// Change the length of the filter, emptying it.
    ///
    /// If the length is invalid the filter is left untouched.
    pub fn configure(&mut self, len: usize) -> Result<(), ArmCtrlError> {
        if len < FILTER_MIN_LEN || len > FILTER_MAX_LEN {
            return Err(ArmCtrlError::InvalidFilterLength(len));
        }

        self.len = len;
        self.buffer = vec![Sample4::zeros(); len];
        self.clear();

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of samples currently held.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Empty the filter without changing its length.
    pub fn clear(&mut self) {
        for s in self.buffer.iter_mut() {
            *s = Sample4::zeros();
        }
        self.head = 0;
        self.count = 0;
        self.sum = Sample4::zeros();
    }

    /// Fill the filter with copies of `sample`, as if it had been pushed
    /// `len` times.
    pub fn prime(&mut self, sample: Sample4) {
        for s in self.buffer.iter_mut() {
            *s = sample;
        }
        self.head = 0;
        self.count = self.len;
        self.sum = sample * self.len as f64;
    }

    /// Push a new sample, evicting the oldest if full, and return the mean of
    /// the samples held.
    pub fn push(&mut self, sample: Sample4) -> Sample4 {
        if self.count == self.len {
            self.sum -= self.buffer[self.head];
        } else {
            self.count += 1;
        }

        self.buffer[self.head] = sample;
        self.sum += sample;

        self.head += 1;
        if self.head == self.len {
            self.head = 0;
            self.resync();
        }

        self.mean()
    }

    /// Mean of the samples held, zero if empty.
    pub fn mean(&self) -> Sample4 {
        if self.count == 0 {
            Sample4::zeros()
        } else {
            self.sum / self.count as f64
        }
    }

    fn resync(&mut self) {
        // Unused slots are zero so summing the whole buffer is exact
        self.sum = self.buffer.iter().fold(Sample4::zeros(), |acc, s| acc + s);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(i: usize) -> Sample4 {
        let f = i as f64;
        Sample4::new(f, -0.5 * f, (f * 0.37).sin(), 1000.0 + f.sqrt())
    }

    #[test]
    fn test_matches_brute_force() {
        for &len in [1, 2, 7, 50].iter() {
            let mut filter = RingFilter::new(len).unwrap();
            let mut history = Vec::new();

            for i in 0..(3 * len + 5) {
                let out = filter.push(sample(i));
                history.push(sample(i));

                let window = &history[history.len().saturating_sub(len)..];
                let expected =
                    window.iter().fold(Sample4::zeros(), |acc, s| acc + s) / window.len() as f64;

                assert_eq!(filter.count(), window.len());
                assert!(
                    (out - expected).amax() < 1e-9,
                    "len {} step {}: {} != {}",
                    len,
                    i,
                    out,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_length_one_passthrough() {
        let mut filter = RingFilter::new(1).unwrap();
        for i in 0..5 {
            assert_eq!(filter.push(sample(i)), sample(i));
        }
    }

    #[test]
    fn test_invalid_configure_keeps_state() {
        let mut filter = RingFilter::new(4).unwrap();
        filter.push(Sample4::repeat(2.0));
        filter.push(Sample4::repeat(4.0));

        for &len in [0, 1001].iter() {
            match filter.configure(len) {
                Err(ArmCtrlError::InvalidFilterLength(l)) => assert_eq!(l, len),
                r => panic!("Expected invalid filter length, got {:?}", r),
            }
        }

        assert_eq!(filter.len(), 4);
        assert_eq!(filter.count(), 2);
        assert_eq!(filter.mean(), Sample4::repeat(3.0));

        filter.configure(1000).unwrap();
        assert!(filter.is_empty());
        assert_eq!(filter.len(), 1000);
    }

    #[test]
    fn test_prime() {
        let mut filter = RingFilter::new(10).unwrap();
        filter.prime(Sample4::zeros());
        assert_eq!(filter.count(), 10);

        // A step into a primed filter ramps over the filter length
        let out = filter.push(Sample4::repeat(1.0));
        assert!((out - Sample4::repeat(0.1)).amax() < 1e-12);

        filter.clear();
        assert!(filter.is_empty());
        assert_eq!(filter.push(Sample4::repeat(1.0)), Sample4::repeat(1.0));
    }
}
