//! Growable FIFO byte buffer and its bit-granular wrapper.
//!
//! `ByteQueue` is a contiguous queue: data is pushed onto the end and
//! popped from the beginning. If there is insufficient room at the end we
//! either move the live region to the front of the storage or grow the
//! allocation. To give `put` an amortized cost of O(1), the storage at
//! least doubles when it grows, and we grow rather than move if the queue
//! is more than half full.
//!
//! `BitQueue` adapts a `ByteQueue` to put and get runs of bits. When a get
//! only partially overwrites a destination byte the rest of that byte is
//! preserved, so callers should pre-fill the destination.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::bitcopy::copy_bits;
use crate::error::{Error, Result};

/// Contiguous FIFO byte buffer with unget support.
#[derive(Debug, Default)]
pub struct ByteQueue {
    data: Box<[u8]>,
    begin: usize,
    end: usize,
    // Bytes before `begin` still holding previously popped data. Moving or
    // reallocating the storage recycles those bytes, so it resets this to
    // zero and invalidates unget.
    history: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        debug_assert!(self.begin <= self.end);
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// The buffered bytes, front to back.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    /// Ensure at least `count` bytes of trailing space exist.
    fn will_put(&mut self, count: usize) {
        self.will_put_with_partial(count, 0);
    }

    /// Like `will_put`, but also keeps `partial` extra bytes beyond `end`
    /// alive across a relocation (the BitQueue's half-filled back byte).
    fn will_put_with_partial(&mut self, count: usize, partial: usize) {
        let capacity = self.data.len();
        if capacity - self.end >= count + partial {
            return;
        }
        let live = self.end - self.begin + partial;
        if (live + count) * 2 < capacity {
            // Less than half full after the put: slide to the front
            self.data.copy_within(self.begin..self.begin + live, 0);
        } else {
            // Otherwise reallocate, at least doubling the storage
            let grown = (live + count).max(capacity * 2);
            let mut storage = vec![0u8; grown].into_boxed_slice();
            storage[..live].copy_from_slice(&self.data[self.begin..self.begin + live]);
            self.data = storage;
        }
        self.end -= self.begin;
        self.begin = 0;
        self.history = 0;
    }

    /// Append bytes to the back of the queue.
    pub fn put(&mut self, src: &[u8]) {
        self.will_put(src.len());
        self.data[self.end..self.end + src.len()].copy_from_slice(src);
        self.end += src.len();
    }

    /// Pop exactly `dest.len()` bytes from the front into `dest`. Fails
    /// without consuming anything if fewer bytes are buffered.
    pub fn get_into(&mut self, dest: &mut [u8]) -> Result<()> {
        let count = dest.len();
        if self.len() < count {
            return Err(Error::NeedMoreData);
        }
        dest.copy_from_slice(&self.data[self.begin..self.begin + count]);
        self.begin += count;
        self.history += count;
        Ok(())
    }

    /// Pop `count` bytes into a fresh buffer.
    pub fn get_vec(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; count];
        self.get_into(&mut out)?;
        Ok(out)
    }

    /// Discard `count` bytes from the front without copying them out.
    pub fn drop_front(&mut self, count: usize) -> Result<()> {
        if self.len() < count {
            return Err(Error::NeedMoreData);
        }
        self.begin += count;
        self.history += count;
        Ok(())
    }

    /// Undo the last `count` popped bytes. Only valid while those bytes
    /// are still present in storage; any intervening relocation or growth
    /// discards the history.
    pub fn unget(&mut self, count: usize) -> Result<()> {
        if count > self.history {
            return Err(Error::InvalidArgument(
                "unget past recycled queue history".into(),
            ));
        }
        self.begin -= count;
        self.history -= count;
        Ok(())
    }

    /// Empty the queue without releasing storage or invalidating unget.
    pub fn clear(&mut self) {
        self.end = self.begin;
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get_into(&mut buf)?;
        Ok(buf[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.get_into(&mut buf)?;
        Ok((&buf[..]).read_u16::<LittleEndian>()?)
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.get_into(&mut buf)?;
        Ok((&buf[..]).read_i16::<LittleEndian>()?)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.get_into(&mut buf)?;
        Ok((&buf[..]).read_u32::<LittleEndian>()?)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.get_into(&mut buf)?;
        Ok((&buf[..]).read_i64::<LittleEndian>()?)
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.get_into(&mut buf)?;
        Ok((&buf[..]).read_f64::<LittleEndian>()?)
    }
}

/// Bit-granular queue over a `ByteQueue`.
///
/// The front and back carry sub-byte offsets in `[0, 8)`; a put or get of
/// `n` bits advances them with `copy_bits` handling every alignment case.
#[derive(Debug, Default)]
pub struct BitQueue {
    queue: ByteQueue,
    begin_bit: usize,
    end_bit: usize,
}

impl BitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bits.
    pub fn len_bits(&self) -> usize {
        self.queue.len() * 8 + self.end_bit - self.begin_bit
    }

    /// Append the low `bits` bits of `src` (starting at bit 0).
    pub fn put(&mut self, src: &[u8], bits: usize) {
        debug_assert!(src.len() * 8 >= bits);
        let partial = usize::from(self.end_bit != 0);
        let needed = (self.end_bit + bits + 7) >> 3;
        self.queue.will_put_with_partial(needed - partial, partial);
        copy_bits(
            &mut self.queue.data[self.queue.end..],
            self.end_bit,
            src,
            0,
            bits,
        );
        self.end_bit += bits;
        self.queue.end += self.end_bit >> 3;
        self.end_bit &= 7;
    }

    /// Extract `bits` bits into `dest` starting at bit 0 of `dest`. Bits
    /// of `dest` beyond the extracted run are preserved. Fails without
    /// consuming anything if fewer bits are buffered.
    pub fn get(&mut self, dest: &mut [u8], bits: usize) -> Result<()> {
        if bits > self.len_bits() {
            return Err(Error::NeedMoreData);
        }
        copy_bits(
            dest,
            0,
            &self.queue.data[self.queue.begin..],
            self.begin_bit,
            bits,
        );
        self.begin_bit += bits;
        let advance = self.begin_bit >> 3;
        self.queue.begin += advance;
        self.queue.history += advance;
        self.begin_bit &= 7;
        Ok(())
    }

    /// Undo the last `bits` extracted bits, subject to the byte queue's
    /// history still covering them.
    pub fn unget(&mut self, bits: usize) -> Result<()> {
        let available = self.queue.history * 8 + self.begin_bit;
        if bits > available {
            return Err(Error::InvalidArgument(
                "unget past recycled queue history".into(),
            ));
        }
        let pos = self.queue.begin * 8 + self.begin_bit - bits;
        let new_begin = pos >> 3;
        self.queue.history -= self.queue.begin - new_begin;
        self.queue.begin = new_begin;
        self.begin_bit = pos & 7;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.begin_bit = 0;
        self.end_bit = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = ByteQueue::new();
        q.put(b"abc");
        q.put(b"defg");
        assert_eq!(q.len(), 7);
        let mut out = [0u8; 5];
        q.get_into(&mut out).unwrap();
        assert_eq!(&out, b"abcde");
        assert_eq!(q.get_vec(2).unwrap(), b"fg");
        assert!(q.is_empty());
    }

    #[test]
    fn test_failed_get_consumes_nothing() {
        let mut q = ByteQueue::new();
        q.put(b"ab");
        let mut out = [0u8; 3];
        assert!(matches!(q.get_into(&mut out), Err(Error::NeedMoreData)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.get_vec(2).unwrap(), b"ab");
    }

    #[test]
    fn test_unget_round_trip() {
        let mut q = ByteQueue::new();
        q.put(b"hello");
        assert_eq!(q.get_vec(3).unwrap(), b"hel");
        q.unget(3).unwrap();
        assert_eq!(q.get_vec(5).unwrap(), b"hello");
    }

    #[test]
    fn test_unget_past_history_fails() {
        let mut q = ByteQueue::new();
        q.put(b"ab");
        q.drop_front(1).unwrap();
        assert!(q.unget(2).is_err());
        q.unget(1).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_unget_after_growth_fails() {
        let mut q = ByteQueue::new();
        q.put(b"abcd");
        q.drop_front(4).unwrap();
        // Force a reallocation; the popped bytes are recycled
        q.put(&vec![0x55u8; 1024]);
        assert!(q.unget(1).is_err());
    }

    #[test]
    fn test_growth_preserves_content() {
        let mut q = ByteQueue::new();
        for i in 0..100u32 {
            q.put(&i.to_le_bytes());
        }
        // Consume half, then grow past the original allocation
        for i in 0..50u32 {
            let mut buf = [0u8; 4];
            q.get_into(&mut buf).unwrap();
            assert_eq!(u32::from_le_bytes(buf), i);
        }
        q.put(&vec![0xAAu8; 4096]);
        for i in 50..100u32 {
            let mut buf = [0u8; 4];
            q.get_into(&mut buf).unwrap();
            assert_eq!(u32::from_le_bytes(buf), i);
        }
        assert_eq!(q.get_vec(4096).unwrap(), vec![0xAAu8; 4096]);
    }

    #[test]
    fn test_clear_retains_storage() {
        let mut q = ByteQueue::new();
        q.put(b"abcdef");
        let capacity = q.data.len();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.data.len(), capacity);
    }

    #[test]
    fn test_typed_little_endian_pops() {
        let mut q = ByteQueue::new();
        q.put(&[0x34, 0x12]);
        q.put(&1.5f64.to_le_bytes());
        assert_eq!(q.get_u16().unwrap(), 0x1234);
        assert_eq!(q.get_f64().unwrap(), 1.5);
    }

    #[test]
    fn test_bit_concatenation_law() {
        // put a bits then b bits; get a+b reproduces the concatenation
        let mut q = BitQueue::new();
        q.put(&[0b0000_0101], 3); // 1,0,1
        q.put(&[0b0011_0011], 6); // 1,1,0,0,1,1
        assert_eq!(q.len_bits(), 9);
        let mut out = [0u8; 2];
        q.get(&mut out, 9).unwrap();
        // 101 then 110011 -> bits 0..9 = 1,0,1,1,1,0,0,1,1
        assert_eq!(out[0], 0b1001_1101);
        assert_eq!(out[1], 0b0000_0001);
        assert_eq!(q.len_bits(), 0);
    }

    #[test]
    fn test_bit_get_preserves_high_destination_bits() {
        let mut q = BitQueue::new();
        q.put(&[0xFF], 4);
        let mut out = [0u8; 1];
        q.get(&mut out, 4).unwrap();
        assert_eq!(out[0], 0x0F);
        let mut prefilled = [0xA0u8];
        q.put(&[0xFF], 4);
        q.get(&mut prefilled, 4).unwrap();
        assert_eq!(prefilled[0], 0xAF);
    }

    #[test]
    fn test_bit_get_insufficient() {
        let mut q = BitQueue::new();
        q.put(&[0xFF], 5);
        let mut out = [0u8; 1];
        assert!(matches!(q.get(&mut out, 6), Err(Error::NeedMoreData)));
        assert_eq!(q.len_bits(), 5);
    }

    #[test]
    fn test_bit_unget() {
        let mut q = BitQueue::new();
        q.put(&[0xAB, 0xCD], 16);
        let mut out = [0u8; 2];
        q.get(&mut out, 12).unwrap();
        q.unget(12).unwrap();
        let mut again = [0u8; 2];
        q.get(&mut again, 16).unwrap();
        assert_eq!(again, [0xAB, 0xCD]);
    }

    #[test]
    fn test_bit_put_across_partial_byte_growth() {
        // Repeated unaligned puts force relocations with a half-filled
        // back byte in flight
        let mut q = BitQueue::new();
        let mut expect = Vec::new();
        for i in 0..200u8 {
            q.put(&[i], 5);
            expect.push(i & 0x1F);
        }
        for &e in &expect {
            let mut out = [0u8; 1];
            q.get(&mut out, 5).unwrap();
            assert_eq!(out[0], e);
        }
    }
}
