//! Bounds-checked little-endian reader over instruction data.

use solana_sdk::pubkey::Pubkey;

pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let bytes = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    pub(crate) fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub(crate) fn read_u64_le(&mut self) -> Option<u64> {
        let bytes = self.take(8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// A u32 length prefix followed by that many UTF-8 bytes.
    pub(crate) fn read_string(&mut self) -> Option<String> {
        let len = self.read_u32_le()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }

    pub(crate) fn read_pubkey(&mut self) -> Option<Pubkey> {
        let bytes = self.take(32)?;
        Some(Pubkey::new_from_array(bytes.try_into().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_string_advances_offset() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"abc");
        data.extend_from_slice(&7u64.to_le_bytes());

        let mut cursor = ByteCursor::new(&data, 0);
        assert_eq!(cursor.read_string().as_deref(), Some("abc"));
        assert_eq!(cursor.read_u64_le(), Some(7));
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_length_prefix_past_end_is_none() {
        let mut data = Vec::new();
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(b"abc");

        let mut cursor = ByteCursor::new(&data, 0);
        assert_eq!(cursor.read_string(), None);
    }

    #[test]
    fn test_invalid_utf8_is_none() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[0xff, 0xfe]);

        let mut cursor = ByteCursor::new(&data, 0);
        assert_eq!(cursor.read_string(), None);
    }

    #[test]
    fn test_short_reads_are_none() {
        let data = [1u8, 2, 3];
        let mut cursor = ByteCursor::new(&data, 0);
        assert_eq!(cursor.read_u64_le(), None);
        assert_eq!(cursor.read_pubkey(), None);

        let mut past_end = ByteCursor::new(&data, 10);
        assert_eq!(past_end.read_u32_le(), None);
        assert_eq!(past_end.remaining(), 0);
    }
}
