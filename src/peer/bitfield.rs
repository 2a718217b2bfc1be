/// Per-peer piece availability, one flag per piece.
///
/// Payloads are bit-packed most-significant-bit first. The field always holds
/// exactly the torrent's piece count: extra payload bits are dropped and
/// short payloads are padded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<bool>,
}

impl Bitfield {
    /// An empty bitfield for `num_pieces` pieces
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bits: vec![false; num_pieces],
        }
    }

    /// Decode a Bitfield message payload for a torrent of `num_pieces` pieces
    pub fn from_payload(payload: &[u8], num_pieces: usize) -> Self {
        let mut bits: Vec<bool> = payload
            .iter()
            .take(num_pieces.div_ceil(8))
            .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1 == 1))
            .collect();
        bits.resize(num_pieces, false);
        Self { bits }
    }

    /// Encode as a Bitfield message payload
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = vec![0u8; self.bits.len().div_ceil(8)];
        for (index, _) in self.bits.iter().enumerate().filter(|&(_, &bit)| bit) {
            payload[index / 8] |= 0x80 >> (index % 8);
        }
        payload
    }

    pub fn has(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    /// Mark a piece as available. Indices past the end are ignored.
    pub fn set(&mut self, index: usize) {
        if let Some(bit) = self.bits.get_mut(index) {
            *bit = true;
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of available pieces among the first `num_pieces`
    pub fn count(&self, num_pieces: usize) -> usize {
        self.bits.iter().take(num_pieces).filter(|&&bit| bit).count()
    }
}
