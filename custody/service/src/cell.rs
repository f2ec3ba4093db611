// Copyright (c) 2024 The Botho Foundation

//! Cells and bag-of-cells (BOC) encoding.
//!
//! Covers the part of the ledger's cell format that wallet messages need:
//! ordinary cells of up to 1023 bits and four references, their
//! representation hash, and single-root BOC serialization with a CRC32C
//! trailer. Exotic cells and multi-root bags are rejected when parsing.

use custody_core::{AccountAddress, Coins};
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::error::{Error, Result};

pub const MAX_BITS: usize = 1023;
pub const MAX_REFS: usize = 4;

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];
const BOC_HAS_IDX: u8 = 0x80;
const BOC_HAS_CRC32: u8 = 0x40;
const BOC_SIZE_MASK: u8 = 0x07;

const CRC32C: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

fn cell_err(message: impl Into<String>) -> Error {
    Error::Cell(message.into())
}

/// An immutable cell with its representation hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    hash: [u8; 32],
    depth: u16,
}

impl Cell {
    /// `data` holds `bit_len` bits, most significant first, with every bit
    /// past `bit_len` cleared.
    fn new(data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Self {
        let depth = refs.iter().map(|r| r.depth + 1).max().unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update([refs.len() as u8, data_descriptor(bit_len)]);
        hasher.update(augmented(&data, bit_len));
        for r in &refs {
            hasher.update(r.depth.to_be_bytes());
        }
        for r in &refs {
            hasher.update(r.hash);
        }

        Self {
            data,
            bit_len,
            refs,
            hash: hasher.finalize().into(),
            depth,
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    pub fn parser(&self) -> CellSlice<'_> {
        CellSlice {
            cell: self,
            bit: 0,
            next_ref: 0,
        }
    }

    fn bit(&self, index: usize) -> bool {
        self.data[index / 8] & (0x80 >> (index % 8)) != 0
    }
}

fn data_descriptor(bit_len: usize) -> u8 {
    (bit_len / 8 + bit_len.div_ceil(8)) as u8
}

/// Data bytes with the completion tag set when the last byte is partial.
fn augmented(data: &[u8], bit_len: usize) -> Vec<u8> {
    let mut out = data[..bit_len.div_ceil(8)].to_vec();
    if bit_len % 8 != 0 {
        out[bit_len / 8] |= 0x80 >> (bit_len % 8);
    }
    out
}

/// Append-only cell writer.
#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        if self.bit_len >= MAX_BITS {
            return Err(cell_err("cell overflow: more than 1023 bits"));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Store the low `bits` bits of `value`, big-endian.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(cell_err(format!("{} does not fit in {} bits", value, bits)));
        }
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        for byte in bytes {
            self.store_uint(u64::from(*byte), 8)?;
        }
        Ok(self)
    }

    /// `VarUInteger 16`: a 4-bit byte length, then the value.
    pub fn store_coins(&mut self, coins: Coins) -> Result<&mut Self> {
        let nanos = coins.nanos();
        let len = (64 - nanos.leading_zeros() as usize).div_ceil(8);
        self.store_uint(len as u64, 4)?;
        self.store_uint(nanos, len * 8)
    }

    /// `addr_none` for `None`, otherwise `addr_std` without anycast.
    pub fn store_address(&mut self, address: Option<&AccountAddress>) -> Result<&mut Self> {
        match address {
            None => self.store_uint(0b00, 2),
            Some(address) => {
                self.store_uint(0b10, 2)?
                    .store_bit(false)?
                    .store_uint(u64::from(address.workchain as u8), 8)?
                    .store_bytes(&address.account_id)
            }
        }
    }

    pub fn store_reference(&mut self, cell: Arc<Cell>) -> Result<&mut Self> {
        if self.refs.len() >= MAX_REFS {
            return Err(cell_err("cell overflow: more than 4 references"));
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Append the bits and references of `cell`.
    pub fn append(&mut self, cell: &Cell) -> Result<&mut Self> {
        for i in 0..cell.bit_len {
            self.store_bit(cell.bit(i))?;
        }
        for r in &cell.refs {
            self.store_reference(r.clone())?;
        }
        Ok(self)
    }

    pub fn build(&mut self) -> Arc<Cell> {
        let data = std::mem::take(&mut self.data);
        let refs = std::mem::take(&mut self.refs);
        let bit_len = std::mem::replace(&mut self.bit_len, 0);
        Arc::new(Cell::new(data, bit_len, refs))
    }
}

/// Sequential reader over a cell.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit: usize,
    next_ref: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit
    }

    pub fn load_bit(&mut self) -> Result<bool> {
        if self.bit >= self.cell.bit_len {
            return Err(cell_err("cell underflow"));
        }
        let bit = self.cell.bit(self.bit);
        self.bit += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(cell_err(format!("cannot load {} bits as an integer", bits)));
        }
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.load_bit()?);
        }
        Ok(value)
    }

    pub fn load_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        for byte in out.iter_mut() {
            *byte = self.load_uint(8)? as u8;
        }
        Ok(out)
    }

    pub fn load_coins(&mut self) -> Result<Coins> {
        let len = self.load_uint(4)? as usize;
        if len > 8 {
            return Err(cell_err(format!("coin amount of {} bytes", len)));
        }
        Ok(Coins::from_nanos(self.load_uint(len * 8)?))
    }

    pub fn load_address(&mut self) -> Result<Option<AccountAddress>> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(cell_err("anycast addresses are not supported"));
                }
                let workchain = self.load_uint(8)? as u8 as i8;
                let account_id = self.load_bytes::<32>()?;
                Ok(Some(AccountAddress::new(workchain, account_id)))
            }
            tag => Err(cell_err(format!("unsupported address tag {:02b}", tag))),
        }
    }

    pub fn load_reference(&mut self) -> Result<&'a Arc<Cell>> {
        let cell = self
            .cell
            .refs
            .get(self.next_ref)
            .ok_or_else(|| cell_err("no more references"))?;
        self.next_ref += 1;
        Ok(cell)
    }

    /// The unread bits and references as a cell of their own.
    pub fn remainder(&self) -> Result<Arc<Cell>> {
        let mut builder = CellBuilder::new();
        for i in self.bit..self.cell.bit_len {
            builder.store_bit(self.cell.bit(i))?;
        }
        for r in &self.cell.refs[self.next_ref..] {
            builder.store_reference(r.clone())?;
        }
        Ok(builder.build())
    }
}

fn byte_width(value: u64) -> usize {
    (64 - value.leading_zeros() as usize).div_ceil(8).max(1)
}

fn push_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

/// Parents before children, shared cells once.
fn collect(cell: &Arc<Cell>, seen: &mut HashSet<[u8; 32]>, order: &mut Vec<Arc<Cell>>) {
    if !seen.insert(cell.hash) {
        return;
    }
    for r in &cell.refs {
        collect(r, seen, order);
    }
    order.push(cell.clone());
}

/// Serialize a single-root bag of cells with a CRC32C trailer and no index.
pub fn serialize_boc(root: &Arc<Cell>) -> Vec<u8> {
    let mut order = Vec::new();
    collect(root, &mut HashSet::new(), &mut order);
    order.reverse();

    let index: HashMap<[u8; 32], usize> = order
        .iter()
        .enumerate()
        .map(|(i, cell)| (cell.hash, i))
        .collect();
    let size = byte_width(order.len() as u64);

    let mut cells = Vec::new();
    for cell in &order {
        cells.push(cell.refs.len() as u8);
        cells.push(data_descriptor(cell.bit_len));
        cells.extend(augmented(&cell.data, cell.bit_len));
        for r in &cell.refs {
            push_uint(&mut cells, index[&r.hash] as u64, size);
        }
    }
    let offset = byte_width(cells.len() as u64);

    let mut out = Vec::with_capacity(16 + cells.len());
    out.extend_from_slice(&BOC_MAGIC);
    out.push(BOC_HAS_CRC32 | size as u8);
    out.push(offset as u8);
    push_uint(&mut out, order.len() as u64, size);
    push_uint(&mut out, 1, size);
    push_uint(&mut out, 0, size);
    push_uint(&mut out, cells.len() as u64, offset);
    push_uint(&mut out, 0, size);
    out.extend(cells);

    let crc = CRC32C.checksum(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| cell_err("truncated bag of cells"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, width: usize) -> Result<u64> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

/// Parse a single-root bag of cells.
pub fn parse_boc(bytes: &[u8]) -> Result<Arc<Cell>> {
    let mut reader = ByteReader { bytes, pos: 0 };
    if reader.take(4)? != BOC_MAGIC {
        return Err(cell_err("not a bag of cells"));
    }

    let flags = reader.u8()?;
    let size = (flags & BOC_SIZE_MASK) as usize;
    let offset = reader.u8()? as usize;
    if !(1..=4).contains(&size) || !(1..=8).contains(&offset) {
        return Err(cell_err("bad bag of cells header"));
    }

    let cell_count = reader.uint(size)? as usize;
    let roots = reader.uint(size)?;
    let _absent = reader.uint(size)?;
    let _total_size = reader.uint(offset)?;
    if roots != 1 {
        return Err(cell_err(format!("expected one root, found {}", roots)));
    }
    let root = reader.uint(size)? as usize;
    if flags & BOC_HAS_IDX != 0 {
        reader.take(cell_count.saturating_mul(offset))?;
    }

    if flags & BOC_HAS_CRC32 != 0 {
        let body_len = bytes
            .len()
            .checked_sub(4)
            .ok_or_else(|| cell_err("truncated bag of cells"))?;
        let mut trailer = [0u8; 4];
        trailer.copy_from_slice(&bytes[body_len..]);
        if CRC32C.checksum(&bytes[..body_len]) != u32::from_le_bytes(trailer) {
            return Err(cell_err("bag of cells checksum mismatch"));
        }
    }

    let mut raw = Vec::with_capacity(cell_count.min(1024));
    for _ in 0..cell_count {
        let d1 = reader.u8()?;
        let d2 = reader.u8()?;
        let ref_count = (d1 & 0x07) as usize;
        if d1 & 0xf8 != 0 || ref_count > MAX_REFS {
            return Err(cell_err(format!("unsupported cell descriptor 0x{:02x}", d1)));
        }

        let byte_len = (d2 as usize).div_ceil(2);
        let mut data = reader.take(byte_len)?.to_vec();
        let mut bit_len = byte_len * 8;
        if d2 % 2 == 1 {
            let last = data.last().copied().unwrap_or(0);
            if last == 0 {
                return Err(cell_err("missing completion tag"));
            }
            bit_len -= last.trailing_zeros() as usize + 1;
            data.truncate(bit_len.div_ceil(8));
            if bit_len % 8 != 0 {
                data[bit_len / 8] &= !(0x80 >> (bit_len % 8));
            }
        }

        let refs = (0..ref_count)
            .map(|_| reader.uint(size).map(|i| i as usize))
            .collect::<Result<Vec<_>>>()?;
        raw.push(RawCell {
            data,
            bit_len,
            refs,
        });
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; raw.len()];
    for (i, cell) in raw.into_iter().enumerate().rev() {
        let mut refs = Vec::with_capacity(cell.refs.len());
        for j in cell.refs {
            let child = built
                .get(j)
                .filter(|_| j > i)
                .and_then(|c| c.clone())
                .ok_or_else(|| cell_err(format!("cell {} has a bad reference {}", i, j)))?;
            refs.push(child);
        }
        built[i] = Some(Arc::new(Cell::new(cell.data, cell.bit_len, refs)));
    }

    built
        .get(root)
        .and_then(|c| c.clone())
        .ok_or_else(|| cell_err("root index out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cell() {
        let cell = CellBuilder::new().build();
        assert_eq!(
            hex::encode(cell.hash()),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
        assert_eq!(
            hex::encode(serialize_boc(&cell)),
            "b5ee9c724101010100020000004cacb9cd"
        );
    }

    #[test]
    fn test_partial_byte_round_trip() {
        let cell = CellBuilder::new()
            .store_uint(0b101, 3)
            .unwrap()
            .store_coins(Coins::from_nanos(1_500_000_000))
            .unwrap()
            .build();
        assert_eq!(cell.bit_len(), 3 + 4 + 32);

        let parsed = parse_boc(&serialize_boc(&cell)).unwrap();
        assert_eq!(parsed.hash(), cell.hash());

        let mut slice = parsed.parser();
        assert_eq!(slice.load_uint(3).unwrap(), 0b101);
        assert_eq!(slice.load_coins().unwrap(), Coins::from_nanos(1_500_000_000));
        assert_eq!(slice.remaining_bits(), 0);
        assert!(slice.load_bit().is_err());
    }

    #[test]
    fn test_tree_with_shared_child() {
        let leaf = CellBuilder::new().store_uint(7, 8).unwrap().build();
        let mid = CellBuilder::new()
            .store_reference(leaf.clone())
            .unwrap()
            .build();
        let root = CellBuilder::new()
            .store_bit(true)
            .unwrap()
            .store_reference(mid)
            .unwrap()
            .store_reference(leaf)
            .unwrap()
            .build();

        let boc = serialize_boc(&root);
        // Three distinct cells.
        assert_eq!(boc[6], 3);
        let parsed = parse_boc(&boc).unwrap();
        assert_eq!(parsed.hash(), root.hash());
        assert_eq!(parsed.refs().len(), 2);
    }

    #[test]
    fn test_address_and_zero_coins() {
        let address = AccountAddress::new(-1, [0x5a; 32]);
        let cell = CellBuilder::new()
            .store_address(None)
            .unwrap()
            .store_address(Some(&address))
            .unwrap()
            .store_coins(Coins::ZERO)
            .unwrap()
            .build();
        assert_eq!(cell.bit_len(), 2 + 267 + 4);

        let mut slice = cell.parser();
        assert_eq!(slice.load_address().unwrap(), None);
        assert_eq!(slice.load_address().unwrap(), Some(address));
        assert_eq!(slice.load_coins().unwrap(), Coins::ZERO);
    }

    #[test]
    fn test_limits() {
        let mut builder = CellBuilder::new();
        for _ in 0..MAX_BITS {
            builder.store_bit(false).unwrap();
        }
        assert!(builder.store_bit(false).is_err());

        let leaf = CellBuilder::new().build();
        let mut builder = CellBuilder::new();
        for _ in 0..MAX_REFS {
            builder.store_reference(leaf.clone()).unwrap();
        }
        assert!(builder.store_reference(leaf).is_err());
        assert!(CellBuilder::new().store_uint(256, 8).is_err());
    }

    #[test]
    fn test_corrupted_boc_rejected() {
        let cell = CellBuilder::new().store_uint(42, 16).unwrap().build();
        let mut boc = serialize_boc(&cell);
        let n = boc.len();
        boc[n - 6] ^= 0xff;
        assert!(parse_boc(&boc).is_err());
        assert!(parse_boc(&boc[..5]).is_err());
        assert!(parse_boc(b"not a boc").is_err());
    }
}
