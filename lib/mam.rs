// Memory Access Module (MAM) client
//
// Byte-addressed reads and writes of target memory. A byte range is split
// into an unaligned prolog, a word-aligned bulk part and an unaligned
// epilog. Each part becomes one or more MAM transfer requests, sent to the
// module as event packets.

use crate::hostmod::HostMod;
use osd_core::reg::{mam_region_baseaddr, mam_region_memsize, MAM_AW, MAM_DW, MAM_MAX_REGIONS, MAM_REGIONS};
use osd_core::{EventSubtype, OsdError, Packet, Result};
use std::fmt;
use tracing::{debug, trace};

/// Largest burst, limited by the 8 bit SELSIZE field
pub const MAM_MAX_BURST_WORDS: usize = 255;

// Transfer header byte 0
const HDR0_WE: u8 = 1 << 7;
const HDR0_BURST: u8 = 1 << 6;
const HDR0_SYNC: u8 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base_addr: u64,
    pub size: u64,
}

impl Region {
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        let (base, end) = (self.base_addr as u128, self.base_addr as u128 + self.size as u128);
        addr as u128 >= base && addr as u128 + len as u128 <= end
    }
}

/// Geometry of the memory behind one MAM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub module_addr: u16,
    pub addr_width_bits: u16,
    pub data_width_bits: u16,
    pub regions: Vec<Region>,
}

impl MemoryDescriptor {
    /// Validates the widths and the number of regions
    pub fn new(
        module_addr: u16,
        addr_width_bits: u16,
        data_width_bits: u16,
        regions: Vec<Region>,
    ) -> Result<Self> {
        for (name, bits) in [("address", addr_width_bits), ("data", data_width_bits)] {
            if bits == 0 || bits % 8 != 0 || bits > 64 {
                return Err(OsdError::wrong_module(
                    module_addr,
                    format!("unsupported {} width of {} bit", name, bits),
                ));
            }
        }
        if regions.len() > MAM_MAX_REGIONS {
            return Err(OsdError::wrong_module(
                module_addr,
                format!("{} memory regions, at most {} supported", regions.len(), MAM_MAX_REGIONS),
            ));
        }
        Ok(MemoryDescriptor {
            module_addr,
            addr_width_bits,
            data_width_bits,
            regions,
        })
    }

    pub fn addr_width_bytes(&self) -> usize {
        self.addr_width_bits as usize / 8
    }

    pub fn data_width_bytes(&self) -> usize {
        self.data_width_bits as usize / 8
    }

    pub fn region_containing(&self, addr: u64, len: u64) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr, len))
    }

    /// Without declared regions every range is accepted
    pub fn check_range(&self, addr: u64, len: u64) -> Result<()> {
        if self.regions.is_empty() || self.region_containing(addr, len).is_some() {
            return Ok(());
        }
        Err(OsdError::invalid_argument(format!(
            "range {:#x}+{} is not inside a memory region of module {}",
            addr, len, self.module_addr
        )))
    }
}

impl fmt::Display for MemoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "MAM {}: AW={} bit, DW={} bit",
            self.module_addr, self.addr_width_bits, self.data_width_bits
        )?;
        for (i, r) in self.regions.iter().enumerate() {
            write!(f, ", region {}: {:#x}+{:#x}", i, r.base_addr, r.size)?;
        }
        Ok(())
    }
}

/// Read the memory geometry of the MAM at `module_addr`
pub fn get_mem_desc(hostmod: &mut HostMod, module_addr: u16) -> Result<MemoryDescriptor> {
    let addr_width_bits = hostmod.reg_read16(module_addr, MAM_AW)?;
    let data_width_bits = hostmod.reg_read16(module_addr, MAM_DW)?;
    let num_regions = hostmod.reg_read16(module_addr, MAM_REGIONS)?;
    if num_regions as usize > MAM_MAX_REGIONS {
        return Err(OsdError::wrong_module(
            module_addr,
            format!("{} memory regions, at most {} supported", num_regions, MAM_MAX_REGIONS),
        ));
    }

    let mut regions = Vec::with_capacity(num_regions as usize);
    for r in 0..num_regions {
        let base_addr = read_reg64(hostmod, module_addr, |w| mam_region_baseaddr(r, w))?;
        let size = read_reg64(hostmod, module_addr, |w| mam_region_memsize(r, w))?;
        regions.push(Region { base_addr, size });
    }

    let desc = MemoryDescriptor::new(module_addr, addr_width_bits, data_width_bits, regions)?;
    debug!(%desc, "Read memory descriptor");
    Ok(desc)
}

/// Combine four 16 bit registers, word 0 least significant
fn read_reg64(hostmod: &mut HostMod, module_addr: u16, reg: impl Fn(u16) -> u16) -> Result<u64> {
    let mut value = 0u64;
    for w in 0..4 {
        let word = hostmod.reg_read16(module_addr, reg(w))?;
        value |= (word as u64) << (16 * w);
    }
    Ok(value)
}

/// Sizes in bytes of the prolog, bulk and epilog parts of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParts {
    pub prolog: usize,
    pub bulk: usize,
    pub epilog: usize,
}

/// Split `nbyte` bytes starting at `start_addr` for a memory of `dw` byte words
///
/// Ranges shorter than a word go entirely into the prolog.
pub fn calculate_parts(start_addr: u64, nbyte: usize, dw: usize) -> TransferParts {
    if nbyte < dw {
        return TransferParts {
            prolog: nbyte,
            bulk: 0,
            epilog: 0,
        };
    }
    let dw = dw.max(1) as u128;
    let start = start_addr as u128;
    let prolog = ((dw - start % dw) % dw) as usize;
    let epilog = ((start + nbyte as u128) % dw) as usize;
    TransferParts {
        prolog,
        bulk: nbyte - prolog - epilog,
        epilog,
    }
}

/// Byte lanes `baddr..baddr + nbyte` of a `dw` byte word as a mask
pub fn byte_select(baddr: usize, nbyte: usize, dw: usize) -> Result<u8> {
    if nbyte == 0 || dw > 8 || baddr + nbyte > dw {
        return Err(OsdError::invalid_argument(format!(
            "{} byte(s) at offset {} do not fit into a {} byte word",
            nbyte, baddr, dw
        )));
    }
    Ok((((1u16 << nbyte) - 1) << baddr) as u8)
}

/// Place `data` at byte offset `baddr` of a zeroed word, with its byte-select
pub fn align_data_to_word(baddr: usize, data: &[u8], dw: usize) -> Result<(Vec<u8>, u8)> {
    let select = byte_select(baddr, data.len(), dw)?;
    let mut word = vec![0u8; dw];
    word[baddr..baddr + data.len()].copy_from_slice(data);
    Ok((word, select))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Select {
    /// Single-word access to the selected byte lanes
    Bytes(u8),
    /// Burst of the given number of words
    Burst(u8),
}

#[derive(Debug, Clone, Copy)]
struct TransferDescriptor<'a> {
    sync: bool,
    select: Select,
    start_addr: u64,
    /// Present for writes only
    data: Option<&'a [u8]>,
}

/// Encode a MAM transfer request
fn create_mam_transfer(desc: &MemoryDescriptor, t: &TransferDescriptor) -> Result<Vec<u8>> {
    let aw = desc.addr_width_bytes();
    let dw = desc.data_width_bytes();

    if t.start_addr % dw as u64 != 0 {
        return Err(OsdError::invalid_argument(format!(
            "transfer address {:#x} is not word aligned",
            t.start_addr
        )));
    }
    if aw < 8 && t.start_addr >> (aw * 8) != 0 {
        return Err(OsdError::invalid_argument(format!(
            "transfer address {:#x} exceeds the {} bit address space",
            t.start_addr, desc.addr_width_bits
        )));
    }
    let (burst, selsize) = match t.select {
        Select::Bytes(mask) => (false, mask),
        Select::Burst(words) => (true, words),
    };
    if let Some(data) = t.data {
        let expected = if burst { selsize as usize * dw } else { dw };
        if data.len() != expected {
            return Err(OsdError::invalid_argument(format!(
                "write transfer carries {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
    }
    if burst && selsize == 0 {
        return Err(OsdError::invalid_argument("empty burst transfer"));
    }

    let data = t.data.unwrap_or_default();
    let mut transfer = Vec::with_capacity(2 + aw + data.len());
    let mut hdr0 = 0;
    if t.data.is_some() {
        hdr0 |= HDR0_WE;
    }
    if burst {
        hdr0 |= HDR0_BURST;
    }
    if t.sync {
        hdr0 |= HDR0_SYNC;
    }
    transfer.push(hdr0);
    transfer.push(selsize);
    transfer.extend_from_slice(&t.start_addr.to_be_bytes()[8 - aw..]);
    transfer.extend_from_slice(data);
    Ok(transfer)
}

/// Split a transfer request into event packets of at most `max_words` payload words
///
/// Bytes are packed high byte first; an odd trailing byte is zero padded.
/// All packets but the last are EV_CONT, the last one is EV_LAST.
pub fn packetize_transfer(transfer: &[u8], dest: u16, src: u16, max_words: usize) -> Result<Vec<Packet>> {
    if max_words == 0 {
        return Err(OsdError::invalid_argument("packets without payload cannot carry a transfer"));
    }
    let chunks: Vec<&[u8]> = transfer.chunks(2 * max_words).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let payload = chunk
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
                .collect();
            let subtype = if i == last { EventSubtype::Last } else { EventSubtype::Cont };
            Packet::new_event(dest, src, subtype, payload)
        })
        .collect()
}

fn send_mam_transfer(hostmod: &mut HostMod, desc: &MemoryDescriptor, transfer: &[u8]) -> Result<()> {
    let max_words = hostmod.get_max_event_words(desc.module_addr)? as usize;
    let packets = packetize_transfer(transfer, desc.module_addr, hostmod.diaddr()?, max_words)?;
    trace!(
        module = desc.module_addr,
        bytes = transfer.len(),
        packets = packets.len(),
        "Sending MAM transfer"
    );
    for pkg in &packets {
        hostmod.event_send(pkg)?;
    }
    Ok(())
}

fn mam_write(hostmod: &mut HostMod, desc: &MemoryDescriptor, t: &TransferDescriptor) -> Result<()> {
    let transfer = create_mam_transfer(desc, t)?;
    send_mam_transfer(hostmod, desc, &transfer)?;
    if t.sync {
        hostmod.event_receive_from(desc.module_addr, true)?;
    }
    Ok(())
}

fn mam_read(hostmod: &mut HostMod, desc: &MemoryDescriptor, t: &TransferDescriptor, out: &mut [u8]) -> Result<()> {
    let transfer = create_mam_transfer(desc, t)?;
    send_mam_transfer(hostmod, desc, &transfer)?;

    let mut filled = 0;
    while filled < out.len() {
        let pkg = hostmod.event_receive_from(desc.module_addr, true)?;
        let bytes = pkg.payload().iter().flat_map(|w| w.to_be_bytes());
        for (slot, byte) in out[filled..].iter_mut().zip(bytes) {
            *slot = byte;
            filled += 1;
        }
    }
    Ok(())
}

fn write_single(
    hostmod: &mut HostMod,
    desc: &MemoryDescriptor,
    data: &[u8],
    start_addr: u64,
    sync: bool,
) -> Result<()> {
    let dw = desc.data_width_bytes();
    let baddr = (start_addr % dw as u64) as usize;
    let (word, select) = align_data_to_word(baddr, data, dw)?;
    mam_write(
        hostmod,
        desc,
        &TransferDescriptor {
            sync,
            select: Select::Bytes(select),
            start_addr: start_addr - baddr as u64,
            data: Some(word.as_slice()),
        },
    )
}

fn read_single(hostmod: &mut HostMod, desc: &MemoryDescriptor, out: &mut [u8], start_addr: u64) -> Result<()> {
    let dw = desc.data_width_bytes();
    let baddr = (start_addr % dw as u64) as usize;
    let select = byte_select(baddr, out.len(), dw)?;
    let mut word = vec![0u8; dw];
    mam_read(
        hostmod,
        desc,
        &TransferDescriptor {
            sync: false,
            select: Select::Bytes(select),
            start_addr: start_addr - baddr as u64,
            data: None,
        },
        &mut word,
    )?;
    out.copy_from_slice(&word[baddr..baddr + out.len()]);
    Ok(())
}

/// One burst transfer of a bulk part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstChunk {
    /// Byte offset into the bulk part
    pub offset: usize,
    pub len: usize,
    pub sync: bool,
}

/// Chunk `nbyte` bytes into bursts of at most `MAM_MAX_BURST_WORDS` words;
/// only the last chunk inherits `sync`
pub fn plan_burst(nbyte: usize, dw: usize, sync: bool) -> Vec<BurstChunk> {
    let max_bytes = MAM_MAX_BURST_WORDS * dw.max(1);
    (0..nbyte)
        .step_by(max_bytes)
        .map(|offset| {
            let len = max_bytes.min(nbyte - offset);
            BurstChunk {
                offset,
                len,
                sync: sync && offset + len == nbyte,
            }
        })
        .collect()
}

fn check_burst(desc: &MemoryDescriptor, nbyte: usize, start_addr: u64) -> Result<usize> {
    let dw = desc.data_width_bytes();
    if nbyte % dw != 0 || start_addr % dw as u64 != 0 {
        return Err(OsdError::invalid_argument(format!(
            "burst of {} bytes at {:#x} is not made of whole aligned {} byte words",
            nbyte, start_addr, dw
        )));
    }
    Ok(dw)
}

fn write_burst(
    hostmod: &mut HostMod,
    desc: &MemoryDescriptor,
    data: &[u8],
    start_addr: u64,
    sync: bool,
) -> Result<()> {
    let dw = check_burst(desc, data.len(), start_addr)?;
    for chunk in plan_burst(data.len(), dw, sync) {
        mam_write(
            hostmod,
            desc,
            &TransferDescriptor {
                sync: chunk.sync,
                select: Select::Burst((chunk.len / dw) as u8),
                start_addr: start_addr + chunk.offset as u64,
                data: Some(&data[chunk.offset..chunk.offset + chunk.len]),
            },
        )?;
    }
    Ok(())
}

fn read_burst(hostmod: &mut HostMod, desc: &MemoryDescriptor, out: &mut [u8], start_addr: u64) -> Result<()> {
    let dw = check_burst(desc, out.len(), start_addr)?;
    for chunk in plan_burst(out.len(), dw, false) {
        mam_read(
            hostmod,
            desc,
            &TransferDescriptor {
                sync: false,
                select: Select::Burst((chunk.len / dw) as u8),
                start_addr: start_addr + chunk.offset as u64,
                data: None,
            },
            &mut out[chunk.offset..chunk.offset + chunk.len],
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Single,
    Burst,
}

/// Sub-transfers of a byte range as (offset, length, kind)
///
/// A short range that straddles a word boundary is split into two
/// single-word accesses.
fn sub_transfers(start_addr: u64, nbyte: usize, dw: usize) -> Vec<(usize, usize, PartKind)> {
    let parts = calculate_parts(start_addr, nbyte, dw);
    let mut subs = Vec::with_capacity(4);

    let baddr = (start_addr % dw as u64) as usize;
    if parts.prolog > 0 && baddr + parts.prolog > dw {
        let head = dw - baddr;
        subs.push((0, head, PartKind::Single));
        subs.push((head, parts.prolog - head, PartKind::Single));
    } else if parts.prolog > 0 {
        subs.push((0, parts.prolog, PartKind::Single));
    }
    if parts.bulk > 0 {
        subs.push((parts.prolog, parts.bulk, PartKind::Burst));
    }
    if parts.epilog > 0 {
        subs.push((parts.prolog + parts.bulk, parts.epilog, PartKind::Single));
    }
    subs
}

/// Write `data` to target memory at `start_addr` and wait until it is written
pub fn write(hostmod: &mut HostMod, desc: &MemoryDescriptor, data: &[u8], start_addr: u64) -> Result<()> {
    write_with(hostmod, desc, data, start_addr, true)
}

/// Write without waiting for the MAM to acknowledge completion
pub fn write_posted(hostmod: &mut HostMod, desc: &MemoryDescriptor, data: &[u8], start_addr: u64) -> Result<()> {
    write_with(hostmod, desc, data, start_addr, false)
}

fn write_with(
    hostmod: &mut HostMod,
    desc: &MemoryDescriptor,
    data: &[u8],
    start_addr: u64,
    sync: bool,
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    desc.check_range(start_addr, data.len() as u64)?;
    debug!(module = desc.module_addr, start_addr, nbyte = data.len(), sync, "MAM write");

    let subs = sub_transfers(start_addr, data.len(), desc.data_width_bytes());
    let last = subs.len() - 1;
    for (i, &(offset, len, kind)) in subs.iter().enumerate() {
        let part = &data[offset..offset + len];
        let addr = start_addr + offset as u64;
        let part_sync = sync && i == last;
        match kind {
            PartKind::Single => write_single(hostmod, desc, part, addr, part_sync)?,
            PartKind::Burst => write_burst(hostmod, desc, part, addr, part_sync)?,
        }
    }
    Ok(())
}

/// Fill `out` from target memory starting at `start_addr`
pub fn read(hostmod: &mut HostMod, desc: &MemoryDescriptor, out: &mut [u8], start_addr: u64) -> Result<()> {
    if out.is_empty() {
        return Ok(());
    }
    desc.check_range(start_addr, out.len() as u64)?;
    debug!(module = desc.module_addr, start_addr, nbyte = out.len(), "MAM read");

    for (offset, len, kind) in sub_transfers(start_addr, out.len(), desc.data_width_bytes()) {
        let part = &mut out[offset..offset + len];
        let addr = start_addr + offset as u64;
        match kind {
            PartKind::Single => read_single(hostmod, desc, part, addr)?,
            PartKind::Burst => read_burst(hostmod, desc, part, addr)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn desc(aw: u16, dw: u16) -> MemoryDescriptor {
        MemoryDescriptor::new(3, aw, dw, vec![]).unwrap()
    }

    #[test]
    fn parts_for_unaligned_start() {
        assert_eq!(
            calculate_parts(2, 10, 4),
            TransferParts { prolog: 2, bulk: 8, epilog: 0 }
        );
        assert_eq!(
            calculate_parts(0, 10, 4),
            TransferParts { prolog: 0, bulk: 8, epilog: 2 }
        );
        assert_eq!(
            calculate_parts(5, 3, 4),
            TransferParts { prolog: 3, bulk: 0, epilog: 0 }
        );
    }

    #[test]
    fn byte_select_masks() {
        assert_eq!(byte_select(0, 4, 4).unwrap(), 0b1111);
        assert_eq!(byte_select(1, 2, 4).unwrap(), 0b0110);
        assert_eq!(byte_select(7, 1, 8).unwrap(), 0b1000_0000);
        assert!(byte_select(3, 2, 4).is_err());
        assert!(byte_select(0, 0, 4).is_err());

        let (word, select) = align_data_to_word(2, &[0xaa, 0xbb], 4).unwrap();
        assert_eq!(word, vec![0, 0, 0xaa, 0xbb]);
        assert_eq!(select, 0b1100);
    }

    #[test]
    fn boundary_crossing_prolog_is_split() {
        assert_eq!(
            sub_transfers(3, 2, 4),
            vec![(0, 1, PartKind::Single), (1, 1, PartKind::Single)]
        );
        assert_eq!(
            sub_transfers(1, 12, 4),
            vec![
                (0, 3, PartKind::Single),
                (3, 8, PartKind::Burst),
                (11, 1, PartKind::Single)
            ]
        );
    }

    #[test]
    fn transfer_encoding() {
        let d = desc(32, 16);
        let write = TransferDescriptor {
            sync: true,
            select: Select::Burst(2),
            start_addr: 0x1234_5678,
            data: Some(&[1u8, 2, 3, 4][..]),
        };
        assert_eq!(
            create_mam_transfer(&d, &write).unwrap(),
            vec![0xe0, 2, 0x12, 0x34, 0x56, 0x78, 1, 2, 3, 4]
        );

        let read = TransferDescriptor {
            sync: false,
            select: Select::Bytes(0b01),
            start_addr: 0x10,
            data: None,
        };
        assert_eq!(create_mam_transfer(&d, &read).unwrap(), vec![0x00, 0b01, 0, 0, 0, 0x10]);
    }

    #[test]
    fn transfer_contract_violations() {
        let d = desc(16, 32);
        let unaligned = TransferDescriptor {
            sync: false,
            select: Select::Burst(1),
            start_addr: 2,
            data: None,
        };
        assert!(matches!(
            create_mam_transfer(&d, &unaligned),
            Err(OsdError::InvalidArgument { .. })
        ));
        let too_wide = TransferDescriptor {
            start_addr: 0x1_0000,
            ..unaligned
        };
        assert!(create_mam_transfer(&d, &too_wide).is_err());
        let short_write = TransferDescriptor {
            start_addr: 0,
            data: Some(&[1u8, 2][..]),
            ..unaligned
        };
        assert!(create_mam_transfer(&d, &short_write).is_err());
    }

    #[test]
    fn transfers_are_split_into_cont_and_last_packets() {
        let transfer: Vec<u8> = (0..23).collect();
        let packets = packetize_transfer(&transfer, 3, 1, 5).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].event_subtype(), Some(EventSubtype::Cont));
        assert_eq!(packets[1].event_subtype(), Some(EventSubtype::Cont));
        assert_eq!(packets[2].event_subtype(), Some(EventSubtype::Last));
        assert!(packets.iter().all(|p| p.payload().len() <= 5 && p.dest() == 3 && p.src() == 1));

        let bytes: Vec<u8> = packets
            .iter()
            .flat_map(|p| p.payload().iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<_>>())
            .collect();
        assert_eq!(&bytes[..23], &transfer[..]);
        assert_eq!(bytes[23], 0);
    }

    #[test]
    fn bursts_are_capped_at_255_words() {
        let one = plan_burst(1000, 4, true);
        assert_eq!(one, vec![BurstChunk { offset: 0, len: 1000, sync: true }]);

        let two = plan_burst(2000, 4, true);
        assert_eq!(two.len(), 2);
        assert_eq!(two[0], BurstChunk { offset: 0, len: 1020, sync: false });
        assert_eq!(two[1], BurstChunk { offset: 1020, len: 980, sync: true });
        assert!(plan_burst(2000, 4, false).iter().all(|c| !c.sync));
    }

    #[test]
    fn descriptor_validation_and_regions() {
        assert!(matches!(
            MemoryDescriptor::new(3, 12, 32, vec![]),
            Err(OsdError::WrongModule { addr: 3, .. })
        ));
        assert!(MemoryDescriptor::new(3, 32, 128, vec![]).is_err());
        let regions = vec![Region { base_addr: 0, size: 0 }; 9];
        assert!(MemoryDescriptor::new(3, 32, 32, regions).is_err());

        let d = MemoryDescriptor::new(
            3,
            32,
            32,
            vec![Region { base_addr: 0x1000, size: 0x100 }],
        )
        .unwrap();
        assert!(d.check_range(0x1000, 0x100).is_ok());
        assert!(d.check_range(0x10f0, 0x20).is_err());
        assert!(d.check_range(0x0, 1).is_err());
        assert!(desc(32, 32).check_range(u64::MAX, 1).is_ok());
    }

    proptest! {
        #[test]
        fn parts_cover_the_range(start in any::<u64>(), nbyte in 0usize..10_000, dw_exp in 0u32..4) {
            let dw = 1usize << dw_exp;
            let p = calculate_parts(start, nbyte, dw);
            prop_assert_eq!(p.prolog + p.bulk + p.epilog, nbyte);
            if nbyte < dw {
                prop_assert_eq!(p, TransferParts { prolog: nbyte, bulk: 0, epilog: 0 });
            } else {
                prop_assert_eq!(p.bulk % dw, 0);
                prop_assert!(p.prolog < dw);
                prop_assert!(p.epilog < dw);
                prop_assert_eq!((start as u128 + p.prolog as u128) % dw as u128, 0);
            }
        }

        #[test]
        fn sub_transfers_never_cross_words(start in 0u64..1 << 40, nbyte in 1usize..64, dw_exp in 0u32..4) {
            let dw = 1usize << dw_exp;
            let subs = sub_transfers(start, nbyte, dw);
            prop_assert_eq!(subs.iter().map(|s| s.1).sum::<usize>(), nbyte);
            for (offset, len, kind) in subs {
                let addr = start + offset as u64;
                match kind {
                    PartKind::Single => prop_assert!((addr % dw as u64) as usize + len <= dw),
                    PartKind::Burst => {
                        prop_assert_eq!(addr % dw as u64, 0);
                        prop_assert_eq!(len % dw, 0);
                    }
                }
            }
        }
    }
}
