// Debug interconnect packet codec - pure data structures, no I/O
use crate::error::{OsdError, Result};
use crate::types::{EventSubtype, PacketType, RegSubtype};
use std::fmt;
use std::io::{self, Read, Write};

/// Number of header words in a packet (DEST, SRC and FLAGS)
pub const HEADER_WORDS: usize = 3;

/// Largest packet expressible by the 16 bit size field
pub const MAX_DATA_WORDS: usize = u16::MAX as usize;

// FLAGS word layout
const TYPE_SHIFT: u16 = 14;
const TYPE_MASK: u16 = 0b11;
const TYPE_SUB_SHIFT: u16 = 10;
const TYPE_SUB_MASK: u16 = 0b1111;

/// Number of data words (header included) needed for `payload_words`
pub fn data_words_for(payload_words: usize) -> usize {
    payload_words + HEADER_WORDS
}

/// Number of payload words in a packet of `data_words` data words
pub fn payload_words_for(data_words: usize) -> Result<usize> {
    data_words.checked_sub(HEADER_WORDS).ok_or_else(|| {
        OsdError::invalid_argument(format!(
            "a packet needs at least {} data words, got {}",
            HEADER_WORDS, data_words
        ))
    })
}

/// A single packet on the debug interconnect
///
/// The data words of a packet are `[dest, src, flags, payload...]`; the
/// total size is implied by the payload length and never stored separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    dest: u16,
    src: u16,
    flags: u16,
    payload: Vec<u16>,
}

impl Packet {
    /// Allocate a zeroed packet of `total_words` data words (header included)
    pub fn new(total_words: usize) -> Result<Self> {
        let payload_words = payload_words_for(total_words)?;
        if total_words > MAX_DATA_WORDS {
            return Err(OsdError::invalid_argument(format!(
                "packet of {} words exceeds the {} word limit",
                total_words, MAX_DATA_WORDS
            )));
        }
        Ok(Packet {
            dest: 0,
            src: 0,
            flags: 0,
            payload: vec![0; payload_words],
        })
    }

    /// Build a packet with header and payload in one go
    pub fn with_header(
        dest: u16,
        src: u16,
        packet_type: PacketType,
        type_sub: u8,
        payload: Vec<u16>,
    ) -> Result<Self> {
        if data_words_for(payload.len()) > MAX_DATA_WORDS {
            return Err(OsdError::invalid_argument(format!(
                "payload of {} words does not fit into a packet",
                payload.len()
            )));
        }
        let mut pkg = Packet {
            dest: 0,
            src: 0,
            flags: 0,
            payload,
        };
        pkg.set_header(dest, src, packet_type, type_sub)?;
        Ok(pkg)
    }

    pub fn new_reg(dest: u16, src: u16, subtype: RegSubtype, payload: Vec<u16>) -> Result<Self> {
        Self::with_header(dest, src, PacketType::Reg, subtype as u8, payload)
    }

    pub fn new_event(dest: u16, src: u16, subtype: EventSubtype, payload: Vec<u16>) -> Result<Self> {
        Self::with_header(dest, src, PacketType::Event, subtype as u8, payload)
    }

    /// Populate all header fields. TYPE_SUB must fit its 4 bit field.
    pub fn set_header(&mut self, dest: u16, src: u16, packet_type: PacketType, type_sub: u8) -> Result<()> {
        check_type_sub(type_sub)?;
        self.dest = dest;
        self.src = src;
        self.flags = ((packet_type as u16 & TYPE_MASK) << TYPE_SHIFT)
            | ((type_sub as u16 & TYPE_SUB_MASK) << TYPE_SUB_SHIFT);
        Ok(())
    }

    pub fn set_type_sub(&mut self, type_sub: u8) -> Result<()> {
        check_type_sub(type_sub)?;
        self.flags &= !(TYPE_SUB_MASK << TYPE_SUB_SHIFT);
        self.flags |= (type_sub as u16 & TYPE_SUB_MASK) << TYPE_SUB_SHIFT;
        Ok(())
    }

    pub fn dest(&self) -> u16 {
        self.dest
    }

    pub fn src(&self) -> u16 {
        self.src
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn packet_type(&self) -> PacketType {
        PacketType::from_bits(((self.flags >> TYPE_SHIFT) & TYPE_MASK) as u8)
    }

    pub fn type_sub(&self) -> u8 {
        ((self.flags >> TYPE_SUB_SHIFT) & TYPE_SUB_MASK) as u8
    }

    pub fn reg_subtype(&self) -> Option<RegSubtype> {
        match self.packet_type() {
            PacketType::Reg => RegSubtype::from_u8(self.type_sub()),
            _ => None,
        }
    }

    pub fn event_subtype(&self) -> Option<EventSubtype> {
        match self.packet_type() {
            PacketType::Event => EventSubtype::from_u8(self.type_sub()),
            _ => None,
        }
    }

    /// Data words in the packet, header included
    pub fn total_words(&self) -> usize {
        data_words_for(self.payload.len())
    }

    pub fn payload(&self) -> &[u16] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u16] {
        &mut self.payload
    }

    /// Iterate over all data words, header first
    pub fn data_words(&self) -> impl Iterator<Item = u16> + '_ {
        [self.dest, self.src, self.flags]
            .into_iter()
            .chain(self.payload.iter().copied())
    }

    /// Append the payload of `second` to this packet, ignoring its header
    pub fn combine(mut self, second: &Packet) -> Result<Packet> {
        let new_words = self.total_words() + second.payload.len();
        if new_words > MAX_DATA_WORDS {
            return Err(OsdError::invalid_argument(format!(
                "combined packet of {} words exceeds the {} word limit",
                new_words, MAX_DATA_WORDS
            )));
        }
        self.payload
            .try_reserve_exact(second.payload.len())
            .map_err(|_| OsdError::AllocationFailure { words: new_words })?;
        self.payload.extend_from_slice(&second.payload);
        Ok(self)
    }

    /// Serialize into a transport data frame (little-endian words)
    pub fn to_frame(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_words() * 2);
        for word in self.data_words() {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Parse a transport data frame
    pub fn from_frame(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(OsdError::invalid_argument(format!(
                "packet frame of {} bytes is not a whole number of words",
                bytes.len()
            )));
        }
        let words: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect();
        if words.len() < HEADER_WORDS || words.len() > MAX_DATA_WORDS {
            return Err(OsdError::invalid_argument(format!(
                "packet frame of {} words is out of range",
                words.len()
            )));
        }
        Ok(Packet {
            dest: words[0],
            src: words[1],
            flags: words[2],
            payload: words[HEADER_WORDS..].to_vec(),
        })
    }

    /// Write the packet to a stream: size word followed by the data words
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        // total_words() <= MAX_DATA_WORDS by construction
        writer.write_all(&(self.total_words() as u16).to_le_bytes())?;
        writer.write_all(&self.to_frame())
    }

    /// Read a packet previously written with `write_to`
    ///
    /// Returns `Ok(None)` when the stream ends before the next packet.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut size = [0u8; 2];
        match reader.read_exact(&mut size) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let data_words = u16::from_le_bytes(size) as usize;
        let mut data = vec![0u8; data_words * 2];
        reader.read_exact(&mut data)?;
        Self::from_frame(&data).map(Some)
    }
}

fn check_type_sub(type_sub: u8) -> Result<()> {
    if type_sub as u16 & TYPE_SUB_MASK != type_sub as u16 {
        return Err(OsdError::invalid_argument(format!(
            "TYPE_SUB {} does not fit into 4 bits",
            type_sub
        )));
    }
    Ok(())
}

// Human-readable dump, for debugging only. Do not parse.
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Packet of {} data words:", self.total_words())?;
        writeln!(
            f,
            "DEST = {}, SRC = {}, TYPE = {} ({}), TYPE_SUB = {}",
            self.dest,
            self.src,
            self.packet_type() as u8,
            self.packet_type(),
            self.type_sub()
        )?;
        writeln!(f, "Packet data (including header):")?;
        for word in self.data_words() {
            writeln!(f, "  {:#06x}", word)?;
        }
        Ok(())
    }
}
