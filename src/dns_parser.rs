//! DNS message framing.
//!
//! [DnsRecordParser] walks an incoming packet: it skips questions and reads
//! resource records, handing out the raw rdata together with its offset so that
//! [RecordRdata](crate::RecordRdata) can follow compressed names.
//! [DnsOutgoing] is the logic representation of an outgoing DNS message and
//! [DnsOutPacket] is its encoded form.

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::{
    error::{Error, Result},
    record_rdata::ParsedRecord,
};
use std::{collections::HashMap, fmt, str};

/// DNS resource record types, stored as `u16`. Can do `as u16` when needed.
///
/// See [RFC 1035 section 3.2.2](https://datatracker.ietf.org/doc/html/rfc1035#section-3.2.2)
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[non_exhaustive]
#[repr(u16)]
pub enum RRType {
    /// DNS record type for IPv4 address
    A = 1,

    /// DNS record type for Canonical Name
    CNAME = 5,

    /// DNS record type for Pointer
    PTR = 12,

    /// DNS record type for Text (properties)
    TXT = 16,

    /// DNS record type for IPv6 address
    AAAA = 28,

    /// DNS record type for Service
    SRV = 33,

    /// DNS record type for Negative Responses
    NSEC = 47,

    /// DNS record type for any records (wildcard)
    ANY = 255,
}

impl RRType {
    /// Converts `u16` into `RRType` if possible.
    pub const fn from_u16(value: u16) -> Option<RRType> {
        match value {
            1 => Some(RRType::A),
            5 => Some(RRType::CNAME),
            12 => Some(RRType::PTR),
            16 => Some(RRType::TXT),
            28 => Some(RRType::AAAA),
            33 => Some(RRType::SRV),
            47 => Some(RRType::NSEC),
            255 => Some(RRType::ANY),
            _ => None,
        }
    }
}

impl fmt::Display for RRType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RRType::A => write!(f, "TYPE_A"),
            RRType::CNAME => write!(f, "TYPE_CNAME"),
            RRType::PTR => write!(f, "TYPE_PTR"),
            RRType::TXT => write!(f, "TYPE_TXT"),
            RRType::AAAA => write!(f, "TYPE_AAAA"),
            RRType::SRV => write!(f, "TYPE_SRV"),
            RRType::NSEC => write!(f, "TYPE_NSEC"),
            RRType::ANY => write!(f, "TYPE_ANY"),
        }
    }
}

/// The class value for the Internet.
pub const CLASS_IN: u16 = 1;

/// mDNS reuses the top bit of the class field, so only the low 15 bits
/// identify the class.
pub const CLASS_MASK: u16 = 0x7FFF;

/// Max size of UDP datagram payload.
///
/// It is calculated as: 9000 bytes - IP header 20 bytes - UDP header 8 bytes.
/// Reference: [RFC6762 section 17](https://datatracker.ietf.org/doc/html/rfc6762#section-17)
pub const MAX_MSG_ABSOLUTE: usize = 8972;

pub(crate) const MSG_HEADER_LEN: usize = 12;

/// Max length of a label, RFC 1035 section 2.3.4.
const MAX_LABEL_LEN: usize = 63;

/// Max length of a decoded name, RFC 1035 section 2.3.4.
const MAX_NAME_LEN: usize = 255;

/// Length of TYPE, CLASS, TTL and RDLENGTH following the record name.
const RR_FIXED_LEN: usize = 10;

// Definitions for DNS message header "flags" field
//
// The "flags" field is 16-bit long, in this format:
// (RFC 1035 section 4.1.1)
//
//   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
// |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
//
pub const FLAGS_QR_MASK: u16 = 0x8000; // mask for query/response bit

/// Flag bit to indicate a query
pub const FLAGS_QR_QUERY: u16 = 0x0000;

/// Flag bit to indicate a response
pub const FLAGS_QR_RESPONSE: u16 = 0x8000;

/// Flag bit for Authoritative Answer
pub const FLAGS_AA: u16 = 0x0400;

/// Returns the form of `name` used as a lookup key: no trailing dot, ASCII lowercase.
///
/// DNS names compare case-insensitively (RFC 1035 section 2.3.3).
pub(crate) fn canonical_name(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// The fixed 12-byte header of a DNS message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub num_questions: u16,
    pub num_answers: u16,
    pub num_authorities: u16,
    pub num_additionals: u16,
}

impl DnsHeader {
    /// Reads the header at the start of `data`.
    ///
    /// The header format is based on RFC 1035 section 4.1.1:
    /// https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
    //
    //                                  1  1  1  1  1  1
    //    0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //    |                      ID                       |
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //    |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //    |                    QDCOUNT                    |
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //    |                    ANCOUNT                    |
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //    |                    NSCOUNT                    |
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //    |                    ARCOUNT                    |
    //    +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MSG_HEADER_LEN {
            return Err(Error::Msg(format!(
                "DNS incoming: header is too short: {} bytes",
                data.len()
            )));
        }

        let header = Self {
            id: u16_from_be_slice(&data[..2]),
            flags: u16_from_be_slice(&data[2..4]),
            num_questions: u16_from_be_slice(&data[4..6]),
            num_answers: u16_from_be_slice(&data[6..8]),
            num_authorities: u16_from_be_slice(&data[8..10]),
            num_additionals: u16_from_be_slice(&data[10..12]),
        };

        trace!(
            "read_header: id {}, {} questions {} answers {} authorities {} additionals",
            header.id,
            header.num_questions,
            header.num_answers,
            header.num_authorities,
            header.num_additionals
        );
        Ok(header)
    }

    pub const fn is_query(&self) -> bool {
        (self.flags & FLAGS_QR_MASK) == FLAGS_QR_QUERY
    }

    pub const fn is_response(&self) -> bool {
        (self.flags & FLAGS_QR_MASK) == FLAGS_QR_RESPONSE
    }

    /// Number of resource records in the answer, authority and additional sections.
    pub fn num_records(&self) -> usize {
        self.num_answers as usize + self.num_authorities as usize + self.num_additionals as usize
    }
}

/// One resource record as framed on the wire, with its rdata still undecoded.
///
/// RFC 1035: https://datatracker.ietf.org/doc/html/rfc1035#section-3.2.1
///
/// ```text
///  NAME | TYPE(2) | CLASS(2) | TTL(4) | RDLENGTH(2) | RDATA(RDLENGTH)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord<'a> {
    pub name: String,
    pub rr_type: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: &'a [u8],

    /// Offset of `rdata` from the start of the message.
    pub rdata_offset: usize,
}

/// A cursor over one whole DNS message.
///
/// Reading never panics: every length and pointer is checked against the
/// message before it is followed.
#[derive(Debug, Clone)]
pub struct DnsRecordParser<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DnsRecordParser<'a> {
    /// Creates a parser over `data`, positioned at `offset`.
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Current position within the message.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn at_end(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Reads a domain name starting at `pos`, following compression pointers.
    ///
    /// Returns the dot-joined labels (no trailing dot) and the number of bytes
    /// the name occupies at `pos`. Does not move the cursor.
    ///
    /// See https://datatracker.ietf.org/doc/html/rfc1035#section-3.1 for
    /// domain name encoding, and section 4.1.4 for compression.
    pub fn read_name(&self, pos: usize) -> Option<(String, usize)> {
        let data = self.data;
        let mut offset = pos;
        let mut name = String::new();
        let mut consumed = None;

        // Each byte examined counts once, so even a cycle of pointers that all
        // point backwards cannot run longer than the message.
        let mut seen = 0;

        loop {
            let length = *data.get(offset)?;

            // Check the first 2 bits for possible "Message compression".
            match length & 0xC0 {
                0x00 => {
                    if length == 0 {
                        // The end of the name.
                        if consumed.is_none() {
                            consumed = Some(offset + 1 - pos);
                        }
                        break;
                    }

                    let begin = offset + 1;
                    let ending = begin + length as usize;
                    let Some(label) = data.get(begin..ending) else {
                        trace!(
                            "read_name: ending {} exceeds data length {}",
                            ending,
                            data.len()
                        );
                        return None;
                    };
                    let Ok(label) = str::from_utf8(label) else {
                        trace!("read_name: label at {} is not utf8", begin);
                        return None;
                    };
                    if label.contains('.') {
                        trace!("read_name: label at {} contains a dot", begin);
                        return None;
                    }

                    if !name.is_empty() {
                        name.push('.');
                    }
                    name.push_str(label);
                    if name.len() > MAX_NAME_LEN {
                        trace!("read_name: name too long at offset {}", offset);
                        return None;
                    }

                    seen += length as usize + 1;
                    offset = ending;
                }
                0xC0 => {
                    let slice = data.get(offset..offset + 2)?;
                    let pointer = (u16_from_be_slice(slice) & 0x3FFF) as usize;
                    if pointer >= offset {
                        trace!(
                            "Invalid name compression: pointer {} must be less than its offset {}",
                            pointer,
                            offset
                        );
                        return None;
                    }

                    // A pointer marks the end of a domain name.
                    if consumed.is_none() {
                        consumed = Some(offset + 2 - pos);
                    }

                    seen += 2;
                    offset = pointer;
                }
                _ => {
                    trace!(
                        "Bad name with invalid length: 0x{:x} offset {}",
                        length,
                        offset
                    );
                    return None;
                }
            }

            if seen > data.len() {
                trace!("read_name: exceeded message length following {}", pos);
                return None;
            }
        }

        consumed.map(|consumed| (name, consumed))
    }

    /// Skips one entry of the question section.
    pub fn skip_question(&mut self) -> bool {
        let Some((_, consumed)) = self.read_name(self.offset) else {
            return false;
        };
        let end = self.offset + consumed + 4; // QTYPE and QCLASS
        if end > self.data.len() {
            return false;
        }
        self.offset = end;
        true
    }

    /// Reads the resource record at the cursor and moves past it.
    ///
    /// On failure the cursor stays where it was: the framing of the rest of
    /// the message cannot be trusted.
    pub fn read_record(&mut self) -> Option<ResourceRecord<'a>> {
        let (name, consumed) = self.read_name(self.offset)?;
        let fixed_start = self.offset + consumed;
        let fixed = self.data.get(fixed_start..fixed_start + RR_FIXED_LEN)?;

        let rr_type = u16_from_be_slice(&fixed[..2]);
        let class = u16_from_be_slice(&fixed[2..4]);
        let ttl = u32_from_be_slice(&fixed[4..8]);
        let rdata_len = u16_from_be_slice(&fixed[8..10]) as usize;

        let rdata_offset = fixed_start + RR_FIXED_LEN;
        let Some(rdata) = self.data.get(rdata_offset..rdata_offset + rdata_len) else {
            trace!(
                "read_record: rdata of {} bytes at {} overruns the message of {}",
                rdata_len,
                rdata_offset,
                self.data.len()
            );
            return None;
        };

        self.offset = rdata_offset + rdata_len;
        Some(ResourceRecord {
            name,
            rr_type,
            class,
            ttl,
            rdata,
            rdata_offset,
        })
    }
}

/// A single packet for outgoing DNS message.
pub struct DnsOutPacket {
    /// All bytes in `data` concatenated is the actual packet on the wire.
    data: Vec<Vec<u8>>,

    /// Current logical size of the packet. It starts with the size of the mandatory header.
    size: usize,

    /// k: name, v: offset. Stays empty when compression is off.
    names: HashMap<String, u16>,

    compress: bool,
}

impl DnsOutPacket {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            size: MSG_HEADER_LEN, // Header is mandatory.
            names: HashMap::new(),
            compress: true,
        }
    }

    /// A bare buffer with no header and no name compression, used to encode
    /// rdata on its own.
    pub(crate) fn uncompressed() -> Self {
        Self {
            data: Vec::new(),
            size: 0,
            names: HashMap::new(),
            compress: false,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.concat()
    }

    fn write_question(&mut self, name: &str, qtype: RRType) {
        self.write_name(name);
        self.write_short(qtype as u16);
        self.write_short(CLASS_IN);
    }

    /// Writes a record (answer, authoritative answer, additional).
    fn write_record(&mut self, record: &ParsedRecord) {
        self.write_name(record.name());
        self.write_short(record.rr_type() as u16);
        self.write_short(record.class());
        self.write_u32(record.ttl());

        let index = self.data.len();

        // Adjust size for the short we will write before this record
        self.size += 2;
        record.rdata().write(self);
        self.size -= 2;

        let length: usize = self.data[index..].iter().map(|x| x.len()).sum();
        self.insert_short(index, length as u16);
    }

    fn insert_short(&mut self, index: usize, value: u16) {
        self.data.insert(index, value.to_be_bytes().to_vec());
        self.size += 2;
    }

    // Write name to packet
    //
    // [RFC1035]
    // 4.1.4. Message compression
    //
    // The pointer takes the form of a two octet sequence:
    //     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    //     | 1  1|                OFFSET                   |
    //     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    // The OFFSET field specifies an offset from the start of the message.
    pub(crate) fn write_name(&mut self, name: &str) {
        const POINTER_MASK: u16 = 0xC000;

        // ignore the ending "." if exists
        let name = name.strip_suffix('.').unwrap_or(name);
        let end = name.len();

        let mut here = 0;
        while here < end {
            let remaining = &name[here..end];

            // Check if 'remaining' already appeared in this message
            if let Some(offset) = self.names.get(remaining) {
                let pointer = *offset | POINTER_MASK;
                self.write_short(pointer);
                return;
            }

            // Remember the remaining parts so we can point to it.
            // Offsets beyond 14 bits cannot be expressed as a pointer.
            if self.compress && self.size <= 0x3FFF {
                self.names.insert(remaining.to_string(), self.size as u16);
            }

            // Find the current label to write into the packet
            let stop = remaining.find('.').map_or(end, |i| here + i);
            self.write_utf8(&name[here..stop]);

            here = stop + 1; // move past the current label
        }

        self.write_byte(0); // name ends with 0 if not using a pointer
    }

    fn write_utf8(&mut self, utf: &str) {
        debug_assert!(utf.len() <= MAX_LABEL_LEN);
        self.write_byte(utf.len() as u8);
        self.write_bytes(utf.as_bytes());
    }

    pub(crate) fn write_bytes(&mut self, s: &[u8]) {
        self.data.push(s.to_vec());
        self.size += s.len();
    }

    fn write_u32(&mut self, int: u32) {
        self.data.push(int.to_be_bytes().to_vec());
        self.size += 4;
    }

    pub(crate) fn write_short(&mut self, short: u16) {
        self.data.push(short.to_be_bytes().to_vec());
        self.size += 2;
    }

    pub(crate) fn write_byte(&mut self, byte: u8) {
        self.data.push(vec![byte]);
        self.size += 1;
    }

    /// Writes the header fields and finish the packet.
    /// This function should be only called when finishing a packet.
    fn write_header(&mut self, id: u16, flags: u16, counts: [u16; 4]) {
        for count in counts.iter().rev() {
            self.insert_short(0, *count);
        }
        self.insert_short(0, flags);
        self.insert_short(0, id);

        // Adjust the size as it was already initialized to include the header.
        self.size -= MSG_HEADER_LEN;
    }
}

/// Checks that `name` can be written as labels: each label 1 to 63 bytes,
/// the whole name at most 255 bytes.
pub(crate) fn check_name(name: &str) -> Result<()> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.len() > MAX_NAME_LEN {
        return Err(Error::Msg(format!("name is too long: {}", name)));
    }
    if !trimmed.is_empty() {
        if let Some(label) = trimmed
            .split('.')
            .find(|label| label.is_empty() || label.len() > MAX_LABEL_LEN)
        {
            return Err(Error::Msg(format!(
                "invalid label '{}' in name: {}",
                label, name
            )));
        }
    }
    Ok(())
}

/// Representation of one outgoing DNS message.
pub struct DnsOutgoing {
    flags: u16,
    id: u16,
    questions: Vec<(String, RRType)>,
    answers: Vec<ParsedRecord>,
    additionals: Vec<ParsedRecord>,
}

impl DnsOutgoing {
    pub fn new(flags: u16) -> Self {
        Self {
            flags,
            id: 0,
            questions: Vec::new(),
            answers: Vec::new(),
            additionals: Vec::new(),
        }
    }

    pub fn add_question(&mut self, name: &str, qtype: RRType) -> Result<()> {
        check_name(name)?;
        self.questions.push((name.to_string(), qtype));
        Ok(())
    }

    pub fn add_answer(&mut self, record: ParsedRecord) -> Result<()> {
        check_record(&record)?;
        self.answers.push(record);
        Ok(())
    }

    pub fn add_additional_answer(&mut self, record: ParsedRecord) -> Result<()> {
        check_record(&record)?;
        self.additionals.push(record);
        Ok(())
    }

    /// Returns the packet data to be sent on the wire.
    pub fn to_data_on_wire(&self) -> Result<Vec<u8>> {
        let mut packet = DnsOutPacket::new();

        for (name, qtype) in self.questions.iter() {
            packet.write_question(name, *qtype);
        }
        for record in self.answers.iter().chain(self.additionals.iter()) {
            packet.write_record(record);
        }

        if packet.size() > MAX_MSG_ABSOLUTE {
            return Err(Error::Msg(format!(
                "outgoing message of {} bytes exceeds the max {}",
                packet.size(),
                MAX_MSG_ABSOLUTE
            )));
        }

        packet.write_header(
            self.id,
            self.flags,
            [
                self.questions.len() as u16,
                self.answers.len() as u16,
                0,
                self.additionals.len() as u16,
            ],
        );
        Ok(packet.to_bytes())
    }
}

fn check_record(record: &ParsedRecord) -> Result<()> {
    check_name(record.name())?;
    record.rdata().validate()
}

const fn u16_from_be_slice(bytes: &[u8]) -> u16 {
    let u8_array: [u8; 2] = [bytes[0], bytes[1]];
    u16::from_be_bytes(u8_array)
}

const fn u32_from_be_slice(s: &[u8]) -> u32 {
    let u8_array: [u8; 4] = [s[0], s[1], s[2], s[3]];
    u32::from_be_bytes(u8_array)
}
