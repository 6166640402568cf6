//! Typed payloads of the resource records an mDNS client cares about.
//!
//! [RecordRdata::parse] is the single entry point: it switches on the wire type
//! and decodes the bounded rdata slice, reaching back into the whole message
//! only to follow compressed names.

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::{
    dns_parser::{
        check_name, DnsOutPacket, DnsRecordParser, RRType, ResourceRecord, CLASS_IN, CLASS_MASK,
    },
    error::{Error, Result},
};
use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
};

/// Fixed part of SRV rdata: priority, weight and port.
const SRV_FIXED_LEN: usize = 6;

/// RFC 6762 section 6.1: the bitmap block holds at most 32 bytes.
const NSEC_BITMAP_MAX_LEN: usize = 32;

/// A TXT string is prefixed by a single length byte.
const TXT_STRING_MAX_LEN: usize = u8::MAX as usize;

/// SRV rdata, RFC 2782.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRdata {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// NSEC rdata as used by mDNS, RFC 6762 section 6.1: a next domain name and a
/// single type bitmap block (window 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsecRdata {
    next_domain: String,
    bitmap: Vec<u8>,
}

impl NsecRdata {
    pub fn new(next_domain: &str, bitmap: Vec<u8>) -> Self {
        Self {
            next_domain: next_domain.to_string(),
            bitmap,
        }
    }

    /// Builds the rdata asserting that exactly `types` exist for the name.
    pub fn from_types(next_domain: &str, types: &[RRType]) -> Self {
        let len = types
            .iter()
            .map(|ty| *ty as usize / 8 + 1)
            .max()
            .unwrap_or(1)
            .min(NSEC_BITMAP_MAX_LEN);
        let mut bitmap = vec![0u8; len];
        for ty in types {
            let bit = *ty as usize;
            if let Some(byte) = bitmap.get_mut(bit / 8) {
                *byte |= 0x80 >> (bit % 8);
            }
        }
        Self::new(next_domain, bitmap)
    }

    pub fn next_domain(&self) -> &str {
        &self.next_domain
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    /// Number of bits in the bitmap.
    pub fn bitmap_length(&self) -> usize {
        self.bitmap.len() * 8
    }

    /// Returns the bit for record type `i`. Bit 0 is the most significant bit
    /// of the first byte. Bits beyond the bitmap read as clear.
    pub fn get_bit(&self, i: usize) -> bool {
        match self.bitmap.get(i / 8) {
            Some(byte) => byte & (0x80 >> (i % 8)) != 0,
            None => false,
        }
    }

    /// Record types marked present.
    pub fn types(&self) -> Vec<u16> {
        (0..self.bitmap_length())
            .filter(|i| self.get_bit(*i))
            .map(|i| i as u16)
            .collect()
    }
}

/// The decoded rdata of a resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRdata {
    Srv(SrvRdata),
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ptr(String),

    /// Character strings as raw bytes. They are not required to be UTF-8.
    Txt(Vec<Vec<u8>>),
    Nsec(NsecRdata),
}

impl RecordRdata {
    /// Decodes `rdata` of wire type `rr_type`.
    ///
    /// `rdata_offset` is where `rdata` starts within the message behind
    /// `parser`. Returns `None` for unsupported types and for anything that
    /// does not fit inside `rdata`.
    pub fn parse(
        rr_type: u16,
        rdata: &[u8],
        rdata_offset: usize,
        parser: &DnsRecordParser<'_>,
    ) -> Option<Self> {
        let rdata_type = RRType::from_u16(rr_type)?;
        let parsed = match rdata_type {
            RRType::SRV => Self::parse_srv(rdata, rdata_offset, parser),
            RRType::A => Self::parse_a(rdata),
            RRType::AAAA => Self::parse_aaaa(rdata),
            RRType::CNAME => {
                Self::parse_single_name(rdata, rdata_offset, parser).map(RecordRdata::Cname)
            }
            RRType::PTR => {
                Self::parse_single_name(rdata, rdata_offset, parser).map(RecordRdata::Ptr)
            }
            RRType::TXT => Self::parse_txt(rdata),
            RRType::NSEC => Self::parse_nsec(rdata, rdata_offset, parser),
            RRType::ANY => None,
        };

        if parsed.is_none() {
            trace!(
                "failed to parse {} rdata of {} bytes at offset {}",
                rdata_type,
                rdata.len(),
                rdata_offset
            );
        }
        parsed
    }

    fn parse_srv(rdata: &[u8], rdata_offset: usize, parser: &DnsRecordParser<'_>) -> Option<Self> {
        if rdata.len() < SRV_FIXED_LEN {
            return None;
        }
        let (target, consumed) = parser.read_name(rdata_offset + SRV_FIXED_LEN)?;
        if SRV_FIXED_LEN + consumed > rdata.len() {
            return None;
        }

        Some(RecordRdata::Srv(SrvRdata {
            priority: u16::from_be_bytes([rdata[0], rdata[1]]),
            weight: u16::from_be_bytes([rdata[2], rdata[3]]),
            port: u16::from_be_bytes([rdata[4], rdata[5]]),
            target,
        }))
    }

    fn parse_a(rdata: &[u8]) -> Option<Self> {
        match rdata {
            [a, b, c, d] => Some(RecordRdata::A(Ipv4Addr::new(*a, *b, *c, *d))),
            _ => None,
        }
    }

    fn parse_aaaa(rdata: &[u8]) -> Option<Self> {
        if rdata.len() != 16 {
            return None;
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(rdata);
        Some(RecordRdata::Aaaa(Ipv6Addr::from(octets)))
    }

    fn parse_single_name(
        rdata: &[u8],
        rdata_offset: usize,
        parser: &DnsRecordParser<'_>,
    ) -> Option<String> {
        let (name, consumed) = parser.read_name(rdata_offset)?;
        if consumed > rdata.len() {
            return None;
        }
        Some(name)
    }

    /// A sequence of length-prefixed strings covering the whole rdata.
    fn parse_txt(rdata: &[u8]) -> Option<Self> {
        let mut texts = Vec::new();
        let mut i = 0;
        while i < rdata.len() {
            let length = rdata[i] as usize;
            if i + length >= rdata.len() {
                return None;
            }
            let text = &rdata[i + 1..i + 1 + length];
            texts.push(text.to_vec());
            i += length + 1;
        }
        Some(RecordRdata::Txt(texts))
    }

    /// From RFC 6762: 6.1.  Negative Responses
    /// https://datatracker.ietf.org/doc/html/rfc6762#section-6.1
    ///   o The Type Bit Map block number is 0.
    ///   o The Type Bit Map block length byte is a value in the range 1-32.
    ///   o The Type Bit Map data is 1-32 bytes, as indicated by length
    ///     byte.
    fn parse_nsec(rdata: &[u8], rdata_offset: usize, parser: &DnsRecordParser<'_>) -> Option<Self> {
        let (next_domain, consumed) = parser.read_name(rdata_offset)?;
        let block = rdata.get(consumed..)?;
        let [block_num, block_len, bitmap @ ..] = block else {
            return None;
        };

        if *block_num != 0 {
            trace!("NSEC block number is not 0: {}", block_num);
            return None;
        }
        let block_len = *block_len as usize;
        if !(1..=NSEC_BITMAP_MAX_LEN).contains(&block_len) || block_len != bitmap.len() {
            trace!(
                "NSEC block length {} is invalid for {} bitmap bytes",
                block_len,
                bitmap.len()
            );
            return None;
        }

        Some(RecordRdata::Nsec(NsecRdata {
            next_domain,
            bitmap: bitmap.to_vec(),
        }))
    }

    /// The record type this rdata belongs to.
    pub fn rr_type(&self) -> RRType {
        match self {
            RecordRdata::Srv(_) => RRType::SRV,
            RecordRdata::A(_) => RRType::A,
            RecordRdata::Aaaa(_) => RRType::AAAA,
            RecordRdata::Cname(_) => RRType::CNAME,
            RecordRdata::Ptr(_) => RRType::PTR,
            RecordRdata::Txt(_) => RRType::TXT,
            RecordRdata::Nsec(_) => RRType::NSEC,
        }
    }

    /// Structural equality. Two rdata of different types are never equal.
    pub fn is_equal(&self, other: &RecordRdata) -> bool {
        self == other
    }

    /// Writes the rdata into `packet`, compressing names against the ones
    /// already written. The rdata must have passed [Self::validate].
    pub(crate) fn write(&self, packet: &mut DnsOutPacket) {
        match self {
            RecordRdata::Srv(srv) => {
                packet.write_short(srv.priority);
                packet.write_short(srv.weight);
                packet.write_short(srv.port);
                packet.write_name(&srv.target);
            }
            RecordRdata::A(addr) => packet.write_bytes(&addr.octets()),
            RecordRdata::Aaaa(addr) => packet.write_bytes(&addr.octets()),
            RecordRdata::Cname(name) | RecordRdata::Ptr(name) => packet.write_name(name),
            RecordRdata::Txt(texts) => {
                for text in texts {
                    packet.write_byte(text.len() as u8);
                    packet.write_bytes(text);
                }
            }
            RecordRdata::Nsec(nsec) => {
                // Compression is not allowed in the NSEC next domain name, RFC 4034 section 4.1.1.
                let mut bare = DnsOutPacket::uncompressed();
                bare.write_name(&nsec.next_domain);
                packet.write_bytes(&bare.to_bytes());
                packet.write_byte(0);
                packet.write_byte(nsec.bitmap.len() as u8);
                packet.write_bytes(&nsec.bitmap);
            }
        }
    }

    /// Encodes the rdata on its own, without name compression.
    ///
    /// Fails if a name or a length in the rdata cannot be expressed on the wire.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut packet = DnsOutPacket::uncompressed();
        self.write(&mut packet);
        Ok(packet.to_bytes())
    }

    /// Checks the names and lengths embedded in the rdata before they are encoded.
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            RecordRdata::Srv(srv) => check_name(&srv.target),
            RecordRdata::Cname(name) | RecordRdata::Ptr(name) => check_name(name),
            RecordRdata::Txt(texts) => match texts.iter().find(|t| t.len() > TXT_STRING_MAX_LEN) {
                Some(text) => Err(e_fmt!("TXT string of {} bytes is too long", text.len())),
                None => Ok(()),
            },
            RecordRdata::Nsec(nsec) => {
                if !(1..=NSEC_BITMAP_MAX_LEN).contains(&nsec.bitmap.len()) {
                    return Err(e_fmt!(
                        "NSEC bitmap of {} bytes is out of range",
                        nsec.bitmap.len()
                    ));
                }
                check_name(&nsec.next_domain)
            }
            RecordRdata::A(_) | RecordRdata::Aaaa(_) => Ok(()),
        }
    }
}

impl fmt::Display for RecordRdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordRdata::Srv(srv) => write!(
                f,
                "priority: {}, weight: {}, port: {}, target: {}",
                srv.priority, srv.weight, srv.port, srv.target
            ),
            RecordRdata::A(addr) => write!(f, "{}", addr),
            RecordRdata::Aaaa(addr) => write!(f, "{}", addr),
            RecordRdata::Cname(name) | RecordRdata::Ptr(name) => write!(f, "{}", name),
            RecordRdata::Txt(texts) => {
                let texts: Vec<_> = texts.iter().map(|t| String::from_utf8_lossy(t)).collect();
                write!(f, "{:?}", texts)
            }
            RecordRdata::Nsec(nsec) => write!(
                f,
                "next_domain: {}, types: {:?}",
                nsec.next_domain,
                nsec.types()
            ),
        }
    }
}

/// A resource record with its rdata decoded, stamped with the time it was
/// received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    name: String,
    rr_type: RRType,
    class: u16,
    ttl: u32,
    rdata: RecordRdata,

    /// UNIX time in millis
    time_created: u64,
}

impl ParsedRecord {
    /// Creates a class IN record; its type follows `rdata`.
    pub fn new(name: &str, ttl: u32, rdata: RecordRdata, time_created: u64) -> Self {
        Self {
            name: name.to_string(),
            rr_type: rdata.rr_type(),
            class: CLASS_IN,
            ttl,
            rdata,
            time_created,
        }
    }

    /// Decodes the rdata of a framed record. The cache-flush bit is dropped
    /// from the class.
    pub fn from_resource(
        record: &ResourceRecord<'_>,
        parser: &DnsRecordParser<'_>,
        now: u64,
    ) -> Option<Self> {
        let rdata = RecordRdata::parse(record.rr_type, record.rdata, record.rdata_offset, parser)?;
        Some(Self {
            name: record.name.clone(),
            rr_type: rdata.rr_type(),
            class: record.class & CLASS_MASK,
            ttl: record.ttl,
            rdata,
            time_created: now,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rr_type(&self) -> RRType {
        self.rr_type
    }

    pub fn class(&self) -> u16 {
        self.class
    }

    /// TTL in seconds.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn rdata(&self) -> &RecordRdata {
        &self.rdata
    }

    pub fn time_created(&self) -> u64 {
        self.time_created
    }

    /// UNIX time in millis at which the record expires.
    pub fn expiration(&self) -> u64 {
        self.time_created + self.ttl as u64 * 1000
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration()
    }

    /// Same name, type, class and rdata. TTL and creation time are ignored.
    pub fn is_equal(&self, other: &ParsedRecord) -> bool {
        self.name == other.name
            && self.rr_type == other.rr_type
            && self.class == other.class
            && self.rdata.is_equal(&other.rdata)
    }
}

#[cfg(test)]
mod tests {
    use super::{NsecRdata, ParsedRecord, RecordRdata, SrvRdata};
    use crate::dns_parser::{
        DnsHeader, DnsOutgoing, DnsRecordParser, RRType, FLAGS_QR_RESPONSE, MSG_HEADER_LEN,
    };
    use std::net::{Ipv4Addr, Ipv6Addr};
    use test_log::test;

    fn parse_standalone(rr_type: RRType, rdata: &[u8]) -> Option<RecordRdata> {
        let parser = DnsRecordParser::new(rdata, 0);
        RecordRdata::parse(rr_type as u16, rdata, 0, &parser)
    }

    #[test]
    fn test_parse_srv() {
        #[rustfmt::skip]
        let data: &[u8] = &[
            0x00, 0x01, 0x00, 0x02, 0x00, 0x50, // priority 1, weight 2, port 80
            0x03, b'w', b'w', b'w',
            0x06, b'g', b'o', b'o', b'g', b'l', b'e',
            0x03, b'c', b'o', b'm',
            0x00,
            0x01, 0x01, 0x01, 0x02, 0x01, 0x03, // priority 257, weight 258, port 259
            0x04, b'w', b'w', b'w', b'2',
            0xc0, 0x0a, // pointer to "google.com" at offset 10
        ];
        let parser = DnsRecordParser::new(data, 0);

        let first = RecordRdata::parse(RRType::SRV as u16, &data[..22], 0, &parser).unwrap();
        let second = RecordRdata::parse(RRType::SRV as u16, &data[22..], 22, &parser).unwrap();

        assert_eq!(
            first,
            RecordRdata::Srv(SrvRdata {
                priority: 1,
                weight: 2,
                port: 80,
                target: "www.google.com".to_string(),
            })
        );
        assert_eq!(
            second,
            RecordRdata::Srv(SrvRdata {
                priority: 257,
                weight: 258,
                port: 259,
                target: "www2.google.com".to_string(),
            })
        );
        assert!(first.is_equal(&first));
        assert!(!first.is_equal(&second));
        assert!(!second.is_equal(&first));
    }

    #[test]
    fn test_parse_srv_too_short() {
        assert!(parse_standalone(RRType::SRV, &[0, 1, 0, 2, 0]).is_none());
        // Target name runs past the rdata.
        let data = b"\x00\x01\x00\x02\x00\x50\x03www\x00";
        let parser = DnsRecordParser::new(data, 0);
        assert!(RecordRdata::parse(RRType::SRV as u16, &data[..9], 0, &parser).is_none());
    }

    #[test]
    fn test_parse_a_and_aaaa() {
        let a = parse_standalone(RRType::A, &[127, 0, 0, 1]).unwrap();
        assert_eq!(a, RecordRdata::A(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(parse_standalone(RRType::A, &[127, 0, 0]).is_none());
        assert!(parse_standalone(RRType::A, &[127, 0, 0, 1, 1]).is_none());

        let data = [
            0x12, 0x34, 0x56, 0x78, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x09,
        ];
        let aaaa = parse_standalone(RRType::AAAA, &data).unwrap();
        assert_eq!(
            aaaa,
            RecordRdata::Aaaa("1234:5678::9".parse::<Ipv6Addr>().unwrap())
        );
        assert!(parse_standalone(RRType::AAAA, &data[..15]).is_none());
    }

    #[test]
    fn test_parse_cname_and_ptr() {
        let data = b"\x03www\x06google\x03com\x00";
        let cname = parse_standalone(RRType::CNAME, data).unwrap();
        assert_eq!(cname, RecordRdata::Cname("www.google.com".to_string()));

        let ptr = parse_standalone(RRType::PTR, data).unwrap();
        assert_eq!(ptr, RecordRdata::Ptr("www.google.com".to_string()));

        // Same name, different variants.
        assert!(!cname.is_equal(&ptr));
        assert!(parse_standalone(RRType::PTR, &data[..8]).is_none());
    }

    #[test]
    fn test_parse_txt() {
        let data = b"\x03www\x06google\x03com";
        let txt = parse_standalone(RRType::TXT, data).unwrap();
        assert_eq!(
            txt,
            RecordRdata::Txt(vec![b"www".to_vec(), b"google".to_vec(), b"com".to_vec()])
        );

        // The last string overruns the rdata.
        assert!(parse_standalone(RRType::TXT, &data[..data.len() - 1]).is_none());
        assert_eq!(
            parse_standalone(RRType::TXT, &[]),
            Some(RecordRdata::Txt(Vec::new()))
        );
    }

    #[test]
    fn test_txt_keeps_raw_bytes() {
        let first = parse_standalone(RRType::TXT, b"\x05key=\xfe").unwrap();
        let second = parse_standalone(RRType::TXT, b"\x05key=\xff").unwrap();
        assert_eq!(first, RecordRdata::Txt(vec![b"key=\xfe".to_vec()]));
        assert!(!first.is_equal(&second));

        assert_eq!(first.to_wire().unwrap(), b"\x05key=\xfe".to_vec());
    }

    #[test]
    fn test_to_wire_rejects_bad_rdata() {
        let long_label = RecordRdata::Ptr(format!("{}.local", "x".repeat(64)));
        assert!(long_label.to_wire().is_err());
        assert!(RecordRdata::Cname("a..b".to_string()).to_wire().is_err());
        assert!(RecordRdata::Txt(vec![vec![b'x'; 256]]).to_wire().is_err());
        assert!(RecordRdata::Nsec(NsecRdata::new("host.local", Vec::new()))
            .to_wire()
            .is_err());
        assert!(RecordRdata::Nsec(NsecRdata::new("host.local", vec![0x40; 33]))
            .to_wire()
            .is_err());
    }

    #[test]
    fn test_parse_nsec() {
        let data = b"\x03www\x06google\x03com\x00\x00\x02\x40\x01";
        let rdata = parse_standalone(RRType::NSEC, data).unwrap();
        let RecordRdata::Nsec(nsec) = &rdata else {
            panic!("not an NSEC rdata: {:?}", rdata);
        };

        assert_eq!(nsec.next_domain(), "www.google.com");
        assert_eq!(nsec.bitmap_length(), 16);
        for i in 0..16 {
            assert_eq!(nsec.get_bit(i), i == 1 || i == 15, "bit {}", i);
        }
        assert!(!nsec.get_bit(16));
        assert_eq!(nsec.types(), vec![1, 15]);
    }

    #[test]
    fn test_parse_nsec_bad_blocks() {
        // Window block 1.
        assert!(parse_standalone(RRType::NSEC, b"\x00\x01\x02\x40\x01").is_none());
        // Bitmap length 0.
        assert!(parse_standalone(RRType::NSEC, b"\x00\x00\x00").is_none());
        // Length byte claims more than is left.
        assert!(parse_standalone(RRType::NSEC, b"\x00\x00\x03\x40\x01").is_none());
        // Trailing bytes after the bitmap.
        assert!(parse_standalone(RRType::NSEC, b"\x00\x00\x01\x40\x01").is_none());
        // Length above 32.
        let mut long = vec![0u8, 0, 33];
        long.extend_from_slice(&[0xff; 33]);
        assert!(parse_standalone(RRType::NSEC, &long).is_none());
    }

    #[test]
    fn test_unsupported_type() {
        assert!(RecordRdata::parse(13, b"\x00", 0, &DnsRecordParser::new(b"\x00", 0)).is_none());
        assert!(parse_standalone(RRType::ANY, b"\x00").is_none());
    }

    #[test]
    fn test_to_wire_then_parse() {
        let samples = vec![
            RecordRdata::Srv(SrvRdata {
                priority: 0,
                weight: 0,
                port: 631,
                target: "myprinter.local".to_string(),
            }),
            RecordRdata::A(Ipv4Addr::new(192, 168, 1, 12)),
            RecordRdata::Aaaa(Ipv6Addr::LOCALHOST),
            RecordRdata::Cname("alias.local".to_string()),
            RecordRdata::Ptr("myprinter._printer._tcp.local".to_string()),
            RecordRdata::Txt(vec![b"txtvers=1".to_vec(), Vec::new()]),
            RecordRdata::Nsec(NsecRdata::from_types(
                "myprinter.local",
                &[RRType::A, RRType::SRV],
            )),
        ];

        for rdata in samples {
            let wire = rdata.to_wire().unwrap();
            let decoded = parse_standalone(rdata.rr_type(), &wire);
            assert_eq!(decoded.as_ref(), Some(&rdata), "wire: {:x?}", wire);
        }
    }

    #[test]
    fn test_nsec_from_types() {
        let nsec = NsecRdata::from_types("host.local", &[RRType::A, RRType::AAAA]);
        assert_eq!(nsec.bitmap_length(), 32);
        assert!(nsec.get_bit(RRType::A as usize));
        assert!(nsec.get_bit(RRType::AAAA as usize));
        assert!(!nsec.get_bit(RRType::SRV as usize));
    }

    #[test]
    fn test_records_in_message() {
        // Both records share "google.com", so the second one is written compressed.
        let mut out = DnsOutgoing::new(FLAGS_QR_RESPONSE);
        out.add_answer(ParsedRecord::new(
            "www.google.com",
            120,
            RecordRdata::Cname("mail.google.com".to_string()),
            0,
        ))
        .unwrap();
        out.add_answer(ParsedRecord::new(
            "_http._tcp.google.com",
            120,
            RecordRdata::Srv(SrvRdata {
                priority: 1,
                weight: 2,
                port: 80,
                target: "www.google.com".to_string(),
            }),
            0,
        ))
        .unwrap();
        let data = out.to_data_on_wire().unwrap();
        assert_eq!(DnsHeader::parse(&data).unwrap().num_answers, 2);

        let mut parser = DnsRecordParser::new(&data, MSG_HEADER_LEN);
        let mut records = Vec::new();
        while let Some(rr) = parser.read_record() {
            records.push(ParsedRecord::from_resource(&rr, &parser, 5).unwrap());
        }
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name(), "www.google.com");
        assert_eq!(
            records[1].rdata(),
            &RecordRdata::Srv(SrvRdata {
                priority: 1,
                weight: 2,
                port: 80,
                target: "www.google.com".to_string(),
            })
        );
        assert_eq!(records[1].time_created(), 5);
        assert_eq!(records[1].expiration(), 120_005);
    }
}
