use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum length of a domain name in its dotted form.
pub const NAME_MAX_LEN: usize = 125;

/// Maximum length of a single label in a domain name.
pub const LABEL_MAX_LEN: usize = 63;

/// Maximum size of a message.  Responses larger than this are not
/// handled: there is no truncation-and-retry, the datagram is simply
/// never read beyond this size.
pub const MAX_MSG_SIZE: usize = 512;

/// Octet mask for the QR flag being set (response).
pub const HEADER_MASK_QR: u8 = 0b1000_0000;

/// Octet mask for the opcode field.
pub const HEADER_MASK_OPCODE: u8 = 0b0111_1000;

/// Offset for the opcode field.
pub const HEADER_OFFSET_OPCODE: usize = 3;

/// Octet mask for the AA flag being set (authoritative)
pub const HEADER_MASK_AA: u8 = 0b0000_0100;

/// Octet mask for the TC flag being set (truncated)
pub const HEADER_MASK_TC: u8 = 0b0000_0010;

/// Octet mask for the RD flag being set (desired)
pub const HEADER_MASK_RD: u8 = 0b0000_0001;

/// Octet mask for the RA flag being set (available)
pub const HEADER_MASK_RA: u8 = 0b1000_0000;

/// Octet mask for the rcode field.
pub const HEADER_MASK_RCODE: u8 = 0b0000_1111;

/// Basic DNS message format, used for both queries and responses.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the name server
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs pointing toward an authority
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// Exactly one question per message: more is never emitted, and
/// responses carrying any other count are rejected on decode.
///
/// See section 4.1 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Message {
    pub header: Header,
    pub question: Question,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Build an outgoing query: RD set, every other flag clear,
    /// opcode 0 (standard query).
    pub fn query(id: u16, name: DomainName, qtype: QueryType) -> Self {
        Self {
            header: Header {
                id,
                is_response: false,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: true,
                recursion_available: false,
                rcode: Rcode::NoError,
            },
            question: Question {
                name,
                qtype,
                qclass: QueryClass::IN,
            },
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn make_response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_response: true,
                opcode: self.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: true,
                rcode: Rcode::NoError,
            },
            question: self.question.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.
///
/// The section counts are omitted from this type, as they are only
/// used during serialisation and deserialisation and can be inferred
/// from the other `Message` fields.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Header {
    /// A 16 bit identifier assigned by the program that generates any
    /// kind of query.  This identifier is copied into the
    /// corresponding reply and can be used by the requester to match
    /// up replies to outstanding queries.
    pub id: u16,

    /// A one bit field that specifies whether this message is a query
    /// (0), or a response (1).
    pub is_response: bool,

    /// A four bit field that specifies kind of query in this message.
    /// Always 0 (standard query) on everything this resolver emits.
    pub opcode: Opcode,

    /// Authoritative Answer - this bit is valid in responses, and
    /// specifies that the responding name server is an authority for
    /// the domain name in question section.
    pub is_authoritative: bool,

    /// Truncation - specifies that this message was truncated due to
    /// length greater than that permitted on the transmission
    /// channel.  Not acted upon: oversized responses are out of
    /// scope.
    pub is_truncated: bool,

    /// Recursion Desired - this bit may be set in a query and is
    /// copied into the response.  Set on every emitted query.
    pub recursion_desired: bool,

    /// Recursion Available - this bit is set or cleared in a
    /// response, and denotes whether recursive query support is
    /// available in the name server.
    pub recursion_available: bool,

    /// Response code - the low nibble of the second flags octet.
    /// 0 is NOERROR.
    pub rcode: Rcode,
}

/// The question being asked.  Only one per message.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                     QNAME                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QTYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QCLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.2 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    pub name: DomainName,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qclass, self.qtype)
    }
}

/// The answer, authority, and additional sections are all the same
/// format: a variable number of resource records.  This is the
/// structure for a single resource record.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                                               /
///     /                      NAME                     /
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     CLASS                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TTL                      |
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                   RDLENGTH                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
///     /                     RDATA                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.3 of RFC 1035.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct ResourceRecord {
    /// a domain name to which this resource record pertains.
    pub name: DomainName,

    /// A combination of the TYPE and RDATA fields.
    pub data: RecordData,

    /// two octets which specify the class of the data in the RDATA
    /// field.
    pub rclass: QueryClass,

    /// a 32 bit unsigned integer that specifies the time interval (in
    /// seconds) that the resource record may be cached before it
    /// should be discarded.  Zero values are interpreted to mean that
    /// the RR can only be used for the transaction in progress, and
    /// should not be cached.
    pub ttl: u32,
}

/// A record type with its associated, deserialised, data.  Only the
/// three types this resolver queries for are interpreted; everything
/// else is kept as an opaque slice of the rdata octets.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum RecordData {
    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                    ADDRESS                    |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// Where `ADDRESS` is a 32 bit Internet address.
    A { address: Ipv4Addr },

    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                   PRIORITY                    |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                    WEIGHT                     |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                     PORT                      |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                    TARGET                     /
    ///     /                                               /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// Where `PRIORITY` is a 16 bit integer which specifies the order
    /// (lowest first) in which clients must attempt to use these RRs.
    ///
    /// Where `WEIGHT` is a 16 bit integer which specifies the
    /// preference given to this RR amongst others of the same
    /// priority.
    ///
    /// Where `PORT` is a 16 bit integer defining the port to contact
    /// the service on.
    ///
    /// Where `TARGET` is the domain name the service may be found at.
    ///
    /// See RFC 2782.
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },

    /// ```text
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                     ORDER                     |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     |                   PREFERENCE                  |
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                     FLAGS                     /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                   SERVICES                    /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                    REGEXP                     /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    ///     /                  REPLACEMENT                  /
    ///     /                                               /
    ///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    ///
    /// Where `FLAGS`, `SERVICES`, and `REGEXP` are character strings
    /// (a length octet followed by that many octets), and
    /// `REPLACEMENT` is a domain name.  The flags string must be a
    /// single letter; it controls how the next resolution layer is
    /// derived.
    ///
    /// See RFC 2915.
    Naptr {
        order: u16,
        preference: u16,
        flags: NaptrFlags,
        service: Bytes,
        regexp: Bytes,
        replacement: DomainName,
    },

    /// Any other record.
    Unknown { tag: QueryTypeUnknown, octets: Bytes },
}

impl RecordData {
    pub fn rtype(&self) -> QueryType {
        match self {
            RecordData::A { .. } => QueryType::A,
            RecordData::Srv { .. } => QueryType::SRV,
            RecordData::Naptr { .. } => QueryType::NAPTR,
            RecordData::Unknown { tag, .. } => QueryType::Unknown(*tag),
        }
    }
}

impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordData::A { address } => write!(f, "{address}"),
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{priority} {weight} {port} {target}"),
            RecordData::Naptr {
                order,
                preference,
                flags,
                service,
                regexp,
                replacement,
            } => write!(
                f,
                "{order} {preference} \"{flags}\" \"{}\" \"{}\" {replacement}",
                String::from_utf8_lossy(service),
                String::from_utf8_lossy(regexp),
            ),
            RecordData::Unknown { octets, .. } => write!(f, "\\# {}", octets.len()),
        }
    }
}

/// The NAPTR flags field, a single letter compared
/// case-insensitively.  Only `S` and `A` drive further resolution;
/// `U` and `P` are terminal rules interpreted by the application, and
/// anything else is outside RFC 2915.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NaptrFlags {
    S,
    A,
    U,
    P,
    Other,
}

impl From<u8> for NaptrFlags {
    fn from(octet: u8) -> Self {
        match octet.to_ascii_lowercase() {
            b's' => NaptrFlags::S,
            b'a' => NaptrFlags::A,
            b'u' => NaptrFlags::U,
            b'p' => NaptrFlags::P,
            _ => NaptrFlags::Other,
        }
    }
}

impl fmt::Display for NaptrFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NaptrFlags::S => write!(f, "S"),
            NaptrFlags::A => write!(f, "A"),
            NaptrFlags::U => write!(f, "U"),
            NaptrFlags::P => write!(f, "P"),
            NaptrFlags::Other => write!(f, "-"),
        }
    }
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Opcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RcodeReserved(u8);

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rcode::NoError => write!(f, "no-error"),
            Rcode::FormatError => write!(f, "format-error"),
            Rcode::ServerFailure => write!(f, "server-failure"),
            Rcode::NameError => write!(f, "name-error"),
            Rcode::NotImplemented => write!(f, "not-implemented"),
            Rcode::Refused => write!(f, "refused"),
            Rcode::Reserved(_) => write!(f, "reserved"),
        }
    }
}

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for Rcode {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u8>()?))
    }
}

/// Record and query types share one numeric space here: the resolver
/// issues A, SRV, and NAPTR queries, and keeps any other record it
/// decodes opaque.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryType {
    A,
    SRV,
    NAPTR,
    Unknown(QueryTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `QueryType`s cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct QueryTypeUnknown(u16);

impl QueryType {
    pub fn is_unknown(&self) -> bool {
        matches!(self, QueryType::Unknown(_))
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryType::A => write!(f, "A"),
            QueryType::SRV => write!(f, "SRV"),
            QueryType::NAPTR => write!(f, "NAPTR"),
            QueryType::Unknown(QueryTypeUnknown(n)) => write!(f, "TYPE{n}"),
        }
    }
}

impl FromStr for QueryType {
    type Err = QueryTypeFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(QueryType::A),
            "SRV" => Ok(QueryType::SRV),
            "NAPTR" => Ok(QueryType::NAPTR),
            _ => {
                if let Some(type_str) = s.strip_prefix("TYPE") {
                    if let Ok(type_num) = u16::from_str(type_str) {
                        Ok(QueryType::from(type_num))
                    } else {
                        Err(QueryTypeFromStr::BadType)
                    }
                } else {
                    Err(QueryTypeFromStr::NoParse)
                }
            }
        }
    }
}

/// Errors that can arise when converting a `&str` into a `QueryType`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryTypeFromStr {
    BadType,
    NoParse,
}

impl fmt::Display for QueryTypeFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryTypeFromStr::BadType => write!(f, "TYPE<num> number must be a u16"),
            QueryTypeFromStr::NoParse => write!(f, "could not parse string to type"),
        }
    }
}

impl std::error::Error for QueryTypeFromStr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            1 => QueryType::A,
            33 => QueryType::SRV,
            35 => QueryType::NAPTR,
            _ => QueryType::Unknown(QueryTypeUnknown(value)),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::A => 1,
            QueryType::SRV => 33,
            QueryType::NAPTR => 35,
            QueryType::Unknown(QueryTypeUnknown(value)) => value,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryType {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

/// Record and query classes.  Only IN is ever emitted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryClass {
    IN,
    Unknown(QueryClassUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `QueryClass`es cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct QueryClassUnknown(u16);

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryClass::IN => write!(f, "IN"),
            QueryClass::Unknown(QueryClassUnknown(n)) => write!(f, "CLASS{n}"),
        }
    }
}

impl From<u16> for QueryClass {
    fn from(value: u16) -> Self {
        match value {
            1 => QueryClass::IN,
            _ => QueryClass::Unknown(QueryClassUnknown(value)),
        }
    }
}

impl From<QueryClass> for u16 {
    fn from(value: QueryClass) -> Self {
        match value {
            QueryClass::IN => 1,
            QueryClass::Unknown(QueryClassUnknown(value)) => value,
        }
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for QueryClass {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self::from(u.arbitrary::<u16>()?))
    }
}

/// A domain name held in its dotted form, lowercased at
/// construction so that name comparison (and the cache keys derived
/// from it) is case-insensitive.
///
/// A label must be 63 octets or shorter; the whole dotted name must
/// be 125 octets or shorter.  The root name is the empty string and
/// displays as `"."`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName {
    /// Private so a name which breaks the length or label invariants
    /// cannot be constructed.
    dotted: String,
}

impl DomainName {
    pub fn root() -> Self {
        Self {
            dotted: String::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.dotted.is_empty()
    }

    /// The dotted form, without a trailing dot.  Empty for the root.
    pub fn as_dotted(&self) -> &str {
        &self.dotted
    }

    pub fn len(&self) -> usize {
        self.dotted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dotted.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.dotted.split('.').filter(|label| !label.is_empty())
    }

    /// Parse a dotted-string name, accepting an optional trailing dot
    /// (so both `"example.com"` and `"example.com."` work).  Returns
    /// `None` if any label is empty or over 63 octets, if the whole
    /// name is over 125 octets, or if it contains non-ASCII or
    /// whitespace octets.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(Self::root());
        }

        let s = s.strip_suffix('.').unwrap_or(s);
        if s.is_empty() || s.len() > NAME_MAX_LEN {
            return None;
        }

        for label in s.split('.') {
            if label.is_empty() || label.len() > LABEL_MAX_LEN {
                return None;
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii() && !b.is_ascii_whitespace())
            {
                return None;
            }
        }

        Some(Self {
            dotted: s.to_ascii_lowercase(),
        })
    }

    /// Build a name from an already-lowercased dotted string whose
    /// labels have been individually validated during decoding.
    pub(crate) fn from_decoded(dotted: String) -> Self {
        Self { dotted }
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainName")
            .field("dotted", &self.dotted)
            .finish()
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.dotted)
        }
    }
}

impl FromStr for DomainName {
    type Err = DomainNameFromStr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(domain) = DomainName::from_dotted_string(s) {
            Ok(domain)
        } else {
            Err(DomainNameFromStr::NoParse)
        }
    }
}

/// Errors that can arise when converting a `&str` into a `DomainName`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DomainNameFromStr {
    NoParse,
}

impl fmt::Display for DomainNameFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "could not parse string to domain name")
    }
}

impl std::error::Error for DomainNameFromStr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range::<usize>(1..=4)?;
        let mut dotted = String::new();
        for i in 0..num_labels {
            if i > 0 {
                dotted.push('.');
            }
            let label_len = u.int_in_range::<usize>(1..=10)?;
            for _ in 0..label_len {
                let c = u.int_in_range::<u8>(0..=35)?;
                dotted.push(match c {
                    0..=25 => (b'a' + c) as char,
                    _ => (b'0' + (c - 26)) as char,
                });
            }
        }
        Ok(DomainName::from_decoded(dotted))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for NaptrFlags {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let letter = u.choose(&[b's', b'A', b'u', b'P', b'x'])?;
        Ok(Self::from(*letter))
    }
}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for RecordData {
    // bound the `Bytes` fields so they fit their one-octet length
    // prefixes on the wire
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let data = match u.int_in_range::<u8>(0..=3)? {
            0 => RecordData::A {
                address: Ipv4Addr::from(u.arbitrary::<u32>()?),
            },
            1 => RecordData::Srv {
                priority: u.arbitrary()?,
                weight: u.arbitrary()?,
                port: u.arbitrary()?,
                target: u.arbitrary()?,
            },
            2 => {
                let service_len = u.int_in_range(0..=32)?;
                let service = Bytes::copy_from_slice(u.bytes(service_len)?);
                let regexp_len = u.int_in_range(0..=32)?;
                let regexp = Bytes::copy_from_slice(u.bytes(regexp_len)?);
                RecordData::Naptr {
                    order: u.arbitrary()?,
                    preference: u.arbitrary()?,
                    flags: u.arbitrary()?,
                    service,
                    regexp,
                    replacement: u.arbitrary()?,
                }
            }
            _ => {
                let tag = match QueryType::from(u.arbitrary::<u16>()?) {
                    QueryType::Unknown(tag) => tag,
                    // collided with a known type; pick a fixed unknown one
                    _ => match QueryType::from(16) {
                        QueryType::Unknown(tag) => tag,
                        _ => unreachable!(),
                    },
                };
                let len = u.int_in_range(0..=64)?;
                RecordData::Unknown {
                    tag,
                    octets: Bytes::copy_from_slice(u.bytes(len)?),
                }
            }
        };
        Ok(data)
    }
}


#[cfg(any(feature = "test-util", test))]
#[allow(clippy::missing_panics_doc)]
pub mod test_util {
    use super::*;

    use arbitrary::{Arbitrary, Unstructured};
    use bytes::{BufMut, BytesMut};
    use rand::Rng;

    pub fn arbitrary_message() -> Message {
        let mut rng = rand::thread_rng();
        for size in [128, 256, 512, 1024, 2048, 4096] {
            let mut buf = BytesMut::with_capacity(size);
            for _ in 0..size {
                buf.put_u8(rng.gen());
            }

            if let Ok(message) = Message::arbitrary(&mut Unstructured::new(&buf.freeze())) {
                return message;
            }
        }

        panic!("could not generate arbitrary value!");
    }

    pub fn domain(name: &str) -> DomainName {
        DomainName::from_dotted_string(name).unwrap()
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            data: RecordData::A { address },
            rclass: QueryClass::IN,
            ttl: 300,
        }
    }

    pub fn srv_record(name: &str, priority: u16, weight: u16, port: u16, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            data: RecordData::Srv {
                priority,
                weight,
                port,
                target: domain(target),
            },
            rclass: QueryClass::IN,
            ttl: 300,
        }
    }

    pub fn naptr_record(name: &str, flags: NaptrFlags, service: &str, replacement: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            data: RecordData::Naptr {
                order: 10,
                preference: 50,
                flags,
                service: Bytes::copy_from_slice(service.as_bytes()),
                regexp: Bytes::new(),
                replacement: domain(replacement),
            },
            rclass: QueryClass::IN,
            ttl: 300,
        }
    }

    pub fn unknown_record(name: &str, octets: &[u8]) -> ResourceRecord {
        let tag = match QueryType::from(100) {
            QueryType::Unknown(tag) => tag,
            _ => panic!("expected unknown query type"),
        };
        ResourceRecord {
            name: domain(name),
            data: RecordData::Unknown {
                tag,
                octets: Bytes::copy_from_slice(octets),
            },
            rclass: QueryClass::IN,
            ttl: 300,
        }
    }

    /// A response to the given question, with the given sections.
    pub fn response(name: &str, qtype: QueryType, answers: &[ResourceRecord], authority: &[ResourceRecord], additional: &[ResourceRecord]) -> Message {
        let mut message = Message::query(1234, domain(name), qtype).make_response();
        message.answers = answers.into();
        message.authority = authority.into();
        message.additional = additional.into();
        message
    }
}
