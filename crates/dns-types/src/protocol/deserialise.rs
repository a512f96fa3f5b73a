//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use bytes::Bytes;
use std::net::Ipv4Addr;

use crate::protocol::types::*;

/// Maximum number of compression pointers to chase while expanding a
/// single domain name.  A legitimate 512-octet message cannot need
/// more; an adversarial one can otherwise loop forever.
pub const POINTER_CHASE_LIMIT: usize = 10;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let wire_header = WireHeader::deserialise(buffer)?;
        let id = wire_header.header.id;

        if wire_header.qdcount != 1 {
            return Err(Error::QuestionCount {
                id,
                qdcount: wire_header.qdcount,
            });
        }

        let question = Question::deserialise(id, buffer)?;

        // a server which could not even parse the query echoes what it
        // can with FORMAT_ERROR - there is nothing useful beyond the
        // question, but the question is needed to match the rejection
        // to the outstanding query.
        if wire_header.header.rcode == Rcode::FormatError {
            return Err(Error::ServerRejected { id, question });
        }

        let mut answers = Vec::with_capacity(wire_header.ancount.into());
        let mut authority = Vec::with_capacity(wire_header.nscount.into());
        let mut additional = Vec::with_capacity(wire_header.arcount.into());

        for _ in 0..wire_header.ancount {
            answers.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.nscount {
            authority.push(ResourceRecord::deserialise(id, buffer)?);
        }
        for _ in 0..wire_header.arcount {
            additional.push(ResourceRecord::deserialise(id, buffer)?);
        }

        Ok(Self {
            header: wire_header.header,
            question,
            answers,
            authority,
            additional,
        })
    }
}

/// The header plus the section counts, which are not kept in the
/// `Header` type.
pub struct WireHeader {
    pub header: Header,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl WireHeader {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags1 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let flags2 = buffer.next_u8().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            header: Header {
                id,
                is_response: flags1 & HEADER_MASK_QR != 0,
                opcode: Opcode::from((flags1 & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE),
                is_authoritative: flags1 & HEADER_MASK_AA != 0,
                is_truncated: flags1 & HEADER_MASK_TC != 0,
                recursion_desired: flags1 & HEADER_MASK_RD != 0,
                recursion_available: flags2 & HEADER_MASK_RA != 0,
                rcode: Rcode::from(flags2 & HEADER_MASK_RCODE),
            },
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer
            .next_u16()
            .map(QueryClass::from)
            .ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer
            .next_u16()
            .map(QueryType::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let rclass = buffer
            .next_u16()
            .map(QueryClass::from)
            .ok_or(Error::ResourceRecordTooShort(id))?;
        let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?;
        let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

        let rdata_start = buffer.position();

        let data = match rtype {
            QueryType::A => {
                if rdlength != 4 {
                    return Err(Error::ResourceRecordInvalid(id));
                }
                RecordData::A {
                    address: Ipv4Addr::from(
                        buffer.next_u32().ok_or(Error::ResourceRecordTooShort(id))?,
                    ),
                }
            }
            QueryType::SRV => RecordData::Srv {
                priority: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                weight: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                port: buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?,
                target: DomainName::deserialise(id, buffer)?,
            },
            QueryType::NAPTR => {
                let order = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;
                let preference = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(id))?;

                let flags_len = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
                if flags_len != 1 {
                    return Err(Error::ResourceRecordInvalid(id));
                }
                let flags = NaptrFlags::from(
                    buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?,
                );

                let service = character_string(id, buffer)?;
                let regexp = character_string(id, buffer)?;
                let replacement = DomainName::deserialise(id, buffer)?;

                RecordData::Naptr {
                    order,
                    preference,
                    flags,
                    service,
                    regexp,
                    replacement,
                }
            }
            QueryType::Unknown(tag) => {
                if let Some(octets) = buffer.take(rdlength as usize) {
                    RecordData::Unknown {
                        tag,
                        octets: Bytes::copy_from_slice(octets),
                    }
                } else {
                    return Err(Error::ResourceRecordTooShort(id));
                }
            }
        };

        let rdata_stop = buffer.position();

        if rdata_stop == rdata_start + (rdlength as usize) {
            Ok(Self {
                name,
                data,
                rclass,
                ttl,
            })
        } else {
            Err(Error::ResourceRecordInvalid(id))
        }
    }
}

/// Read a one-octet-prefixed character string (RFC 1035 section 3.3).
fn character_string(id: u16, buffer: &mut ConsumableBuffer) -> Result<Bytes, Error> {
    let len = buffer.next_u8().ok_or(Error::ResourceRecordTooShort(id))?;
    if let Some(octets) = buffer.take(len as usize) {
        Ok(Bytes::copy_from_slice(octets))
    } else {
        Err(Error::ResourceRecordTooShort(id))
    }
}

impl DomainName {
    /// Expand a domain name, which takes one of three wire forms (RFC
    /// 1035 section 4.1.4):
    ///
    /// 1. a sequence of labels ending in a zero octet
    /// 2. a pointer
    /// 3. a sequence of labels ending with a pointer
    ///
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        Self::deserialise_bounded(id, buffer, 0)
    }

    fn deserialise_bounded(
        id: u16,
        buffer: &mut ConsumableBuffer,
        jumps: usize,
    ) -> Result<Self, Error> {
        if jumps > POINTER_CHASE_LIMIT {
            return Err(Error::DomainPointerInvalid(id));
        }

        let start = buffer.position();
        let mut dotted = String::with_capacity(NAME_MAX_LEN);

        loop {
            let size = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;

            if size == 0 {
                break;
            } else if usize::from(size) <= LABEL_MAX_LEN {
                let Some(os) = buffer.take(size as usize) else {
                    return Err(Error::DomainTooShort(id));
                };
                if !dotted.is_empty() {
                    dotted.push('.');
                }
                for o in os {
                    dotted.push(o.to_ascii_lowercase() as char);
                }
                if dotted.len() > NAME_MAX_LEN {
                    return Err(Error::DomainTooLong(id));
                }
            } else if size >= 192 {
                // the top two bits being set makes this two-octet
                // field a pointer; the low 14 bits are an offset from
                // the start of the message
                let hi = size & 0b0011_1111;
                let lo = buffer.next_u8().ok_or(Error::DomainTooShort(id))?;
                let ptr = usize::from(u16::from_be_bytes([hi, lo]));

                // pointer must be to an earlier occurrence (not
                // merely a different one: an earlier one: RFC 1035
                // section 4.1.4)
                if ptr >= start {
                    return Err(Error::DomainPointerInvalid(id));
                }

                let rest =
                    Self::deserialise_bounded(id, &mut buffer.at_offset(ptr), jumps + 1)?;
                if !rest.is_root() {
                    if !dotted.is_empty() {
                        dotted.push('.');
                    }
                    dotted.push_str(rest.as_dotted());
                }
                break;
            } else {
                return Err(Error::DomainLabelInvalid(id));
            }
        }

        if dotted.len() > NAME_MAX_LEN {
            Err(Error::DomainTooLong(id))
        } else {
            Ok(DomainName::from_decoded(dotted))
        }
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header, for
/// correlating the failure with the query that prompted it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// The message does not have exactly one question.
    QuestionCount { id: u16, qdcount: u16 },

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// The server answered with FORMAT_ERROR: it could not interpret
    /// the query.  The echoed question is kept so the rejection can
    /// be delivered to whoever is waiting on it.
    ServerRejected { id: u16, question: Question },

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record is the wrong format.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 125 octets in size.
    DomainTooLong(u16),

    /// A domain pointer points forwards, or a chain of pointers is
    /// too long to be anything but a loop.
    DomainPointerInvalid(u16),

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid(u16),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CompletelyBusted => write!(f, "datagram too short to carry an ID"),
            Error::HeaderTooShort(id) => write!(f, "[{id}] header too short"),
            Error::QuestionCount { id, qdcount } => {
                write!(f, "[{id}] expected exactly 1 question, got {qdcount}")
            }
            Error::QuestionTooShort(id) => write!(f, "[{id}] question too short"),
            Error::ServerRejected { id, question } => {
                write!(f, "[{id}] server rejected query '{question}' as malformed")
            }
            Error::ResourceRecordTooShort(id) => write!(f, "[{id}] resource record too short"),
            Error::ResourceRecordInvalid(id) => write!(f, "[{id}] resource record invalid"),
            Error::DomainTooShort(id) => write!(f, "[{id}] domain name incomplete"),
            Error::DomainTooLong(id) => write!(f, "[{id}] domain name too long"),
            Error::DomainPointerInvalid(id) => write!(f, "[{id}] domain pointer invalid"),
            Error::DomainLabelInvalid(id) => write!(f, "[{id}] domain label invalid"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        if self.octets.len() > self.position {
            let a = self.octets[self.position];
            self.position += 1;
            Some(a)
        } else {
            None
        }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        if self.octets.len() > self.position + 3 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            let c = self.octets[self.position + 2];
            let d = self.octets[self.position + 3];
            self.position += 4;
            Some(u32::from_be_bytes([a, b, c, d]))
        } else {
            None
        }
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.octets.len() >= self.position + size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}
