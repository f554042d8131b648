//! CoAP `Code` (RFC 7252 §3): packed as `class.detail`, 3+5 bits on the wire.
use std::fmt;

/// `class.detail` code, e.g. `0.01` (GET) or `2.05` (Content).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Code {
    pub class: u8,
    pub detail: u8,
}

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);
    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);
    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);
    pub const CONTINUE: Code = Code::new(2, 31);
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code::new(4, 8);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code::new(4, 13);
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        Self { class, detail }
    }

    /// Decode from the single wire byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            class: byte >> 5,
            detail: byte & 0x1f,
        }
    }

    /// Encode to the single wire byte.
    pub fn to_byte(self) -> u8 {
        (self.class << 5) | (self.detail & 0x1f)
    }

    pub fn is_empty(self) -> bool {
        self == Self::EMPTY
    }

    /// class 0, detail 1..=4.
    pub fn is_request(self) -> bool {
        self.class == 0 && (1..=4).contains(&self.detail)
    }

    pub fn is_response(self) -> bool {
        matches!(self.class, 2 | 4 | 5)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}
