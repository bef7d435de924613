//! Cookie-based handle table.
//!
//! Cookies are opaque 64-bit values handed out to remote peers in place of
//! object pointers. Each cookie is unique for the lifetime of the table: a
//! monotonically increasing counter tagged with the object kind in its low
//! bits. Because cookies travel over the wire, a lookup whose hash slot
//! matches but whose type tag does not must fail rather than hand back an
//! object of the wrong kind.
//!
//! The table lives inside the interface-table lock of the owning [`Net`]
//! context; every method takes `&mut self`, so holding that lock is
//! enforced by the borrow rather than by convention.
//!
//! [`Net`]: crate::net::Net

use crate::error::{NetError, NetResult};

/// The object kinds a cookie can refer to, encoded in its low bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CookieType {
    /// Event queue descriptor.
    EventQueue = 0,
    /// Memory descriptor.
    MemDesc = 1,
    /// Match entry descriptor.
    MatchEntry = 2,
    /// Message descriptor.
    Message = 3,
}

/// Number of cookie type tags; the cookie counter steps by this much so
/// the tag bits never collide with the counter.
pub const COOKIE_TYPES: u64 = 4;

impl CookieType {
    fn from_bits(bits: u64) -> Option<CookieType> {
        match bits {
            0 => Some(CookieType::EventQueue),
            1 => Some(CookieType::MemDesc),
            2 => Some(CookieType::MatchEntry),
            3 => Some(CookieType::Message),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            CookieType::EventQueue => "eq",
            CookieType::MemDesc => "md",
            CookieType::MatchEntry => "me",
            CookieType::Message => "msg",
        }
    }
}

struct HandleEntry {
    cookie: u64,
    slot: usize,
}

/// Hash table mapping live cookies to pool slot indices.
pub struct HandleTable {
    buckets: Vec<Vec<HandleEntry>>,
    next_cookie: u64,
    live: usize,
}

impl HandleTable {
    /// Allocates a table sized for the expected concurrent object
    /// population. Fails with `NoSpace` for a zero capacity.
    pub fn new(capacity: usize) -> NetResult<HandleTable> {
        if capacity == 0 {
            return Err(NetError::NoSpace {
                what: "handle hash table",
            });
        }
        let mut buckets = Vec::new();
        buckets.resize_with(capacity, Vec::new);
        Ok(HandleTable {
            buckets,
            // Start past the tag space so the counter part of the first
            // cookie is nonzero.
            next_cookie: COOKIE_TYPES,
            live: 0,
        })
    }

    /// Produces a fresh cookie tagged with `kind` and links it to `slot`.
    pub fn allocate(&mut self, kind: CookieType, slot: usize) -> u64 {
        let cookie = self.next_cookie | kind as u64;
        self.next_cookie += COOKIE_TYPES;

        let bucket = (cookie as usize) % self.buckets.len();
        self.buckets[bucket].push(HandleEntry { cookie, slot });
        self.live += 1;
        cookie
    }

    /// Resolves a cookie of the expected kind to its pool slot.
    ///
    /// The type tag is checked before the bucket chain is scanned, so a
    /// stale or substituted cookie of the wrong kind can never resolve,
    /// even if its numeric value collides with a live one.
    pub fn lookup(&self, cookie: u64, kind: CookieType) -> Option<usize> {
        if CookieType::from_bits(cookie & (COOKIE_TYPES - 1)) != Some(kind) {
            return None;
        }

        let bucket = (cookie as usize) % self.buckets.len();
        self.buckets[bucket]
            .iter()
            .find(|e| e.cookie == cookie)
            .map(|e| e.slot)
    }

    /// Unlinks a cookie from its bucket. Does not free the owning object.
    ///
    /// A handle is invalidated exactly once, at object teardown; a second
    /// invalidate is a caller bug.
    pub fn invalidate(&mut self, cookie: u64) {
        let bucket = (cookie as usize) % self.buckets.len();
        let chain = &mut self.buckets[bucket];
        let pos = chain.iter().position(|e| e.cookie == cookie);
        match pos {
            Some(pos) => {
                chain.swap_remove(pos);
                self.live -= 1;
            }
            None => panic!("invalidating dead handle {:#x}", cookie),
        }
    }

    /// Number of live handles.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Releases the table. All objects must already have been destroyed;
    /// a live handle here means an earlier leak, which is unrecoverable.
    pub fn fini(&mut self) {
        assert!(
            self.live == 0,
            "handle table torn down with {} live handles",
            self.live
        );
        self.buckets.clear();
    }
}
