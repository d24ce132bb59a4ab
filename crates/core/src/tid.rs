//! Physical row identifiers.

use std::error::Error;
use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use postgres_types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

/// A physical row address (the PostgreSQL `ctid` system column).
///
/// Stable within a single transactional snapshot, not across vacuum or
/// restart. Used only for in-snapshot deduplication and extraction
/// predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid {
    pub block: u32,
    pub offset: u16,
}

impl Tid {
    /// Pack into a single integer for set membership.
    pub fn to_u64(self) -> u64 {
        (self.block as u64) << 16 | self.offset as u64
    }
}

impl fmt::Display for Tid {
    /// The text form PostgreSQL uses for `tid` literals: `(block,offset)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

impl<'a> FromSql<'a> for Tid {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let mut raw = raw;
        if raw.len() != 6 {
            return Err(format!("invalid tid length {}", raw.len()).into());
        }
        let block = raw.get_u32();
        let offset = raw.get_u16();
        Ok(Tid { block, offset })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TID
    }
}

impl ToSql for Tid {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.put_u32(self.block);
        out.put_u16(self.offset);
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TID
    }

    to_sql_checked!();
}

/// Render a slice of tids as a `tid[]` literal, e.g.
/// `'{"(0,1)","(12,3)"}'::tid[]`.
///
/// `COPY` statements cannot carry bind parameters, so the extraction query
/// embeds its row ids this way.
pub fn array_literal(tids: &[Tid]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(16 + tids.len() * 12);
    out.push_str("'{");
    for (i, tid) in tids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "\"{tid}\"");
    }
    out.push_str("}'::tid[]");
    out
}
