//! Type-safe SAI object ID wrappers.
//!
//! A route can point at a next hop, a next-hop group, a router interface or
//! the CPU port, so the route attribute layer works with
//! [`RawSaiObjectId`]. Everything that has exactly one meaning (the VRF of a
//! route entry, a group handle, a group member handle) uses a typed id.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw SAI object ID type (matches sai_object_id_t).
pub type RawSaiObjectId = u64;

/// The null object ID (SAI_NULL_OBJECT_ID).
pub const NULL_OBJECT_ID: RawSaiObjectId = 0;

/// Marker trait for SAI object kinds.
pub trait SaiObjectKind: Send + Sync + 'static {
    /// Returns the SAI object type name for debugging.
    fn type_name() -> &'static str;

    /// Object type tag stored in the top 16 bits of ids minted by
    /// [`crate::VirtualSwitch`].
    fn type_tag() -> u16;
}

/// A type-safe SAI object ID.
///
/// # Examples
///
/// ```
/// use sonic_sai::{NextHopGroupOid, VirtualRouterOid};
///
/// let vrf = VirtualRouterOid::from_raw(0x3000000000001).unwrap();
/// let nhg = NextHopGroupOid::from_raw(0x5000000000001).unwrap();
/// assert_eq!(vrf.as_raw(), 0x3000000000001);
///
/// // fn takes_vrf(v: VirtualRouterOid) {}
/// // takes_vrf(nhg);  // Error: expected VirtualRouterOid, found NextHopGroupOid
/// # let _ = nhg;
/// ```
#[derive(Clone, Copy)]
pub struct SaiObjectId<T: SaiObjectKind> {
    raw: RawSaiObjectId,
    _marker: PhantomData<T>,
}

impl<T: SaiObjectKind> SaiObjectId<T> {
    /// The null object ID.
    pub const NULL: Self = Self {
        raw: NULL_OBJECT_ID,
        _marker: PhantomData,
    };

    /// Returns `None` if the raw value is the null object ID.
    pub fn from_raw(raw: RawSaiObjectId) -> Option<Self> {
        if raw == NULL_OBJECT_ID {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Creates a new object ID from a raw value, including null.
    pub const fn from_raw_unchecked(raw: RawSaiObjectId) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn as_raw(&self) -> RawSaiObjectId {
        self.raw
    }

    pub const fn is_null(&self) -> bool {
        self.raw == NULL_OBJECT_ID
    }

    pub const fn is_valid(&self) -> bool {
        self.raw != NULL_OBJECT_ID
    }
}

impl<T: SaiObjectKind> fmt::Debug for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:016x})", T::type_name(), self.raw)
    }
}

impl<T: SaiObjectKind> fmt::Display for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.raw)
    }
}

impl<T: SaiObjectKind> PartialEq for SaiObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: SaiObjectKind> Eq for SaiObjectId<T> {}

impl<T: SaiObjectKind> PartialOrd for SaiObjectId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SaiObjectKind> Ord for SaiObjectId<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: SaiObjectKind> Hash for SaiObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: SaiObjectKind> Default for SaiObjectId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $tag:literal, $oid_alias:ident) => {
        #[doc = concat!("Marker type for SAI ", $type_name, " objects.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl SaiObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }

            fn type_tag() -> u16 {
                $tag
            }
        }

        #[doc = concat!("Type alias for ", $type_name, " object IDs.")]
        pub type $oid_alias = SaiObjectId<$name>;
    };
}

define_object_kind!(SwitchKind, "Switch", 0x21, SwitchOid);
define_object_kind!(PortKind, "Port", 0x01, PortOid);
define_object_kind!(VirtualRouterKind, "VirtualRouter", 0x03, VirtualRouterOid);
define_object_kind!(RouterInterfaceKind, "RouterInterface", 0x06, RouterInterfaceOid);
define_object_kind!(NextHopKind, "NextHop", 0x04, NextHopOid);
define_object_kind!(NextHopGroupKind, "NextHopGroup", 0x05, NextHopGroupOid);
define_object_kind!(NextHopGroupMemberKind, "NextHopGroupMember", 0x2d, NextHopGroupMemberOid);

/// Returns the object type tag encoded in an id minted by
/// [`crate::VirtualSwitch`].
pub const fn object_type_tag(raw: RawSaiObjectId) -> u16 {
    (raw >> 48) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_oid_creation() {
        let nhg = NextHopGroupOid::from_raw(0x5000000000001).unwrap();
        assert_eq!(nhg.as_raw(), 0x5000000000001);
        assert!(nhg.is_valid());
        assert!(!nhg.is_null());
    }

    #[test]
    fn test_null_oid() {
        assert!(VirtualRouterOid::from_raw(NULL_OBJECT_ID).is_none());
        assert!(VirtualRouterOid::NULL.is_null());
        assert_eq!(VirtualRouterOid::default(), VirtualRouterOid::NULL);
    }

    #[test]
    fn test_oid_debug_names_the_kind() {
        let member = NextHopGroupMemberOid::from_raw(0x2d000000000007).unwrap();
        let debug = format!("{:?}", member);
        assert!(debug.starts_with("NextHopGroupMember("));
        assert!(debug.contains("0x002d000000000007"));
    }

    #[test]
    fn test_oid_ordering() {
        let low = VirtualRouterOid::from_raw(0x3000000000001).unwrap();
        let high = VirtualRouterOid::from_raw(0x3000000000002).unwrap();
        assert!(low < high);
        assert!(VirtualRouterOid::NULL < low);
    }

    #[test]
    fn test_object_type_tag() {
        assert_eq!(object_type_tag(0x0005_0000_0000_0001), NextHopGroupKind::type_tag());
        assert_eq!(object_type_tag(0x0003_0000_0000_0001), VirtualRouterKind::type_tag());
    }
}
