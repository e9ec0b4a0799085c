//! Route request parsing and per-request bulk context.

use sonic_orch_common::FieldValue;
use sonic_sai::{StatusSlot, VirtualRouterOid};
use sonic_types::{IpAddress, IpPrefix, MacAddress};
use thiserror::Error;

use super::nexthop::{parse_label_stack, NextHopKey, ParseNextHopKeyError};
use super::nhg::NextHopGroupKey;
use super::providers::{InterfaceDirectory, VrfDirectory};

/// Key of the control entry that starts and ends a resync.
pub const RESYNC_KEY: &str = "resync";

/// Route keys naming a VRF start with this.
pub const VRF_PREFIX: &str = "Vrf";

const LOOPBACK_PREFIX: &str = "Loopback";

/// Why a route request could not be turned into next hops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRouteError {
    #[error("invalid route key {0}")]
    InvalidKey(String),

    #[error("route has both nexthop_group and nexthop/ifname")]
    GroupAndNextHops,

    #[error("route has an empty ifname field")]
    EmptyIfname,

    #[error("route is received on non L3 VNI {0}")]
    NonL3Vni(u32),

    #[error("invalid VNI {0}")]
    InvalidVni(String),

    #[error("invalid weight {0}")]
    InvalidWeight(String),

    #[error("inconsistent number of endpoints and srv6 vpn sids")]
    VpnSidCount,

    #[error("inconsistent number of srv6 segments and sources")]
    SegmentCount,

    #[error("invalid router mac field {0}")]
    RouterMacCount(String),

    #[error("invalid vni label field {0}")]
    VniLabelCount(String),

    #[error(transparent)]
    NextHop(#[from] ParseNextHopKeyError),
}

impl ParseRouteError {
    /// Returns true if the request may become valid later and should stay
    /// queued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ParseRouteError::NonL3Vni(_))
    }
}

/// Splits a delimited field. An empty string has no tokens and a trailing
/// delimiter adds no empty token.
pub fn tokenize(s: &str, delimiter: char) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut tokens: Vec<String> = s.split(delimiter).map(str::to_string).collect();
    if tokens.last().is_some_and(String::is_empty) {
        tokens.pop();
    }
    tokens
}

/// Splits a route key into its VRF name and prefix. Addresses without a
/// length are host prefixes.
pub fn parse_route_key(key: &str) -> Result<(Option<&str>, IpPrefix), ParseRouteError> {
    let (vrf, prefix) = if key.starts_with(VRF_PREFIX) {
        let (vrf, prefix) = key
            .split_once(':')
            .ok_or_else(|| ParseRouteError::InvalidKey(key.to_string()))?;
        (Some(vrf), prefix)
    } else {
        (None, key)
    };

    let prefix = if prefix.contains('/') {
        prefix.parse()
    } else {
        prefix
            .parse::<IpAddress>()
            .and_then(|ip| IpPrefix::new(ip, ip.max_prefix_len()))
    }
    .map_err(|_| ParseRouteError::InvalidKey(key.to_string()))?;

    Ok((vrf, prefix))
}

/// Builds the consumer key of a route, as used by resync.
pub fn route_key_string(vrf_name: Option<&str>, prefix: &IpPrefix) -> String {
    match vrf_name {
        Some(vrf) => format!("{}:{}", vrf, prefix),
        None => prefix.to_string(),
    }
}

/// Returns true for interfaces whose routes are never programmed.
pub fn is_exception_interface(alias: &str) -> bool {
    matches!(alias, "eth0" | "docker0" | "lo") || alias.starts_with(LOOPBACK_PREFIX)
}

/// Recognized fields of a route SET. Empty values read as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFields {
    pub nexthop: String,
    pub ifname: String,
    pub mpls_nh: String,
    pub vni_label: String,
    pub router_mac: String,
    pub weight: String,
    pub blackhole: bool,
    pub nexthop_group: Option<String>,
    pub segment: String,
    pub seg_src: String,
    pub vpn_sid: String,
    pub pic_context_id: Option<String>,
    pub protocol: Option<String>,
    pub fallback_to_default_route: bool,
}

impl RouteFields {
    pub fn parse(fvs: &[FieldValue]) -> Self {
        let mut fields = Self::default();
        for (field, value) in fvs {
            match field.as_str() {
                "blackhole" => fields.blackhole = value == "true",
                "fallback_to_default_route" => fields.fallback_to_default_route = value == "true",
                _ if value.is_empty() => {}
                "nexthop" => fields.nexthop = value.clone(),
                "ifname" => fields.ifname = value.clone(),
                "mpls_nh" => fields.mpls_nh = value.clone(),
                "vni_label" => fields.vni_label = value.clone(),
                "router_mac" => fields.router_mac = value.clone(),
                "weight" => fields.weight = value.clone(),
                "nexthop_group" => fields.nexthop_group = Some(value.clone()),
                "segment" => fields.segment = value.clone(),
                "seg_src" => fields.seg_src = value.clone(),
                "vpn_sid" => fields.vpn_sid = value.clone(),
                "pic_context_id" => fields.pic_context_id = Some(value.clone()),
                "protocol" => fields.protocol = Some(value.clone()),
                _ => {}
            }
        }
        fields
    }

    pub fn is_overlay(&self) -> bool {
        !self.vni_label.is_empty()
    }

    pub fn is_srv6(&self) -> bool {
        !self.segment.is_empty() || !self.seg_src.is_empty() || !self.vpn_sid.is_empty()
    }

    pub fn is_srv6_vpn(&self) -> bool {
        !self.vpn_sid.is_empty() || self.pic_context_id.is_some()
    }

    /// Turns raw next-hop lists into a group key.
    ///
    /// Only valid without `nexthop_group`. The returned aliases line up
    /// with the next hops as listed, after `tun0` remapping.
    pub fn next_hops(
        &self,
        prefix: &IpPrefix,
        interfaces: &dyn InterfaceDirectory,
        vrfs: &dyn VrfDirectory,
    ) -> Result<ParsedNextHops, ParseRouteError> {
        let mut ipv = tokenize(&self.nexthop, ',');
        let mut alsv = tokenize(&self.ifname, ',');
        let mpls_nhv = tokenize(&self.mpls_nh, ',');
        let vni_labelv = tokenize(&self.vni_label, ',');
        let rmacv = tokenize(&self.router_mac, ',');
        let weightv = tokenize(&self.weight, ',');
        let srv6_segv = tokenize(&self.segment, ',');
        let srv6_srcv = tokenize(&self.seg_src, ',');
        let srv6_vpn_sidv = tokenize(&self.vpn_sid, ',');

        if alsv.is_empty() && !self.blackhole && !self.is_srv6() {
            return Err(ParseRouteError::EmptyIfname);
        }
        ipv.resize(alsv.len(), String::new());

        let mut vnis = Vec::with_capacity(vni_labelv.len());
        for label in &vni_labelv {
            let vni: u32 = label
                .parse()
                .map_err(|_| ParseRouteError::InvalidVni(label.clone()))?;
            if !vrfs.is_l3_vni(vni) {
                return Err(ParseRouteError::NonL3Vni(vni));
            }
            vnis.push(vni);
        }

        let zero = prefix.address().unspecified_like();
        let ips = ipv
            .iter()
            .map(|ip| {
                if ip.is_empty() {
                    Ok(zero)
                } else {
                    ip.parse::<IpAddress>()
                        .map_err(|_| ParseNextHopKeyError {
                            message: format!("Invalid IP address: {}", ip),
                        })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if alsv.iter().any(|a| is_exception_interface(a)) {
            return Ok(ParsedNextHops {
                nhg: NextHopGroupKey::new(),
                aliases: alsv,
                exception_interface: true,
            });
        }

        let nhg = if self.blackhole {
            NextHopGroupKey::new()
        } else if self.is_srv6() {
            let srv6_vpn = self.is_srv6_vpn();
            let srv6_seg = !self.segment.is_empty();
            if srv6_vpn && srv6_vpn_sidv.len() != srv6_srcv.len() {
                return Err(ParseRouteError::VpnSidCount);
            }
            if srv6_seg && srv6_segv.len() != srv6_srcv.len() {
                return Err(ParseRouteError::SegmentCount);
            }
            let v4_zero = IpAddress::V4(sonic_types::Ipv4Address::UNSPECIFIED);
            NextHopGroupKey::srv6(srv6_srcv.iter().enumerate().map(|(i, source)| {
                NextHopKey::srv6(
                    ips.get(i).copied().unwrap_or(v4_zero),
                    if srv6_seg { srv6_segv[i].as_str() } else { "" },
                    source.as_str(),
                    if srv6_vpn { srv6_vpn_sidv[i].as_str() } else { "" },
                )
            }))
        } else if !self.is_overlay() {
            let weights = if weightv.len() == ips.len() {
                weightv
                    .iter()
                    .map(|w| w.parse::<u32>().map_err(|_| ParseRouteError::InvalidWeight(w.clone())))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                vec![0; ips.len()]
            };

            let mut nexthops = Vec::with_capacity(ips.len());
            for (i, ip) in ips.iter().enumerate() {
                if alsv[i] == "tun0" && !ip.is_zero() {
                    if let Some(alias) = interfaces.router_intf_alias(ip) {
                        alsv[i] = alias;
                    }
                }
                let mut nh = NextHopKey::new(*ip, alsv[i].as_str()).with_weight(weights[i]);
                match mpls_nhv.get(i).map(String::as_str) {
                    None | Some("na") => {}
                    Some(labels) => nh = nh.with_labels(parse_label_stack(labels)?),
                }
                nexthops.push(nh);
            }
            NextHopGroupKey::from_nexthops(nexthops)
        } else {
            if ips.len() != rmacv.len() {
                return Err(ParseRouteError::RouterMacCount(self.router_mac.clone()));
            }
            if ips.len() != vnis.len() {
                return Err(ParseRouteError::VniLabelCount(self.vni_label.clone()));
            }
            let mut nexthops = Vec::with_capacity(ips.len());
            for (i, ip) in ips.iter().enumerate() {
                let mac: MacAddress = rmacv[i].parse().map_err(|_| ParseNextHopKeyError {
                    message: format!("Invalid router MAC: {}", rmacv[i]),
                })?;
                nexthops.push(NextHopKey::overlay(*ip, alsv[i].as_str(), vnis[i], mac));
            }
            NextHopGroupKey::overlay(nexthops)
        };

        Ok(ParsedNextHops {
            nhg,
            aliases: alsv,
            exception_interface: false,
        })
    }
}

/// Next hops built from a route's raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNextHops {
    pub nhg: NextHopGroupKey,
    pub aliases: Vec<String>,
    /// Some next hop goes out a management, docker or loopback interface.
    pub exception_interface: bool,
}

/// What a staged bulk request does to the route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedOp {
    Create,
    Remove,
    Forward,
    Drop,
    NextHop,
    PrefixAggId,
}

/// Everything one route request carries between the staging pass and the
/// pass that reads the bulk results.
#[derive(Debug, Clone)]
pub struct RouteBulkContext {
    pub key: String,
    pub is_set: bool,
    pub vrf_id: VirtualRouterOid,
    pub prefix: IpPrefix,
    pub nhg: NextHopGroupKey,
    pub nhg_index: Option<String>,
    pub context_index: Option<String>,
    pub protocol: String,
    pub excp_intfs_flag: bool,
    pub fallback_to_default_route: bool,
    /// The external group is temporary; keep retrying the route.
    pub using_temp_nhg: bool,
    /// Single next hop programmed while the real group cannot be created.
    pub tmp_next_hop: NextHopGroupKey,
    /// Status slots of every staged request, in staging order.
    pub object_statuses: Vec<(StagedOp, StatusSlot)>,
}

impl RouteBulkContext {
    pub fn new(key: impl Into<String>, is_set: bool, vrf_id: VirtualRouterOid, prefix: IpPrefix) -> Self {
        Self {
            key: key.into(),
            is_set,
            vrf_id,
            prefix,
            nhg: NextHopGroupKey::new(),
            nhg_index: None,
            context_index: None,
            protocol: String::new(),
            excp_intfs_flag: false,
            fallback_to_default_route: false,
            using_temp_nhg: false,
            tmp_next_hop: NextHopGroupKey::new(),
            object_statuses: Vec::new(),
        }
    }

    pub fn is_staged(&self) -> bool {
        !self.object_statuses.is_empty()
    }

    pub fn stage(&mut self, op: StagedOp, slot: StatusSlot) {
        self.object_statuses.push((op, slot));
    }

    /// The first slot staged for `op`.
    pub fn slot(&self, op: StagedOp) -> Option<StatusSlot> {
        self.slots(op).next()
    }

    pub fn slots(&self, op: StagedOp) -> impl Iterator<Item = StatusSlot> + '_ {
        self.object_statuses
            .iter()
            .filter(move |(staged, _)| *staged == op)
            .map(|(_, slot)| *slot)
    }
}
