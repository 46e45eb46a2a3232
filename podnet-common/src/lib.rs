#![cfg_attr(not(test), no_std)]

// Record layouts for the overlay lookup tables, shared between userspace and
// the eBPF classifiers. Keep this crate `no_std` friendly so it can be used
// from eBPF code.

pub mod classify;
pub mod frame;

pub use classify::{
    classify_veth_ingress, classify_vxlan_egress, classify_vxlan_ingress, EgressAction,
    LocalRewrite, OverlayView, TunnelParams, VethAction, VxlanIngressAction,
};

/// VNI stamped on every frame this overlay pushes onto the tunnel device.
/// Distinguishes podnet traffic from other overlays sharing the same VXLAN
/// device.
pub const OVERLAY_TUNNEL_ID: u32 = 13190;

/// Outer-header TTL for tunnel-encapsulated frames.
pub const OVERLAY_TUNNEL_TTL: u8 = 64;

/// Capacity of each lookup table, sized to a node's pod/peer density.
pub const TABLE_CAPACITY: u32 = 256;

/// Delivery info for a pod scheduled on this node, keyed by its IPv4 address
/// (native-endian u32). Written only by the control plane when the pod's veth
/// pair is provisioned, removed on teardown.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LocalEndpoint {
    /// ifindex of the container-side end of the pod's veth pair.
    pub peer_ifindex: u32,
    /// Hardware address of the pod's interface.
    pub pod_mac: [u8; 6],
    /// Hardware address of the host-side peer, used as source in rewritten
    /// frames.
    pub host_mac: [u8; 6],
}

/// Placement of a pod hosted elsewhere in the cluster, keyed by the pod's
/// IPv4 address. An address is either local or remote, never both.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RemoteNode {
    /// IPv4 address of the node currently hosting the pod.
    pub node_ip: u32,
}

/// Well-known device roles in the registry table. The discriminant is the
/// map key.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DeviceRole {
    Vxlan = 1,
    Veth = 2,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct DeviceRecord {
    pub ifindex: u32,
}

// When compiled for userspace with the `user` feature enabled the crate
// exposes an implementation of `aya::Pod` for these types so they can be
// used with aya's typed map APIs. We keep this behind a feature so the
// no_std eBPF side doesn't pull in userspace-only dependencies.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::{DeviceRecord, LocalEndpoint, RemoteNode};
    use aya::Pod;

    unsafe impl Pod for LocalEndpoint {}
    unsafe impl Pod for RemoteNode {}
    unsafe impl Pod for DeviceRecord {}
}
