// Forwarding decisions for the three attachment points, expressed as pure
// functions over a read-only view of the overlay tables. The eBPF programs
// apply the returned action; tests drive the same functions over hash-map
// views.

use crate::{DeviceRole, LocalEndpoint, RemoteNode, OVERLAY_TUNNEL_ID, OVERLAY_TUNNEL_TTL};

/// Read-only handle over the control-plane-owned tables. The dataplane never
/// writes through this; entries may appear or vanish between calls within a
/// single frame's classification.
pub trait OverlayView {
    fn local_endpoint(&self, pod_ip: u32) -> Option<LocalEndpoint>;
    fn remote_node(&self, pod_ip: u32) -> Option<RemoteNode>;
    fn device_index(&self, role: DeviceRole) -> Option<u32>;
}

/// MAC rewrite plus delivery target for the local fast path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LocalRewrite {
    pub peer_ifindex: u32,
    /// New source MAC, the host-side veth address.
    pub src_mac: [u8; 6],
    /// New destination MAC, the pod's address.
    pub dst_mac: [u8; 6],
}

impl LocalRewrite {
    #[inline(always)]
    fn for_endpoint(ep: &LocalEndpoint) -> Self {
        Self {
            peer_ifindex: ep.peer_ifindex,
            src_mac: ep.host_mac,
            dst_mac: ep.pod_mac,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VethAction {
    /// Not overlay traffic, or no routing information; default stack decides.
    Pass,
    /// Destination pod is on this node: rewrite MACs and redirect into the
    /// peer of the recorded interface.
    Deliver(LocalRewrite),
    /// Destination pod is remote: redirect unmodified out the tunnel device.
    Forward { ifindex: u32 },
}

/// Parameters for the tunnel key attached ahead of VXLAN encapsulation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TunnelParams {
    pub remote_ipv4: u32,
    pub tunnel_id: u32,
    pub tos: u8,
    pub ttl: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EgressAction {
    /// Not managed overlay traffic; default device behavior applies.
    Pass,
    /// Attach tunnel metadata, then let encapsulation proceed. A failed
    /// attach must drop the frame, never forward it misrouted.
    Encap(TunnelParams),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VxlanIngressAction {
    Pass,
    Deliver(LocalRewrite),
}

/// Decide the fate of a frame arriving from a pod's veth, before host
/// routing sees it.
#[inline(always)]
pub fn classify_veth_ingress<V: OverlayView>(dst_ip: u32, view: &V) -> VethAction {
    if let Some(ep) = view.local_endpoint(dst_ip) {
        return VethAction::Deliver(LocalRewrite::for_endpoint(&ep));
    }
    if view.remote_node(dst_ip).is_some() {
        // No tunnel device registered: fail open, the default stack may
        // still know a route.
        return match view.device_index(DeviceRole::Vxlan) {
            Some(ifindex) => VethAction::Forward { ifindex },
            None => VethAction::Pass,
        };
    }
    VethAction::Pass
}

/// Decide whether a frame about to leave the tunnel device needs overlay
/// tunnel metadata.
#[inline(always)]
pub fn classify_vxlan_egress<V: OverlayView>(dst_ip: u32, view: &V) -> EgressAction {
    match view.remote_node(dst_ip) {
        Some(remote) => EgressAction::Encap(TunnelParams {
            remote_ipv4: remote.node_ip,
            tunnel_id: OVERLAY_TUNNEL_ID,
            tos: 0,
            ttl: OVERLAY_TUNNEL_TTL,
        }),
        None => EgressAction::Pass,
    }
}

/// Decide whether a freshly decapsulated frame belongs to a pod on this
/// node.
#[inline(always)]
pub fn classify_vxlan_ingress<V: OverlayView>(dst_ip: u32, view: &V) -> VxlanIngressAction {
    match view.local_endpoint(dst_ip) {
        Some(ep) => VxlanIngressAction::Deliver(LocalRewrite::for_endpoint(&ep)),
        None => VxlanIngressAction::Pass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const POD_MAC: [u8; 6] = [0x02, 0x42, 0x0a, 0x01, 0x00, 0x02];
    const HOST_MAC: [u8; 6] = [0x02, 0x42, 0xac, 0x11, 0x00, 0x01];

    #[derive(Default)]
    struct TestTables {
        local: HashMap<u32, LocalEndpoint>,
        remote: HashMap<u32, RemoteNode>,
        devices: HashMap<u32, u32>,
    }

    impl OverlayView for TestTables {
        fn local_endpoint(&self, pod_ip: u32) -> Option<LocalEndpoint> {
            self.local.get(&pod_ip).copied()
        }

        fn remote_node(&self, pod_ip: u32) -> Option<RemoteNode> {
            self.remote.get(&pod_ip).copied()
        }

        fn device_index(&self, role: DeviceRole) -> Option<u32> {
            self.devices.get(&(role as u32)).copied()
        }
    }

    fn ip(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    #[test]
    fn veth_delivers_local_pod_with_rewrite() {
        let mut tables = TestTables::default();
        tables.local.insert(
            ip(10, 1, 0, 2),
            LocalEndpoint {
                peer_ifindex: 7,
                pod_mac: POD_MAC,
                host_mac: HOST_MAC,
            },
        );

        match classify_veth_ingress(ip(10, 1, 0, 2), &tables) {
            VethAction::Deliver(rewrite) => {
                assert_eq!(rewrite.peer_ifindex, 7);
                assert_eq!(rewrite.src_mac, HOST_MAC);
                assert_eq!(rewrite.dst_mac, POD_MAC);
            }
            other => panic!("expected local delivery, got {other:?}"),
        }
    }

    #[test]
    fn veth_forwards_remote_pod_to_tunnel_device() {
        let mut tables = TestTables::default();
        tables
            .remote
            .insert(ip(10, 1, 1, 3), RemoteNode { node_ip: ip(192, 168, 64, 11) });
        tables.devices.insert(DeviceRole::Vxlan as u32, 4);

        assert_eq!(
            classify_veth_ingress(ip(10, 1, 1, 3), &tables),
            VethAction::Forward { ifindex: 4 }
        );
    }

    #[test]
    fn veth_passes_when_tunnel_device_missing() {
        let mut tables = TestTables::default();
        tables
            .remote
            .insert(ip(10, 1, 1, 3), RemoteNode { node_ip: ip(192, 168, 64, 11) });

        assert_eq!(classify_veth_ingress(ip(10, 1, 1, 3), &tables), VethAction::Pass);
    }

    #[test]
    fn veth_passes_unknown_destination() {
        let tables = TestTables::default();
        assert_eq!(classify_veth_ingress(ip(8, 8, 8, 8), &tables), VethAction::Pass);
    }

    #[test]
    fn local_endpoint_shadows_remote_record() {
        // An IP must never be in both tables, but if a migration race puts
        // it there the local record wins, matching lookup order.
        let mut tables = TestTables::default();
        tables.local.insert(
            ip(10, 1, 0, 2),
            LocalEndpoint {
                peer_ifindex: 9,
                pod_mac: POD_MAC,
                host_mac: HOST_MAC,
            },
        );
        tables
            .remote
            .insert(ip(10, 1, 0, 2), RemoteNode { node_ip: ip(192, 168, 64, 11) });
        tables.devices.insert(DeviceRole::Vxlan as u32, 4);

        assert!(matches!(
            classify_veth_ingress(ip(10, 1, 0, 2), &tables),
            VethAction::Deliver(_)
        ));
    }

    #[test]
    fn egress_attaches_tunnel_metadata_for_remote_pod() {
        let mut tables = TestTables::default();
        tables
            .remote
            .insert(ip(10, 1, 1, 3), RemoteNode { node_ip: ip(192, 168, 64, 11) });

        assert_eq!(
            classify_vxlan_egress(ip(10, 1, 1, 3), &tables),
            EgressAction::Encap(TunnelParams {
                remote_ipv4: ip(192, 168, 64, 11),
                tunnel_id: OVERLAY_TUNNEL_ID,
                tos: 0,
                ttl: OVERLAY_TUNNEL_TTL,
            })
        );
    }

    #[test]
    fn egress_passes_unmanaged_traffic() {
        let tables = TestTables::default();
        assert_eq!(classify_vxlan_egress(ip(10, 1, 1, 3), &tables), EgressAction::Pass);
    }

    #[test]
    fn vxlan_ingress_delivers_local_pod() {
        let mut tables = TestTables::default();
        tables.local.insert(
            ip(10, 1, 0, 2),
            LocalEndpoint {
                peer_ifindex: 7,
                pod_mac: POD_MAC,
                host_mac: HOST_MAC,
            },
        );

        match classify_vxlan_ingress(ip(10, 1, 0, 2), &tables) {
            VxlanIngressAction::Deliver(rewrite) => {
                assert_eq!(rewrite.peer_ifindex, 7);
                assert_eq!(rewrite.src_mac, HOST_MAC);
                assert_eq!(rewrite.dst_mac, POD_MAC);
            }
            other => panic!("expected local delivery, got {other:?}"),
        }
    }

    #[test]
    fn vxlan_ingress_passes_unknown_destination() {
        let tables = TestTables::default();
        assert_eq!(
            classify_vxlan_ingress(ip(10, 1, 0, 99), &tables),
            VxlanIngressAction::Pass
        );
    }
}
