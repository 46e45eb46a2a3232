#![no_std]
#![no_main]

mod maps;

use core::mem;

use aya_ebpf::bindings::{
    bpf_tunnel_key, BPF_F_ZERO_CSUM_TX, TC_ACT_OK, TC_ACT_SHOT, TC_ACT_UNSPEC,
};
use aya_ebpf::helpers::r#gen::{bpf_redirect, bpf_redirect_peer, bpf_skb_set_tunnel_key};
use aya_ebpf::macros::classifier;
use aya_ebpf::programs::TcContext;
use aya_log_ebpf::error;
use podnet_common::frame::{self, ETH_DST_OFFSET, ETH_SRC_OFFSET, FRAME_HDR_LEN};
use podnet_common::{
    classify_veth_ingress, classify_vxlan_egress, classify_vxlan_ingress, DeviceRole,
    EgressAction, LocalEndpoint, LocalRewrite, OverlayView, RemoteNode, VethAction,
    VxlanIngressAction,
};

/// View over the shared maps. Lookups copy the record out so a concurrent
/// control-plane replace is observed whole or not at all.
struct MapView;

impl OverlayView for MapView {
    fn local_endpoint(&self, pod_ip: u32) -> Option<LocalEndpoint> {
        unsafe { maps::LOCAL_ENDPOINTS.get(&pod_ip).copied() }
    }

    fn remote_node(&self, pod_ip: u32) -> Option<RemoteNode> {
        unsafe { maps::REMOTE_PODS.get(&pod_ip).copied() }
    }

    fn device_index(&self, role: DeviceRole) -> Option<u32> {
        unsafe { maps::OVERLAY_DEVICES.get(&(role as u32)).map(|dev| dev.ifindex) }
    }
}

/// Reads the Ethernet+IPv4 header prefix and returns the destination
/// address. The bounded load rejects truncated frames before any field is
/// touched.
#[inline(always)]
fn validated_dst(ctx: &TcContext) -> Option<u32> {
    let hdr: [u8; FRAME_HDR_LEN] = ctx.load(0).ok()?;
    frame::parse_ipv4(&hdr).map(|addrs| addrs.dst)
}

#[inline(always)]
fn rewrite_macs(ctx: &mut TcContext, rewrite: &LocalRewrite) -> Result<(), ()> {
    ctx.store(ETH_DST_OFFSET, &rewrite.dst_mac, 0).map_err(|_| ())?;
    ctx.store(ETH_SRC_OFFSET, &rewrite.src_mac, 0).map_err(|_| ())?;
    Ok(())
}

#[classifier]
pub fn veth_ingress(ctx: TcContext) -> i32 {
    match try_veth_ingress(ctx) {
        Ok(ret) | Err(ret) => ret,
    }
}

fn try_veth_ingress(mut ctx: TcContext) -> Result<i32, i32> {
    let dst_ip = validated_dst(&ctx).ok_or(TC_ACT_UNSPEC)?;

    match classify_veth_ingress(dst_ip, &MapView) {
        VethAction::Pass => Ok(TC_ACT_UNSPEC),
        VethAction::Deliver(rewrite) => {
            rewrite_macs(&mut ctx, &rewrite).map_err(|_| TC_ACT_UNSPEC)?;
            Ok(unsafe { bpf_redirect_peer(rewrite.peer_ifindex, 0) } as i32)
        }
        VethAction::Forward { ifindex } => Ok(unsafe { bpf_redirect(ifindex, 0) } as i32),
    }
}

#[classifier]
pub fn vxlan_egress(ctx: TcContext) -> i32 {
    match try_vxlan_egress(ctx) {
        Ok(ret) | Err(ret) => ret,
    }
}

fn try_vxlan_egress(ctx: TcContext) -> Result<i32, i32> {
    // Broadcast and other non-IPv4 control traffic also crosses the tunnel
    // device; let it encapsulate unmodified.
    let dst_ip = validated_dst(&ctx).ok_or(TC_ACT_OK)?;

    match classify_vxlan_egress(dst_ip, &MapView) {
        EgressAction::Pass => Ok(TC_ACT_OK),
        EgressAction::Encap(params) => {
            let mut key: bpf_tunnel_key = unsafe { mem::zeroed() };
            key.tunnel_id = params.tunnel_id;
            key.__bindgen_anon_1.remote_ipv4 = params.remote_ipv4;
            key.tunnel_tos = params.tos;
            key.tunnel_ttl = params.ttl;

            let ret = unsafe {
                bpf_skb_set_tunnel_key(
                    ctx.skb.skb,
                    &mut key as *mut bpf_tunnel_key,
                    mem::size_of::<bpf_tunnel_key>() as u32,
                    BPF_F_ZERO_CSUM_TX as u64,
                )
            };
            if ret < 0 {
                // Fail closed: a frame whose encapsulation could not be
                // parameterized must not leave the node.
                error!(
                    &ctx,
                    "set_tunnel_key rejected for remote {:i}, dropping", params.remote_ipv4
                );
                return Err(TC_ACT_SHOT);
            }
            Ok(TC_ACT_OK)
        }
    }
}

#[classifier]
pub fn vxlan_ingress(ctx: TcContext) -> i32 {
    match try_vxlan_ingress(ctx) {
        Ok(ret) | Err(ret) => ret,
    }
}

fn try_vxlan_ingress(mut ctx: TcContext) -> Result<i32, i32> {
    let dst_ip = validated_dst(&ctx).ok_or(TC_ACT_UNSPEC)?;

    match classify_vxlan_ingress(dst_ip, &MapView) {
        VxlanIngressAction::Pass => Ok(TC_ACT_OK),
        VxlanIngressAction::Deliver(rewrite) => {
            rewrite_macs(&mut ctx, &rewrite).map_err(|_| TC_ACT_UNSPEC)?;
            Ok(unsafe { bpf_redirect(rewrite.peer_ifindex, 0) } as i32)
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[no_mangle]
#[link_section = "license"]
static LICENSE: [u8; 4] = *b"GPL\0";
