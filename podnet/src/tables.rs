// Control-plane side of the shared tables: typed access to the pinned maps
// the classifiers read from.

use std::{net::Ipv4Addr, path::Path};

use anyhow::{anyhow, Context, Result};
use aya::maps::{HashMap as BpfHashMap, Map, MapData};
use aya::Pod;
use serde_json::{Map as JsonMap, Value};

use podnet_common::{DeviceRecord, DeviceRole, LocalEndpoint, RemoteNode};

use crate::loader::{MAP_LOCAL_ENDPOINTS, MAP_OVERLAY_DEVICES, MAP_REMOTE_PODS};

fn open_map<V: Pod>(dir: &Path, name: &str) -> Result<BpfHashMap<MapData, u32, V>> {
    let pin = dir.join(name);
    let map_data = MapData::from_pin(&pin)
        .map_err(|e| anyhow!("failed to open pinned map {}: {}", pin.display(), e))?;
    let map_enum = Map::from_map_data(map_data).map_err(|e| anyhow!("invalid map type: {}", e))?;
    BpfHashMap::try_from(map_enum)
        .map_err(|e| anyhow!("map {name} has unexpected key/value layout: {}", e))
}

pub fn set_local_endpoint(
    dir: &Path,
    pod_ip: Ipv4Addr,
    peer_ifindex: u32,
    pod_mac: [u8; 6],
    host_mac: [u8; 6],
) -> Result<()> {
    let mut map = open_map::<LocalEndpoint>(dir, MAP_LOCAL_ENDPOINTS)?;
    let record = LocalEndpoint {
        peer_ifindex,
        pod_mac,
        host_mac,
    };
    map.insert(u32::from(pod_ip), record, 0)
        .with_context(|| format!("failed to record local endpoint {pod_ip}"))
}

pub fn delete_local_endpoint(dir: &Path, pod_ip: Ipv4Addr) -> Result<()> {
    let mut map = open_map::<LocalEndpoint>(dir, MAP_LOCAL_ENDPOINTS)?;
    map.remove(&u32::from(pod_ip))
        .with_context(|| format!("no local endpoint recorded for {pod_ip}"))
}

pub fn list_local_endpoints(dir: &Path) -> Result<Value> {
    let map = open_map::<LocalEndpoint>(dir, MAP_LOCAL_ENDPOINTS)?;
    let mut entries = Vec::new();
    for item in map.iter() {
        let (key, record) = item.map_err(|e| anyhow!("aya iter error: {}", e))?;
        let mut obj = JsonMap::new();
        obj.insert("pod_ip".into(), Value::String(Ipv4Addr::from(key).to_string()));
        obj.insert("peer_ifindex".into(), Value::from(record.peer_ifindex));
        obj.insert("pod_mac".into(), Value::String(format_mac(&record.pod_mac)));
        obj.insert("host_mac".into(), Value::String(format_mac(&record.host_mac)));
        entries.push(Value::Object(obj));
    }
    Ok(Value::Array(entries))
}

pub fn set_remote_pod(dir: &Path, pod_ip: Ipv4Addr, node_ip: Ipv4Addr) -> Result<()> {
    let mut map = open_map::<RemoteNode>(dir, MAP_REMOTE_PODS)?;
    let record = RemoteNode {
        node_ip: u32::from(node_ip),
    };
    map.insert(u32::from(pod_ip), record, 0)
        .with_context(|| format!("failed to record remote pod {pod_ip}"))
}

pub fn delete_remote_pod(dir: &Path, pod_ip: Ipv4Addr) -> Result<()> {
    let mut map = open_map::<RemoteNode>(dir, MAP_REMOTE_PODS)?;
    map.remove(&u32::from(pod_ip))
        .with_context(|| format!("no remote record for {pod_ip}"))
}

pub fn list_remote_pods(dir: &Path) -> Result<Value> {
    let map = open_map::<RemoteNode>(dir, MAP_REMOTE_PODS)?;
    let mut entries = Vec::new();
    for item in map.iter() {
        let (key, record) = item.map_err(|e| anyhow!("aya iter error: {}", e))?;
        let mut obj = JsonMap::new();
        obj.insert("pod_ip".into(), Value::String(Ipv4Addr::from(key).to_string()));
        obj.insert(
            "node_ip".into(),
            Value::String(Ipv4Addr::from(record.node_ip).to_string()),
        );
        entries.push(Value::Object(obj));
    }
    Ok(Value::Array(entries))
}

pub fn set_device(dir: &Path, role: DeviceRole, ifindex: u32) -> Result<()> {
    let mut map = open_map::<DeviceRecord>(dir, MAP_OVERLAY_DEVICES)?;
    map.insert(role as u32, DeviceRecord { ifindex }, 0)
        .with_context(|| format!("failed to register {role:?} device"))
}

pub fn list_devices(dir: &Path) -> Result<Value> {
    let map = open_map::<DeviceRecord>(dir, MAP_OVERLAY_DEVICES)?;
    let mut entries = Vec::new();
    for item in map.iter() {
        let (key, record) = item.map_err(|e| anyhow!("aya iter error: {}", e))?;
        let role = match key {
            k if k == DeviceRole::Vxlan as u32 => "vxlan",
            k if k == DeviceRole::Veth as u32 => "veth",
            _ => "unknown",
        };
        let mut obj = JsonMap::new();
        obj.insert("role".into(), Value::String(role.to_string()));
        obj.insert("ifindex".into(), Value::from(record.ifindex));
        entries.push(Value::Object(obj));
    }
    Ok(Value::Array(entries))
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in mac.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| anyhow!("MAC address '{s}' has fewer than 6 octets"))?;
        *byte = u8::from_str_radix(part, 16)
            .with_context(|| format!("invalid octet '{part}' in MAC address '{s}'"))?;
    }
    if parts.next().is_some() {
        return Err(anyhow!("MAC address '{s}' has more than 6 octets"));
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mac_round_trips() {
        let mac = parse_mac("02:42:0a:01:00:02").unwrap();
        assert_eq!(mac, [0x02, 0x42, 0x0a, 0x01, 0x00, 0x02]);
        assert_eq!(format_mac(&mac), "02:42:0a:01:00:02");
    }

    #[test]
    fn parse_mac_rejects_bad_input() {
        assert!(parse_mac("02:42:0a:01:00").is_err());
        assert!(parse_mac("02:42:0a:01:00:02:aa").is_err());
        assert!(parse_mac("02:42:0a:01:00:zz").is_err());
        assert!(parse_mac("").is_err());
    }

    #[test]
    fn pod_ip_key_is_native_endian_of_wire_bytes() {
        // The classifiers key lookups by the native-endian value of the
        // big-endian address bytes; Ipv4Addr's u32 conversion matches.
        let ip: Ipv4Addr = "10.1.0.2".parse().unwrap();
        assert_eq!(u32::from(ip), u32::from_be_bytes([10, 1, 0, 2]));
    }
}
