// Lookup tables shared with the control plane. The loader pins these under
// the podnet bpffs directory; the control plane is the only writer, the
// classifiers only read.

use aya_ebpf::macros::map;
use aya_ebpf::maps::HashMap;
use podnet_common::{DeviceRecord, LocalEndpoint, RemoteNode, TABLE_CAPACITY};

/// Pods scheduled on this node, keyed by pod IPv4 address.
#[map(name = "local_endpoints")]
pub static LOCAL_ENDPOINTS: HashMap<u32, LocalEndpoint> =
    HashMap::<u32, LocalEndpoint>::with_max_entries(TABLE_CAPACITY, 0);

/// Pods hosted on other nodes, keyed by pod IPv4 address.
#[map(name = "remote_pods")]
pub static REMOTE_PODS: HashMap<u32, RemoteNode> =
    HashMap::<u32, RemoteNode>::with_max_entries(TABLE_CAPACITY, 0);

/// Device registry, keyed by `DeviceRole` discriminant.
#[map(name = "overlay_devices")]
pub static OVERLAY_DEVICES: HashMap<u32, DeviceRecord> =
    HashMap::<u32, DeviceRecord>::with_max_entries(TABLE_CAPACITY, 0);
